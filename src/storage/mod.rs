pub mod local;
#[cfg(test)]
pub mod memory;
pub mod supabase;

use serde::{Deserialize, Serialize};

use crate::error::TicketPulseError;

pub const CSV_CONTENT_TYPE: &str = "text/csv";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl ObjectInfo {
    pub fn is_csv(&self) -> bool {
        !self.name.is_empty() && is_csv_name(&self.name)
    }
}

/// Case-insensitive `.csv` suffix test.
pub fn is_csv_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".csv")
}

/// A flat key/value blob store holding ticket CSVs and the metadata sidecar.
///
/// Every call is a single blocking attempt. Callers decide whether a failure
/// is fatal, recorded, or a reason to fall back to local data.
pub trait BlobStore: Send + Sync {
    fn list_objects(&self) -> Result<Vec<ObjectInfo>, TicketPulseError>;

    fn download(&self, name: &str) -> Result<Vec<u8>, TicketPulseError>;

    /// Store `data` under `name`. With `upsert` false an existing object is
    /// an error.
    fn upload(
        &self,
        name: &str,
        data: &[u8],
        content_type: &str,
        upsert: bool,
    ) -> Result<(), TicketPulseError>;

    fn delete(&self, names: &[&str]) -> Result<(), TicketPulseError>;

    /// CSV objects only, in listing order.
    fn list_csv_objects(&self) -> Result<Vec<ObjectInfo>, TicketPulseError> {
        Ok(self
            .list_objects()?
            .into_iter()
            .filter(|obj| obj.is_csv())
            .collect())
    }
}
