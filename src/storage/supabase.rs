use std::io::Read;
use std::time::Duration;

use log::{debug, info};
use serde_json::json;
use url::Url;

use crate::config::StorageConfig;
use crate::error::TicketPulseError;

use super::{BlobStore, ObjectInfo};

const LIST_PAGE_SIZE: usize = 1000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Blob store backed by a Supabase storage bucket, using the storage REST API
/// with blocking requests.
pub struct SupabaseStore {
    agent: ureq::Agent,
    base: Url,
    bucket: String,
    api_key: String,
}

impl SupabaseStore {
    /// Build a store from configuration. A missing endpoint, key or bucket is
    /// a configuration error.
    pub fn from_config(config: &StorageConfig) -> Result<Self, TicketPulseError> {
        let url = required(&config.url, "storage.url")?;
        let api_key = required(&config.api_key, "storage.api_key")?;
        let bucket = required(&config.bucket, "storage.bucket")?;

        let base = Url::parse(url)?;
        if base.cannot_be_a_base() {
            return Err(TicketPulseError::ConfigError(format!(
                "storage.url '{}' is not a usable base URL",
                url
            )));
        }

        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();

        info!("Using Supabase storage bucket '{}' at {}", bucket, base);

        Ok(SupabaseStore {
            agent,
            base,
            bucket: bucket.to_owned(),
            api_key: api_key.to_owned(),
        })
    }

    /// `<base>/storage/v1/object/<segments...>` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, TicketPulseError> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                TicketPulseError::ConfigError(format!("Invalid storage URL: {}", self.base))
            })?;
            path.pop_if_empty().extend(["storage", "v1", "object"]);
            path.extend(segments);
        }
        Ok(url)
    }

    fn request(&self, method: &str, url: &Url) -> ureq::Request {
        self.agent
            .request_url(method, url)
            .set("apikey", &self.api_key)
            .set("Authorization", &format!("Bearer {}", self.api_key))
    }
}

fn required<'a>(value: &'a str, key: &str) -> Result<&'a str, TicketPulseError> {
    let value = value.trim();
    if value.is_empty() {
        Err(TicketPulseError::ConfigError(format!(
            "{} is required for remote storage",
            key
        )))
    } else {
        Ok(value)
    }
}

impl BlobStore for SupabaseStore {
    fn list_objects(&self) -> Result<Vec<ObjectInfo>, TicketPulseError> {
        let url = self.endpoint(&["list", &self.bucket])?;
        let mut objects = Vec::new();
        let mut offset = 0;

        loop {
            let page: Vec<ObjectInfo> = self
                .request("POST", &url)
                .send_json(json!({
                    "prefix": "",
                    "limit": LIST_PAGE_SIZE,
                    "offset": offset,
                    "sortBy": { "column": "name", "order": "asc" },
                }))
                .map_err(|e| {
                    TicketPulseError::StorageError(format!(
                        "Failed to list storage objects: {}",
                        e
                    ))
                })?
                .into_json()?;

            let count = page.len();
            objects.extend(page);
            if count < LIST_PAGE_SIZE {
                break;
            }
            offset += count;
        }

        debug!("Listed {} object(s) in bucket '{}'", objects.len(), self.bucket);
        Ok(objects)
    }

    fn download(&self, name: &str) -> Result<Vec<u8>, TicketPulseError> {
        let url = self.endpoint(&[&self.bucket, name])?;
        let response = self.request("GET", &url).call().map_err(|e| {
            TicketPulseError::StorageError(format!("Failed to download {}: {}", name, e))
        })?;

        let mut bytes = Vec::new();
        response.into_reader().read_to_end(&mut bytes)?;
        debug!("Downloaded {} ({} bytes)", name, bytes.len());
        Ok(bytes)
    }

    fn upload(
        &self,
        name: &str,
        data: &[u8],
        content_type: &str,
        upsert: bool,
    ) -> Result<(), TicketPulseError> {
        let url = self.endpoint(&[&self.bucket, name])?;
        self.request("POST", &url)
            .set("Content-Type", content_type)
            .set("x-upsert", if upsert { "true" } else { "false" })
            .send_bytes(data)
            .map_err(|e| {
                TicketPulseError::StorageError(format!("Failed to upload {}: {}", name, e))
            })?;
        debug!("Uploaded {} ({} bytes)", name, data.len());
        Ok(())
    }

    fn delete(&self, names: &[&str]) -> Result<(), TicketPulseError> {
        let url = self.endpoint(&[&self.bucket])?;
        self.request("DELETE", &url)
            .send_json(json!({ "prefixes": names }))
            .map_err(|e| {
                TicketPulseError::StorageError(format!(
                    "Failed to delete {}: {}",
                    names.join(", "),
                    e
                ))
            })?;
        debug!("Deleted {}", names.join(", "));
        Ok(())
    }
}
