use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};

use crate::error::TicketPulseError;
use crate::loader::{BundleLoader, DataSource, DatasetLoadResult, Remote};
use crate::registry::{unknown_dataset, DatasetMeta, Registry};
use crate::storage::{is_csv_name, BlobStore, CSV_CONTENT_TYPE};

pub const MAX_UPLOAD_BYTES: usize = 2 * 1024 * 1024;

const UPLOADED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Per-user state: the bundle loader, its invalidation token, and this
/// session's copy of the dataset registry.
///
/// Every registry mutation takes `&mut self`, so a read-modify-persist cycle
/// can never interleave with another one on the same session. The token only
/// moves after the change has been durably written.
pub struct Session {
    loader: BundleLoader,
    target: Option<(Arc<dyn BlobStore>, String)>,
    token: u64,
    registry: Registry,
    source: Option<DataSource>,
}

impl Session {
    pub fn new(remote: Remote, local_dir: &Path) -> Self {
        let target = match &remote {
            Remote::Enabled {
                store,
                metadata_object,
            } => Some((Arc::clone(store), metadata_object.clone())),
            _ => None,
        };

        Session {
            loader: BundleLoader::new(remote, local_dir),
            target,
            token: 0,
            registry: Registry::new(),
            source: None,
        }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The bundle for the current token. The session registry is replaced
    /// only when the loaded one differs from it.
    pub fn bundle(&mut self) -> Result<Arc<DatasetLoadResult>, TicketPulseError> {
        let bundle = self.loader.load(self.token)?;
        if self.registry != bundle.registry {
            self.registry = bundle.registry.clone();
        }
        self.source = Some(bundle.source);
        Ok(bundle)
    }

    pub fn set_included(&mut self, name: &str, included: bool) -> Result<(), TicketPulseError> {
        let (store, object) = self.management_target()?;
        self.registry.set_included(name, included, |registry| {
            registry.save(store.as_ref(), &object)
        })?;

        info!(
            "{} '{}' in analytics",
            if included { "Included" } else { "Excluded" },
            name
        );
        self.invalidate();
        Ok(())
    }

    /// Flip inclusion and return the new state.
    pub fn toggle_inclusion(&mut self, name: &str) -> Result<bool, TicketPulseError> {
        self.management_target()?;
        let included = !self
            .registry
            .get(name)
            .ok_or_else(|| unknown_dataset(name))?
            .included;
        self.set_included(name, included)?;
        Ok(included)
    }

    /// Delete the blob, then drop its registry entry. If the registry cannot
    /// be saved the entry is kept and the error returned.
    pub fn delete_dataset(&mut self, name: &str) -> Result<(), TicketPulseError> {
        let (store, object) = self.management_target()?;
        if !self.registry.contains(name) {
            return Err(unknown_dataset(name));
        }

        store.delete(&[name])?;
        self.registry
            .remove(name, |registry| registry.save(store.as_ref(), &object))?;

        info!("Deleted dataset '{}'", name);
        self.invalidate();
        Ok(())
    }

    /// Validate and upload a new CSV dataset, registering it as included.
    /// Returns the stored name.
    pub fn upload_dataset(&mut self, name: &str, data: &[u8]) -> Result<String, TicketPulseError> {
        let (store, object) = self.management_target()?;
        let name = validate_upload(&self.registry, name, data)?;

        store.upload(&name, data, CSV_CONTENT_TYPE, false)?;

        let meta = DatasetMeta::new(true, Some(Utc::now().format(UPLOADED_AT_FORMAT).to_string()));
        if let Err(e) = self
            .registry
            .insert(&name, meta, |registry| registry.save(store.as_ref(), &object))
        {
            warn!("Uploaded '{}' but could not register it: {}", name, e);
            return Err(e);
        }

        info!("Uploaded dataset '{}' ({} bytes)", name, data.len());
        self.invalidate();
        Ok(name)
    }

    fn invalidate(&mut self) {
        self.token += 1;
    }

    /// Store and sidecar name, available only while the session is on remote data.
    fn management_target(&mut self) -> Result<(Arc<dyn BlobStore>, String), TicketPulseError> {
        if self.source.is_none() {
            self.bundle()?;
        }
        match (&self.source, &self.target) {
            (Some(DataSource::Remote), Some((store, object))) => {
                Ok((Arc::clone(store), object.clone()))
            }
            _ => Err(TicketPulseError::ValidationError(
                "Remote storage unavailable; dataset management is disabled while local data is in use."
                    .to_string(),
            )),
        }
    }
}

/// Checks run before any storage call. Returns the trimmed name.
pub fn validate_upload(
    registry: &Registry,
    name: &str,
    data: &[u8],
) -> Result<String, TicketPulseError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TicketPulseError::ValidationError(
            "Uploaded file must have a name.".to_string(),
        ));
    }
    if !is_csv_name(name) {
        return Err(TicketPulseError::ValidationError(
            "Only .csv files are supported.".to_string(),
        ));
    }
    if data.len() > MAX_UPLOAD_BYTES {
        return Err(TicketPulseError::ValidationError(
            "File exceeds the 2 MB size limit.".to_string(),
        ));
    }
    if registry.contains(name) {
        return Err(TicketPulseError::ValidationError(format!(
            "A dataset named '{}' already exists.",
            name
        )));
    }
    Ok(name.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::group_counts;
    use crate::loader::tests::{csv_rows, remote, two_dataset_store, METADATA};
    use crate::registry::StoredMetadata;
    use crate::storage::memory::MemoryStore;
    use crate::tickets::TicketColumn;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn session(store: &Arc<MemoryStore>) -> (Session, TempDir) {
        let local = TempDir::new().unwrap();
        (Session::new(remote(store), local.path()), local)
    }

    #[test]
    fn test_exclude_and_reload_shows_remaining_dataset() {
        let store = two_dataset_store();
        let (mut session, _local) = session(&store);
        assert_eq!(session.bundle().unwrap().combined.len(), 5);

        session.set_included("A.csv", false).unwrap();
        assert_eq!(session.token(), 1);

        let bundle = session.bundle().unwrap();
        assert_eq!(bundle.combined.len(), 2);
        assert_eq!(
            group_counts(&bundle.combined, TicketColumn::AssignedToQueue),
            vec![("Support".to_string(), 2)]
        );
        assert!(!session.registry().is_included("A.csv"));

        let stored = StoredMetadata::decode(&store.get(METADATA).unwrap());
        assert!(!stored.get("A.csv").unwrap().included);
    }

    #[test]
    fn test_failed_persist_rolls_back_toggle() {
        let store = two_dataset_store();
        let (mut session, _local) = session(&store);
        session.bundle().unwrap();
        store.fail_upload(METADATA, true);

        assert!(session.toggle_inclusion("A.csv").is_err());
        assert!(session.registry().is_included("A.csv"));
        assert_eq!(session.token(), 0);
        assert_eq!(session.bundle().unwrap().combined.len(), 5);
    }

    #[test]
    fn test_toggle_twice_restores_inclusion() {
        let store = two_dataset_store();
        let (mut session, _local) = session(&store);

        assert!(!session.toggle_inclusion("B.csv").unwrap());
        assert!(session.toggle_inclusion("B.csv").unwrap());
        assert_eq!(session.token(), 2);
        assert_eq!(session.bundle().unwrap().combined.len(), 5);
    }

    #[test]
    fn test_toggle_unknown_dataset() {
        let store = two_dataset_store();
        let (mut session, _local) = session(&store);
        let err = session.toggle_inclusion("missing.csv").unwrap_err();
        assert_eq!(err.to_string(), "Unknown dataset 'missing.csv'");
    }

    #[test]
    fn test_upload_registers_included_dataset() {
        let store = two_dataset_store();
        let (mut session, _local) = session(&store);

        let name = session
            .upload_dataset("  C.csv ", csv_rows("Field", 4).as_bytes())
            .unwrap();
        assert_eq!(name, "C.csv");
        assert!(store.contains("C.csv"));
        assert_eq!(session.token(), 1);

        let meta = session.registry().get("C.csv").unwrap();
        assert!(meta.included);
        let uploaded_at = meta.uploaded_at.clone().unwrap();
        assert!(uploaded_at.ends_with('Z'), "{}", uploaded_at);
        assert!(meta.uploaded_at_label().ends_with(" UTC"));

        assert_eq!(session.bundle().unwrap().combined.len(), 9);
    }

    #[test]
    fn test_upload_validation_happens_before_storage() {
        let store = two_dataset_store();
        let (mut session, _local) = session(&store);
        session.bundle().unwrap();

        let cases: [(&str, Vec<u8>, &str); 4] = [
            ("   ", b"Number\n".to_vec(), "Uploaded file must have a name."),
            ("notes.txt", b"Number\n".to_vec(), "Only .csv files are supported."),
            (
                "big.csv",
                vec![b'x'; MAX_UPLOAD_BYTES + 1],
                "File exceeds the 2 MB size limit.",
            ),
            ("A.csv", b"Number\n".to_vec(), "A dataset named 'A.csv' already exists."),
        ];

        for (name, data, message) in cases {
            let err = session.upload_dataset(name, &data).unwrap_err();
            assert_eq!(err.to_string(), message);
        }
        // Only the reconcile save from the first load reached storage
        assert_eq!(store.uploads(), vec![METADATA.to_string()]);
        assert_eq!(session.token(), 0);
    }

    #[test]
    fn test_upload_at_size_limit_is_accepted() {
        let registry = Registry::new();
        let data = vec![b'x'; MAX_UPLOAD_BYTES];
        assert_eq!(validate_upload(&registry, "edge.CSV", &data).unwrap(), "edge.CSV");
    }

    #[test]
    fn test_upload_with_failed_registry_save_is_not_registered() {
        let store = two_dataset_store();
        let (mut session, _local) = session(&store);
        session.bundle().unwrap();
        store.fail_upload(METADATA, true);

        assert!(session.upload_dataset("C.csv", b"Number\n1\n").is_err());
        assert!(!session.registry().contains("C.csv"));
        assert_eq!(session.token(), 0);
    }

    #[test]
    fn test_delete_removes_blob_and_entry() {
        let store = two_dataset_store();
        let (mut session, _local) = session(&store);

        session.delete_dataset("A.csv").unwrap();
        assert!(!store.contains("A.csv"));
        assert!(!session.registry().contains("A.csv"));
        assert_eq!(session.token(), 1);

        let stored = StoredMetadata::decode(&store.get(METADATA).unwrap());
        assert!(stored.get("A.csv").is_none());
        assert_eq!(session.bundle().unwrap().combined.len(), 2);
    }

    #[test]
    fn test_delete_storage_failure_leaves_registry() {
        let store = two_dataset_store();
        let (mut session, _local) = session(&store);
        session.bundle().unwrap();
        store.fail_deletes(true);

        assert!(session.delete_dataset("A.csv").is_err());
        assert!(store.contains("A.csv"));
        assert!(session.registry().contains("A.csv"));
        assert_eq!(session.token(), 0);
    }

    #[test]
    fn test_delete_with_failed_registry_save_reinserts_entry() {
        let store = two_dataset_store();
        let (mut session, _local) = session(&store);
        session.bundle().unwrap();
        store.fail_upload(METADATA, true);

        assert!(session.delete_dataset("A.csv").is_err());
        assert!(!store.contains("A.csv"));
        assert!(session.registry().is_included("A.csv"));
        assert_eq!(session.token(), 0);
    }

    #[test]
    fn test_management_refused_in_local_mode() {
        let local = TempDir::new().unwrap();
        fs::write(local.path().join("a.csv"), csv_rows("Billing", 1)).unwrap();
        let mut session = Session::new(Remote::Disabled, local.path());

        assert_eq!(session.bundle().unwrap().source, DataSource::Local);
        for result in [
            session.set_included("a.csv", false),
            session.delete_dataset("a.csv"),
            session.upload_dataset("b.csv", b"Number\n").map(|_| ()),
        ] {
            let err = result.unwrap_err();
            assert!(err.to_string().contains("dataset management is disabled"));
        }
        assert!(session.registry().is_included("a.csv"));
    }

    #[test]
    fn test_management_refused_after_listing_fallback() {
        let store = two_dataset_store();
        store.fail_list(true);
        let (mut session, _local) = session(&store);

        assert!(session.set_included("A.csv", false).is_err());
        assert!(store.get(METADATA).is_none());
    }
}
