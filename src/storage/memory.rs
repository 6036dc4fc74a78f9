use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use crate::error::TicketPulseError;

use super::{BlobStore, ObjectInfo};

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, (Vec<u8>, String)>,
    fail_list: bool,
    fail_downloads: HashSet<String>,
    fail_uploads: HashSet<String>,
    fail_deletes: bool,
    uploads: Vec<String>,
}

/// In-memory blob store with per-operation failure injection.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, name: &str, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(
            name.to_owned(),
            (data.to_vec(), "2024-05-01T10:00:00Z".to_owned()),
        );
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner.objects.get(name).map(|(data, _)| data.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn fail_list(&self, fail: bool) {
        self.inner.lock().unwrap().fail_list = fail;
    }

    pub fn fail_download(&self, name: &str) {
        self.inner.lock().unwrap().fail_downloads.insert(name.to_owned());
    }

    pub fn fail_upload(&self, name: &str, fail: bool) {
        let mut inner = self.inner.lock().unwrap();
        if fail {
            inner.fail_uploads.insert(name.to_owned());
        } else {
            inner.fail_uploads.remove(name);
        }
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_deletes = fail;
    }

    /// Names passed to successful uploads, in order.
    pub fn uploads(&self) -> Vec<String> {
        self.inner.lock().unwrap().uploads.clone()
    }
}

impl BlobStore for MemoryStore {
    fn list_objects(&self) -> Result<Vec<ObjectInfo>, TicketPulseError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_list {
            return Err(TicketPulseError::StorageError(
                "Failed to list storage objects".to_string(),
            ));
        }
        Ok(inner
            .objects
            .iter()
            .map(|(name, (_, created_at))| ObjectInfo {
                name: name.clone(),
                created_at: Some(created_at.clone()),
            })
            .collect())
    }

    fn download(&self, name: &str) -> Result<Vec<u8>, TicketPulseError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_downloads.contains(name) {
            return Err(TicketPulseError::StorageError(format!(
                "Failed to download {}",
                name
            )));
        }
        inner
            .objects
            .get(name)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| TicketPulseError::StorageError(format!("Object not found: {}", name)))
    }

    fn upload(
        &self,
        name: &str,
        data: &[u8],
        _content_type: &str,
        upsert: bool,
    ) -> Result<(), TicketPulseError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_uploads.contains(name) {
            return Err(TicketPulseError::StorageError(format!(
                "Failed to upload {}",
                name
            )));
        }
        if !upsert && inner.objects.contains_key(name) {
            return Err(TicketPulseError::StorageError(format!(
                "The resource already exists: {}",
                name
            )));
        }
        inner.objects.insert(
            name.to_owned(),
            (data.to_vec(), "2024-06-01T08:30:00Z".to_owned()),
        );
        inner.uploads.push(name.to_owned());
        Ok(())
    }

    fn delete(&self, names: &[&str]) -> Result<(), TicketPulseError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_deletes {
            return Err(TicketPulseError::StorageError(format!(
                "Failed to delete {}",
                names.join(", ")
            )));
        }
        for name in names {
            inner.objects.remove(*name);
        }
        Ok(())
    }
}
