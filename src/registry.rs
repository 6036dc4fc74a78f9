use std::collections::{BTreeMap, BTreeSet};

use chrono::DateTime;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::TicketPulseError;
use crate::storage::{BlobStore, ObjectInfo, JSON_CONTENT_TYPE};

/// Inclusion state and provenance for one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetMeta {
    pub included: bool,
    pub uploaded_at: Option<String>,
}

impl DatasetMeta {
    pub fn new(included: bool, uploaded_at: Option<String>) -> Self {
        DatasetMeta {
            included,
            uploaded_at,
        }
    }

    /// `uploaded_at` as `YYYY-MM-DD HH:MM UTC`, or verbatim when it is not an
    /// RFC 3339 timestamp. Empty when unknown.
    pub fn uploaded_at_label(&self) -> String {
        match &self.uploaded_at {
            None => String::new(),
            Some(value) => match DateTime::parse_from_rfc3339(value) {
                Ok(parsed) => parsed
                    .naive_utc()
                    .format("%Y-%m-%d %H:%M UTC")
                    .to_string(),
                Err(_) => value.clone(),
            },
        }
    }
}

impl Default for DatasetMeta {
    fn default() -> Self {
        DatasetMeta::new(true, None)
    }
}

// ============================================================================
// Sidecar document
// ============================================================================

/// On-disk shape of the metadata sidecar:
/// `{"datasets": {name: {included, disabled?, uploaded_at?}}}`
#[derive(Debug, Default, Serialize)]
struct SidecarDocument {
    datasets: BTreeMap<String, SidecarEntry>,
}

// Legacy `disabled` is read by `decode` and never written
#[derive(Debug, Serialize)]
struct SidecarEntry {
    included: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    uploaded_at: Option<String>,
}

/// Loose truthiness for hand-edited flags: `null`, `false`, `0`, `""`, `[]`
/// and `{}` are false, anything else is true. An absent key is `default`.
fn flag(entry: &Map<String, Value>, key: &str, default: bool) -> bool {
    match entry.get(key) {
        None => default,
        Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

/// Metadata as read from the sidecar, with the legacy `disabled` flag already
/// folded into `included`. `migrated` names the entries where that happened.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoredMetadata {
    entries: BTreeMap<String, DatasetMeta>,
    migrated: BTreeSet<String>,
}

impl StoredMetadata {
    /// Decode sidecar bytes. Corrupt content is treated as "no stored
    /// metadata".
    pub fn decode(bytes: &[u8]) -> Self {
        let document: Value = match serde_json::from_slice(bytes) {
            Ok(document) => document,
            Err(e) => {
                warn!("Ignoring corrupt dataset metadata: {}", e);
                return StoredMetadata::default();
            }
        };

        let Some(datasets) = document.get("datasets").and_then(Value::as_object) else {
            return StoredMetadata::default();
        };

        let mut stored = StoredMetadata::default();
        for (name, entry) in datasets {
            let Some(entry) = entry.as_object() else {
                warn!("Ignoring malformed metadata entry for dataset '{}'", name);
                continue;
            };

            let included = flag(entry, "included", true);
            let disabled = flag(entry, "disabled", false);
            let uploaded_at = entry
                .get("uploaded_at")
                .and_then(Value::as_str)
                .map(str::to_owned);

            if disabled {
                stored.migrated.insert(name.clone());
            }
            stored.entries.insert(
                name.clone(),
                DatasetMeta::new(included && !disabled, uploaded_at),
            );
        }
        stored
    }

    /// Read the sidecar from the store. A missing or unreadable sidecar is
    /// treated as "no stored metadata".
    pub fn load(store: &dyn BlobStore, object: &str) -> Self {
        match store.download(object) {
            Ok(bytes) => Self::decode(&bytes),
            Err(e) => {
                debug!("No dataset metadata at '{}': {}", object, e);
                StoredMetadata::default()
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&DatasetMeta> {
        self.entries.get(name)
    }

    pub fn was_migrated(&self, name: &str) -> bool {
        self.migrated.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Dataset name → metadata.
///
/// Mutations take a `persist` callback that must durably write the whole
/// snapshot. If it fails the registry is restored to its state before the
/// mutation and the error is returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    datasets: BTreeMap<String, DatasetMeta>,
}

/// Result of reconciling stored metadata with what storage actually holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub registry: Registry,
    /// The registry differs from the stored sidecar and should be re-saved.
    pub dirty: bool,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Every name included, as used for local fallback data.
    pub fn all_included<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Registry {
            datasets: names
                .into_iter()
                .map(|name| (name.into(), DatasetMeta::default()))
                .collect(),
        }
    }

    /// Build the registry for the datasets discovered in storage.
    ///
    /// Datasets without stored metadata default to included. Legacy disabled
    /// entries come through as excluded. Stored entries for datasets no longer
    /// in storage are dropped. Any of these marks the result dirty.
    pub fn reconcile(stored: &StoredMetadata, discovered: &[ObjectInfo]) -> Reconciled {
        let mut registry = Registry::new();
        let mut dirty = false;

        for obj in discovered {
            if obj.name.is_empty() {
                continue;
            }

            let meta = match stored.get(&obj.name) {
                None => {
                    debug!("New dataset '{}' defaults to included", obj.name);
                    dirty = true;
                    DatasetMeta::new(true, obj.created_at.clone())
                }
                Some(meta) => {
                    if stored.was_migrated(&obj.name) {
                        info!("Migrating legacy disabled flag for dataset '{}'", obj.name);
                        dirty = true;
                    }
                    let uploaded_at = meta
                        .uploaded_at
                        .clone()
                        .filter(|s| !s.is_empty())
                        .or_else(|| obj.created_at.clone());
                    DatasetMeta::new(meta.included, uploaded_at)
                }
            };
            registry.datasets.insert(obj.name.clone(), meta);
        }

        let removed: Vec<&String> = stored
            .names()
            .filter(|name| !registry.datasets.contains_key(*name))
            .collect();
        if !removed.is_empty() {
            debug!("Dropping metadata for {} missing dataset(s)", removed.len());
            dirty = true;
        }

        Reconciled { registry, dirty }
    }

    pub fn get(&self, name: &str) -> Option<&DatasetMeta> {
        self.datasets.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.datasets.contains_key(name)
    }

    pub fn is_included(&self, name: &str) -> bool {
        self.datasets.get(name).is_some_and(|meta| meta.included)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Entries sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &DatasetMeta)> {
        self.datasets.iter()
    }

    pub fn any_included(&self) -> bool {
        self.datasets.values().any(|meta| meta.included)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, TicketPulseError> {
        let document = SidecarDocument {
            datasets: self
                .datasets
                .iter()
                .map(|(name, meta)| {
                    (
                        name.clone(),
                        SidecarEntry {
                            included: meta.included,
                            uploaded_at: meta.uploaded_at.clone(),
                        },
                    )
                })
                .collect(),
        };
        Ok(serde_json::to_vec_pretty(&document)?)
    }

    /// Write the whole registry to the sidecar object.
    pub fn save(&self, store: &dyn BlobStore, object: &str) -> Result<(), TicketPulseError> {
        let bytes = self.to_json()?;
        store.upload(object, &bytes, JSON_CONTENT_TYPE, true)?;
        debug!("Saved metadata for {} dataset(s)", self.len());
        Ok(())
    }

    pub fn set_included<F>(
        &mut self,
        name: &str,
        included: bool,
        persist: F,
    ) -> Result<(), TicketPulseError>
    where
        F: FnOnce(&Registry) -> Result<(), TicketPulseError>,
    {
        self.apply(
            |datasets| match datasets.get_mut(name) {
                Some(meta) => {
                    meta.included = included;
                    Ok(())
                }
                None => Err(unknown_dataset(name)),
            },
            persist,
        )
    }

    pub fn insert<F>(
        &mut self,
        name: &str,
        meta: DatasetMeta,
        persist: F,
    ) -> Result<(), TicketPulseError>
    where
        F: FnOnce(&Registry) -> Result<(), TicketPulseError>,
    {
        self.apply(
            |datasets| {
                datasets.insert(name.to_owned(), meta);
                Ok(())
            },
            persist,
        )
    }

    pub fn remove<F>(&mut self, name: &str, persist: F) -> Result<DatasetMeta, TicketPulseError>
    where
        F: FnOnce(&Registry) -> Result<(), TicketPulseError>,
    {
        let removed = self.get(name).cloned().ok_or_else(|| unknown_dataset(name))?;
        self.apply(
            |datasets| {
                datasets.remove(name);
                Ok(())
            },
            persist,
        )?;
        Ok(removed)
    }

    fn apply<C, F>(&mut self, change: C, persist: F) -> Result<(), TicketPulseError>
    where
        C: FnOnce(&mut BTreeMap<String, DatasetMeta>) -> Result<(), TicketPulseError>,
        F: FnOnce(&Registry) -> Result<(), TicketPulseError>,
    {
        let snapshot = self.datasets.clone();
        change(&mut self.datasets)?;

        if let Err(e) = persist(self) {
            warn!("Rolling back dataset registry change: {}", e);
            self.datasets = snapshot;
            return Err(e);
        }

        Ok(())
    }
}

pub(crate) fn unknown_dataset(name: &str) -> TicketPulseError {
    TicketPulseError::ValidationError(format!("Unknown dataset '{}'", name))
}
