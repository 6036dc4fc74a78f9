use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use log::{debug, error, info, warn, Level};
use logging_timer::timer;

use crate::config::StorageConfig;
use crate::error::TicketPulseError;
use crate::normalize::{normalize, RawTable};
use crate::registry::{Registry, StoredMetadata};
use crate::storage::local::LocalDir;
use crate::storage::supabase::SupabaseStore;
use crate::storage::BlobStore;
use crate::tickets::TicketTable;

/// Where a load result's data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Remote,
    Local,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Remote => write!(f, "remote"),
            DataSource::Local => write!(f, "local"),
        }
    }
}

/// How the loader reaches remote storage.
pub enum Remote {
    /// Turned off by configuration.
    Disabled,
    /// Configuration is incomplete; the message explains why.
    Unavailable(String),
    Enabled {
        store: Arc<dyn BlobStore>,
        metadata_object: String,
    },
}

impl Remote {
    /// Remote mode selected by configuration. A store that cannot be built
    /// leaves the loader on local data with the reason recorded.
    pub fn from_config(config: &StorageConfig) -> Self {
        if config.disabled {
            return Remote::Disabled;
        }
        match SupabaseStore::from_config(config) {
            Ok(store) => Remote::Enabled {
                store: Arc::new(store),
                metadata_object: config.metadata_object.clone(),
            },
            Err(e) => {
                warn!("Remote storage is not configured: {}", e);
                Remote::Unavailable(e.to_string())
            }
        }
    }
}

/// Snapshot produced by one load.
#[derive(Debug, Clone)]
pub struct DatasetLoadResult {
    /// Every dataset that normalized successfully, included or not.
    pub frames: BTreeMap<String, TicketTable>,
    /// Included datasets concatenated in discovery order.
    pub combined: TicketTable,
    pub registry: Registry,
    /// Non-fatal problems, one line each.
    pub errors: Vec<String>,
    pub source: DataSource,
}

/// Loads and merges all datasets, memoized per invalidation token.
///
/// The same token always returns the same snapshot. Callers refresh by
/// passing a new token; nothing expires on its own.
pub struct BundleLoader {
    remote: Remote,
    local: LocalDir,
    cache: HashMap<u64, Arc<DatasetLoadResult>>,
}

impl BundleLoader {
    pub fn new(remote: Remote, local_dir: &Path) -> Self {
        BundleLoader {
            remote,
            local: LocalDir::new(local_dir),
            cache: HashMap::new(),
        }
    }

    pub fn load(&mut self, token: u64) -> Result<Arc<DatasetLoadResult>, TicketPulseError> {
        if let Some(cached) = self.cache.get(&token) {
            debug!("Using cached dataset bundle for token {}", token);
            return Ok(Arc::clone(cached));
        }

        let result = Arc::new(self.load_uncached(token)?);

        // Tokens only move forward, so older snapshots can never be asked for again
        self.cache.retain(|cached_token, _| *cached_token > token);
        self.cache.insert(token, Arc::clone(&result));

        Ok(result)
    }

    #[cfg(test)]
    pub fn cached_tokens(&self) -> Vec<u64> {
        let mut tokens: Vec<u64> = self.cache.keys().copied().collect();
        tokens.sort();
        tokens
    }

    fn load_uncached(&self, token: u64) -> Result<DatasetLoadResult, TicketPulseError> {
        let _tmr = timer!(Level::Debug; "BundleLoader::load", "token {}", token);

        match &self.remote {
            Remote::Disabled => {
                info!("Remote storage disabled; loading local data");
                self.load_local(vec!["Remote storage disabled by configuration".to_string()])
            }
            Remote::Unavailable(reason) => {
                warn!("Remote storage unavailable ({}); loading local data", reason);
                self.load_local(vec![reason.clone()])
            }
            Remote::Enabled {
                store,
                metadata_object,
            } => self.load_remote(store.as_ref(), metadata_object),
        }
    }

    fn load_remote(
        &self,
        store: &dyn BlobStore,
        metadata_object: &str,
    ) -> Result<DatasetLoadResult, TicketPulseError> {
        let stored = StoredMetadata::load(store, metadata_object);
        let objects = match store.list_csv_objects() {
            Ok(objects) => objects,
            Err(e) => {
                error!("Falling back to local data: {}", e);
                return self.load_local(vec![e.to_string()]);
            }
        };

        let reconciled = Registry::reconcile(&stored, &objects);
        let registry = reconciled.registry;
        let mut errors = Vec::new();
        let mut frames = BTreeMap::new();
        let mut included = Vec::new();

        for obj in objects.iter().filter(|obj| registry.contains(&obj.name)) {
            let table = store
                .download(&obj.name)
                .and_then(|bytes| RawTable::from_utf8_bytes(&bytes))
                .map(|raw| normalize(&raw, &obj.name));

            match table {
                Ok(table) => {
                    debug!("Loaded {} ticket(s) from {}", table.len(), obj.name);
                    if registry.is_included(&obj.name) {
                        included.push(obj.name.clone());
                    }
                    frames.insert(obj.name.clone(), table);
                }
                Err(e) => {
                    warn!("Skipping dataset {}: {}", obj.name, e);
                    errors.push(format!("{}: {}", obj.name, e));
                }
            }
        }

        let combined = TicketTable::concat(included.iter().filter_map(|name| frames.get(name)));

        if reconciled.dirty {
            if let Err(e) = registry.save(store, metadata_object) {
                warn!("Could not persist dataset metadata: {}", e);
                errors.push(format!("Metadata persistence failed: {}", e));
            }
        }

        info!(
            "Loaded {} dataset(s), {} ticket(s) included",
            frames.len(),
            combined.len()
        );

        Ok(DatasetLoadResult {
            frames,
            combined,
            registry,
            errors,
            source: DataSource::Remote,
        })
    }

    fn load_local(&self, mut errors: Vec<String>) -> Result<DatasetLoadResult, TicketPulseError> {
        let names = self.local.list_csv_files()?;
        let mut frames = BTreeMap::new();

        for name in &names {
            let table = self
                .local
                .read(name)
                .and_then(|bytes| RawTable::from_windows_1252_bytes(&bytes))
                .map(|raw| normalize(&raw, name));

            match table {
                Ok(table) => {
                    frames.insert(name.clone(), table);
                }
                Err(e) => {
                    warn!("Skipping local dataset {}: {}", name, e);
                    errors.push(format!("{}: {}", name, e));
                }
            }
        }

        // Listing is sorted, and so is the BTreeMap, so this is discovery order
        let combined = TicketTable::concat(frames.values());
        let registry = Registry::all_included(frames.keys().cloned());

        info!(
            "Loaded {} local dataset(s) from {}, {} ticket(s)",
            frames.len(),
            self.local.path().display(),
            combined.len()
        );

        Ok(DatasetLoadResult {
            frames,
            combined,
            registry,
            errors,
            source: DataSource::Local,
        })
    }
}
