use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub ticketpulse: String,
    pub ureq: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&'static str; 5] = ["error", "warn", "info", "debug", "trace"];
    const TICKETPULSE_LEVEL: &'static str = "info";
    const UREQ_LEVEL: &'static str = "error";

    /// flexi_logger spec string, e.g. `ticketpulse=info, ureq=error`.
    pub fn log_spec(&self) -> String {
        format!("ticketpulse={}, ureq={}", self.ticketpulse, self.ureq)
    }

    fn ensure_valid(&mut self) {
        validate_level(&mut self.ticketpulse, "ticketpulse", Self::TICKETPULSE_LEVEL);
        validate_level(&mut self.ureq, "ureq", Self::UREQ_LEVEL);
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            ticketpulse: Self::TICKETPULSE_LEVEL.to_string(),
            ureq: Self::UREQ_LEVEL.to_string(),
        }
    }
}

// Trim and lowercase; an unknown level is reported and replaced with the default
fn validate_level(level: &mut String, name: &str, default: &str) {
    let original = level.clone();
    *level = level.trim().to_ascii_lowercase();
    if !LoggingConfig::LOG_LEVELS.contains(&level.as_str()) {
        eprintln!(
            "Config error: {} log level of '{}' is invalid - using default of '{}'",
            name, original, default
        );
        *level = default.to_owned();
    }
}

/// Remote blob storage settings. An empty `url` or `api_key` leaves remote
/// storage unconfigured, and the loader falls back to local data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub disabled: bool,
    pub url: String,
    pub api_key: String,
    pub bucket: String,
    pub metadata_object: String,
}

impl StorageConfig {
    const BUCKET: &'static str = "ticket-csvs";
    const METADATA_OBJECT: &'static str = "_dataset_registry.json";

    fn ensure_valid(&mut self) {
        self.url = self.url.trim().to_owned();
        self.api_key = self.api_key.trim().to_owned();

        if self.bucket.trim().is_empty() {
            eprintln!(
                "Config error: storage bucket is empty - using default of '{}'",
                Self::BUCKET
            );
            self.bucket = Self::BUCKET.to_owned();
        }
        if self.metadata_object.trim().is_empty() {
            eprintln!(
                "Config error: storage metadata_object is empty - using default of '{}'",
                Self::METADATA_OBJECT
            );
            self.metadata_object = Self::METADATA_OBJECT.to_owned();
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            disabled: false,
            url: String::new(),
            api_key: String::new(),
            bucket: Self::BUCKET.to_owned(),
            metadata_object: Self::METADATA_OBJECT.to_owned(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DataConfig {
    /// Fallback CSV directory. Relative paths resolve against the working directory.
    pub local_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            local_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub data: DataConfig,
}

impl Config {
    pub const ENV_PREFIX: &'static str = "TICKETPULSE_";

    /// Default location of the config file inside the app's data directory.
    pub fn default_path(project_dirs: &ProjectDirs) -> PathBuf {
        project_dirs.data_local_dir().join("config.toml")
    }

    /// Loads the configuration from defaults, then `config_path`, then
    /// `TICKETPULSE_*` environment variables (`__` separates sections, e.g.
    /// `TICKETPULSE_STORAGE__API_KEY`).
    ///
    /// The default config is written to disk if no file exists. If extraction
    /// fails, defaults are used.
    pub fn load_config(config_path: &Path) -> Self {
        let default_config = Config::default();

        if !config_path.exists() {
            write_default(config_path, &default_config);
        }

        let figment = Figment::from(Serialized::defaults(default_config.clone()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"));

        let mut config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            default_config
        });

        config.ensure_valid();

        config
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.storage.ensure_valid();
    }
}

fn write_default(config_path: &Path, default_config: &Config) {
    if let Some(parent) = config_path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            eprintln!(
                "Failed to create configuration directory {}: {}",
                parent.display(),
                e
            );
        }
    }
    match toml::to_string_pretty(default_config) {
        Ok(toml_string) => {
            if let Err(e) = fs::write(config_path, toml_string) {
                eprintln!(
                    "Failed to write default config to {}: {}",
                    config_path.display(),
                    e
                );
            }
        }
        Err(_) => eprintln!("Failed to serialize default config."),
    }
}
