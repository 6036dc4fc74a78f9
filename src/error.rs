use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TicketPulseError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error), // Converts io::Error into TicketPulseError automatically

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] Box<ureq::Error>),

    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("Logger error: {0}")]
    LoggerError(#[from] flexi_logger::FlexiLoggerError),

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}

impl From<ureq::Error> for TicketPulseError {
    fn from(err: ureq::Error) -> Self {
        TicketPulseError::HttpError(Box::new(err))
    }
}
