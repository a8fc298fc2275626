//! Error types for the driver.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Term error: {0}")]
    Term(#[from] termite_term::TermError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Config error: {0}")]
    Config(#[from] termite_common::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker thread is gone")]
    WorkerGone,

    #[error("Worker thread panicked")]
    WorkerPanicked,
}
