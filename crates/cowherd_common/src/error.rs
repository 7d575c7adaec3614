//! Error types for Cowherd.

use thiserror::Error;

/// Errors produced while scheduling or executing maintenance actions.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Failed(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Scrub action failed: {0}")]
    Scrub(String),

    #[error("Balance action failed: {0}")]
    Balance(String),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Missing privileges: {0}")]
    Privilege(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
