use thiserror::Error;

/// Any persistence I/O failure is fatal to the process — this error exists
/// so callers can log and terminate, not to enable recovery.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence backend failure: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
