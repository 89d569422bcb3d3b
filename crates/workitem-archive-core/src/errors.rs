//! Error taxonomy shared by the stores, transports and sync engines.
//!
//! Engines decide per variant whether a failure aborts a run or is counted
//! and skipped:
//!
//! | Variant | Export | Import | Restore |
//! |---------|--------|--------|---------|
//! | `Configuration` | fatal before start | fatal before start | fatal before start |
//! | `Transport` | aborts the run | counted, file skipped | counted, snapshot skipped |
//! | `DataIntegrity` | aborts the run | counted, file skipped | counted, snapshot skipped |
//! | `InvariantViolation` | fatal | fatal | fatal |

use std::fmt::Display;

use thiserror::Error;

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, ArchiveError>;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Missing or invalid transport / API settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network or authentication failure talking to a remote system.
    #[error("transport error: {0}")]
    Transport(String),

    /// A payload could not be decoded into a snapshot.
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// A condition that can only arise from a defect upstream
    /// (empty origin id, malformed snapshot id).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The document kind must never produce a snapshot.
    #[error("invalid data kind: {0}")]
    InvalidDataKind(String),

    /// A snapshot id already exists with different content.
    #[error("duplicate key: snapshot '{0}' already exists with different content")]
    DuplicateKey(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Backend storage failure (SQLite, filesystem).
    #[error("storage error: {0}")]
    Storage(String),
}

impl ArchiveError {
    pub fn configuration(msg: impl Display) -> Self {
        Self::Configuration(msg.to_string())
    }

    pub fn transport(msg: impl Display) -> Self {
        Self::Transport(msg.to_string())
    }

    pub fn data_integrity(msg: impl Display) -> Self {
        Self::DataIntegrity(msg.to_string())
    }

    pub fn invariant(msg: impl Display) -> Self {
        Self::InvariantViolation(msg.to_string())
    }

    pub fn storage(msg: impl Display) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Whether an engine that tolerates per-item failures may skip past
    /// this error and continue with the next item.
    pub fn is_item_recoverable(&self) -> bool {
        matches!(
            self,
            ArchiveError::Transport(_)
                | ArchiveError::DataIntegrity(_)
                | ArchiveError::DuplicateKey(_)
                | ArchiveError::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(ArchiveError::transport("timeout").is_item_recoverable());
        assert!(ArchiveError::data_integrity("bad xml").is_item_recoverable());
        assert!(!ArchiveError::invariant("empty origin").is_item_recoverable());
        assert!(!ArchiveError::configuration("no host").is_item_recoverable());
        assert!(!ArchiveError::storage("disk full").is_item_recoverable());
    }

    #[test]
    fn display_carries_context() {
        let err = ArchiveError::DuplicateKey("A-1".into());
        assert!(err.to_string().contains("A-1"));
    }
}
