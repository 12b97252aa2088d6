//! Error types for SynaGraph operations.
//!
//! This module provides:
//! - [`SynaError`] - The main error enum
//! - [`Result<T>`] - A type alias for `std::result::Result<T, SynaError>`
//!
//! Only conditions that indicate corrupted or unusable data are errors.
//! Degraded graph quality (dangling edges, orphaned nodes, asymmetric edges)
//! is logged and repaired instead of being surfaced here.

/// Result type alias for SynaGraph operations.
///
/// This is equivalent to `std::result::Result<T, SynaError>`.
pub type Result<T> = std::result::Result<T, SynaError>;

/// Error types for index and store operations.
///
/// # Examples
///
/// ```rust
/// use synagraph::{IndexConfig, SynaError};
///
/// match IndexConfig::from_json(r#"{ "M": 1 }"#) {
///     Err(SynaError::InvalidConfig(msg)) => assert!(msg.contains("M")),
///     _ => panic!("M < 2 must be rejected"),
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum SynaError {
    /// I/O error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored node or entry-point id is not a valid `u64`.
    ///
    /// This indicates a corrupted mapping and is never tolerated.
    #[error("Invalid node id: {0}")]
    InvalidNodeId(String),

    /// A node record exists but cannot be decoded.
    #[error("Corrupted node {id}: {reason}")]
    CorruptedNode {
        /// Internal id of the node
        id: u64,
        /// What went wrong while decoding
        reason: String,
    },

    /// Another writer installed the entry point of a graph this operation
    /// found empty. The operation was not written and may be retried.
    #[error("Entry point already set to node {0}")]
    EntryPointConflict(u64),

    /// Index configuration is out of range.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Empty key is not allowed.
    #[error("Empty key is not allowed")]
    EmptyKey,

    /// Key exceeds maximum length (65535 bytes).
    #[error("Key too long: {0} bytes (max 65535)")]
    KeyTooLong(usize),

    /// Value exceeds the maximum length of a log record.
    #[error("Value too large: {0} bytes")]
    ValueTooLarge(usize),

    /// Corrupted log entry detected at the given file offset.
    #[error("Corrupted entry at offset {0}")]
    CorruptedEntry(u64),
}
