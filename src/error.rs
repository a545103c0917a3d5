use crate::store::Kind;

/// Failures raised by the slot store.
///
/// Everything except [`StoreError::Storage`] is a programming error: the
/// caller asked for something the slot definitions never allow. They are
/// raised at the call site and never retried.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `init` was called twice for the same key.
    #[error("slot \"{0}\" is already initialized")]
    DuplicateKey(String),
    /// The default value has no storable kind (`null`).
    #[error("slot \"{0}\": value kind \"null\" is not supported")]
    UnsupportedKind(String),
    /// A write supplied a value of a different kind than the slot holds.
    #[error("slot \"{key}\": expected value kind \"{expected}\" but got \"{got}\"")]
    TypeMismatch {
        key: String,
        expected: Kind,
        got: &'static str,
    },
    /// `attach`/`set`/... on a key that was never initialized.
    #[error("slot \"{0}\" is not initialized")]
    NotInitialized(String),
    /// `update` on a slot that does not hold an object.
    #[error("slot \"{key}\": update requires an object slot, found \"{kind}\"")]
    NotAnObject { key: String, kind: Kind },
    /// A pre-write transform rejected the candidate value.
    #[error("slot \"{key}\": before-set transform failed: {message}")]
    Transform { key: String, message: String },
    /// Listeners kept re-triggering writes past the dispatch depth limit.
    #[error("slot \"{key}\": re-entrant dispatch exceeded depth {depth}")]
    ReentrancyLimit { key: String, depth: usize },
    /// A typed value could not be converted to JSON.
    #[error("value could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failures of a durable storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("storage document is not valid: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failures while importing a saved overlay document.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The document is not valid JSON or does not have the expected shape.
    #[error("malformed overlay document: {0}")]
    Parse(#[from] serde_json::Error),
    /// The file name does not carry a known document extension.
    #[error("unrecognized overlay document \"{0}\" (expected .dvco or .dvog)")]
    UnknownFormat(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
