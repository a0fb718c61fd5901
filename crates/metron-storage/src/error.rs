use metron_common::MetricKind;

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use metron_common::MetricKind;
/// use metron_storage::error::StorageError;
///
/// let err = StorageError::KindMismatch {
///     id: "PollCount".to_string(),
///     stored: MetricKind::Counter,
///     requested: MetricKind::Gauge,
/// };
/// assert!(err.is_kind_mismatch());
/// assert!(err.is_rejected_write());
/// assert!(!err.is_backend_failure());
/// assert!(err.to_string().contains("PollCount"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The id already exists with the other kind. The store is unchanged.
    #[error("Storage: metric '{id}' is a {stored}, not a {requested}")]
    KindMismatch {
        id: String,
        stored: MetricKind,
        requested: MetricKind,
    },

    /// A gauge value is NaN or infinite. The store is unchanged.
    #[error("Storage: gauge '{id}' value is not finite")]
    NonFinite { id: String },

    /// A counter would leave the `i64` range. The store is unchanged.
    #[error("Storage: counter '{id}' would overflow")]
    Overflow { id: String },

    /// The backend cannot serve requests (closed, connection lost, worker gone).
    #[error("Storage: unavailable: {0}")]
    Unavailable(String),

    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot serialization or deserialization failure.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StorageError {
    pub fn is_kind_mismatch(&self) -> bool {
        matches!(self, StorageError::KindMismatch { .. })
    }

    /// True when the write itself was refused and nothing was changed.
    pub fn is_rejected_write(&self) -> bool {
        matches!(
            self,
            StorageError::KindMismatch { .. }
                | StorageError::NonFinite { .. }
                | StorageError::Overflow { .. }
        )
    }

    /// True for failures of the backend itself, as opposed to a rejected write.
    pub fn is_backend_failure(&self) -> bool {
        !self.is_rejected_write()
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
