//! Error taxonomy for the Kopano LMTP delivery agent and search folder engine.
//!
//! The variants mirror the error kinds catalogued in the design's error
//! handling table: each one carries exactly the context a caller needs to
//! decide on an LMTP status line or a retry.

use thiserror::Error;

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Kopano LMTP/search subsystem.
#[derive(Debug, Error)]
pub enum Error {
    // ----------------------------------------------------------------
    // Resource resolution
    // ----------------------------------------------------------------
    #[error("recipient not found: {0}")]
    NotFound(String),

    #[error("recipient address is ambiguous: {0}")]
    Ambiguous(String),

    #[error("folder not found: {0}")]
    FolderNotFound(String),

    #[error("store not found for home server: {0}")]
    StoreNotFound(String),

    // ----------------------------------------------------------------
    // Validation
    // ----------------------------------------------------------------
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid restriction: {0}")]
    InvalidRestriction(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    // ----------------------------------------------------------------
    // Access control
    // ----------------------------------------------------------------
    #[error("forward destination rejected by whitelist: {0}")]
    Forbidden(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    // ----------------------------------------------------------------
    // Resource conflict / contention
    // ----------------------------------------------------------------
    #[error("database deadlock on {0}")]
    Deadlock(String),

    #[error("lock timeout on {0}")]
    LockTimeout(String),

    #[error("quota exceeded for {0}")]
    Quota(String),

    // ----------------------------------------------------------------
    // Delivery-specific
    // ----------------------------------------------------------------
    #[error("delivery time expired")]
    Expired,

    #[error("message conversion failed: {0}")]
    ParseFail(String),

    // ----------------------------------------------------------------
    // Infrastructure
    // ----------------------------------------------------------------
    #[error("database error: {0}")]
    Database(String),

    #[error("indexer network error: {0}")]
    NetworkError(String),

    #[error("indexer protocol error: {0}")]
    BadValue(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("xml error: {0}")]
    Xml(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("not enough memory")]
    NotEnoughMemory,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classifier string, analogous to the error kinds catalogued in the
    /// design's error handling table. Used for stats counters and logs,
    /// never parsed by callers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) | Self::FolderNotFound(_) | Self::StoreNotFound(_) => "NOT_FOUND",
            Self::Ambiguous(_) => "AMBIGUOUS",
            Self::InvalidArgument(_) | Self::InvalidRestriction(_) | Self::MissingField(_) => {
                "INVALID_ARGUMENT"
            }
            Self::Forbidden(_) => "FORBIDDEN",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::Deadlock(_) => "DEADLOCK",
            Self::LockTimeout(_) => "LOCK_TIMEOUT",
            Self::Quota(_) => "QUOTA",
            Self::Expired => "EXPIRED",
            Self::ParseFail(_) => "PARSE_FAIL",
            Self::Database(_) => "DATABASE_ERROR",
            Self::NetworkError(_) => "NETWORK_ERROR",
            Self::BadValue(_) => "BAD_VALUE",
            Self::Io(_) => "OS_ERROR",
            Self::Serialization(_) | Self::Xml(_) => "SERIALIZATION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::NotEnoughMemory => "NOT_ENOUGH_MEMORY",
            Self::Internal(_) => "FATAL",
        }
    }

    /// Whether a caller may reasonably retry the operation that produced
    /// this error (deadlocks, transient network faults).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Deadlock(_) | Self::LockTimeout(_) | Self::NetworkError(_) | Self::Timeout(_)
        )
    }

    /// Maps the error onto an LMTP enhanced-status-code response line for a
    /// single recipient, per the DATA-phase response table.
    #[must_use]
    pub fn lmtp_status(&self, rcpt: &str) -> String {
        match self {
            Self::Ambiguous(_) => "503 5.1.4 Destination mailbox address ambiguous".to_string(),
            Self::NotFound(_) => "503 5.1.1 User does not exist".to_string(),
            Self::Quota(_) => format!("552 5.2.2 {rcpt} Quota exceeded"),
            Self::Expired => format!("250 2.4.7 {rcpt} Delivery time expired"),
            Self::Database(_) | Self::LockTimeout(_) | Self::StoreNotFound(_) => {
                format!("450 4.2.0 {rcpt} Mailbox temporarily unavailable")
            }
            _ => "503 5.1.1 Internal error".to_string(),
        }
    }
}
