use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Insufficient resources")]
    InsufficientResources,

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Access denied: {what}")]
    AccessDenied { what: String },

    #[error("Device not ready: {reason}")]
    DeviceNotReady { reason: String },

    #[error("Invalid path: {path}")]
    PathInvalid { path: String },

    #[error("Invalid parameter: {msg}")]
    InvalidParameter { msg: String },

    #[error("Too many symbolic links (limit {limit})")]
    TooManyLinks { limit: usize },

    #[error("Reparse required to {target}")]
    Reparse { target: String },
}

pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    pub fn not_found(what: impl Into<String>) -> Self {
        CacheError::NotFound { what: what.into() }
    }

    pub fn device_not_ready(reason: impl Into<String>) -> Self {
        CacheError::DeviceNotReady {
            reason: reason.into(),
        }
    }

    pub fn path_invalid(path: impl Into<String>) -> Self {
        CacheError::PathInvalid { path: path.into() }
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        CacheError::InvalidParameter { msg: msg.into() }
    }

    /// True for the one failure a resolution may recover from by searching elsewhere.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }

    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            CacheError::Io(e) => e.raw_os_error().unwrap_or(EIO),
            CacheError::InsufficientResources => ENOMEM,
            CacheError::NotFound { .. } => ENOENT,
            CacheError::AccessDenied { .. } => EACCES,
            CacheError::DeviceNotReady { .. } => ENODEV,
            CacheError::PathInvalid { .. } => EINVAL,
            CacheError::InvalidParameter { .. } => EINVAL,
            CacheError::TooManyLinks { .. } => ELOOP,
            CacheError::Reparse { .. } => EREMOTE,
        }
    }
}
