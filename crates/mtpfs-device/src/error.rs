use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device is not connected")]
    NotConnected,

    #[error("No such device: {0}")]
    NoSuchDevice(String),

    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Directory not empty: {path}")]
    NotEmpty { path: String },

    #[error("Name already exists: {path}")]
    AlreadyExists { path: String },

    #[error("Invalid argument: {msg}")]
    InvalidArgument { msg: String },

    #[error("Cross-directory move disabled: {from} -> {to}")]
    MoveDisabled { from: String, to: String },

    #[error("Cannot move across storages: {from} -> {to}")]
    CrossStorage { from: String, to: String },

    #[error("No space left: need {needed} bytes, {free} free")]
    NoSpace { needed: u64, free: u64 },

    #[error("Transfer failed during {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("Device operation {op} failed: {source}")]
    Failed {
        op: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("Local I/O error: {0}")]
    Local(#[from] std::io::Error),

    #[error("Worker queue is closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, DeviceError>;

impl DeviceError {
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            DeviceError::NotConnected => ENODEV,
            DeviceError::NoSuchDevice(_) => ENODEV,
            DeviceError::NotFound { .. } => ENOENT,
            DeviceError::NotEmpty { .. } => ENOTEMPTY,
            DeviceError::AlreadyExists { .. } => EEXIST,
            DeviceError::InvalidArgument { .. } => EINVAL,
            DeviceError::MoveDisabled { .. } => EPERM,
            DeviceError::CrossStorage { .. } => EXDEV,
            DeviceError::NoSpace { .. } => ENOSPC,
            DeviceError::Io { .. } => EIO,
            DeviceError::Failed { .. } => EINVAL,
            DeviceError::Local(e) => e.raw_os_error().unwrap_or(EIO),
            DeviceError::QueueClosed => EIO,
        }
    }

    pub(crate) fn not_found(path: &str) -> Self {
        DeviceError::NotFound {
            path: path.to_string(),
        }
    }

    /// Reclassifies a generic device failure as an I/O failure.
    pub(crate) fn into_io(self) -> Self {
        match self {
            DeviceError::Failed { op, source } => DeviceError::Io { op, source },
            other => other,
        }
    }
}
