use mtpfs_device::DeviceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FuseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Mount failed at {mountpoint}: {reason}")]
    MountFailed { mountpoint: String, reason: String },

    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("Read-only for user {user_id}, operation: {op}")]
    ReadOnly { user_id: i32, op: String },

    #[error("Unsupported file type {mode:o} for {path}")]
    UnsupportedType { path: String, mode: u32 },

    #[error("Bad file handle {fh} for {path}")]
    BadHandle { path: String, fh: u64 },

    #[error("No upload record for {path}")]
    NoRecord { path: String },

    #[error("Attribute value of {len} bytes exceeds buffer of {size}")]
    Range { len: usize, size: u32 },

    #[error("Invalid argument: {msg}")]
    InvalidArgument { msg: String },

    #[error("Account service error: {0}")]
    Account(String),
}

pub type Result<T> = std::result::Result<T, FuseError>;

impl FuseError {
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            FuseError::Io(e) => e.raw_os_error().unwrap_or(EIO),
            FuseError::Device(e) => e.to_errno(),
            FuseError::MountFailed { .. } => ENOENT,
            FuseError::InvalidPath { .. } => EINVAL,
            FuseError::ReadOnly { .. } => EROFS,
            FuseError::UnsupportedType { .. } => EINVAL,
            FuseError::BadHandle { .. } => EBADF,
            FuseError::NoRecord { .. } => ENODATA,
            FuseError::Range { .. } => ERANGE,
            FuseError::InvalidArgument { .. } => EINVAL,
            FuseError::Account(_) => EIO,
        }
    }

    pub(crate) fn invalid_path(path: &str) -> Self {
        FuseError::InvalidPath {
            path: path.to_string(),
        }
    }
}
