//! mtpfs FUSE subsystem: exposes one MTP device as a mounted filesystem.

pub mod cli;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod filesystem;
pub mod inode;
pub mod mount;
pub mod name_hash;
pub mod path;
pub mod policy;
pub mod staging;

pub use dispatcher::{FilesystemOps, MtpFileSystem};
pub use error::{FuseError, Result};
