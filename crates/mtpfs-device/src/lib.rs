//! mtpfs device layer.
//!
//! Owns the connection to one MTP device, mirrors its object tree in memory
//! and reconciles that mirror with device events.

pub mod device;
pub mod error;
pub mod events;
pub mod memory;
pub mod node;
pub mod transport;
pub mod upload;
pub mod worker;

pub use device::{split_path, DeviceConfig, MtpDevice, NodeRef, PushOutcome};
pub use error::{DeviceError, Result};
pub use memory::{CallStats, MemoryDevice};
pub use node::{DirNode, FileNode, NodeMeta, ObjectId, StorageId};
pub use transport::{
    Capabilities, DeviceEvent, DeviceInfo, MtpConnector, MtpSession, ObjectInfo, RawDevice,
    StorageInfo, TransportError,
};
pub use upload::{UploadRecords, UploadState};
