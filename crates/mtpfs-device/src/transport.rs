//! Seam between the device layer and an MTP/USB library.
//!
//! `MtpConnector` enumerates and opens raw devices; `MtpSession` is one open
//! connection. Sessions are not reentrant: `MtpDevice` serializes every call
//! behind its transport lock.

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::node::{ObjectId, StorageId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("No device attached")]
    NoDevice,

    #[error("Connection failed: {0}")]
    Connecting(String),

    #[error("USB error: {0}")]
    Usb(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("Device error: {0}")]
    General(String),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// A device as seen on the bus before it is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDevice {
    pub bus: u32,
    pub devnum: u32,
    pub vendor: String,
    pub product: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    pub id: StorageId,
    pub description: String,
    pub max_capacity: u64,
    pub free_space: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub get_partial_object: bool,
    pub send_partial_object: bool,
    pub edit_objects: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Capabilities {
            get_partial_object: true,
            send_partial_object: true,
            edit_objects: true,
        }
    }

    /// Partial I/O needs both directions, otherwise staged copies would diverge.
    pub fn partial_io(&self) -> bool {
        self.get_partial_object && self.send_partial_object
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub model: String,
    pub version: String,
    pub serial: String,
    pub friendly_name: String,
}

impl DeviceInfo {
    pub fn is_open_harmony(&self) -> bool {
        const MARKER: &str = "openharmony";
        self.manufacturer.to_ascii_lowercase().contains(MARKER)
            || self.version.to_ascii_lowercase().contains(MARKER)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Folder,
    File,
}

/// Remote object metadata as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub id: ObjectId,
    pub parent_id: ObjectId,
    pub storage_id: StorageId,
    pub name: String,
    pub kind: ObjectKind,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub modified: i64,
}

impl ObjectInfo {
    pub fn is_folder(&self) -> bool {
        self.kind == ObjectKind::Folder
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    ObjectAdded(ObjectId),
    ObjectRemoved(ObjectId),
    StoreAdded(StorageId),
    StoreRemoved(StorageId),
    DevicePropChanged,
}

pub trait MtpConnector: Send + Sync {
    fn detect(&self) -> TransportResult<Vec<RawDevice>>;
    fn open(&self, raw: &RawDevice) -> TransportResult<Box<dyn MtpSession>>;
}

pub trait MtpSession: Send {
    fn storages(&mut self) -> TransportResult<Vec<StorageInfo>>;
    fn capabilities(&mut self) -> TransportResult<Capabilities>;
    fn device_info(&mut self) -> TransportResult<DeviceInfo>;

    /// Full listing of a folder, one round trip.
    fn list_children(
        &mut self,
        storage: StorageId,
        parent: ObjectId,
    ) -> TransportResult<Vec<ObjectInfo>>;
    /// Child handles only, no metadata.
    fn list_handles(&mut self, storage: StorageId, parent: ObjectId)
        -> TransportResult<Vec<ObjectId>>;
    /// `Ok(None)` when the handle no longer resolves.
    fn object_info(&mut self, id: ObjectId) -> TransportResult<Option<ObjectInfo>>;
    /// Bulk metadata fetch for a page of handles.
    fn object_infos(&mut self, ids: &[ObjectId]) -> TransportResult<Vec<ObjectInfo>>;

    fn create_folder(
        &mut self,
        storage: StorageId,
        parent: ObjectId,
        name: &str,
    ) -> TransportResult<ObjectId>;
    fn delete_object(&mut self, id: ObjectId) -> TransportResult<()>;
    fn rename_object(&mut self, id: ObjectId, name: &str) -> TransportResult<()>;
    fn move_object(
        &mut self,
        id: ObjectId,
        storage: StorageId,
        new_parent: ObjectId,
    ) -> TransportResult<()>;

    fn get_partial(&mut self, id: ObjectId, offset: u64, size: u32) -> TransportResult<Vec<u8>>;
    fn send_partial(&mut self, id: ObjectId, offset: u64, data: &[u8]) -> TransportResult<u32>;
    fn get_object_to_file(&mut self, id: ObjectId, local: &Path) -> TransportResult<()>;
    fn send_object_from_file(
        &mut self,
        local: &Path,
        storage: StorageId,
        parent: ObjectId,
        name: &str,
        modified: i64,
    ) -> TransportResult<ObjectInfo>;
    fn get_thumbnail(&mut self, id: ObjectId) -> TransportResult<Vec<u8>>;

    /// Waits up to `timeout` for the next device event. Called with the
    /// session lock held; a zero timeout must return at once.
    fn poll_event(&mut self, timeout: Duration) -> TransportResult<Option<DeviceEvent>>;
    /// Drains the library's internal error stack.
    fn take_error_stack(&mut self) -> Vec<String>;
}

/// Parses `bus` and `devnum` from a `/dev/bus/usb/BBB/DDD` style path.
pub fn parse_usb_dev_path(path: &Path) -> Option<(u32, u32)> {
    let mut comps = path.iter().rev();
    let dev = comps.next()?.to_str()?.parse().ok()?;
    let bus = comps.next()?.to_str()?.parse().ok()?;
    Some((bus, dev))
}
