//! In-memory emulated MTP device.
//!
//! Behaves like a single attached device with one or more storages. Every
//! session call is counted in [`CallStats`] so callers can check which round
//! trips an operation issued. Clones share the same device state, which lets
//! tests mutate the device "externally" while it is mounted.

use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::node::{ObjectId, StorageId, STORAGE_ROOT_ID};
use crate::transport::{
    Capabilities, DeviceEvent, DeviceInfo, MtpConnector, MtpSession, ObjectInfo, ObjectKind,
    RawDevice, StorageInfo, TransportError, TransportResult,
};

/// Round trips issued against the emulated device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStats {
    pub opens: u32,
    pub list_children: u32,
    pub list_handles: u32,
    pub object_info: u32,
    pub object_infos: u32,
    pub create_folder: u32,
    pub delete_object: u32,
    pub rename_object: u32,
    pub move_object: u32,
    pub get_partial: u32,
    pub send_partial: u32,
    pub get_object: u32,
    pub send_object: u32,
    pub get_thumbnail: u32,
    /// Longest timeout any `poll_event` call was issued with.
    pub longest_poll_wait: Duration,
}

impl CallStats {
    pub fn total(&self) -> u32 {
        self.opens
            + self.list_children
            + self.list_handles
            + self.object_info
            + self.object_infos
            + self.create_folder
            + self.delete_object
            + self.rename_object
            + self.move_object
            + self.get_partial
            + self.send_partial
            + self.get_object
            + self.send_object
            + self.get_thumbnail
    }
}

struct MemObject {
    info: ObjectInfo,
    data: Vec<u8>,
    thumbnail: Option<Vec<u8>>,
}

struct MemState {
    raw: RawDevice,
    info: DeviceInfo,
    caps: Capabilities,
    storages: Vec<StorageInfo>,
    objects: BTreeMap<ObjectId, MemObject>,
    next_id: ObjectId,
    events: VecDeque<DeviceEvent>,
    stats: CallStats,
    errors: Vec<String>,
    fail_sends: bool,
}

impl MemState {
    fn used(&self, storage: StorageId) -> u64 {
        self.objects
            .values()
            .filter(|o| o.info.storage_id == storage)
            .map(|o| o.data.len() as u64)
            .sum()
    }

    fn children(&self, storage: StorageId, parent: ObjectId) -> Vec<ObjectInfo> {
        self.objects
            .values()
            .filter(|o| o.info.storage_id == storage && o.info.parent_id == parent)
            .map(|o| o.info.clone())
            .collect()
    }

    fn insert(
        &mut self,
        storage: StorageId,
        parent: ObjectId,
        name: &str,
        kind: ObjectKind,
        data: Vec<u8>,
        modified: i64,
    ) -> ObjectInfo {
        let id = self.next_id;
        self.next_id += 1;
        let info = ObjectInfo {
            id,
            parent_id: parent,
            storage_id: storage,
            name: name.to_string(),
            kind,
            size: data.len() as u64,
            modified,
        };
        self.objects.insert(
            id,
            MemObject {
                info: info.clone(),
                data,
                thumbnail: None,
            },
        );
        info
    }

    fn fail<T>(&mut self, err: TransportError) -> TransportResult<T> {
        self.errors.push(err.to_string());
        Err(err)
    }

    fn object_mut(&mut self, id: ObjectId) -> TransportResult<&mut MemObject> {
        if !self.objects.contains_key(&id) {
            return self.fail(TransportError::ObjectNotFound(id));
        }
        self.objects
            .get_mut(&id)
            .ok_or(TransportError::ObjectNotFound(id))
    }
}

#[derive(Clone)]
pub struct MemoryDevice {
    state: Arc<Mutex<MemState>>,
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDevice {
    pub fn new() -> Self {
        let state = MemState {
            raw: RawDevice {
                bus: 1,
                devnum: 1,
                vendor: "Emulated".to_string(),
                product: "MTP Device".to_string(),
            },
            info: DeviceInfo {
                manufacturer: "Emulated".to_string(),
                model: "MTP Device".to_string(),
                version: "1.0".to_string(),
                serial: "0000".to_string(),
                friendly_name: "Emulated MTP Device".to_string(),
            },
            caps: Capabilities::all(),
            storages: Vec::new(),
            objects: BTreeMap::new(),
            next_id: 1,
            events: VecDeque::new(),
            stats: CallStats::default(),
            errors: Vec::new(),
            fail_sends: false,
        };
        MemoryDevice {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Adds a storage and returns its id.
    pub fn add_storage(&self, description: &str, capacity: u64) -> StorageId {
        let mut state = self.state.lock();
        let id = 0x0001_0001 + state.storages.len() as StorageId;
        state.storages.push(StorageInfo {
            id,
            description: description.to_string(),
            max_capacity: capacity,
            free_space: capacity,
        });
        id
    }

    pub fn with_storage(self, description: &str, capacity: u64) -> Self {
        self.add_storage(description, capacity);
        self
    }

    pub fn with_capabilities(self, caps: Capabilities) -> Self {
        self.state.lock().caps = caps;
        self
    }

    pub fn with_device_info(self, info: DeviceInfo) -> Self {
        self.state.lock().info = info;
        self
    }

    pub fn raw_device(&self) -> RawDevice {
        self.state.lock().raw.clone()
    }

    pub fn set_bus_location(&self, bus: u32, devnum: u32) {
        let mut state = self.state.lock();
        state.raw.bus = bus;
        state.raw.devnum = devnum;
    }

    /// Creates a folder out of band; `parent` of `None` means the storage top.
    pub fn add_folder(&self, storage: StorageId, parent: Option<ObjectId>, name: &str) -> ObjectId {
        let parent = parent.unwrap_or(STORAGE_ROOT_ID);
        self.state
            .lock()
            .insert(storage, parent, name, ObjectKind::Folder, Vec::new(), 1_600_000_000)
            .id
    }

    /// Creates a file out of band; `parent` of `None` means the storage top.
    pub fn add_file(
        &self,
        storage: StorageId,
        parent: Option<ObjectId>,
        name: &str,
        data: &[u8],
    ) -> ObjectId {
        let parent = parent.unwrap_or(STORAGE_ROOT_ID);
        self.state
            .lock()
            .insert(storage, parent, name, ObjectKind::File, data.to_vec(), 1_600_000_000)
            .id
    }

    pub fn remove_object(&self, id: ObjectId) {
        self.state.lock().objects.remove(&id);
    }

    pub fn rename_object(&self, id: ObjectId, name: &str) {
        if let Some(obj) = self.state.lock().objects.get_mut(&id) {
            obj.info.name = name.to_string();
        }
    }

    pub fn set_thumbnail(&self, id: ObjectId, data: &[u8]) {
        if let Some(obj) = self.state.lock().objects.get_mut(&id) {
            obj.thumbnail = Some(data.to_vec());
        }
    }

    pub fn push_event(&self, event: DeviceEvent) {
        self.state.lock().events.push_back(event);
    }

    /// Makes every subsequent whole-object upload fail.
    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().fail_sends = fail;
    }

    pub fn find(&self, storage: StorageId, parent: Option<ObjectId>, name: &str) -> Option<ObjectId> {
        let parent = parent.unwrap_or(STORAGE_ROOT_ID);
        self.state
            .lock()
            .objects
            .values()
            .find(|o| {
                o.info.storage_id == storage && o.info.parent_id == parent && o.info.name == name
            })
            .map(|o| o.info.id)
    }

    pub fn object(&self, id: ObjectId) -> Option<ObjectInfo> {
        self.state.lock().objects.get(&id).map(|o| o.info.clone())
    }

    pub fn data(&self, id: ObjectId) -> Option<Vec<u8>> {
        self.state.lock().objects.get(&id).map(|o| o.data.clone())
    }

    pub fn stats(&self) -> CallStats {
        self.state.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.state.lock().stats = CallStats::default();
    }
}

impl MtpConnector for MemoryDevice {
    fn detect(&self) -> TransportResult<Vec<RawDevice>> {
        Ok(vec![self.raw_device()])
    }

    fn open(&self, raw: &RawDevice) -> TransportResult<Box<dyn MtpSession>> {
        let mut state = self.state.lock();
        if state.raw.bus != raw.bus || state.raw.devnum != raw.devnum {
            return Err(TransportError::NoDevice);
        }
        state.stats.opens += 1;
        Ok(Box::new(MemorySession {
            state: self.state.clone(),
        }))
    }
}

pub struct MemorySession {
    state: Arc<Mutex<MemState>>,
}

impl MtpSession for MemorySession {
    fn storages(&mut self) -> TransportResult<Vec<StorageInfo>> {
        let state = self.state.lock();
        Ok(state
            .storages
            .iter()
            .map(|s| StorageInfo {
                free_space: s.max_capacity.saturating_sub(state.used(s.id)),
                ..s.clone()
            })
            .collect())
    }

    fn capabilities(&mut self) -> TransportResult<Capabilities> {
        Ok(self.state.lock().caps)
    }

    fn device_info(&mut self) -> TransportResult<DeviceInfo> {
        Ok(self.state.lock().info.clone())
    }

    fn list_children(
        &mut self,
        storage: StorageId,
        parent: ObjectId,
    ) -> TransportResult<Vec<ObjectInfo>> {
        let mut state = self.state.lock();
        state.stats.list_children += 1;
        Ok(state.children(storage, parent))
    }

    fn list_handles(
        &mut self,
        storage: StorageId,
        parent: ObjectId,
    ) -> TransportResult<Vec<ObjectId>> {
        let mut state = self.state.lock();
        state.stats.list_handles += 1;
        Ok(state.children(storage, parent).iter().map(|o| o.id).collect())
    }

    fn object_info(&mut self, id: ObjectId) -> TransportResult<Option<ObjectInfo>> {
        let mut state = self.state.lock();
        state.stats.object_info += 1;
        Ok(state.objects.get(&id).map(|o| o.info.clone()))
    }

    fn object_infos(&mut self, ids: &[ObjectId]) -> TransportResult<Vec<ObjectInfo>> {
        let mut state = self.state.lock();
        state.stats.object_infos += 1;
        Ok(ids
            .iter()
            .filter_map(|id| state.objects.get(id).map(|o| o.info.clone()))
            .collect())
    }

    fn create_folder(
        &mut self,
        storage: StorageId,
        parent: ObjectId,
        name: &str,
    ) -> TransportResult<ObjectId> {
        let mut state = self.state.lock();
        state.stats.create_folder += 1;
        if parent != STORAGE_ROOT_ID && !state.objects.contains_key(&parent) {
            return state.fail(TransportError::ObjectNotFound(parent));
        }
        let now = unix_now();
        Ok(state
            .insert(storage, parent, name, ObjectKind::Folder, Vec::new(), now)
            .id)
    }

    fn delete_object(&mut self, id: ObjectId) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.stats.delete_object += 1;
        if state.objects.remove(&id).is_none() {
            return state.fail(TransportError::ObjectNotFound(id));
        }
        let orphans: Vec<ObjectId> = state
            .objects
            .values()
            .filter(|o| o.info.parent_id == id)
            .map(|o| o.info.id)
            .collect();
        for orphan in orphans {
            state.objects.remove(&orphan);
        }
        Ok(())
    }

    fn rename_object(&mut self, id: ObjectId, name: &str) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.stats.rename_object += 1;
        state.object_mut(id)?.info.name = name.to_string();
        Ok(())
    }

    fn move_object(
        &mut self,
        id: ObjectId,
        storage: StorageId,
        new_parent: ObjectId,
    ) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.stats.move_object += 1;
        let obj = state.object_mut(id)?;
        obj.info.storage_id = storage;
        obj.info.parent_id = new_parent;
        Ok(())
    }

    fn get_partial(&mut self, id: ObjectId, offset: u64, size: u32) -> TransportResult<Vec<u8>> {
        let mut state = self.state.lock();
        state.stats.get_partial += 1;
        if !state.caps.get_partial_object {
            return state.fail(TransportError::Unsupported("GetPartialObject"));
        }
        let obj = state.object_mut(id)?;
        let start = (offset as usize).min(obj.data.len());
        let end = start.saturating_add(size as usize).min(obj.data.len());
        Ok(obj.data[start..end].to_vec())
    }

    fn send_partial(&mut self, id: ObjectId, offset: u64, data: &[u8]) -> TransportResult<u32> {
        let mut state = self.state.lock();
        state.stats.send_partial += 1;
        if !state.caps.send_partial_object {
            return state.fail(TransportError::Unsupported("SendPartialObject"));
        }
        let obj = state.object_mut(id)?;
        let start = offset as usize;
        let end = start + data.len();
        if obj.data.len() < end {
            obj.data.resize(end, 0);
        }
        obj.data[start..end].copy_from_slice(data);
        obj.info.size = obj.data.len() as u64;
        Ok(data.len() as u32)
    }

    fn get_object_to_file(&mut self, id: ObjectId, local: &Path) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.stats.get_object += 1;
        let data = state.object_mut(id)?.data.clone();
        std::fs::write(local, data).map_err(|e| TransportError::Usb(e.to_string()))
    }

    fn send_object_from_file(
        &mut self,
        local: &Path,
        storage: StorageId,
        parent: ObjectId,
        name: &str,
        modified: i64,
    ) -> TransportResult<ObjectInfo> {
        let mut state = self.state.lock();
        state.stats.send_object += 1;
        if state.fail_sends {
            return state.fail(TransportError::Usb("send aborted".to_string()));
        }
        let data = std::fs::read(local).map_err(|e| TransportError::Usb(e.to_string()))?;
        let capacity = state
            .storages
            .iter()
            .find(|s| s.id == storage)
            .map(|s| s.max_capacity)
            .unwrap_or(0);
        if state.used(storage) + data.len() as u64 > capacity {
            return state.fail(TransportError::General("storage full".to_string()));
        }
        Ok(state.insert(storage, parent, name, ObjectKind::File, data, modified))
    }

    fn get_thumbnail(&mut self, id: ObjectId) -> TransportResult<Vec<u8>> {
        let mut state = self.state.lock();
        state.stats.get_thumbnail += 1;
        let thumbnail = state.object_mut(id)?.thumbnail.clone();
        match thumbnail {
            Some(thumb) => Ok(thumb),
            None => state.fail(TransportError::General(format!("object {} has no thumbnail", id))),
        }
    }

    fn poll_event(&mut self, timeout: Duration) -> TransportResult<Option<DeviceEvent>> {
        {
            let mut state = self.state.lock();
            state.stats.longest_poll_wait = state.stats.longest_poll_wait.max(timeout);
            if let Some(event) = state.events.pop_front() {
                return Ok(Some(event));
            }
        }
        if !timeout.is_zero() {
            std::thread::sleep(timeout);
        }
        Ok(self.state.lock().events.pop_front())
    }

    fn take_error_stack(&mut self) -> Vec<String> {
        std::mem::take(&mut self.state.lock().errors)
    }
}

fn unix_now() -> i64 {
    crate::node::to_unix_secs(std::time::SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(dev: &MemoryDevice) -> Box<dyn MtpSession> {
        dev.open(&dev.raw_device()).unwrap()
    }

    #[test]
    fn test_storage_free_space_tracks_usage() {
        let dev = MemoryDevice::new();
        let sid = dev.add_storage("Internal", 100);
        dev.add_file(sid, None, "a", &[0u8; 40]);
        let storages = open(&dev).storages().unwrap();
        assert_eq!(storages[0].free_space, 60);
        assert_eq!(storages[0].max_capacity, 100);
    }

    #[test]
    fn test_list_children_counts_calls() {
        let dev = MemoryDevice::new().with_storage("Internal", 1 << 20);
        let mut session = open(&dev);
        session.list_children(0x0001_0001, STORAGE_ROOT_ID).unwrap();
        session.list_children(0x0001_0001, STORAGE_ROOT_ID).unwrap();
        assert_eq!(dev.stats().list_children, 2);
    }

    #[test]
    fn test_open_rejects_unknown_bus_location() {
        let dev = MemoryDevice::new();
        let raw = RawDevice {
            bus: 9,
            devnum: 9,
            vendor: String::new(),
            product: String::new(),
        };
        assert!(matches!(dev.open(&raw), Err(TransportError::NoDevice)));
    }

    #[test]
    fn test_send_partial_extends_object() {
        let dev = MemoryDevice::new();
        let sid = dev.add_storage("Internal", 1 << 20);
        let id = dev.add_file(sid, None, "f", b"abc");
        let mut session = open(&dev);
        assert_eq!(session.send_partial(id, 2, b"XYZ").unwrap(), 3);
        assert_eq!(dev.data(id).unwrap(), b"abXYZ".to_vec());
        assert_eq!(session.get_partial(id, 1, 10).unwrap(), b"bXYZ".to_vec());
    }

    #[test]
    fn test_failures_land_on_error_stack() {
        let dev = MemoryDevice::new().with_storage("Internal", 1 << 20);
        let mut session = open(&dev);
        assert!(session.delete_object(77).is_err());
        let stack = session.take_error_stack();
        assert_eq!(stack.len(), 1);
        assert!(session.take_error_stack().is_empty());
    }

    #[test]
    fn test_delete_folder_removes_children() {
        let dev = MemoryDevice::new();
        let sid = dev.add_storage("Internal", 1 << 20);
        let dir = dev.add_folder(sid, None, "d");
        let child = dev.add_file(sid, Some(dir), "c", b"1");
        open(&dev).delete_object(dir).unwrap();
        assert!(dev.object(child).is_none());
    }

    #[test]
    fn test_events_are_fifo() {
        let dev = MemoryDevice::new();
        dev.push_event(DeviceEvent::ObjectAdded(1));
        dev.push_event(DeviceEvent::ObjectRemoved(2));
        let mut session = open(&dev);
        let timeout = Duration::from_millis(1);
        assert_eq!(session.poll_event(timeout).unwrap(), Some(DeviceEvent::ObjectAdded(1)));
        assert_eq!(session.poll_event(timeout).unwrap(), Some(DeviceEvent::ObjectRemoved(2)));
        assert_eq!(session.poll_event(timeout).unwrap(), None);
        assert_eq!(dev.stats().longest_poll_wait, timeout);
    }

    #[test]
    fn test_zero_timeout_poll_returns_at_once() {
        let dev = MemoryDevice::new();
        let mut session = open(&dev);
        let start = std::time::Instant::now();
        assert_eq!(session.poll_event(Duration::ZERO).unwrap(), None);
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
