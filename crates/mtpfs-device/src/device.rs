//! Device transport.
//!
//! `MtpDevice` owns the single device connection and the tree cache. Every
//! call into the session goes through one transport lock; the tree cache is
//! only touched after that lock is released, so per-directory locks are never
//! nested under it. Failed calls dump the device error stack, leave the cache
//! as it was, and surface as a [`DeviceError`] carrying a POSIX code.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::error::{DeviceError, Result};
use crate::events::{EventReader, TransferGate};
use crate::node::{
    to_unix_secs, DirNode, FileNode, NodeMeta, ObjectId, StorageId, UNASSIGNED_ID,
};
use crate::transport::{
    parse_usb_dev_path, Capabilities, DeviceEvent, DeviceInfo, MtpConnector, MtpSession,
    RawDevice, StorageInfo, TransportResult,
};
use crate::upload::{UploadRecords, UploadState};
use crate::worker::WorkerPool;

pub const DEFAULT_ASYNC_PUSH_THRESHOLD: u64 = 200 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Pushes larger than this many bytes run on the worker pool.
    pub async_push_threshold: u64,
    pub worker_threads: usize,
    pub queue_capacity: usize,
    /// Handles per bulk metadata request in the paged directory fetch.
    pub page_size: usize,
    pub event_poll_interval_ms: u64,
    /// Remove events for handles at or below this value are ignored.
    pub event_handle_threshold: u32,
    pub enable_move: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            async_push_threshold: DEFAULT_ASYNC_PUSH_THRESHOLD,
            worker_threads: 2,
            queue_capacity: 16,
            page_size: 64,
            event_poll_interval_ms: 250,
            event_handle_threshold: 0,
            enable_move: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Completed,
    /// Handed to the worker pool, which now owns the local file.
    Queued,
}

#[derive(Debug, Clone)]
pub enum NodeRef {
    Directory(Arc<DirNode>),
    File(FileNode),
}

/// Splits `/a/b/c` into `("/a/b", "c")`.
pub fn split_path(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/".to_string(), trimmed[1..].to_string()),
        Some(i) => (trimmed[..i].to_string(), trimmed[i + 1..].to_string()),
        None => ("/".to_string(), trimmed.to_string()),
    }
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

pub struct MtpDevice {
    config: DeviceConfig,
    connector: Arc<dyn MtpConnector>,
    session: Mutex<Option<Box<dyn MtpSession>>>,
    storages: RwLock<Vec<StorageInfo>>,
    capabilities: RwLock<Capabilities>,
    info: RwLock<DeviceInfo>,
    root: Arc<DirNode>,
    root_init: Mutex<()>,
    move_enabled: AtomicBool,
    ptp_mode: AtomicBool,
    gate: TransferGate,
    uploads: UploadRecords,
    workers: WorkerPool,
    events: Mutex<Option<EventReader>>,
    this: Weak<MtpDevice>,
}

impl MtpDevice {
    pub fn new(connector: Arc<dyn MtpConnector>, config: DeviceConfig) -> Result<Arc<Self>> {
        let workers = WorkerPool::new(config.worker_threads, config.queue_capacity)?;
        let move_enabled = config.enable_move;
        Ok(Arc::new_cyclic(|this| MtpDevice {
            config,
            connector,
            session: Mutex::new(None),
            storages: RwLock::new(Vec::new()),
            capabilities: RwLock::new(Capabilities::default()),
            info: RwLock::new(DeviceInfo::default()),
            root: DirNode::root(),
            root_init: Mutex::new(()),
            move_enabled: AtomicBool::new(move_enabled),
            ptp_mode: AtomicBool::new(false),
            gate: TransferGate::new(),
            uploads: UploadRecords::new(),
            workers,
            events: Mutex::new(None),
            this: this.clone(),
        }))
    }

    pub fn connect(&self, raw: &RawDevice) -> Result<()> {
        {
            let mut session = self.session.lock();
            if session.is_some() {
                info!("already connected");
                return Ok(());
            }

            let mut opened = self.connector.open(raw).map_err(|e| {
                DeviceError::NoSuchDevice(format!("{:03}/{:03}: {}", raw.bus, raw.devnum, e))
            })?;
            let storages = opened
                .storages()
                .map_err(|source| DeviceError::Failed {
                    op: "storages",
                    source,
                })?;
            let caps = opened.capabilities().unwrap_or_else(|e| {
                warn!("capability query failed, assuming none: {}", e);
                Capabilities::default()
            });
            let info = opened.device_info().unwrap_or_else(|e| {
                warn!("device info query failed: {}", e);
                DeviceInfo::default()
            });

            info!(
                "connected to {} {} ({} storages, partial get={} send={} edit={})",
                info.manufacturer,
                info.model,
                storages.len(),
                caps.get_partial_object,
                caps.send_partial_object,
                caps.edit_objects
            );
            for storage in &storages {
                debug!(
                    "storage {:#x} {} capacity={} free={}",
                    storage.id, storage.description, storage.max_capacity, storage.free_space
                );
            }

            self.root.clear();
            *self.storages.write() = storages;
            *self.capabilities.write() = caps;
            *self.info.write() = info;
            *session = Some(opened);
        }
        self.start_event_reader();
        Ok(())
    }

    /// Connects to the `index`-th detected device, counting from zero.
    pub fn connect_by_index(&self, index: usize) -> Result<()> {
        let devices = self.detect()?;
        let raw = devices.get(index).ok_or_else(|| {
            DeviceError::NoSuchDevice(format!("index {} ({} detected)", index, devices.len()))
        })?;
        self.connect(raw)
    }

    pub fn connect_by_device_file(&self, path: &Path) -> Result<()> {
        let (bus, devnum) = parse_usb_dev_path(path)
            .ok_or_else(|| DeviceError::NoSuchDevice(path.display().to_string()))?;
        let devices = self.detect()?;
        let raw = devices
            .iter()
            .find(|d| d.bus == bus && d.devnum == devnum)
            .ok_or_else(|| DeviceError::NoSuchDevice(path.display().to_string()))?;
        self.connect(raw)
    }

    pub fn detect(&self) -> Result<Vec<RawDevice>> {
        self.connector
            .detect()
            .map_err(|source| DeviceError::Failed {
                op: "detect",
                source,
            })
    }

    pub fn disconnect(&self) {
        let reader = self.events.lock().take();
        if let Some(reader) = reader {
            reader.stop();
        }
        if self.session.lock().take().is_some() {
            info!("disconnected");
        }
        self.root.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.session.lock().is_some()
    }

    fn start_event_reader(&self) {
        let mut events = self.events.lock();
        if events.is_some() {
            return;
        }
        let interval = Duration::from_millis(self.config.event_poll_interval_ms.max(1));
        match EventReader::spawn(self.this.clone(), interval) {
            Ok(reader) => *events = Some(reader),
            Err(e) => warn!("failed to start event reader: {}", e),
        }
    }

    fn call<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Box<dyn MtpSession>) -> TransportResult<T>,
    {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(DeviceError::NotConnected)?;
        let result = f(&mut *session);
        result.map_err(|source| {
            for line in session.take_error_stack() {
                warn!("{}: device error stack: {}", op, line);
            }
            warn!("{} failed: {}", op, source);
            DeviceError::Failed { op, source }
        })
    }

    /// Like `call`, but holds the event reader off for the duration.
    fn transfer<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Box<dyn MtpSession>) -> TransportResult<T>,
    {
        let _busy = self.gate.begin();
        self.call(op, f)
    }

    pub fn capabilities(&self) -> Capabilities {
        *self.capabilities.read()
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.info.read().clone()
    }

    pub fn friendly_name(&self) -> String {
        self.info.read().friendly_name.clone()
    }

    pub fn is_open_harmony_device(&self) -> bool {
        self.info.read().is_open_harmony()
    }

    pub fn move_enabled(&self) -> bool {
        self.move_enabled.load(Ordering::Acquire)
    }

    pub fn set_move_enabled(&self, enabled: bool) {
        self.move_enabled.store(enabled, Ordering::Release);
    }

    pub fn ptp_mode(&self) -> bool {
        self.ptp_mode.load(Ordering::Acquire)
    }

    pub fn set_ptp_mode(&self, enabled: bool) {
        info!("ptp mode {}", if enabled { "on" } else { "off" });
        self.ptp_mode.store(enabled, Ordering::Release);
    }

    pub fn uploads(&self) -> &UploadRecords {
        &self.uploads
    }

    pub fn gate(&self) -> &TransferGate {
        &self.gate
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    pub fn transfer_in_flight(&self) -> bool {
        self.gate.in_flight() > 0 || self.workers.stats().pending() > 0
    }

    fn ensure_root(&self) {
        if self.root.is_fetched() {
            return;
        }
        let _init = self.root_init.lock();
        if self.root.is_fetched() {
            return;
        }
        for storage in self.storages.read().iter() {
            self.root.add_dir(DirNode::storage(storage));
        }
        self.root.set_fetched(true);
    }

    /// With exactly one storage, visible paths live under that storage.
    fn storage_path(&self, path: &str) -> String {
        match self.root.dirs().as_slice() {
            [only] => format!("/{}{}", only.name(), path),
            _ => path.to_string(),
        }
    }

    fn walk(&self, path: &str) -> Result<Arc<DirNode>> {
        self.ensure_root();
        let full = self.storage_path(path);
        let mut dir = self.root.clone();
        for name in components(&full) {
            dir = match dir.find_dir(name) {
                Some(child) => child,
                None if !dir.is_fetched() => {
                    self.fetch_listing(&dir)?;
                    dir.find_dir(name)
                        .ok_or_else(|| DeviceError::not_found(path))?
                }
                None => return Err(DeviceError::not_found(path)),
            };
        }
        Ok(dir)
    }

    /// Resolves `path` from cached state only.
    pub fn cached_dir(&self, path: &str) -> Option<Arc<DirNode>> {
        if !self.root.is_fetched() {
            return None;
        }
        let full = self.storage_path(path);
        let mut dir = self.root.clone();
        for name in components(&full) {
            dir = dir.find_dir(name)?;
        }
        Some(dir)
    }

    fn fetch_listing(&self, dir: &DirNode) -> Result<()> {
        if dir.id() == UNASSIGNED_ID {
            return Ok(());
        }
        let (storage, id) = (dir.storage_id(), dir.id());
        let objects = self.call("list_children", |s| s.list_children(storage, id))?;
        debug!("listed {} entries in {}", objects.len(), dir.name());
        dir.populate(&objects);
        Ok(())
    }

    /// Full-listing fetch: every unfetched directory on the way is listed once.
    pub fn fetch_directory(&self, path: &str) -> Result<Arc<DirNode>> {
        let dir = self.walk(path)?;
        if !dir.is_fetched() {
            self.fetch_listing(&dir)?;
        }
        Ok(dir)
    }

    /// Paged fetch: syncs the directory against a fresh handle list and only
    /// fetches metadata for handles that were not cached before.
    pub fn open_directory(&self, path: &str) -> Result<Arc<DirNode>> {
        let dir = self.walk(path)?;
        if dir.id() == UNASSIGNED_ID {
            return Ok(dir);
        }
        let (storage, id) = (dir.storage_id(), dir.id());
        let handles = self.call("list_handles", |s| s.list_handles(storage, id))?;

        if !dir.is_fetched() {
            let mut objects = Vec::with_capacity(handles.len());
            for page in handles.chunks(self.config.page_size.max(1)) {
                objects.extend(self.call("object_infos", |s| s.object_infos(page))?);
            }
            debug!("paged fetch of {}: {} entries", path, objects.len());
            dir.populate(&objects);
            return Ok(dir);
        }

        let cached: HashSet<ObjectId> = dir.cached_handles().into_iter().collect();
        let fresh: HashSet<ObjectId> = handles.iter().copied().collect();
        let removed: Vec<ObjectId> = cached.difference(&fresh).copied().collect();
        let mut added = Vec::new();
        for handle in handles.iter().filter(|h| !cached.contains(h)) {
            let handle = *handle;
            if let Some(info) = self.call("object_info", |s| s.object_info(handle))? {
                added.push(info);
            }
        }
        if !added.is_empty() || !removed.is_empty() {
            debug!(
                "paged sync of {}: +{} -{}",
                path,
                added.len(),
                removed.len()
            );
        }
        dir.apply_diff(&added, &removed, handles);
        Ok(dir)
    }

    /// Returns the listing of `path`, syncing it first when it was never fetched.
    pub fn read_directory(&self, path: &str) -> Result<(Vec<Arc<DirNode>>, Vec<FileNode>)> {
        let dir = self.walk(path)?;
        let dir = if dir.is_fetched() {
            dir
        } else {
            self.open_directory(path)?
        };
        Ok((dir.dirs(), dir.files()))
    }

    pub fn lookup(&self, path: &str) -> Result<NodeRef> {
        let (parent_path, name) = split_path(path);
        if name.is_empty() {
            return self.fetch_directory("/").map(NodeRef::Directory);
        }
        let parent = self.fetch_directory(&parent_path)?;
        if let Some(dir) = parent.find_dir(&name) {
            return Ok(NodeRef::Directory(dir));
        }
        parent
            .find_file(&name)
            .map(NodeRef::File)
            .ok_or_else(|| DeviceError::not_found(path))
    }

    pub fn lookup_file(&self, path: &str) -> Result<(Arc<DirNode>, FileNode)> {
        let (parent_path, name) = split_path(path);
        let parent = self.fetch_directory(&parent_path)?;
        let file = parent
            .find_file(&name)
            .ok_or_else(|| DeviceError::not_found(path))?;
        Ok((parent, file))
    }

    pub fn is_dir_fetched(&self, path: &str) -> bool {
        self.cached_dir(path).map(|d| d.is_fetched()).unwrap_or(false)
    }

    /// Drops the cached listing of `path` so the next access reloads it.
    pub fn refresh(&self, path: &str) {
        if let Some(dir) = self.cached_dir(path) {
            if dir.id() != UNASSIGNED_ID {
                dir.clear();
            }
        }
    }

    pub fn root_modification_date(&self) -> SystemTime {
        self.ensure_root();
        match self.root.dirs().as_slice() {
            [only] => only.modification_date(),
            _ => self.root.modification_date(),
        }
    }

    pub fn create_directory(&self, path: &str) -> Result<()> {
        let (parent_path, name) = split_path(path);
        let parent = self.fetch_directory(&parent_path)?;
        if parent.id() == UNASSIGNED_ID {
            return Err(DeviceError::InvalidArgument {
                msg: format!("cannot create {} outside a storage", path),
            });
        }
        if parent.contains(&name) {
            return Err(DeviceError::AlreadyExists {
                path: path.to_string(),
            });
        }
        let (storage, parent_id) = (parent.storage_id(), parent.id());
        let id = self.call("create_folder", |s| s.create_folder(storage, parent_id, &name))?;
        let dir = DirNode::new(
            NodeMeta::new(id, parent_id, storage, &name),
            SystemTime::now(),
        );
        dir.populate(&[]);
        parent.add_dir(dir);
        Ok(())
    }

    pub fn remove_directory(&self, path: &str) -> Result<()> {
        self.remove_dir_checked(path, true)
    }

    /// Removes a directory without checking that it is empty.
    pub fn remove_directory_directly(&self, path: &str) -> Result<()> {
        self.remove_dir_checked(path, false)
    }

    fn remove_dir_checked(&self, path: &str, check_empty: bool) -> Result<()> {
        let (parent_path, name) = split_path(path);
        let parent = self.fetch_directory(&parent_path)?;
        if parent.id() == UNASSIGNED_ID {
            return Err(DeviceError::InvalidArgument {
                msg: format!("cannot remove storage {}", path),
            });
        }
        let dir = parent
            .find_dir(&name)
            .ok_or_else(|| DeviceError::not_found(path))?;
        if check_empty {
            if !dir.is_fetched() {
                self.fetch_listing(&dir)?;
            }
            if !dir.is_empty() {
                return Err(DeviceError::NotEmpty {
                    path: path.to_string(),
                });
            }
        }
        let id = dir.id();
        self.call("delete_object", |s| s.delete_object(id))?;
        parent.remove_dir(&name);
        Ok(())
    }

    /// Same-directory renames dispatch on node type; anything else is a move.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (from_dir, _) = split_path(from);
        let (to_dir, _) = split_path(to);
        if from_dir != to_dir {
            return self.move_node(from, to);
        }
        match self.lookup(from)? {
            NodeRef::Directory(_) => self.rename_directory(from, to),
            NodeRef::File(_) => self.rename_file(from, to),
        }
    }

    pub fn rename_directory(&self, from: &str, to: &str) -> Result<()> {
        let (from_dir, old) = split_path(from);
        let (to_dir, new) = split_path(to);
        if from_dir != to_dir {
            return self.move_node(from, to);
        }
        let parent = self.fetch_directory(&from_dir)?;
        let dir = parent
            .find_dir(&old)
            .ok_or_else(|| DeviceError::not_found(from))?;
        if old == new {
            return Ok(());
        }
        if parent.contains(&new) {
            return Err(DeviceError::AlreadyExists {
                path: to.to_string(),
            });
        }
        let id = dir.id();
        self.call("rename_object", |s| s.rename_object(id, &new))?;
        parent.rename_child(&old, &new);
        Ok(())
    }

    pub fn rename_file(&self, from: &str, to: &str) -> Result<()> {
        let (from_dir, old) = split_path(from);
        let (to_dir, new) = split_path(to);
        if from_dir != to_dir {
            return self.move_node(from, to);
        }
        let parent = self.fetch_directory(&from_dir)?;
        let file = parent
            .find_file(&old)
            .ok_or_else(|| DeviceError::not_found(from))?;
        if old == new {
            return Ok(());
        }
        if parent.find_dir(&new).is_some() {
            return Err(DeviceError::AlreadyExists {
                path: to.to_string(),
            });
        }
        if let Some(target) = parent.find_file(&new) {
            let target_id = target.id();
            self.call("delete_object", |s| s.delete_object(target_id))?;
            parent.remove_file(&new);
        }
        let id = file.id();
        self.call("rename_object", |s| s.rename_object(id, &new))?;
        parent.rename_child(&old, &new);
        Ok(())
    }

    /// Cross-directory move by rewriting the object's parent property.
    pub fn move_node(&self, from: &str, to: &str) -> Result<()> {
        if !self.move_enabled() {
            return Err(DeviceError::MoveDisabled {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let (from_dir, old) = split_path(from);
        let (to_dir, new) = split_path(to);
        let src = self.fetch_directory(&from_dir)?;
        let dst = self.fetch_directory(&to_dir)?;
        if dst.id() == UNASSIGNED_ID {
            return Err(DeviceError::InvalidArgument {
                msg: format!("cannot move {} outside a storage", to),
            });
        }

        let moved_dir = src.find_dir(&old);
        let moved_file = if moved_dir.is_none() {
            src.find_file(&old)
        } else {
            None
        };
        let (id, storage): (ObjectId, StorageId) = match (&moved_dir, &moved_file) {
            (Some(dir), _) => (dir.id(), dir.storage_id()),
            (None, Some(file)) => (file.id(), file.meta.storage_id),
            (None, None) => return Err(DeviceError::not_found(from)),
        };
        if storage != dst.storage_id() {
            return Err(DeviceError::CrossStorage {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        if dst.find_dir(&new).is_some() || (moved_dir.is_some() && dst.contains(&new)) {
            return Err(DeviceError::AlreadyExists {
                path: to.to_string(),
            });
        }
        if let Some(target) = dst.find_file(&new) {
            let target_id = target.id();
            self.call("delete_object", |s| s.delete_object(target_id))?;
            dst.remove_file(&new);
        }

        let dst_id = dst.id();
        self.call("move_object", |s| s.move_object(id, storage, dst_id))?;
        let renamed = if old != new {
            self.call("rename_object", |s| s.rename_object(id, &new))
        } else {
            Ok(())
        };
        if moved_dir.is_some() {
            src.remove_dir(&old);
        } else {
            src.remove_file(&old);
        }
        if let Err(e) = renamed {
            warn!("{} moved but not renamed to {}: {}", from, new, e);
            dst.clear();
            return Err(e);
        }
        if let Some(dir) = moved_dir {
            dir.relocate(dst_id, storage, &new);
            dst.add_dir(dir);
        } else if let Some(mut file) = moved_file {
            file.meta.parent_id = dst_id;
            file.meta.name = new;
            dst.add_file(file);
        }
        Ok(())
    }

    pub fn remove_file(&self, path: &str) -> Result<()> {
        let (parent, file) = self.lookup_file(path)?;
        let id = file.id();
        self.call("delete_object", |s| s.delete_object(id))?;
        parent.remove_file(file.name());
        self.refresh_storages();
        Ok(())
    }

    /// Updates the cached modification time; the device is not told.
    pub fn set_file_modified(&self, path: &str, modified: SystemTime) -> Result<()> {
        let (parent, file) = self.lookup_file(path)?;
        parent.update_file(file.name(), |f| f.modified = modified);
        Ok(())
    }

    pub fn check_free_space(&self, end: u64) -> Result<()> {
        let free = self.storage_free_size();
        if end > free {
            return Err(DeviceError::NoSpace { needed: end, free });
        }
        Ok(())
    }

    pub fn read_partial(&self, path: &str, size: u32, offset: u64) -> Result<Vec<u8>> {
        let (_, file) = self.lookup_file(path)?;
        if offset >= file.size {
            return Ok(Vec::new());
        }
        let len = (file.size - offset).min(size as u64) as u32;
        let id = file.id();
        self.transfer("get_partial", |s| s.get_partial(id, offset, len))
            .map_err(DeviceError::into_io)
    }

    pub fn write_partial(&self, path: &str, data: &[u8], offset: u64) -> Result<u32> {
        let end = offset + data.len() as u64;
        self.check_free_space(end)?;
        let (parent, file) = self.lookup_file(path)?;
        let id = file.id();
        let written = self
            .transfer("send_partial", |s| s.send_partial(id, offset, data))
            .map_err(DeviceError::into_io)?;
        let end = offset + written as u64;
        parent.update_file(file.name(), |f| {
            f.size = f.size.max(end);
            f.modified = SystemTime::now();
        });
        Ok(written)
    }

    /// Downloads `remote` into `local`. Empty files never hit the device.
    pub fn pull_to_local(&self, remote: &str, local: &Path) -> Result<()> {
        let (_, file) = self.lookup_file(remote)?;
        if file.size == 0 {
            std::fs::File::create(local)?;
            return Ok(());
        }
        let id = file.id();
        self.transfer("get_object", |s| s.get_object_to_file(id, local))
            .map_err(|e| match e {
                DeviceError::Failed { .. } => DeviceError::not_found(remote),
                other => other,
            })
    }

    /// Uploads `local` as `remote`, replacing any existing object.
    pub fn push_from_local(&self, local: &Path, remote: &str) -> Result<PushOutcome> {
        let size = std::fs::metadata(local)?.len();
        if size > self.config.async_push_threshold {
            let this = self.this.upgrade().ok_or(DeviceError::QueueClosed)?;
            let (local, remote) = (local.to_path_buf(), remote.to_string());
            info!("queueing {} byte push of {}", size, remote);
            self.workers
                .submit(move || this.finish_queued_push(&local, &remote))?;
            return Ok(PushOutcome::Queued);
        }
        self.push_now(local, remote)?;
        Ok(PushOutcome::Completed)
    }

    fn finish_queued_push(&self, local: &Path, remote: &str) {
        let state = match self.push_now(local, remote) {
            Ok(()) => {
                info!("queued push of {} finished", remote);
                UploadState::Success
            }
            Err(e) => {
                warn!("queued push of {} failed: {}", remote, e);
                UploadState::Fail
            }
        };
        self.uploads.update(remote, state);
        if let Err(e) = std::fs::remove_file(local) {
            warn!("failed to remove {}: {}", local.display(), e);
        }
    }

    fn push_now(&self, local: &Path, remote: &str) -> Result<()> {
        let (parent_path, name) = split_path(remote);
        let parent = self.fetch_directory(&parent_path)?;
        if parent.id() == UNASSIGNED_ID {
            return Err(DeviceError::InvalidArgument {
                msg: format!("cannot push {} outside a storage", remote),
            });
        }
        if parent.find_dir(&name).is_some() {
            return Err(DeviceError::AlreadyExists {
                path: remote.to_string(),
            });
        }
        let modified = std::fs::metadata(local)?
            .modified()
            .map(to_unix_secs)
            .unwrap_or_else(|_| to_unix_secs(SystemTime::now()));

        let old = parent.find_file(&name);
        if let Some(old) = &old {
            let old_id = old.id();
            self.call("delete_object", |s| s.delete_object(old_id))?;
        }

        let (storage, parent_id) = (parent.storage_id(), parent.id());
        let pushed = self.transfer("send_object", |s| {
            s.send_object_from_file(local, storage, parent_id, &name, modified)
        });
        let info = match pushed {
            Ok(info) => info,
            Err(e) => {
                if old.is_some() {
                    parent.remove_file(&name);
                }
                return Err(e);
            }
        };

        let node = FileNode::from_object(&info);
        if old.is_some() {
            parent.replace_file(&name, node);
        } else {
            parent.add_file(node);
        }
        debug!("pushed {} ({} bytes) as object {}", remote, info.size, info.id);
        self.refresh_storages();
        Ok(())
    }

    pub fn get_thumbnail(&self, path: &str) -> Result<Vec<u8>> {
        let (_, file) = self.lookup_file(path)?;
        let id = file.id();
        self.transfer("get_thumbnail", |s| s.get_thumbnail(id))
            .map_err(DeviceError::into_io)
    }

    pub fn refresh_storages(&self) {
        match self.call("storages", |s| s.storages()) {
            Ok(storages) => *self.storages.write() = storages,
            Err(e) => debug!("keeping cached storage sizes: {}", e),
        }
    }

    pub fn storages(&self) -> Vec<StorageInfo> {
        self.storages.read().clone()
    }

    pub fn storage_total_size(&self) -> u64 {
        self.storages.read().iter().map(|s| s.max_capacity).sum()
    }

    pub fn storage_free_size(&self) -> u64 {
        self.storages.read().iter().map(|s| s.free_space).sum()
    }

    /// Takes a pending event without waiting, so the transport lock is
    /// released straight away.
    pub(crate) fn poll_event(&self) -> Result<Option<DeviceEvent>> {
        self.call("poll_event", |s| s.poll_event(Duration::ZERO))
    }

    pub fn handle_event(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::ObjectAdded(id) => info!("device reported object {} added", id),
            DeviceEvent::ObjectRemoved(id) if id > self.config.event_handle_threshold => {
                let Some(this) = self.this.upgrade() else {
                    return;
                };
                let queued = self.workers.submit(move || {
                    if let Err(e) = this.reconcile_removed(id) {
                        warn!("reconciling removed object {} failed: {}", id, e);
                    }
                });
                if let Err(e) = queued {
                    warn!("dropping remove event for {}: {}", id, e);
                }
            }
            DeviceEvent::ObjectRemoved(id) => debug!("ignoring remove event for {}", id),
            other => debug!("device event {:?}", other),
        }
    }

    /// A remove event may really be a rename: if the handle still resolves,
    /// the cached entry is renamed, otherwise it is dropped.
    pub fn reconcile_removed(&self, id: ObjectId) -> Result<()> {
        let Some(parent) = self.find_parent_of(id) else {
            debug!("removed object {} is not cached", id);
            return Ok(());
        };
        match self.call("object_info", |s| s.object_info(id))? {
            Some(info) => {
                if parent.rename_by_id(id, &info.name) {
                    info!("object {} renamed to {}", id, info.name);
                }
            }
            None => {
                if let Some(name) = parent.remove_by_id(id) {
                    info!("object {} ({}) removed on device", id, name);
                }
            }
        }
        Ok(())
    }

    fn find_parent_of(&self, id: ObjectId) -> Option<Arc<DirNode>> {
        let mut queue = VecDeque::from([self.root.clone()]);
        while let Some(dir) = queue.pop_front() {
            if dir.find_name_by_id(id).is_some() {
                return Some(dir);
            }
            queue.extend(dir.dirs());
        }
        None
    }
}

impl Drop for MtpDevice {
    fn drop(&mut self) {
        if let Some(reader) = self.events.get_mut().take() {
            reader.stop();
        }
    }
}
