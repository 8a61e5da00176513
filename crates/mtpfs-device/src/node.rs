//! In-memory mirror of the remote namespace.
//!
//! Nodes compare by name only, so the child collections of a directory are
//! both sorted listings and name-keyed lookup tables. Directories are shared
//! as `Arc<DirNode>` handles; a handle stays valid while other threads mutate
//! the tree, because every child set sits behind its own directory lock.

use parking_lot::{Mutex, RwLock};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::transport::{ObjectInfo, StorageInfo};

pub type ObjectId = u32;
pub type StorageId = u32;

/// Id of the synthetic root and of nodes not yet known to the device.
pub const UNASSIGNED_ID: ObjectId = 0;
/// Parent handle the device uses for objects at the top of a storage.
pub const STORAGE_ROOT_ID: ObjectId = 0xFFFF_FFFF;

pub fn to_system_time(secs: i64) -> SystemTime {
    if secs <= 0 {
        UNIX_EPOCH
    } else {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    }
}

pub fn to_unix_secs(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct NodeMeta {
    pub id: ObjectId,
    pub parent_id: ObjectId,
    pub storage_id: StorageId,
    pub name: String,
}

impl NodeMeta {
    pub fn new(id: ObjectId, parent_id: ObjectId, storage_id: StorageId, name: &str) -> Self {
        NodeMeta {
            id,
            parent_id,
            storage_id,
            name: name.to_string(),
        }
    }
}

impl PartialEq for NodeMeta {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for NodeMeta {}

impl PartialOrd for NodeMeta {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeMeta {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl PartialEq<str> for NodeMeta {
    fn eq(&self, other: &str) -> bool {
        self.name == other
    }
}

#[derive(Debug, Clone)]
pub struct FileNode {
    pub meta: NodeMeta,
    pub size: u64,
    pub modified: SystemTime,
}

impl FileNode {
    pub fn new(meta: NodeMeta, size: u64, modified: SystemTime) -> Self {
        FileNode {
            meta,
            size,
            modified,
        }
    }

    pub fn from_object(info: &ObjectInfo) -> Self {
        FileNode {
            meta: NodeMeta::new(info.id, info.parent_id, info.storage_id, &info.name),
            size: info.size,
            modified: to_system_time(info.modified),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.meta.id
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }
}

impl PartialEq for FileNode {
    fn eq(&self, other: &Self) -> bool {
        self.meta == other.meta
    }
}

impl Eq for FileNode {}

impl PartialOrd for FileNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.meta.cmp(&other.meta)
    }
}

impl PartialEq<str> for FileNode {
    fn eq(&self, other: &str) -> bool {
        self.meta == *other
    }
}

impl Borrow<str> for FileNode {
    fn borrow(&self) -> &str {
        &self.meta.name
    }
}

struct DirState {
    dirs: BTreeMap<String, Arc<DirNode>>,
    files: BTreeSet<FileNode>,
    fetched: bool,
    modified: SystemTime,
    handles: Vec<ObjectId>,
}

impl DirState {
    fn new(modified: SystemTime) -> Self {
        DirState {
            dirs: BTreeMap::new(),
            files: BTreeSet::new(),
            fetched: false,
            modified,
            handles: Vec::new(),
        }
    }

    fn insert(&mut self, info: &ObjectInfo) {
        if info.is_folder() {
            self.files.remove(info.name.as_str());
            self.dirs
                .insert(info.name.clone(), DirNode::from_object(info));
        } else {
            self.dirs.remove(&info.name);
            self.files.replace(FileNode::from_object(info));
        }
    }

    fn remove_id(&mut self, id: ObjectId) -> Option<String> {
        let dir_name = self
            .dirs
            .iter()
            .find(|(_, d)| d.id() == id)
            .map(|(n, _)| n.clone());
        if let Some(name) = dir_name {
            self.dirs.remove(&name);
            return Some(name);
        }
        let file = self.files.iter().find(|f| f.id() == id).cloned()?;
        self.files.remove(file.name());
        Some(file.meta.name)
    }

    fn rename(&mut self, old: &str, new: &str) -> bool {
        if let Some(dir) = self.dirs.remove(old) {
            dir.meta.write().name = new.to_string();
            self.dirs.insert(new.to_string(), dir);
            return true;
        }
        match self.files.take(old) {
            Some(mut file) => {
                file.meta.name = new.to_string();
                self.files.replace(file);
                true
            }
            None => false,
        }
    }
}

pub struct DirNode {
    meta: RwLock<NodeMeta>,
    state: Mutex<DirState>,
}

impl std::fmt::Debug for DirNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirNode")
            .field("meta", &*self.meta.read())
            .field("fetched", &self.is_fetched())
            .finish()
    }
}

impl DirNode {
    pub fn new(meta: NodeMeta, modified: SystemTime) -> Arc<Self> {
        Arc::new(DirNode {
            meta: RwLock::new(meta),
            state: Mutex::new(DirState::new(modified)),
        })
    }

    /// The synthetic directory holding one child per storage.
    pub fn root() -> Arc<Self> {
        Self::new(
            NodeMeta::new(UNASSIGNED_ID, UNASSIGNED_ID, 0, "/"),
            UNIX_EPOCH,
        )
    }

    pub fn storage(info: &StorageInfo) -> Arc<Self> {
        Self::new(
            NodeMeta::new(STORAGE_ROOT_ID, UNASSIGNED_ID, info.id, &info.description),
            UNIX_EPOCH,
        )
    }

    pub fn from_object(info: &ObjectInfo) -> Arc<Self> {
        Self::new(
            NodeMeta::new(info.id, info.parent_id, info.storage_id, &info.name),
            to_system_time(info.modified),
        )
    }

    pub fn meta(&self) -> NodeMeta {
        self.meta.read().clone()
    }

    pub fn id(&self) -> ObjectId {
        self.meta.read().id
    }

    pub fn parent_id(&self) -> ObjectId {
        self.meta.read().parent_id
    }

    pub fn storage_id(&self) -> StorageId {
        self.meta.read().storage_id
    }

    pub fn name(&self) -> String {
        self.meta.read().name.clone()
    }

    /// Only valid while the node is detached from any parent.
    pub(crate) fn relocate(&self, parent_id: ObjectId, storage_id: StorageId, name: &str) {
        let mut meta = self.meta.write();
        meta.parent_id = parent_id;
        meta.storage_id = storage_id;
        meta.name = name.to_string();
    }

    pub fn is_fetched(&self) -> bool {
        self.state.lock().fetched
    }

    pub fn set_fetched(&self, fetched: bool) {
        self.state.lock().fetched = fetched;
    }

    pub fn modification_date(&self) -> SystemTime {
        self.state.lock().modified
    }

    pub fn set_modification_date(&self, modified: SystemTime) {
        self.state.lock().modified = modified;
    }

    pub fn cached_handles(&self) -> Vec<ObjectId> {
        self.state.lock().handles.clone()
    }

    pub fn find_dir(&self, name: &str) -> Option<Arc<DirNode>> {
        self.state.lock().dirs.get(name).cloned()
    }

    pub fn find_file(&self, name: &str) -> Option<FileNode> {
        self.state.lock().files.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let state = self.state.lock();
        state.dirs.contains_key(name) || state.files.contains(name)
    }

    pub fn dirs(&self) -> Vec<Arc<DirNode>> {
        self.state.lock().dirs.values().cloned().collect()
    }

    pub fn files(&self) -> Vec<FileNode> {
        self.state.lock().files.iter().cloned().collect()
    }

    pub fn dir_count(&self) -> usize {
        self.state.lock().dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.dirs.is_empty() && state.files.is_empty()
    }

    pub fn add_dir(&self, dir: Arc<DirNode>) {
        let name = dir.name();
        let mut state = self.state.lock();
        state.files.remove(name.as_str());
        state.dirs.insert(name, dir);
        state.modified = SystemTime::now();
    }

    pub fn add_file(&self, file: FileNode) {
        let mut state = self.state.lock();
        state.dirs.remove(file.name());
        state.files.replace(file);
        state.modified = SystemTime::now();
    }

    pub fn remove_dir(&self, name: &str) -> Option<Arc<DirNode>> {
        let mut state = self.state.lock();
        let removed = state.dirs.remove(name);
        if removed.is_some() {
            state.modified = SystemTime::now();
        }
        removed
    }

    pub fn remove_file(&self, name: &str) -> Option<FileNode> {
        let mut state = self.state.lock();
        let removed = state.files.take(name);
        if removed.is_some() {
            state.modified = SystemTime::now();
        }
        removed
    }

    /// Swaps `old_name` for `file` in one critical section.
    pub fn replace_file(&self, old_name: &str, file: FileNode) -> bool {
        let mut state = self.state.lock();
        let existed = state.files.take(old_name).is_some();
        state.files.replace(file);
        state.modified = SystemTime::now();
        existed
    }

    pub fn rename_child(&self, old: &str, new: &str) -> bool {
        let mut state = self.state.lock();
        let renamed = state.rename(old, new);
        if renamed {
            state.modified = SystemTime::now();
        }
        renamed
    }

    /// Applies `f` to the named file, keeping its position in the set.
    pub fn update_file<F>(&self, name: &str, f: F) -> bool
    where
        F: FnOnce(&mut FileNode),
    {
        let mut state = self.state.lock();
        match state.files.take(name) {
            Some(mut file) => {
                f(&mut file);
                file.meta.name = name.to_string();
                state.files.insert(file);
                true
            }
            None => false,
        }
    }

    /// Replaces all children with a full listing and marks the directory fetched.
    pub fn populate(&self, objects: &[ObjectInfo]) {
        let mut state = self.state.lock();
        state.dirs.clear();
        state.files.clear();
        for info in objects {
            state.insert(info);
        }
        state.handles = objects.iter().map(|o| o.id).collect();
        state.fetched = true;
    }

    /// Inserts `added`, drops `removed` and records the new handle list.
    pub fn apply_diff(&self, added: &[ObjectInfo], removed: &[ObjectId], handles: Vec<ObjectId>) {
        let mut state = self.state.lock();
        for id in removed {
            state.remove_id(*id);
        }
        for info in added {
            state.insert(info);
        }
        state.handles = handles;
        state.fetched = true;
    }

    pub fn find_name_by_id(&self, id: ObjectId) -> Option<String> {
        let state = self.state.lock();
        if let Some((name, _)) = state.dirs.iter().find(|(_, d)| d.id() == id) {
            return Some(name.clone());
        }
        state
            .files
            .iter()
            .find(|f| f.id() == id)
            .map(|f| f.meta.name.clone())
    }

    pub fn remove_by_id(&self, id: ObjectId) -> Option<String> {
        let mut state = self.state.lock();
        let name = state.remove_id(id)?;
        state.handles.retain(|h| *h != id);
        Some(name)
    }

    pub fn rename_by_id(&self, id: ObjectId, new_name: &str) -> bool {
        let mut state = self.state.lock();
        let old = match state.dirs.iter().find(|(_, d)| d.id() == id) {
            Some((name, _)) => Some(name.clone()),
            None => state
                .files
                .iter()
                .find(|f| f.id() == id)
                .map(|f| f.meta.name.clone()),
        };
        match old {
            Some(old) => state.rename(&old, new_name),
            None => false,
        }
    }

    /// Drops every cached child so the next listing reloads from the device.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.dirs.clear();
        state.files.clear();
        state.handles.clear();
        state.fetched = false;
    }
}
