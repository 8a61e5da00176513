//! Path-based filesystem operations over one MTP device.
//!
//! [`FilesystemOps`] is the operation table the FUSE adapter calls into.
//! [`MtpFileSystem`] implements it and holds every piece of mount state:
//! the device (with its tree cache and upload records), the staging pool,
//! the read-only policy and the thumbnail cache. Each entry point validates
//! its path before any device interaction and mutating entry points check
//! the policy next.

use lru::LruCache;
use mtpfs_device::{DeviceError, MtpDevice, NodeRef, PushOutcome, UploadState};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::num::NonZeroUsize;
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::control::{get_control, set_control, ControlKey};
use crate::error::{FuseError, Result};
use crate::path::{thumbnail_target, validate_path};
use crate::policy::{AccountService, ReadOnlyPolicy};
use crate::staging::{StagedFile, StagingPool};

pub const BLOCK_SIZE: u64 = 1024;
pub const NAME_MAX: u32 = 255;

const THUMBNAIL_CACHE_ENTRIES: usize = 32;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAttr {
    pub kind: NodeKind,
    pub size: u64,
    pub perm: u16,
    pub nlink: u32,
    pub mtime: SystemTime,
}

impl NodeAttr {
    pub fn directory(mtime: SystemTime) -> Self {
        NodeAttr {
            kind: NodeKind::Directory,
            size: 0,
            perm: 0o775,
            nlink: 2,
            mtime,
        }
    }

    pub fn file(size: u64, mtime: SystemTime) -> Self {
        NodeAttr {
            kind: NodeKind::File,
            size,
            perm: 0o644,
            nlink: 1,
            mtime,
        }
    }

    /// Allocated 512-byte blocks.
    pub fn blocks(&self) -> u64 {
        self.size.div_ceil(512)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub bsize: u32,
    pub namelen: u32,
}

/// POSIX-shaped operations keyed by absolute path.
pub trait FilesystemOps: Send + Sync {
    fn init(&self) -> Result<()>;
    fn destroy(&self);
    fn getattr(&self, path: &str) -> Result<NodeAttr>;
    fn mknod(&self, path: &str, mode: u32) -> Result<()>;
    fn mkdir(&self, path: &str, mode: u32) -> Result<()>;
    fn unlink(&self, path: &str) -> Result<()>;
    fn rmdir(&self, path: &str) -> Result<()>;
    fn rename(&self, from: &str, to: &str) -> Result<()>;
    fn chmod(&self, path: &str, mode: u32) -> Result<()>;
    fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<()>;
    fn truncate(&self, path: &str, size: u64) -> Result<()>;
    fn utimens(&self, path: &str, mtime: SystemTime) -> Result<()>;
    /// Returns the new file handle.
    fn open(&self, path: &str, flags: i32) -> Result<u64>;
    fn create(&self, path: &str, mode: u32, flags: i32) -> Result<u64>;
    fn read(&self, path: &str, fh: u64, size: u32, offset: u64) -> Result<Vec<u8>>;
    fn write(&self, path: &str, fh: u64, data: &[u8], offset: u64) -> Result<u32>;
    fn flush(&self, path: &str, fh: u64) -> Result<()>;
    fn release(&self, path: &str, fh: u64) -> Result<()>;
    fn fsync(&self, path: &str, fh: u64, datasync: bool) -> Result<()>;
    fn opendir(&self, path: &str) -> Result<()>;
    fn readdir(&self, path: &str) -> Result<Vec<DirEntry>>;
    fn releasedir(&self, path: &str) -> Result<()>;
    fn fsyncdir(&self, path: &str) -> Result<()>;
    fn statfs(&self, path: &str) -> Result<StatFs>;
    fn setxattr(&self, path: &str, name: &str, value: &[u8]) -> Result<()>;
    fn getxattr(&self, path: &str, name: &str) -> Result<Vec<u8>>;
}

pub struct MtpFileSystem {
    device: Arc<MtpDevice>,
    accounts: Arc<dyn AccountService>,
    policy: Arc<ReadOnlyPolicy>,
    staging: Mutex<StagingPool>,
    op_lock: Mutex<()>,
    next_fh: AtomicU64,
    thumbnails: Mutex<LruCache<String, Arc<Vec<u8>>>>,
}

fn bad_handle(path: &str, fh: u64) -> FuseError {
    FuseError::BadHandle {
        path: path.to_string(),
        fh,
    }
}

fn remove_scratch(local: &Path) {
    if let Err(e) = fs::remove_file(local) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("failed to remove {}: {}", local.display(), e);
        }
    }
}

fn open_local(path: &Path, flags: i32) -> io::Result<File> {
    let access = flags & libc::O_ACCMODE;
    let writable = access != libc::O_RDONLY;
    OpenOptions::new()
        .read(access != libc::O_WRONLY)
        .write(writable)
        .truncate(writable && flags & libc::O_TRUNC != 0)
        .open(path)
}

fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        match file.read_at(&mut buf[done..], offset + done as u64) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

fn slice_at(data: &[u8], size: u32, offset: u64) -> Vec<u8> {
    let start = (offset as usize).min(data.len());
    let end = start.saturating_add(size as usize).min(data.len());
    data[start..end].to_vec()
}

impl MtpFileSystem {
    /// Builds the mount context and its scratch directory under `scratch_root`.
    pub fn new(
        device: Arc<MtpDevice>,
        accounts: Arc<dyn AccountService>,
        scratch_root: &Path,
    ) -> Result<Self> {
        let staging = StagingPool::create(scratch_root)?;
        let capacity = NonZeroUsize::new(THUMBNAIL_CACHE_ENTRIES).unwrap_or(NonZeroUsize::MIN);
        Ok(MtpFileSystem {
            device,
            accounts,
            policy: Arc::new(ReadOnlyPolicy::new()),
            staging: Mutex::new(staging),
            op_lock: Mutex::new(()),
            next_fh: AtomicU64::new(1),
            thumbnails: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn device(&self) -> &Arc<MtpDevice> {
        &self.device
    }

    pub fn policy(&self) -> &ReadOnlyPolicy {
        &self.policy
    }

    pub fn staged_count(&self) -> usize {
        self.staging.lock().len()
    }

    fn alloc_fh(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }

    fn partial_io(&self) -> bool {
        self.device.capabilities().partial_io()
    }

    fn thumbnail(&self, target: &str) -> Result<Arc<Vec<u8>>> {
        if let Some(cached) = self.thumbnails.lock().get(target) {
            return Ok(cached.clone());
        }
        let data = Arc::new(self.device.get_thumbnail(target)?);
        self.thumbnails.lock().put(target.to_string(), data.clone());
        Ok(data)
    }

    fn forget_thumbnail(&self, path: &str) {
        self.thumbnails.lock().pop(path);
    }

    // Control API. The xattr adapter in `control` maps `user.*` keys here.

    /// Removes a directory and everything below it without the empty check.
    pub fn remove_dir_directly(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        self.policy.check_writable("rmdir")?;
        let _op = self.op_lock.lock();
        self.device.remove_directory_directly(path)?;
        Ok(())
    }

    /// Drops the cached listing of `path` so the next access reloads it.
    pub fn refresh(&self, path: &str) {
        self.device.refresh(path);
    }

    /// Transfers cannot be interrupted once started; the request is only logged.
    pub fn cancel_copy(&self, path: &str) {
        info!("cancel copy requested for {}, ignored", path);
    }

    pub fn set_ptp_mode(&self, enabled: bool) {
        self.device.set_ptp_mode(enabled);
    }

    pub fn is_ptp_mode(&self) -> bool {
        self.device.ptp_mode()
    }

    /// Starts tracking the upload of `path` as `sending`.
    pub fn arm_upload(&self, path: &str) {
        self.device.uploads().arm(path);
    }

    /// Current upload state of `path`; terminal states are consumed.
    pub fn take_upload_status(&self, path: &str) -> Result<UploadState> {
        self.device
            .uploads()
            .take_status(path)
            .ok_or_else(|| FuseError::NoRecord {
                path: path.to_string(),
            })
    }

    pub fn is_dir_fetched(&self, path: &str) -> bool {
        self.device.is_dir_fetched(path)
    }

    pub fn is_in_use(&self) -> bool {
        !self.staging.lock().is_empty() || self.device.transfer_in_flight()
    }

    pub fn friendly_name(&self) -> String {
        self.device.friendly_name()
    }

    pub fn is_open_harmony_device(&self) -> bool {
        self.device.is_open_harmony_device()
    }

    fn push_empty(&self, path: &str) -> Result<()> {
        let local = self.staging.lock().make_scratch_path(path);
        File::create(&local)?;
        let pushed = self.device.push_from_local(&local, path);
        remove_scratch(&local);
        pushed?;
        Ok(())
    }

    fn stage(&self, path: &str, local: &Path) -> Result<()> {
        if self.partial_io() {
            self.device.lookup_file(path)?;
            File::create(local)?;
        } else {
            self.device.pull_to_local(path, local)?;
        }
        Ok(())
    }

    /// Empties the remote object before a truncating open.
    fn truncate_on_open(&self, path: &str) -> Result<()> {
        let (_, file) = self.device.lookup_file(path)?;
        if file.size > 0 {
            debug!("truncating {} on open", path);
            self.push_empty(path)?;
            self.forget_thumbnail(path);
        }
        Ok(())
    }

    /// Opens `path` with the dispatcher lock held by the caller.
    fn open_locked(&self, path: &str, flags: i32) -> Result<u64> {
        if flags & libc::O_ACCMODE != libc::O_RDONLY && flags & libc::O_TRUNC != 0 {
            self.truncate_on_open(path)?;
        }
        let fh = self.alloc_fh();
        {
            let mut pool = self.staging.lock();
            if let Some(staged) = pool.get_mut(path) {
                let file = open_local(staged.local_path(), flags)?;
                staged.add_handle(fh, file);
                debug!("open {} reuses staged copy, refs={}", path, staged.ref_count());
                return Ok(fh);
            }
        }

        let local = self.staging.lock().make_scratch_path(path);
        if let Err(e) = self.stage(path, &local) {
            remove_scratch(&local);
            return Err(e);
        }
        let file = match open_local(&local, flags) {
            Ok(file) => file,
            Err(e) => {
                remove_scratch(&local);
                return Err(e.into());
            }
        };
        let mut staged = StagedFile::new(path, local);
        staged.add_handle(fh, file);
        self.staging.lock().insert(staged);
        debug!("open {} staged fh={}", path, fh);
        Ok(fh)
    }

    fn truncate_remote(&self, path: &str, size: u64) -> Result<()> {
        let local = self.staging.lock().make_scratch_path(path);
        let pushed = (|| -> Result<PushOutcome> {
            self.device.pull_to_local(path, &local)?;
            OpenOptions::new().write(true).open(&local)?.set_len(size)?;
            Ok(self.device.push_from_local(&local, path)?)
        })();
        match pushed {
            Ok(PushOutcome::Queued) => Ok(()),
            other => {
                remove_scratch(&local);
                other.map(drop)
            }
        }
    }

    /// Uploads a staged copy whose last descriptor was closed.
    fn finish_staged(&self, path: &str, staged: StagedFile) -> Result<()> {
        let local = staged.local_path().to_path_buf();
        let modified = staged.is_modified();
        drop(staged);

        if !modified {
            remove_scratch(&local);
            return Ok(());
        }
        if self.partial_io() {
            self.device.uploads().update(path, UploadState::Success);
            remove_scratch(&local);
            return Ok(());
        }
        let size = fs::metadata(&local).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            remove_scratch(&local);
            return Ok(());
        }

        let uploads = self.device.uploads();
        uploads.update(path, UploadState::Sending);
        match self.device.push_from_local(&local, path) {
            Ok(PushOutcome::Queued) => {
                debug!("upload of {} left to the worker pool", path);
                Ok(())
            }
            Ok(PushOutcome::Completed) => {
                uploads.update(path, UploadState::Success);
                self.forget_thumbnail(path);
                remove_scratch(&local);
                Ok(())
            }
            Err(e) => {
                warn!("upload of {} failed: {}", path, e);
                uploads.update(path, UploadState::Fail);
                remove_scratch(&local);
                Err(e.into())
            }
        }
    }
}

impl FilesystemOps for MtpFileSystem {
    fn init(&self) -> Result<()> {
        info!("mounting {}", self.device.friendly_name());
        if let Err(e) = self.policy.init(self.accounts.as_ref()) {
            warn!("account state unavailable, mount stays writable: {}", e);
        }
        self.accounts.subscribe(self.policy.clone())
    }

    fn destroy(&self) {
        if let Err(e) = self.accounts.unsubscribe() {
            warn!("failed to unsubscribe from account events: {}", e);
        }
        if !self.device.workers().drain(DRAIN_TIMEOUT) {
            warn!("unmounting with queued uploads still running");
        }
        if let Err(e) = self.staging.lock().remove_scratch_dir() {
            warn!("failed to remove scratch directory: {}", e);
        }
        info!("unmounted");
    }

    fn getattr(&self, path: &str) -> Result<NodeAttr> {
        debug!("getattr path={}", path);
        validate_path(path)?;
        if path == "/" {
            return Ok(NodeAttr::directory(self.device.root_modification_date()));
        }
        if let Some(target) = thumbnail_target(path) {
            let (_, file) = self.device.lookup_file(target)?;
            let thumbnail = self.thumbnail(target)?;
            return Ok(NodeAttr::file(thumbnail.len() as u64, file.modified));
        }
        match self.device.lookup(path)? {
            NodeRef::Directory(dir) => Ok(NodeAttr::directory(dir.modification_date())),
            NodeRef::File(file) => {
                let mut size = file.size;
                if !self.partial_io() {
                    if let Some(staged) = self.staging.lock().get(path) {
                        if staged.is_modified() {
                            size = staged.local_size().unwrap_or(size);
                        }
                    }
                }
                Ok(NodeAttr::file(size, file.modified))
            }
        }
    }

    fn mknod(&self, path: &str, mode: u32) -> Result<()> {
        debug!("mknod path={} mode={:o}", path, mode);
        validate_path(path)?;
        self.policy.check_writable("mknod")?;
        let kind = mode & libc::S_IFMT;
        if kind != 0 && kind != libc::S_IFREG {
            return Err(FuseError::UnsupportedType {
                path: path.to_string(),
                mode,
            });
        }
        let _op = self.op_lock.lock();
        if self.device.lookup(path).is_ok() {
            return Err(DeviceError::AlreadyExists {
                path: path.to_string(),
            }
            .into());
        }
        self.push_empty(path)
    }

    fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        debug!("mkdir path={} mode={:o}", path, mode);
        validate_path(path)?;
        self.policy.check_writable("mkdir")?;
        let _op = self.op_lock.lock();
        self.device.create_directory(path)?;
        Ok(())
    }

    fn unlink(&self, path: &str) -> Result<()> {
        debug!("unlink path={}", path);
        validate_path(path)?;
        self.policy.check_writable("unlink")?;
        let _op = self.op_lock.lock();
        self.device.remove_file(path)?;
        if let Some(staged) = self.staging.lock().get_mut(path) {
            staged.set_modified(false);
        }
        self.forget_thumbnail(path);
        Ok(())
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        debug!("rmdir path={}", path);
        validate_path(path)?;
        self.policy.check_writable("rmdir")?;
        let _op = self.op_lock.lock();
        self.device.remove_directory(path)?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        debug!("rename from={} to={}", from, to);
        validate_path(from)?;
        validate_path(to)?;
        self.policy.check_writable("rename")?;
        let _op = self.op_lock.lock();
        self.device.rename(from, to)?;
        let rekeyed = self.staging.lock().rekey(from, to);
        if rekeyed > 0 {
            debug!("{} staged copies under {} now upload under {}", rekeyed, from, to);
        }
        self.device.uploads().rename(from, to);
        self.forget_thumbnail(from);
        Ok(())
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        debug!("chmod path={} mode={:o}", path, mode);
        validate_path(path)?;
        self.policy.check_writable("chmod")?;
        self.device.lookup(path)?;
        if let Some(staged) = self.staging.lock().get(path) {
            fs::set_permissions(staged.local_path(), fs::Permissions::from_mode(mode & 0o7777))?;
        }
        Ok(())
    }

    fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        debug!("chown path={} uid={:?} gid={:?}", path, uid, gid);
        validate_path(path)?;
        self.policy.check_writable("chown")?;
        self.device.lookup(path)?;
        Ok(())
    }

    fn truncate(&self, path: &str, size: u64) -> Result<()> {
        debug!("truncate path={} size={}", path, size);
        validate_path(path)?;
        self.policy.check_writable("truncate")?;
        let _op = self.op_lock.lock();
        if !self.partial_io() {
            let mut pool = self.staging.lock();
            if let Some(staged) = pool.get_mut(path) {
                OpenOptions::new()
                    .write(true)
                    .open(staged.local_path())?
                    .set_len(size)?;
                staged.set_modified(true);
                return Ok(());
            }
        }
        let (_, file) = self.device.lookup_file(path)?;
        if file.size == size {
            return Ok(());
        }
        self.truncate_remote(path, size)
    }

    fn utimens(&self, path: &str, mtime: SystemTime) -> Result<()> {
        debug!("utimens path={}", path);
        validate_path(path)?;
        self.policy.check_writable("utimens")?;
        match self.device.lookup(path)? {
            NodeRef::Directory(_) => Ok(()),
            NodeRef::File(_) => Ok(self.device.set_file_modified(path, mtime)?),
        }
    }

    fn open(&self, path: &str, flags: i32) -> Result<u64> {
        debug!("open path={} flags={:#o}", path, flags);
        validate_path(path)?;
        if let Some(target) = thumbnail_target(path) {
            self.thumbnail(target)?;
            return Ok(self.alloc_fh());
        }
        let mut flags = flags;
        match flags & libc::O_ACCMODE {
            libc::O_RDONLY => {}
            access => {
                self.policy.check_writable("open")?;
                if access == libc::O_WRONLY {
                    flags |= libc::O_TRUNC;
                }
            }
        }
        let _op = self.op_lock.lock();
        self.open_locked(path, flags)
    }

    fn create(&self, path: &str, mode: u32, flags: i32) -> Result<u64> {
        debug!("create path={} mode={:o} flags={:#o}", path, mode, flags);
        validate_path(path)?;
        self.policy.check_writable("create")?;
        let _op = self.op_lock.lock();
        let staged = self.staging.lock().get(path).is_some();
        if !staged && self.device.lookup(path).is_err() {
            self.push_empty(path)?;
        }
        self.open_locked(path, flags)
    }

    fn read(&self, path: &str, fh: u64, size: u32, offset: u64) -> Result<Vec<u8>> {
        debug!("read path={} fh={} size={} offset={}", path, fh, size, offset);
        validate_path(path)?;
        if let Some(target) = thumbnail_target(path) {
            let thumbnail = self.thumbnail(target)?;
            return Ok(slice_at(&thumbnail, size, offset));
        }
        if self.partial_io() {
            return Ok(self.device.read_partial(path, size, offset)?);
        }
        let file = self
            .staging
            .lock()
            .get(path)
            .and_then(|staged| staged.handle(fh))
            .ok_or_else(|| bad_handle(path, fh))?;
        let mut buf = vec![0u8; size as usize];
        let n = read_full_at(&file, &mut buf, offset)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn write(&self, path: &str, fh: u64, data: &[u8], offset: u64) -> Result<u32> {
        debug!("write path={} fh={} size={} offset={}", path, fh, data.len(), offset);
        validate_path(path)?;
        self.policy.check_writable("write")?;
        self.device.check_free_space(offset + data.len() as u64)?;
        if self.partial_io() {
            let written = self.device.write_partial(path, data, offset)?;
            if let Some(staged) = self.staging.lock().get_mut(path) {
                staged.set_modified(true);
            }
            return Ok(written);
        }
        let file = {
            let mut pool = self.staging.lock();
            let staged = pool.get_mut(path).ok_or_else(|| bad_handle(path, fh))?;
            let file = staged.handle(fh).ok_or_else(|| bad_handle(path, fh))?;
            staged.set_modified(true);
            file
        };
        file.write_all_at(data, offset)?;
        Ok(data.len() as u32)
    }

    fn flush(&self, path: &str, fh: u64) -> Result<()> {
        debug!("flush path={} fh={}", path, fh);
        validate_path(path)
    }

    fn release(&self, path: &str, fh: u64) -> Result<()> {
        debug!("release path={} fh={}", path, fh);
        validate_path(path)?;
        if thumbnail_target(path).is_some() {
            return Ok(());
        }
        let _op = self.op_lock.lock();
        let finished = {
            let mut pool = self.staging.lock();
            let staged = pool.get_mut(path).ok_or_else(|| bad_handle(path, fh))?;
            staged
                .remove_handle(fh)
                .ok_or_else(|| bad_handle(path, fh))?;
            if staged.ref_count() > 0 {
                debug!("{} still open, refs={}", path, staged.ref_count());
                return Ok(());
            }
            pool.remove(path)
        };
        match finished {
            Some(staged) => self.finish_staged(path, staged),
            None => Ok(()),
        }
    }

    fn fsync(&self, path: &str, fh: u64, datasync: bool) -> Result<()> {
        debug!("fsync path={} fh={} datasync={}", path, fh, datasync);
        validate_path(path)?;
        let file = self
            .staging
            .lock()
            .get(path)
            .and_then(|staged| staged.handle(fh));
        if let Some(file) = file {
            if datasync {
                file.sync_data()?;
            } else {
                file.sync_all()?;
            }
        }
        Ok(())
    }

    fn opendir(&self, path: &str) -> Result<()> {
        debug!("opendir path={}", path);
        validate_path(path)?;
        self.device.open_directory(path)?;
        Ok(())
    }

    fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        debug!("readdir path={}", path);
        validate_path(path)?;
        let (dirs, files) = self.device.read_directory(path)?;
        let mut entries = Vec::with_capacity(dirs.len() + files.len());
        entries.extend(dirs.iter().map(|dir| DirEntry {
            name: dir.name(),
            kind: NodeKind::Directory,
        }));
        entries.extend(files.iter().map(|file| DirEntry {
            name: file.name().to_string(),
            kind: NodeKind::File,
        }));
        Ok(entries)
    }

    fn releasedir(&self, path: &str) -> Result<()> {
        debug!("releasedir path={}", path);
        validate_path(path)
    }

    fn fsyncdir(&self, path: &str) -> Result<()> {
        debug!("fsyncdir path={}", path);
        validate_path(path)
    }

    fn statfs(&self, path: &str) -> Result<StatFs> {
        debug!("statfs path={}", path);
        validate_path(path)?;
        self.device.refresh_storages();
        let total = self.device.storage_total_size();
        let free = self.device.storage_free_size();
        Ok(StatFs {
            blocks: total / BLOCK_SIZE,
            bfree: free / BLOCK_SIZE,
            bavail: free / BLOCK_SIZE,
            bsize: BLOCK_SIZE as u32,
            namelen: NAME_MAX,
        })
    }

    fn setxattr(&self, path: &str, name: &str, value: &[u8]) -> Result<()> {
        debug!("setxattr path={} name={}", path, name);
        validate_path(path)?;
        match ControlKey::parse(name) {
            Some(key) => set_control(self, path, key, value),
            None => {
                debug!("ignoring unknown attribute {}", name);
                Ok(())
            }
        }
    }

    fn getxattr(&self, path: &str, name: &str) -> Result<Vec<u8>> {
        debug!("getxattr path={} name={}", path, name);
        validate_path(path)?;
        match ControlKey::parse(name) {
            Some(key) => get_control(self, path, key),
            None => Ok(Vec::new()),
        }
    }
}
