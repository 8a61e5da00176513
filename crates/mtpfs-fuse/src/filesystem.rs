//! `fuser::Filesystem` adapter.
//!
//! Translates inode-based kernel callbacks into calls on a path-based
//! [`FilesystemOps`] implementation and its results back into replies.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::raw::c_int;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr,
    Request, TimeOrNow,
};
use mtpfs_device::split_path;
use tracing::debug;

use crate::dispatcher::{DirEntry, FilesystemOps, NodeAttr, NodeKind, BLOCK_SIZE};
use crate::error::FuseError;
use crate::inode::{InodeId, InodeTable, ROOT_INODE};
use crate::path::join;

#[derive(Debug, Clone)]
pub struct FuseConfig {
    pub attr_timeout: Duration,
    pub entry_timeout: Duration,
}

impl Default for FuseConfig {
    fn default() -> Self {
        Self {
            attr_timeout: Duration::from_secs(1),
            entry_timeout: Duration::from_secs(1),
        }
    }
}

pub struct MtpFuse<F: FilesystemOps> {
    ops: Arc<F>,
    config: FuseConfig,
    inodes: InodeTable,
    // getxattr values fetched by a size query, held for the sized call that follows
    pending_xattrs: HashMap<(InodeId, String), Vec<u8>>,
}

impl<F: FilesystemOps> MtpFuse<F> {
    pub fn new(ops: Arc<F>, config: FuseConfig) -> Self {
        MtpFuse {
            ops,
            config,
            inodes: InodeTable::new(),
            pending_xattrs: HashMap::new(),
        }
    }

    fn reply_entry(&mut self, req: &Request<'_>, path: &str, reply: ReplyEntry) {
        match self.ops.getattr(path) {
            Ok(attr) => {
                let ino = self.inodes.lookup(path);
                let file_attr = to_file_attr(ino, &attr, req.uid(), req.gid());
                reply.entry(&self.config.entry_timeout, &file_attr, 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn reply_attr(&self, req: &Request<'_>, ino: u64, path: &str, reply: ReplyAttr) {
        match self.ops.getattr(path) {
            Ok(attr) => {
                let file_attr = to_file_attr(ino, &attr, req.uid(), req.gid());
                reply.attr(&self.config.attr_timeout, &file_attr);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }
}

pub fn to_file_attr(ino: u64, attr: &NodeAttr, uid: u32, gid: u32) -> FileAttr {
    FileAttr {
        ino,
        size: attr.size,
        blocks: attr.blocks(),
        atime: attr.mtime,
        mtime: attr.mtime,
        ctime: attr.mtime,
        crtime: attr.mtime,
        kind: to_file_type(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid,
        gid,
        rdev: 0,
        blksize: BLOCK_SIZE as u32,
        flags: 0,
    }
}

fn to_file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::Directory => FileType::Directory,
        NodeKind::File => FileType::RegularFile,
    }
}

/// Inode reported for listed entries the kernel has not looked up yet.
/// The kernel ignores it and issues a lookup; glibc skips zero.
const UNLISTED_INO: u64 = 0xffff_ffff;

/// `.`, `..` and the children of `path`, numbered without growing the table.
fn dir_listing(
    inodes: &InodeTable,
    ino: InodeId,
    path: &str,
    entries: Vec<DirEntry>,
) -> Vec<(u64, FileType, String)> {
    let (parent_path, _) = split_path(path);
    let parent_ino = inodes.find(&parent_path).unwrap_or(ROOT_INODE);
    let mut listing = Vec::with_capacity(entries.len() + 2);
    listing.push((ino, FileType::Directory, ".".to_string()));
    listing.push((parent_ino, FileType::Directory, "..".to_string()));
    for entry in entries {
        let child = inodes
            .find(&join(path, &entry.name))
            .unwrap_or(UNLISTED_INO);
        listing.push((child, to_file_type(entry.kind), entry.name));
    }
    listing
}

macro_rules! path_or_reply {
    ($inodes:expr, $ino:expr, $reply:ident) => {
        match $inodes.path($ino) {
            Some(path) => path,
            None => {
                $reply.error(libc::ENOENT);
                return;
            }
        }
    };
}

macro_rules! child_or_reply {
    ($inodes:expr, $parent:expr, $name:expr, $reply:ident) => {
        match $inodes.child_path($parent, &$name.to_string_lossy()) {
            Some(path) => path,
            None => {
                $reply.error(libc::ENOENT);
                return;
            }
        }
    };
}

impl<F: FilesystemOps + 'static> Filesystem for MtpFuse<F> {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        debug!("mtpfs init");
        self.ops.init().map_err(|e| e.to_errno())
    }

    fn destroy(&mut self) {
        debug!("mtpfs destroy");
        self.ops.destroy();
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup parent={} name={}", parent, name.to_string_lossy());
        let path = child_or_reply!(self.inodes, parent, name, reply);
        self.reply_entry(req, &path, reply);
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        debug!("forget ino={} nlookup={}", ino, nlookup);
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let path = path_or_reply!(self.inodes, ino, reply);
        self.reply_attr(req, ino, &path, reply);
    }

    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!("setattr ino={} mode={:?} size={:?}", ino, mode, size);
        let path = path_or_reply!(self.inodes, ino, reply);

        let mut result = Ok(());
        if let Some(size) = size {
            result = self.ops.truncate(&path, size);
        }
        if let Some(mode) = mode.filter(|_| result.is_ok()) {
            result = self.ops.chmod(&path, mode);
        }
        if result.is_ok() && (uid.is_some() || gid.is_some()) {
            result = self.ops.chown(&path, uid, gid);
        }
        if let Some(mtime) = mtime.filter(|_| result.is_ok()) {
            let mtime = match mtime {
                TimeOrNow::SpecificTime(t) => t,
                TimeOrNow::Now => SystemTime::now(),
            };
            result = self.ops.utimens(&path, mtime);
        }

        match result {
            Ok(()) => self.reply_attr(req, ino, &path, reply),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        debug!("mknod parent={} name={}", parent, name.to_string_lossy());
        let path = child_or_reply!(self.inodes, parent, name, reply);
        match self.ops.mknod(&path, mode & !umask) {
            Ok(()) => self.reply_entry(req, &path, reply),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir parent={} name={}", parent, name.to_string_lossy());
        let path = child_or_reply!(self.inodes, parent, name, reply);
        match self.ops.mkdir(&path, mode & !umask) {
            Ok(()) => self.reply_entry(req, &path, reply),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = child_or_reply!(self.inodes, parent, name, reply);
        match self.ops.unlink(&path) {
            Ok(()) => {
                self.inodes.unlink(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = child_or_reply!(self.inodes, parent, name, reply);
        match self.ops.rmdir(&path) {
            Ok(()) => {
                self.inodes.unlink(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        let from = child_or_reply!(self.inodes, parent, name, reply);
        let to = child_or_reply!(self.inodes, newparent, newname, reply);
        if flags & libc::RENAME_EXCHANGE != 0 {
            reply.error(libc::EINVAL);
            return;
        }
        if flags & libc::RENAME_NOREPLACE != 0 && self.ops.getattr(&to).is_ok() {
            reply.error(libc::EEXIST);
            return;
        }
        match self.ops.rename(&from, &to) {
            Ok(()) => {
                self.inodes.rename(&from, &to);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = path_or_reply!(self.inodes, ino, reply);
        match self.ops.open(&path, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = path_or_reply!(self.inodes, ino, reply);
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.ops.read(&path, fh, size, offset) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let path = path_or_reply!(self.inodes, ino, reply);
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.ops.write(&path, fh, data, offset) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn flush(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        let path = path_or_reply!(self.inodes, ino, reply);
        match self.ops.flush(&path, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let path = path_or_reply!(self.inodes, ino, reply);
        match self.ops.release(&path, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        let path = path_or_reply!(self.inodes, ino, reply);
        match self.ops.fsync(&path, fh, datasync) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let path = path_or_reply!(self.inodes, ino, reply);
        match self.ops.opendir(&path) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir ino={} offset={}", ino, offset);
        let path = path_or_reply!(self.inodes, ino, reply);
        let entries = match self.ops.readdir(&path) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        let listing = dir_listing(&self.inodes, ino, &path, entries);
        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (child, kind, name)) in listing.into_iter().enumerate().skip(skip) {
            if reply.add(child, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        let path = path_or_reply!(self.inodes, ino, reply);
        match self.ops.releasedir(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn fsyncdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _datasync: bool,
        reply: ReplyEmpty,
    ) {
        let path = path_or_reply!(self.inodes, ino, reply);
        match self.ops.fsyncdir(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let path = self.inodes.path(ino).unwrap_or_else(|| "/".to_string());
        match self.ops.statfs(&path) {
            Ok(st) => reply.statfs(
                st.blocks, st.bfree, st.bavail, 0, 0, st.bsize, st.namelen, st.bsize,
            ),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let path = path_or_reply!(self.inodes, ino, reply);
        match self.ops.setxattr(&path, &name.to_string_lossy(), value) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        let path = path_or_reply!(self.inodes, ino, reply);
        let name = name.to_string_lossy().into_owned();
        let key = (ino, name);
        let value = match self.pending_xattrs.remove(&key) {
            Some(value) => value,
            None => match self.ops.getxattr(&path, &key.1) {
                Ok(value) => value,
                Err(e) => {
                    reply.error(e.to_errno());
                    return;
                }
            },
        };

        if size == 0 {
            reply.size(value.len() as u32);
            self.pending_xattrs.insert(key, value);
        } else if value.len() > size as usize {
            reply.error(
                FuseError::Range {
                    len: value.len(),
                    size,
                }
                .to_errno(),
            );
        } else {
            reply.data(&value);
        }
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("create parent={} name={}", parent, name.to_string_lossy());
        let path = child_or_reply!(self.inodes, parent, name, reply);
        let fh = match self.ops.create(&path, mode & !umask, flags) {
            Ok(fh) => fh,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };
        match self.ops.getattr(&path) {
            Ok(attr) => {
                let ino = self.inodes.lookup(&path);
                let file_attr = to_file_attr(ino, &attr, req.uid(), req.gid());
                reply.created(&self.config.entry_timeout, &file_attr, 0, fh, 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }
}
