//! Local scratch copies backing open remote files.
//!
//! A `StagedFile` lives while at least one descriptor is open on it. The
//! pool owns a per-mount scratch directory that is created at mount and
//! removed recursively at unmount.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::name_hash::name_hash;
use crate::path::rebase;

/// Prefix of per-mount scratch directories.
pub const SCRATCH_PREFIX: &str = "simple-mtpfs";

#[derive(Debug)]
pub struct StagedFile {
    remote_path: String,
    local_path: PathBuf,
    handles: HashMap<u64, Arc<File>>,
    modified: bool,
}

impl StagedFile {
    pub fn new(remote_path: &str, local_path: PathBuf) -> Self {
        StagedFile {
            remote_path: remote_path.to_string(),
            local_path,
            handles: HashMap::new(),
            modified: false,
        }
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn ref_count(&self) -> usize {
        self.handles.len()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    pub fn add_handle(&mut self, fh: u64, file: File) {
        self.handles.insert(fh, Arc::new(file));
    }

    pub fn handle(&self, fh: u64) -> Option<Arc<File>> {
        self.handles.get(&fh).cloned()
    }

    pub fn remove_handle(&mut self, fh: u64) -> Option<Arc<File>> {
        self.handles.remove(&fh)
    }

    pub fn local_size(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.local_path)?.len())
    }
}

pub struct StagingPool {
    scratch_dir: PathBuf,
    counter: AtomicU64,
    staged: HashMap<String, StagedFile>,
    removed: bool,
}

impl StagingPool {
    /// Creates a fresh scratch directory under `root`, deleting directories
    /// left behind by earlier runs.
    pub fn create(root: &Path) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        remove_stale_scratch_dirs(root);
        let pid = std::process::id();
        let seed = format!("{}:{:?}", pid, SystemTime::now());
        let scratch_dir = root.join(format!(
            "{}-{}-{}",
            SCRATCH_PREFIX,
            pid,
            &name_hash(&seed)[..6]
        ));
        fs::create_dir(&scratch_dir)?;
        debug!("scratch directory {}", scratch_dir.display());
        Ok(StagingPool {
            scratch_dir,
            counter: AtomicU64::new(0),
            staged: HashMap::new(),
            removed: false,
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// A new scratch path for `remote`. Never repeats within one pool.
    pub fn make_scratch_path(&self, remote: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::AcqRel);
        self.scratch_dir.join(name_hash(&format!("{}{}", remote, n)))
    }

    pub fn get(&self, remote: &str) -> Option<&StagedFile> {
        self.staged.get(remote)
    }

    pub fn get_mut(&mut self, remote: &str) -> Option<&mut StagedFile> {
        self.staged.get_mut(remote)
    }

    pub fn insert(&mut self, file: StagedFile) {
        self.staged.insert(file.remote_path.clone(), file);
    }

    pub fn remove(&mut self, remote: &str) -> Option<StagedFile> {
        self.staged.remove(remote)
    }

    /// Moves staged entries at or under `from` to `to`, so their uploads
    /// follow the rename. Returns how many moved.
    pub fn rekey(&mut self, from: &str, to: &str) -> usize {
        let moved: Vec<(String, String)> = self
            .staged
            .keys()
            .filter_map(|key| rebase(key, from, to).map(|new| (key.clone(), new)))
            .collect();
        for (old, new) in &moved {
            if let Some(mut file) = self.staged.remove(old) {
                file.remote_path = new.clone();
                self.staged.insert(new.clone(), file);
            }
        }
        moved.len()
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn remove_scratch_dir(&mut self) -> io::Result<()> {
        self.staged.clear();
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        match fs::remove_dir_all(&self.scratch_dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for StagingPool {
    fn drop(&mut self) {
        if let Err(e) = self.remove_scratch_dir() {
            warn!(
                "failed to remove scratch directory {}: {}",
                self.scratch_dir.display(),
                e
            );
        }
    }
}

/// Owner pid encoded in a scratch directory name, if any.
fn scratch_owner(name: &str) -> Option<libc::pid_t> {
    name.strip_prefix(SCRATCH_PREFIX)?
        .strip_prefix('-')?
        .split('-')
        .next()?
        .parse()
        .ok()
}

fn process_alive(pid: libc::pid_t) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 only checks that `pid` exists.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Removes scratch directories left behind by mounts that are no longer
/// running. Directories owned by a live process are kept.
fn remove_stale_scratch_dirs(root: &Path) {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cannot scan {}: {}", root.display(), e);
            return;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(SCRATCH_PREFIX)
            || !entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
        {
            continue;
        }
        if scratch_owner(&name).is_some_and(process_alive) {
            debug!("keeping scratch directory {} of a running mount", name);
            continue;
        }
        debug!("removing stale scratch directory {}", entry.path().display());
        if let Err(e) = fs::remove_dir_all(entry.path()) {
            warn!("failed to remove {}: {}", entry.path().display(), e);
        }
    }
}
