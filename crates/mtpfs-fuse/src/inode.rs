//! Inode numbers for the path-based operation table.
//!
//! The kernel speaks inode numbers, the dispatcher speaks paths. The table
//! hands out a number per path on lookup and keeps the kernel's lookup count
//! so entries can be dropped on `forget`.

use std::collections::HashMap;

use crate::path::join;

pub type InodeId = u64;
pub const ROOT_INODE: InodeId = 1;

#[derive(Debug, Clone)]
pub struct InodeEntry {
    pub ino: InodeId,
    pub path: String,
    pub lookup_count: u64,
}

pub struct InodeTable {
    entries: HashMap<InodeId, InodeEntry>,
    by_path: HashMap<String, InodeId>,
    next_ino: InodeId,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut table = InodeTable {
            entries: HashMap::new(),
            by_path: HashMap::new(),
            next_ino: ROOT_INODE + 1,
        };
        table.entries.insert(
            ROOT_INODE,
            InodeEntry {
                ino: ROOT_INODE,
                path: "/".to_string(),
                lookup_count: 1,
            },
        );
        table.by_path.insert("/".to_string(), ROOT_INODE);
        table
    }

    pub fn get(&self, ino: InodeId) -> Option<&InodeEntry> {
        self.entries.get(&ino)
    }

    pub fn path(&self, ino: InodeId) -> Option<String> {
        self.entries.get(&ino).map(|e| e.path.clone())
    }

    pub fn child_path(&self, parent: InodeId, name: &str) -> Option<String> {
        self.entries.get(&parent).map(|p| join(&p.path, name))
    }

    pub fn find(&self, path: &str) -> Option<InodeId> {
        self.by_path.get(path).copied()
    }

    fn ino_for(&mut self, path: &str) -> InodeId {
        if let Some(&ino) = self.by_path.get(path) {
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.entries.insert(
            ino,
            InodeEntry {
                ino,
                path: path.to_string(),
                lookup_count: 0,
            },
        );
        self.by_path.insert(path.to_string(), ino);
        ino
    }

    /// Number for `path`, counting one kernel lookup.
    pub fn lookup(&mut self, path: &str) -> InodeId {
        let ino = self.ino_for(path);
        if let Some(entry) = self.entries.get_mut(&ino) {
            entry.lookup_count += 1;
        }
        ino
    }

    pub fn forget(&mut self, ino: InodeId, n: u64) {
        if ino == ROOT_INODE {
            return;
        }
        let should_remove = match self.entries.get_mut(&ino) {
            Some(entry) => {
                entry.lookup_count = entry.lookup_count.saturating_sub(n);
                entry.lookup_count == 0
            }
            None => false,
        };
        if should_remove {
            if let Some(entry) = self.entries.remove(&ino) {
                if self.by_path.get(&entry.path) == Some(&ino) {
                    self.by_path.remove(&entry.path);
                }
            }
        }
    }

    /// Detaches `path` after unlink or rmdir. The number stays valid until forgotten.
    pub fn unlink(&mut self, path: &str) {
        self.by_path.remove(path);
    }

    /// Rewrites `from` and everything below it to live under `to`.
    pub fn rename(&mut self, from: &str, to: &str) {
        self.by_path.remove(to);
        let prefix = format!("{}/", from.trim_end_matches('/'));
        let moved: Vec<InodeId> = self
            .entries
            .values()
            .filter(|e| e.ino != ROOT_INODE && (e.path == from || e.path.starts_with(&prefix)))
            .map(|e| e.ino)
            .collect();
        for ino in moved {
            if let Some(entry) = self.entries.get_mut(&ino) {
                let new_path = format!("{}{}", to, &entry.path[from.len()..]);
                self.by_path.remove(&entry.path);
                self.by_path.insert(new_path.clone(), ino);
                entry.path = new_path;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
