//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use mtpfs_device::{Capabilities, DeviceConfig, DeviceInfo, MemoryDevice, MtpDevice, StorageId};
use mtpfs_fuse::policy::LocalAccountService;
use mtpfs_fuse::{FilesystemOps, MtpFileSystem};
use std::sync::Arc;
use tempfile::TempDir;

pub const STORAGE_CAPACITY: u64 = 64 * 1024 * 1024;
pub const FOREGROUND_USER: i32 = 100;

/// Knobs for building a [`TestMount`].
pub struct TestOptions {
    pub capabilities: Capabilities,
    pub config: DeviceConfig,
    pub capacity: u64,
    pub device_info: Option<DeviceInfo>,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            capabilities: Capabilities::all(),
            config: DeviceConfig {
                event_poll_interval_ms: 10,
                ..DeviceConfig::default()
            },
            capacity: STORAGE_CAPACITY,
            device_info: None,
        }
    }
}

/// Capabilities of a device without partial object I/O.
pub fn whole_object_only() -> Capabilities {
    Capabilities {
        get_partial_object: false,
        send_partial_object: false,
        edit_objects: true,
    }
}

/// An initialised filesystem context over an emulated device with a single
/// storage named `Internal`.
pub struct TestMount {
    pub remote: MemoryDevice,
    pub storage: StorageId,
    pub device: Arc<MtpDevice>,
    pub accounts: Arc<LocalAccountService>,
    pub fs: MtpFileSystem,
    pub scratch: TempDir,
}

impl TestMount {
    /// Partial I/O capable device.
    pub fn new() -> Self {
        Self::with_options(TestOptions::default())
    }

    /// Device that only moves whole objects, so every open is staged locally.
    pub fn staged() -> Self {
        Self::with_options(TestOptions {
            capabilities: whole_object_only(),
            ..TestOptions::default()
        })
    }

    pub fn with_options(opts: TestOptions) -> Self {
        let mut remote = MemoryDevice::new().with_capabilities(opts.capabilities);
        if let Some(info) = opts.device_info {
            remote = remote.with_device_info(info);
        }
        let storage = remote.add_storage("Internal", opts.capacity);
        let device = MtpDevice::new(Arc::new(remote.clone()), opts.config).unwrap();
        device.connect_by_index(0).unwrap();
        let accounts = Arc::new(LocalAccountService::new(FOREGROUND_USER));
        let scratch = tempfile::tempdir().unwrap();
        let fs = MtpFileSystem::new(device.clone(), accounts.clone(), scratch.path()).unwrap();
        fs.init().unwrap();
        TestMount {
            remote,
            storage,
            device,
            accounts,
            fs,
            scratch,
        }
    }

    /// Creates or overwrites `path` with `data` through create/write/release.
    pub fn write_file(&self, path: &str, data: &[u8]) {
        let fh = self.fs.create(path, 0o644, libc::O_RDWR).unwrap();
        self.fs.write(path, fh, data, 0).unwrap();
        self.fs.release(path, fh).unwrap();
    }

    pub fn read_file(&self, path: &str) -> Vec<u8> {
        let fh = self.fs.open(path, libc::O_RDONLY).unwrap();
        let data = self.fs.read(path, fh, 1 << 20, 0).unwrap();
        self.fs.release(path, fh).unwrap();
        data
    }

    /// Object id of a top-level entry of the storage.
    pub fn remote_id(&self, name: &str) -> Option<u32> {
        self.remote.find(self.storage, None, name)
    }

    pub fn remote_data(&self, name: &str) -> Option<Vec<u8>> {
        self.remote_id(name).and_then(|id| self.remote.data(id))
    }
}

impl Drop for TestMount {
    fn drop(&mut self) {
        self.fs.destroy();
        self.device.disconnect();
    }
}
