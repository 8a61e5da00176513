//! Integration tests for the filesystem dispatcher over an emulated device.
//!
//! These tests drive `MtpFileSystem` through its path-based operation table
//! the way the FUSE adapter does and check what reaches the device.

mod common;

use common::{TestMount, TestOptions};
use mtpfs_device::{DeviceConfig, DeviceEvent, DeviceInfo};
use mtpfs_fuse::dispatcher::NodeKind;
use mtpfs_fuse::policy::MTP_WRITE_CONSTRAINT;
use mtpfs_fuse::{FilesystemOps, FuseError};
use std::thread;
use std::time::{Duration, SystemTime};

fn errno<T: std::fmt::Debug>(result: Result<T, FuseError>) -> i32 {
    result.unwrap_err().to_errno()
}

fn names(mount: &TestMount, path: &str) -> Vec<String> {
    let mut names: Vec<String> = mount
        .fs
        .readdir(path)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    names.sort();
    names
}

#[test]
fn test_parent_segments_rejected_without_transport() {
    let mount = TestMount::new();
    mount.remote.reset_stats();
    let fs = &mount.fs;

    for path in ["/../etc", "/a/..", "/a/../b", "/a/%2e%2e%2fb", "/a\\..\\b", ""] {
        let results = [
            errno(fs.getattr(path)),
            errno(fs.mknod(path, libc::S_IFREG | 0o644)),
            errno(fs.mkdir(path, 0o755)),
            errno(fs.unlink(path)),
            errno(fs.rmdir(path)),
            errno(fs.rename(path, "/ok")),
            errno(fs.rename("/ok", path)),
            errno(fs.chmod(path, 0o600)),
            errno(fs.chown(path, Some(0), None)),
            errno(fs.truncate(path, 0)),
            errno(fs.utimens(path, SystemTime::now())),
            errno(fs.open(path, libc::O_RDONLY)),
            errno(fs.create(path, 0o644, libc::O_RDWR)),
            errno(fs.read(path, 1, 10, 0)),
            errno(fs.write(path, 1, b"x", 0)),
            errno(fs.flush(path, 1)),
            errno(fs.release(path, 1)),
            errno(fs.fsync(path, 1, false)),
            errno(fs.opendir(path)),
            errno(fs.readdir(path)),
            errno(fs.releasedir(path)),
            errno(fs.fsyncdir(path)),
            errno(fs.statfs(path)),
            errno(fs.setxattr(path, "user.rmdir", b"")),
            errno(fs.getxattr(path, "user.isDirFetched")),
        ];
        assert!(results.iter().all(|&e| e == libc::EINVAL), "{:?}: {:?}", path, results);
    }
    assert_eq!(mount.remote.stats().total(), 0);
}

#[test]
fn test_round_trip_with_partial_io() {
    let mount = TestMount::new();
    mount.write_file("/a.txt", b"hello world");
    assert_eq!(mount.read_file("/a.txt"), b"hello world");
    assert_eq!(mount.remote_data("a.txt").unwrap(), b"hello world");

    let stats = mount.remote.stats();
    assert!(stats.send_partial > 0);
    assert!(stats.get_partial > 0);
    assert_eq!(stats.get_object, 0);
}

#[test]
fn test_round_trip_with_staging() {
    let mount = TestMount::staged();
    mount.write_file("/a.txt", b"hello world");
    assert_eq!(mount.remote_data("a.txt").unwrap(), b"hello world");
    assert_eq!(mount.read_file("/a.txt"), b"hello world");

    let stats = mount.remote.stats();
    assert_eq!(stats.send_partial, 0);
    assert_eq!(stats.get_partial, 0);
    assert_eq!(stats.get_object, 1);
    assert_eq!(mount.fs.staged_count(), 0);
}

#[test]
fn test_upload_only_on_last_release() {
    let mount = TestMount::staged();
    let path = "/r.bin";
    mount.write_file(path, b"old");

    let fhs: Vec<u64> = (0..3)
        .map(|_| mount.fs.open(path, libc::O_RDWR).unwrap())
        .collect();
    assert_eq!(mount.remote.stats().get_object, 1);
    mount.fs.write(path, fhs[1], b"new", 0).unwrap();
    mount.remote.reset_stats();

    mount.fs.release(path, fhs[0]).unwrap();
    mount.fs.release(path, fhs[1]).unwrap();
    assert_eq!(mount.remote.stats().send_object, 0);
    assert_eq!(mount.fs.staged_count(), 1);

    mount.fs.release(path, fhs[2]).unwrap();
    assert_eq!(mount.remote.stats().send_object, 1);
    assert_eq!(mount.remote_data("r.bin").unwrap(), b"new");
    assert_eq!(mount.fs.staged_count(), 0);
}

#[test]
fn test_unmodified_release_does_not_upload() {
    let mount = TestMount::staged();
    mount.write_file("/q.bin", b"data");
    mount.remote.reset_stats();
    assert_eq!(mount.read_file("/q.bin"), b"data");
    assert_eq!(mount.remote.stats().send_object, 0);
}

#[test]
fn test_release_unknown_handle() {
    let mount = TestMount::staged();
    mount.write_file("/h.bin", b"x");
    assert_eq!(errno(mount.fs.release("/h.bin", 9999)), libc::EBADF);
}

#[test]
fn test_getattr_reports_staged_size() {
    let mount = TestMount::staged();
    mount.write_file("/g.bin", b"abc");
    let fh = mount.fs.open("/g.bin", libc::O_RDWR).unwrap();
    mount.fs.write("/g.bin", fh, b"0123456789", 0).unwrap();
    assert_eq!(mount.fs.getattr("/g.bin").unwrap().size, 10);
    assert_eq!(mount.remote_data("g.bin").unwrap(), b"abc");
    mount.fs.release("/g.bin", fh).unwrap();
    assert_eq!(mount.fs.getattr("/g.bin").unwrap().size, 10);
}

#[test]
fn test_write_only_open_truncates() {
    let mount = TestMount::staged();
    mount.write_file("/w.txt", b"long old contents");
    let fh = mount.fs.open("/w.txt", libc::O_WRONLY).unwrap();
    mount.fs.write("/w.txt", fh, b"short", 0).unwrap();
    mount.fs.release("/w.txt", fh).unwrap();
    assert_eq!(mount.remote_data("w.txt").unwrap(), b"short");
}

#[test]
fn test_write_only_open_truncates_with_partial_io() {
    let mount = TestMount::new();
    mount.write_file("/w.txt", b"long old contents");
    let fh = mount.fs.open("/w.txt", libc::O_WRONLY).unwrap();
    mount.fs.write("/w.txt", fh, b"short", 0).unwrap();
    mount.fs.release("/w.txt", fh).unwrap();
    assert_eq!(mount.remote_data("w.txt").unwrap(), b"short");
    assert_eq!(mount.fs.getattr("/w.txt").unwrap().size, 5);

    let fh = mount.fs.open("/w.txt", libc::O_RDWR | libc::O_TRUNC).unwrap();
    mount.fs.write("/w.txt", fh, b"ab", 0).unwrap();
    mount.fs.release("/w.txt", fh).unwrap();
    assert_eq!(mount.read_file("/w.txt"), b"ab");
}

#[test]
fn test_truncating_open_without_writes_empties_file() {
    for mount in [TestMount::new(), TestMount::staged()] {
        mount.write_file("/t.txt", b"abc");
        let fh = mount.fs.open("/t.txt", libc::O_WRONLY).unwrap();
        mount.fs.release("/t.txt", fh).unwrap();
        assert_eq!(mount.remote_data("t.txt").unwrap(), b"");
        assert_eq!(mount.fs.getattr("/t.txt").unwrap().size, 0);
        assert_eq!(mount.fs.staged_count(), 0);
    }
}

#[test]
fn test_read_only_open_keeps_contents() {
    let mount = TestMount::new();
    mount.write_file("/k.txt", b"keep");
    let fh = mount.fs.open("/k.txt", libc::O_RDONLY | libc::O_TRUNC).unwrap();
    mount.fs.release("/k.txt", fh).unwrap();
    assert_eq!(mount.remote_data("k.txt").unwrap(), b"keep");
}

#[test]
fn test_cross_directory_rename_needs_move() {
    let mount = TestMount::new();
    mount.fs.mkdir("/dir", 0o755).unwrap();
    mount.write_file("/f.txt", b"x");

    assert_eq!(errno(mount.fs.rename("/f.txt", "/dir/f.txt")), libc::EPERM);
    assert!(mount.fs.getattr("/f.txt").is_ok());

    mount.fs.rename("/f.txt", "/g.txt").unwrap();
    assert_eq!(errno(mount.fs.getattr("/f.txt")), libc::ENOENT);
    assert_eq!(mount.fs.getattr("/g.txt").unwrap().kind, NodeKind::File);
    assert!(mount.remote_id("g.txt").is_some());
}

#[test]
fn test_cross_directory_rename_with_move_enabled() {
    let mount = TestMount::with_options(TestOptions {
        config: DeviceConfig {
            enable_move: true,
            ..DeviceConfig::default()
        },
        ..TestOptions::default()
    });
    mount.fs.mkdir("/dir", 0o755).unwrap();
    mount.write_file("/f.txt", b"moved");

    mount.fs.rename("/f.txt", "/dir/f.txt").unwrap();
    assert_eq!(errno(mount.fs.getattr("/f.txt")), libc::ENOENT);
    assert_eq!(names(&mount, "/dir"), vec!["f.txt"]);
    assert_eq!(mount.read_file("/dir/f.txt"), b"moved");
}

#[test]
fn test_rename_of_staged_file_uploads_to_new_path() {
    let mount = TestMount::staged();
    mount.write_file("/s1.txt", b"one");
    let fh = mount.fs.open("/s1.txt", libc::O_RDWR).unwrap();
    mount.fs.write("/s1.txt", fh, b"two", 0).unwrap();

    mount.fs.rename("/s1.txt", "/s2.txt").unwrap();
    mount.fs.release("/s2.txt", fh).unwrap();

    assert!(mount.remote_id("s1.txt").is_none());
    assert_eq!(mount.remote_data("s2.txt").unwrap(), b"two");
}

#[test]
fn test_directory_rename_carries_staged_files() {
    let mount = TestMount::staged();
    mount.fs.mkdir("/d", 0o755).unwrap();
    mount.write_file("/d/f", b"one");
    let fh = mount.fs.open("/d/f", libc::O_RDWR).unwrap();
    mount.fs.write("/d/f", fh, b"two", 0).unwrap();

    mount.fs.rename("/d", "/e").unwrap();
    mount.fs.release("/e/f", fh).unwrap();

    assert_eq!(mount.fs.staged_count(), 0);
    assert_eq!(errno(mount.fs.getattr("/d/f")), libc::ENOENT);
    assert_eq!(mount.read_file("/e/f"), b"two");
}

#[test]
fn test_move_with_rename_keeps_target_namesake() {
    let mount = TestMount::with_options(TestOptions {
        config: DeviceConfig {
            enable_move: true,
            ..DeviceConfig::default()
        },
        ..TestOptions::default()
    });
    mount.fs.mkdir("/a", 0o755).unwrap();
    mount.fs.mkdir("/b", 0o755).unwrap();
    mount.write_file("/a/x", b"moved");
    mount.write_file("/b/x", b"stays");

    mount.fs.rename("/a/x", "/b/y").unwrap();
    assert_eq!(names(&mount, "/b"), vec!["x", "y"]);
    assert!(names(&mount, "/a").is_empty());
    assert_eq!(mount.read_file("/b/x"), b"stays");
    assert_eq!(mount.read_file("/b/y"), b"moved");
}

#[test]
fn test_unlink_while_open_does_not_resurrect() {
    let mount = TestMount::staged();
    mount.write_file("/gone.txt", b"x");
    let fh = mount.fs.open("/gone.txt", libc::O_RDWR).unwrap();
    mount.fs.write("/gone.txt", fh, b"yy", 0).unwrap();
    mount.fs.unlink("/gone.txt").unwrap();
    mount.remote.reset_stats();

    mount.fs.release("/gone.txt", fh).unwrap();
    assert_eq!(mount.remote.stats().send_object, 0);
    assert!(mount.remote_id("gone.txt").is_none());
    assert_eq!(errno(mount.fs.getattr("/gone.txt")), libc::ENOENT);
}

#[test]
fn test_upload_record_lifecycle() {
    let mount = TestMount::staged();
    let path = "/u.bin";
    let key = "user.isUploadCompleted";

    assert_eq!(errno(mount.fs.getxattr(path, key)), libc::ENODATA);

    mount.fs.setxattr(path, key, b"").unwrap();
    assert_eq!(mount.fs.getxattr(path, key).unwrap(), b"sending");
    assert_eq!(mount.fs.getxattr(path, key).unwrap(), b"sending");

    mount.write_file(path, b"payload");
    assert_eq!(mount.fs.getxattr(path, key).unwrap(), b"success");
    assert_eq!(errno(mount.fs.getxattr(path, key)), libc::ENODATA);
}

#[test]
fn test_failed_upload_recorded() {
    let mount = TestMount::staged();
    let path = "/fail.bin";
    let key = "user.isUploadCompleted";

    let fh = mount.fs.create(path, 0o644, libc::O_RDWR).unwrap();
    mount.fs.setxattr(path, key, b"").unwrap();
    mount.fs.write(path, fh, b"payload", 0).unwrap();
    mount.remote.fail_sends(true);

    assert!(mount.fs.release(path, fh).is_err());
    assert_eq!(mount.fs.getxattr(path, key).unwrap(), b"fail");
    assert_eq!(errno(mount.fs.getxattr(path, key)), libc::ENODATA);
    assert_eq!(mount.fs.staged_count(), 0);
}

#[test]
fn test_large_upload_runs_on_worker_pool() {
    let mount = TestMount::with_options(TestOptions {
        capabilities: common::whole_object_only(),
        config: DeviceConfig {
            async_push_threshold: 4,
            ..DeviceConfig::default()
        },
        ..TestOptions::default()
    });
    let path = "/big.bin";
    let key = "user.isUploadCompleted";

    let fh = mount.fs.create(path, 0o644, libc::O_RDWR).unwrap();
    mount.fs.setxattr(path, key, b"").unwrap();
    mount.fs.write(path, fh, b"more than four bytes", 0).unwrap();
    mount.fs.release(path, fh).unwrap();

    assert!(mount.device.workers().drain(Duration::from_secs(10)));
    assert_eq!(mount.fs.getxattr(path, key).unwrap(), b"success");
    assert_eq!(mount.remote_data("big.bin").unwrap(), b"more than four bytes");
}

#[test]
fn test_write_beyond_free_space_with_partial_io() {
    let mount = TestMount::with_options(TestOptions {
        capacity: 1024,
        ..TestOptions::default()
    });
    let fh = mount.fs.create("/big", 0o644, libc::O_RDWR).unwrap();
    mount.remote.reset_stats();

    assert_eq!(errno(mount.fs.write("/big", fh, &[0u8; 16], 1020)), libc::ENOSPC);
    assert_eq!(mount.remote.stats().send_partial, 0);

    assert_eq!(mount.fs.write("/big", fh, &[1u8; 16], 0).unwrap(), 16);
    mount.fs.release("/big", fh).unwrap();
}

#[test]
fn test_write_beyond_free_space_with_staging() {
    let mount = TestMount::with_options(TestOptions {
        capabilities: common::whole_object_only(),
        capacity: 1024,
        ..TestOptions::default()
    });
    let fh = mount.fs.create("/big", 0o644, libc::O_RDWR).unwrap();
    assert_eq!(errno(mount.fs.write("/big", fh, &[0u8; 2048], 0)), libc::ENOSPC);
    mount.fs.release("/big", fh).unwrap();
}

#[test]
fn test_single_storage_scenario() {
    let mount = TestMount::new();
    mount.remote.add_file(mount.storage, None, "hello.txt", b"hi");

    assert_eq!(names(&mount, "/"), vec!["hello.txt"]);
    let before = mount.fs.getattr("/").unwrap().mtime;
    thread::sleep(Duration::from_millis(20));

    mount.write_file("/a.txt", b"0123456789");
    let attr = mount.fs.getattr("/a.txt").unwrap();
    assert_eq!(attr.kind, NodeKind::File);
    assert_eq!(attr.size, 10);
    assert!(mount.fs.getattr("/").unwrap().mtime > before);
    assert_eq!(names(&mount, "/"), vec!["a.txt", "hello.txt"]);
}

#[test]
fn test_read_only_user() {
    let mount = TestMount::new();
    mount.write_file("/r.txt", b"data");
    mount
        .accounts
        .set_constraint(common::FOREGROUND_USER, MTP_WRITE_CONSTRAINT, true);

    assert_eq!(errno(mount.fs.mkdir("/d", 0o755)), libc::EROFS);
    assert_eq!(errno(mount.fs.create("/n.txt", 0o644, libc::O_RDWR)), libc::EROFS);
    assert_eq!(errno(mount.fs.open("/r.txt", libc::O_WRONLY)), libc::EROFS);
    assert_eq!(errno(mount.fs.unlink("/r.txt")), libc::EROFS);
    assert_eq!(errno(mount.fs.rename("/r.txt", "/s.txt")), libc::EROFS);
    assert_eq!(errno(mount.fs.setxattr("/r.txt", "user.rmdir", b"")), libc::EROFS);
    assert_eq!(mount.read_file("/r.txt"), b"data");

    mount.accounts.switch_user(101);
    mount.fs.mkdir("/d", 0o755).unwrap();
}

#[test]
fn test_mkdir_rmdir() {
    let mount = TestMount::new();
    mount.fs.mkdir("/photos", 0o755).unwrap();
    assert_eq!(mount.fs.getattr("/photos").unwrap().kind, NodeKind::Directory);
    assert_eq!(errno(mount.fs.mkdir("/photos", 0o755)), libc::EEXIST);

    mount.write_file("/photos/p.jpg", b"jpeg");
    assert_eq!(errno(mount.fs.rmdir("/photos")), libc::ENOTEMPTY);
    mount.fs.unlink("/photos/p.jpg").unwrap();
    mount.fs.rmdir("/photos").unwrap();
    assert_eq!(errno(mount.fs.getattr("/photos")), libc::ENOENT);
}

#[test]
fn test_mknod_regular_only() {
    let mount = TestMount::new();
    mount.fs.mknod("/empty", libc::S_IFREG | 0o644).unwrap();
    assert_eq!(mount.fs.getattr("/empty").unwrap().size, 0);
    assert_eq!(mount.remote_data("empty").unwrap(), b"");
    assert_eq!(errno(mount.fs.mknod("/empty", libc::S_IFREG | 0o644)), libc::EEXIST);
    assert_eq!(errno(mount.fs.mknod("/fifo", libc::S_IFIFO | 0o644)), libc::EINVAL);
    assert!(mount.remote_id("fifo").is_none());
}

#[test]
fn test_truncate_without_open_handle() {
    let mount = TestMount::staged();
    mount.write_file("/t.txt", b"abcdef");
    mount.fs.truncate("/t.txt", 3).unwrap();
    assert_eq!(mount.remote_data("t.txt").unwrap(), b"abc");
    assert_eq!(mount.fs.getattr("/t.txt").unwrap().size, 3);
}

#[test]
fn test_truncate_staged_copy() {
    let mount = TestMount::staged();
    mount.write_file("/t.txt", b"abcdef");
    let fh = mount.fs.open("/t.txt", libc::O_RDWR).unwrap();
    mount.fs.truncate("/t.txt", 2).unwrap();
    mount.fs.release("/t.txt", fh).unwrap();
    assert_eq!(mount.remote_data("t.txt").unwrap(), b"ab");
}

#[test]
fn test_utimens_and_chmod() {
    let mount = TestMount::new();
    mount.write_file("/m.txt", b"x");
    let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_500_000_000);
    mount.fs.utimens("/m.txt", when).unwrap();
    assert_eq!(mount.fs.getattr("/m.txt").unwrap().mtime, when);

    mount.remote.reset_stats();
    mount.fs.chmod("/m.txt", 0o600).unwrap();
    mount.fs.chown("/m.txt", Some(1000), Some(1000)).unwrap();
    assert_eq!(mount.remote.stats().total(), 0);
    assert_eq!(errno(mount.fs.chmod("/missing", 0o600)), libc::ENOENT);
}

#[test]
fn test_statfs_uses_storage_sizes() {
    let mount = TestMount::new();
    let st = mount.fs.statfs("/").unwrap();
    assert_eq!(st.bsize, 1024);
    assert_eq!(st.namelen, 255);
    assert_eq!(st.blocks, common::STORAGE_CAPACITY / 1024);
    assert_eq!(st.bfree, st.blocks);

    mount.write_file("/s.bin", &[7u8; 4096]);
    let st = mount.fs.statfs("/").unwrap();
    assert_eq!(st.bfree, st.blocks - 4);
}

#[test]
fn test_thumbnail_reads() {
    let mount = TestMount::new();
    let id = mount.remote.add_file(mount.storage, None, "p.jpg", b"full image");
    mount.remote.set_thumbnail(id, b"THUMB");

    assert_eq!(mount.fs.getattr("/p.jpg#thumb").unwrap().size, 5);
    let fh = mount.fs.open("/p.jpg#thumb", libc::O_RDONLY).unwrap();
    assert_eq!(mount.fs.read("/p.jpg#thumb", fh, 3, 1).unwrap(), b"HUM");
    mount.fs.release("/p.jpg#thumb", fh).unwrap();
    assert_eq!(mount.remote.stats().get_thumbnail, 1);

    assert_eq!(errno(mount.fs.getattr("/missing.jpg#thumb")), libc::ENOENT);
}

#[test]
fn test_control_queries() {
    let mount = TestMount::new();
    let fs = &mount.fs;

    assert_eq!(fs.getxattr("/", "user.getfriendlyname").unwrap(), b"Emulated MTP Device");
    assert_eq!(fs.getxattr("/", "user.isOpenHarmonyMtpDevice").unwrap(), b"false");

    fs.readdir("/").unwrap();
    assert_eq!(fs.getxattr("/", "user.isDirFetched").unwrap(), b"true");

    assert_eq!(fs.getxattr("/", "user.isptpmode").unwrap(), b"false");
    fs.setxattr("/", "user.isptpmode", b"true").unwrap();
    assert_eq!(fs.getxattr("/", "user.isptpmode").unwrap(), b"true");

    mount.write_file("/f.txt", b"x");
    assert_eq!(fs.getxattr("/", "user.queryMtpIsInUse").unwrap(), b"false");
    let fh = fs.open("/f.txt", libc::O_RDONLY).unwrap();
    assert_eq!(fs.getxattr("/", "user.queryMtpIsInUse").unwrap(), b"true");
    fs.release("/f.txt", fh).unwrap();

    fs.setxattr("/f.txt", "user.cancelcopy", b"").unwrap();
    fs.setxattr("/f.txt", "user.unknown", b"v").unwrap();
    assert!(fs.getxattr("/f.txt", "user.unknown").unwrap().is_empty());
    assert_eq!(errno(fs.setxattr("/", "user.getfriendlyname", b"x")), libc::EINVAL);
}

#[test]
fn test_open_harmony_detection() {
    let mount = TestMount::with_options(TestOptions {
        device_info: Some(DeviceInfo {
            manufacturer: "Huawei".to_string(),
            model: "Mate".to_string(),
            version: "OpenHarmony-4.1".to_string(),
            serial: "0001".to_string(),
            friendly_name: "Mate".to_string(),
        }),
        ..TestOptions::default()
    });
    assert_eq!(mount.fs.getxattr("/", "user.isOpenHarmonyMtpDevice").unwrap(), b"true");
    assert_eq!(mount.fs.getxattr("/", "user.getfriendlyname").unwrap(), b"Mate");
}

#[test]
fn test_rmdir_control_removes_non_empty_directory() {
    let mount = TestMount::new();
    mount.fs.mkdir("/full", 0o755).unwrap();
    mount.fs.mkdir("/full/sub", 0o755).unwrap();
    mount.write_file("/full/sub/a.txt", b"a");

    mount.fs.setxattr("/full", "user.rmdir", b"").unwrap();
    assert_eq!(errno(mount.fs.getattr("/full")), libc::ENOENT);
    assert!(mount.remote_id("full").is_none());
}

#[test]
fn test_fetchcontent_reloads_listing() {
    let mount = TestMount::new();
    assert!(names(&mount, "/").is_empty());
    mount.remote.add_file(mount.storage, None, "late.txt", b"late");
    mount.fs.setxattr("/", "user.fetchcontent", b"").unwrap();
    assert_eq!(names(&mount, "/"), vec!["late.txt"]);
}

#[test]
fn test_remove_event_drops_cached_entry() {
    let mount = TestMount::new();
    let id = mount.remote.add_file(mount.storage, None, "ev.txt", b"x");
    assert_eq!(names(&mount, "/"), vec!["ev.txt"]);

    mount.remote.remove_object(id);
    mount.remote.push_event(DeviceEvent::ObjectRemoved(id));

    let mut gone = false;
    for _ in 0..200 {
        if mount.fs.getattr("/ev.txt").is_err() {
            gone = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(gone);
}
