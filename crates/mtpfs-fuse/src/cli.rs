use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::path::PathBuf;

use crate::mount::{merge_mount_options, MountOptions};

#[derive(Parser, Debug)]
#[command(name = "mtpfs")]
#[command(about = "Mount an MTP device as a FUSE filesystem", long_about = None)]
pub struct Cli {
    /// [DEVICE_FILE] <MOUNTPOINT>; the device file is /dev/bus/usb/BBB/DDD
    #[arg(value_name = "PATH", num_args = 1..=2, required = true)]
    pub paths: Vec<PathBuf>,

    /// Mount the N-th detected device, counting from 1
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub device: Option<u32>,

    #[arg(short, long)]
    pub verbose: bool,

    /// Comma separated mount options
    #[arg(short = 'o', value_name = "OPTIONS")]
    pub options: Vec<String>,

    /// Permit cross-directory renames
    #[arg(long)]
    pub enable_move: bool,

    #[arg(short, long, env = "MTPFS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Serve the in-memory device described by the `[emulated]` config table
    #[arg(long)]
    pub emulate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    First,
    /// Zero-based position in detection order.
    Index(usize),
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct MountRequest {
    pub selector: DeviceSelector,
    pub mountpoint: PathBuf,
    pub options: MountOptions,
    pub verbose: bool,
    pub config: Option<PathBuf>,
    pub emulate: bool,
}

impl Cli {
    /// Checks argument combinations clap cannot express.
    pub fn into_request(self) -> Result<MountRequest, clap::Error> {
        let mut cmd = Cli::command();
        let (device_file, mountpoint) = match self.paths.as_slice() {
            [mountpoint] => (None, mountpoint.clone()),
            [device_file, mountpoint] => (Some(device_file.clone()), mountpoint.clone()),
            _ => {
                return Err(cmd.error(
                    ErrorKind::WrongNumberOfValues,
                    "expected [DEVICE_FILE] <MOUNTPOINT>",
                ))
            }
        };

        let selector = match (device_file, self.device) {
            (Some(_), Some(_)) => {
                return Err(cmd.error(
                    ErrorKind::ArgumentConflict,
                    "--device cannot be combined with a device file",
                ))
            }
            (Some(file), None) => DeviceSelector::File(file),
            (None, Some(n)) => DeviceSelector::Index(n as usize - 1),
            (None, None) => DeviceSelector::First,
        };

        let mut options = MountOptions::default();
        for opts in &self.options {
            merge_mount_options(&mut options, opts)
                .map_err(|e| cmd.error(ErrorKind::InvalidValue, e.to_string()))?;
        }
        if self.enable_move {
            options.enable_move = true;
        }

        Ok(MountRequest {
            selector,
            mountpoint,
            options,
            verbose: self.verbose,
            config: self.config,
            emulate: self.emulate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(args: &[&str]) -> Result<MountRequest, clap::Error> {
        Cli::try_parse_from(args)?.into_request()
    }

    #[test]
    fn test_mountpoint_only() {
        let req = request(&["mtpfs", "/mnt/phone"]).unwrap();
        assert_eq!(req.mountpoint, PathBuf::from("/mnt/phone"));
        assert_eq!(req.selector, DeviceSelector::First);
        assert!(!req.verbose);
    }

    #[test]
    fn test_device_file_and_mountpoint() {
        let req = request(&["mtpfs", "/dev/bus/usb/001/004", "/mnt/phone"]).unwrap();
        assert_eq!(
            req.selector,
            DeviceSelector::File(PathBuf::from("/dev/bus/usb/001/004"))
        );
        assert_eq!(req.mountpoint, PathBuf::from("/mnt/phone"));
    }

    #[test]
    fn test_device_index_is_one_based() {
        let req = request(&["mtpfs", "--device", "2", "/mnt/phone"]).unwrap();
        assert_eq!(req.selector, DeviceSelector::Index(1));
        assert!(request(&["mtpfs", "--device", "0", "/mnt/phone"]).is_err());
    }

    #[test]
    fn test_device_conflicts_with_file() {
        let err = request(&["mtpfs", "--device", "1", "/dev/bus/usb/001/004", "/mnt"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_missing_mountpoint() {
        assert!(request(&["mtpfs"]).is_err());
        assert!(request(&["mtpfs", "-v"]).is_err());
    }

    #[test]
    fn test_too_many_paths() {
        assert!(request(&["mtpfs", "/a", "/b", "/c"]).is_err());
    }

    #[test]
    fn test_mount_options_and_enable_move() {
        let req = request(&["mtpfs", "-o", "allow_other", "-o", "enable-move", "-v", "/mnt"]).unwrap();
        assert!(req.options.allow_other);
        assert!(req.options.enable_move);
        assert!(req.verbose);

        let req = request(&["mtpfs", "--enable-move", "/mnt"]).unwrap();
        assert!(req.options.enable_move);
    }

    #[test]
    fn test_unknown_mount_option() {
        let err = request(&["mtpfs", "-o", "bogus", "/mnt"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn test_emulate_and_config() {
        let req = request(&["mtpfs", "--emulate", "-c", "/etc/mtpfs.toml", "/mnt"]).unwrap();
        assert!(req.emulate);
        assert_eq!(req.mountpoint, PathBuf::from("/mnt"));
        assert_eq!(req.config, Some(PathBuf::from("/etc/mtpfs.toml")));
    }
}
