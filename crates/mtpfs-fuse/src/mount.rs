//! Mount option handling for mtpfs.
//!
//! Parses the comma-separated `-o` option string, checks the mount point
//! and turns the result into `fuser` mount options.

use std::path::Path;
use thiserror::Error;

/// Options accepted after `-o`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// Allow other users to access.
    pub allow_other: bool,
    /// Allow root to access.
    pub allow_root: bool,
    /// Let the kernel check permissions.
    pub default_permissions: bool,
    /// Unmount when the process exits.
    pub auto_unmount: bool,
    /// Allow a non-empty mount point.
    pub nonempty: bool,
    /// Read-only mount.
    pub ro: bool,
    /// Permit cross-directory renames.
    pub enable_move: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        MountOptions {
            allow_other: false,
            allow_root: false,
            default_permissions: false,
            auto_unmount: true,
            nonempty: false,
            ro: false,
            enable_move: false,
        }
    }
}

/// Errors that can occur while preparing a mount.
#[derive(Debug, Error)]
pub enum MountError {
    /// Path does not exist.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// Path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// Mount point has entries and `nonempty` was not given.
    #[error("Mount point not empty: {0}")]
    NotEmpty(String),

    /// Unknown option.
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Validate a mount point path.
pub fn validate_mountpoint(path: &Path, nonempty: bool) -> Result<(), MountError> {
    if !path.exists() {
        return Err(MountError::PathNotFound(path.display().to_string()));
    }

    if !path.is_dir() {
        return Err(MountError::NotADirectory(path.display().to_string()));
    }

    if !nonempty && std::fs::read_dir(path)?.next().is_some() {
        return Err(MountError::NotEmpty(path.display().to_string()));
    }

    Ok(())
}

/// Parse mount options from a comma-separated string.
///
/// Valid options: allow_other, allow_root, default_permissions, auto_unmount,
/// nonempty, ro, rw, enable-move.
pub fn parse_mount_options(opts_str: &str) -> Result<MountOptions, MountError> {
    let mut options = MountOptions::default();
    merge_mount_options(&mut options, opts_str)?;
    Ok(options)
}

/// Applies `opts_str` on top of `options`, for repeated `-o` flags.
pub fn merge_mount_options(options: &mut MountOptions, opts_str: &str) -> Result<(), MountError> {
    for opt in opts_str.split(',') {
        let opt = opt.trim();
        match opt {
            "allow_other" => options.allow_other = true,
            "allow_root" => options.allow_root = true,
            "default_permissions" => options.default_permissions = true,
            "auto_unmount" => options.auto_unmount = true,
            "nonempty" => options.nonempty = true,
            "ro" => options.ro = true,
            "rw" => options.ro = false,
            "enable-move" | "enable_move" => options.enable_move = true,
            "" => {}
            _ => {
                return Err(MountError::InvalidOption(opt.to_string()));
            }
        }
    }
    Ok(())
}

/// Convert MountOptions to fuser::MountOption vec.
pub fn options_to_fuser(opts: &MountOptions, fsname: &str) -> Vec<fuser::MountOption> {
    let mut fuser_opts = vec![
        fuser::MountOption::FSName(fsname.to_string()),
        fuser::MountOption::Subtype("mtpfs".to_string()),
    ];

    if opts.allow_other {
        fuser_opts.push(fuser::MountOption::AllowOther);
    }

    if opts.allow_root {
        fuser_opts.push(fuser::MountOption::AllowRoot);
    }

    if opts.default_permissions {
        fuser_opts.push(fuser::MountOption::DefaultPermissions);
    }

    if opts.auto_unmount {
        fuser_opts.push(fuser::MountOption::AutoUnmount);
    }

    if opts.nonempty {
        fuser_opts.push(fuser::MountOption::CUSTOM("nonempty".into()));
    }

    fuser_opts.push(if opts.ro {
        fuser::MountOption::RO
    } else {
        fuser::MountOption::RW
    });

    fuser_opts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults() {
        let opts = MountOptions::default();
        assert!(opts.auto_unmount);
        assert!(!opts.enable_move);
        assert!(!opts.ro);
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse_mount_options("").unwrap(), MountOptions::default());
    }

    #[test]
    fn test_parse_known_options() {
        let opts = parse_mount_options("allow_other, ro ,enable-move,nonempty").unwrap();
        assert!(opts.allow_other);
        assert!(opts.ro);
        assert!(opts.enable_move);
        assert!(opts.nonempty);
        assert!(!opts.allow_root);
    }

    #[test]
    fn test_rw_overrides_ro() {
        let opts = parse_mount_options("ro,rw").unwrap();
        assert!(!opts.ro);
    }

    #[test]
    fn test_unknown_option_rejected() {
        match parse_mount_options("allow_other,bogus") {
            Err(MountError::InvalidOption(opt)) => assert_eq!(opt, "bogus"),
            other => panic!("expected InvalidOption, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_accumulates() {
        let mut opts = parse_mount_options("allow_other").unwrap();
        merge_mount_options(&mut opts, "enable_move").unwrap();
        assert!(opts.allow_other);
        assert!(opts.enable_move);
    }

    #[test]
    fn test_options_to_fuser() {
        let opts = parse_mount_options("allow_other,ro").unwrap();
        let fuser_opts = options_to_fuser(&opts, "Pixel");
        assert!(fuser_opts.contains(&fuser::MountOption::AllowOther));
        assert!(fuser_opts.contains(&fuser::MountOption::RO));
        assert!(fuser_opts.contains(&fuser::MountOption::AutoUnmount));
        assert!(fuser_opts.contains(&fuser::MountOption::FSName("Pixel".to_string())));
        assert!(!fuser_opts.contains(&fuser::MountOption::RW));
    }

    #[test]
    fn test_validate_mountpoint() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_mountpoint(dir.path(), false).is_ok());

        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            validate_mountpoint(&file, true),
            Err(MountError::NotADirectory(_))
        ));
        assert!(matches!(
            validate_mountpoint(dir.path(), false),
            Err(MountError::NotEmpty(_))
        ));
        assert!(validate_mountpoint(dir.path(), true).is_ok());
        assert!(matches!(
            validate_mountpoint(&dir.path().join("missing"), false),
            Err(MountError::PathNotFound(_))
        ));
    }
}
