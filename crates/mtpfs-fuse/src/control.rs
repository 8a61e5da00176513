//! Extended-attribute adapter over the control API of [`MtpFileSystem`].
//!
//! FUSE offers no side channel, so clients drive device-specific actions
//! through `user.*` attributes. Each key maps onto one explicit method.

use tracing::debug;

use crate::dispatcher::MtpFileSystem;
use crate::error::{FuseError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKey {
    RemoveDir,
    FetchContent,
    CancelCopy,
    PtpMode,
    UploadCompleted,
    DirFetched,
    InUse,
    FriendlyName,
    OpenHarmony,
}

impl ControlKey {
    pub const ALL: [ControlKey; 9] = [
        ControlKey::RemoveDir,
        ControlKey::FetchContent,
        ControlKey::CancelCopy,
        ControlKey::PtpMode,
        ControlKey::UploadCompleted,
        ControlKey::DirFetched,
        ControlKey::InUse,
        ControlKey::FriendlyName,
        ControlKey::OpenHarmony,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlKey::RemoveDir => "user.rmdir",
            ControlKey::FetchContent => "user.fetchcontent",
            ControlKey::CancelCopy => "user.cancelcopy",
            ControlKey::PtpMode => "user.isptpmode",
            ControlKey::UploadCompleted => "user.isUploadCompleted",
            ControlKey::DirFetched => "user.isDirFetched",
            ControlKey::InUse => "user.queryMtpIsInUse",
            ControlKey::FriendlyName => "user.getfriendlyname",
            ControlKey::OpenHarmony => "user.isOpenHarmonyMtpDevice",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }
}

fn parse_flag(value: &[u8]) -> bool {
    let text = String::from_utf8_lossy(value);
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    text.eq_ignore_ascii_case("true") || text == "1"
}

fn flag_value(flag: bool) -> Vec<u8> {
    if flag { b"true".to_vec() } else { b"false".to_vec() }
}

pub fn set_control(fs: &MtpFileSystem, path: &str, key: ControlKey, value: &[u8]) -> Result<()> {
    debug!("set control {} path={}", key.as_str(), path);
    match key {
        ControlKey::RemoveDir => fs.remove_dir_directly(path),
        ControlKey::FetchContent => {
            fs.refresh(path);
            Ok(())
        }
        ControlKey::CancelCopy => {
            fs.cancel_copy(path);
            Ok(())
        }
        ControlKey::PtpMode => {
            fs.set_ptp_mode(parse_flag(value));
            Ok(())
        }
        ControlKey::UploadCompleted => {
            fs.arm_upload(path);
            Ok(())
        }
        ControlKey::DirFetched
        | ControlKey::InUse
        | ControlKey::FriendlyName
        | ControlKey::OpenHarmony => Err(FuseError::InvalidArgument {
            msg: format!("{} is read-only", key.as_str()),
        }),
    }
}

pub fn get_control(fs: &MtpFileSystem, path: &str, key: ControlKey) -> Result<Vec<u8>> {
    debug!("get control {} path={}", key.as_str(), path);
    match key {
        ControlKey::PtpMode => Ok(flag_value(fs.is_ptp_mode())),
        ControlKey::UploadCompleted => {
            let state = fs.take_upload_status(path)?;
            Ok(state.as_str().as_bytes().to_vec())
        }
        ControlKey::DirFetched => Ok(flag_value(fs.is_dir_fetched(path))),
        ControlKey::InUse => Ok(flag_value(fs.is_in_use())),
        ControlKey::FriendlyName => Ok(fs.friendly_name().into_bytes()),
        ControlKey::OpenHarmony => Ok(flag_value(fs.is_open_harmony_device())),
        ControlKey::RemoveDir | ControlKey::FetchContent | ControlKey::CancelCopy => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_every_key() {
        for key in ControlKey::ALL {
            assert_eq!(ControlKey::parse(key.as_str()), Some(key));
        }
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        assert_eq!(ControlKey::parse("user.isuploadcompleted"), None);
        assert_eq!(ControlKey::parse("user.unknown"), None);
        assert_eq!(ControlKey::parse("trusted.rmdir"), None);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag(b"true"));
        assert!(parse_flag(b"TRUE\0"));
        assert!(parse_flag(b"1"));
        assert!(!parse_flag(b"false"));
        assert!(!parse_flag(b""));
        assert!(!parse_flag(b"0"));
    }

    #[test]
    fn test_flag_value() {
        assert_eq!(flag_value(true), b"true");
        assert_eq!(flag_value(false), b"false");
    }
}
