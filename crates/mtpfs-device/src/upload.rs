//! Upload completion records polled by clients through the control channel.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Sending,
    Success,
    Fail,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Sending => "sending",
            UploadState::Success => "success",
            UploadState::Fail => "fail",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, UploadState::Sending)
    }
}

#[derive(Debug, Default)]
pub struct UploadRecords {
    records: DashMap<String, UploadState>,
}

impl UploadRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `path` as `sending`, overwriting any previous state.
    pub fn arm(&self, path: &str) {
        self.records.insert(path.to_string(), UploadState::Sending);
    }

    /// Updates an existing record. Untracked paths are left alone.
    pub fn update(&self, path: &str, state: UploadState) -> bool {
        match self.records.get_mut(path) {
            Some(mut entry) => {
                *entry = state;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, path: &str) -> Option<UploadState> {
        self.records.get(path).map(|s| *s)
    }

    /// Reads the state, consuming the record when it is terminal.
    pub fn take_status(&self, path: &str) -> Option<UploadState> {
        match self.records.entry(path.to_string()) {
            Entry::Occupied(entry) if entry.get().is_terminal() => Some(entry.remove()),
            Entry::Occupied(entry) => Some(*entry.get()),
            Entry::Vacant(_) => None,
        }
    }

    pub fn remove(&self, path: &str) -> Option<UploadState> {
        self.records.remove(path).map(|(_, s)| s)
    }

    /// Moves records at or under `from` so they follow a rename to `to`.
    pub fn rename(&self, from: &str, to: &str) {
        let prefix = format!("{}/", from.trim_end_matches('/'));
        let moved: Vec<String> = self
            .records
            .iter()
            .map(|r| r.key().clone())
            .filter(|key| key == from || key.starts_with(&prefix))
            .collect();
        for key in moved {
            if let Some((_, state)) = self.records.remove(&key) {
                let target = format!("{}{}", to, &key[from.len()..]);
                self.records.insert(target, state);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sending_is_not_consumed() {
        let records = UploadRecords::new();
        records.arm("/a");
        assert_eq!(records.take_status("/a"), Some(UploadState::Sending));
        assert_eq!(records.take_status("/a"), Some(UploadState::Sending));
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_terminal_read_consumes_once() {
        let records = UploadRecords::new();
        records.arm("/a");
        assert!(records.update("/a", UploadState::Success));
        assert_eq!(records.take_status("/a"), Some(UploadState::Success));
        assert_eq!(records.take_status("/a"), None);
        assert!(records.is_empty());
    }

    #[test]
    fn test_update_ignores_untracked_paths() {
        let records = UploadRecords::new();
        assert!(!records.update("/nope", UploadState::Fail));
        assert_eq!(records.get("/nope"), None);
    }

    #[test]
    fn test_rearm_overwrites_terminal_state() {
        let records = UploadRecords::new();
        records.arm("/a");
        records.update("/a", UploadState::Fail);
        records.arm("/a");
        assert_eq!(records.get("/a"), Some(UploadState::Sending));
    }

    #[test]
    fn test_rename_moves_record() {
        let records = UploadRecords::new();
        records.arm("/a");
        records.rename("/a", "/b");
        assert_eq!(records.get("/a"), None);
        assert_eq!(records.get("/b"), Some(UploadState::Sending));
    }

    #[test]
    fn test_rename_moves_records_under_dir() {
        let records = UploadRecords::new();
        records.arm("/d/f");
        records.arm("/d/sub/g");
        records.arm("/dd/h");
        records.update("/d/f", UploadState::Success);
        records.rename("/d", "/e");
        assert_eq!(records.get("/e/f"), Some(UploadState::Success));
        assert_eq!(records.get("/e/sub/g"), Some(UploadState::Sending));
        assert_eq!(records.get("/d/f"), None);
        assert_eq!(records.get("/dd/h"), Some(UploadState::Sending));
    }

    #[test]
    fn test_state_strings() {
        assert_eq!(UploadState::Sending.as_str(), "sending");
        assert_eq!(UploadState::Success.as_str(), "success");
        assert_eq!(UploadState::Fail.as_str(), "fail");
    }
}
