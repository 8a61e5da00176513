//! Per-user read-only policy.
//!
//! The account service reports which user is in the foreground and whether
//! that user may write to MTP devices. [`ReadOnlyPolicy`] keeps the answer in
//! a `userId -> isReadOnly` map and every mutating filesystem call checks the
//! entry of the current user before touching the device.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{FuseError, Result};

/// Constraint that, when enabled for a user, makes the mount read-only.
pub const MTP_WRITE_CONSTRAINT: &str = "constraint.mtp.client.write";

/// Receives account state changes.
pub trait AccountListener: Send + Sync {
    /// The foreground user changed; `read_only` is that user's write constraint.
    fn on_user_switched(&self, user_id: i32, read_only: bool);

    fn on_constraint_changed(&self, user_id: i32, enabled: bool);
}

/// Source of account state.
pub trait AccountService: Send + Sync {
    fn foreground_user(&self) -> Result<i32>;

    fn is_constraint_enabled(&self, user_id: i32, constraint: &str) -> Result<bool>;

    fn subscribe(&self, listener: Arc<dyn AccountListener>) -> Result<()>;

    fn unsubscribe(&self) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct ReadOnlyPolicy {
    current_user: AtomicI32,
    read_only: DashMap<i32, bool>,
}

impl ReadOnlyPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the map with the foreground user's current constraint.
    pub fn init(&self, accounts: &dyn AccountService) -> Result<()> {
        let user_id = accounts.foreground_user()?;
        let read_only = accounts.is_constraint_enabled(user_id, MTP_WRITE_CONSTRAINT)?;
        self.current_user.store(user_id, Ordering::Release);
        self.read_only.insert(user_id, read_only);
        info!("foreground user {} read_only={}", user_id, read_only);
        Ok(())
    }

    pub fn current_user(&self) -> i32 {
        self.current_user.load(Ordering::Acquire)
    }

    pub fn set_read_only(&self, user_id: i32, read_only: bool) {
        self.read_only.insert(user_id, read_only);
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
            .get(&self.current_user())
            .map(|entry| *entry)
            .unwrap_or(false)
    }

    /// Fails with [`FuseError::ReadOnly`] when the current user may not write.
    pub fn check_writable(&self, op: &str) -> Result<()> {
        if self.is_read_only() {
            let user_id = self.current_user();
            debug!("{} denied: user {} is read-only", op, user_id);
            return Err(FuseError::ReadOnly {
                user_id,
                op: op.to_string(),
            });
        }
        Ok(())
    }
}

impl AccountListener for ReadOnlyPolicy {
    fn on_user_switched(&self, user_id: i32, read_only: bool) {
        info!("user switched to {} read_only={}", user_id, read_only);
        self.read_only.insert(user_id, read_only);
        self.current_user.store(user_id, Ordering::Release);
    }

    fn on_constraint_changed(&self, user_id: i32, enabled: bool) {
        info!("write constraint for user {} now {}", user_id, enabled);
        self.read_only.insert(user_id, enabled);
    }
}

/// In-process account service.
pub struct LocalAccountService {
    foreground: AtomicI32,
    constraints: Mutex<HashMap<(i32, String), bool>>,
    listener: Mutex<Option<Arc<dyn AccountListener>>>,
}

impl LocalAccountService {
    pub fn new(foreground_user: i32) -> Self {
        LocalAccountService {
            foreground: AtomicI32::new(foreground_user),
            constraints: Mutex::new(HashMap::new()),
            listener: Mutex::new(None),
        }
    }

    fn listener(&self) -> Option<Arc<dyn AccountListener>> {
        self.listener.lock().clone()
    }

    fn constraint(&self, user_id: i32, constraint: &str) -> bool {
        self.constraints
            .lock()
            .get(&(user_id, constraint.to_string()))
            .copied()
            .unwrap_or(false)
    }

    pub fn switch_user(&self, user_id: i32) {
        self.foreground.store(user_id, Ordering::Release);
        let read_only = self.constraint(user_id, MTP_WRITE_CONSTRAINT);
        if let Some(listener) = self.listener() {
            listener.on_user_switched(user_id, read_only);
        }
    }

    pub fn set_constraint(&self, user_id: i32, constraint: &str, enabled: bool) {
        self.constraints
            .lock()
            .insert((user_id, constraint.to_string()), enabled);
        if constraint != MTP_WRITE_CONSTRAINT {
            return;
        }
        if let Some(listener) = self.listener() {
            listener.on_constraint_changed(user_id, enabled);
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.listener.lock().is_some()
    }
}

impl AccountService for LocalAccountService {
    fn foreground_user(&self) -> Result<i32> {
        Ok(self.foreground.load(Ordering::Acquire))
    }

    fn is_constraint_enabled(&self, user_id: i32, constraint: &str) -> Result<bool> {
        Ok(self.constraint(user_id, constraint))
    }

    fn subscribe(&self, listener: Arc<dyn AccountListener>) -> Result<()> {
        *self.listener.lock() = Some(listener);
        Ok(())
    }

    fn unsubscribe(&self) -> Result<()> {
        *self.listener.lock() = None;
        Ok(())
    }
}
