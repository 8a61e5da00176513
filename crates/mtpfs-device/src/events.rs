//! Transfer gating and the background event reader.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use crate::device::MtpDevice;

/// Counts bulk transfers in flight. The event reader waits for zero.
#[derive(Debug, Default)]
pub struct TransferGate {
    in_flight: Mutex<usize>,
    idle: Condvar,
}

pub struct TransferGuard<'a> {
    gate: &'a TransferGate,
}

impl TransferGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> TransferGuard<'_> {
        *self.in_flight.lock() += 1;
        TransferGuard { gate: self }
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.lock()
    }

    /// Blocks until no transfer is in flight. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let mut count = self.in_flight.lock();
        while *count > 0 {
            if self.idle.wait_for(&mut count, timeout).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

impl Drop for TransferGuard<'_> {
    fn drop(&mut self) {
        let mut count = self.gate.in_flight.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.gate.idle.notify_all();
        }
    }
}

pub(crate) struct EventReader {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EventReader {
    pub(crate) fn spawn(device: Weak<MtpDevice>, interval: Duration) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name("mtpfs-events".to_string())
            .spawn(move || run(device, flag, interval))?;
        Ok(EventReader {
            stop,
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            // The last device handle may be dropped on the reader thread itself.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn run(device: Weak<MtpDevice>, stop: Arc<AtomicBool>, interval: Duration) {
    debug!("event reader started");
    while !stop.load(Ordering::Acquire) {
        let idle = {
            let Some(device) = device.upgrade() else { break };
            if !device.gate().wait_idle(interval) {
                continue;
            }
            match device.poll_event() {
                Ok(Some(event)) => {
                    device.handle_event(event);
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!("event wait failed: {}", e);
                    true
                }
            }
        };
        if idle {
            thread::sleep(interval);
        }
    }
    debug!("event reader stopped");
}
