//! Application state (design §4.10, §9 "Global state"). Mounted disks,
//! the console table, the file bridge, and the small set of cooperative
//! flags the runner and host roles share all live behind a single
//! `Context` handed to whoever needs them — never behind a process-wide
//! global, so the core stays testable outside the SSH/HTTP front end.

use crate::bridge::Bridge;
use crate::console::ConsoleTable;
use crate::disk::DiskTable;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub struct Context {
    pub disks: Mutex<DiskTable>,
    pub consoles: ConsoleTable,
    pub bridge: Bridge,
    pub clock_enabled: AtomicBool,
    pub stop_requested: AtomicBool,
    pub timed_out: AtomicBool,
}

impl Context {
    pub fn new(console_count: usize) -> Self {
        Context {
            disks: Mutex::new(DiskTable::new()),
            consoles: ConsoleTable::new(console_count),
            bridge: Bridge::new(),
            clock_enabled: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
        }
    }

    pub fn clock_enabled(&self) -> bool {
        self.clock_enabled.load(Ordering::Acquire)
    }

    pub fn set_clock_enabled(&self, v: bool) {
        self.clock_enabled.store(v, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    pub fn set_timed_out(&self) {
        self.timed_out.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_default_to_inert() {
        let ctx = Context::new(4);
        assert!(!ctx.clock_enabled());
        assert!(!ctx.stop_requested());
        assert!(!ctx.timed_out());
    }

    #[test]
    fn request_stop_is_observable() {
        let ctx = Context::new(1);
        ctx.request_stop();
        assert!(ctx.stop_requested());
    }
}
