#![forbid(unsafe_code)]

use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Liveness clock; injected so watchdog and dedup timing are testable.
pub trait Clock: Send + Sync {
	fn now(&self) -> SystemTime;
}

/// System-backed clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> SystemTime {
		SystemTime::now()
	}
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
	now: Mutex<SystemTime>,
}

impl ManualClock {
	pub fn new(start: SystemTime) -> Self {
		Self { now: Mutex::new(start) }
	}

	pub fn set(&self, to: SystemTime) {
		*self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
	}

	pub fn advance(&self, by: Duration) {
		let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
		*now += by;
	}
}

impl Clock for ManualClock {
	fn now(&self) -> SystemTime {
		*self.now.lock().unwrap_or_else(|e| e.into_inner())
	}
}
