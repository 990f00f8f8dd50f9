#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::clock::Clock;

/// Sweep cadence; expiry is otherwise checked lazily on access.
const SWEEP_EVERY_INSERTS: usize = 256;

/// Set of string keys that forget entries `ttl` after insertion.
pub struct TtlSet {
	ttl: Duration,
	clock: Arc<dyn Clock>,
	entries: HashMap<String, SystemTime>,
	inserts_since_sweep: usize,
}

impl TtlSet {
	pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
		Self {
			ttl,
			clock,
			entries: HashMap::new(),
			inserts_since_sweep: 0,
		}
	}

	/// Insert `key`; returns `true` iff no unexpired entry existed.
	///
	/// Re-adding a live key does not refresh its expiry.
	pub fn add(&mut self, key: &str) -> bool {
		let now = self.clock.now();

		self.inserts_since_sweep += 1;
		if self.inserts_since_sweep >= SWEEP_EVERY_INSERTS {
			self.inserts_since_sweep = 0;
			self.sweep(now);
		}

		match self.entries.get(key) {
			Some(inserted_at) if !Self::is_expired(*inserted_at, now, self.ttl) => false,
			_ => {
				self.entries.insert(key.to_string(), now);
				true
			}
		}
	}

	/// True iff an unexpired entry exists for `key`.
	pub fn contains(&self, key: &str) -> bool {
		let now = self.clock.now();
		self.entries
			.get(key)
			.is_some_and(|inserted_at| !Self::is_expired(*inserted_at, now, self.ttl))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	fn is_expired(inserted_at: SystemTime, now: SystemTime, ttl: Duration) -> bool {
		now.duration_since(inserted_at).map(|age| age > ttl).unwrap_or(false)
	}

	fn sweep(&mut self, now: SystemTime) {
		let ttl = self.ttl;
		self.entries.retain(|_, inserted_at| !Self::is_expired(*inserted_at, now, ttl));
	}
}
