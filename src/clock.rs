use std::fmt::Debug;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Monotonic time source used for cache expiry
pub trait Clock: Debug + Send + Sync {
	fn now(&self) -> Instant;
}

/// The system monotonic clock
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
	fn now(&self) -> Instant {
		Instant::now()
	}
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
	now: Mutex<Instant>,
}

impl ManualClock {
	pub fn new() -> Self {
		Self {
			now: Mutex::new(Instant::now()),
		}
	}

	pub fn advance(&self, by: Duration) {
		let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
		*now += by;
	}
}

impl Default for ManualClock {
	fn default() -> Self {
		Self::new()
	}
}

impl Clock for ManualClock {
	fn now(&self) -> Instant {
		*self.now.lock().unwrap_or_else(|e| e.into_inner())
	}
}

impl<T: Clock + ?Sized> Clock for std::sync::Arc<T> {
	fn now(&self) -> Instant {
		(**self).now()
	}
}
