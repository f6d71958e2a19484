use std::time::{Duration, Instant};

use rand::Rng;

use crate::cpu_type::CounterWidth;

/// Distance travelled by a counter from `prev` to `sample`, assuming at most
/// one wrap past `max` happened in between.
///
/// The wrapped case is `(max - prev) + sample`, one unit short of the true
/// modular distance.
pub const fn wrap_delta(prev: u64, sample: u64, max: u64) -> u64 {
	if sample >= prev {
		sample - prev
	} else {
		(max - prev) + sample
	}
}

/// Accumulated energy of a single channel (core or socket)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accumulator {
	/// Last raw counter value folded into `total`
	raw_prev: u64,

	/// Running total in hardware energy units; never decreases
	total: u64,

	/// Deadline after which `total` must be refreshed before being served
	expiry: Option<Instant>,
}

impl Accumulator {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn total(&self) -> u64 {
		self.total
	}

	pub fn raw_prev(&self) -> u64 {
		self.raw_prev
	}

	pub fn expiry(&self) -> Option<Instant> {
		self.expiry
	}

	/// Whether a foreground read has to sample the hardware first
	pub fn is_stale(&self, now: Instant) -> bool {
		self.total == 0 || self.expiry.is_none_or(|expiry| now > expiry)
	}

	/// Folds a fresh raw sample into the running total and re-arms the cache.
	///
	/// The expiry is pushed to `now + window + jitter` with jitter uniform in
	/// `[0, window)` so that channels do not all go stale on the same tick.
	pub fn accumulate<R: Rng + ?Sized>(
		&mut self,
		sample: u64,
		width: CounterWidth,
		now: Instant,
		window: Duration,
		rng: &mut R,
	) -> u64 {
		let sample = sample & width.mask();
		let delta = wrap_delta(self.raw_prev, sample, width.max_value());

		self.total = self.total.saturating_add(delta);
		self.raw_prev = sample;
		self.expiry = Some(now + window + jitter(window, rng));

		self.total
	}
}

fn jitter<R: Rng + ?Sized>(window: Duration, rng: &mut R) -> Duration {
	let nanos = u64::try_from(window.as_nanos()).unwrap_or(u64::MAX);
	if nanos == 0 {
		return Duration::ZERO;
	}
	Duration::from_nanos(rng.gen_range(0..nanos))
}
