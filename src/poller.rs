use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::engine::EnergyEngine;
use crate::error::{EnergyError, Result};

/// Lifecycle of the background poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
	Running,
	Stopping,
	Stopped,
}

impl PollerState {
	fn from_u8(value: u8) -> Self {
		match value {
			0 => PollerState::Running,
			1 => PollerState::Stopping,
			_ => PollerState::Stopped,
		}
	}
}

#[derive(Debug)]
struct Shared {
	state: AtomicU8,
	ticks: AtomicU64,
}

impl Shared {
	fn set_state(&self, state: PollerState) {
		self.state.store(state as u8, Ordering::Release);
	}
}

/// Background thread keeping accumulators warm.
///
/// Every tick refreshes all sockets and one core in round-robin order, then
/// sleeps for the polling period. The sleep is a channel receive with a
/// timeout so a stop request wakes the thread immediately; a tick in progress
/// always runs to completion.
#[derive(Debug)]
pub struct Poller {
	stop_tx: mpsc::Sender<()>,
	shared: Arc<Shared>,
	handle: Option<JoinHandle<()>>,
	period: Duration,
}

impl Poller {
	/// Spawns the poller thread over `engine`
	pub fn spawn(engine: Arc<EnergyEngine>, period: Duration) -> Result<Self> {
		let (stop_tx, stop_rx) = mpsc::channel::<()>();
		let shared = Arc::new(Shared {
			state: AtomicU8::new(PollerState::Running as u8),
			ticks: AtomicU64::new(0),
		});
		let thread_shared = Arc::clone(&shared);

		let handle = thread::Builder::new()
			.name("zen-energy-poll".into())
			.spawn(move || run(&engine, period, &stop_rx, &thread_shared))
			.map_err(EnergyError::PollerStartFailure)?;

		info!("background poller started, period {period:?}");

		Ok(Self {
			stop_tx,
			shared,
			handle: Some(handle),
			period,
		})
	}

	pub fn state(&self) -> PollerState {
		PollerState::from_u8(self.shared.state.load(Ordering::Acquire))
	}

	/// Number of completed ticks
	pub fn ticks(&self) -> u64 {
		self.shared.ticks.load(Ordering::Acquire)
	}

	pub fn period(&self) -> Duration {
		self.period
	}

	/// Requests a stop and waits for the thread to exit
	pub fn stop(mut self) {
		self.shutdown();
	}

	/// Signals the thread without waiting; a tick in progress still completes
	fn request_stop(&self) {
		if self.state() == PollerState::Running {
			self.shared.set_state(PollerState::Stopping);
		}
		// The receiver is gone if the thread already exited
		let _ = self.stop_tx.send(());
	}

	fn shutdown(&mut self) {
		let Some(handle) = self.handle.take() else {
			return;
		};
		self.request_stop();
		if handle.join().is_err() {
			warn!("background poller panicked");
			self.shared.set_state(PollerState::Stopped);
		}
	}
}

impl Drop for Poller {
	fn drop(&mut self) {
		self.shutdown();
	}
}

fn run(engine: &EnergyEngine, period: Duration, stop_rx: &mpsc::Receiver<()>, shared: &Shared) {
	loop {
		if stop_requested(stop_rx) {
			break;
		}

		let tick = engine.poll_tick();
		shared.ticks.fetch_add(1, Ordering::AcqRel);
		debug!("poll tick: {tick:?}");

		match stop_rx.recv_timeout(period) {
			Err(mpsc::RecvTimeoutError::Timeout) => continue,
			Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
		}
	}

	debug!("background poller stopped after {} ticks", shared.ticks.load(Ordering::Acquire));
	shared.set_state(PollerState::Stopped);
}

fn stop_requested(stop_rx: &mpsc::Receiver<()>) -> bool {
	!matches!(stop_rx.try_recv(), Err(mpsc::TryRecvError::Empty))
}
