pub mod accumulator;
pub mod calibration;
pub mod clock;
pub mod constants;
pub mod cpu_type;
pub mod display;
pub mod energy;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod poller;
pub mod power;
pub mod source;
pub mod topology;

use std::sync::mpsc;
use std::time::Duration;
use std::{io, thread};

use log::{info, warn};

pub use crate::engine::{EnergyDevice, EnergyEngine, EngineConfig};
pub use crate::error::{EnergyError, Result};

use crate::display::{display_power_readings, prepare_display_area};
use crate::energy::EnergySnapshot;
use crate::monitor::PowerMonitor;
use crate::power::PowerReading;

/// Samples every channel of `device` and displays averaged power
///
/// Runs until `iterations` samples were taken, or forever when `None`.
pub fn watch_energy(device: &EnergyDevice, interval: Duration, iterations: Option<u64>) -> io::Result<()> {
	let engine = device.engine();

	println!("Monitoring energy counters (Watts) every {} ms...", interval.as_millis());
	println!(
		"Sockets: {}, Cores: {} ({} counters)",
		engine.socket_count(),
		engine.core_count(),
		engine.counter_width()
	);
	if iterations.is_none() {
		println!("Press Ctrl+C to stop.");
	}
	println!();

	// Power readings flow from the sampling loop to the display thread
	let (tx, rx) = mpsc::channel::<PowerReading>();

	prepare_display_area(engine.socket_count(), engine.core_count())?;

	let display_handle = thread::spawn(move || -> io::Result<()> {
		for reading in rx {
			display_power_readings(&reading)?;
		}
		Ok(())
	});

	let mut monitor = PowerMonitor::new();
	let mut taken = 0u64;
	monitor.update(EnergySnapshot::capture(engine));

	while iterations.is_none_or(|limit| taken < limit) {
		thread::sleep(interval);
		monitor.update(EnergySnapshot::capture(engine));
		taken += 1;

		// The display thread only ends early on a terminal error
		if tx.send(monitor.calculate_averages()).is_err() {
			break;
		}
	}

	drop(tx);
	match display_handle.join() {
		Ok(result) => result?,
		Err(_) => warn!("display thread panicked"),
	}

	if let Some(poller) = device.poller() {
		info!("background poller ran {} ticks", poller.ticks());
	}

	Ok(())
}
