use std::collections::VecDeque;

use crate::constants::{AVERAGING_ITERATIONS, POWER_SCALE};
use crate::energy::EnergySnapshot;
use crate::engine::ChannelKind;
use crate::power::{PowerReading, calculate_power_uw};

#[derive(Debug)]
struct ChannelHistory {
	label: String,
	kind: ChannelKind,
	readings: VecDeque<u64>,
}

/// Turns successive energy snapshots into moving-average power per channel
#[derive(Debug, Default)]
pub struct PowerMonitor {
	previous: Option<EnergySnapshot>,
	channels: Vec<ChannelHistory>,
}

impl PowerMonitor {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records a new snapshot; power is derived against the previous one
	pub fn update(&mut self, snapshot: EnergySnapshot) {
		if self.channels.is_empty() {
			self.channels = snapshot
				.channels
				.iter()
				.map(|c| ChannelHistory {
					label: c.label.clone(),
					kind: c.kind,
					readings: VecDeque::with_capacity(AVERAGING_ITERATIONS),
				})
				.collect();
		}

		if let Some(previous) = &self.previous {
			let interval = snapshot.taken_at.saturating_duration_since(previous.taken_at);
			for (history, (before, after)) in self
				.channels
				.iter_mut()
				.zip(previous.channels.iter().zip(&snapshot.channels))
			{
				// Skip channels that were unreadable at either end
				if let (Some(start), Some(end)) = (before.microjoules, after.microjoules) {
					history.readings.push_back(calculate_power_uw(start, end, interval));
					if history.readings.len() > AVERAGING_ITERATIONS {
						history.readings.pop_front();
					}
				}
			}
		}

		self.previous = Some(snapshot);
	}

	/// Calculates average power readings from stored values
	pub fn calculate_averages(&self) -> PowerReading {
		let mut reading = PowerReading::default();

		for history in &self.channels {
			let entry = (history.label.clone(), average_watts(&history.readings));
			match history.kind {
				ChannelKind::Core(_) => reading.cores.push(entry),
				ChannelKind::Socket(_) => reading.sockets.push(entry),
			}
		}

		reading
	}
}

fn average_watts(readings: &VecDeque<u64>) -> f64 {
	if readings.is_empty() {
		return 0.0;
	}
	let total: u64 = readings.iter().sum();
	total as f64 / readings.len() as f64 / POWER_SCALE as f64
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::{Duration, Instant};

	use crate::energy::ChannelEnergy;

	fn snapshot(taken_at: Instant, core_uj: Option<u64>, socket_uj: u64) -> EnergySnapshot {
		EnergySnapshot {
			taken_at,
			channels: vec![
				ChannelEnergy {
					label: "core000".into(),
					kind: ChannelKind::Core(0),
					microjoules: core_uj,
				},
				ChannelEnergy {
					label: "socket0".into(),
					kind: ChannelKind::Socket(0),
					microjoules: Some(socket_uj),
				},
			],
		}
	}

	#[test]
	fn averages_power_over_snapshots() {
		let start = Instant::now();
		let mut monitor = PowerMonitor::new();

		monitor.update(snapshot(start, Some(0), 0));
		// 2 W core, 20 W socket
		monitor.update(snapshot(start + Duration::from_secs(1), Some(2_000_000), 20_000_000));
		// 4 W core, 40 W socket
		monitor.update(snapshot(start + Duration::from_secs(2), Some(6_000_000), 60_000_000));

		let reading = monitor.calculate_averages();
		assert_eq!(reading.cores, vec![("core000".to_string(), 3.0)]);
		assert_eq!(reading.sockets, vec![("socket0".to_string(), 30.0)]);
		assert_eq!(reading.cores_total(), 3.0);
	}

	#[test]
	fn unreadable_channels_are_skipped() {
		let start = Instant::now();
		let mut monitor = PowerMonitor::new();

		monitor.update(snapshot(start, None, 0));
		monitor.update(snapshot(start + Duration::from_secs(1), Some(5_000_000), 1_000_000));

		let reading = monitor.calculate_averages();
		assert_eq!(reading.cores[0].1, 0.0);
		assert_eq!(reading.sockets[0].1, 1.0);
	}
}
