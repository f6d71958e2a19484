use std::time::Duration;

use crate::constants::POWER_SCALE;

/// Averaged power of every channel, in Watts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PowerReading {
	/// (label, watts) per socket, in socket order
	pub sockets: Vec<(String, f64)>,

	/// (label, watts) per core, in core order
	pub cores: Vec<(String, f64)>,
}

impl PowerReading {
	pub fn sockets_total(&self) -> f64 {
		self.sockets.iter().map(|&(_, watts)| watts).sum()
	}

	pub fn cores_total(&self) -> f64 {
		self.cores.iter().map(|&(_, watts)| watts).sum()
	}
}

/// Calculates power in microwatts from two accumulated energy readings
///
/// # Arguments
///
/// * `energy_start_uj` - Earlier accumulated energy in microjoules
/// * `energy_end_uj` - Later accumulated energy in microjoules
/// * `interval` - Time elapsed between the two readings
///
/// # Returns
///
/// Power in microwatts, 0 for an empty interval
pub fn calculate_power_uw(energy_start_uj: u64, energy_end_uj: u64, interval: Duration) -> u64 {
	// Accumulators never decrease, anything else is a restart
	let energy_difference = energy_end_uj.saturating_sub(energy_start_uj);

	let micros = interval.as_micros();
	if micros == 0 {
		return 0;
	}

	// µJ / µs = W, scale back to µW
	let power = u128::from(energy_difference) * u128::from(POWER_SCALE) / micros;
	u64::try_from(power).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn power_from_energy_delta() {
		// 5 J over 500 ms = 10 W
		let uw = calculate_power_uw(1_000_000, 6_000_000, Duration::from_millis(500));
		assert_eq!(uw, 10 * POWER_SCALE);
	}

	#[test]
	fn degenerate_intervals_yield_zero() {
		assert_eq!(calculate_power_uw(0, 10, Duration::ZERO), 0);
		assert_eq!(calculate_power_uw(10, 5, Duration::from_secs(1)), 0);
	}
}
