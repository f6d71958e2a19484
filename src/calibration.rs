use std::time::Duration;

use log::{info, warn};

use crate::constants::{MAX_PERIOD_EXPONENT, POWER_SCALE};
use crate::error::{EnergyError, Result};
use crate::source::CounterSource;

/// Process-wide conversion and scheduling parameters, fixed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
	/// Energy status unit: one raw count is `1 / 2^energy_unit` Joules
	pub energy_unit: u32,

	/// Interval between background poller ticks
	pub polling_period: Duration,
}

/// Inputs to the polling period derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerLimits {
	/// Worst-case draw of a whole socket, in Watts
	pub peak_power_watts: u64,
	/// Worst-case draw of a single core, in Watts
	pub core_peak_watts: u64,
	/// Number of cores sharing the round-robin slot
	pub core_count: usize,
}

impl Calibration {
	/// Reads the unit descriptor and derives a safe polling period.
	///
	/// `requested` is honoured only when it is shorter than the derived bound.
	pub fn calibrate<S: CounterSource + ?Sized>(
		source: &S,
		limits: PowerLimits,
		requested: Option<Duration>,
	) -> Result<Self> {
		let energy_unit = source.read_energy_unit().map_err(EnergyError::CalibrationFailure)?;
		let bound = safe_polling_period(energy_unit, limits);
		let polling_period = match requested {
			Some(requested) if requested > bound => {
				warn!("requested polling period {requested:?} exceeds the safe bound, using {bound:?}");
				bound
			},
			Some(requested) => requested.max(Duration::from_millis(1)),
			None => bound,
		};

		info!(
			"energy unit 1/2^{energy_unit} J, polling every {:?} (bound {:?} for {} cores)",
			polling_period, bound, limits.core_count
		);

		Ok(Self {
			energy_unit,
			polling_period,
		})
	}

	/// Converts an accumulated total to microjoules
	pub fn to_microjoules(&self, total: u64) -> u64 {
		to_microjoules(total, self.energy_unit)
	}
}

/// `total * 1_000_000 / 2^energy_unit` without intermediate overflow
pub fn to_microjoules(total: u64, energy_unit: u32) -> u64 {
	let scaled = (u128::from(total) * u128::from(POWER_SCALE)) >> energy_unit;
	u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Polling period at which a socket counter cannot wrap twice between two
/// ticks at `peak_power_watts`:
/// `2^min(28, 31 - unit) * 1000 ms / peak_power_watts`.
pub fn socket_polling_bound(energy_unit: u32, peak_power_watts: u64) -> Duration {
	let exponent = MAX_PERIOD_EXPONENT.min(31u32.saturating_sub(energy_unit));
	Duration::from_millis((1u64 << exponent) * 1000 / peak_power_watts.max(1))
}

/// Time for a 32-bit counter to wrap once at a constant `watts`
pub fn single_wrap_time(energy_unit: u32, watts: u64) -> Duration {
	let wrap_joules_ms = (1u128 << 32) * 1000 >> energy_unit;
	let ms = wrap_joules_ms / u128::from(watts.max(1));
	Duration::from_millis(u64::try_from(ms).unwrap_or(u64::MAX))
}

/// Tightest of the socket bound and the round-robin core bound.
///
/// A core is only refreshed once every `core_count` ticks, so the tick must be
/// short enough that `core_count` ticks fit inside a single wrap at the
/// worst-case per-core draw.
pub fn safe_polling_period(energy_unit: u32, limits: PowerLimits) -> Duration {
	let socket = socket_polling_bound(energy_unit, limits.peak_power_watts);
	let cores = u32::try_from(limits.core_count.max(1)).unwrap_or(u32::MAX);
	let core = single_wrap_time(energy_unit, limits.core_peak_watts) / cores;

	socket.min(core).max(Duration::from_millis(1))
}
