use std::fmt;
use std::fs;

use crate::constants::{NARROW_COUNTER_MASK, WIDE_COUNTER_MASK};
use crate::error::{EnergyError, Result};

/// Represents CPU manufacturer types that can be detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuVendor {
	/// AMD CPU architecture
	Amd,
	/// Intel CPU architecture (no per-core energy counters)
	Intel,
	/// Any other CPU architecture
	Unsupported,
}

/// Width of the hardware energy counters.
///
/// Narrow counters wrap every few minutes under load and need the background
/// poller to keep at most one wrap between observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CounterWidth {
	/// 32 significant bits
	Narrow,
	/// full 64-bit register
	Wide,
}

impl CounterWidth {
	/// Mask applied to a raw register value
	pub const fn mask(self) -> u64 {
		match self {
			CounterWidth::Narrow => NARROW_COUNTER_MASK,
			CounterWidth::Wide => WIDE_COUNTER_MASK,
		}
	}

	/// Largest value the masked counter can hold before wrapping
	pub const fn max_value(self) -> u64 {
		self.mask()
	}

	/// Whether the background poller is required to avoid missed wraps
	pub const fn needs_polling(self) -> bool {
		matches!(self, CounterWidth::Narrow)
	}
}

impl fmt::Display for CounterWidth {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CounterWidth::Narrow => f.write_str("32-bit"),
			CounterWidth::Wide => f.write_str("64-bit"),
		}
	}
}

/// Identification of the running processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuModel {
	pub vendor: CpuVendor,
	pub family: u32,
	pub model: u32,
	pub name: String,
}

// Family/model pairs whose energy MSRs only carry 32 significant bits
const NARROW_COUNTER_MODELS: &[(u32, u32, &str)] = &[
	(0x17, 0x01, "Zen"),
	(0x17, 0x08, "Zen+"),
	(0x17, 0x11, "Zen APU"),
	(0x17, 0x18, "Picasso"),
	(0x17, 0x20, "Picasso APU"),
	(0x17, 0x31, "Zen2 Threadripper"),
	(0x17, 0x60, "Renoir"),
	(0x17, 0x68, "Lucienne"),
	(0x17, 0x71, "Zen2"),
	(0x19, 0x01, "Zen3 Threadripper"),
	(0x19, 0x21, "Zen3"),
	(0x19, 0x50, "Cezanne"),
	(0x19, 0x44, "Rembrandt"),
	(0x19, 0x60, "Rembrandt"),
];

// Parts with 64-bit energy registers
const WIDE_COUNTER_MODELS: &[(u32, u32, &str)] = &[
	(0x19, 0x61, "Zen 4"),
	(0x19, 0x74, "Phoenix"),
	(0x19, 0x75, "Phoenix"),
	(0x1A, 0x44, "Zen 5"),
];

impl CpuModel {
	/// Detects the processor by reading /proc/cpuinfo
	pub fn detect() -> Result<Self> {
		let cpuinfo = fs::read_to_string("/proc/cpuinfo").map_err(EnergyError::Topology)?;
		Ok(Self::parse(&cpuinfo))
	}

	/// Parses the first processor block of a /proc/cpuinfo dump
	pub fn parse(cpuinfo: &str) -> Self {
		let mut vendor = CpuVendor::Unsupported;
		let mut family = 0;
		let mut model = 0;
		let mut name = String::new();

		for line in cpuinfo.lines() {
			// Stop at the end of the first processor block
			if line.trim().is_empty() && vendor != CpuVendor::Unsupported {
				break;
			}
			let Some((key, value)) = line.split_once(':') else {
				continue;
			};
			let value = value.trim();
			match key.trim() {
				"vendor_id" => {
					vendor = match value {
						"AuthenticAMD" => CpuVendor::Amd,
						"GenuineIntel" => CpuVendor::Intel,
						_ => CpuVendor::Unsupported,
					}
				},
				"cpu family" => family = value.parse().unwrap_or(0),
				"model" => model = value.parse().unwrap_or(0),
				"model name" => name = value.to_string(),
				_ => {},
			}
		}

		Self {
			vendor,
			family,
			model,
			name,
		}
	}

	/// Returns the counter width of a supported part, or an error naming the CPU
	pub fn counter_width(&self) -> Result<CounterWidth> {
		if self.vendor != CpuVendor::Amd {
			return Err(EnergyError::UnsupportedCpu(format!(
				"{:?} processors do not expose per-core energy counters",
				self.vendor
			)));
		}

		let matches = |table: &[(u32, u32, &str)]| {
			table
				.iter()
				.any(|&(family, model, _)| family == self.family && model == self.model)
		};

		if matches(NARROW_COUNTER_MODELS) {
			Ok(CounterWidth::Narrow)
		} else if matches(WIDE_COUNTER_MODELS) {
			Ok(CounterWidth::Wide)
		} else {
			Err(EnergyError::UnsupportedCpu(format!(
				"AMD family {:#x} model {:#x} ({})",
				self.family, self.model, self.name
			)))
		}
	}

	/// Width to run with: `requested` overrides the model table, never the vendor check
	pub fn select_counter_width(&self, requested: Option<CounterWidth>) -> Result<CounterWidth> {
		match requested {
			Some(width) if self.vendor == CpuVendor::Amd => Ok(width),
			Some(_) => Err(EnergyError::UnsupportedCpu(format!(
				"{:?} processors do not expose AMD energy counters",
				self.vendor
			))),
			None => self.counter_width(),
		}
	}

	/// Marketing codename from the supported-parts table, if known
	pub fn codename(&self) -> Option<&'static str> {
		NARROW_COUNTER_MODELS
			.iter()
			.chain(WIDE_COUNTER_MODELS)
			.find(|&&(family, model, _)| family == self.family && model == self.model)
			.map(|&(_, _, name)| name)
	}
}
