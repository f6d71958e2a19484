use std::time::Duration;

// AMD RAPL MSR addresses
pub const AMD_ENERGY_UNIT_MSR: u32 = 0xC001_0299;
pub const AMD_ENERGY_CORE_MSR: u32 = 0xC001_029A;
pub const AMD_ENERGY_PKG_MSR: u32 = 0xC001_029B;

// Energy status unit lives in bits 12:8 of the unit MSR
pub const ENERGY_UNIT_MASK: u64 = 0x1F00;
pub const ENERGY_UNIT_SHIFT: u32 = 8;

// Counter masks
pub const NARROW_COUNTER_MASK: u64 = 0xFFFF_FFFF;
pub const WIDE_COUNTER_MASK: u64 = u64::MAX;

// Engine defaults
pub const DEFAULT_CACHE_WINDOW: Duration = Duration::from_secs(1);
pub const DEFAULT_PEAK_POWER_WATTS: u64 = 250;
pub const DEFAULT_CORE_PEAK_WATTS: u64 = 250;

/// Upper clamp on the exponent used to derive the polling period
pub const MAX_PERIOD_EXPONENT: u32 = 28;

// Monitoring and display settings
pub const DEFAULT_WATCH_INTERVAL_MS: u64 = 500;
pub const AVERAGING_ITERATIONS: usize = 10;
pub const POWER_SCALE: u64 = 1_000_000;
