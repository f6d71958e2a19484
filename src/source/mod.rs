pub mod msr;
pub mod scripted;

use std::fmt::Debug;
use std::io;

use crate::constants::*;

/// Hardware registers the engine reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnergyRegister {
	/// RAPL power unit descriptor
	Unit,
	/// Per-core energy status
	Core,
	/// Per-package (socket) energy status
	Package,
}

impl EnergyRegister {
	/// MSR address of this register
	pub const fn address(self) -> u32 {
		match self {
			EnergyRegister::Unit => AMD_ENERGY_UNIT_MSR,
			EnergyRegister::Core => AMD_ENERGY_CORE_MSR,
			EnergyRegister::Package => AMD_ENERGY_PKG_MSR,
		}
	}
}

/// Source of raw, unmasked energy register values.
///
/// Reads are side-effect free from the engine's point of view and may fail at
/// any time, e.g. when the CPU goes offline between resolution and read.
pub trait CounterSource: Debug + Send + Sync {
	/// Reads the 64-bit register `register` on logical CPU `cpu`
	fn read_register(&self, cpu: usize, register: EnergyRegister) -> io::Result<u64>;

	/// Reads the energy status unit exponent (bits 12:8 of the unit register)
	fn read_energy_unit(&self) -> io::Result<u32> {
		let unit_msr = self.read_register(0, EnergyRegister::Unit)?;
		Ok(((unit_msr & ENERGY_UNIT_MASK) >> ENERGY_UNIT_SHIFT) as u32)
	}
}

impl<T: CounterSource + ?Sized> CounterSource for Box<T> {
	fn read_register(&self, cpu: usize, register: EnergyRegister) -> io::Result<u64> {
		(**self).read_register(cpu, register)
	}

	fn read_energy_unit(&self) -> io::Result<u32> {
		(**self).read_energy_unit()
	}
}

impl<T: CounterSource + ?Sized> CounterSource for std::sync::Arc<T> {
	fn read_register(&self, cpu: usize, register: EnergyRegister) -> io::Result<u64> {
		(**self).read_register(cpu, register)
	}

	fn read_energy_unit(&self) -> io::Result<u32> {
		(**self).read_energy_unit()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::source::scripted::ScriptedSource;

	#[test]
	fn energy_unit_is_extracted_from_bits_12_to_8() {
		let source = ScriptedSource::new();
		// Typical Zen value: power unit 3, energy unit 16, time unit 10
		source.push(0, EnergyRegister::Unit, 0x000A_1003);
		assert_eq!(source.read_energy_unit().unwrap(), 16);
	}

	#[test]
	fn register_addresses() {
		assert_eq!(EnergyRegister::Unit.address(), 0xC001_0299);
		assert_eq!(EnergyRegister::Core.address(), 0xC001_029A);
		assert_eq!(EnergyRegister::Package.address(), 0xC001_029B);
	}
}
