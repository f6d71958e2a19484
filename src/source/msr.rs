use msru::{Accessor, Msr};
use std::io;

use log::{debug, warn};

use crate::source::{CounterSource, EnergyRegister};

/// Reads a value from a Model-Specific Register (MSR)
///
/// # Arguments
///
/// * `msr_address` - The address of the MSR to read
/// * `cpu_id` - The CPU ID to read the MSR from
///
/// # Returns
///
/// The value read from the MSR, or an io::Error if the read fails
pub fn read_msr(msr_address: u32, cpu_id: usize) -> io::Result<u64> {
	let cpu = u16::try_from(cpu_id).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "cpu id out of range"))?;
	Msr::new(msr_address, cpu)
		.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
		.read()
		.map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

/// Energy counters read through the `msr` driver (`/dev/cpu/N/msr`)
#[derive(Debug, Clone, Copy, Default)]
pub struct MsrSource;

impl MsrSource {
	pub fn new() -> Self {
		// SAFETY: geteuid has no preconditions and cannot fail
		let euid = unsafe { libc::geteuid() };
		if euid != 0 {
			warn!("running as uid {euid}: reading /dev/cpu/*/msr usually requires root or CAP_SYS_RAWIO");
		}
		Self
	}
}

impl CounterSource for MsrSource {
	fn read_register(&self, cpu: usize, register: EnergyRegister) -> io::Result<u64> {
		let value = read_msr(register.address(), cpu)?;
		debug!("cpu{cpu} {register:?} = {value:#x}");
		Ok(value)
	}
}
