use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Mutex;

use crate::source::{CounterSource, EnergyRegister};

#[derive(Debug, Default)]
struct Script {
	queued: VecDeque<u64>,
	last: Option<u64>,
	failures: usize,
	reads: usize,
}

/// In-memory counter source driven by queued register values.
///
/// Each `(cpu, register)` pair replays its queued values in order, then keeps
/// returning the last one. Reads of pairs with nothing queued fail.
#[derive(Debug, Default)]
pub struct ScriptedSource {
	scripts: Mutex<HashMap<(usize, EnergyRegister), Script>>,
}

impl ScriptedSource {
	pub fn new() -> Self {
		Self::default()
	}

	/// Queues the next value returned for `(cpu, register)`
	pub fn push(&self, cpu: usize, register: EnergyRegister, value: u64) {
		self.with_script(cpu, register, |script| script.queued.push_back(value));
	}

	/// Makes the next `count` reads of `(cpu, register)` fail without consuming values
	pub fn fail_next(&self, cpu: usize, register: EnergyRegister, count: usize) {
		self.with_script(cpu, register, |script| script.failures += count);
	}

	/// Number of read attempts made on `(cpu, register)`, failed ones included
	pub fn reads(&self, cpu: usize, register: EnergyRegister) -> usize {
		self.with_script(cpu, register, |script| script.reads)
	}

	/// Total read attempts across every register
	pub fn total_reads(&self) -> usize {
		let scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
		scripts.values().map(|script| script.reads).sum()
	}

	fn with_script<R>(&self, cpu: usize, register: EnergyRegister, f: impl FnOnce(&mut Script) -> R) -> R {
		let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
		f(scripts.entry((cpu, register)).or_default())
	}
}

impl CounterSource for ScriptedSource {
	fn read_register(&self, cpu: usize, register: EnergyRegister) -> io::Result<u64> {
		self.with_script(cpu, register, |script| {
			script.reads += 1;
			if script.failures > 0 {
				script.failures -= 1;
				return Err(io::Error::new(io::ErrorKind::Other, "scripted read failure"));
			}
			if let Some(value) = script.queued.pop_front() {
				script.last = Some(value);
			}
			script.last.ok_or_else(|| {
				io::Error::new(
					io::ErrorKind::NotFound,
					format!("no value scripted for cpu{cpu} {register:?}"),
				)
			})
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn replays_then_repeats_last_value() {
		let source = ScriptedSource::new();
		source.push(1, EnergyRegister::Core, 10);
		source.push(1, EnergyRegister::Core, 20);

		assert_eq!(source.read_register(1, EnergyRegister::Core).unwrap(), 10);
		assert_eq!(source.read_register(1, EnergyRegister::Core).unwrap(), 20);
		assert_eq!(source.read_register(1, EnergyRegister::Core).unwrap(), 20);
		assert_eq!(source.reads(1, EnergyRegister::Core), 3);
		assert!(source.read_register(1, EnergyRegister::Package).is_err());
	}

	#[test]
	fn injected_failures_do_not_consume_values() {
		let source = ScriptedSource::new();
		source.push(0, EnergyRegister::Package, 7);
		source.fail_next(0, EnergyRegister::Package, 1);

		assert!(source.read_register(0, EnergyRegister::Package).is_err());
		assert_eq!(source.read_register(0, EnergyRegister::Package).unwrap(), 7);
		assert_eq!(source.total_reads(), 2);
	}
}
