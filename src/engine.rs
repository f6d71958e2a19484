use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::accumulator::Accumulator;
use crate::calibration::{Calibration, PowerLimits};
use crate::clock::{Clock, MonotonicClock};
use crate::constants::*;
use crate::cpu_type::{CounterWidth, CpuModel};
use crate::error::{EnergyError, Result};
use crate::poller::Poller;
use crate::source::msr::MsrSource;
use crate::source::{CounterSource, EnergyRegister};
use crate::topology::{CpuTopology, Topology};

/// Tunables of the accumulation engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
	/// Base cache lifetime of an accumulated value; jitter adds up to one more
	pub cache_window: Duration,
	/// Worst-case socket draw used to bound the polling period
	pub peak_power_watts: u64,
	/// Worst-case single core draw used to bound the round-robin revisit time
	pub core_peak_watts: u64,
	/// Requested polling period; never longer than the derived safe bound
	pub polling_period: Option<Duration>,
	/// Seed for the expiry jitter, `None` for OS entropy
	pub seed: Option<u64>,
	/// Forces a counter width instead of detecting it from the CPU model
	pub counter_width: Option<CounterWidth>,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			cache_window: DEFAULT_CACHE_WINDOW,
			peak_power_watts: DEFAULT_PEAK_POWER_WATTS,
			core_peak_watts: DEFAULT_CORE_PEAK_WATTS,
			polling_period: None,
			seed: None,
			counter_width: None,
		}
	}
}

/// What a channel measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
	/// A physical core, by core index
	Core(usize),
	/// A socket aggregate, by socket index
	Socket(usize),
}

impl ChannelKind {
	pub fn register(self) -> EnergyRegister {
		match self {
			ChannelKind::Core(_) => EnergyRegister::Core,
			ChannelKind::Socket(_) => EnergyRegister::Package,
		}
	}

	pub fn label(self) -> String {
		match self {
			ChannelKind::Core(core) => format!("core{core:03}"),
			ChannelKind::Socket(socket) => format!("socket{socket}"),
		}
	}
}

/// One energy channel: its identity, label and accumulated state
#[derive(Debug, Clone)]
pub struct Channel {
	pub label: String,
	pub kind: ChannelKind,
	pub accum: Accumulator,
}

#[derive(Debug)]
struct ChannelTable {
	channels: Vec<Channel>,
	/// Next core the poller refreshes
	cursor: usize,
	rng: StdRng,
}

/// Outcome of one background poll tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollTick {
	/// Core channel addressed by the round-robin cursor, if there are cores
	pub core: Option<usize>,
	/// Channels successfully refreshed
	pub refreshed: usize,
	/// Channels skipped because offline or because the read failed
	pub skipped: usize,
}

/// Per-core and per-socket energy accumulators over a wrapping counter source.
///
/// Channels `[0, cores)` are cores and `[cores, cores + sockets)` are sockets.
/// All accumulator state sits behind one lock, shared by foreground reads and
/// the background poller.
#[derive(Debug)]
pub struct EnergyEngine {
	source: Box<dyn CounterSource>,
	topology: Box<dyn Topology>,
	clock: Box<dyn Clock>,
	calibration: Calibration,
	width: CounterWidth,
	cache_window: Duration,
	core_count: usize,
	/// Detected processor, when built from the local hardware
	cpu: Option<CpuModel>,
	table: Mutex<ChannelTable>,
}

impl EnergyEngine {
	/// Builds an engine over the given collaborators and calibrates it
	pub fn new(
		source: Box<dyn CounterSource>,
		topology: Box<dyn Topology>,
		clock: Box<dyn Clock>,
		width: CounterWidth,
		config: &EngineConfig,
	) -> Result<Self> {
		let core_count = topology.core_count();
		let socket_count = topology.socket_count();

		let limits = PowerLimits {
			peak_power_watts: config.peak_power_watts,
			core_peak_watts: config.core_peak_watts,
			core_count,
		};
		let calibration = Calibration::calibrate(source.as_ref(), limits, config.polling_period)?;

		let channels = (0..core_count)
			.map(ChannelKind::Core)
			.chain((0..socket_count).map(ChannelKind::Socket))
			.map(|kind| Channel {
				label: kind.label(),
				kind,
				accum: Accumulator::new(),
			})
			.collect();

		let rng = match config.seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_entropy(),
		};

		info!("{core_count} cores and {socket_count} sockets with {width} energy counters");

		Ok(Self {
			source,
			topology,
			clock,
			calibration,
			width,
			cache_window: config.cache_window,
			core_count,
			cpu: None,
			table: Mutex::new(ChannelTable {
				channels,
				cursor: 0,
				rng,
			}),
		})
	}

	/// Builds an engine over the local processor's MSRs
	pub fn from_hardware(config: &EngineConfig) -> Result<Self> {
		let cpu = CpuModel::detect()?;
		let width = cpu.select_counter_width(config.counter_width)?;
		info!(
			"{} ({}), family {:#x} model {:#x}",
			cpu.name,
			cpu.codename().unwrap_or("unknown"),
			cpu.family,
			cpu.model
		);

		let topology = CpuTopology::new().map_err(EnergyError::Topology)?;
		let mut engine = Self::new(
			Box::new(MsrSource::new()),
			Box::new(topology),
			Box::new(MonotonicClock),
			width,
			config,
		)?;
		engine.cpu = Some(cpu);
		Ok(engine)
	}

	/// Starts the background poller when the counters need it
	pub fn start(self) -> Result<EnergyDevice> {
		let engine = Arc::new(self);
		let poller = if engine.width.needs_polling() {
			Some(Poller::spawn(Arc::clone(&engine), engine.calibration.polling_period)?)
		} else {
			info!("CPU supports {} energy counters, no background polling", engine.width);
			None
		};

		Ok(EnergyDevice { engine, poller })
	}

	pub fn channel_count(&self) -> usize {
		self.lock_table().channels.len()
	}

	pub fn core_count(&self) -> usize {
		self.core_count
	}

	pub fn socket_count(&self) -> usize {
		self.channel_count() - self.core_count
	}

	pub fn calibration(&self) -> Calibration {
		self.calibration
	}

	pub fn counter_width(&self) -> CounterWidth {
		self.width
	}

	pub fn cpu(&self) -> Option<&CpuModel> {
		self.cpu.as_ref()
	}

	/// Human readable name of a channel: `core%03d` or `socket%d`
	pub fn label(&self, channel: usize) -> Result<String> {
		let table = self.lock_table();
		table
			.channels
			.get(channel)
			.map(|c| c.label.clone())
			.ok_or(EnergyError::InvalidChannel {
				channel,
				count: table.channels.len(),
			})
	}

	/// Accumulated energy of `channel` in microjoules.
	///
	/// Serves the cached total while it is fresh; otherwise samples the counter
	/// first. A failed read leaves the channel untouched.
	pub fn read(&self, channel: usize) -> Result<u64> {
		let kind = self.channel_kind(channel)?;
		let cpu = self.resolve(kind).ok_or(EnergyError::ChannelUnavailable { channel })?;

		let total = {
			let mut table = self.lock_table();
			let now = self.clock.now();
			if table.channels[channel].accum.is_stale(now) {
				self.refresh(&mut table, channel, cpu)?
			} else {
				table.channels[channel].accum.total()
			}
		};

		Ok(self.calibration.to_microjoules(total))
	}

	/// Raw accumulated total of `channel` in hardware energy units, without sampling
	pub fn cached_total(&self, channel: usize) -> Result<u64> {
		let table = self.lock_table();
		table
			.channels
			.get(channel)
			.map(|c| c.accum.total())
			.ok_or(EnergyError::InvalidChannel {
				channel,
				count: table.channels.len(),
			})
	}

	/// One background tick: every socket, then the next core in round-robin order
	pub fn poll_tick(&self) -> PollTick {
		let mut tick = PollTick::default();

		for socket in 0..self.socket_count() {
			let channel = self.core_count + socket;
			match self.topology.socket_cpu(socket) {
				Some(cpu) => self.poll_channel(channel, cpu, &mut tick),
				None => {
					warn!("socket{socket} has no online CPU, skipping");
					tick.skipped += 1;
				},
			}
		}

		if self.core_count == 0 {
			return tick;
		}

		let core = {
			let mut table = self.lock_table();
			if table.cursor >= self.core_count {
				table.cursor = 0;
			}
			let core = table.cursor;
			table.cursor += 1;
			core
		};
		tick.core = Some(core);

		match self.topology.core_cpu(core) {
			Some(cpu) => self.poll_channel(core, cpu, &mut tick),
			None => {
				debug!("core{core:03} offline, skipping");
				tick.skipped += 1;
			},
		}

		tick
	}

	fn poll_channel(&self, channel: usize, cpu: usize, tick: &mut PollTick) {
		let mut table = self.lock_table();
		match self.refresh(&mut table, channel, cpu) {
			Ok(_) => tick.refreshed += 1,
			Err(e) => {
				warn!("background refresh failed: {e}");
				tick.skipped += 1;
			},
		}
	}

	/// Samples the hardware and folds it into `channel`; caller holds the lock
	fn refresh(&self, table: &mut ChannelTable, channel: usize, cpu: usize) -> Result<u64> {
		let register = table.channels[channel].kind.register();
		let raw = self
			.source
			.read_register(cpu, register)
			.map_err(|source| EnergyError::ReadFailure { channel, source })?;

		let now = self.clock.now();
		let ChannelTable { channels, rng, .. } = table;
		let total = channels[channel]
			.accum
			.accumulate(raw, self.width, now, self.cache_window, rng);
		debug!("{} raw {raw:#x} total {total}", channels[channel].label);

		Ok(total)
	}

	/// Whether `channel` is a core or a socket, and which one
	pub fn channel_kind(&self, channel: usize) -> Result<ChannelKind> {
		let table = self.lock_table();
		table
			.channels
			.get(channel)
			.map(|c| c.kind)
			.ok_or(EnergyError::InvalidChannel {
				channel,
				count: table.channels.len(),
			})
	}

	fn resolve(&self, kind: ChannelKind) -> Option<usize> {
		match kind {
			ChannelKind::Core(core) => self.topology.core_cpu(core),
			ChannelKind::Socket(socket) => self.topology.socket_cpu(socket),
		}
	}

	// The table is consistent between statements, so a panic elsewhere
	// does not invalidate it
	fn lock_table(&self) -> MutexGuard<'_, ChannelTable> {
		self.table.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

/// A running engine: the shared accumulator state plus its poller, if any.
///
/// Dropping the device stops the poller.
#[derive(Debug)]
pub struct EnergyDevice {
	engine: Arc<EnergyEngine>,
	poller: Option<Poller>,
}

impl EnergyDevice {
	pub fn engine(&self) -> &Arc<EnergyEngine> {
		&self.engine
	}

	pub fn poller(&self) -> Option<&Poller> {
		self.poller.as_ref()
	}

	pub fn read(&self, channel: usize) -> Result<u64> {
		self.engine.read(channel)
	}

	pub fn label(&self, channel: usize) -> Result<String> {
		self.engine.label(channel)
	}

	/// Stops the poller and waits for it to exit
	pub fn shutdown(mut self) {
		if let Some(poller) = self.poller.take() {
			poller.stop();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;
	use crate::source::scripted::ScriptedSource;
	use crate::topology::StaticTopology;

	// energy unit 16: 65536 counts per Joule
	const UNIT_MSR: u64 = 0x000A_1003;
	const WINDOW: Duration = Duration::from_secs(1);

	struct Fixture {
		source: Arc<ScriptedSource>,
		topology: Arc<StaticTopology>,
		clock: Arc<ManualClock>,
		engine: EnergyEngine,
	}

	fn fixture(sockets: usize, cores_per_socket: usize) -> Fixture {
		let source = Arc::new(ScriptedSource::new());
		source.push(0, EnergyRegister::Unit, UNIT_MSR);
		let topology = Arc::new(StaticTopology::uniform(sockets, cores_per_socket));
		let clock = Arc::new(ManualClock::new());

		let config = EngineConfig {
			seed: Some(42),
			..EngineConfig::default()
		};
		let engine = EnergyEngine::new(
			Box::new(Arc::clone(&source)),
			Box::new(Arc::clone(&topology)),
			Box::new(Arc::clone(&clock)),
			CounterWidth::Narrow,
			&config,
		)
		.unwrap();

		Fixture {
			source,
			topology,
			clock,
			engine,
		}
	}

	#[test]
	fn labels_follow_channel_layout() {
		let f = fixture(2, 3);
		assert_eq!(f.engine.channel_count(), 8);
		assert_eq!(f.engine.socket_count(), 2);
		assert_eq!(f.engine.label(0).unwrap(), "core000");
		assert_eq!(f.engine.label(5).unwrap(), "core005");
		assert_eq!(f.engine.label(6).unwrap(), "socket0");
		assert_eq!(f.engine.label(7).unwrap(), "socket1");
		assert!(matches!(
			f.engine.label(8),
			Err(EnergyError::InvalidChannel { channel: 8, count: 8 })
		));
	}

	#[test]
	fn injected_collaborators_carry_no_detected_cpu() {
		let mut f = fixture(1, 1);
		assert!(f.engine.cpu().is_none());

		let cpu = CpuModel::parse("vendor_id\t: AuthenticAMD\ncpu family\t: 25\nmodel\t\t: 33\n");
		f.engine.cpu = Some(cpu.clone());
		assert_eq!(f.engine.cpu(), Some(&cpu));
	}

	#[test]
	fn first_read_samples_and_converts() {
		let f = fixture(1, 2);
		f.source.push(1, EnergyRegister::Core, 3 << 16);

		assert_eq!(f.engine.read(1).unwrap(), 3_000_000);
		assert_eq!(f.source.reads(1, EnergyRegister::Core), 1);
	}

	#[test]
	fn cached_reads_do_not_touch_hardware() {
		let f = fixture(1, 2);
		f.source.push(0, EnergyRegister::Core, 1 << 16);
		f.source.push(0, EnergyRegister::Core, 5 << 16);

		let first = f.engine.read(0).unwrap();
		f.clock.advance(WINDOW / 2);
		let second = f.engine.read(0).unwrap();

		assert_eq!(first, second);
		assert_eq!(f.source.reads(0, EnergyRegister::Core), 1);
	}

	#[test]
	fn stale_cache_is_refreshed() {
		let f = fixture(1, 2);
		f.source.push(0, EnergyRegister::Core, 1 << 16);
		f.source.push(0, EnergyRegister::Core, 5 << 16);

		assert_eq!(f.engine.read(0).unwrap(), 1_000_000);
		f.clock.advance(2 * WINDOW);
		assert_eq!(f.engine.read(0).unwrap(), 5_000_000);
		assert_eq!(f.source.reads(0, EnergyRegister::Core), 2);
	}

	#[test]
	fn wrap_is_folded_into_total() {
		let f = fixture(1, 1);
		f.source.push(0, EnergyRegister::Core, 4_294_967_290);
		f.source.push(0, EnergyRegister::Core, 10);

		f.engine.read(0).unwrap();
		f.clock.advance(2 * WINDOW);
		f.engine.read(0).unwrap();

		assert_eq!(f.engine.cached_total(0).unwrap(), 4_294_967_290 + 15);
	}

	#[test]
	fn read_failure_leaves_state_untouched() {
		let f = fixture(1, 1);
		f.source.push(0, EnergyRegister::Core, 100 << 16);
		f.engine.read(0).unwrap();

		f.clock.advance(2 * WINDOW);
		f.source.push(0, EnergyRegister::Core, 150 << 16);
		f.source.fail_next(0, EnergyRegister::Core, 1);

		let err = f.engine.read(0).unwrap_err();
		assert!(matches!(err, EnergyError::ReadFailure { channel: 0, .. }));
		assert_eq!(f.engine.cached_total(0).unwrap(), 100 << 16);

		assert_eq!(f.engine.read(0).unwrap(), 150_000_000);
	}

	#[test]
	fn offline_core_is_isolated() {
		let f = fixture(1, 3);
		for cpu in 0..3 {
			f.source.push(cpu, EnergyRegister::Core, 1 << 16);
			f.source.push(cpu, EnergyRegister::Core, 2 << 16);
		}
		f.source.push(0, EnergyRegister::Package, 7 << 16);

		f.topology.set_online(1, false);
		assert!(matches!(
			f.engine.read(1),
			Err(EnergyError::ChannelUnavailable { channel: 1 })
		));
		assert_eq!(f.source.reads(1, EnergyRegister::Core), 0);

		assert_eq!(f.engine.read(0).unwrap(), 1_000_000);
		assert_eq!(f.engine.read(2).unwrap(), 1_000_000);
		assert_eq!(f.engine.read(3).unwrap(), 7_000_000);

		f.clock.advance(2 * WINDOW);
		assert_eq!(f.engine.read(0).unwrap(), 2_000_000);
		assert!(f.engine.read(1).is_err());

		f.topology.set_online(1, true);
		assert_eq!(f.engine.read(1).unwrap(), 1_000_000);
	}

	#[test]
	fn socket_reads_fall_back_to_any_online_cpu() {
		let f = fixture(1, 2);
		f.source.push(1, EnergyRegister::Package, 4 << 16);
		f.topology.set_online(0, false);

		assert_eq!(f.engine.read(2).unwrap(), 4_000_000);

		f.topology.set_online(1, false);
		assert!(matches!(
			f.engine.read(2),
			Err(EnergyError::ChannelUnavailable { channel: 2 })
		));
	}

	#[test]
	fn poll_tick_covers_sockets_and_rotates_cores() {
		let f = fixture(2, 2);
		for cpu in 0..4 {
			f.source.push(cpu, EnergyRegister::Core, 1);
			f.source.push(cpu, EnergyRegister::Package, 1);
		}

		let cores: Vec<_> = (0..4).map(|_| f.engine.poll_tick().core).collect();
		assert_eq!(cores, vec![Some(0), Some(1), Some(2), Some(3)]);
		for cpu in 0..4 {
			assert_eq!(f.source.reads(cpu, EnergyRegister::Core), 1, "cpu{cpu}");
		}
		// first online CPU of each socket, once per tick
		assert_eq!(f.source.reads(0, EnergyRegister::Package), 4);
		assert_eq!(f.source.reads(2, EnergyRegister::Package), 4);

		assert_eq!(f.engine.poll_tick().core, Some(0));
	}

	#[test]
	fn poll_tick_skips_offline_core_but_advances() {
		let f = fixture(1, 2);
		f.source.push(1, EnergyRegister::Package, 1);
		f.source.push(1, EnergyRegister::Core, 1);
		f.topology.set_online(0, false);

		let tick = f.engine.poll_tick();
		assert_eq!(tick.core, Some(0));
		assert_eq!(tick.refreshed, 1);
		assert_eq!(tick.skipped, 1);
		assert_eq!(f.source.reads(0, EnergyRegister::Core), 0);

		let tick = f.engine.poll_tick();
		assert_eq!(tick.core, Some(1));
		assert_eq!(tick.refreshed, 2);
		assert_eq!(tick.skipped, 0);
	}

	#[test]
	fn polled_values_warm_the_cache() {
		let f = fixture(1, 1);
		f.source.push(0, EnergyRegister::Core, 9 << 16);
		f.source.push(0, EnergyRegister::Package, 9 << 16);

		f.engine.poll_tick();
		assert_eq!(f.engine.read(0).unwrap(), 9_000_000);
		assert_eq!(f.engine.read(1).unwrap(), 9_000_000);
		assert_eq!(f.source.total_reads(), 3);
	}
}
