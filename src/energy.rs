use std::time::Instant;

use log::debug;

use crate::engine::{ChannelKind, EnergyEngine};
use crate::error::Result;

/// Energy of one channel at the time of a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEnergy {
	pub label: String,
	pub kind: ChannelKind,

	/// Accumulated energy in microjoules, `None` if the channel could not be read
	pub microjoules: Option<u64>,
}

/// Point-in-time reading of every channel of an engine
#[derive(Debug, Clone)]
pub struct EnergySnapshot {
	pub taken_at: Instant,
	pub channels: Vec<ChannelEnergy>,
}

impl EnergySnapshot {
	/// Reads every channel; unavailable or failing channels are recorded as `None`
	pub fn capture(engine: &EnergyEngine) -> Self {
		let taken_at = Instant::now();
		let channels = (0..engine.channel_count())
			.filter_map(|channel| read_channel(engine, channel).ok())
			.collect();

		Self { taken_at, channels }
	}

	/// Reads the given channels, failing only on indices outside the engine's range
	pub fn capture_channels(engine: &EnergyEngine, channels: &[usize]) -> Result<Self> {
		let taken_at = Instant::now();
		let channels = channels
			.iter()
			.map(|&channel| read_channel(engine, channel))
			.collect::<Result<Vec<_>>>()?;

		Ok(Self { taken_at, channels })
	}

	pub fn cores(&self) -> impl Iterator<Item = &ChannelEnergy> {
		self.channels.iter().filter(|c| matches!(c.kind, ChannelKind::Core(_)))
	}

	pub fn sockets(&self) -> impl Iterator<Item = &ChannelEnergy> {
		self.channels.iter().filter(|c| matches!(c.kind, ChannelKind::Socket(_)))
	}
}

fn read_channel(engine: &EnergyEngine, channel: usize) -> Result<ChannelEnergy> {
	let label = engine.label(channel)?;
	let kind = engine.channel_kind(channel)?;
	let microjoules = match engine.read(channel) {
		Ok(value) => Some(value),
		Err(e) => {
			debug!("{label}: {e}");
			None
		},
	};

	Ok(ChannelEnergy {
		label,
		kind,
		microjoules,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	use crate::clock::MonotonicClock;
	use crate::cpu_type::CounterWidth;
	use crate::engine::EngineConfig;
	use crate::error::EnergyError;
	use crate::source::EnergyRegister;
	use crate::source::scripted::ScriptedSource;
	use crate::topology::StaticTopology;

	fn engine() -> (Arc<StaticTopology>, EnergyEngine) {
		let source = ScriptedSource::new();
		source.push(0, EnergyRegister::Unit, 0x000A_1003);
		source.push(0, EnergyRegister::Core, 1 << 16);
		source.push(1, EnergyRegister::Core, 2 << 16);
		source.push(0, EnergyRegister::Package, 3 << 16);

		let topology = Arc::new(StaticTopology::uniform(1, 2));
		let engine = EnergyEngine::new(
			Box::new(source),
			Box::new(Arc::clone(&topology)),
			Box::new(MonotonicClock),
			CounterWidth::Narrow,
			&EngineConfig::default(),
		)
		.unwrap();
		(topology, engine)
	}

	#[test]
	fn capture_reads_every_channel() {
		let (topology, engine) = engine();
		topology.set_online(1, false);

		let snapshot = EnergySnapshot::capture(&engine);
		let cores: Vec<_> = snapshot.cores().map(|c| c.microjoules).collect();
		let sockets: Vec<_> = snapshot.sockets().map(|c| (c.label.as_str(), c.microjoules)).collect();

		assert_eq!(cores, vec![Some(1_000_000), None]);
		assert_eq!(sockets, vec![("socket0", Some(3_000_000))]);
	}

	#[test]
	fn capture_channels_rejects_unknown_indices() {
		let (_, engine) = engine();

		let snapshot = EnergySnapshot::capture_channels(&engine, &[2, 1]).unwrap();
		assert_eq!(snapshot.channels[0].kind, ChannelKind::Socket(0));
		assert_eq!(snapshot.channels[1].microjoules, Some(2_000_000));

		let err = EnergySnapshot::capture_channels(&engine, &[0, 3]).unwrap_err();
		assert!(matches!(err, EnergyError::InvalidChannel { channel: 3, count: 3 }));
	}
}
