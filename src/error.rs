use std::io;

/// Errors reported by the energy accumulation engine.
#[derive(Debug, thiserror::Error)]
pub enum EnergyError {
	/// The energy unit descriptor could not be read; the engine cannot start.
	#[error("failed to read the energy unit descriptor: {0}")]
	CalibrationFailure(#[source] io::Error),

	/// The processing unit backing a channel is offline or does not exist.
	#[error("channel {channel} is unavailable: backing unit is offline")]
	ChannelUnavailable { channel: usize },

	/// A raw register read failed; accumulator state was left untouched.
	#[error("failed to read energy counter for channel {channel}: {source}")]
	ReadFailure {
		channel: usize,
		#[source]
		source: io::Error,
	},

	/// The background poller thread could not be spawned.
	#[error("failed to start the background poller: {0}")]
	PollerStartFailure(#[source] io::Error),

	/// The channel index is outside `[0, count)`.
	#[error("channel {channel} out of range (engine has {count} channels)")]
	InvalidChannel { channel: usize, count: usize },

	/// The processor is not one of the supported parts.
	#[error("unsupported processor: {0}")]
	UnsupportedCpu(String),

	/// CPU topology could not be enumerated.
	#[error("failed to enumerate CPU topology: {0}")]
	Topology(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, EnergyError>;
