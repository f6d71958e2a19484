use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use log::info;

use zen_energy::constants::*;
use zen_energy::cpu_type::CounterWidth;
use zen_energy::display::print_snapshot;
use zen_energy::energy::EnergySnapshot;
use zen_energy::{EnergyEngine, EngineConfig, watch_energy};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	#[command(flatten)]
	engine: EngineArgs,
}

#[derive(Args)]
struct EngineArgs {
	/// Base cache window of an accumulated value, in milliseconds.
	#[arg(long, global = true, default_value_t = DEFAULT_CACHE_WINDOW.as_millis() as u64)]
	cache_window_ms: u64,

	/// Worst-case socket power draw, in Watts.
	#[arg(long, global = true, default_value_t = DEFAULT_PEAK_POWER_WATTS)]
	peak_watts: u64,

	/// Worst-case single core power draw, in Watts.
	#[arg(long, global = true, default_value_t = DEFAULT_CORE_PEAK_WATTS)]
	core_peak_watts: u64,

	/// Background polling period in milliseconds (clamped to the safe bound).
	#[arg(long, global = true)]
	poll_ms: Option<u64>,

	/// Seed for the cache expiry jitter.
	#[arg(long, global = true)]
	seed: Option<u64>,

	/// Override the detected energy counter width.
	#[arg(long, global = true, value_enum)]
	counter_width: Option<CounterWidth>,
}

impl EngineArgs {
	fn config(&self) -> EngineConfig {
		EngineConfig {
			cache_window: Duration::from_millis(self.cache_window_ms),
			peak_power_watts: self.peak_watts,
			core_peak_watts: self.core_peak_watts,
			polling_period: self.poll_ms.map(Duration::from_millis),
			seed: self.seed,
			counter_width: self.counter_width,
		}
	}
}

#[derive(Subcommand)]
enum Commands {
	/// Show the detected counters, calibration and channels, then exit.
	Info,

	/// Print the accumulated energy (µJ) of some channels, then exit.
	Read {
		/// Channel indices; all channels when omitted.
		channels: Vec<usize>,
	},

	/// Run the background poller and display power continuously.
	Watch {
		/// Sampling interval, in milliseconds.
		#[arg(short, long, default_value_t = DEFAULT_WATCH_INTERVAL_MS)]
		interval_ms: u64,

		/// Stop after this many samples.
		#[arg(short, long)]
		count: Option<u64>,
	},
}

fn main() -> anyhow::Result<()> {
	let env = env_logger::Env::default().default_filter_or("info");
	env_logger::init_from_env(env);

	let cli = Cli::parse();
	let config = cli.engine.config();
	let engine = EnergyEngine::from_hardware(&config).context("failed to initialize the energy engine")?;

	match cli.command {
		Commands::Info => {
			let calibration = engine.calibration();
			if let Some(cpu) = engine.cpu() {
				println!("CPU: {} ({:?}, family {:#x} model {:#x})", cpu.name, cpu.vendor, cpu.family, cpu.model);
			}
			println!("Counter width: {}", engine.counter_width());
			println!("Energy unit: 1/2^{} J", calibration.energy_unit);
			println!("Polling period: {:?}", calibration.polling_period);
			println!(
				"Channels: {} ({} cores, {} sockets)",
				engine.channel_count(),
				engine.core_count(),
				engine.socket_count()
			);
			for channel in 0..engine.channel_count() {
				println!("  {channel:>4}: {}", engine.label(channel)?);
			}
		},
		Commands::Read { channels } => {
			let snapshot = if channels.is_empty() {
				EnergySnapshot::capture(&engine)
			} else {
				EnergySnapshot::capture_channels(&engine, &channels)?
			};
			print_snapshot(&snapshot)?;
		},
		Commands::Watch { interval_ms, count } => {
			let device = engine.start().context("failed to start the energy engine")?;
			watch_energy(&device, Duration::from_millis(interval_ms), count)?;
			device.shutdown();
			info!("stopped");
		},
	}

	Ok(())
}
