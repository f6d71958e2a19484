use std::io::{self, Write};

use crate::energy::EnergySnapshot;
use crate::power::PowerReading;

/// Number of terminal lines `display_power_readings` redraws
pub fn display_line_count(socket_count: usize, core_count: usize) -> usize {
	1 + socket_count + usize::from(core_count > 0) + core_count.div_ceil(2)
}

/// Displays power readings in the terminal with ANSI formatting
pub fn display_power_readings(readings: &PowerReading) -> io::Result<()> {
	let total_lines = display_line_count(readings.sockets.len(), readings.cores.len());

	print!("\x1B[{total_lines}A"); // Move cursor up

	print!("\x1B[2K"); // Clear line
	println!(
		"Package: {:6.2} W | Cores Total: {:6.2} W",
		readings.sockets_total(),
		readings.cores_total()
	);

	for (label, power) in &readings.sockets {
		print!("\x1B[2K");
		println!("{label}: {power:6.2} W");
	}

	if !readings.cores.is_empty() {
		print!("\x1B[2K");
		println!("Cores: {:6.2} W", readings.cores_total());

		display_core_group(&readings.cores)?;
	}

	io::stdout().flush()
}

/// Helper function to display a group of cores in a two-column layout
fn display_core_group(core_list: &[(String, f64)]) -> io::Result<()> {
	for pair in core_list.chunks(2) {
		let (core_label, core_power) = &pair[0];

		let core2_str = match pair.get(1) {
			Some((core2_label, core2_power)) => format!("| {core2_label}:  {core2_power:5.2} W"),
			None => String::new(),
		};

		print!("\x1B[2K");
		println!("{core_label}:   {core_power:5.2} W {core2_str}");
	}

	Ok(())
}

/// Print empty lines to prepare for display
pub fn prepare_display_area(socket_count: usize, core_count: usize) -> io::Result<()> {
	let mut stdout = io::stdout().lock();
	for _ in 0..display_line_count(socket_count, core_count) {
		writeln!(stdout)?;
	}
	stdout.flush()
}

/// Prints one `label value` line per channel, hwmon style
pub fn print_snapshot(snapshot: &EnergySnapshot) -> io::Result<()> {
	let mut stdout = io::stdout().lock();
	for channel in &snapshot.channels {
		match channel.microjoules {
			Some(uj) => writeln!(stdout, "{:<10} {uj}", channel.label)?,
			None => writeln!(stdout, "{:<10} unavailable", channel.label)?,
		}
	}
	stdout.flush()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn line_count_matches_layout() {
		// header, 2 sockets, cores header, 3 rows of two cores
		assert_eq!(display_line_count(2, 6), 7);
		assert_eq!(display_line_count(1, 5), 6);
		assert_eq!(display_line_count(1, 0), 2);
	}
}
