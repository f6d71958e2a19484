use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::{fs, io};

use log::{debug, warn};

const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

/// Static enumeration of cores and sockets plus a live online check.
///
/// Core and socket counts never change for the lifetime of the process; only
/// the online state of individual logical CPUs does.
pub trait Topology: Debug + Send + Sync {
	/// Number of physical cores (one energy channel each)
	fn core_count(&self) -> usize;

	/// Number of sockets (one energy channel each)
	fn socket_count(&self) -> usize;

	/// Logical CPU to read core `core`'s counter from, if it is online
	fn core_cpu(&self, core: usize) -> Option<usize>;

	/// First online logical CPU belonging to socket `socket`
	fn socket_cpu(&self, socket: usize) -> Option<usize>;
}

impl<T: Topology + ?Sized> Topology for std::sync::Arc<T> {
	fn core_count(&self) -> usize {
		(**self).core_count()
	}

	fn socket_count(&self) -> usize {
		(**self).socket_count()
	}

	fn core_cpu(&self, core: usize) -> Option<usize> {
		(**self).core_cpu(core)
	}

	fn socket_cpu(&self, socket: usize) -> Option<usize> {
		(**self).socket_cpu(socket)
	}
}

/// Physical core with its logical processors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalCore {
	/// Dense socket index, `None` for a core that was offline at startup
	pub socket: Option<usize>,
	pub threads: Vec<usize>,
}

/// Topology read from the Linux sysfs filesystem
#[derive(Debug, Clone)]
pub struct CpuTopology {
	/// Physical cores ordered by their lowest logical CPU
	pub cores: Vec<PhysicalCore>,

	/// Logical processors of each socket, ordered by socket id
	pub sockets: Vec<Vec<usize>>,

	root: PathBuf,
}

impl CpuTopology {
	/// Detects the system's CPU configuration
	pub fn new() -> io::Result<Self> {
		match Self::from_sysfs(Path::new(SYSFS_CPU_ROOT)) {
			Ok(topology) => Ok(topology),
			Err(e) => {
				warn!("could not read CPU topology from sysfs ({e}), falling back to linear layout");
				Ok(Self::linear())
			},
		}
	}

	/// Reads the topology below `root` (normally /sys/devices/system/cpu).
	///
	/// Offline CPUs carry no `topology/` directory. A present CPU that is
	/// offline at startup becomes a core of its own, as long as the online
	/// cores leave room for it given the SMT width, so core indices stay
	/// stable and the channel reports unavailable until the CPU returns.
	pub fn from_sysfs(root: &Path) -> io::Result<Self> {
		// (package, core_id) -> threads
		let mut cores: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
		let mut offline = Vec::new();
		let mut listed = 0;

		for entry in fs::read_dir(root)?.filter_map(Result::ok) {
			let filename = entry.file_name();
			let filename = filename.to_string_lossy();
			let Some(cpu_id) = filename.strip_prefix("cpu").and_then(|n| n.parse::<usize>().ok()) else {
				continue;
			};
			listed += 1;

			let topology_dir = entry.path().join("topology");
			match (
				read_sysfs_usize(&topology_dir.join("physical_package_id")),
				read_sysfs_usize(&topology_dir.join("core_id")),
			) {
				(Some(package), Some(core_id)) => cores.entry((package, core_id)).or_default().push(cpu_id),
				_ if !cpu_online(root, cpu_id) => offline.push(cpu_id),
				_ => debug!("cpu{cpu_id} has no topology information, skipping"),
			}
		}

		if cores.is_empty() {
			return Err(io::Error::new(
				io::ErrorKind::NotFound,
				"Could not read CPU topology from sysfs",
			));
		}

		let present = fs::read_to_string(root.join("present"))
			.ok()
			.and_then(|list| parse_cpu_list(&list))
			.map_or(listed, |cpus| cpus.len());

		let online_width = cores.values().map(Vec::len).max().unwrap_or(1);
		let smt_disabled = fs::read_to_string(root.join("smt/control"))
			.is_ok_and(|control| matches!(control.trim(), "off" | "forceoff"));
		// siblings of a core are offline as a whole when SMT is switched off
		let threads_per_core = if smt_disabled { online_width.max(2) } else { online_width };

		let missing = (present / threads_per_core).saturating_sub(cores.len());
		offline.sort_unstable();
		offline.truncate(missing);
		if !offline.is_empty() {
			warn!("cpus {offline:?} are offline, their core channels stay unavailable until they return");
		}

		Ok(Self::from_core_map(cores, offline, root.to_path_buf()))
	}

	/// Fallback layout: consecutive SMT siblings, a single socket
	pub fn linear() -> Self {
		let total_threads = num_cpus::get();
		let physical_cores = num_cpus::get_physical();
		let threads_per_core = if physical_cores > 0 {
			(total_threads / physical_cores).max(1)
		} else {
			1
		};

		let mut cores: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
		for thread_id in 0..total_threads {
			cores.entry((0, thread_id / threads_per_core)).or_default().push(thread_id);
		}

		Self::from_core_map(cores, Vec::new(), PathBuf::from(SYSFS_CPU_ROOT))
	}

	fn from_core_map(cores: BTreeMap<(usize, usize), Vec<usize>>, offline: Vec<usize>, root: PathBuf) -> Self {
		let mut package_index: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
		for (&(package, _), threads) in &cores {
			package_index.entry(package).or_default().extend(threads);
		}

		// Package ids need not be dense; renumber sockets in order
		let remap: BTreeMap<usize, usize> = package_index.keys().enumerate().map(|(i, &p)| (p, i)).collect();

		let mut physical: Vec<PhysicalCore> = cores
			.into_iter()
			.map(|((package, _), mut threads)| {
				threads.sort_unstable();
				PhysicalCore {
					socket: remap.get(&package).copied(),
					threads,
				}
			})
			.chain(offline.into_iter().map(|cpu| PhysicalCore {
				socket: None,
				threads: vec![cpu],
			}))
			.collect();
		physical.sort_by_key(|core| core.threads.first().copied());

		let sockets = package_index
			.into_values()
			.map(|mut threads| {
				threads.sort_unstable();
				threads
			})
			.collect();

		Self {
			cores: physical,
			sockets,
			root,
		}
	}
}

impl Topology for CpuTopology {
	fn core_count(&self) -> usize {
		self.cores.len()
	}

	fn socket_count(&self) -> usize {
		self.sockets.len()
	}

	fn core_cpu(&self, core: usize) -> Option<usize> {
		let core = self.cores.get(core)?;
		core.threads.iter().copied().find(|&cpu| cpu_online(&self.root, cpu))
	}

	fn socket_cpu(&self, socket: usize) -> Option<usize> {
		self.sockets
			.get(socket)?
			.iter()
			.copied()
			.find(|&cpu| cpu_online(&self.root, cpu))
	}
}

/// Checks whether logical CPU `cpu` below `root` is online.
///
/// CPUs that cannot be hot-plugged (usually cpu0) have no `online` file.
pub fn cpu_online(root: &Path, cpu: usize) -> bool {
	let cpu_dir = root.join(format!("cpu{cpu}"));
	match fs::read_to_string(cpu_dir.join("online")) {
		Ok(content) => content.trim() == "1",
		Err(_) => cpu_dir.exists(),
	}
}

/// Parses a sysfs CPU list such as `0-3,8,10-11`
fn parse_cpu_list(list: &str) -> Option<Vec<usize>> {
	let mut cpus = Vec::new();
	for range in list.trim().split(',').filter(|r| !r.is_empty()) {
		match range.split_once('-') {
			Some((first, last)) => cpus.extend(first.parse::<usize>().ok()?..=last.parse::<usize>().ok()?),
			None => cpus.push(range.parse().ok()?),
		}
	}
	Some(cpus)
}

fn read_sysfs_usize(path: &Path) -> Option<usize> {
	fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// In-memory topology with switchable online state, for tests and replay
#[derive(Debug)]
pub struct StaticTopology {
	cores: Vec<usize>,
	sockets: Vec<Vec<usize>>,
	offline: Mutex<HashSet<usize>>,
}

impl StaticTopology {
	/// `cores[i]` is the logical CPU backing core `i`; `sockets[s]` lists the CPUs of socket `s`
	pub fn new(cores: Vec<usize>, sockets: Vec<Vec<usize>>) -> Self {
		Self {
			cores,
			sockets,
			offline: Mutex::new(HashSet::new()),
		}
	}

	/// `cores_per_socket` cores on each of `socket_count` sockets, one CPU per core
	pub fn uniform(socket_count: usize, cores_per_socket: usize) -> Self {
		let cores = (0..socket_count * cores_per_socket).collect();
		let sockets = (0..socket_count)
			.map(|s| (s * cores_per_socket..(s + 1) * cores_per_socket).collect())
			.collect();
		Self::new(cores, sockets)
	}

	pub fn set_online(&self, cpu: usize, online: bool) {
		let mut offline = self.offline.lock().unwrap_or_else(|e| e.into_inner());
		if online {
			offline.remove(&cpu);
		} else {
			offline.insert(cpu);
		}
	}

	fn is_online(&self, cpu: usize) -> bool {
		!self.offline.lock().unwrap_or_else(|e| e.into_inner()).contains(&cpu)
	}
}

impl Topology for StaticTopology {
	fn core_count(&self) -> usize {
		self.cores.len()
	}

	fn socket_count(&self) -> usize {
		self.sockets.len()
	}

	fn core_cpu(&self, core: usize) -> Option<usize> {
		self.cores.get(core).copied().filter(|&cpu| self.is_online(cpu))
	}

	fn socket_cpu(&self, socket: usize) -> Option<usize> {
		self.sockets.get(socket)?.iter().copied().find(|&cpu| self.is_online(cpu))
	}
}
