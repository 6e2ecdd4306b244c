//! Retirement drill.
//!
//! Registers a driver, mounts instances with populated resource trees and lets worker threads
//! dispatch through them while the driver is unregistered. Any dispatch that starts after
//! `unregister` returned and still succeeds is a violation. The drill then releases every
//! instance, tears the registry down and checks that the code unit can unload.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use clap::Parser;
use quiesce_registry::{
	DispatchError, DriverFlags, FileOp, Instance, NodeHook, NodeId, NodeOp, OpReply, OpRequest, OperationTable, Registry, RegistryConfig,
	ResourceTree,
};
use tracing::{info, warn};

/// Drill command line arguments.
#[derive(Parser, Debug)]
#[command(name = "quiesce-drill")]
#[command(about = "Retire a driver while threads dispatch through it")]
struct Args {
	/// Registry capacity config (TOML)
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Instances to mount
	#[arg(long, default_value_t = 4)]
	instances: usize,

	/// Dispatching worker threads
	#[arg(long, default_value_t = 8)]
	workers: usize,

	/// Depth of each instance's tree below the root
	#[arg(long, default_value_t = 3)]
	depth: usize,

	/// Children per node
	#[arg(long, default_value_t = 4)]
	fanout: usize,

	/// Milliseconds of dispatch before the driver is retired
	#[arg(long, default_value_t = 50)]
	run_ms: u64,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[derive(Debug, Default)]
struct Tally {
	dispatched: AtomicU64,
	failed: AtomicU64,
	violations: AtomicU64,
}

/// Dispatches after the retire flag is seen before a worker stops.
const TRAILING_ROUNDS: usize = 256;

fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();
	setup_tracing(args.verbose);

	let config = match &args.config {
		Some(path) => RegistryConfig::load(path)?,
		None => RegistryConfig::default(),
	};
	info!(?config, instances = args.instances, workers = args.workers, "starting drill");

	let registry = Registry::new(config);
	let (depth, fanout) = (args.depth, args.fanout);
	let handle = registry.register("drillfs", DriverFlags::empty(), move |instance: &Instance| {
		let hook = instance.with_tree(|tree| tree.hook(tree.root()).cloned())?;
		populate(instance, hook, depth, fanout)
	})?;

	let files = registry.new_file_table(handle)?;
	files.set(FileOp::Read, |req| Ok(OpReply::Data(req.data.to_vec())))?;
	files.set(FileOp::Write, |req| Ok(OpReply::Count(req.data.len())))?;
	let nodes = registry.new_node_table(handle)?;
	nodes.set(NodeOp::GetAttr, |_| Ok(OpReply::Done))?;
	nodes.set(NodeOp::Lookup, |req| Ok(OpReply::Count(req.name.map_or(0, str::len))))?;

	let construct = registry
		.constructor(handle)
		.ok_or("driver vanished before mounting")?;
	let mut mounted = Vec::with_capacity(args.instances);
	for _ in 0..args.instances {
		let instance = Arc::new(Instance::with_capacity(
			handle,
			NodeHook::Driver(Arc::clone(&nodes)),
			registry.config().max_nodes_per_instance,
		));
		construct(instance.as_ref())?;
		registry.instance_acquire(&instance)?;
		let targets = instance.with_tree(node_ids);
		mounted.push((instance, targets));
	}
	let mounted = Arc::new(mounted);

	let retired = Arc::new(AtomicBool::new(false));
	let tally = Arc::new(Tally::default());
	let barrier = Arc::new(Barrier::new(args.workers + 1));
	let workers: Vec<_> = (0..args.workers)
		.map(|worker| {
			let ctx = Worker {
				id: worker,
				files: Arc::clone(&files),
				mounted: Arc::clone(&mounted),
				retired: Arc::clone(&retired),
				tally: Arc::clone(&tally),
			};
			let barrier = Arc::clone(&barrier);
			thread::spawn(move || {
				barrier.wait();
				ctx.run();
			})
		})
		.collect();

	barrier.wait();
	thread::sleep(Duration::from_millis(args.run_ms));
	let report = registry.unregister(handle)?;
	retired.store(true, Ordering::SeqCst);
	info!(?report, "driver retired");

	for worker in workers {
		if worker.join().is_err() {
			warn!("worker panicked");
		}
	}

	for (instance, _) in mounted.iter() {
		let release = registry.instance_release(instance)?;
		info!(instance = %instance.id(), ?release, "released");
	}
	let stats = registry.stats();
	let unit = Arc::clone(registry.code_unit());
	let teardown = registry.teardown();
	unit.begin_unload()?;

	let violations = tally.violations.load(Ordering::SeqCst);
	println!("dispatched:   {}", tally.dispatched.load(Ordering::SeqCst));
	println!("failed:       {}", tally.failed.load(Ordering::SeqCst));
	println!("violations:   {violations}");
	let reclaimed = stats.tables_reclaimed + teardown.tables_reclaimed as u64;
	println!("tables:       {} allocated, {reclaimed} reclaimed", stats.tables_allocated);
	println!("confusions:   {}", stats.confusions);

	if violations > 0 {
		return Err(format!("{violations} dispatch(es) reached a retired driver").into());
	}
	Ok(())
}

struct Worker {
	id: usize,
	files: Arc<OperationTable<FileOp>>,
	mounted: Arc<Vec<(Arc<Instance>, Vec<NodeId>)>>,
	retired: Arc<AtomicBool>,
	tally: Arc<Tally>,
}

impl Worker {
	fn run(&self) {
		let mut trailing = 0;
		let mut cursor = self.id;
		while trailing < TRAILING_ROUNDS {
			let after = self.retired.load(Ordering::SeqCst);
			let ok = self.dispatch_one(cursor);
			cursor = cursor.wrapping_add(1);

			self.tally.dispatched.fetch_add(1, Ordering::Relaxed);
			if !ok {
				self.tally.failed.fetch_add(1, Ordering::Relaxed);
			}
			if after {
				if ok {
					self.tally.violations.fetch_add(1, Ordering::SeqCst);
				}
				trailing += 1;
			}
		}
	}

	fn dispatch_one(&self, cursor: usize) -> bool {
		let payload = [0u8; 16];
		let req = OpRequest::empty().with_data(&payload);
		if self.mounted.is_empty() || cursor % 3 == 0 {
			let op = if cursor % 2 == 0 { FileOp::Read } else { FileOp::Write };
			return self.files.dispatch(op, &req).is_ok();
		}
		let (instance, targets) = &self.mounted[cursor % self.mounted.len()];
		let node = targets
			.get(cursor % targets.len().max(1))
			.copied()
			.unwrap_or_else(|| instance.root());
		if cursor % 2 == 0 {
			instance.dispatch(node, NodeOp::GetAttr, &req).is_ok()
		} else {
			instance.lookup(node, "n0").is_ok()
		}
	}
}

/// Fills `instance` with a `depth`-level tree of `fanout` children per node.
fn populate(instance: &Instance, hook: NodeHook, depth: usize, fanout: usize) -> Result<(), DispatchError> {
	let mut level = vec![instance.root()];
	for _ in 0..depth {
		let mut next = Vec::with_capacity(level.len() * fanout);
		for parent in level {
			for i in 0..fanout {
				next.push(instance.insert(parent, &format!("n{i}"), hook.clone())?);
			}
		}
		level = next;
	}
	Ok(())
}

fn node_ids(tree: &ResourceTree) -> Vec<NodeId> {
	let mut out = Vec::with_capacity(tree.len());
	let mut worklist = vec![tree.root()];
	while let Some(id) = worklist.pop() {
		out.push(id);
		if let Ok(children) = tree.children(id) {
			worklist.extend_from_slice(children);
		}
	}
	out
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::fmt::format::FmtSpan;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("quiesce_registry=debug,quiesce_drill=debug,info")
		} else {
			EnvFilter::new("warn,quiesce_drill=info")
		}
	});

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_span_events(FmtSpan::CLOSE)
		.with_target(true)
		.with_writer(std::io::stderr)
		.init();
}
