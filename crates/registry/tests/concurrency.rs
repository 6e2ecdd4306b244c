#![allow(unused_crate_dependencies)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use quiesce_registry::{
	DispatchError, DriverFlags, FileOp, Instance, NodeHook, NodeOp, OpReply, OpRequest, Registry, RegistryConfig, Release,
};

const WORKERS: usize = 8;

/// Dispatches racing `unregister` may succeed, but none that starts after it returns.
#[test]
fn no_dispatch_succeeds_after_unregister_returns() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	let reg = Arc::new(Registry::new(RegistryConfig::default()));
	let h = reg
		.register("netfs", DriverFlags::empty(), |_: &Instance| Ok(()))
		.unwrap();
	let files = reg.new_file_table(h).unwrap();
	files.set(FileOp::Read, |_| Ok(OpReply::Count(1))).unwrap();
	let nodes = reg.new_node_table(h).unwrap();
	nodes.set(NodeOp::GetAttr, |_| Ok(OpReply::Done)).unwrap();
	let instance = Arc::new(Instance::new(h, NodeHook::Driver(nodes)));
	let leaf = instance
		.insert(instance.root(), "leaf", NodeHook::Driver(reg.new_node_table(h).unwrap()))
		.unwrap();
	reg.instance_acquire(&instance).unwrap();

	let retired = Arc::new(AtomicBool::new(false));
	let violations = Arc::new(AtomicUsize::new(0));
	let barrier = Arc::new(Barrier::new(WORKERS + 1));

	let workers: Vec<_> = (0..WORKERS)
		.map(|i| {
			let files = Arc::clone(&files);
			let instance = Arc::clone(&instance);
			let retired = Arc::clone(&retired);
			let violations = Arc::clone(&violations);
			let barrier = Arc::clone(&barrier);
			thread::spawn(move || {
				barrier.wait();
				loop {
					let after = retired.load(Ordering::SeqCst);
					let ok = if i % 2 == 0 {
						files.dispatch(FileOp::Read, &OpRequest::empty()).is_ok()
					} else {
						let node = if i % 4 == 1 { instance.root() } else { leaf };
						instance.dispatch(node, NodeOp::GetAttr, &OpRequest::empty()).is_ok()
					};
					if after {
						if ok {
							violations.fetch_add(1, Ordering::SeqCst);
						}
						break;
					}
				}
			})
		})
		.collect();

	barrier.wait();
	thread::yield_now();
	let report = reg.unregister(h).unwrap();
	retired.store(true, Ordering::SeqCst);

	for worker in workers {
		worker.join().unwrap();
	}
	assert_eq!(violations.load(Ordering::SeqCst), 0);
	assert_eq!(report.tables_poisoned, 3);
	assert_eq!(report.nodes_detached, 1);
	assert_eq!(
		instance.dispatch(leaf, NodeOp::GetAttr, &OpRequest::empty()),
		Err(DispatchError::NotSupported)
	);
	assert_eq!(reg.instance_release(&instance), Ok(Release::Reclaimed { tables: 3 }));
}

/// Concurrent mounts and releases on one retiring driver reclaim it exactly once.
#[test]
fn concurrent_releases_reclaim_once() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	let reg = Arc::new(Registry::new(RegistryConfig::default()));
	let h = reg
		.register("netfs", DriverFlags::empty(), |_: &Instance| Ok(()))
		.unwrap();
	reg.new_file_table(h).unwrap();

	let instances: Vec<_> = (0..WORKERS)
		.map(|_| {
			let inst = Arc::new(Instance::new(h, NodeHook::Cleared));
			reg.instance_acquire(&inst).unwrap();
			inst
		})
		.collect();
	reg.unregister(h).unwrap();

	let barrier = Arc::new(Barrier::new(WORKERS));
	let outcomes: Vec<Release> = instances
		.into_iter()
		.map(|inst| {
			let reg = Arc::clone(&reg);
			let barrier = Arc::clone(&barrier);
			thread::spawn(move || {
				barrier.wait();
				reg.instance_release(&inst).unwrap()
			})
		})
		.collect::<Vec<_>>()
		.into_iter()
		.map(|t| t.join().unwrap())
		.collect();

	let reclaimed = outcomes
		.iter()
		.filter(|r| matches!(r, Release::Reclaimed { .. }))
		.count();
	assert_eq!(reclaimed, 1);
	assert!(outcomes.contains(&Release::Reclaimed { tables: 1 }));
	assert_eq!(reg.lookup("netfs"), None);
	assert_eq!(reg.code_unit().outstanding(), 0);
	let stats = reg.stats();
	assert_eq!(stats.tables_outstanding(), 0);
	assert_eq!(stats.confusions, 0);
}
