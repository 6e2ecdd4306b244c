#![allow(unused_crate_dependencies)]

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use quiesce_registry::{DriverFlags, Instance, NodeHook, Registry, RegistryConfig, Release, ResourceTree};

const NAMES: [&str; 4] = ["procfs", "sysfs", "netfs", "tmpfs"];

#[derive(Debug, Clone)]
enum Step {
	Register(usize),
	Unregister(usize),
	Table(usize),
	Mount(usize),
	Release(usize),
}

fn arb_step() -> impl Strategy<Value = Step> {
	prop_oneof![
		(0..NAMES.len()).prop_map(Step::Register),
		(0..NAMES.len()).prop_map(Step::Unregister),
		(0..NAMES.len()).prop_map(Step::Table),
		(0..NAMES.len()).prop_map(Step::Mount),
		any::<usize>().prop_map(Step::Release),
	]
}

proptest! {
	/// Every non-root node of an arbitrary tree is visited exactly once and the root survives.
	#[test]
	fn quiesce_visits_random_trees_once(parents in prop::collection::vec(any::<usize>(), 0..400)) {
		let mut tree = ResourceTree::new(NodeHook::Cleared, usize::MAX);
		let mut ids = vec![tree.root()];
		for (i, pick) in parents.iter().enumerate() {
			let parent = ids[pick % ids.len()];
			ids.push(tree.insert(parent, &format!("n{i}"), NodeHook::Cleared).unwrap());
		}

		let report = tree.quiesce();

		let visited: BTreeSet<_> = report.visited.iter().copied().collect();
		prop_assert_eq!(visited.len(), report.len());
		prop_assert_eq!(visited, ids[1..].iter().copied().collect::<BTreeSet<_>>());
		prop_assert!(tree.contains(tree.root()));
		prop_assert_eq!(tree.len(), ids.len());
	}

	/// Any well-formed sequence of lifecycle calls leaves nothing behind after teardown.
	#[test]
	fn tables_freed_match_tables_allocated(steps in prop::collection::vec(arb_step(), 1..80)) {
		let reg = Registry::new(RegistryConfig::default());
		let unit = Arc::clone(reg.code_unit());
		let mut mounted: Vec<(usize, Arc<Instance>)> = Vec::new();

		for step in steps {
			match step {
				Step::Register(n) => {
					let name = NAMES[n];
					let live = reg.lookup(name).is_some_and(|h| reg.is_live(h));
					let result = reg.register(name, DriverFlags::empty(), |_: &Instance| Ok(()));
					prop_assert_eq!(result.is_ok(), !live);
				}
				Step::Unregister(n) => {
					if let Some(h) = reg.lookup(NAMES[n]) {
						reg.unregister(h).unwrap();
						prop_assert!(!reg.is_live(h));
					}
				}
				Step::Table(n) => {
					if let Some(h) = reg.lookup(NAMES[n]).filter(|&h| reg.is_live(h)) {
						reg.new_file_table(h).unwrap();
					}
				}
				Step::Mount(n) => {
					if let Some(h) = reg.lookup(NAMES[n]) {
						let instance = Arc::new(Instance::new(h, NodeHook::Cleared));
						reg.instance_acquire(&instance).unwrap();
						prop_assert_eq!(instance.is_neutralized(), !reg.is_live(h));
						mounted.push((n, instance));
					}
				}
				Step::Release(pick) => {
					if mounted.is_empty() {
						continue;
					}
					let (n, instance) = mounted.swap_remove(pick % mounted.len());
					if let Release::Reclaimed { .. } = reg.instance_release(&instance).unwrap() {
						prop_assert_eq!(reg.lookup(NAMES[n]), None);
						prop_assert!(mounted.iter().all(|(m, _)| *m != n));
					}
				}
			}
		}

		let before = reg.stats();
		prop_assert_eq!(before.confusions, 0);
		let report = reg.teardown();
		prop_assert_eq!(before.tables_reclaimed + report.tables_reclaimed as u64, before.tables_allocated);
		prop_assert_eq!(unit.outstanding(), 0);
	}
}
