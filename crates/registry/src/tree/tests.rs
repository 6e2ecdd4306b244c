use std::collections::BTreeSet;

use rstest::rstest;

use super::*;
use crate::registry::DriverHandle;
use crate::table::{OpReply, TableId};

fn driver_hook() -> NodeHook {
	let table = OperationTable::new(TableId(7), DriverHandle::new(0, 1)).unwrap();
	table.set(NodeOp::GetAttr, |_| Ok(OpReply::Done)).unwrap();
	table.set(NodeOp::Lookup, |_| Ok(OpReply::Done)).unwrap();
	NodeHook::Driver(Arc::new(table))
}

#[derive(Debug, Clone, Copy)]
enum Shape {
	Balanced { depth: usize, arity: usize },
	Chain { len: usize },
	FanOut { width: usize },
}

/// Builds a tree of the given shape; returns it with every non-root id.
fn build(shape: Shape) -> (ResourceTree, Vec<NodeId>) {
	let hook = driver_hook();
	let mut tree = ResourceTree::new(hook.clone(), usize::MAX);
	let mut ids = Vec::new();
	match shape {
		Shape::Balanced { depth, arity } => {
			let mut level = vec![tree.root()];
			for _ in 0..depth {
				let mut next = Vec::new();
				for parent in level {
					for i in 0..arity {
						let id = tree.insert(parent, &format!("n{i}"), hook.clone()).unwrap();
						ids.push(id);
						next.push(id);
					}
				}
				level = next;
			}
		}
		Shape::Chain { len } => {
			let mut parent = tree.root();
			for _ in 0..len {
				parent = tree.insert(parent, "c", hook.clone()).unwrap();
				ids.push(parent);
			}
		}
		Shape::FanOut { width } => {
			let root = tree.root();
			for i in 0..width {
				ids.push(tree.insert(root, &format!("f{i}"), hook.clone()).unwrap());
			}
		}
	}
	(tree, ids)
}

#[rstest]
#[case::balanced(Shape::Balanced { depth: 5, arity: 3 })]
#[case::chain(Shape::Chain { len: 10_000 })]
#[case::fan_out(Shape::FanOut { width: 2_000 })]
#[case::root_only(Shape::FanOut { width: 0 })]
fn quiesce_visits_every_node_once(#[case] shape: Shape) {
	let (mut tree, ids) = build(shape);
	let before = tree.len();

	let report = tree.quiesce();

	let unique: BTreeSet<_> = report.visited.iter().copied().collect();
	assert_eq!(unique.len(), report.len(), "a node was visited twice");
	assert_eq!(unique, ids.iter().copied().collect::<BTreeSet<_>>());
	assert_eq!(tree.len(), before, "quiescence frees nothing");

	let root = tree.root();
	assert!(tree.contains(root));
	assert!(matches!(tree.hook(root), Ok(NodeHook::Neutral)));
	assert!(tree.children(root).unwrap().is_empty());
	for id in ids {
		assert!(matches!(tree.hook(id), Ok(NodeHook::Cleared)));
		assert_eq!(tree.parent(id), Ok(None));
		assert!(!tree.is_attached(id));
	}
}

#[test]
fn second_quiesce_visits_nothing() {
	let (mut tree, _) = build(Shape::Balanced { depth: 2, arity: 2 });
	assert_eq!(tree.quiesce().len(), 6);
	assert!(tree.quiesce().is_empty());
}

#[test]
fn neutral_root_fails_dispatch() {
	let (mut tree, ids) = build(Shape::FanOut { width: 2 });
	let root = tree.root();
	let req = OpRequest::empty();
	assert_eq!(tree.hook(root).unwrap().dispatch(NodeOp::GetAttr, &req), Ok(OpReply::Done));

	tree.quiesce();

	let root_hook = tree.hook(root).unwrap();
	assert_eq!(root_hook.dispatch(NodeOp::Lookup, &req), Err(DispatchError::NotFound));
	assert_eq!(root_hook.dispatch(NodeOp::GetAttr, &req), Err(DispatchError::NotSupported));
	assert_eq!(tree.hook(ids[0]).unwrap().dispatch(NodeOp::GetAttr, &req), Err(DispatchError::NotSupported));
}

#[test]
fn neutralized_tree_accepts_no_nodes() {
	let (mut tree, _) = build(Shape::FanOut { width: 1 });
	tree.quiesce();
	let root = tree.root();
	assert_eq!(tree.insert(root, "late", NodeHook::Cleared), Err(DispatchError::NotSupported));
	assert_eq!(tree.set_hook(root, driver_hook()), Err(DispatchError::NotSupported));
}

#[test]
fn insert_rejects_duplicate_names() {
	let mut tree = ResourceTree::new(NodeHook::Cleared, 8);
	let root = tree.root();
	tree.insert(root, "a", NodeHook::Cleared).unwrap();
	assert_eq!(tree.insert(root, "a", NodeHook::Cleared), Err(DispatchError::Exists("a".into())));
}

#[test]
fn insert_respects_capacity() {
	let mut tree = ResourceTree::new(NodeHook::Cleared, 2);
	let root = tree.root();
	tree.insert(root, "a", NodeHook::Cleared).unwrap();
	assert_eq!(tree.insert(root, "b", NodeHook::Cleared), Err(DispatchError::OutOfMemory));
}

#[test]
fn lookup_finds_children_by_name() {
	let mut tree = ResourceTree::new(NodeHook::Cleared, 8);
	let root = tree.root();
	let a = tree.insert(root, "a", NodeHook::Cleared).unwrap();
	let b = tree.insert(a, "b", NodeHook::Cleared).unwrap();
	assert_eq!(tree.lookup(root, "a"), Ok(a));
	assert_eq!(tree.lookup(a, "b"), Ok(b));
	assert_eq!(tree.lookup(root, "b"), Err(DispatchError::NotFound));
	assert_eq!(tree.name(b), Ok("b"));
}

#[test]
fn remove_frees_subtree_and_invalidates_ids() {
	let mut tree = ResourceTree::new(NodeHook::Cleared, 16);
	let root = tree.root();
	let a = tree.insert(root, "a", NodeHook::Cleared).unwrap();
	let b = tree.insert(a, "b", NodeHook::Cleared).unwrap();
	tree.insert(b, "c", NodeHook::Cleared).unwrap();

	assert_eq!(tree.remove(a), Ok(3));
	assert_eq!(tree.len(), 1);
	assert!(tree.children(root).unwrap().is_empty());
	assert_eq!(tree.hook(b).map(|_| ()), Err(DispatchError::StaleNode(b)));

	// The freed slot is reused under a new generation.
	let again = tree.insert(root, "a", NodeHook::Cleared).unwrap();
	assert_ne!(again, a);
	assert!(!tree.contains(a));
	assert!(tree.contains(again));
}

#[test]
fn root_cannot_be_removed() {
	let mut tree = ResourceTree::new(NodeHook::Cleared, 4);
	let root = tree.root();
	assert_eq!(tree.remove(root), Err(DispatchError::NotSupported));
}

#[test]
fn detached_nodes_can_still_be_removed() {
	let (mut tree, ids) = build(Shape::Chain { len: 3 });
	tree.quiesce();
	assert_eq!(tree.remove(ids[0]), Ok(1));
	assert_eq!(tree.len(), 3);
}
