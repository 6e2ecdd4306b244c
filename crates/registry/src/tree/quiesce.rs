//! Quiescence walk over a retiring instance's tree.
//!
//! The walk is iterative over an explicit worklist of node ids, so tree depth never reaches the
//! call stack, and it makes no assumption about visiting order.
//!
//! * The root is never detached or freed. Its hook becomes [`NodeHook::Neutral`] so holders of
//!   the root keep a valid, always-failing target.
//! * Every other reachable node is visited exactly once: its hook is cleared and it is detached
//!   from its parent. A node only enters the worklist when its parent's child list is drained,
//!   and a drained list cannot yield it again.

use super::{NodeHook, NodeId, ResourceTree};

/// Nodes neutralized by one [`ResourceTree::quiesce`] call, in visiting order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuiesceReport {
	pub visited: Vec<NodeId>,
}

impl QuiesceReport {
	pub fn len(&self) -> usize {
		self.visited.len()
	}

	pub fn is_empty(&self) -> bool {
		self.visited.is_empty()
	}
}

impl ResourceTree {
	/// Neutralizes the root, then clears and detaches every other reachable node.
	///
	/// Detached nodes stay resident (ids held elsewhere keep resolving) but dispatch through them
	/// fails. Running the walk again on a quiesced tree visits nothing.
	pub fn quiesce(&mut self) -> QuiesceReport {
		self.neutralized = true;

		let root = self.root;
		let mut worklist = match self.node_mut(root) {
			Ok(node) => {
				node.hook = NodeHook::Neutral;
				std::mem::take(&mut node.children)
			}
			Err(_) => Vec::new(),
		};

		let mut visited = Vec::new();
		while let Some(id) = worklist.pop() {
			let Ok(node) = self.node_mut(id) else {
				continue;
			};
			debug_assert!(node.parent.is_some(), "{id} reached twice");
			node.hook = NodeHook::Cleared;
			node.parent = None;
			worklist.append(&mut node.children);
			visited.push(id);
		}

		QuiesceReport { visited }
	}
}
