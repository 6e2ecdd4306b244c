//! Arena-backed resource tree owned by one instance.
//!
//! Nodes live in a [`Slab`] and refer to each other by [`NodeId`], a slot index paired with a
//! generation. A removed node's slot can be reused, but the old id then fails its generation check
//! and resolves to [`DispatchError::StaleNode`] instead of reaching the newcomer.
//!
//! Each node carries a [`NodeHook`], the dispatch target for node-level operations on it. The
//! hook is what [`ResourceTree::quiesce`] clears when the owning driver retires.

use std::fmt;
use std::sync::Arc;

use slab::Slab;

use crate::error::{DispatchError, DispatchResult};
use crate::table::{NodeOp, OpRequest, OperationTable};

mod quiesce;

pub use quiesce::QuiesceReport;

/// Checked reference to a node in a [`ResourceTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
	slot: u32,
	generation: u32,
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "node#{}.{}", self.slot, self.generation)
	}
}

/// Per-node dispatch target.
#[derive(Clone)]
pub enum NodeHook {
	/// Dispatch through a driver table.
	Driver(Arc<OperationTable<NodeOp>>),
	/// Minimal always-fail set installed on a retired instance's root.
	Neutral,
	/// Hook removed by quiescence.
	Cleared,
}

impl NodeHook {
	pub fn dispatch(&self, op: NodeOp, req: &OpRequest<'_>) -> DispatchResult {
		match self {
			Self::Driver(table) => table.dispatch(op, req),
			Self::Neutral if op == NodeOp::Lookup => Err(DispatchError::NotFound),
			Self::Neutral | Self::Cleared => Err(DispatchError::NotSupported),
		}
	}

	pub fn is_driver(&self) -> bool {
		matches!(self, Self::Driver(_))
	}
}

impl fmt::Debug for NodeHook {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Driver(table) => f.debug_tuple("Driver").field(&table.id()).finish(),
			Self::Neutral => f.write_str("Neutral"),
			Self::Cleared => f.write_str("Cleared"),
		}
	}
}

struct Node {
	generation: u32,
	name: String,
	parent: Option<NodeId>,
	children: Vec<NodeId>,
	hook: NodeHook,
}

/// Hierarchy of named nodes rooted at a node that is never freed.
pub struct ResourceTree {
	nodes: Slab<Node>,
	root: NodeId,
	next_generation: u32,
	capacity: usize,
	neutralized: bool,
}

impl ResourceTree {
	/// Creates a tree holding only its root. `capacity` bounds the node count, root included.
	pub fn new(root_hook: NodeHook, capacity: usize) -> Self {
		let mut nodes = Slab::with_capacity(1);
		let slot = nodes.insert(Node {
			generation: 0,
			name: String::from("/"),
			parent: None,
			children: Vec::new(),
			hook: root_hook,
		});
		Self {
			nodes,
			root: NodeId {
				slot: slot as u32,
				generation: 0,
			},
			next_generation: 1,
			capacity: capacity.max(1),
			neutralized: false,
		}
	}

	pub fn root(&self) -> NodeId {
		self.root
	}

	/// Number of resident nodes, root and detached nodes included.
	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	/// Always false: the root is resident for the life of the tree.
	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	/// True once the tree has been quiesced. A neutralized tree accepts no new nodes.
	pub fn is_neutralized(&self) -> bool {
		self.neutralized
	}

	pub fn contains(&self, id: NodeId) -> bool {
		self.node(id).is_ok()
	}

	pub fn name(&self, id: NodeId) -> Result<&str, DispatchError> {
		Ok(&self.node(id)?.name)
	}

	pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, DispatchError> {
		Ok(self.node(id)?.parent)
	}

	pub fn children(&self, id: NodeId) -> Result<&[NodeId], DispatchError> {
		Ok(&self.node(id)?.children)
	}

	pub fn hook(&self, id: NodeId) -> Result<&NodeHook, DispatchError> {
		Ok(&self.node(id)?.hook)
	}

	/// Returns true if `id` is resident and reachable from the root.
	pub fn is_attached(&self, id: NodeId) -> bool {
		let mut cursor = id;
		for _ in 0..self.nodes.len() {
			if cursor == self.root {
				return true;
			}
			match self.node(cursor).map(|n| n.parent) {
				Ok(Some(parent)) => cursor = parent,
				_ => return false,
			}
		}
		false
	}

	/// Replaces the hook of a live node.
	pub fn set_hook(&mut self, id: NodeId, hook: NodeHook) -> Result<(), DispatchError> {
		if self.neutralized {
			return Err(DispatchError::NotSupported);
		}
		self.node_mut(id)?.hook = hook;
		Ok(())
	}

	/// Adds a child named `name` under `parent`.
	///
	/// # Errors
	///
	/// * [`DispatchError::NotSupported`] on a neutralized tree or a detached parent.
	/// * [`DispatchError::Exists`] if `parent` already has a child with this name.
	/// * [`DispatchError::OutOfMemory`] past the configured capacity.
	pub fn insert(&mut self, parent: NodeId, name: &str, hook: NodeHook) -> Result<NodeId, DispatchError> {
		if self.neutralized {
			return Err(DispatchError::NotSupported);
		}
		// Outside quiescence every resident node is attached, so a parentless non-root is detached.
		if parent != self.root && self.node(parent)?.parent.is_none() {
			return Err(DispatchError::NotSupported);
		}
		if self.lookup(parent, name).is_ok() {
			return Err(DispatchError::Exists(name.to_owned()));
		}
		if self.nodes.len() >= self.capacity {
			return Err(DispatchError::OutOfMemory);
		}
		self.node_mut(parent)?.children.try_reserve(1)?;

		let generation = self.next_generation;
		self.next_generation = self.next_generation.wrapping_add(1);
		let entry = self.nodes.vacant_entry();
		let slot = u32::try_from(entry.key()).map_err(|_| DispatchError::OutOfMemory)?;
		entry.insert(Node {
			generation,
			name: name.to_owned(),
			parent: Some(parent),
			children: Vec::new(),
			hook,
		});

		let id = NodeId { slot, generation };
		self.node_mut(parent)?.children.push(id);
		Ok(id)
	}

	/// Finds the child of `parent` named `name`.
	pub fn lookup(&self, parent: NodeId, name: &str) -> Result<NodeId, DispatchError> {
		self.node(parent)?
			.children
			.iter()
			.copied()
			.find(|&child| self.node(child).is_ok_and(|n| n.name == name))
			.ok_or(DispatchError::NotFound)
	}

	/// Frees `id` and its whole subtree. Returns the number of nodes freed.
	///
	/// The root cannot be removed.
	pub fn remove(&mut self, id: NodeId) -> Result<usize, DispatchError> {
		if id == self.root {
			return Err(DispatchError::NotSupported);
		}
		let parent = self.node(id)?.parent;
		if let Some(parent) = parent
			&& let Ok(parent) = self.node_mut(parent)
		{
			parent.children.retain(|&c| c != id);
		}

		let mut freed = 0;
		let mut worklist = vec![id];
		while let Some(next) = worklist.pop() {
			if self.node(next).is_err() {
				continue;
			}
			let node = self.nodes.remove(next.slot as usize);
			worklist.extend(node.children);
			freed += 1;
		}
		Ok(freed)
	}

	fn node(&self, id: NodeId) -> Result<&Node, DispatchError> {
		self.nodes
			.get(id.slot as usize)
			.filter(|n| n.generation == id.generation)
			.ok_or(DispatchError::StaleNode(id))
	}

	fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, DispatchError> {
		self.nodes
			.get_mut(id.slot as usize)
			.filter(|n| n.generation == id.generation)
			.ok_or(DispatchError::StaleNode(id))
	}
}

impl fmt::Debug for ResourceTree {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ResourceTree")
			.field("root", &self.root)
			.field("len", &self.nodes.len())
			.field("neutralized", &self.neutralized)
			.finish()
	}
}

#[cfg(test)]
mod tests;
