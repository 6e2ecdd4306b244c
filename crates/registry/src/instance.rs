//! Mounted instances of a driver.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::config::RegistryConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::registry::DriverHandle;
use crate::table::{NodeOp, OpRequest};
use crate::tree::{NodeHook, NodeId, QuiesceReport, ResourceTree};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Process-unique instance identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl fmt::Display for InstanceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "instance#{}", self.0)
	}
}

/// One active mount of a driver, owning its resource tree.
///
/// Created by the hosting environment. The registry tracks it between
/// [`crate::Registry::instance_acquire`] and [`crate::Registry::instance_release`].
pub struct Instance {
	id: InstanceId,
	driver: DriverHandle,
	tree: Mutex<ResourceTree>,
}

impl Instance {
	/// Creates an instance whose root dispatches through `root_hook`, with the default tree
	/// capacity.
	pub fn new(driver: DriverHandle, root_hook: NodeHook) -> Self {
		Self::with_capacity(driver, root_hook, RegistryConfig::default().max_nodes_per_instance)
	}

	pub fn with_capacity(driver: DriverHandle, root_hook: NodeHook, max_nodes: usize) -> Self {
		Self {
			id: InstanceId(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed)),
			driver,
			tree: Mutex::new(ResourceTree::new(root_hook, max_nodes)),
		}
	}

	pub fn id(&self) -> InstanceId {
		self.id
	}

	/// The registration this instance was mounted from.
	pub fn driver(&self) -> DriverHandle {
		self.driver
	}

	pub fn root(&self) -> NodeId {
		self.tree.lock().root()
	}

	pub fn is_neutralized(&self) -> bool {
		self.tree.lock().is_neutralized()
	}

	pub fn node_count(&self) -> usize {
		self.tree.lock().len()
	}

	pub fn insert(&self, parent: NodeId, name: &str, hook: NodeHook) -> Result<NodeId, DispatchError> {
		self.tree.lock().insert(parent, name, hook)
	}

	/// Resolves `name` under `parent`.
	///
	/// The parent's hook is asked first through its [`NodeOp::Lookup`] slot, unlocked. Only a
	/// successful reply lets the child be resolved in the tree, so a poisoned or vacant slot and
	/// a failing handler all surface as errors. A neutralized root reports `NotFound`.
	pub fn lookup(&self, parent: NodeId, name: &str) -> Result<NodeId, DispatchError> {
		let hook = self.tree.lock().hook(parent)?.clone();
		hook.dispatch(NodeOp::Lookup, &OpRequest::named(name).on(parent))?;
		self.tree.lock().lookup(parent, name)
	}

	pub fn remove(&self, node: NodeId) -> Result<usize, DispatchError> {
		self.tree.lock().remove(node)
	}

	pub fn parent(&self, node: NodeId) -> Result<Option<NodeId>, DispatchError> {
		self.tree.lock().parent(node)
	}

	pub fn children(&self, node: NodeId) -> Result<Vec<NodeId>, DispatchError> {
		self.tree.lock().children(node).map(<[NodeId]>::to_vec)
	}

	pub fn is_attached(&self, node: NodeId) -> bool {
		self.tree.lock().is_attached(node)
	}

	/// Dispatches `op` on `node` through its current hook.
	///
	/// The tree lock covers only fetching the hook; the handler runs unlocked.
	pub fn dispatch(&self, node: NodeId, op: NodeOp, req: &OpRequest<'_>) -> DispatchResult {
		let hook = self.tree.lock().hook(node)?.clone();
		hook.dispatch(op, &OpRequest { node: Some(node), ..*req })
	}

	/// Runs `f` against the tree under its lock. `f` must not call back into this instance.
	pub fn with_tree<R>(&self, f: impl FnOnce(&ResourceTree) -> R) -> R {
		f(&self.tree.lock())
	}

	pub(crate) fn quiesce(&self) -> QuiesceReport {
		self.tree.lock().quiesce()
	}
}

impl fmt::Debug for Instance {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Instance")
			.field("id", &self.id)
			.field("driver", &self.driver)
			.field("tree", &*self.tree.lock())
			.finish()
	}
}
