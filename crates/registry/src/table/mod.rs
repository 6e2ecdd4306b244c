//! Operation tables and their poisoning.
//!
//! # Mental model
//!
//! * A table is a fixed-shape array of slots, one per operation of its kind ([`FileOp`] or
//!   [`NodeOp`]). Slots start vacant and are populated by the owning driver.
//! * The slots live behind an [`ArcSwap`] holding a tagged state: `Live(slots)` or `Poisoned`.
//! * Poisoning is one atomic store of `Poisoned`. There is no window in which some slots fail
//!   and others still reach the driver.
//!
//! # Invariants
//!
//! * Once poisoned a table never returns to `Live`; [`OperationTable::set`] on a poisoned table
//!   is refused.
//! * A dispatch that loaded the `Live` state before the store may still run the old handler.
//!   Every dispatch that loads after the store fails with [`DispatchError::NotSupported`].

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::{DispatchError, DispatchResult, RegistryError};
use crate::registry::DriverHandle;
use crate::tree::NodeId;

mod ops;

pub use ops::{FileOp, NodeOp};

/// Identifier of an allocated table, unique within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub(crate) u64);

impl fmt::Display for TableId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "table#{}", self.0)
	}
}

/// Category of operations a table dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
	File,
	Node,
}

impl TableKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::File => "file",
			Self::Node => "node",
		}
	}
}

/// A fixed vocabulary of slots making up one table kind.
pub trait OpSet: Copy + Eq + fmt::Debug + Send + Sync + 'static {
	const KIND: TableKind;
	const COUNT: usize;

	/// Slot position, in `0..COUNT`.
	fn index(self) -> usize;

	fn name(self) -> &'static str;

	#[doc(hidden)]
	fn wrap(table: Arc<OperationTable<Self>>) -> AnyTable;
}

/// Arguments handed to a slot handler. What they mean is up to the driver and host.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpRequest<'a> {
	pub node: Option<NodeId>,
	pub name: Option<&'a str>,
	pub data: &'a [u8],
}

impl<'a> OpRequest<'a> {
	pub const fn empty() -> Self {
		Self {
			node: None,
			name: None,
			data: &[],
		}
	}

	pub const fn named(name: &'a str) -> Self {
		Self {
			node: None,
			name: Some(name),
			data: &[],
		}
	}

	pub const fn on(mut self, node: NodeId) -> Self {
		self.node = Some(node);
		self
	}

	pub const fn with_data(mut self, data: &'a [u8]) -> Self {
		self.data = data;
		self
	}
}

/// Successful outcome of a slot handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpReply {
	Done,
	Data(Vec<u8>),
	Count(usize),
	Node(NodeId),
}

/// A driver-supplied slot entry.
pub type Handler = Arc<dyn Fn(&OpRequest<'_>) -> DispatchResult + Send + Sync>;

enum TableState {
	Live(Box<[Option<Handler>]>),
	Poisoned,
}

/// Dispatch table owned by one registration.
pub struct OperationTable<O: OpSet> {
	id: TableId,
	driver: DriverHandle,
	state: ArcSwap<TableState>,
	_ops: PhantomData<fn() -> O>,
}

impl<O: OpSet> OperationTable<O> {
	pub(crate) fn new(id: TableId, driver: DriverHandle) -> Result<Self, RegistryError> {
		let mut slots = Vec::new();
		slots.try_reserve_exact(O::COUNT)?;
		slots.resize_with(O::COUNT, || None);
		Ok(Self {
			id,
			driver,
			state: ArcSwap::from_pointee(TableState::Live(slots.into_boxed_slice())),
			_ops: PhantomData,
		})
	}

	pub fn id(&self) -> TableId {
		self.id
	}

	/// The registration that owns this table.
	pub fn driver(&self) -> DriverHandle {
		self.driver
	}

	pub fn kind(&self) -> TableKind {
		O::KIND
	}

	/// Installs a driver-supplied entry for `op`, replacing any earlier one.
	///
	/// # Errors
	///
	/// [`DispatchError::NotSupported`] when the table is already poisoned; nothing is installed.
	pub fn set<F>(&self, op: O, handler: F) -> Result<(), DispatchError>
	where
		F: Fn(&OpRequest<'_>) -> DispatchResult + Send + Sync + 'static,
	{
		let handler: Handler = Arc::new(handler);
		let prev = self.state.rcu(|state| match &**state {
			TableState::Live(slots) => {
				let mut next = slots.clone();
				next[op.index()] = Some(Arc::clone(&handler));
				TableState::Live(next)
			}
			TableState::Poisoned => TableState::Poisoned,
		});
		match *prev {
			TableState::Live(_) => Ok(()),
			TableState::Poisoned => Err(DispatchError::NotSupported),
		}
	}

	/// Returns true if the driver populated `op` and the table is still live.
	pub fn is_populated(&self, op: O) -> bool {
		match &**self.state.load() {
			TableState::Live(slots) => slots[op.index()].is_some(),
			TableState::Poisoned => false,
		}
	}

	pub fn is_poisoned(&self) -> bool {
		matches!(**self.state.load(), TableState::Poisoned)
	}

	/// Dispatches `op` through whatever is currently installed.
	pub fn dispatch(&self, op: O, req: &OpRequest<'_>) -> DispatchResult {
		let handler = match &**self.state.load() {
			TableState::Live(slots) => slots[op.index()].clone(),
			TableState::Poisoned => return Err(DispatchError::NotSupported),
		};
		// The state guard is gone; a concurrent poison does not stop this call.
		match handler {
			Some(handler) => handler(req),
			None => Err(DispatchError::Vacant(op.name())),
		}
	}

	/// Switches every slot to the failing stub. Returns true if the table was live.
	pub(crate) fn poison(&self) -> bool {
		let prev = self.state.swap(Arc::new(TableState::Poisoned));
		matches!(*prev, TableState::Live(_))
	}
}

impl<O: OpSet> fmt::Debug for OperationTable<O> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("OperationTable")
			.field("id", &self.id)
			.field("kind", &O::KIND)
			.field("driver", &self.driver)
			.field("poisoned", &self.is_poisoned())
			.finish()
	}
}

/// A table of either kind, as held by its registration.
#[derive(Debug, Clone)]
pub enum AnyTable {
	File(Arc<OperationTable<FileOp>>),
	Node(Arc<OperationTable<NodeOp>>),
}

impl AnyTable {
	pub fn id(&self) -> TableId {
		match self {
			Self::File(t) => t.id(),
			Self::Node(t) => t.id(),
		}
	}

	pub fn kind(&self) -> TableKind {
		match self {
			Self::File(_) => TableKind::File,
			Self::Node(_) => TableKind::Node,
		}
	}

	pub fn is_poisoned(&self) -> bool {
		match self {
			Self::File(t) => t.is_poisoned(),
			Self::Node(t) => t.is_poisoned(),
		}
	}

	pub(crate) fn poison(&self) -> bool {
		match self {
			Self::File(t) => t.poison(),
			Self::Node(t) => t.poison(),
		}
	}
}
