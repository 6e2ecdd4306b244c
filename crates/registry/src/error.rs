use std::collections::TryReserveError;

use thiserror::Error;

use crate::table::OpReply;
use crate::tree::NodeId;

/// Errors returned by registry bookkeeping operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
	/// A live driver already holds this name.
	#[error("driver name in use: {0}")]
	NameInUse(String),
	/// Driver names must be non-empty.
	#[error("driver name must not be empty")]
	InvalidName,
	/// Allocation refused, or a configured capacity was reached.
	#[error("out of memory")]
	OutOfMemory,
	/// The code unit providing drivers is being unloaded; no new loans are handed out.
	#[error("code unit is unloading")]
	Unloading,
	/// Internal bookkeeping invariant violated. The triggering call changed nothing.
	#[error("confusion: {0}")]
	Confusion(String),
}

impl From<TryReserveError> for RegistryError {
	fn from(_: TryReserveError) -> Self {
		Self::OutOfMemory
	}
}

/// Errors returned through dispatch slots and resource-tree operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
	/// The slot belongs to a retired driver.
	#[error("operation not supported")]
	NotSupported,
	/// Lookup found nothing.
	#[error("no such entry")]
	NotFound,
	/// The driver never populated this slot; the host applies its own default.
	#[error("slot `{0}` was never populated")]
	Vacant(&'static str),
	/// A sibling with this name already exists.
	#[error("entry already exists: {0}")]
	Exists(String),
	/// The node id refers to a removed node.
	#[error("stale node id {0}")]
	StaleNode(NodeId),
	/// Allocation refused, or the tree reached its configured capacity.
	#[error("out of memory")]
	OutOfMemory,
	/// Failure reported by a driver handler.
	#[error("{0}")]
	Driver(String),
}

impl From<TryReserveError> for DispatchError {
	fn from(_: TryReserveError) -> Self {
		Self::OutOfMemory
	}
}

/// Result of dispatching through a slot.
pub type DispatchResult = Result<OpReply, DispatchError>;
