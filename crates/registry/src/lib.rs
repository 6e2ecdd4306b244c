#![cfg_attr(test, allow(unused_crate_dependencies))]
//! Driver registry with retirement of live dispatch tables.
//!
//! A driver registers under a name, allocates operation tables and populates their slots. The
//! hosting environment mounts instances of the driver; each instance owns a resource tree whose
//! nodes dispatch through the driver's tables. When the driver is retired with
//! [`Registry::unregister`], every table it owns is poisoned and every mounted instance is
//! neutralized synchronously, but nothing is freed until the last instance is released.
//!
//! # Lifecycle
//!
//! 1. [`Registry::register`] takes a capability loan on the [`CodeUnit`] and returns a
//!    [`DriverHandle`].
//! 2. [`Registry::new_file_table`] / [`Registry::new_node_table`] hand out all-vacant tables for
//!    the driver to populate with [`OperationTable::set`].
//! 3. The host builds an [`Instance`], runs the driver constructor on it and calls
//!    [`Registry::instance_acquire`].
//! 4. [`Registry::unregister`] poisons tables, quiesces trees and returns the loan.
//! 5. [`Registry::instance_release`] on the last instance reclaims the registration.
//!
//! # Lock order
//!
//! Registry state, then registration state, then an instance's tree. No lock is held while a
//! driver handler runs.

mod config;
mod error;
mod instance;
mod loan;
mod registry;
mod table;
mod tree;

pub use config::{ConfigError, RegistryConfig};
pub use error::{DispatchError, DispatchResult, RegistryError};
pub use instance::{Instance, InstanceId};
pub use loan::{CodeUnit, UnloadError};
pub use registry::{
	Constructor, DriverFlags, DriverHandle, Registry, RegistryStats, Release, RetireReport,
	TeardownReport,
};
pub use table::{AnyTable, FileOp, Handler, NodeOp, OpReply, OpRequest, OpSet, OperationTable, TableId, TableKind};
pub use tree::{NodeHook, NodeId, QuiesceReport, ResourceTree};
