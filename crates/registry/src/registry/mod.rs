//! Driver registrations and their lifecycle.
//!
//! The [`Registry`] owns every registration in a slab arena and hands out [`DriverHandle`]s
//! (slot plus generation) instead of references. A registration moves through three states:
//!
//! * live: created by [`Registry::register`], tables may be allocated and instances acquired.
//! * retired: [`Registry::unregister`] poisoned its tables and quiesced its instances. It stays
//!   resident and can be resurrected by registering the same name again.
//! * reclaimed: the last [`Registry::instance_release`] on a retired registration dropped its
//!   tables and freed the slot. Only release and teardown reclaim.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;
use slab::Slab;
use tracing::{debug, error, info, warn};

use crate::config::RegistryConfig;
use crate::error::{DispatchError, RegistryError};
use crate::instance::Instance;
use crate::loan::CodeUnit;
use crate::table::{FileOp, NodeOp, OpSet, OperationTable, TableId};

mod lifecycle;
mod registration;
mod stats;

pub use lifecycle::{Release, TeardownReport};
use registration::Registration;
pub use registration::Constructor;
use stats::Counters;
pub use stats::RegistryStats;

/// Checked reference to a registration. A handle outlives nothing: once its slot is reclaimed
/// every lookup through it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DriverHandle {
	slot: u32,
	generation: u32,
}

impl DriverHandle {
	pub(crate) const fn new(slot: u32, generation: u32) -> Self {
		Self { slot, generation }
	}
}

impl fmt::Display for DriverHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "driver#{}.{}", self.slot, self.generation)
	}
}

bitflags! {
	/// Driver attributes, stored and reported but never interpreted by the registry.
	///
	/// Bit names and values follow the host's filesystem-type flags (`FS_REQUIRES_DEV`,
	/// `FS_BINARY_MOUNTDATA`, `FS_HAS_SUBTYPE`, `FS_USERNS_MOUNT`), which drivers pass through
	/// unchanged. Bits without a name survive through [`DriverFlags::from_bits_retain`].
	#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct DriverFlags: u32 {
		const REQUIRES_DEVICE = 1;
		const BINARY_MOUNT_DATA = 1 << 1;
		const HAS_SUBTYPE = 1 << 2;
		const USERNS_MOUNT = 1 << 3;
	}
}

/// Summary of one retirement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetireReport {
	/// Tables that went from live to poisoned. Already-poisoned tables are not counted.
	pub tables_poisoned: usize,
	pub instances_neutralized: usize,
	/// Non-root nodes detached across all instances.
	pub nodes_detached: usize,
}

struct RegistryState {
	drivers: Slab<Arc<Registration>>,
	by_name: HashMap<String, u32>,
	next_generation: u32,
}

impl RegistryState {
	fn resolve(&self, handle: DriverHandle) -> Option<&Arc<Registration>> {
		self.drivers
			.get(handle.slot as usize)
			.filter(|reg| reg.handle == handle)
	}
}

/// Process-wide set of driver registrations.
///
/// Lock order is registry, then registration, then instance tree. No lock is held while a
/// table handler runs.
pub struct Registry {
	config: RegistryConfig,
	state: Mutex<RegistryState>,
	code_unit: Arc<CodeUnit>,
	counters: Counters,
}

impl Registry {
	pub fn new(config: RegistryConfig) -> Self {
		Self::with_code_unit(config, Arc::new(CodeUnit::new()))
	}

	/// Creates a registry that pins `code_unit` for every live registration and tracked instance.
	pub fn with_code_unit(config: RegistryConfig, code_unit: Arc<CodeUnit>) -> Self {
		Self {
			config,
			state: Mutex::new(RegistryState {
				drivers: Slab::new(),
				by_name: HashMap::new(),
				next_generation: 1,
			}),
			code_unit,
			counters: Counters::default(),
		}
	}

	pub fn config(&self) -> &RegistryConfig {
		&self.config
	}

	pub fn code_unit(&self) -> &Arc<CodeUnit> {
		&self.code_unit
	}

	pub fn stats(&self) -> RegistryStats {
		self.counters.snapshot()
	}

	/// Number of resident registrations, live and retired.
	pub fn len(&self) -> usize {
		self.state.lock().drivers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Registers a driver under `name`, or resurrects a retired registration of that name.
	///
	/// A resurrected registration keeps its handle and its poisoned tables. Its instances from
	/// the previous life stay neutralized.
	///
	/// # Errors
	///
	/// * [`RegistryError::InvalidName`] for an empty name.
	/// * [`RegistryError::NameInUse`] if a live registration already has this name.
	/// * [`RegistryError::Unloading`] if the code unit refuses a loan.
	/// * [`RegistryError::OutOfMemory`] past `max_drivers` or when allocation fails.
	pub fn register<F>(&self, name: &str, flags: DriverFlags, constructor: F) -> Result<DriverHandle, RegistryError>
	where
		F: Fn(&Instance) -> Result<(), DispatchError> + Send + Sync + 'static,
	{
		if name.is_empty() {
			return Err(RegistryError::InvalidName);
		}
		if !self.code_unit.try_loan() {
			return Err(RegistryError::Unloading);
		}
		let result = self.register_loaned(name, flags, Arc::new(constructor));
		if result.is_err() {
			self.code_unit.return_loan();
		}
		result
	}

	fn register_loaned(&self, name: &str, flags: DriverFlags, constructor: Constructor) -> Result<DriverHandle, RegistryError> {
		let mut state = self.state.lock();

		if let Some(&slot) = state.by_name.get(name)
			&& let Some(reg) = state.drivers.get(slot as usize)
		{
			let mut inner = reg.state.lock();
			if inner.live {
				warn!(driver = name, handle = %reg.handle, "driver name already registered");
				return Err(RegistryError::NameInUse(name.to_owned()));
			}
			inner.revive(flags, constructor);
			Counters::bump(&self.counters.registrations_resurrected, 1);
			info!(
				driver = name,
				handle = %reg.handle,
				tables = inner.tables.len(),
				instances = inner.instance_count,
				"resurrected retired driver"
			);
			return Ok(reg.handle);
		}

		if state.drivers.len() >= self.config.max_drivers {
			warn!(driver = name, max = self.config.max_drivers, "driver capacity exhausted");
			return Err(RegistryError::OutOfMemory);
		}
		// Slab has no fallible reserve; `max_drivers` bounds its growth.
		state.by_name.try_reserve(1)?;

		let generation = state.next_generation;
		state.next_generation = state.next_generation.wrapping_add(1).max(1);
		let entry = state.drivers.vacant_entry();
		let slot = u32::try_from(entry.key()).map_err(|_| RegistryError::OutOfMemory)?;
		let handle = DriverHandle::new(slot, generation);
		entry.insert(Arc::new(Registration::new(name, handle, flags, constructor)));
		state.by_name.insert(name.to_owned(), slot);

		Counters::bump(&self.counters.registrations_allocated, 1);
		info!(driver = name, %handle, ?flags, "registered driver");
		Ok(handle)
	}

	/// Retires a registration: poisons every table it owns and quiesces every tracked instance.
	///
	/// The registration stays resident until its last instance is released or the registry is
	/// torn down. Unregistering an already retired registration is a no-op.
	///
	/// # Errors
	///
	/// [`RegistryError::Confusion`] if `handle` does not name a resident registration.
	pub fn unregister(&self, handle: DriverHandle) -> Result<RetireReport, RegistryError> {
		let state = self.state.lock();
		let reg = self.resolve(&state, handle, "unregister")?;
		let mut inner = reg.state.lock();
		if !inner.live {
			debug!(driver = %reg.name, %handle, "driver already retired");
			return Ok(RetireReport::default());
		}

		let report = inner.retire();
		if std::mem::take(&mut inner.loaned) {
			self.code_unit.return_loan();
		}
		info!(
			driver = %reg.name,
			%handle,
			tables = report.tables_poisoned,
			instances = report.instances_neutralized,
			nodes = report.nodes_detached,
			remaining = inner.instance_count,
			"unregistered driver"
		);
		Ok(report)
	}

	/// Calls `callback` on every instance tracked by the registration, under its lock.
	///
	/// Returns the number of instances visited. `callback` must not call back into the registry.
	/// An instance mounted from a different registration is skipped and counted as confusion.
	pub fn reinitialize_instances<F>(&self, handle: DriverHandle, mut callback: F) -> Result<usize, RegistryError>
	where
		F: FnMut(&Instance),
	{
		let reg = {
			let state = self.state.lock();
			Arc::clone(self.resolve(&state, handle, "reinitialize_instances")?)
		};
		let inner = reg.state.lock();
		if inner.reclaimed {
			return Err(self.confusion(format!("reinitialize_instances: {handle} was reclaimed")));
		}

		let mut visited = 0;
		for instance in inner.instances.values() {
			if instance.driver() != reg.handle {
				self.confusion(format!(
					"{} tracked by {} but mounted from {}",
					instance.id(),
					reg.handle,
					instance.driver()
				));
				continue;
			}
			callback(instance);
			visited += 1;
		}
		debug!(driver = %reg.name, %handle, visited, "reinitialized instances");
		Ok(visited)
	}

	/// Resolves a name to the handle of its resident registration, live or retired.
	pub fn lookup(&self, name: &str) -> Option<DriverHandle> {
		let state = self.state.lock();
		let slot = *state.by_name.get(name)?;
		state.drivers.get(slot as usize).map(|reg| reg.handle)
	}

	pub fn is_live(&self, handle: DriverHandle) -> bool {
		self.with_registration(handle, |reg| reg.state.lock().live)
			.unwrap_or(false)
	}

	pub fn name(&self, handle: DriverHandle) -> Option<String> {
		self.with_registration(handle, |reg| reg.name.clone())
	}

	/// Instances currently tracked by the registration.
	pub fn instance_count(&self, handle: DriverHandle) -> Option<usize> {
		self.with_registration(handle, |reg| reg.state.lock().instance_count)
	}

	pub fn flags(&self, handle: DriverHandle) -> Option<DriverFlags> {
		self.with_registration(handle, |reg| reg.state.lock().flags)
	}

	pub fn constructor(&self, handle: DriverHandle) -> Option<Constructor> {
		self.with_registration(handle, |reg| Arc::clone(&reg.state.lock().constructor))
	}

	/// Allocates an empty file-operation table owned by a live registration.
	pub fn new_file_table(&self, handle: DriverHandle) -> Result<Arc<OperationTable<FileOp>>, RegistryError> {
		self.new_table(handle)
	}

	/// Allocates an empty node-operation table owned by a live registration.
	pub fn new_node_table(&self, handle: DriverHandle) -> Result<Arc<OperationTable<NodeOp>>, RegistryError> {
		self.new_table(handle)
	}

	/// Allocates an empty table of op set `O`, every slot vacant.
	///
	/// # Errors
	///
	/// * [`RegistryError::Confusion`] for a stale handle or a retired registration.
	/// * [`RegistryError::OutOfMemory`] past `max_tables_per_driver` or when allocation fails.
	pub fn new_table<O: OpSet>(&self, handle: DriverHandle) -> Result<Arc<OperationTable<O>>, RegistryError> {
		let state = self.state.lock();
		let reg = self.resolve(&state, handle, "new_table")?;
		let mut inner = reg.state.lock();
		if !inner.live {
			return Err(self.confusion(format!("{} table requested for retired driver {}", O::KIND.as_str(), reg.name)));
		}
		if inner.tables.len() >= self.config.max_tables_per_driver {
			warn!(driver = %reg.name, max = self.config.max_tables_per_driver, "table capacity exhausted");
			return Err(RegistryError::OutOfMemory);
		}
		inner.tables.try_reserve(1)?;

		let id = TableId(
			self.counters
				.next_table
				.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
		);
		let table = Arc::new(OperationTable::<O>::new(id, handle)?);
		inner.tables.push(O::wrap(Arc::clone(&table)));
		Counters::bump(&self.counters.tables_allocated, 1);
		debug!(driver = %reg.name, table = %id, kind = O::KIND.as_str(), "allocated operation table");
		Ok(table)
	}

	fn resolve<'s>(&self, state: &'s RegistryState, handle: DriverHandle, op: &str) -> Result<&'s Arc<Registration>, RegistryError> {
		state
			.resolve(handle)
			.ok_or_else(|| self.confusion(format!("{op}: {handle} does not name a resident driver")))
	}

	fn with_registration<R>(&self, handle: DriverHandle, f: impl FnOnce(&Registration) -> R) -> Option<R> {
		let state = self.state.lock();
		state.resolve(handle).map(|reg| f(reg))
	}

	/// Logs and counts an internal inconsistency, returning it as an error.
	pub(crate) fn confusion(&self, detail: String) -> RegistryError {
		Counters::bump(&self.counters.confusions, 1);
		error!(detail = %detail, "registry confusion");
		RegistryError::Confusion(detail)
	}
}

impl fmt::Debug for Registry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.state.lock();
		f.debug_struct("Registry")
			.field("drivers", &state.drivers.len())
			.field("config", &self.config)
			.field("stats", &self.counters.snapshot())
			.finish()
	}
}
