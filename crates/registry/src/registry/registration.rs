use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{DriverFlags, DriverHandle, RetireReport};
use crate::error::DispatchError;
use crate::instance::{Instance, InstanceId};
use crate::table::AnyTable;

/// Driver-supplied routine that populates a freshly created instance.
pub type Constructor = Arc<dyn Fn(&Instance) -> Result<(), DispatchError> + Send + Sync>;

/// One named driver. Identity (`name`, `handle`) is fixed for the life of the arena slot.
pub(crate) struct Registration {
	pub(crate) name: String,
	pub(crate) handle: DriverHandle,
	pub(crate) state: Mutex<RegistrationState>,
}

/// Everything the per-registration lock serializes.
pub(crate) struct RegistrationState {
	pub(crate) live: bool,
	/// Whether the loan taken by `register` is still held.
	pub(crate) loaned: bool,
	/// Set once by reclamation; nothing may use the registration afterwards.
	pub(crate) reclaimed: bool,
	pub(crate) flags: DriverFlags,
	pub(crate) constructor: Constructor,
	pub(crate) instance_count: usize,
	pub(crate) tables: Vec<AnyTable>,
	pub(crate) instances: BTreeMap<InstanceId, Arc<Instance>>,
}

impl Registration {
	pub(crate) fn new(name: &str, handle: DriverHandle, flags: DriverFlags, constructor: Constructor) -> Self {
		Self {
			name: name.to_owned(),
			handle,
			state: Mutex::new(RegistrationState {
				live: true,
				loaned: true,
				reclaimed: false,
				flags,
				constructor,
				instance_count: 0,
				tables: Vec::new(),
				instances: BTreeMap::new(),
			}),
		}
	}
}

impl RegistrationState {
	/// Marks a retired slot live again. Poisoned tables and neutralized instances from the
	/// previous life stay attached until reclamation.
	pub(crate) fn revive(&mut self, flags: DriverFlags, constructor: Constructor) {
		debug_assert!(!self.live && !self.reclaimed);
		self.live = true;
		self.loaned = true;
		self.flags = flags;
		self.constructor = constructor;
	}

	/// Poisons every table and quiesces every tracked instance, then clears `live`.
	///
	/// The caller returns the registration loan when `loaned` is set.
	pub(crate) fn retire(&mut self) -> RetireReport {
		let mut report = RetireReport::default();
		for table in &self.tables {
			if table.poison() {
				report.tables_poisoned += 1;
			}
		}
		for instance in self.instances.values() {
			report.nodes_detached += instance.quiesce().len();
			report.instances_neutralized += 1;
		}
		self.live = false;
		report
	}

	/// Drops every owned table and tracked instance. Returns the number of tables released.
	pub(crate) fn reclaim(&mut self) -> usize {
		debug_assert!(!self.live);
		self.reclaimed = true;
		self.instances.clear();
		let tables = self.tables.len();
		self.tables.clear();
		tables
	}
}
