use std::sync::Arc;

use tracing::{debug, info, warn};

use super::stats::Counters;
use super::{Registry, RegistryState};
use crate::error::RegistryError;
use crate::instance::Instance;

/// Outcome of [`Registry::instance_release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
	/// The registration still tracks `remaining` instances, or is still live.
	Retained { remaining: usize },
	/// The last instance of a retired registration went away and its `tables` were dropped.
	Reclaimed { tables: usize },
}

/// Summary of [`Registry::teardown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
	pub drivers: usize,
	/// Registrations that were still live or still tracked instances.
	pub active: usize,
	pub tables_reclaimed: usize,
	/// Code-unit loans returned on behalf of registrations and instances.
	pub loans_returned: usize,
}

impl Registry {
	/// Starts tracking `instance` against the registration it was mounted from.
	///
	/// Each tracked instance holds one code-unit loan. An instance acquired against a retired
	/// registration is quiesced on the spot.
	///
	/// # Errors
	///
	/// * [`RegistryError::Unloading`] if the code unit refuses a loan.
	/// * [`RegistryError::Confusion`] for a stale handle, a reclaimed registration, or an
	///   instance that is already tracked.
	pub fn instance_acquire(&self, instance: &Arc<Instance>) -> Result<(), RegistryError> {
		let handle = instance.driver();
		let state = self.state.lock();
		let reg = self.resolve(&state, handle, "instance_acquire")?;
		let mut inner = reg.state.lock();
		if inner.reclaimed {
			return Err(self.confusion(format!("instance_acquire: {handle} was reclaimed")));
		}
		if inner.instances.contains_key(&instance.id()) {
			return Err(self.confusion(format!("{} acquired twice on {}", instance.id(), reg.name)));
		}
		if !self.code_unit.try_loan() {
			return Err(RegistryError::Unloading);
		}

		let quiesced = (!inner.live).then(|| instance.quiesce().len());
		inner.instances.insert(instance.id(), Arc::clone(instance));
		inner.instance_count += 1;
		debug!(
			driver = %reg.name,
			instance = %instance.id(),
			count = inner.instance_count,
			quiesced = ?quiesced,
			"acquired instance"
		);
		Ok(())
	}

	/// Stops tracking `instance` and returns its code-unit loan.
	///
	/// Releasing the last instance of a retired registration reclaims it: its tables are dropped
	/// and its slot and name become free. This is the only reclamation path short of teardown.
	///
	/// # Errors
	///
	/// [`RegistryError::Confusion`] for a stale handle or an instance that is not tracked. Nothing
	/// is changed in that case.
	pub fn instance_release(&self, instance: &Instance) -> Result<Release, RegistryError> {
		let handle = instance.driver();
		let mut state = self.state.lock();
		let reg = Arc::clone(self.resolve(&state, handle, "instance_release")?);
		let mut inner = reg.state.lock();
		if !inner.instances.contains_key(&instance.id()) {
			return Err(self.confusion(format!("{} released on {} without a matching acquire", instance.id(), reg.name)));
		}
		let Some(remaining) = inner.instance_count.checked_sub(1) else {
			return Err(self.confusion(format!("instance count of {} would drop below zero", reg.name)));
		};
		inner.instances.remove(&instance.id());
		inner.instance_count = remaining;
		self.code_unit.return_loan();

		if remaining > 0 || inner.live {
			debug!(driver = %reg.name, instance = %instance.id(), remaining, "released instance");
			return Ok(Release::Retained { remaining });
		}

		let tables = inner.reclaim();
		drop(inner);
		state.drivers.remove(handle.slot as usize);
		if state.by_name.get(&reg.name) == Some(&handle.slot) {
			state.by_name.remove(&reg.name);
		}
		Counters::bump(&self.counters.tables_reclaimed, tables as u64);
		Counters::bump(&self.counters.registrations_reclaimed, 1);
		info!(driver = %reg.name, %handle, tables, "reclaimed retired driver");
		Ok(Release::Reclaimed { tables })
	}

	/// Consumes the registry, retiring and reclaiming every resident registration.
	///
	/// Registrations that are still live or still track instances are reported as active and
	/// logged. Every outstanding loan they hold on the code unit is returned.
	pub fn teardown(mut self) -> TeardownReport {
		let report = self.drain();
		info!(
			drivers = report.drivers,
			active = report.active,
			tables = report.tables_reclaimed,
			loans = report.loans_returned,
			"registry torn down"
		);
		report
	}

	fn drain(&mut self) -> TeardownReport {
		let code_unit = &self.code_unit;
		let counters = &self.counters;
		let state: &mut RegistryState = self.state.get_mut();
		let mut report = TeardownReport::default();

		state.by_name.clear();
		for reg in state.drivers.drain() {
			let mut inner = reg.state.lock();
			report.drivers += 1;
			if inner.live || inner.instance_count > 0 {
				report.active += 1;
				warn!(
					driver = %reg.name,
					handle = %reg.handle,
					live = inner.live,
					instances = inner.instance_count,
					"tearing down active driver"
				);
			}
			if inner.live {
				inner.retire();
			}
			if std::mem::take(&mut inner.loaned) {
				code_unit.return_loan();
				report.loans_returned += 1;
			}
			for _ in 0..inner.instance_count {
				code_unit.return_loan();
				report.loans_returned += 1;
			}
			inner.instance_count = 0;

			let tables = inner.reclaim();
			report.tables_reclaimed += tables;
			Counters::bump(&counters.tables_reclaimed, tables as u64);
			Counters::bump(&counters.registrations_reclaimed, 1);
		}
		report
	}
}

impl Drop for Registry {
	fn drop(&mut self) {
		let report = self.drain();
		if report.drivers > 0 {
			debug!(drivers = report.drivers, active = report.active, "registry dropped without teardown");
		}
	}
}
