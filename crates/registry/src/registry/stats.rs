use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic accounting counters.
#[derive(Debug, Default)]
pub(crate) struct Counters {
	pub(crate) next_table: AtomicU64,
	pub(crate) tables_allocated: AtomicU64,
	pub(crate) tables_reclaimed: AtomicU64,
	pub(crate) registrations_allocated: AtomicU64,
	pub(crate) registrations_resurrected: AtomicU64,
	pub(crate) registrations_reclaimed: AtomicU64,
	pub(crate) confusions: AtomicU64,
}

impl Counters {
	pub(crate) fn bump(counter: &AtomicU64, by: u64) {
		counter.fetch_add(by, Ordering::Relaxed);
	}

	pub(crate) fn snapshot(&self) -> RegistryStats {
		RegistryStats {
			tables_allocated: self.tables_allocated.load(Ordering::Relaxed),
			tables_reclaimed: self.tables_reclaimed.load(Ordering::Relaxed),
			registrations_allocated: self.registrations_allocated.load(Ordering::Relaxed),
			registrations_resurrected: self.registrations_resurrected.load(Ordering::Relaxed),
			registrations_reclaimed: self.registrations_reclaimed.load(Ordering::Relaxed),
			confusions: self.confusions.load(Ordering::Relaxed),
		}
	}
}

/// Point-in-time copy of a registry's accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
	pub tables_allocated: u64,
	pub tables_reclaimed: u64,
	pub registrations_allocated: u64,
	/// Retired slots brought back to life by a later `register` of the same name.
	pub registrations_resurrected: u64,
	pub registrations_reclaimed: u64,
	pub confusions: u64,
}

impl RegistryStats {
	/// Tables allocated and not yet reclaimed.
	pub fn tables_outstanding(&self) -> u64 {
		self.tables_allocated.saturating_sub(self.tables_reclaimed)
	}
}
