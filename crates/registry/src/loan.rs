use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use thiserror::Error;
use tracing::{debug, error, warn};

/// Unload guard for the code unit that provides drivers.
///
/// Every live registration and every acquired instance holds one loan. The unit may only begin
/// unloading once no loan is outstanding, and refuses new loans while unloading.
#[derive(Debug, Default)]
pub struct CodeUnit {
	loans: AtomicUsize,
	unloading: AtomicBool,
}

/// Refusal to begin unloading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UnloadError {
	#[error("code unit busy: {outstanding} loan(s) outstanding")]
	Busy { outstanding: usize },
}

impl CodeUnit {
	/// Creates a unit with no loans.
	pub fn new() -> Self {
		Self::default()
	}

	/// Takes a loan. Returns false once unloading has begun.
	pub fn try_loan(&self) -> bool {
		if self.unloading.load(Ordering::SeqCst) {
			warn!("loan refused: code unit unloading");
			return false;
		}
		self.loans.fetch_add(1, Ordering::SeqCst);
		// Pairs with the store/load order in `begin_unload`.
		if self.unloading.load(Ordering::SeqCst) {
			self.loans.fetch_sub(1, Ordering::SeqCst);
			warn!("loan refused: code unit unloading");
			return false;
		}
		true
	}

	/// Returns a loan. An unbalanced return is logged and ignored.
	pub fn return_loan(&self) {
		let returned = self
			.loans
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
		if returned.is_err() {
			error!("loan returned with none outstanding");
		}
	}

	/// Number of loans currently outstanding.
	pub fn outstanding(&self) -> usize {
		self.loans.load(Ordering::SeqCst)
	}

	/// Returns true once [`CodeUnit::begin_unload`] has succeeded.
	pub fn is_unloading(&self) -> bool {
		self.unloading.load(Ordering::SeqCst)
	}

	/// Starts unloading if no loan is outstanding.
	pub fn begin_unload(&self) -> Result<(), UnloadError> {
		self.unloading.store(true, Ordering::SeqCst);
		let outstanding = self.loans.load(Ordering::SeqCst);
		if outstanding != 0 {
			self.unloading.store(false, Ordering::SeqCst);
			return Err(UnloadError::Busy { outstanding });
		}
		debug!("code unit unloading");
		Ok(())
	}
}
