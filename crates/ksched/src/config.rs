//! Runtime scheduler configuration.

use crate::error::{ProcError, Result};
use crate::param::{MAX_CPUS, NPROC};

/// Sizing for [`crate::Kernel::init`].
///
/// One process table is created per configured CPU, each with
/// `slots_per_cpu` process slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
	/// Number of CPUs that will run a scheduler loop.
	pub cpus: usize,
	/// Process slots in every per-CPU table.
	pub slots_per_cpu: usize,
}

impl Default for SchedConfig {
	fn default() -> Self {
		Self {
			cpus: 4,
			slots_per_cpu: NPROC,
		}
	}
}

impl SchedConfig {
	/// Set the CPU count.
	pub fn with_cpus(mut self, cpus: usize) -> Self {
		self.cpus = cpus;
		self
	}

	/// Set the number of slots per table.
	pub fn with_slots(mut self, slots: usize) -> Self {
		self.slots_per_cpu = slots;
		self
	}

	/// Check the configuration against the compile-time limits.
	pub fn validate(&self) -> Result<()> {
		if self.cpus == 0 || self.cpus > MAX_CPUS {
			return Err(ProcError::InvalidConfig("cpu count out of range"));
		}
		if self.slots_per_cpu == 0 || self.slots_per_cpu > NPROC {
			return Err(ProcError::InvalidConfig("slots per cpu out of range"));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_is_valid() {
		assert_eq!(SchedConfig::default().validate(), Ok(()));
	}

	#[test]
	fn rejects_zero_and_oversized_values() {
		let cfg = SchedConfig::default();
		assert!(cfg.with_cpus(0).validate().is_err());
		assert!(cfg.with_cpus(MAX_CPUS + 1).validate().is_err());
		assert!(cfg.with_slots(0).validate().is_err());
		assert!(cfg.with_slots(NPROC + 1).validate().is_err());
		assert_eq!(cfg.with_cpus(MAX_CPUS).with_slots(1).validate(), Ok(()));
	}
}
