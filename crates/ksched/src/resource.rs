//! Collaborator interfaces.
//!
//! The scheduler owns processes but not what they point at: address
//! spaces belong to the virtual-memory subsystem, open files and
//! directories to the filesystem. These traits are the whole contract.

use alloc::boxed::Box;
use alloc::sync::Arc;

/// One process's page tables.
///
/// Owned exclusively by its process until exit; dropping it releases every
/// page it maps (`freevm`).
pub trait AddressSpace: Send {
	/// Copy the first `size` bytes of this space into a new space.
	fn duplicate(&self, size: usize) -> Option<Box<dyn AddressSpace>>;

	/// Grow or shrink the user extent from `old` to `new` bytes.
	/// Returns the resulting size, or `None` if the request failed, in
	/// which case the space is unchanged.
	fn resize(&mut self, old: usize, new: usize) -> Option<usize>;

	/// Load this space on the current CPU.
	fn activate(&self);
}

/// The virtual-memory subsystem.
pub trait VirtualMemory: Sync {
	/// A fresh space holding `image` at address 0 (one page).
	fn create(&self, image: &[u8]) -> Option<Box<dyn AddressSpace>>;

	/// Switch the current CPU back to the kernel-only page tables.
	fn activate_kernel(&self);
}

/// An open file or directory inode.
///
/// Shared between processes through [`Arc`]: duplication is a clone,
/// closing is a drop, and the implementor's `Drop` releases the underlying
/// object when the last reference goes away.
pub trait Resource: Send + Sync {}

/// Shared open-file handle.
pub type FileRef = Arc<dyn Resource>;

/// Shared current-directory handle.
pub type DirRef = Arc<dyn Resource>;
