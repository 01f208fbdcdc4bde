// =============================================================================
// ksched: Kernel Synchronization Primitives
// =============================================================================
//
// In a kernel, we can't use std::sync (there is no std). The scheduler needs
// a lock that works in a bare-metal, multi-core, interrupt-driven
// environment AND can be handed from one flow of execution to another
// across a context switch.
//
// IMPORTANT: Lock ordering rules:
//   Level 1 (outermost): wait_lock (parent/child relationships)
//   Level 2: caller-supplied condition locks passed to sleep()
//   Level 3 (innermost): process table locks, in ascending CPU index
//
// At most two table locks are ever held at once (scheduler running a
// stolen process, work stealing, all-table snapshots hold more but always
// ascending). NEVER acquire a lower-index table lock while holding a
// higher one. Violating this WILL cause deadlocks on multi-core.
// =============================================================================

pub mod spinlock;
