//! Local storage seen through the [`applier::Applier`] trait.
//!
//! Durability is not modelled here; [`memory::MemoryApplier`] keeps
//! reconciled cells in memory so a node can be exercised end to end.

pub mod applier;
pub mod memory;
