//! Precise mark-sweep garbage collection over the VM's object arena.
//!
//! The [`Heap`] owns every object and does the byte accounting. Collection
//! itself is driven by the VM (see `collector.rs`), which knows the roots.

pub mod collector;
pub mod heap;

pub use collector::{Protected, MAX_TEMP_REFERENCES};
pub use heap::{GcStats, Heap, ObjRef};
