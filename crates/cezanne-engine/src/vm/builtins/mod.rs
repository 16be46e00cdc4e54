//! Native methods shipped with the engine
//!
//! Hosts install these into a [`NativeRegistry`](crate::vm::NativeRegistry)
//! alongside their own natives before loading a program.

pub mod core;
