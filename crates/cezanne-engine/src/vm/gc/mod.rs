//! Garbage collection
//!
//! Objects live in a semispace [`Arena`]: allocation bumps a pointer in the
//! front buffer, and when it runs out a Cheney-style collection copies every
//! reachable object into the other buffer and swaps.
//!
//! The arena stores fields only. Each field is itself an [`ObjectRef`]
//! carrying its class, so the collector can scan the copied region slot by
//! slot without object headers.
//!
//! The arena knows nothing about interpreter state. Class layout comes in
//! through [`ClassLayout`] and the root set through [`RootTracer`], which
//! rewrites each root with the address returned by [`Collection::copy`].
//!
//! [`ObjectRef`]: crate::vm::ObjectRef

mod arena;
mod roots;
mod stats;

pub use arena::{Arena, Collection};
pub use roots::{ClassLayout, RootTracer};
pub use stats::GcStats;
