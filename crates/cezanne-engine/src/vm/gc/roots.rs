//! GC root tracing
//!
//! Roots are the starting points of a collection: globals, the live part
//! of each thread's register file, each thread's value register, and the
//! field list of an allocation in progress.

use super::Collection;
use crate::format::{ClassId, Program};
use crate::vm::{ObjectRef, VmResult};

/// Field counts by class
pub trait ClassLayout {
    /// Number of fields carried by instances of `class`
    fn field_count(&self, class: ClassId) -> usize;
}

impl ClassLayout for Program {
    fn field_count(&self, class: ClassId) -> usize {
        Program::field_count(self, class)
    }
}

/// Source of GC roots
///
/// Implementations pass every root to the collection and store back the
/// reference it returns.
pub trait RootTracer {
    /// Copy every root into the new semispace
    fn trace(&mut self, collection: &mut Collection<'_>) -> VmResult<()>;
}

impl RootTracer for [ObjectRef] {
    fn trace(&mut self, collection: &mut Collection<'_>) -> VmResult<()> {
        collection.copy_all(self)
    }
}

impl RootTracer for Vec<ObjectRef> {
    fn trace(&mut self, collection: &mut Collection<'_>) -> VmResult<()> {
        collection.copy_all(self)
    }
}

impl<A, B> RootTracer for (A, B)
where
    A: RootTracer,
    B: RootTracer,
{
    fn trace(&mut self, collection: &mut Collection<'_>) -> VmResult<()> {
        self.0.trace(collection)?;
        self.1.trace(collection)
    }
}

impl<T: RootTracer + ?Sized> RootTracer for &mut T {
    fn trace(&mut self, collection: &mut Collection<'_>) -> VmResult<()> {
        (**self).trace(collection)
    }
}
