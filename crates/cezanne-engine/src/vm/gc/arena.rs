//! Semispace arena and copying collector

use super::{ClassLayout, GcStats, RootTracer};
use crate::format::ClassId;
use crate::vm::{ObjectRef, VmError, VmResult};

/// Bump-allocated semispace heap
///
/// An object of class `c` with `n` fields occupies `n` consecutive words
/// starting at its `data` offset. Field-less objects are never stored.
#[derive(Debug)]
pub struct Arena {
    front: Vec<ObjectRef>,
    back: Vec<ObjectRef>,
    top: usize,
    stats: GcStats,
}

impl Arena {
    /// Create an arena with `words` words per semispace
    pub fn new(words: usize) -> Self {
        Self {
            front: vec![ObjectRef::NIL; words],
            back: vec![ObjectRef::NIL; words],
            top: 0,
            stats: GcStats::default(),
        }
    }

    /// Words per semispace
    pub fn capacity(&self) -> usize {
        self.front.len()
    }

    /// Words currently allocated
    pub fn used(&self) -> usize {
        self.top
    }

    /// Words still free
    pub fn available(&self) -> usize {
        self.capacity() - self.top
    }

    /// Collection statistics
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Allocate an object of `class` initialised with `fields`.
    ///
    /// `fields` must hold exactly the class's field count. It is treated as
    /// an extra root, so references in it stay valid if a collection runs;
    /// they are rewritten in place. A collection is tried once before
    /// giving up with [`VmError::OutOfMemory`].
    pub fn alloc(
        &mut self,
        layout: &dyn ClassLayout,
        roots: &mut dyn RootTracer,
        class: ClassId,
        fields: &mut [ObjectRef],
    ) -> VmResult<ObjectRef> {
        let size = fields.len();
        if size == 0 {
            return Ok(ObjectRef::new(class, 0));
        }
        if size > self.available() {
            self.collect_with(layout, roots, fields)?;
            if size > self.available() {
                return Err(VmError::OutOfMemory {
                    requested: size,
                    available: self.available(),
                });
            }
        }

        let offset = self.top;
        self.front[offset..offset + size].copy_from_slice(fields);
        self.top += size;
        self.stats.total_allocated += size;
        Ok(ObjectRef::new(class, offset as u32))
    }

    fn check(&self, obj: ObjectRef, index: usize) -> VmResult<usize> {
        let slot = obj.data as usize + index;
        if slot < self.top {
            Ok(slot)
        } else {
            Err(VmError::InvalidReference {
                class: obj.class,
                offset: obj.data,
            })
        }
    }

    /// Read field `index` of `obj`. The caller checks `index` against the
    /// class's field count.
    pub fn field(&self, obj: ObjectRef, index: usize) -> VmResult<ObjectRef> {
        let slot = self.check(obj, index)?;
        Ok(self.front[slot])
    }

    /// Write field `index` of `obj`
    pub fn set_field(&mut self, obj: ObjectRef, index: usize, value: ObjectRef) -> VmResult<()> {
        let slot = self.check(obj, index)?;
        self.front[slot] = value;
        Ok(())
    }

    /// The `count` fields of `obj`
    pub fn fields(&self, obj: ObjectRef, count: usize) -> VmResult<&[ObjectRef]> {
        if count == 0 {
            return Ok(&[]);
        }
        let start = self.check(obj, 0)?;
        self.check(obj, count - 1)?;
        Ok(&self.front[start..start + count])
    }

    /// Run a collection now
    pub fn collect(&mut self, layout: &dyn ClassLayout, roots: &mut dyn RootTracer) -> VmResult<()> {
        self.collect_with(layout, roots, &mut [])
    }

    fn collect_with(
        &mut self,
        layout: &dyn ClassLayout,
        roots: &mut dyn RootTracer,
        extra: &mut [ObjectRef],
    ) -> VmResult<()> {
        let before = self.top;
        std::mem::swap(&mut self.front, &mut self.back);

        let mut collection = Collection {
            layout,
            from: &mut self.back[..before],
            to: &mut self.front,
            top: 0,
        };
        roots.trace(&mut collection)?;
        collection.copy_all(extra)?;
        collection.scan()?;

        self.top = collection.top;
        self.stats.record_collection(before, self.top);
        log::debug!(
            "gc #{}: {} -> {} words ({} reclaimed)",
            self.stats.collections,
            before,
            self.top,
            before - self.top
        );
        Ok(())
    }
}

/// An in-progress collection
///
/// Handed to [`RootTracer::trace`]; every root must be replaced by the
/// result of [`Collection::copy`].
pub struct Collection<'a> {
    layout: &'a dyn ClassLayout,
    from: &'a mut [ObjectRef],
    to: &'a mut [ObjectRef],
    top: usize,
}

impl Collection<'_> {
    /// Copy `obj` into the new semispace (once) and return its new reference
    pub fn copy(&mut self, obj: ObjectRef) -> VmResult<ObjectRef> {
        let size = self.layout.field_count(obj.class);
        if size == 0 {
            return Ok(obj);
        }
        let offset = obj.data as usize;
        if offset + size > self.from.len() {
            return Err(VmError::InvalidReference {
                class: obj.class,
                offset: obj.data,
            });
        }

        let head = self.from[offset];
        if head.class == ClassId::FORWARDED {
            return Ok(ObjectRef::new(obj.class, head.data));
        }

        let target = self.top;
        if target + size > self.to.len() {
            return Err(VmError::OutOfMemory {
                requested: size,
                available: self.to.len() - target,
            });
        }
        self.to[target..target + size].copy_from_slice(&self.from[offset..offset + size]);
        self.top += size;
        self.from[offset] = ObjectRef::new(ClassId::FORWARDED, target as u32);
        Ok(ObjectRef::new(obj.class, target as u32))
    }

    /// Copy every reference in `slots`, rewriting them in place
    pub fn copy_all(&mut self, slots: &mut [ObjectRef]) -> VmResult<()> {
        for slot in slots {
            *slot = self.copy(*slot)?;
        }
        Ok(())
    }

    /// Copy everything reachable from the copied objects. The region between
    /// the scan cursor and `top` is the worklist.
    fn scan(&mut self) -> VmResult<()> {
        let mut cursor = 0;
        while cursor < self.top {
            let value = self.to[cursor];
            self.to[cursor] = self.copy(value)?;
            cursor += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Class, Program};

    fn program() -> Program {
        Program {
            classes: vec![
                Class::new("Empty", 0),
                Class::new("Pair", 2),
                Class::new("Int", 0),
            ],
            ..Default::default()
        }
    }

    const PAIR: ClassId = ClassId(1);
    const INT: ClassId = ClassId(2);

    fn int(n: u32) -> ObjectRef {
        ObjectRef::new(INT, n)
    }

    #[test]
    fn test_fieldless_objects_are_inline() {
        let program = program();
        let mut arena = Arena::new(4);
        let obj = arena
            .alloc(&program, &mut Vec::<ObjectRef>::new(), INT, &mut [])
            .unwrap();
        assert_eq!(obj, ObjectRef::new(INT, 0));
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn test_alloc_and_read_fields() {
        let program = program();
        let mut arena = Arena::new(8);
        let pair = arena
            .alloc(&program, &mut Vec::<ObjectRef>::new(), PAIR, &mut [int(1), int(2)])
            .unwrap();
        assert_eq!(arena.field(pair, 0).unwrap(), int(1));
        assert_eq!(arena.field(pair, 1).unwrap(), int(2));
        arena.set_field(pair, 1, int(9)).unwrap();
        assert_eq!(arena.fields(pair, 2).unwrap(), &[int(1), int(9)]);
    }

    #[test]
    fn test_collect_drops_garbage_and_keeps_roots() {
        let program = program();
        let mut arena = Arena::new(8);
        let mut roots: Vec<ObjectRef> = Vec::new();

        let garbage = arena
            .alloc(&program, &mut roots, PAIR, &mut [int(0), int(0)])
            .unwrap();
        let inner = arena
            .alloc(&program, &mut roots, PAIR, &mut [int(1), int(2)])
            .unwrap();
        let outer = arena
            .alloc(&program, &mut roots, PAIR, &mut [inner, int(3)])
            .unwrap();
        assert_ne!(garbage, outer);

        roots.push(outer);
        arena.collect(&program, &mut roots).unwrap();

        assert_eq!(arena.used(), 4);
        assert_eq!(arena.stats().collections, 1);
        assert_eq!(arena.stats().total_reclaimed, 2);
        let outer = roots[0];
        let inner = arena.field(outer, 0).unwrap();
        assert_eq!(arena.field(outer, 1).unwrap(), int(3));
        assert_eq!(arena.fields(inner, 2).unwrap(), &[int(1), int(2)]);
    }

    #[test]
    fn test_shared_objects_copied_once() {
        let program = program();
        let mut arena = Arena::new(8);
        let mut roots: Vec<ObjectRef> = Vec::new();
        let shared = arena
            .alloc(&program, &mut roots, PAIR, &mut [int(7), int(8)])
            .unwrap();
        let holder = arena
            .alloc(&program, &mut roots, PAIR, &mut [shared, shared])
            .unwrap();
        roots.push(holder);
        roots.push(shared);

        arena.collect(&program, &mut roots).unwrap();
        assert_eq!(arena.used(), 4);
        assert_eq!(arena.field(roots[0], 0).unwrap(), roots[1]);
        assert_eq!(arena.field(roots[0], 1).unwrap(), roots[1]);
    }

    #[test]
    fn test_alloc_collects_once_then_fails() {
        let program = program();
        let mut arena = Arena::new(4);
        let mut roots: Vec<ObjectRef> = Vec::new();

        let kept = arena
            .alloc(&program, &mut roots, PAIR, &mut [int(1), int(2)])
            .unwrap();
        roots.push(kept);
        arena
            .alloc(&program, &mut roots, PAIR, &mut [int(3), int(4)])
            .unwrap();

        // Full: the unrooted pair is reclaimed to make room.
        let fresh = arena
            .alloc(&program, &mut roots, PAIR, &mut [int(5), int(6)])
            .unwrap();
        assert_eq!(arena.stats().collections, 1);
        assert_eq!(arena.fields(roots[0], 2).unwrap(), &[int(1), int(2)]);
        roots.push(fresh);

        let err = arena
            .alloc(&program, &mut roots, PAIR, &mut [int(7), int(8)])
            .unwrap_err();
        assert!(matches!(err, VmError::OutOfMemory { requested: 2, available: 0 }));
    }

    #[test]
    fn test_pending_fields_are_roots() {
        let program = program();
        let mut arena = Arena::new(4);
        let mut roots: Vec<ObjectRef> = Vec::new();

        let child = arena
            .alloc(&program, &mut roots, PAIR, &mut [int(1), int(2)])
            .unwrap();
        arena
            .alloc(&program, &mut roots, PAIR, &mut [int(0), int(0)])
            .unwrap();

        // `child` is only referenced by the pending field list.
        let parent = arena
            .alloc(&program, &mut roots, PAIR, &mut [child, int(3)])
            .unwrap();
        let child = arena.field(parent, 0).unwrap();
        assert_eq!(arena.fields(child, 2).unwrap(), &[int(1), int(2)]);
    }

    #[test]
    fn test_arrays_use_encoded_length() {
        let program = program();
        let mut arena = Arena::new(8);
        let mut roots: Vec<ObjectRef> = Vec::new();
        let array = arena
            .alloc(
                &program,
                &mut roots,
                ClassId::array(3),
                &mut [int(1), int(2), int(3)],
            )
            .unwrap();
        roots.push(array);
        arena.collect(&program, &mut roots).unwrap();
        assert_eq!(arena.used(), 3);
        assert_eq!(
            arena.fields(roots[0], 3).unwrap(),
            &[int(1), int(2), int(3)]
        );
    }

    #[test]
    fn test_invalid_reference() {
        let arena = Arena::new(4);
        assert!(matches!(
            arena.field(ObjectRef::new(PAIR, 2), 0),
            Err(VmError::InvalidReference { .. })
        ));
    }
}
