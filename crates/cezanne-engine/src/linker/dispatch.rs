//! Dispatch table packing
//!
//! Every method gets an integer offset such that `class + offset` indexes a
//! slot owned by that class in one shared table. Offsets are chosen first-fit
//! so that no two methods claim the same slot, which keeps the table close
//! to the total number of implementations.

use super::LinkError;
use crate::format::{ClassId, Implementation, Method};

/// All implementations of one linked method
#[derive(Debug, Clone, Default)]
pub struct MethodImpls {
    /// Method name
    pub name: String,
    /// Implementations, in any order
    pub implementations: Vec<Implementation>,
}

/// Result of packing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchTable {
    /// Methods with their offsets, indexed like the input
    pub methods: Vec<Method>,
    /// Shared sparse implementation table
    pub implementations: Vec<Implementation>,
}

/// Assign offsets to `methods` and build the implementation table.
///
/// Methods are placed in name order; a method with no implementations gets
/// offset 0 and claims no slots.
pub fn pack(mut methods: Vec<MethodImpls>) -> Result<DispatchTable, LinkError> {
    let mut order: Vec<usize> = (0..methods.len()).collect();
    order.sort_by(|&a, &b| methods[a].name.cmp(&methods[b].name));

    let mut offsets = vec![0i32; methods.len()];
    let mut space: Vec<Implementation> = Vec::new();

    for index in order {
        let method = &mut methods[index];
        method.implementations.sort_by_key(|imp| imp.class);
        if let Some(pair) = method
            .implementations
            .windows(2)
            .find(|pair| pair[0].class == pair[1].class)
        {
            return Err(LinkError::DuplicateImplementation {
                method: method.name.clone(),
                class: pair[0].class,
            });
        }
        if method.implementations.is_empty() {
            continue;
        }

        let offset = find_offset(&space, &method.implementations);
        apply_offset(&mut space, &method.implementations, offset);
        offsets[index] = offset;
    }

    let methods = methods
        .into_iter()
        .zip(offsets)
        .map(|(method, offset)| Method {
            name: method.name,
            offset,
        })
        .collect();

    Ok(DispatchTable {
        methods,
        implementations: space,
    })
}

fn slot(class: ClassId, offset: i32) -> usize {
    (class.0 as i64 + offset as i64) as usize
}

/// First offset at which every implementation lands on an empty slot or past
/// the end of the table. `impls` is sorted by class and non-empty.
fn find_offset(space: &[Implementation], impls: &[Implementation]) -> i32 {
    let mut offset = -impls[0].class.0;
    loop {
        let fits = impls.iter().all(|imp| {
            space
                .get(slot(imp.class, offset))
                .map_or(true, Implementation::is_empty)
        });
        if fits {
            return offset;
        }
        offset += 1;
    }
}

fn apply_offset(space: &mut Vec<Implementation>, impls: &[Implementation], offset: i32) {
    if let Some(last) = impls.last() {
        let needed = slot(last.class, offset) + 1;
        if needed > space.len() {
            space.resize(needed, Implementation::EMPTY);
        }
    }
    for imp in impls {
        space[slot(imp.class, offset)] = *imp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ImplKind, MethodId};

    fn imp(class: i32, method: u32) -> Implementation {
        Implementation {
            class: ClassId(class),
            method: MethodId(method),
            kind: ImplKind::Standard,
            entry_point: (class as u32) * 100 + method,
        }
    }

    fn method(name: &str, impls: Vec<Implementation>) -> MethodImpls {
        MethodImpls {
            name: name.to_string(),
            implementations: impls,
        }
    }

    #[test]
    fn test_pack_interleaves_methods() {
        let table = pack(vec![
            method("a", vec![imp(0, 0), imp(2, 0)]),
            method("b", vec![imp(0, 1), imp(1, 1)]),
        ])
        .unwrap();

        // "a" takes slots 0 and 2; "b" cannot start at 0 (slot 0 taken) but
        // fits at offset 3.
        assert_eq!(table.methods[0].offset, 0);
        assert_eq!(table.methods[1].offset, 3);
        assert_eq!(table.implementations.len(), 5);
        assert!(table.implementations[1].is_empty());
    }

    #[test]
    fn test_pack_starts_at_negative_min_class() {
        let table = pack(vec![method("m", vec![imp(5, 0), imp(7, 0)])]).unwrap();
        assert_eq!(table.methods[0].offset, -5);
        assert_eq!(table.implementations[0].class, ClassId(5));
        assert_eq!(table.implementations[2].class, ClassId(7));
    }

    #[test]
    fn test_pack_empty_method() {
        let table = pack(vec![method("unused", vec![])]).unwrap();
        assert_eq!(table.methods[0].offset, 0);
        assert!(table.implementations.is_empty());
    }

    #[test]
    fn test_pack_duplicate_implementation() {
        let err = pack(vec![method("m", vec![imp(3, 0), imp(3, 0)])]).unwrap_err();
        assert!(matches!(
            err,
            LinkError::DuplicateImplementation { ref method, class } if method == "m" && class == ClassId(3)
        ));
    }

    #[test]
    fn test_pack_name_order() {
        // "b" is listed first but packed second.
        let table = pack(vec![
            method("b", vec![imp(0, 0)]),
            method("a", vec![imp(0, 1)]),
        ])
        .unwrap();
        assert_eq!(table.methods[1].offset, 0);
        assert_eq!(table.methods[0].offset, 1);
    }
}
