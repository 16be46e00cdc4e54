//! Dispatch table packing properties

use std::collections::BTreeSet;

use cezanne_engine::format::{ImplKind, Implementation};
use cezanne_engine::linker::{pack, MethodImpls};
use cezanne_engine::{ClassId, LinkError, MethodId, Program};
use proptest::prelude::*;

const CLASSES: i32 = 40;

fn method_impls(sets: &[BTreeSet<i32>]) -> Vec<MethodImpls> {
    sets.iter()
        .enumerate()
        .map(|(index, classes)| MethodImpls {
            // Reverse the name order so packing order differs from ids
            name: format!("m{:02}", 99 - index),
            implementations: classes
                .iter()
                .map(|&class| Implementation {
                    class: ClassId(class),
                    method: MethodId(index as u32),
                    kind: ImplKind::Standard,
                    entry_point: (index as u32) * 1000 + class as u32,
                })
                .collect(),
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn test_every_implementation_dispatches(
        sets in prop::collection::vec(prop::collection::btree_set(0..CLASSES, 0..12), 1..16)
    ) {
        let table = pack(method_impls(&sets)).unwrap();
        let occupied = table.implementations.iter().filter(|imp| !imp.is_empty()).count();
        prop_assert_eq!(occupied, sets.iter().map(BTreeSet::len).sum::<usize>());

        let program = Program {
            methods: table.methods,
            implementations: table.implementations,
            ..Default::default()
        };
        for (index, classes) in sets.iter().enumerate() {
            let method = MethodId(index as u32);
            prop_assert_eq!(&program.methods[index].name, &format!("m{:02}", 99 - index));
            for class in 0..CLASSES {
                let found = program.dispatch(ClassId(class), method);
                if classes.contains(&class) {
                    let imp = found.unwrap();
                    prop_assert_eq!(imp.class, ClassId(class));
                    prop_assert_eq!(imp.method, method);
                    prop_assert_eq!(imp.entry_point, (index as u32) * 1000 + class as u32);
                } else {
                    prop_assert!(found.is_none());
                }
            }
        }
    }
}

#[test]
fn test_duplicate_implementation_rejected() {
    let mut methods = method_impls(&[BTreeSet::from([1, 2])]);
    let duplicate = methods[0].implementations[1];
    methods[0].implementations.push(duplicate);
    assert!(matches!(
        pack(methods),
        Err(LinkError::DuplicateImplementation { class: ClassId(2), .. })
    ));
}

#[test]
fn test_disjoint_methods_share_slots() {
    // m99 on classes 0-1 and m98 on classes 2-3 interleave into four slots.
    let table = pack(method_impls(&[
        BTreeSet::from([0, 1]),
        BTreeSet::from([2, 3]),
    ]))
    .unwrap();
    assert_eq!(table.implementations.len(), 4);
}
