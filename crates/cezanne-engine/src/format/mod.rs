//! Object format shared by the linker and the runtime
//!
//! A [`Package`] is what the compiler emits for one source package: local
//! class, method and global numbering plus a relocation table. The linker
//! turns a closure of packages into one [`Program`] where every id is global
//! and method dispatch is resolved through a shared implementation table.

pub mod assembly;
pub mod opcode;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use assembly::{AssemblyError, ClassRef, GlobalRef, Label, MethodRef, Operand, PackageWriter};
pub use opcode::{disassemble, DecodeError, Instruction, Opcode};

/// Class identifier.
///
/// Non-negative ids index the program's class table. A negative id `c`
/// encodes an array of length `-c - 1`, so arrays never need a class entry
/// per arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(pub i32);

impl ClassId {
    /// Linker-reserved class with no fields and no methods.
    pub const EMPTY: ClassId = ClassId(0);

    /// Linker-reserved class of the program entry object.
    pub const PROGRAM_INIT: ClassId = ClassId(1);

    /// Linker-reserved class of reified continuations.
    pub const CONTINUATION: ClassId = ClassId(2);

    /// Marks an unoccupied implementation-table slot. Never a real class.
    pub const NONE: ClassId = ClassId(i32::MIN);

    /// Written over a relocated object's first field during collection.
    pub const FORWARDED: ClassId = ClassId(i32::MAX);

    /// Class id encoding an array of `len` elements
    pub fn array(len: usize) -> Self {
        ClassId(-(len as i32) - 1)
    }

    /// Whether this id encodes an array
    pub fn is_array(self) -> bool {
        self.0 < 0 && self != Self::NONE
    }

    /// Encoded array length, if this is an array id
    pub fn array_len(self) -> Option<usize> {
        if self.is_array() {
            Some((-(self.0 + 1)) as usize)
        } else {
            None
        }
    }

    /// Index into the class table
    pub fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.array_len() {
            Some(len) => write!(f, "array[{}]", len),
            None => write!(f, "class#{}", self.0),
        }
    }
}

/// Method identifier (global after linking, package-local before)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodId(pub u32);

impl MethodId {
    /// The `call` method, used to enter closures and package initialisers.
    pub const CALL: MethodId = MethodId(0);

    /// Index into the method table
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method#{}", self.0)
    }
}

/// Representation a class provides to the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ClassKind {
    /// Ordinary user-defined class
    #[default]
    User,
    /// Inline integers (`data` holds the value)
    Int,
    /// The `true` boolean
    True,
    /// The `false` boolean
    False,
    /// Dispatch class shared by all arrays
    Array,
    /// Strings (field 0 holds an array of byte integers)
    String,
    /// Reified continuations (linker-reserved)
    Continuation,
}

impl ClassKind {
    /// Builtin kinds, in table order
    pub const BUILTINS: [ClassKind; 6] = [
        ClassKind::Int,
        ClassKind::True,
        ClassKind::False,
        ClassKind::Array,
        ClassKind::String,
        ClassKind::Continuation,
    ];

    fn slot(self) -> Option<usize> {
        Self::BUILTINS.iter().position(|&kind| kind == self)
    }
}

/// A class declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Class {
    /// Class name (diagnostics only)
    pub name: String,
    /// Builtin representation, if any
    #[serde(default)]
    pub kind: ClassKind,
    /// Number of fields an instance carries
    pub field_count: u32,
}

impl Class {
    /// Create a user class
    pub fn new(name: impl Into<String>, field_count: u32) -> Self {
        Self {
            name: name.into(),
            kind: ClassKind::User,
            field_count,
        }
    }
}

/// A method declaration inside a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDecl {
    /// Method name, the cross-package identity of a method
    pub name: String,
}

/// A linked method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Method {
    /// Method name
    pub name: String,
    /// Dispatch offset added to the receiver's class id
    pub offset: i32,
}

/// How an implementation is entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImplKind {
    /// Interpreted: entry point is a code position
    Standard,
    /// Native: entry point indexes the external method list
    External,
    /// Reserved for handler bindings; never dispatched
    Handler,
}

/// One implementation of a method for a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementing class ([`ClassId::NONE`] for an empty table slot)
    pub class: ClassId,
    /// Implemented method
    pub method: MethodId,
    /// Entry convention
    pub kind: ImplKind,
    /// Code position or external method index
    pub entry_point: u32,
}

impl Implementation {
    /// An unoccupied table slot
    pub const EMPTY: Implementation = Implementation {
        class: ClassId::NONE,
        method: MethodId(0),
        kind: ImplKind::Standard,
        entry_point: 0,
    };

    /// Whether the slot is unoccupied
    pub fn is_empty(&self) -> bool {
        self.class == ClassId::NONE
    }
}

/// What a relocation patches in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelocationKind {
    /// Package-local global slot
    Global,
    /// Index into the package's import list
    Import,
    /// Package-local class id
    Class,
    /// Package-local method index
    Method,
    /// Package-relative code position
    Code,
}

/// A 32-bit patch applied to the code once linked ids are known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    /// What `id` refers to
    pub kind: RelocationKind,
    /// Package-local id
    pub id: i32,
    /// Byte position of the little-endian i32 operand in the package code
    pub pos: u32,
}

/// Compiled package, as produced by the compiler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Imported package names (`"."` names the package itself)
    #[serde(default)]
    pub imports: Vec<String>,
    /// Native callback identifiers referenced by external implementations
    #[serde(default)]
    pub external_methods: Vec<String>,
    /// Declared classes
    #[serde(default)]
    pub classes: Vec<Class>,
    /// Declared (or referenced) methods
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
    /// Implementations with package-local ids
    #[serde(default)]
    pub implementations: Vec<Implementation>,
    /// Patches to apply to `code`
    #[serde(default)]
    pub relocations: Vec<Relocation>,
    /// Raw instruction bytes
    #[serde(default)]
    pub code: Vec<u8>,
}

/// Builtin kind to class id map, fixed at link time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltinClasses([ClassId; 6]);

impl Default for BuiltinClasses {
    fn default() -> Self {
        Self([ClassId::NONE; 6])
    }
}

impl BuiltinClasses {
    /// Class chosen for `kind`, if any package declared it
    pub fn get(&self, kind: ClassKind) -> Option<ClassId> {
        let id = self.0[kind.slot()?];
        (id != ClassId::NONE).then_some(id)
    }

    /// Record the class for `kind`, returning the previous one if present
    pub fn set(&mut self, kind: ClassKind, class: ClassId) -> Option<ClassId> {
        let slot = kind.slot()?;
        let previous = self.get(kind);
        self.0[slot] = class;
        previous
    }
}

/// Linked program, as consumed by the runtime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    /// Number of global slots
    pub global_count: u32,
    /// All classes, indexed by class id
    pub classes: Vec<Class>,
    /// All methods, indexed by method id
    pub methods: Vec<Method>,
    /// Shared sparse dispatch table
    pub implementations: Vec<Implementation>,
    /// Native callback identifiers, indexed by external entry point
    pub external_methods: Vec<String>,
    /// Linked code
    pub code: Vec<u8>,
    /// Builtin kind to class id
    pub builtins: BuiltinClasses,
}

impl Program {
    /// Number of fields carried by instances of `class`
    pub fn field_count(&self, class: ClassId) -> usize {
        if let Some(len) = class.array_len() {
            return len;
        }
        class
            .index()
            .and_then(|index| self.classes.get(index))
            .map(|class| class.field_count as usize)
            .unwrap_or(0)
    }

    /// Look up a method id by name
    pub fn method_id(&self, name: &str) -> Option<MethodId> {
        self.methods
            .iter()
            .position(|method| method.name == name)
            .map(|index| MethodId(index as u32))
    }

    /// Class used for dispatch on receivers of `class` (arrays share one)
    pub fn dispatch_class(&self, class: ClassId) -> Option<ClassId> {
        if class.is_array() {
            self.builtins.get(ClassKind::Array)
        } else {
            Some(class)
        }
    }

    /// Resolve `method` for a receiver of class `class`.
    ///
    /// One table index plus an owner check; `None` when the slot is out of
    /// range or holds another class's or another method's implementation
    /// (methods with disjoint class sets may share an offset).
    pub fn dispatch(&self, class: ClassId, method: MethodId) -> Option<&Implementation> {
        let class = self.dispatch_class(class)?;
        let offset = self.methods.get(method.index())?.offset;
        let slot = usize::try_from(class.0 as i64 + offset as i64).ok()?;
        self.implementations
            .get(slot)
            .filter(|imp| imp.class == class && imp.method == method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_class_encoding() {
        assert_eq!(ClassId::array(3), ClassId(-4));
        assert_eq!(ClassId::array(0), ClassId(-1));
        assert_eq!(ClassId(-4).array_len(), Some(3));
        assert_eq!(ClassId(5).array_len(), None);
        assert!(!ClassId::NONE.is_array());
    }

    #[test]
    fn test_builtin_classes() {
        let mut builtins = BuiltinClasses::default();
        assert_eq!(builtins.get(ClassKind::Int), None);
        assert_eq!(builtins.set(ClassKind::Int, ClassId(7)), None);
        assert_eq!(builtins.get(ClassKind::Int), Some(ClassId(7)));
        assert_eq!(builtins.set(ClassKind::Int, ClassId(9)), Some(ClassId(7)));
        assert_eq!(builtins.get(ClassKind::User), None);
    }

    #[test]
    fn test_dispatch_checks_slot_owner() {
        let program = Program {
            classes: vec![Class::new("A", 0), Class::new("B", 0)],
            methods: vec![Method {
                name: "m".to_string(),
                offset: 0,
            }],
            implementations: vec![Implementation {
                class: ClassId(0),
                method: MethodId(0),
                kind: ImplKind::Standard,
                entry_point: 12,
            }],
            ..Default::default()
        };

        assert_eq!(program.dispatch(ClassId(0), MethodId(0)).map(|i| i.entry_point), Some(12));
        assert!(program.dispatch(ClassId(1), MethodId(0)).is_none());
        assert!(program.dispatch(ClassId(0), MethodId(4)).is_none());
    }

    #[test]
    fn test_field_count_of_arrays() {
        let program = Program {
            classes: vec![Class::new("Pair", 2)],
            ..Default::default()
        };
        assert_eq!(program.field_count(ClassId(0)), 2);
        assert_eq!(program.field_count(ClassId::array(5)), 5);
        assert_eq!(program.field_count(ClassId(40)), 0);
    }
}
