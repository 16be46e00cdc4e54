//! Package assembler
//!
//! [`PackageWriter`] emits instructions and declarations with
//! package-local numbering and records the relocations the linker needs.
//! The compiler back end is out of tree; tools and tests build packages
//! with this writer instead.

use rustc_hash::FxHashMap;

use super::{
    Class, ClassId, ClassKind, ImplKind, Implementation, Instruction, MethodDecl, MethodId,
    Opcode, Package, Relocation, RelocationKind,
};

/// Errors raised when finishing a package
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    /// A label was referenced but never defined
    #[error("Label {0} referenced but never defined")]
    UndefinedLabel(usize),

    /// A label was defined twice
    #[error("Label {0} defined twice")]
    DuplicateLabel(usize),
}

/// Code position placeholder, resolved when the package is finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

/// Package-local class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassRef(u32);

impl ClassRef {
    /// Package-local class id
    pub fn id(self) -> ClassId {
        ClassId(self.0 as i32)
    }
}

/// Package-local method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodRef(u32);

impl MethodRef {
    /// Package-local method index
    pub fn id(self) -> MethodId {
        MethodId(self.0)
    }
}

/// A global slot as seen from inside the package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalRef {
    /// One of the package's own globals
    Local(u32),
    /// The package object of an import (index into the import list)
    Import(u32),
}

/// 32-bit operand, either fixed or patched at link time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Literal value
    Fixed(i32),
    /// Linked class id
    Class(ClassRef),
    /// Linked method id
    Method(MethodRef),
    /// Linked global slot
    Global(GlobalRef),
    /// Linked code position
    Label(Label),
}

impl From<i32> for Operand {
    fn from(value: i32) -> Self {
        Operand::Fixed(value)
    }
}

impl From<ClassId> for Operand {
    fn from(value: ClassId) -> Self {
        Operand::Fixed(value.0)
    }
}

impl From<ClassRef> for Operand {
    fn from(value: ClassRef) -> Self {
        Operand::Class(value)
    }
}

impl From<MethodRef> for Operand {
    fn from(value: MethodRef) -> Self {
        Operand::Method(value)
    }
}

impl From<GlobalRef> for Operand {
    fn from(value: GlobalRef) -> Self {
        Operand::Global(value)
    }
}

impl From<Label> for Operand {
    fn from(value: Label) -> Self {
        Operand::Label(value)
    }
}

/// Incremental package builder
#[derive(Debug, Default)]
pub struct PackageWriter {
    package: Package,
    method_names: FxHashMap<String, u32>,
    externals: FxHashMap<String, u32>,
    labels: Vec<Option<u32>>,
    label_uses: Vec<(Label, usize)>,
    global_count: u32,
}

impl PackageWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Current code position
    pub fn position(&self) -> u32 {
        self.package.code.len() as u32
    }

    /// Import a package, returning a reference to its package object
    pub fn import(&mut self, name: impl Into<String>) -> GlobalRef {
        let name = name.into();
        let index = match self.package.imports.iter().position(|n| *n == name) {
            Some(index) => index,
            None => {
                self.package.imports.push(name);
                self.package.imports.len() - 1
            }
        };
        GlobalRef::Import(index as u32)
    }

    /// Reference to this package's own package object
    pub fn this_package(&mut self) -> GlobalRef {
        self.import(".")
    }

    /// Allocate a package-local global slot
    pub fn global(&mut self) -> GlobalRef {
        let id = self.global_count;
        self.global_count += 1;
        GlobalRef::Local(id)
    }

    /// Declare a user class
    pub fn class(&mut self, name: impl Into<String>, field_count: u32) -> ClassRef {
        self.builtin_class(name, ClassKind::User, field_count)
    }

    /// Declare a class with a builtin representation
    pub fn builtin_class(
        &mut self,
        name: impl Into<String>,
        kind: ClassKind,
        field_count: u32,
    ) -> ClassRef {
        self.package.classes.push(Class {
            name: name.into(),
            kind,
            field_count,
        });
        ClassRef(self.package.classes.len() as u32 - 1)
    }

    /// Declare (or look up) a method by name
    pub fn method(&mut self, name: impl Into<String>) -> MethodRef {
        let name = name.into();
        if let Some(&index) = self.method_names.get(&name) {
            return MethodRef(index);
        }
        let index = self.package.methods.len() as u32;
        self.package.methods.push(MethodDecl { name: name.clone() });
        self.method_names.insert(name, index);
        MethodRef(index)
    }

    /// Implement `method` for `class` starting at the current code position
    pub fn implement(&mut self, class: ClassRef, method: MethodRef) {
        let entry_point = self.position();
        self.package.implementations.push(Implementation {
            class: class.id(),
            method: method.id(),
            kind: ImplKind::Standard,
            entry_point,
        });
    }

    /// Implement `method` for `class` with the named native callback
    pub fn implement_external(&mut self, class: ClassRef, method: MethodRef, native: &str) {
        let entry_point = match self.externals.get(native) {
            Some(&index) => index,
            None => {
                let index = self.package.external_methods.len() as u32;
                self.package.external_methods.push(native.to_string());
                self.externals.insert(native.to_string(), index);
                index
            }
        };
        self.package.implementations.push(Implementation {
            class: class.id(),
            method: method.id(),
            kind: ImplKind::External,
            entry_point,
        });
    }

    /// Create an undefined label
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current code position
    pub fn define(&mut self, label: Label) -> Result<(), AssemblyError> {
        let position = self.position();
        match &mut self.labels[label.0] {
            Some(_) => Err(AssemblyError::DuplicateLabel(label.0)),
            slot => {
                *slot = Some(position);
                Ok(())
            }
        }
    }

    fn emit(&mut self, instruction: Instruction) {
        instruction.encode(&mut self.package.code);
    }

    fn operand(&mut self, operand: Operand) {
        let pos = self.package.code.len();
        let (kind, id) = match operand {
            Operand::Fixed(value) => {
                self.package.code.extend_from_slice(&value.to_le_bytes());
                return;
            }
            Operand::Class(class) => (RelocationKind::Class, class.0 as i32),
            Operand::Method(method) => (RelocationKind::Method, method.0 as i32),
            Operand::Global(GlobalRef::Local(id)) => (RelocationKind::Global, id as i32),
            Operand::Global(GlobalRef::Import(index)) => (RelocationKind::Import, index as i32),
            Operand::Label(label) => {
                self.label_uses.push((label, pos));
                (RelocationKind::Code, 0)
            }
        };
        self.package.code.extend_from_slice(&id.to_le_bytes());
        self.package.relocations.push(Relocation {
            kind,
            id,
            pos: pos as u32,
        });
    }

    /// `LOAD r`
    pub fn load(&mut self, register: u8) -> &mut Self {
        self.emit(Instruction::Load(register));
        self
    }

    /// `STORE r`
    pub fn store(&mut self, register: u8) -> &mut Self {
        self.emit(Instruction::Store(register));
        self
    }

    /// `NATURAL n`, where `n` may be a linked id or code position
    pub fn natural(&mut self, value: impl Into<Operand>) -> &mut Self {
        self.package.code.push(Opcode::Natural.to_u8());
        self.operand(value.into());
        self
    }

    /// `GLOBAL_LOAD g`
    pub fn global_load(&mut self, global: GlobalRef) -> &mut Self {
        self.package.code.push(Opcode::GlobalLoad.to_u8());
        self.operand(Operand::Global(global));
        self
    }

    /// `GLOBAL_STORE g`
    pub fn global_store(&mut self, global: GlobalRef) -> &mut Self {
        self.package.code.push(Opcode::GlobalStore.to_u8());
        self.operand(Operand::Global(global));
        self
    }

    /// `CREATE class base`; pass a [`ClassId`] for array classes
    pub fn create(&mut self, class: impl Into<Operand>, base: u8) -> &mut Self {
        self.package.code.push(Opcode::Create.to_u8());
        self.operand(class.into());
        self.package.code.push(base);
        self
    }

    /// `FIELD i`
    pub fn field(&mut self, index: u32) -> &mut Self {
        self.emit(Instruction::Field(index));
        self
    }

    /// `RET`
    pub fn ret(&mut self) -> &mut Self {
        self.emit(Instruction::Ret);
        self
    }

    /// `CALL method base`
    pub fn call(&mut self, method: MethodRef, base: u8) -> &mut Self {
        self.package.code.push(Opcode::Call.to_u8());
        self.operand(Operand::Method(method));
        self.package.code.push(base);
        self
    }

    /// Resolve labels and return the package
    pub fn finish(mut self) -> Result<Package, AssemblyError> {
        for (label, pos) in std::mem::take(&mut self.label_uses) {
            let target = self.labels[label.0].ok_or(AssemblyError::UndefinedLabel(label.0))?;
            self.package.code[pos..pos + 4].copy_from_slice(&(target as i32).to_le_bytes());
            if let Some(relocation) = self
                .package
                .relocations
                .iter_mut()
                .find(|r| r.pos as usize == pos)
            {
                relocation.id = target as i32;
            }
        }
        Ok(self.package)
    }
}
