//! Package linker
//!
//! Starting from an entry package, the linker loads the transitive closure
//! of imports (dependencies first), renumbers every package-local class,
//! method, global and code position into one [`Program`], synthesizes the
//! code that initialises packages and calls `main`, and packs method dispatch
//! into a single offset table.
//!
//! # Program layout
//!
//! ```text
//! classes: [Empty, ProgramInit, Continuation, PackageInit_a, a's classes.., PackageInit_b, ..]
//! code:    [entry stub | a's code | b's code | .. | ProgramInit.call]
//! globals: [a's package object, a's globals.., b's package object, ..]
//! ```

pub mod dispatch;
mod source;

pub use dispatch::{pack, DispatchTable, MethodImpls};
pub use source::{DirectorySource, MemorySource, PackageSource};

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::format::{
    Class, ClassId, ClassKind, ImplKind, Implementation, Instruction, MethodId, Package, Program,
    RelocationKind,
};

/// Name of the method run on the entry package's object
pub const MAIN_METHOD: &str = "main";

/// Name of the method used to enter closures and package initialisers
pub const CALL_METHOD: &str = "call";

/// Default entry package
pub const MAIN_PACKAGE: &str = "main";

/// Errors produced while linking
#[derive(Debug, Error)]
pub enum LinkError {
    /// Import graph contains a cycle
    #[error("Circular import: {}", format_cycle(.0))]
    CircularImport(Vec<String>),

    /// An imported package could not be found
    #[error("Missing package: {0}")]
    MissingPackage(String),

    /// No package implements the `main` method
    #[error("Missing main method")]
    MissingMainMethod,

    /// Two classes declare the same builtin kind
    #[error("Builtin kind {kind:?} declared by both {first} and {second}")]
    DuplicateBuiltin {
        /// Builtin kind
        kind: ClassKind,
        /// Class that declared it first
        first: ClassId,
        /// Class that declared it again
        second: ClassId,
    },

    /// A method has two implementations for one class
    #[error("Method {method} implemented twice for {class}")]
    DuplicateImplementation {
        /// Method name
        method: String,
        /// Implementing class
        class: ClassId,
    },

    /// A package refers to something it does not declare
    #[error("Invalid package {package}: {reason}")]
    InvalidPackage {
        /// Package name
        package: String,
        /// What was wrong
        reason: String,
    },

    /// A package file could not be read
    #[error("Cannot read package {package}: {source}")]
    Io {
        /// Package name
        package: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A package file could not be decoded
    #[error("Cannot decode package {package}: {source}")]
    Decode {
        /// Package name
        package: String,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

fn format_cycle(cycle: &[String]) -> String {
    cycle.join(" -> ")
}

#[derive(Debug, Clone, Copy)]
struct LinkedPackage {
    global: u32,
    class: ClassId,
}

/// Incremental linker state
pub struct Linker<'s> {
    source: &'s dyn PackageSource,
    program: Program,
    method_ids: FxHashMap<String, MethodId>,
    methods: Vec<MethodImpls>,
    packages: FxHashMap<String, Option<LinkedPackage>>,
    in_progress: Vec<String>,
    completed: Vec<LinkedPackage>,
}

impl<'s> Linker<'s> {
    fn new(source: &'s dyn PackageSource) -> Self {
        let mut program = Program {
            classes: vec![
                Class::new("Empty", 0),
                Class::new("ProgramInit", 0),
                Class {
                    name: "Continuation".to_string(),
                    kind: ClassKind::Continuation,
                    field_count: 1,
                },
            ],
            ..Default::default()
        };
        Instruction::Create {
            class: ClassId::PROGRAM_INIT,
            base: 0,
        }
        .encode(&mut program.code);
        Instruction::Call {
            method: MethodId::CALL,
            base: 0,
        }
        .encode(&mut program.code);

        let mut linker = Self {
            source,
            program,
            method_ids: FxHashMap::default(),
            methods: Vec::new(),
            packages: FxHashMap::default(),
            in_progress: Vec::new(),
            completed: Vec::new(),
        };
        linker.method(CALL_METHOD);
        linker
    }

    /// Link `entry` and everything it imports into a program
    pub fn link(source: &'s dyn PackageSource, entry: &str) -> Result<Program, LinkError> {
        let mut linker = Linker::new(source);
        linker.import_package(entry)?;
        linker.complete(entry)
    }

    fn method(&mut self, name: &str) -> MethodId {
        if let Some(&id) = self.method_ids.get(name) {
            return id;
        }
        let id = MethodId(self.methods.len() as u32);
        self.methods.push(MethodImpls {
            name: name.to_string(),
            implementations: Vec::new(),
        });
        self.method_ids.insert(name.to_string(), id);
        id
    }

    fn add_implementation(&mut self, imp: Implementation) {
        self.methods[imp.method.index()].implementations.push(imp);
    }

    fn import_package(&mut self, name: &str) -> Result<(), LinkError> {
        match self.packages.get(name) {
            Some(Some(_)) => return Ok(()),
            Some(None) => {
                let start = self
                    .in_progress
                    .iter()
                    .position(|p| p == name)
                    .unwrap_or(0);
                let mut cycle = self.in_progress[start..].to_vec();
                cycle.push(name.to_string());
                return Err(LinkError::CircularImport(cycle));
            }
            None => {}
        }

        self.packages.insert(name.to_string(), None);
        self.in_progress.push(name.to_string());

        let package = self.source.load_package(name)?;
        for import in &package.imports {
            if import != "." {
                self.import_package(import)?;
            }
        }

        let global = self.program.global_count;
        self.program.global_count += 1;

        let class = ClassId(self.program.classes.len() as i32);
        self.program.classes.push(Class::new("PackageInit", 0));
        self.add_implementation(Implementation {
            class,
            method: MethodId::CALL,
            kind: ImplKind::Standard,
            entry_point: self.program.code.len() as u32,
        });

        self.append_package(name, package, global)?;

        let linked = LinkedPackage { global, class };
        self.packages.insert(name.to_string(), Some(linked));
        self.in_progress.pop();
        self.completed.push(linked);
        log::debug!(
            "linked package {} (global {}, init class {})",
            name,
            global,
            class.0
        );
        Ok(())
    }

    fn append_package(
        &mut self,
        name: &str,
        mut package: Package,
        package_global: u32,
    ) -> Result<(), LinkError> {
        let invalid = |reason: String| LinkError::InvalidPackage {
            package: name.to_string(),
            reason,
        };

        let class_base = self.program.classes.len() as i32;
        let code_base = self.program.code.len() as i32;
        let external_base = self.program.external_methods.len() as u32;
        let global_base = self.program.global_count as i32;

        let method_map: Vec<MethodId> = package
            .methods
            .iter()
            .map(|m| self.method(&m.name))
            .collect();

        let mut highest_global = -1;
        for relocation in &package.relocations {
            let value = match relocation.kind {
                RelocationKind::Class => {
                    let local = usize::try_from(relocation.id).ok();
                    if local.map_or(true, |i| i >= package.classes.len()) {
                        return Err(invalid(format!("class {} out of range", relocation.id)));
                    }
                    relocation.id + class_base
                }
                RelocationKind::Code => relocation.id + code_base,
                RelocationKind::Global => {
                    highest_global = highest_global.max(relocation.id);
                    relocation.id + global_base
                }
                RelocationKind::Import => {
                    let import = usize::try_from(relocation.id)
                        .ok()
                        .and_then(|i| package.imports.get(i))
                        .ok_or_else(|| invalid(format!("import {} out of range", relocation.id)))?;
                    if import == "." {
                        package_global as i32
                    } else {
                        match self.packages.get(import.as_str()) {
                            Some(Some(linked)) => linked.global as i32,
                            _ => return Err(invalid(format!("import {} not linked", import))),
                        }
                    }
                }
                RelocationKind::Method => {
                    let id = usize::try_from(relocation.id)
                        .ok()
                        .and_then(|i| method_map.get(i))
                        .ok_or_else(|| invalid(format!("method {} out of range", relocation.id)))?;
                    id.0 as i32
                }
            };
            let pos = relocation.pos as usize;
            let slot = package
                .code
                .get_mut(pos..pos + 4)
                .ok_or_else(|| invalid(format!("relocation at {} outside code", pos)))?;
            slot.copy_from_slice(&value.to_le_bytes());
        }
        self.program.global_count += (highest_global + 1) as u32;

        for imp in &package.implementations {
            let method = *method_map
                .get(imp.method.index())
                .ok_or_else(|| invalid(format!("method {} out of range", imp.method.0)))?;
            if imp.class.index().map_or(true, |i| i >= package.classes.len()) {
                return Err(invalid(format!("class {} out of range", imp.class.0)));
            }
            let entry_point = match imp.kind {
                ImplKind::External => imp.entry_point + external_base,
                ImplKind::Standard | ImplKind::Handler => imp.entry_point + code_base as u32,
            };
            self.add_implementation(Implementation {
                class: ClassId(imp.class.0 + class_base),
                method,
                kind: imp.kind,
                entry_point,
            });
        }

        self.program
            .external_methods
            .append(&mut package.external_methods);
        self.program.classes.append(&mut package.classes);
        self.program.code.append(&mut package.code);
        Ok(())
    }

    fn complete(mut self, entry: &str) -> Result<Program, LinkError> {
        let main = *self
            .method_ids
            .get(MAIN_METHOD)
            .ok_or(LinkError::MissingMainMethod)?;
        let entry_global = match self.packages.get(entry) {
            Some(Some(linked)) => linked.global,
            _ => return Err(LinkError::MissingPackage(entry.to_string())),
        };

        self.add_implementation(Implementation {
            class: ClassId::PROGRAM_INIT,
            method: MethodId::CALL,
            kind: ImplKind::Standard,
            entry_point: self.program.code.len() as u32,
        });
        let code = &mut self.program.code;
        for package in &self.completed {
            Instruction::Create {
                class: package.class,
                base: 0,
            }
            .encode(code);
            Instruction::Call {
                method: MethodId::CALL,
                base: 2,
            }
            .encode(code);
            Instruction::GlobalStore(package.global).encode(code);
        }
        Instruction::GlobalLoad(entry_global).encode(code);
        Instruction::Call {
            method: main,
            base: 0,
        }
        .encode(code);

        if !self
            .program
            .classes
            .iter()
            .any(|class| class.kind == ClassKind::Int)
        {
            self.program.classes.push(Class {
                name: "Int".to_string(),
                kind: ClassKind::Int,
                field_count: 0,
            });
        }

        for (index, class) in self.program.classes.iter().enumerate() {
            if class.kind == ClassKind::User {
                continue;
            }
            let id = ClassId(index as i32);
            if let Some(first) = self.program.builtins.set(class.kind, id) {
                return Err(LinkError::DuplicateBuiltin {
                    kind: class.kind,
                    first,
                    second: id,
                });
            }
        }

        let table = pack(self.methods)?;
        self.program.methods = table.methods;
        self.program.implementations = table.implementations;
        log::debug!(
            "linked program: {} classes, {} methods, {} table slots, {} code bytes",
            self.program.classes.len(),
            self.program.methods.len(),
            self.program.implementations.len(),
            self.program.code.len()
        );
        Ok(self.program)
    }
}
