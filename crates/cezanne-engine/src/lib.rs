//! Cezanne Language Engine
//!
//! This crate provides the execution side of the Cezanne language:
//! - **Format**: package and program object format, opcodes, package assembler (`format` module)
//! - **Linker**: package closure, relocation and dispatch table packing (`linker` module)
//! - **VM**: copying-collected arena, interpreter, effect handlers, natives (`vm` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use cezanne_engine::{Linker, MemorySource, NativeRegistry, Process, VmOptions};
//!
//! let source = MemorySource::new().with("main", main_package);
//! let program = Linker::link(&source, "main")?;
//!
//! let mut natives = NativeRegistry::new();
//! cezanne_engine::vm::builtins::core::register(&mut natives);
//!
//! let mut process = Process::new(program, &natives, VmOptions::default())?;
//! let result = process.run()?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod format;
pub mod linker;
pub mod vm;

pub use format::{ClassId, ClassKind, MethodId, Package, PackageWriter, Program};
pub use linker::{DirectorySource, LinkError, Linker, MemorySource, PackageSource};
pub use vm::{
    Interpreter, NativeFn, NativeRegistry, ObjectRef, Process, VmError, VmOptions, VmResult,
};
