//! Cezanne VM runtime
//!
//! This module provides:
//! - Object references and the semispace arena with its copying collector
//! - The register file and per-thread interpreter state
//! - The bytecode interpreter and the effect handler protocol
//! - Native method registration and the core natives

pub mod builtins;
pub mod defaults;
pub mod gc;
pub mod interpreter;
pub mod native_registry;
pub mod process;
pub mod register_file;
pub mod value;

pub use gc::{Arena, ClassLayout, Collection, GcStats, RootTracer};
pub use interpreter::{Interpreter, Thread};
pub use native_registry::{NativeFn, NativeRegistry, ResolvedNatives};
pub use process::{Process, VmOptions};
pub use register_file::RegisterFile;
pub use value::ObjectRef;

use crate::format::{ClassId, ClassKind, DecodeError, MethodId};

/// VM execution errors
///
/// Every error is terminal for the run that raised it.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Register file exhausted
    #[error("Stack overflow")]
    StackOverflow,

    /// Code could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// `CALL` with a base of 1, which would overlap the caller's record
    #[error("Invalid call base {base} at {pos}")]
    InvalidCall {
        /// Call base operand
        base: u8,
        /// Code position of the call
        pos: u32,
    },

    /// Receiver's class does not implement the method
    #[error("{class} does not implement {method}")]
    DispatchMiss {
        /// Receiver class
        class: ClassId,
        /// Requested method
        method: MethodId,
    },

    /// Dispatch landed on a handler binding, which cannot be entered
    #[error("{class} binds {method} as a handler, which cannot be called")]
    HandlerBinding {
        /// Receiver class
        class: ClassId,
        /// Requested method
        method: MethodId,
    },

    /// Global index outside the program's globals
    #[error("Invalid global index: {0}")]
    InvalidGlobal(u32),

    /// Field index beyond the class's field count
    #[error("Field {index} out of range for {class}")]
    FieldOutOfRange {
        /// Object class
        class: ClassId,
        /// Requested field
        index: usize,
    },

    /// Object reference points outside the arena
    #[error("Invalid reference to offset {offset} with {class}")]
    InvalidReference {
        /// Object class
        class: ClassId,
        /// Arena offset
        offset: u32,
    },

    /// Allocation failed after a collection
    #[error("Out of memory: {requested} words requested, {available} available")]
    OutOfMemory {
        /// Words requested
        requested: usize,
        /// Words free after collecting
        available: usize,
    },

    /// Program names an external method the registry lacks
    #[error("Unknown native method: {0}")]
    UnknownNative(String),

    /// External entry point outside the resolved natives
    #[error("Invalid native index: {0}")]
    InvalidNative(u32),

    /// A native finished without returning or transferring control
    #[error("Native method {0} did not return or transfer control")]
    NativeDidNotTransfer(String),

    /// A native returned or transferred control twice
    #[error("Native method transferred control twice")]
    NativeTransferredTwice,

    /// No installed handler implements the triggered effect
    #[error("Unhandled effect {method}")]
    UnhandledEffect {
        /// Effect method
        method: MethodId,
    },

    /// A handler-only operation was used outside a handler
    #[error("Not running inside an effect handler")]
    NotInHandler,

    /// A return or context record is malformed
    #[error("Corrupt frame or context record at register {0}")]
    CorruptRecord(usize),

    /// An object of the wrong class was supplied
    #[error("Type error: {0}")]
    TypeError(String),

    /// The program declares no class of a required builtin kind
    #[error("Program has no {0:?} class")]
    MissingBuiltin(ClassKind),
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
