//! Shared helpers for engine integration tests
//!
//! # Usage
//!
//! ```ignore
//! mod common;
//! use common::*;
//! ```
//!
//! - [`core_package`] - the `core` package, exposing the core natives as
//!   methods on its package object
//! - [`CoreMethods`] - method and import handles for calling into `core`
//! - [`run_program`] - link-free runner returning the result and everything
//!   passed to `test:print`

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

pub use cezanne_engine::format::{GlobalRef, MethodRef};
pub use cezanne_engine::vm::builtins::core;
pub use cezanne_engine::{
    ClassKind, Linker, MemorySource, NativeRegistry, Package, PackageWriter, Process, Program,
    VmError, VmOptions, VmResult,
};

/// Method names of the `core` package and the natives behind them
pub const CORE_NATIVES: &[(&str, &str)] = &[
    ("enter_context", "core:enter_context"),
    ("trigger", "core:trigger_effect"),
    ("abort", "core:fast_abort_handler"),
    ("fast_resume", "core:fast_resume_handler"),
    ("reify", "core:reify_handler_context"),
    ("resume", "core:resume_handler"),
    ("add", "core:int_add"),
    ("sub", "core:int_sub"),
    ("mul", "core:int_mul"),
    ("eq", "core:int_eq"),
    ("lt", "core:int_lt"),
    ("if", "core:if"),
    ("array_len", "core:array_len"),
    ("array_get", "core:array_get"),
];

/// Install logging for the test binary; repeated calls are harmless
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The `core` package: builtin classes plus a package object whose methods
/// are the core natives
pub fn core_package() -> Package {
    let mut w = PackageWriter::new();
    let core = w.class("Core", 0);
    w.builtin_class("Int", ClassKind::Int, 0);
    w.builtin_class("True", ClassKind::True, 0);
    w.builtin_class("False", ClassKind::False, 0);
    w.builtin_class("Array", ClassKind::Array, 0);
    for (method, native) in CORE_NATIVES {
        let method = w.method(*method);
        w.implement_external(core, method, native);
    }
    w.create(core, 0).ret();
    w.finish().unwrap()
}

/// Handles for calling `core` from another package
#[derive(Debug, Clone, Copy)]
pub struct CoreMethods {
    pub package: GlobalRef,
    pub enter_context: MethodRef,
    pub trigger: MethodRef,
    pub abort: MethodRef,
    pub fast_resume: MethodRef,
    pub reify: MethodRef,
    pub resume: MethodRef,
    pub add: MethodRef,
    pub sub: MethodRef,
    pub mul: MethodRef,
    pub lt: MethodRef,
    pub if_: MethodRef,
    pub call: MethodRef,
}

impl CoreMethods {
    /// Import `core` into the package being written
    pub fn import(w: &mut PackageWriter) -> Self {
        Self {
            package: w.import("core"),
            enter_context: w.method("enter_context"),
            trigger: w.method("trigger"),
            abort: w.method("abort"),
            fast_resume: w.method("fast_resume"),
            reify: w.method("reify"),
            resume: w.method("resume"),
            add: w.method("add"),
            sub: w.method("sub"),
            mul: w.method("mul"),
            lt: w.method("lt"),
            if_: w.method("if"),
            call: w.method("call"),
        }
    }
}

/// Core natives plus `test:print`, which records its integer argument and
/// returns it
pub fn registry() -> (NativeRegistry, Arc<Mutex<Vec<i32>>>) {
    let mut registry = NativeRegistry::new();
    core::register(&mut registry);

    let printed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&printed);
    registry.register("test:print", move |interp, _| {
        let value = interp.arg(0)?;
        sink.lock().push(interp.process().int_value(value)?);
        interp.ret(value)
    });
    (registry, printed)
}

/// Link `main` from `source`
pub fn link(source: &MemorySource) -> Program {
    init_logging();
    Linker::link(source, "main").unwrap()
}

/// Run a linked program, returning its integer result and the printed
/// values
pub fn run_program(program: Program, options: VmOptions) -> (VmResult<i32>, Vec<i32>) {
    init_logging();
    let (registry, printed) = registry();
    let mut process = Process::new(program, &registry, options).unwrap();
    let result = process.run().and_then(|value| process.int_value(value));
    let printed = printed.lock().clone();
    (result, printed)
}
