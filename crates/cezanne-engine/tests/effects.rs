//! Effect handler tests
//!
//! Most programs evaluate `add(1, E(2))` under a handler for `E`, changing
//! only how the handler finishes: returning, fast resume from a nested
//! frame, abort, or reifying the continuation and resuming it twice.

mod common;

use cezanne_engine::format::ClassRef;
use common::*;

/// Writer with `core` imported and the effect method `e` declared
struct EffectProgram {
    w: PackageWriter,
    core: CoreMethods,
    main: ClassRef,
    e: MethodRef,
}

impl EffectProgram {
    fn new() -> Self {
        let mut w = PackageWriter::new();
        let core = CoreMethods::import(&mut w);
        let main = w.class("Main", 0);
        let e = w.method("e");
        w.create(main, 0).ret();
        Self { w, core, main, e }
    }

    /// `main() = enter_context(handler, body)`
    fn main_entering(&mut self, handler: ClassRef, body: ClassRef) {
        let main = self.w.method("main");
        self.w.implement(self.main, main);
        self.w
            .create(handler, 0)
            .store(2)
            .create(body, 0)
            .store(3)
            .global_load(self.core.package)
            .call(self.core.enter_context, 0);
    }

    /// `body.call() = add(1, e(2))`
    fn add_one_body(&mut self) -> ClassRef {
        let body = self.w.class("Body", 0);
        self.w.implement(body, self.core.call);
        self.trigger_e(2);
        self.w
            .store(3)
            .natural(1)
            .store(2)
            .global_load(self.core.package)
            .call(self.core.add, 0);
        body
    }

    /// `e(n)` from a frame opened at base 4
    fn trigger_e(&mut self, n: i32) {
        self.w
            .natural(self.e)
            .store(6)
            .natural(n)
            .store(7)
            .global_load(self.core.package)
            .call(self.core.trigger, 4);
    }

    /// `e(x) = reify(k -> add(resume(k, x), resume(k, x)))`
    fn resume_twice_handler(&mut self) -> ClassRef {
        let handler = self.w.class("Handler", 0);
        let with_k = self.w.class("WithK", 1);
        self.w.implement(handler, self.e);
        self.w
            .create(with_k, 2)
            .store(2)
            .global_load(self.core.package)
            .call(self.core.reify, 0);

        // Frame of WithK.call: r2 = k, r3 = x, r4 = first result
        self.w.implement(with_k, self.core.call);
        self.w
            .field(0)
            .store(3)
            .load(2)
            .store(6)
            .load(3)
            .store(7)
            .global_load(self.core.package)
            .call(self.core.resume, 4)
            .store(4)
            .load(2)
            .store(7)
            .load(3)
            .store(8)
            .global_load(self.core.package)
            .call(self.core.resume, 5)
            .store(3)
            .load(4)
            .store(2)
            .global_load(self.core.package)
            .call(self.core.add, 0);
        handler
    }

    /// Run with a `words`-word heap, returning the result and the number of
    /// collections
    fn run_with_heap(self, words: usize) -> (VmResult<i32>, usize) {
        let source = MemorySource::new()
            .with("main", self.w.finish().unwrap())
            .with("core", core_package());
        let (natives, _) = registry();
        let mut process = Process::new(
            link(&source),
            &natives,
            VmOptions::default().with_heap_size(words),
        )
        .unwrap();
        let result = process.run().and_then(|value| process.int_value(value));
        (result, process.arena().stats().collections)
    }

    fn run(self) -> VmResult<i32> {
        let source = MemorySource::new()
            .with("main", self.w.finish().unwrap())
            .with("core", core_package());
        run_program(link(&source), VmOptions::default()).0
    }
}

#[test]
fn test_handler_return_resumes_trigger() {
    let mut p = EffectProgram::new();
    // e(x) = x + 3
    let handler = p.w.class("Handler", 0);
    p.w.implement(handler, p.e);
    p.w.natural(3)
        .store(3)
        .global_load(p.core.package)
        .call(p.core.add, 0);
    let body = p.add_one_body();
    p.main_entering(handler, body);

    assert_eq!(p.run().unwrap(), 6);
}

#[test]
fn test_fast_resume_from_nested_frame() {
    let mut p = EffectProgram::new();
    // e(x) = { fast_resume(7); 999 }
    let handler = p.w.class("Handler", 0);
    p.w.implement(handler, p.e);
    p.w.natural(7)
        .store(6)
        .global_load(p.core.package)
        .call(p.core.fast_resume, 4)
        .natural(999)
        .ret();
    let body = p.add_one_body();
    p.main_entering(handler, body);

    assert_eq!(p.run().unwrap(), 8);
}

#[test]
fn test_abort_returns_from_enter_context() {
    let mut p = EffectProgram::new();
    // e(x) = abort(10)
    let handler = p.w.class("Handler", 0);
    p.w.implement(handler, p.e);
    p.w.natural(10)
        .store(2)
        .global_load(p.core.package)
        .call(p.core.abort, 0);
    let body = p.add_one_body();
    p.main_entering(handler, body);

    assert_eq!(p.run().unwrap(), 10);
}

#[test]
fn test_reified_continuation_resumed_twice() {
    let mut p = EffectProgram::new();
    let handler = p.resume_twice_handler();
    let body = p.add_one_body();
    p.main_entering(handler, body);

    assert_eq!(p.run().unwrap(), 6);
}

#[test]
fn test_reify_from_tail_called_trigger() {
    let mut p = EffectProgram::new();
    let handler = p.resume_twice_handler();
    // body.call() = e(2), in tail position
    let body = p.w.class("Body", 0);
    p.w.implement(body, p.core.call);
    p.w.natural(p.e)
        .store(2)
        .natural(2)
        .store(3)
        .global_load(p.core.package)
        .call(p.core.trigger, 0);
    p.main_entering(handler, body);

    assert_eq!(p.run().unwrap(), 4);
}

#[test]
fn test_reified_continuation_survives_collections() {
    let mut p = EffectProgram::new();
    let handler = p.resume_twice_handler();
    let boxed = p.w.class("Box", 1);

    // body.call() = { b = Box(1); x = e(2); <garbage>; add(b.0, x) }
    let body = p.w.class("Body", 0);
    p.w.implement(body, p.core.call);
    p.w.natural(1).store(2).create(boxed, 2).store(2);
    p.trigger_e(2);
    p.w.store(3);
    for _ in 0..8 {
        p.w.create(boxed, 3);
    }
    p.w.load(2)
        .field(0)
        .store(2)
        .global_load(p.core.package)
        .call(p.core.add, 0);
    p.main_entering(handler, body);

    let (result, collections) = p.run_with_heap(16);
    assert_eq!(result.unwrap(), 6);
    assert!(collections > 0);
}

#[test]
fn test_reified_continuation_dropped() {
    let mut p = EffectProgram::new();
    // e(x) = reify(k -> 5)
    let handler = p.w.class("Handler", 0);
    let ignore_k = p.w.class("IgnoreK", 0);
    p.w.implement(handler, p.e);
    p.w.create(ignore_k, 0)
        .store(2)
        .global_load(p.core.package)
        .call(p.core.reify, 0);
    p.w.implement(ignore_k, p.core.call);
    p.w.natural(5).ret();
    let body = p.add_one_body();
    p.main_entering(handler, body);

    assert_eq!(p.run().unwrap(), 5);
}

#[test]
fn test_nested_handler_reaches_outer() {
    let mut p = EffectProgram::new();
    // outer: e(x) = x + 100
    let outer = p.w.class("Outer", 0);
    p.w.implement(outer, p.e);
    p.w.natural(100)
        .store(3)
        .global_load(p.core.package)
        .call(p.core.add, 0);

    // inner: e(x) = e(x + 10), which must skip the inner handler itself
    let inner = p.w.class("Inner", 0);
    p.w.implement(inner, p.e);
    p.w.load(2)
        .store(6)
        .natural(10)
        .store(7)
        .global_load(p.core.package)
        .call(p.core.add, 4)
        .store(3)
        .natural(p.e)
        .store(2)
        .global_load(p.core.package)
        .call(p.core.trigger, 0);

    // body: e(2)
    let body = p.w.class("Body", 0);
    p.w.implement(body, p.core.call);
    p.trigger_e(2);
    p.w.ret();

    // middle: enter_context(inner, body)
    let middle = p.w.class("Middle", 0);
    p.w.implement(middle, p.core.call);
    p.w.create(inner, 0)
        .store(2)
        .create(body, 0)
        .store(3)
        .global_load(p.core.package)
        .call(p.core.enter_context, 0);

    p.main_entering(outer, middle);

    assert_eq!(p.run().unwrap(), 112);
}

#[test]
fn test_unhandled_effect() {
    let mut p = EffectProgram::new();
    let main = p.w.method("main");
    p.w.implement(p.main, main);
    p.trigger_e(2);
    p.w.ret();

    assert!(matches!(p.run(), Err(VmError::UnhandledEffect { .. })));
}

#[test]
fn test_abort_outside_handler() {
    let mut p = EffectProgram::new();
    let main = p.w.method("main");
    p.w.implement(p.main, main);
    p.w.natural(1)
        .store(6)
        .global_load(p.core.package)
        .call(p.core.abort, 4);

    assert!(matches!(p.run(), Err(VmError::NotInHandler)));
}
