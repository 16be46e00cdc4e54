//! Core natives
//!
//! Implements the externals of the `core` package:
//! - Effect handling: enter_context, trigger_effect, fast_abort_handler,
//!   fast_resume_handler, reify_handler_context, resume_handler
//! - Integer arithmetic and comparison
//! - Conditionals and array access
//!
//! The receiver is always the `core` package object and is ignored; operands
//! are passed as arguments.

use crate::format::MethodId;
use crate::vm::{Interpreter, NativeRegistry, ObjectRef, VmError, VmResult};

/// Install the core natives into `registry`
pub fn register(registry: &mut NativeRegistry) {
    registry.register("core:enter_context", enter_context);
    registry.register("core:trigger_effect", trigger_effect);
    registry.register("core:fast_abort_handler", fast_abort_handler);
    registry.register("core:fast_resume_handler", fast_resume_handler);
    registry.register("core:reify_handler_context", reify_handler_context);
    registry.register("core:resume_handler", resume_handler);

    register_int_op(registry, "core:int_add", |a, b| Ok(a.wrapping_add(b)));
    register_int_op(registry, "core:int_sub", |a, b| Ok(a.wrapping_sub(b)));
    register_int_op(registry, "core:int_mul", |a, b| Ok(a.wrapping_mul(b)));
    register_int_op(registry, "core:int_div", |a, b| {
        a.checked_div(b)
            .ok_or_else(|| VmError::TypeError(format!("cannot divide {} by {}", a, b)))
    });
    register_int_cmp(registry, "core:int_eq", |a, b| a == b);
    register_int_cmp(registry, "core:int_lt", |a, b| a < b);

    registry.register("core:if", if_);
    registry.register("core:array_len", array_len);
    registry.register("core:array_get", array_get);
    registry.register("core:array_set", array_set);

    log::debug!("registered core natives");
}

fn register_int_op(
    registry: &mut NativeRegistry,
    name: &str,
    op: fn(i32, i32) -> VmResult<i32>,
) {
    registry.register(name, move |interp, _| {
        let result = op(interp.int_arg(0)?, interp.int_arg(1)?)?;
        let result = interp.int(result);
        interp.ret(result)
    });
}

fn register_int_cmp(registry: &mut NativeRegistry, name: &str, cmp: fn(i32, i32) -> bool) {
    registry.register(name, move |interp, _| {
        let result = cmp(interp.int_arg(0)?, interp.int_arg(1)?);
        let result = interp.process().boolean(result)?;
        interp.ret(result)
    });
}

/// `enter_context(handler, body)`: run `body.call()` with `handler`
/// installed
fn enter_context(interp: &mut Interpreter<'_>, _: ObjectRef) -> VmResult<()> {
    let handler = interp.arg(0)?;
    let body = interp.arg(1)?;
    interp.enter_context(handler, body)
}

/// `trigger_effect(method, arg)`: `method` is a linked method id
fn trigger_effect(interp: &mut Interpreter<'_>, _: ObjectRef) -> VmResult<()> {
    let method = interp.int_arg(0)?;
    let method = u32::try_from(method)
        .map(MethodId)
        .map_err(|_| VmError::TypeError(format!("invalid effect method {}", method)))?;
    let arg = interp.arg(1)?;
    interp.trigger(method, arg)
}

fn fast_abort_handler(interp: &mut Interpreter<'_>, _: ObjectRef) -> VmResult<()> {
    let value = interp.arg(0)?;
    interp.abort(value)
}

fn fast_resume_handler(interp: &mut Interpreter<'_>, _: ObjectRef) -> VmResult<()> {
    let value = interp.arg(0)?;
    interp.fast_resume(value)
}

fn reify_handler_context(interp: &mut Interpreter<'_>, _: ObjectRef) -> VmResult<()> {
    let body = interp.arg(0)?;
    interp.reify(body)
}

fn resume_handler(interp: &mut Interpreter<'_>, _: ObjectRef) -> VmResult<()> {
    let k = interp.arg(0)?;
    let value = interp.arg(1)?;
    interp.resume(k, value)
}

/// `if(cond, then, else)`: tail call `call` on the chosen branch
fn if_(interp: &mut Interpreter<'_>, _: ObjectRef) -> VmResult<()> {
    let cond = interp.process().bool_value(interp.arg(0)?)?;
    let branch = interp.arg(if cond { 1 } else { 2 })?;
    interp.tail_call(branch, MethodId::CALL, &[])
}

fn array_len(interp: &mut Interpreter<'_>, _: ObjectRef) -> VmResult<()> {
    let array = interp.arg(0)?;
    let len = array
        .class
        .array_len()
        .ok_or_else(|| VmError::TypeError(format!("expected an array, got {:?}", array)))?;
    let len = interp.int(len as i32);
    interp.ret(len)
}

fn array_index(interp: &Interpreter<'_>) -> VmResult<(ObjectRef, usize)> {
    let array = interp.arg(0)?;
    let index = interp.int_arg(1)?;
    match (array.class.array_len(), usize::try_from(index)) {
        (Some(len), Ok(index)) if index < len => Ok((array, index)),
        (Some(_), _) => Err(VmError::FieldOutOfRange {
            class: array.class,
            index: index as usize,
        }),
        (None, _) => Err(VmError::TypeError(format!(
            "expected an array, got {:?}",
            array
        ))),
    }
}

fn array_get(interp: &mut Interpreter<'_>, _: ObjectRef) -> VmResult<()> {
    let (array, index) = array_index(interp)?;
    let value = interp.field(array, index)?;
    interp.ret(value)
}

/// `array_set(array, index, value)`: returns `value`
fn array_set(interp: &mut Interpreter<'_>, _: ObjectRef) -> VmResult<()> {
    let (array, index) = array_index(interp)?;
    let value = interp.arg(2)?;
    interp.process_mut().set_field(array, index, value)?;
    interp.ret(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_core_natives() {
        let mut registry = NativeRegistry::new();
        register(&mut registry);
        for name in [
            "core:enter_context",
            "core:trigger_effect",
            "core:fast_abort_handler",
            "core:fast_resume_handler",
            "core:reify_handler_context",
            "core:resume_handler",
            "core:int_add",
            "core:int_sub",
            "core:int_mul",
            "core:int_div",
            "core:int_eq",
            "core:int_lt",
            "core:if",
            "core:array_len",
            "core:array_get",
            "core:array_set",
        ] {
            assert!(registry.contains(name), "{} missing", name);
        }
        assert_eq!(registry.len(), 16);
    }
}
