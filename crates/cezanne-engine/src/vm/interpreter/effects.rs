//! Effect handler protocol
//!
//! Handlers live on the register file as context records: two registers
//! holding the distance back to the enclosing record and the handler object.
//! `thread.context` points at the innermost record; the root record at
//! register 0 has distance 0 and a NIL handler.
//!
//! ```text
//! enter_context(H, body), native frame at F:
//!
//!   F+2  F+3   body frame: return record (depth + 2, pos)
//!   F    F+1   context record: (F - previous context, H)
//!
//! trigger(e, x), native frame at S, handled by the record at C:
//!
//!   S+4        handler argument x
//!   S+2  S+3   handler frame: return record (depth + 2, pos)
//!   S    S+1   synthetic record: (S - previous context, Empty:(S - C))
//! ```
//!
//! A synthetic record's handler slot holds an `Empty` object whose data is
//! the distance to the record that is handling. While a handler runs, its
//! own record is shadowed: effects it triggers are looked up from the
//! record enclosing the handling one.
//!
//! A body that tail-calls `trigger` shares its frame with the trigger
//! native, so `S = C + 2` and the body's return record is the shifted one
//! at `S + 2`, carrying both shifts in its depth.
//!
//! A handler finishes in one of three ways. Returning, or calling
//! [`Interpreter::fast_resume`] from a nested frame, returns to the trigger
//! point. [`Interpreter::abort`] returns from `enter_context`.
//! [`Interpreter::reify`] captures registers `[C, S + 4)` into a
//! continuation object; [`Interpreter::resume`] copies them back onto the
//! stack at its own frame as often as it is called.

use super::{Interpreter, Transfer};
use crate::format::{ClassId, ClassKind, MethodId};
use crate::vm::defaults::RECORD_SIZE;
use crate::vm::{ObjectRef, VmError, VmResult};

/// Registers a reified continuation holds at least: the handling record
/// and the synthetic record with its shifted return record.
const MIN_CAPTURE: usize = 3 * RECORD_SIZE;

/// Offset from the handling record to the handled body's return record,
/// given the synthetic record's offset
fn body_record_offset(synthetic_offset: usize) -> usize {
    if synthetic_offset == RECORD_SIZE {
        2 * RECORD_SIZE
    } else {
        RECORD_SIZE
    }
}

impl Interpreter<'_> {
    /// Install `handler` around a call of `body.call()` from the running
    /// native's frame. The native's caller receives whatever the body
    /// returns.
    pub fn enter_context(&mut self, handler: ObjectRef, body: ObjectRef) -> VmResult<()> {
        if handler.class == ClassId::EMPTY {
            return Err(VmError::TypeError(format!(
                "{:?} cannot be installed as a handler",
                handler
            )));
        }
        self.claim(Transfer::Call(MethodId::CALL))?;

        let frame = self.thread.frame;
        self.shift_record(frame)?;
        let link = self.int((frame - self.thread.context) as i32);
        self.thread.registers.set(frame, link)?;
        self.thread.registers.set(frame + 1, handler)?;

        let thread = &mut self.thread;
        thread.context = frame;
        thread.frame = frame + RECORD_SIZE;
        thread.frame_end = RECORD_SIZE;
        thread.value = body;
        log::trace!("enter context {} handler {:?}", frame, handler);
        Ok(())
    }

    /// Trigger effect `method` with `arg`, calling the innermost handler
    /// that implements it. The handler's return value becomes the result of
    /// the running native.
    pub fn trigger(&mut self, method: MethodId, arg: ObjectRef) -> VmResult<()> {
        self.claim(Transfer::Call(method))?;
        let handling = self.find_handler(method)?;
        let handler = self.thread.registers.get(handling + 1)?;

        let frame = self.thread.frame;
        self.shift_record(frame)?;
        let link = self.int((frame - self.thread.context) as i32);
        let marker = ObjectRef::new(ClassId::EMPTY, (frame - handling) as u32);
        let registers = &mut self.thread.registers;
        registers.set(frame, link)?;
        registers.set(frame + 1, marker)?;
        registers.set(frame + 2 * RECORD_SIZE, arg)?;

        let thread = &mut self.thread;
        thread.context = frame;
        thread.frame = frame + RECORD_SIZE;
        thread.frame_end = RECORD_SIZE + 1;
        thread.value = handler;
        log::trace!("trigger {} handled at {} via {}", method, handling, frame);
        Ok(())
    }

    /// Return `value` from the trigger the innermost handler is serving
    pub fn fast_resume(&mut self, value: ObjectRef) -> VmResult<()> {
        let synthetic = self.innermost_synthetic()?;
        self.thread.context = synthetic;
        self.thread.frame = synthetic + RECORD_SIZE;
        self.ret(value)
    }

    /// Abandon the handled computation, returning `value` from the
    /// `enter_context` that installed the innermost handler
    pub fn abort(&mut self, value: ObjectRef) -> VmResult<()> {
        let synthetic = self.innermost_synthetic()?;
        let handling = self.handling_context(synthetic)?;
        self.thread.context = handling;
        self.thread.frame = handling + RECORD_SIZE;
        self.ret(value)
    }

    /// Capture the handled computation as a continuation `k`, unwind to the
    /// `enter_context` that installed the innermost handler and call
    /// `body.call(k)` in its place.
    pub fn reify(&mut self, body: ObjectRef) -> VmResult<()> {
        self.claim(Transfer::Call(MethodId::CALL))?;
        let synthetic = self.innermost_synthetic()?;
        let handling = self.handling_context(synthetic)?;
        let body_record = handling + body_record_offset(synthetic - handling);

        let mut captured = self
            .thread
            .registers
            .get_slice(handling, synthetic + 2 * RECORD_SIZE - handling)?
            .to_vec();
        self.thread.value = body;
        let array = self.alloc_array(&mut captured)?;
        let class = self.builtin(ClassKind::Continuation)?;
        let k = self.alloc(class, &mut [array])?;
        let body = self.thread.value;

        let parent = self.parent_context(handling)?;
        let shift = (body_record - handling) as i32;
        let depth = self.read_int(body_record)?;
        if depth < shift {
            return Err(VmError::CorruptRecord(body_record));
        }
        let pos = self.thread.registers.get(body_record + 1)?.data;

        let depth = self.int(depth - shift);
        let pos = self.int(pos as i32);
        let registers = &mut self.thread.registers;
        registers.set(handling, depth)?;
        registers.set(handling + 1, pos)?;
        registers.set(handling + RECORD_SIZE, k)?;

        let thread = &mut self.thread;
        thread.context = parent;
        thread.frame = handling;
        thread.frame_end = RECORD_SIZE + 1;
        thread.value = body;
        log::trace!("reify {} words at {}", synthetic + 4 - handling, handling);
        Ok(())
    }

    /// Re-enter the computation captured in `k`, returning `value` from its
    /// trigger. Whatever the handled body finally returns is returned to
    /// the running native's caller.
    pub fn resume(&mut self, k: ObjectRef, value: ObjectRef) -> VmResult<()> {
        if Some(k.class) != self.program.builtins.get(ClassKind::Continuation) {
            return Err(VmError::TypeError(format!(
                "expected a continuation, got {:?}",
                k
            )));
        }
        let captured = self.process.as_array(self.field(k, 0)?)?;
        if captured.len() < MIN_CAPTURE {
            return Err(VmError::TypeError(format!(
                "continuation holds {} registers",
                captured.len()
            )));
        }

        let frame = self.thread.frame;
        let depth = self.read_int(frame)?;
        let pos = self.thread.registers.get(frame + 1)?.data;

        let synthetic_offset = captured.len() - 2 * RECORD_SIZE;
        let body_record = body_record_offset(synthetic_offset);

        self.thread.registers.write_slice(frame, &captured)?;
        let link = self.int((frame - self.thread.context) as i32);
        let depth = self.int(depth + body_record as i32);
        let pos = self.int(pos as i32);
        let registers = &mut self.thread.registers;
        registers.set(frame, link)?;
        registers.set(frame + body_record, depth)?;
        registers.set(frame + body_record + 1, pos)?;

        let synthetic = frame + synthetic_offset;
        self.thread.context = synthetic;
        self.thread.frame = synthetic + RECORD_SIZE;
        self.thread.frame_end = RECORD_SIZE;
        log::trace!("resume {} words at {}", captured.len(), frame);
        self.ret(value)
    }

    /// Move the return record at `frame` up by one record, adding to its
    /// depth so it still returns to the same caller
    fn shift_record(&mut self, frame: usize) -> VmResult<()> {
        let depth = self.read_int(frame)?;
        let pos = self.thread.registers.get(frame + 1)?;
        let depth = self.int(depth + RECORD_SIZE as i32);
        let registers = &mut self.thread.registers;
        registers.set(frame + RECORD_SIZE, depth)?;
        registers.set(frame + RECORD_SIZE + 1, pos)
    }

    /// Innermost context record whose handler implements `method`
    fn find_handler(&self, method: MethodId) -> VmResult<usize> {
        let mut ctx = self.thread.context;
        while ctx != 0 {
            let handler = self.thread.registers.get(ctx + 1)?;
            if handler.class == ClassId::EMPTY {
                let shielded = self.handling_context(ctx)?;
                ctx = self.parent_context(shielded)?;
            } else if self.program.dispatch(handler.class, method).is_some() {
                return Ok(ctx);
            } else {
                ctx = self.parent_context(ctx)?;
            }
        }
        Err(VmError::UnhandledEffect { method })
    }

    /// Innermost synthetic record, i.e. the trigger the running handler
    /// serves
    fn innermost_synthetic(&self) -> VmResult<usize> {
        let mut ctx = self.thread.context;
        while ctx != 0 {
            if self.thread.registers.get(ctx + 1)?.class == ClassId::EMPTY {
                return Ok(ctx);
            }
            ctx = self.parent_context(ctx)?;
        }
        Err(VmError::NotInHandler)
    }

    /// Record handling the trigger whose synthetic record is at `synthetic`
    fn handling_context(&self, synthetic: usize) -> VmResult<usize> {
        let distance = self.thread.registers.get(synthetic + 1)?.data as usize;
        synthetic
            .checked_sub(distance)
            .filter(|&ctx| distance >= RECORD_SIZE && ctx > 0)
            .ok_or(VmError::CorruptRecord(synthetic))
    }
}

#[cfg(test)]
mod tests {
    use crate::format::{Class, ClassId, ClassKind, Program};
    use crate::vm::{NativeRegistry, ObjectRef, Process, VmError, VmOptions};

    fn process() -> Process {
        let mut program = Program {
            classes: vec![
                Class::new("Empty", 0),
                Class::new("ProgramInit", 0),
                Class::new("Handler", 0),
                Class {
                    name: "Int".into(),
                    kind: ClassKind::Int,
                    field_count: 0,
                },
            ],
            ..Default::default()
        };
        program.builtins.set(ClassKind::Int, ClassId(3));
        Process::new(
            program,
            &NativeRegistry::new(),
            VmOptions::default().with_register_file_size(64),
        )
        .unwrap()
    }

    #[test]
    fn test_enter_context_links_record() {
        let mut process = process();
        let mut interp = process.interpreter().unwrap();
        let handler = ObjectRef::new(ClassId(2), 0);
        interp.enter_context(handler, ObjectRef::NIL).unwrap();

        let thread = interp.thread();
        assert_eq!(thread.context(), 2);
        assert_eq!(thread.frame(), 4);
        assert_eq!(thread.register(2).unwrap(), ObjectRef::new(ClassId(3), 2));
        assert_eq!(thread.register(3).unwrap(), handler);
        // The root frame's record moved up, still returning to HALT.
        assert_eq!(thread.register(4).unwrap(), ObjectRef::new(ClassId(3), 2));
        assert_eq!(thread.register(5).unwrap().data, u32::MAX);
    }

    #[test]
    fn test_empty_handler_rejected() {
        let mut process = process();
        let mut interp = process.interpreter().unwrap();
        assert!(matches!(
            interp.enter_context(ObjectRef::NIL, ObjectRef::NIL),
            Err(VmError::TypeError(_))
        ));
    }

    #[test]
    fn test_outside_handler() {
        let mut process = process();
        let mut interp = process.interpreter().unwrap();
        let one = interp.int(1);
        assert!(matches!(interp.fast_resume(one), Err(VmError::NotInHandler)));
        let mut interp = process.interpreter().unwrap();
        assert!(matches!(interp.abort(one), Err(VmError::NotInHandler)));
    }

    #[test]
    fn test_trigger_without_handlers() {
        let mut process = process();
        let mut interp = process.interpreter().unwrap();
        assert!(matches!(
            interp.trigger(crate::format::MethodId(0), ObjectRef::NIL),
            Err(VmError::UnhandledEffect { .. })
        ));
    }
}
