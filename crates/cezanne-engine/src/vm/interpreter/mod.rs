//! Bytecode interpreter
//!
//! The [`Interpreter`] runs one [`Thread`] against a [`Process`]. Values flow
//! through a single `value` register; `LOAD`/`STORE` move them in and out of
//! the current frame, and `CALL` dispatches on whatever `value` holds.
//!
//! # Calling convention
//!
//! `CALL m b` with `b >= 2` opens a callee frame `b` registers above the
//! caller's. The interpreter writes the return record into the callee's
//! registers 0 and 1 (return depth `b`, return position); arguments are
//! whatever the caller stored at registers `b + 2` onwards, so the callee
//! sees them from its register 2. `CALL m 0` is a tail call: the callee
//! reuses the current frame and its return record.
//!
//! Natives run at the frame the call opened and communicate through
//! [`Interpreter::arg`], [`Interpreter::ret`], [`Interpreter::tail_call`]
//! and the effect operations in [`effects`].

pub mod effects;
mod execution;
mod thread;

pub use thread::Thread;

use std::sync::Arc;

use crate::format::{ClassId, ClassKind, MethodId, Program};
use crate::vm::defaults::RECORD_SIZE;
use crate::vm::{ObjectRef, Process, VmError, VmResult};

/// How a native handed control back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    /// Nothing yet
    None,
    /// Returned to the caller
    Returned,
    /// Dispatch `method` on the value register next, in the current frame
    Call(MethodId),
}

/// Interpreter for one thread of a process
pub struct Interpreter<'p> {
    process: &'p mut Process,
    program: Arc<Program>,
    thread: Thread,
    transfer: Transfer,
}

impl<'p> Interpreter<'p> {
    /// Create an interpreter running `thread` in `process`
    pub fn new(process: &'p mut Process, thread: Thread) -> Self {
        let program = Arc::clone(process.program());
        Self {
            process,
            program,
            thread,
            transfer: Transfer::None,
        }
    }

    /// The process being run
    pub fn process(&self) -> &Process {
        &*self.process
    }

    /// Mutable access to the process
    pub fn process_mut(&mut self) -> &mut Process {
        &mut *self.process
    }

    /// The linked program
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The thread state
    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    /// Consume the interpreter, returning its thread
    pub fn into_thread(self) -> Thread {
        self.thread
    }

    /// Linked id of the method called `name`
    pub fn method_id(&self, name: &str) -> VmResult<MethodId> {
        self.program
            .method_id(name)
            .ok_or_else(|| VmError::TypeError(format!("program has no method {}", name)))
    }

    /// Inline integer
    #[inline]
    pub fn int(&self, value: i32) -> ObjectRef {
        self.process.int(value)
    }

    /// Argument `index` of the running native
    pub fn arg(&self, index: usize) -> VmResult<ObjectRef> {
        self.thread
            .registers
            .get(self.thread.frame + RECORD_SIZE + index)
    }

    /// Integer argument `index` of the running native
    pub fn int_arg(&self, index: usize) -> VmResult<i32> {
        self.process.int_value(self.arg(index)?)
    }

    fn claim(&mut self, transfer: Transfer) -> VmResult<()> {
        if self.transfer != Transfer::None {
            return Err(VmError::NativeTransferredTwice);
        }
        self.transfer = transfer;
        Ok(())
    }

    /// Return `value` from the running native to its caller
    pub fn ret(&mut self, value: ObjectRef) -> VmResult<()> {
        self.claim(Transfer::Returned)?;
        self.thread.value = value;
        self.do_return()
    }

    /// Replace the running native with a call of `method` on `receiver`.
    ///
    /// The call reuses the native's frame and return record, so whatever
    /// the method returns is returned to the native's caller.
    pub fn tail_call(
        &mut self,
        receiver: ObjectRef,
        method: MethodId,
        args: &[ObjectRef],
    ) -> VmResult<()> {
        self.claim(Transfer::Call(method))?;
        let frame = self.thread.frame;
        self.thread.registers.write_slice(frame + RECORD_SIZE, args)?;
        self.thread.frame_end = self.thread.frame_end.max(RECORD_SIZE + args.len());
        self.thread.value = receiver;
        Ok(())
    }

    /// Allocate an object, with every live register as a root
    pub fn alloc(&mut self, class: ClassId, fields: &mut [ObjectRef]) -> VmResult<ObjectRef> {
        self.process.alloc_traced(&mut self.thread, class, fields)
    }

    /// Allocate an array
    pub fn alloc_array(&mut self, elements: &mut [ObjectRef]) -> VmResult<ObjectRef> {
        self.process.alloc_array(&mut self.thread, elements)
    }

    /// Allocate a string
    pub fn alloc_string(&mut self, text: &str) -> VmResult<ObjectRef> {
        self.process.alloc_string(&mut self.thread, text)
    }

    /// Force a collection
    pub fn collect(&mut self) -> VmResult<()> {
        self.process.collect(&mut self.thread)
    }

    /// Field `index` of `obj`
    pub fn field(&self, obj: ObjectRef, index: usize) -> VmResult<ObjectRef> {
        self.process.field(obj, index)
    }

    /// Class of a builtin kind
    pub fn builtin(&self, kind: ClassKind) -> VmResult<ClassId> {
        self.process.builtin(kind)
    }

    fn read_int(&self, index: usize) -> VmResult<i32> {
        let value = self.thread.registers.get(index)?;
        self.process
            .int_value(value)
            .map_err(|_| VmError::CorruptRecord(index))
    }

    /// Context record enclosing the one at `ctx`
    fn parent_context(&self, ctx: usize) -> VmResult<usize> {
        let offset = self.read_int(ctx)?;
        if offset <= 0 || offset as usize > ctx {
            return Err(VmError::CorruptRecord(ctx));
        }
        Ok(ctx - offset as usize)
    }

    /// Return the value register through the current frame's return record.
    ///
    /// Context records installed at or above the frame being returned to
    /// belong to abandoned frames and are popped.
    fn do_return(&mut self) -> VmResult<()> {
        let frame = self.thread.frame;
        let depth = self.read_int(frame)?;
        let pos = self.thread.registers.get(frame + 1)?.data;
        let target = usize::try_from(depth)
            .ok()
            .and_then(|depth| frame.checked_sub(depth))
            .ok_or(VmError::CorruptRecord(frame))?;

        let mut context = self.thread.context;
        while context != 0 && context + RECORD_SIZE > target {
            context = self.parent_context(context)?;
        }

        let thread = &mut self.thread;
        thread.context = context;
        thread.frame = target;
        thread.frame_end = (depth as usize).max(RECORD_SIZE);
        thread.code_pos = pos;
        Ok(())
    }
}
