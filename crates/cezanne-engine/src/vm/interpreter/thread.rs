//! Per-thread interpreter state

use crate::format::ClassId;
use crate::vm::defaults::{HALT, RECORD_SIZE};
use crate::vm::gc::{Collection, RootTracer};
use crate::vm::{ObjectRef, RegisterFile, VmError, VmResult};

/// One thread of execution
///
/// `frame` is the absolute register index of the current frame's return
/// record; `frame_end` is one past the highest frame-relative register the
/// frame has written. `context` is the register index of the innermost
/// context record.
#[derive(Debug, Clone)]
pub struct Thread {
    pub(crate) code_pos: u32,
    pub(crate) frame: usize,
    pub(crate) frame_end: usize,
    pub(crate) context: usize,
    pub(crate) value: ObjectRef,
    pub(crate) registers: RegisterFile,
}

impl Thread {
    /// Create a thread positioned at code 0.
    ///
    /// Registers 0-1 hold the root context record, registers 2-3 the root
    /// frame's return record, which returns to [`HALT`].
    pub fn new(register_file_size: usize, int_class: ClassId) -> VmResult<Self> {
        if register_file_size < 2 * RECORD_SIZE {
            return Err(VmError::StackOverflow);
        }
        let mut registers = RegisterFile::new(register_file_size);
        registers.set(0, ObjectRef::new(int_class, 0))?;
        registers.set(1, ObjectRef::NIL)?;
        registers.set(2, ObjectRef::new(int_class, 0))?;
        registers.set(3, ObjectRef::new(int_class, HALT))?;
        Ok(Self {
            code_pos: 0,
            frame: RECORD_SIZE,
            frame_end: RECORD_SIZE,
            context: 0,
            value: ObjectRef::NIL,
            registers,
        })
    }

    /// Next code position
    pub fn code_pos(&self) -> u32 {
        self.code_pos
    }

    /// Whether the thread has returned from its root frame
    pub fn is_halted(&self) -> bool {
        self.code_pos == HALT
    }

    /// Current frame base
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Registers the current frame has written
    pub fn frame_end(&self) -> usize {
        self.frame_end
    }

    /// Innermost context record
    pub fn context(&self) -> usize {
        self.context
    }

    /// The value register
    pub fn value(&self) -> ObjectRef {
        self.value
    }

    /// Register at absolute index
    pub fn register(&self, index: usize) -> VmResult<ObjectRef> {
        self.registers.get(index)
    }

    /// The register file
    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    /// One past the last live register
    pub fn live_end(&self) -> usize {
        self.frame + self.frame_end
    }
}

impl RootTracer for Thread {
    fn trace(&mut self, collection: &mut Collection<'_>) -> VmResult<()> {
        self.value = collection.copy(self.value)?;
        let end = self.live_end();
        collection.copy_all(self.registers.live_mut(end))
    }
}
