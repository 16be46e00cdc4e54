//! Register file for the interpreter
//!
//! One contiguous array per thread. Frames are windows into it: a frame
//! starts at its return record and its registers follow. `CALL` with base
//! `b` opens the callee frame `b` registers above the caller's.
//!
//! # Memory Layout
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │ callee r2.. (arguments, locals)        │
//! │ callee r1   return position            │
//! │ callee r0   return depth (= b)         │  ← frame + b
//! ├────────────────────────────────────────┤
//! │ caller r2..r(b-1)                      │
//! │ caller r0, r1 (return record)          │  ← frame
//! ├────────────────────────────────────────┤
//! │ ...                                    │
//! │ r0, r1 root context record             │  ← 0
//! └────────────────────────────────────────┘
//! ```
//!
//! The file never grows: indexing past the end is a stack overflow.

use crate::vm::{ObjectRef, VmError, VmResult};

/// Fixed-size register file for one thread
#[derive(Debug, Clone)]
pub struct RegisterFile {
    registers: Vec<ObjectRef>,
}

impl RegisterFile {
    /// Create a register file of `size` registers, all NIL
    pub fn new(size: usize) -> Self {
        Self {
            registers: vec![ObjectRef::NIL; size],
        }
    }

    /// Number of registers
    #[inline]
    pub fn capacity(&self) -> usize {
        self.registers.len()
    }

    /// Get register value at absolute index
    #[inline]
    pub fn get(&self, index: usize) -> VmResult<ObjectRef> {
        self.registers
            .get(index)
            .copied()
            .ok_or(VmError::StackOverflow)
    }

    /// Set register value at absolute index
    #[inline]
    pub fn set(&mut self, index: usize, value: ObjectRef) -> VmResult<()> {
        match self.registers.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(VmError::StackOverflow),
        }
    }

    /// Get register `r` of the frame at `frame`
    #[inline]
    pub fn get_reg(&self, frame: usize, r: u8) -> VmResult<ObjectRef> {
        self.get(frame + r as usize)
    }

    /// Set register `r` of the frame at `frame`
    #[inline]
    pub fn set_reg(&mut self, frame: usize, r: u8, value: ObjectRef) -> VmResult<()> {
        self.set(frame + r as usize, value)
    }

    /// Get `count` registers starting at `base`
    pub fn get_slice(&self, base: usize, count: usize) -> VmResult<&[ObjectRef]> {
        self.registers
            .get(base..base + count)
            .ok_or(VmError::StackOverflow)
    }

    /// Overwrite registers starting at `base` with `values`
    pub fn write_slice(&mut self, base: usize, values: &[ObjectRef]) -> VmResult<()> {
        let slots = self
            .registers
            .get_mut(base..base + values.len())
            .ok_or(VmError::StackOverflow)?;
        slots.copy_from_slice(values);
        Ok(())
    }

    /// Reset registers in `[start, end)` to NIL
    pub fn clear(&mut self, start: usize, end: usize) -> VmResult<()> {
        if start >= end {
            return Ok(());
        }
        let slots = self
            .registers
            .get_mut(start..end)
            .ok_or(VmError::StackOverflow)?;
        slots.fill(ObjectRef::NIL);
        Ok(())
    }

    /// Registers `[0, end)`, clamped to the file, for root tracing
    pub fn live_mut(&mut self, end: usize) -> &mut [ObjectRef] {
        let end = end.min(self.registers.len());
        &mut self.registers[..end]
    }
}
