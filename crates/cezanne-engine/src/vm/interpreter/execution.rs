//! Instruction execution and method dispatch

use super::{Interpreter, Transfer};
use crate::format::{ImplKind, Instruction, MethodId};
use crate::vm::defaults::RECORD_SIZE;
use crate::vm::{ObjectRef, VmError, VmResult};

impl Interpreter<'_> {
    /// Run until the thread returns from its root frame, yielding the final
    /// value
    pub fn run(&mut self) -> VmResult<ObjectRef> {
        while !self.thread.is_halted() {
            self.step()?;
        }
        Ok(self.thread.value)
    }

    /// Execute one instruction
    pub fn step(&mut self) -> VmResult<()> {
        let pos = self.thread.code_pos;
        let (instruction, len) = Instruction::decode(&self.program.code, pos as usize)?;
        log::trace!(
            "{:>6}: {:<24} frame={} end={} ctx={} value={:?}",
            pos,
            instruction.to_string(),
            self.thread.frame,
            self.thread.frame_end,
            self.thread.context,
            self.thread.value
        );
        self.thread.code_pos = pos + len as u32;

        match instruction {
            Instruction::Load(r) => {
                self.thread.value = self.thread.registers.get_reg(self.thread.frame, r)?;
            }
            Instruction::Store(r) => self.store(r as usize)?,
            Instruction::Natural(n) => {
                self.thread.value = self.process.int(n);
            }
            Instruction::GlobalLoad(g) => {
                self.thread.value = self.process.global(g)?;
            }
            Instruction::GlobalStore(g) => {
                self.process.set_global(g, self.thread.value)?;
            }
            Instruction::Create { class, base } => {
                let start = self.thread.frame + base as usize;
                let count = self.program.field_count(class);
                let mut fields = self.thread.registers.get_slice(start, count)?.to_vec();
                self.thread.value = self.alloc(class, &mut fields)?;
            }
            Instruction::Field(index) => {
                self.thread.value = self.process.field(self.thread.value, index as usize)?;
            }
            Instruction::Ret => self.do_return()?,
            Instruction::Call { method, base } => {
                match base {
                    0 => {}
                    1 => return Err(VmError::InvalidCall { base, pos }),
                    _ => self.push_record(base as usize)?,
                }
                self.invoke(method)?;
            }
        }
        Ok(())
    }

    /// Store the value register, clearing any registers skipped over so the
    /// live range never exposes stale slots
    fn store(&mut self, r: usize) -> VmResult<()> {
        let thread = &mut self.thread;
        if r >= thread.frame_end {
            thread
                .registers
                .clear(thread.frame + thread.frame_end, thread.frame + r)?;
            thread.frame_end = r + 1;
        }
        thread.registers.set(thread.frame + r, thread.value)
    }

    /// Open a callee frame `base` registers up
    fn push_record(&mut self, base: usize) -> VmResult<()> {
        let depth = self.process.int(base as i32);
        let ret_pos = self.process.int(self.thread.code_pos as i32);

        let thread = &mut self.thread;
        let callee = thread.frame + base;
        thread
            .registers
            .clear(thread.frame + thread.frame_end, callee)?;
        thread.registers.set(callee, depth)?;
        thread.registers.set(callee + 1, ret_pos)?;
        thread.frame_end = thread.frame_end.saturating_sub(base).max(RECORD_SIZE);
        thread.frame = callee;
        Ok(())
    }

    /// Dispatch `method` on the value register in the current frame.
    ///
    /// Natives that tail call are followed here rather than recursively, so
    /// chains of native tail calls run in constant Rust stack.
    pub(super) fn invoke(&mut self, method: MethodId) -> VmResult<()> {
        let mut method = method;
        loop {
            let receiver = self.thread.value;
            let imp = *self
                .program
                .dispatch(receiver.class, method)
                .ok_or(VmError::DispatchMiss {
                    class: receiver.class,
                    method,
                })?;

            match imp.kind {
                ImplKind::Standard => {
                    self.thread.code_pos = imp.entry_point;
                    return Ok(());
                }
                ImplKind::Handler => {
                    return Err(VmError::HandlerBinding {
                        class: receiver.class,
                        method,
                    });
                }
                ImplKind::External => {
                    let native = self.process.natives().get(imp.entry_point)?.clone();
                    log::trace!(
                        "native {} on {:?}",
                        self.process.natives().name(imp.entry_point),
                        receiver
                    );
                    self.transfer = Transfer::None;
                    native(self, receiver)?;
                    match std::mem::replace(&mut self.transfer, Transfer::None) {
                        Transfer::None => {
                            return Err(VmError::NativeDidNotTransfer(
                                self.process.natives().name(imp.entry_point).to_string(),
                            ));
                        }
                        Transfer::Returned => return Ok(()),
                        Transfer::Call(next) => method = next,
                    }
                }
            }
        }
    }
}
