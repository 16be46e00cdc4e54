//! Bytecode opcodes for the Cezanne VM
//!
//! Every instruction is a one-byte opcode followed by fixed-size
//! little-endian operands. Register operands are relative to the current
//! frame.
//!
//! | Byte | Opcode        | Operands                |
//! |------|---------------|-------------------------|
//! | 0    | `LOAD`        | register `u8`           |
//! | 1    | `STORE`       | register `u8`           |
//! | 2    | `NATURAL`     | value `i32`             |
//! | 3    | `GLOBAL_LOAD` | global `u32`            |
//! | 4    | `GLOBAL_STORE`| global `u32`            |
//! | 5    | `CREATE`      | class `i32`, base `u8`  |
//! | 6    | `FIELD`       | field `u32`             |
//! | 7    | `RET`         |                         |
//! | 8    | `CALL`        | method `u32`, base `u8` |

use std::fmt::{self, Write as _};

use super::{ClassId, MethodId};

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// `value = reg[frame + r]`
    Load = 0,
    /// `reg[frame + r] = value`
    Store = 1,
    /// `value = Int(n)`
    Natural = 2,
    /// `value = globals[g]`
    GlobalLoad = 3,
    /// `globals[g] = value`
    GlobalStore = 4,
    /// Allocate an object whose fields come from the frame registers
    Create = 5,
    /// `value = value.fields[i]`
    Field = 6,
    /// Return `value` to the caller
    Ret = 7,
    /// Dispatch a method on `value`
    Call = 8,
}

impl Opcode {
    /// Convert a byte to an opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Load),
            1 => Some(Self::Store),
            2 => Some(Self::Natural),
            3 => Some(Self::GlobalLoad),
            4 => Some(Self::GlobalStore),
            5 => Some(Self::Create),
            6 => Some(Self::Field),
            7 => Some(Self::Ret),
            8 => Some(Self::Call),
            _ => None,
        }
    }

    /// Convert the opcode to its byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Mnemonic used by the disassembler
    pub fn name(self) -> &'static str {
        match self {
            Self::Load => "LOAD",
            Self::Store => "STORE",
            Self::Natural => "NATURAL",
            Self::GlobalLoad => "GLOBAL_LOAD",
            Self::GlobalStore => "GLOBAL_STORE",
            Self::Create => "CREATE",
            Self::Field => "FIELD",
            Self::Ret => "RET",
            Self::Call => "CALL",
        }
    }

    /// Number of operand bytes following the opcode
    pub fn operand_size(self) -> usize {
        match self {
            Self::Load | Self::Store => 1,
            Self::Natural | Self::GlobalLoad | Self::GlobalStore | Self::Field => 4,
            Self::Create | Self::Call => 5,
            Self::Ret => 0,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Instruction decoding failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Byte does not name an opcode
    #[error("Invalid opcode {byte} at {pos}")]
    InvalidOpcode {
        /// Offending byte
        byte: u8,
        /// Code position
        pos: usize,
    },

    /// Operands run past the end of the code
    #[error("Truncated {opcode} instruction at {pos}")]
    Truncated {
        /// Opcode being decoded
        opcode: Opcode,
        /// Code position
        pos: usize,
    },

    /// Position lies outside the code
    #[error("Code position {0} out of range")]
    OutOfRange(usize),
}

/// A decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// `LOAD r`
    Load(u8),
    /// `STORE r`
    Store(u8),
    /// `NATURAL n`
    Natural(i32),
    /// `GLOBAL_LOAD g`
    GlobalLoad(u32),
    /// `GLOBAL_STORE g`
    GlobalStore(u32),
    /// `CREATE class base`
    Create {
        /// Class of the new object
        class: ClassId,
        /// First register holding a field value
        base: u8,
    },
    /// `FIELD i`
    Field(u32),
    /// `RET`
    Ret,
    /// `CALL method base`
    Call {
        /// Method to dispatch
        method: MethodId,
        /// Frame offset of the callee's return record (0 for a tail call)
        base: u8,
    },
}

fn read_u32(code: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([code[at], code[at + 1], code[at + 2], code[at + 3]])
}

impl Instruction {
    /// Decode the instruction at `pos`, returning it with its encoded length
    pub fn decode(code: &[u8], pos: usize) -> Result<(Instruction, usize), DecodeError> {
        let byte = *code.get(pos).ok_or(DecodeError::OutOfRange(pos))?;
        let opcode = Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode { byte, pos })?;
        let len = 1 + opcode.operand_size();
        if pos + len > code.len() {
            return Err(DecodeError::Truncated { opcode, pos });
        }
        let at = pos + 1;
        let instruction = match opcode {
            Opcode::Load => Instruction::Load(code[at]),
            Opcode::Store => Instruction::Store(code[at]),
            Opcode::Natural => Instruction::Natural(read_u32(code, at) as i32),
            Opcode::GlobalLoad => Instruction::GlobalLoad(read_u32(code, at)),
            Opcode::GlobalStore => Instruction::GlobalStore(read_u32(code, at)),
            Opcode::Create => Instruction::Create {
                class: ClassId(read_u32(code, at) as i32),
                base: code[at + 4],
            },
            Opcode::Field => Instruction::Field(read_u32(code, at)),
            Opcode::Ret => Instruction::Ret,
            Opcode::Call => Instruction::Call {
                method: MethodId(read_u32(code, at)),
                base: code[at + 4],
            },
        };
        Ok((instruction, len))
    }

    /// Opcode of this instruction
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Load(_) => Opcode::Load,
            Instruction::Store(_) => Opcode::Store,
            Instruction::Natural(_) => Opcode::Natural,
            Instruction::GlobalLoad(_) => Opcode::GlobalLoad,
            Instruction::GlobalStore(_) => Opcode::GlobalStore,
            Instruction::Create { .. } => Opcode::Create,
            Instruction::Field(_) => Opcode::Field,
            Instruction::Ret => Opcode::Ret,
            Instruction::Call { .. } => Opcode::Call,
        }
    }

    /// Append the encoded instruction to `code`
    pub fn encode(&self, code: &mut Vec<u8>) {
        code.push(self.opcode().to_u8());
        match *self {
            Instruction::Load(r) | Instruction::Store(r) => code.push(r),
            Instruction::Natural(n) => code.extend_from_slice(&n.to_le_bytes()),
            Instruction::GlobalLoad(g) | Instruction::GlobalStore(g) | Instruction::Field(g) => {
                code.extend_from_slice(&g.to_le_bytes())
            }
            Instruction::Create { class, base } => {
                code.extend_from_slice(&class.0.to_le_bytes());
                code.push(base);
            }
            Instruction::Ret => {}
            Instruction::Call { method, base } => {
                code.extend_from_slice(&method.0.to_le_bytes());
                code.push(base);
            }
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode().name();
        match *self {
            Instruction::Load(r) | Instruction::Store(r) => write!(f, "{} r{}", name, r),
            Instruction::Natural(n) => write!(f, "{} {}", name, n),
            Instruction::GlobalLoad(g) | Instruction::GlobalStore(g) => write!(f, "{} g{}", name, g),
            Instruction::Create { class, base } => write!(f, "{} {} r{}", name, class.0, base),
            Instruction::Field(i) => write!(f, "{} {}", name, i),
            Instruction::Ret => f.write_str(name),
            Instruction::Call { method, base } => write!(f, "{} m{} {}", name, method.0, base),
        }
    }
}

/// Render `code` as one instruction per line, prefixed by its position
pub fn disassemble(code: &[u8]) -> Result<String, DecodeError> {
    let mut out = String::new();
    let mut pos = 0;
    while pos < code.len() {
        let (instruction, len) = Instruction::decode(code, pos)?;
        let _ = writeln!(out, "{:>6}: {}", pos, instruction);
        pos += len;
    }
    Ok(out)
}
