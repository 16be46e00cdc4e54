//! Default constants for VM configuration.

/// Default arena size, in words per semispace (one word holds one field).
pub const DEFAULT_HEAP_WORDS: usize = 1024 * 1024;

/// Default register file size, in registers.
pub const DEFAULT_REGISTER_FILE_SIZE: usize = 64 * 1024;

/// Code position that ends the run when returned to.
pub const HALT: u32 = u32::MAX;

/// Registers occupied by a return record (depth, return position).
pub const RECORD_SIZE: usize = 2;
