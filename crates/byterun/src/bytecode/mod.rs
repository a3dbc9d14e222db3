//! Bytecode representation and the virtual machine that executes it.
//!
//! # Module Structure
//!
//! - `op` - Opcode enum and operator selectors
//! - `code` - Code objects and instruction decoding
//! - `builder` - CodeBuilder for assembling code objects
//! - `vm` - Frames, blocks and the execution loop

pub use builder::{CodeBuilder, JumpLabel};
pub use code::{Code, Instruction, Operand};
pub use op::{BinaryOp, CompareOp, HAVE_ARGUMENT, Opcode, OperandClass, UnaryOp};
pub use vm::{Block, BlockKind, VirtualMachine, Why};

mod builder;
mod code;
mod op;
mod vm;
