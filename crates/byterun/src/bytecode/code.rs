//! Code objects and instruction decoding.

use std::{fmt::Write as _, rc::Rc};

use serde::{Deserialize, Serialize};

use super::op::{Opcode, OperandClass};
use crate::{
    exception::{ExcType, RunResult},
    namespace::Identifier,
    value::Value,
};

/// A compiled unit: the instruction stream plus the tables its operands index into.
///
/// Immutable once built and shared by reference between every frame that runs it.
/// Deserializing does not validate the stream; malformed instructions surface as
/// `SystemError` when they are decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    /// Name used in tracebacks and disassembly.
    #[serde(default = "default_code_name")]
    pub(crate) name: Identifier,
    pub(crate) instructions: Vec<u8>,
    #[serde(default)]
    pub(crate) constants: Vec<Value>,
    #[serde(default)]
    pub(crate) names: Vec<Identifier>,
    /// Local variable names; the first `arg_count` are the parameters.
    #[serde(default)]
    pub(crate) local_slots: Vec<Identifier>,
    #[serde(default)]
    pub(crate) arg_count: usize,
}

fn default_code_name() -> Identifier {
    "<module>".into()
}

impl Code {
    #[must_use]
    pub fn new(
        name: impl Into<Identifier>,
        instructions: Vec<u8>,
        constants: Vec<Value>,
        names: Vec<Identifier>,
        local_slots: Vec<Identifier>,
        arg_count: usize,
    ) -> Self {
        Self {
            name: name.into(),
            instructions,
            constants,
            names,
            local_slots,
            arg_count,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn instructions(&self) -> &[u8] {
        &self.instructions
    }

    #[must_use]
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    #[must_use]
    pub fn names(&self) -> &[Identifier] {
        &self.names
    }

    #[must_use]
    pub fn local_slots(&self) -> &[Identifier] {
        &self.local_slots
    }

    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.arg_count
    }

    /// Parameter names, in positional order.
    pub(crate) fn params(&self) -> RunResult<&[Identifier]> {
        self.local_slots.get(..self.arg_count).ok_or_else(|| {
            ExcType::system_error(format!(
                "code object '{}' declares {} arguments but has {} local slots",
                self.name,
                self.arg_count,
                self.local_slots.len()
            ))
        })
    }

    /// Decodes the instruction starting at `offset`.
    ///
    /// Unknown opcode bytes fail with `UnsupportedInstruction`; running off the end of the
    /// stream, a truncated operand or an out-of-range table index fail with `SystemError`.
    pub fn decode_at(&self, offset: usize) -> RunResult<Instruction> {
        let Some(&byte) = self.instructions.get(offset) else {
            return Err(ExcType::system_error(format!(
                "instruction pointer {offset} ran past the end of '{}'",
                self.name
            )));
        };
        let opcode = Opcode::from_repr(byte)
            .ok_or_else(|| ExcType::unsupported_instruction(format_args!("<opcode {byte}> at offset {offset}")))?;
        if !opcode.has_arg() {
            return Ok(Instruction {
                opcode,
                offset,
                arg: None,
                operand: Operand::None,
                next: offset + 1,
            });
        }
        let (Some(&lo), Some(&hi)) = (self.instructions.get(offset + 1), self.instructions.get(offset + 2)) else {
            return Err(ExcType::system_error(format!(
                "truncated operand for {opcode} at offset {offset} in '{}'",
                self.name
            )));
        };
        let arg = u16::from_le_bytes([lo, hi]);
        let next = offset + 3;
        let index = usize::from(arg);
        let operand = match opcode.operand_class() {
            OperandClass::None => Operand::None,
            OperandClass::Const => Operand::Const(lookup(&self.constants, index, "constant", &self.name)?.clone()),
            OperandClass::Name => Operand::Name(Rc::clone(lookup(&self.names, index, "name", &self.name)?)),
            OperandClass::Local => Operand::Local(Rc::clone(lookup(&self.local_slots, index, "local", &self.name)?)),
            OperandClass::JumpRelative => Operand::Jump(next + index),
            OperandClass::JumpAbsolute => Operand::Jump(index),
            OperandClass::Int => Operand::Int(index),
        };
        Ok(Instruction {
            opcode,
            offset,
            arg: Some(arg),
            operand,
            next,
        })
    }

    /// Human-readable listing of the instruction stream, followed by the listings of any
    /// nested code objects in the constant pool.
    #[must_use]
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out);
        out
    }

    fn disassemble_into(&self, out: &mut String) {
        let mut offset = 0;
        while offset < self.instructions.len() {
            match self.decode_at(offset) {
                Ok(ins) => {
                    let _ = write!(out, "{offset:>6} {:<22}", ins.opcode.name());
                    if let Some(arg) = ins.arg {
                        let _ = write!(out, " {arg:>5}");
                        match &ins.operand {
                            Operand::None | Operand::Int(_) => {}
                            operand => {
                                let _ = write!(out, " ({operand})");
                            }
                        }
                    }
                    out.push('\n');
                    offset = ins.next;
                }
                Err(err) => {
                    let _ = writeln!(out, "{offset:>6} <{err}>");
                    break;
                }
            }
        }
        for constant in &self.constants {
            if let Value::Code(nested) = constant {
                let _ = writeln!(out, "\nDisassembly of <code object {}>:", nested.name);
                nested.disassemble_into(out);
            }
        }
    }
}

fn lookup<'a, T>(table: &'a [T], index: usize, what: &str, code_name: &str) -> RunResult<&'a T> {
    table.get(index).ok_or_else(|| {
        ExcType::system_error(format!(
            "{what} index {index} out of range in '{code_name}' (table has {} entries)",
            table.len()
        ))
    })
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Offset of the opcode byte.
    pub offset: usize,
    /// Raw operand, for opcodes that carry one.
    pub arg: Option<u16>,
    pub operand: Operand,
    /// Offset of the following instruction.
    pub next: usize,
}

/// An operand resolved against the code object's tables.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Const(Value),
    Name(Identifier),
    Local(Identifier),
    /// Absolute target offset, already resolved for relative jumps.
    Jump(usize),
    Int(usize),
}

impl Operand {
    pub(crate) fn into_const(self) -> RunResult<Value> {
        match self {
            Self::Const(value) => Ok(value),
            other => Err(other.mismatch("constant")),
        }
    }

    /// The identifier of a name or local-slot operand.
    pub(crate) fn into_name(self) -> RunResult<Identifier> {
        match self {
            Self::Name(name) | Self::Local(name) => Ok(name),
            other => Err(other.mismatch("name")),
        }
    }

    pub(crate) fn into_jump(self) -> RunResult<usize> {
        match self {
            Self::Jump(target) => Ok(target),
            other => Err(other.mismatch("jump target")),
        }
    }

    pub(crate) fn into_int(self) -> RunResult<usize> {
        match self {
            Self::Int(n) => Ok(n),
            other => Err(other.mismatch("integer")),
        }
    }

    fn mismatch(&self, expected: &str) -> crate::exception::SimpleException {
        ExcType::system_error(format!("expected {expected} operand, got {self:?}"))
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Const(value) => f.write_str(&value.py_repr()),
            Self::Name(name) | Self::Local(name) => f.write_str(name),
            Self::Jump(target) => write!(f, "to {target}"),
            Self::Int(n) => write!(f, "{n}"),
        }
    }
}
