//! Builder for assembling code objects.
//!
//! `CodeBuilder` provides methods for emitting opcodes and operands, interning names and
//! constants into the code object's tables, and handling forward jumps with patching.

use super::{
    code::Code,
    op::{Opcode, OperandClass},
};
use crate::{namespace::Identifier, value::Value};

/// Builder for hand-assembled or compiler-generated code objects.
///
/// # Usage
///
/// ```ignore
/// let mut builder = CodeBuilder::new("<module>");
/// builder.load_const(Value::Int(7));
/// let skip = builder.emit_jump(Opcode::PopJumpIfFalse);
/// // ... emit more code ...
/// builder.patch_jump(skip);
/// builder.emit(Opcode::ReturnValue);
/// let code = builder.build();
/// ```
#[derive(Debug)]
pub struct CodeBuilder {
    name: Identifier,
    instructions: Vec<u8>,
    constants: Vec<Value>,
    names: Vec<Identifier>,
    local_slots: Vec<Identifier>,
    arg_count: usize,
}

impl CodeBuilder {
    #[must_use]
    pub fn new(name: impl Into<Identifier>) -> Self {
        Self {
            name: name.into(),
            instructions: Vec::new(),
            constants: Vec::new(),
            names: Vec::new(),
            local_slots: Vec::new(),
            arg_count: 0,
        }
    }

    /// Declares the next positional parameter, returning its local slot.
    ///
    /// # Panics
    ///
    /// Panics if a non-parameter local was already added: parameters occupy the first
    /// `arg_count` local slots.
    pub fn add_param(&mut self, name: impl Into<Identifier>) -> u16 {
        assert_eq!(
            self.local_slots.len(),
            self.arg_count,
            "parameters must be declared before other locals"
        );
        self.arg_count += 1;
        push_slot(&mut self.local_slots, name.into(), "local")
    }

    /// Adds a constant to the pool, returning its index. Constants are not deduplicated.
    ///
    /// # Panics
    ///
    /// Panics if the constant pool exceeds 65535 entries.
    #[must_use]
    pub fn add_const(&mut self, value: impl Into<Value>) -> u16 {
        let idx = u16::try_from(self.constants.len()).expect("constant pool exceeds u16 range (65535)");
        self.constants.push(value.into());
        idx
    }

    /// Interns a name into the name table.
    #[must_use]
    pub fn add_name(&mut self, name: impl Into<Identifier>) -> u16 {
        intern(&mut self.names, name.into(), "name")
    }

    /// Interns a local variable name into the local-slot table.
    #[must_use]
    pub fn add_local(&mut self, name: impl Into<Identifier>) -> u16 {
        intern(&mut self.local_slots, name.into(), "local")
    }

    /// Emits a no-operand instruction.
    pub fn emit(&mut self, op: Opcode) {
        debug_assert!(!op.has_arg(), "{op} needs an operand");
        self.instructions.push(op as u8);
    }

    /// Emits an instruction with a 2-byte little-endian operand.
    pub fn emit_arg(&mut self, op: Opcode, arg: u16) {
        debug_assert!(op.has_arg(), "{op} takes no operand");
        self.instructions.push(op as u8);
        self.instructions.extend_from_slice(&arg.to_le_bytes());
    }

    /// `LOAD_CONST` of a new constant.
    pub fn load_const(&mut self, value: impl Into<Value>) {
        let idx = self.add_const(value);
        self.emit_arg(Opcode::LoadConst, idx);
    }

    /// Emits a name-table instruction (`LOAD_NAME`, `STORE_GLOBAL`, ...).
    pub fn emit_name(&mut self, op: Opcode, name: impl Into<Identifier>) {
        debug_assert_eq!(op.operand_class(), OperandClass::Name);
        let idx = self.add_name(name);
        self.emit_arg(op, idx);
    }

    /// Emits a local-slot instruction (`LOAD_FAST`, `STORE_FAST`, `DELETE_FAST`).
    pub fn emit_local(&mut self, op: Opcode, name: impl Into<Identifier>) {
        debug_assert_eq!(op.operand_class(), OperandClass::Local);
        let idx = self.add_local(name);
        self.emit_arg(op, idx);
    }

    /// Emits a forward jump instruction, returning a label to patch later.
    ///
    /// The operand is initially 0 and must be patched with `patch_jump()` once the target
    /// location is known. Works for both relative and absolute jump opcodes, including
    /// `FOR_ITER` and the `SETUP_*` block instructions.
    #[must_use]
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        debug_assert!(matches!(
            op.operand_class(),
            OperandClass::JumpRelative | OperandClass::JumpAbsolute
        ));
        let label = JumpLabel {
            offset: self.instructions.len(),
            op,
        };
        self.emit_arg(op, 0);
        label
    }

    /// Patches a forward jump to point to the current offset.
    ///
    /// # Panics
    ///
    /// Panics if the resulting operand exceeds the u16 range.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.instructions.len();
        let arg = jump_operand(label.op, label.offset, target);
        self.instructions[label.offset + 1..label.offset + 3].copy_from_slice(&arg.to_le_bytes());
    }

    /// Emits a jump to a known target offset, typically backward to a loop head.
    ///
    /// # Panics
    ///
    /// Panics for a relative jump whose target lies behind it (relative operands are
    /// unsigned) or if the operand exceeds the u16 range.
    pub fn emit_jump_to(&mut self, op: Opcode, target: usize) {
        let arg = jump_operand(op, self.instructions.len(), target);
        self.emit_arg(op, arg);
    }

    /// Returns the current offset. Use this to record loop heads for backward jumps.
    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.instructions.len()
    }

    #[must_use]
    pub fn build(self) -> Code {
        Code::new(
            self.name,
            self.instructions,
            self.constants,
            self.names,
            self.local_slots,
            self.arg_count,
        )
    }
}

fn intern(table: &mut Vec<Identifier>, name: Identifier, what: &str) -> u16 {
    match table.iter().position(|existing| *existing == name) {
        Some(idx) => u16::try_from(idx).expect("table index exceeds u16 range"),
        None => push_slot(table, name, what),
    }
}

fn push_slot(table: &mut Vec<Identifier>, name: Identifier, what: &str) -> u16 {
    let idx = u16::try_from(table.len()).unwrap_or_else(|_| panic!("{what} table exceeds u16 range (65535)"));
    table.push(name);
    idx
}

/// Operand for a jump emitted at `at` that lands on `target`.
fn jump_operand(op: Opcode, at: usize, target: usize) -> u16 {
    let raw = match op.operand_class() {
        // relative to the instruction after the jump (opcode + u16 = 3 bytes)
        OperandClass::JumpRelative => target
            .checked_sub(at + 3)
            .unwrap_or_else(|| panic!("{op} cannot jump backward from {at} to {target}")),
        OperandClass::JumpAbsolute => target,
        _ => panic!("{op} is not a jump instruction"),
    };
    u16::try_from(raw).expect("jump operand exceeds u16 range; code object too large")
}

/// Label for a forward jump that needs patching.
///
/// Pass this to `patch_jump()` once the target location is known.
#[derive(Debug, Clone, Copy)]
pub struct JumpLabel {
    offset: usize,
    op: Opcode,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::bytecode::code::Operand;

    #[test]
    fn test_emit_basic() {
        let mut builder = CodeBuilder::new("t");
        builder.emit(Opcode::PopTop);
        builder.emit(Opcode::ReturnValue);

        let code = builder.build();
        assert_eq!(code.instructions(), &[1, 83]);
    }

    #[test]
    fn test_operand_is_little_endian() {
        let mut builder = CodeBuilder::new("t");
        builder.emit_arg(Opcode::BuildList, 0x1234);

        let code = builder.build();
        assert_eq!(code.instructions(), &[Opcode::BuildList as u8, 0x34, 0x12]);
    }

    #[test]
    fn test_forward_relative_jump() {
        let mut builder = CodeBuilder::new("t");
        let jump = builder.emit_jump(Opcode::JumpForward);
        builder.emit(Opcode::Nop);
        builder.emit(Opcode::Nop);
        builder.patch_jump(jump);
        builder.emit(Opcode::ReturnValue);

        let code = builder.build();
        // target 5, next instruction after the jump is 3
        assert_eq!(code.instructions(), &[Opcode::JumpForward as u8, 2, 0, 9, 9, 83]);
        assert_eq!(code.decode_at(0).unwrap().operand, Operand::Jump(5));
    }

    #[test]
    fn test_forward_absolute_jump() {
        let mut builder = CodeBuilder::new("t");
        builder.emit(Opcode::Nop);
        let jump = builder.emit_jump(Opcode::PopJumpIfFalse);
        builder.emit(Opcode::Nop);
        builder.patch_jump(jump);

        let code = builder.build();
        assert_eq!(code.decode_at(1).unwrap().operand, Operand::Jump(5));
    }

    #[test]
    fn test_backward_jump() {
        let mut builder = CodeBuilder::new("t");
        let head = builder.current_offset();
        builder.emit(Opcode::Nop);
        builder.emit_jump_to(Opcode::JumpAbsolute, head);

        let code = builder.build();
        assert_eq!(code.instructions(), &[9, Opcode::JumpAbsolute as u8, 0, 0]);
    }

    #[test]
    #[should_panic(expected = "cannot jump backward")]
    fn test_backward_relative_jump_panics() {
        let mut builder = CodeBuilder::new("t");
        builder.emit(Opcode::Nop);
        builder.emit_jump_to(Opcode::JumpForward, 0);
    }

    #[test]
    fn test_names_and_locals_are_interned() {
        let mut builder = CodeBuilder::new("t");
        builder.emit_name(Opcode::LoadName, "x");
        builder.emit_name(Opcode::StoreName, "y");
        builder.emit_name(Opcode::LoadName, "x");
        builder.emit_local(Opcode::LoadFast, "a");
        builder.emit_local(Opcode::StoreFast, "a");

        let code = builder.build();
        assert_eq!(code.names().len(), 2);
        assert_eq!(code.local_slots().len(), 1);
        assert_eq!(code.decode_at(6).unwrap().operand, Operand::Name("x".into()));
    }

    #[test]
    fn test_params_take_the_first_slots() {
        let mut builder = CodeBuilder::new("f");
        assert_eq!(builder.add_param("a"), 0);
        assert_eq!(builder.add_param("b"), 1);
        assert_eq!(builder.add_local("tmp"), 2);
        assert_eq!(builder.add_local("a"), 0);

        let code = builder.build();
        assert_eq!(code.arg_count(), 2);
    }

    #[test]
    #[should_panic(expected = "parameters must be declared before other locals")]
    fn test_param_after_local_panics() {
        let mut builder = CodeBuilder::new("f");
        let _ = builder.add_local("tmp");
        builder.add_param("a");
    }
}
