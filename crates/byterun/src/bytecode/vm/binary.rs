//! Generic unary and binary operator handlers.

use super::VirtualMachine;
use crate::{
    bytecode::op::{BinaryOp, UnaryOp},
    exception::{ExcType, RunResult},
    io::PrintWriter,
    resource::{ResourceTracker, check_result_size},
    tracer::VmTracer,
    value::{BitwiseOp, Value},
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VirtualMachine<'_, T, P, Tr> {
    /// Replaces the top of the stack with `op` applied to it.
    pub(super) fn unary_operator(&mut self, op: UnaryOp) -> RunResult<()> {
        let operand = self.pop()?;
        let result = match op {
            UnaryOp::Positive => operand.py_pos(),
            UnaryOp::Negative => operand.py_neg()?,
            UnaryOp::Not => Some(Value::Bool(!operand.truthy())),
            UnaryOp::Invert => operand.py_invert(),
        };
        let result = result.ok_or_else(|| {
            ExcType::type_error(format!(
                "bad operand type for {}: '{}'",
                op.symbol(),
                operand.type_name()
            ))
        })?;
        self.push(result)
    }

    /// Pops `rhs` then `lhs` and pushes `lhs op rhs`.
    ///
    /// The in-place forms compute the same result, except that `+=` on a list extends the
    /// list object itself so every alias sees the new items.
    pub(super) fn binary_operator(&mut self, op: BinaryOp, inplace: bool) -> RunResult<()> {
        let [lhs, rhs] = self.pop_array()?;
        if inplace
            && op == BinaryOp::Add
            && let Value::List(items) = &lhs
        {
            let extra = rhs.iter_items(&self.tracker)?;
            items.borrow_mut().extend(extra);
            return self.push(lhs);
        }
        if op == BinaryOp::Multiply
            && let Some(bytes) = lhs.repeat_bytes(&rhs)
        {
            check_result_size(&self.tracker, bytes)?;
        }
        let result = match op {
            BinaryOp::Power => lhs.py_pow(&rhs)?,
            BinaryOp::Multiply => lhs.py_mult(&rhs)?,
            BinaryOp::Modulo => lhs.py_mod(&rhs)?,
            BinaryOp::Add => lhs.py_add(&rhs)?,
            BinaryOp::Subtract => lhs.py_sub(&rhs)?,
            BinaryOp::FloorDivide => lhs.py_floordiv(&rhs)?,
            BinaryOp::TrueDivide => lhs.py_truediv(&rhs)?,
            BinaryOp::Lshift => lhs.py_lshift(&rhs)?,
            BinaryOp::Rshift => lhs.py_rshift(&rhs)?,
            BinaryOp::And => lhs.py_bitwise(&rhs, BitwiseOp::And),
            BinaryOp::Xor => lhs.py_bitwise(&rhs, BitwiseOp::Xor),
            BinaryOp::Or => lhs.py_bitwise(&rhs, BitwiseOp::Or),
        };
        let result =
            result.ok_or_else(|| ExcType::binary_type_error(op.symbol(), lhs.type_name(), rhs.type_name()))?;
        self.push(result)
    }
}
