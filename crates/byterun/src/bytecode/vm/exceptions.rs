//! Raising exceptions and leaving `except`/`finally` handlers.

use std::rc::Rc;

use super::{BlockKind, VirtualMachine, Why};
use crate::{
    bytecode::code::Operand,
    exception::{ExcType, ExceptionState, RunResult, SimpleException},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VirtualMachine<'_, T, P, Tr> {
    /// `RAISE_VARARGS n`
    ///
    /// - 0: re-raise the exception currently being handled, unchanged.
    /// - 1: raise the class or instance on top of the stack.
    /// - 2: as 1, with the top of the stack as its cause (`raise X from Y`).
    pub(super) fn raise_varargs(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        match operand.into_int()? {
            0 => {
                let state = self
                    .handled_exception()
                    .or_else(|| self.pending_exception.clone())
                    .ok_or_else(|| SimpleException::new_msg(ExcType::RuntimeError, "No active exception to reraise"))?;
                Ok(Some(self.set_pending(state)))
            }
            1 => {
                let exc = exception_instance(self.pop()?)?;
                Ok(Some(self.raise_state(ExceptionState { exc, trace: None })))
            }
            2 => {
                let [exc, cause] = self.pop_array()?;
                let mut exc = exception_instance(exc)?;
                let cause = match cause {
                    Value::None => None,
                    other => Some(exception_instance(other).map_err(|_| {
                        ExcType::type_error("exception causes must derive from BaseException")
                    })?),
                };
                Rc::make_mut(&mut exc).set_cause(cause);
                Ok(Some(self.raise_state(ExceptionState { exc, trace: None })))
            }
            n => Err(ExcType::system_error(format!("bad RAISE_VARARGS argument {n}"))),
        }
    }

    /// `END_FINALLY`: ends a `finally` body or an unmatched `except` chain.
    ///
    /// The top of the stack says how the handler was entered: `None` for a normal fall-through,
    /// a signal marker for an interrupted `return`/`break`/`continue` (resumed here), or an
    /// exception triple that continues propagating.
    pub(super) fn end_finally(&mut self, _: Operand) -> RunResult<Option<Why>> {
        match self.pop()? {
            Value::None => Ok(None),
            Value::Signal(Why::Return) => {
                self.pending_return_value = Some(self.pop()?);
                Ok(Some(Why::Return))
            }
            Value::Signal(Why::Continue(_)) => {
                let target = self.pop()?;
                let target = target
                    .as_int()
                    .and_then(|t| usize::try_from(t).ok())
                    .ok_or_else(|| ExcType::system_error("END_FINALLY found a bad continue target"))?;
                Ok(Some(Why::Continue(target)))
            }
            Value::Signal(Why::Break) => Ok(Some(Why::Break)),
            kind @ Value::ExcType(_) => {
                let value = self.pop()?;
                let trace = self.pop()?;
                let state = ExceptionState::from_values(&kind, value, trace)?;
                Ok(Some(self.set_pending(state)))
            }
            other => Err(ExcType::system_error(format!(
                "END_FINALLY found a '{}' on the stack",
                other.type_name()
            ))),
        }
    }

    /// `POP_EXCEPT`: leaves an `except` handler whose body completed, restoring the
    /// exception state saved when the handler was entered.
    pub(super) fn pop_except(&mut self, _: Operand) -> RunResult<Option<Why>> {
        let frame = self.frame_mut()?;
        let block = frame.pop_block()?;
        if block.kind != BlockKind::ExceptHandler {
            return Err(ExcType::system_error(format!(
                "POP_EXCEPT popped a {:?} block",
                block.kind
            )));
        }
        let restored = frame.unwind_block(&block)?;
        let depth = frame.block_stack.len();
        self.tracer.on_block_pop(block.kind, depth);
        if let Some(restored) = restored {
            self.restore_exception(restored, false);
        }
        Ok(None)
    }
}

/// Coerces a raised value to an exception instance: a class is instantiated without a message.
///
/// An existing instance keeps its identity, so re-raising the exception being handled does not
/// chain it to itself.
fn exception_instance(value: Value) -> RunResult<Rc<SimpleException>> {
    match value {
        Value::ExcType(kind) => Ok(Rc::new(SimpleException::new_none(kind))),
        Value::Exception(exc) => Ok(exc),
        _ => Err(ExcType::type_error("exceptions must derive from BaseException")),
    }
}
