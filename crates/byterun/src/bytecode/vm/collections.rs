//! Container building, subscripting, iteration and expression printing.

use std::borrow::Cow;

use super::{VirtualMachine, Why};
use crate::{
    bytecode::code::Operand,
    exception::{ExcType, RunResult},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VirtualMachine<'_, T, P, Tr> {
    pub(super) fn build_tuple(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let items = self.pop_n(operand.into_int()?)?;
        self.push(Value::Tuple(items.into()))?;
        Ok(None)
    }

    pub(super) fn build_list(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let items = self.pop_n(operand.into_int()?)?;
        self.push(Value::from(items))?;
        Ok(None)
    }

    /// `LIST_APPEND i`: pops a value and appends it to the list `i` slots down,
    /// counting from the slot the value occupied.
    pub(super) fn list_append(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let depth = operand.into_int()?;
        let value = self.pop()?;
        let target = self.frame()?.peek_at(depth.saturating_sub(1))?;
        let Value::List(items) = target else {
            return Err(ExcType::system_error(format!(
                "LIST_APPEND target is a '{}', not a list",
                target.type_name()
            )));
        };
        items.borrow_mut().push(value);
        Ok(None)
    }

    /// Pops a sequence of exactly `n` items and pushes them so the first ends on top.
    pub(super) fn unpack_sequence(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let expected = operand.into_int()?;
        let items = self.pop()?.iter_items(&self.tracker)?;
        match items.len() {
            n if n < expected => {
                return Err(ExcType::value_error(format!(
                    "not enough values to unpack (expected {expected}, got {n})"
                )));
            }
            n if n > expected => {
                return Err(ExcType::value_error(format!(
                    "too many values to unpack (expected {expected})"
                )));
            }
            _ => {}
        }
        self.frame_mut()?.data_stack.extend(items.into_iter().rev());
        Ok(None)
    }

    pub(super) fn binary_subscr(&mut self, _: Operand) -> RunResult<Option<Why>> {
        let [container, index] = self.pop_array()?;
        let item = container.py_getitem(&index)?;
        self.push(item)?;
        Ok(None)
    }

    /// `container[index] = value`, with `index` on top and `value` deepest.
    pub(super) fn store_subscr(&mut self, _: Operand) -> RunResult<Option<Why>> {
        let [value, container, index] = self.pop_array()?;
        container.py_setitem(&index, value)?;
        Ok(None)
    }

    pub(super) fn get_iter(&mut self, _: Operand) -> RunResult<Option<Why>> {
        let iterable = self.pop()?;
        self.push(iterable.py_iter()?)?;
        Ok(None)
    }

    /// Pushes the iterator's next item, or pops the exhausted iterator and jumps past the
    /// loop body.
    pub(super) fn for_iter(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let target = operand.into_jump()?;
        let frame = self.frame_mut()?;
        let Value::Iterator(iter) = frame.top()? else {
            return Err(ExcType::type_error(format!(
                "'{}' object is not an iterator",
                frame.top()?.type_name()
            )));
        };
        let next = iter.borrow_mut().next_value();
        match next {
            Some(item) => frame.push(item),
            None => {
                frame.pop()?;
                frame.jump(target);
            }
        }
        Ok(None)
    }

    /// Writes the repr of the popped value and a newline; `None` prints nothing.
    pub(super) fn print_expr(&mut self, _: Operand) -> RunResult<Option<Why>> {
        let value = self.pop()?;
        if !matches!(value, Value::None) {
            self.print.stdout_write(Cow::Owned(value.py_repr()))?;
            self.print.stdout_push('\n')?;
        }
        Ok(None)
    }
}
