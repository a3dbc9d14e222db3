use std::rc::Rc;

use smallvec::SmallVec;

use super::block::{Block, BlockKind};
use crate::{
    builtins::BuiltinTable,
    bytecode::Code,
    exception::{ExcType, ExceptionState, RunResult},
    namespace::Namespace,
    value::Value,
};

/// One activation record: the code being run, its environments and its two stacks.
#[derive(Debug)]
pub(crate) struct Frame {
    pub code: Rc<Code>,
    pub globals: Namespace,
    pub locals: Namespace,
    pub builtins: BuiltinTable,
    pub data_stack: Vec<Value>,
    pub block_stack: SmallVec<[Block; 4]>,
    /// Offset of the next instruction to decode.
    pub ip: usize,
    /// Offset of the instruction currently executing, reported in tracebacks.
    pub last_offset: usize,
    /// Index of the calling frame in the VM call stack; `None` for the root frame.
    pub caller: Option<usize>,
}

impl Frame {
    pub fn new(
        code: Rc<Code>,
        globals: Namespace,
        locals: Namespace,
        builtins: BuiltinTable,
        caller: Option<usize>,
    ) -> Self {
        Self {
            code,
            globals,
            locals,
            builtins,
            data_stack: Vec::new(),
            block_stack: SmallVec::new(),
            ip: 0,
            last_offset: 0,
            caller,
        }
    }

    pub fn push(&mut self, value: Value) {
        self.data_stack.push(value);
    }

    pub fn pop(&mut self) -> RunResult<Value> {
        self.data_stack.pop().ok_or_else(ExcType::stack_underflow)
    }

    /// Pops `n` values, returned deepest first. `pop_n(0)` leaves the stack untouched.
    pub fn pop_n(&mut self, n: usize) -> RunResult<Vec<Value>> {
        let start = self
            .data_stack
            .len()
            .checked_sub(n)
            .ok_or_else(ExcType::stack_underflow)?;
        Ok(self.data_stack.split_off(start))
    }

    pub fn top(&self) -> RunResult<&Value> {
        self.peek_at(0)
    }

    /// The value `depth` slots below the top; `peek_at(0)` is the top.
    pub fn peek_at(&self, depth: usize) -> RunResult<&Value> {
        self.data_stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|i| self.data_stack.get(i))
            .ok_or_else(ExcType::stack_underflow)
    }

    pub fn push_block(&mut self, kind: BlockKind, handler_target: Option<usize>) {
        self.block_stack.push(Block {
            kind,
            handler_target,
            stack_depth_at_entry: self.data_stack.len(),
        });
    }

    /// Removes the top block without touching the data stack.
    pub fn pop_block(&mut self) -> RunResult<Block> {
        self.block_stack
            .pop()
            .ok_or_else(|| ExcType::system_error("pop from empty block stack"))
    }

    /// Trims the data stack back to the block's entry depth.
    ///
    /// An `ExceptHandler` block keeps three extra slots: the exception triple saved when
    /// the handler was entered. Those are popped and returned for restoration.
    pub fn unwind_block(&mut self, block: &Block) -> RunResult<Option<ExceptionState>> {
        let keep = match block.kind {
            BlockKind::ExceptHandler => block.stack_depth_at_entry + 3,
            _ => block.stack_depth_at_entry,
        };
        if self.data_stack.len() < keep {
            return Err(ExcType::stack_underflow());
        }
        self.data_stack.truncate(keep);
        if block.kind != BlockKind::ExceptHandler {
            return Ok(None);
        }
        let kind = self.pop()?;
        let value = self.pop()?;
        let trace = self.pop()?;
        ExceptionState::from_values(&kind, value, trace).map(Some)
    }

    pub fn jump(&mut self, target: usize) {
        self.ip = target;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{bytecode::CodeBuilder, exception::SimpleException};

    fn frame() -> Frame {
        let globals = Namespace::module();
        Frame::new(
            Rc::new(CodeBuilder::new("t").build()),
            globals.clone(),
            globals,
            BuiltinTable::process_default(),
            None,
        )
    }

    #[test]
    fn pop_returns_what_was_pushed() {
        let mut f = frame();
        f.push(Value::Int(1));
        f.push(Value::Int(2));
        assert_eq!(f.pop().unwrap(), Value::Int(2));
        assert_eq!(f.data_stack.len(), 1);
    }

    #[test]
    fn pop_on_empty_stack_underflows() {
        let mut f = frame();
        assert_eq!(f.pop().unwrap_err().exc_type(), ExcType::StackUnderflow);
        assert_eq!(f.top().unwrap_err().exc_type(), ExcType::StackUnderflow);
    }

    #[test]
    fn pop_n_is_deepest_first() {
        let mut f = frame();
        for i in 1..=4 {
            f.push(Value::Int(i));
        }
        assert_eq!(f.pop_n(3).unwrap(), vec![Value::Int(2), Value::Int(3), Value::Int(4)]);
        assert!(f.pop_n(0).unwrap().is_empty());
        assert_eq!(f.data_stack, vec![Value::Int(1)]);
        assert_eq!(f.pop_n(2).unwrap_err().exc_type(), ExcType::StackUnderflow);
        assert_eq!(f.data_stack.len(), 1);
    }

    #[test]
    fn unwind_trims_to_entry_depth() {
        let mut f = frame();
        f.push(Value::Int(0));
        f.push_block(BlockKind::Loop, Some(10));
        f.push(Value::Int(1));
        f.push(Value::Int(2));
        let block = f.pop_block().unwrap();
        assert_eq!(f.unwind_block(&block).unwrap().map(|s| s.kind()), None);
        assert_eq!(f.data_stack, vec![Value::Int(0)]);
    }

    #[test]
    fn unwinding_an_except_handler_restores_the_saved_triple() {
        let mut f = frame();
        f.push_block(BlockKind::ExceptHandler, None);
        let state = ExceptionState::new(SimpleException::new_msg(ExcType::KeyError, "k"));
        for value in state.to_values() {
            f.push(value);
        }
        f.push(Value::Int(99));
        let block = f.pop_block().unwrap();
        let restored = f.unwind_block(&block).unwrap().unwrap();
        assert_eq!(restored.kind(), ExcType::KeyError);
        assert!(f.data_stack.is_empty());
    }
}
