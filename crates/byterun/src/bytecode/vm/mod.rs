//! Bytecode virtual machine.
//!
//! Every call runs in its own [`Frame`] with a private data stack and block stack. The
//! main loop decodes one instruction, dispatches it, and when a handler reports a
//! [`Why`] signal, drains the frame's block stack against it: loops absorb `break` and
//! `continue`, `except`/`finally` blocks absorb exceptions, `finally` blocks intercept
//! everything else. A signal that survives draining ends the frame.

mod binary;
mod block;
mod call;
mod collections;
mod compare;
mod exceptions;
mod frame;

use std::rc::Rc;

pub use block::{Block, BlockKind, Why};
use frame::Frame;

use crate::{
    builtins::ArgValues,
    bytecode::{
        code::{Code, Instruction, Operand},
        op::{BinaryOp, Opcode, UnaryOp},
    },
    exception::{ExcType, Exception, ExceptionState, RunResult, SimpleException},
    io::PrintWriter,
    namespace::Environment,
    resource::ResourceTracker,
    tracer::{NoopTracer, VmTracer},
    value::Value,
};

/// Instruction handler: receives the resolved operand, returns the signal it raises.
type Handler<'p, T, P, Tr> = fn(&mut VirtualMachine<'p, T, P, Tr>, Operand) -> RunResult<Option<Why>>;

/// Executes code objects.
///
/// Generic over the resource policy, the print sink and the tracer so the common
/// configuration (`NoLimitTracker`, `NoopTracer`) pays nothing for them.
#[derive(Debug)]
pub struct VirtualMachine<'p, T: ResourceTracker, P: PrintWriter, Tr: VmTracer = NoopTracer> {
    /// Call stack, root first. Only the last frame executes.
    frames: Vec<Frame>,
    /// The exception being propagated, or the last one restored from a handler block.
    pending_exception: Option<ExceptionState>,
    /// Set by `RETURN_VALUE`, consumed when the frame ends or a `finally` intercepts.
    pending_return_value: Option<Value>,
    tracker: T,
    print: &'p mut P,
    tracer: Tr,
}

impl<'p, T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VirtualMachine<'p, T, P, Tr> {
    pub fn new(tracker: T, print: &'p mut P, tracer: Tr) -> Self {
        Self {
            frames: Vec::new(),
            pending_exception: None,
            pending_return_value: None,
            tracker,
            print,
            tracer,
        }
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    #[must_use]
    pub fn into_tracer(self) -> Tr {
        self.tracer
    }

    #[must_use]
    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Runs `code` as a root frame against `env`, binding `args` to its parameters.
    ///
    /// Returns the value the root frame returned, or the exception that escaped it.
    pub fn run_code(&mut self, code: Rc<Code>, env: Environment, args: Vec<Value>) -> Result<Value, Exception> {
        self.pending_exception = None;
        self.pending_return_value = None;
        self.frames.clear();
        let frame = self.make_frame(code, ArgValues::from_vec(args), &[], Some(env))?;
        self.push_frame(frame)?;
        self.run_loop().map_err(Exception::from)
    }

    /// Pushes `frame` on the call stack; the main loop executes it from the next step on.
    fn push_frame(&mut self, frame: Frame) -> RunResult<()> {
        self.tracker.check_frame_push(self.frames.len())?;
        let name = Rc::clone(&frame.code.name);
        self.frames.push(frame);
        self.tracer.on_call(&name, self.frames.len());
        Ok(())
    }

    /// Pops the frame `why` escaped from and turns the signal into that frame's outcome.
    ///
    /// `why` is either `Return` or `Exception`.
    fn pop_frame(&mut self, why: Why) -> Result<Value, ExceptionState> {
        let frame = self.frames.pop();
        self.tracer.on_return(self.frames.len());
        if why == Why::Return {
            // a handled exception restored inside this frame must not leak into the caller
            self.pending_exception = None;
            return Ok(self.pending_return_value.take().unwrap_or(Value::None));
        }
        let mut state = self
            .pending_exception
            .take()
            .unwrap_or_else(|| ExceptionState::new(ExcType::system_error("frame ended without a pending exception")));
        if let Some(frame) = frame {
            state.push_frame(Rc::clone(&frame.code.name), frame.last_offset);
        }
        Err(state)
    }

    /// Fetch, dispatch and drain until a signal escapes the root frame.
    ///
    /// `CALL_FUNCTION` pushes the callee and comes back here, so the call chain lives in
    /// `frames` and never on the host stack. When a callee ends, its return value lands on
    /// the caller's data stack, or its exception is drained through the caller's blocks.
    fn run_loop(&mut self) -> Result<Value, ExceptionState> {
        loop {
            let mut why = match self.step() {
                Ok(None) => continue,
                Ok(Some(why)) => why,
                Err(err) => self.raise(err),
            };
            // draining pops at least one block or frame per failed unwind, so this terminates
            loop {
                match self.drain(why) {
                    Ok(None) => break,
                    Ok(Some(Why::Break)) => {
                        why = self.raise(ExcType::system_error("'break' outside loop"));
                    }
                    Ok(Some(Why::Continue(_))) => {
                        why = self.raise(ExcType::system_error("'continue' not properly in loop"));
                    }
                    Ok(Some(escaped)) => {
                        let outcome = self.pop_frame(escaped);
                        if self.frames.is_empty() {
                            return outcome;
                        }
                        match outcome {
                            Ok(value) => match self.push(value) {
                                Ok(()) => break,
                                Err(err) => why = self.raise(err),
                            },
                            Err(state) => why = self.set_pending(state),
                        }
                    }
                    Err(err) => why = self.raise(err),
                }
            }
        }
    }

    fn step(&mut self) -> RunResult<Option<Why>> {
        self.tracker.on_instruction()?;
        let ins = self.decode_next()?;
        let stack_depth = self.frame()?.data_stack.len();
        self.tracer
            .on_instruction(ins.offset, ins.opcode, stack_depth, self.frames.len());
        self.dispatch(ins.opcode, ins.operand)
    }

    /// Decodes the instruction at the current frame's instruction pointer and advances it.
    fn decode_next(&mut self) -> RunResult<Instruction> {
        let frame = self.frame_mut()?;
        let ins = frame.code.decode_at(frame.ip)?;
        frame.last_offset = ins.offset;
        frame.ip = ins.next;
        Ok(ins)
    }

    /// Runs the handler bound to `opcode`.
    ///
    /// Opcodes without an entry in the handler table fall back to the generic unary or
    /// binary operator handler, keyed by the mnemonic with its `UNARY_`, `BINARY_` or
    /// `INPLACE_` prefix stripped.
    fn dispatch(&mut self, opcode: Opcode, operand: Operand) -> RunResult<Option<Why>> {
        if let Some(handler) = Self::handler(opcode) {
            return handler(self, operand);
        }
        let name = opcode.name();
        if let Some(op) = name.strip_prefix("UNARY_").and_then(|s| s.parse::<UnaryOp>().ok()) {
            return self.unary_operator(op).map(|()| None);
        }
        if let Some(op) = name.strip_prefix("BINARY_").and_then(|s| s.parse::<BinaryOp>().ok()) {
            return self.binary_operator(op, false).map(|()| None);
        }
        if let Some(op) = name.strip_prefix("INPLACE_").and_then(|s| s.parse::<BinaryOp>().ok()) {
            return self.binary_operator(op, true).map(|()| None);
        }
        Err(ExcType::unsupported_instruction(name))
    }

    fn handler(opcode: Opcode) -> Option<Handler<'p, T, P, Tr>> {
        let handler: Handler<'p, T, P, Tr> = match opcode {
            Opcode::PopTop => Self::pop_top,
            Opcode::RotTwo => Self::rot_two,
            Opcode::RotThree => Self::rot_three,
            Opcode::DupTop => Self::dup_top,
            Opcode::DupTopTwo => Self::dup_top_two,
            Opcode::Nop => Self::nop,
            Opcode::BinarySubscr => Self::binary_subscr,
            Opcode::StoreSubscr => Self::store_subscr,
            Opcode::GetIter => Self::get_iter,
            Opcode::ForIter => Self::for_iter,
            Opcode::PrintExpr => Self::print_expr,
            Opcode::BreakLoop => Self::break_loop,
            Opcode::ContinueLoop => Self::continue_loop,
            Opcode::ReturnValue => Self::return_value,
            Opcode::PopBlock => Self::pop_block,
            Opcode::EndFinally => Self::end_finally,
            Opcode::PopExcept => Self::pop_except,
            Opcode::SetupLoop => Self::setup_loop,
            Opcode::SetupExcept => Self::setup_except,
            Opcode::SetupFinally => Self::setup_finally,
            Opcode::LoadConst => Self::load_const,
            Opcode::LoadName => Self::load_name,
            Opcode::StoreName => Self::store_name,
            Opcode::DeleteName => Self::delete_name,
            Opcode::LoadGlobal => Self::load_global,
            Opcode::StoreGlobal => Self::store_global,
            Opcode::DeleteGlobal => Self::delete_global,
            Opcode::LoadFast => Self::load_fast,
            Opcode::StoreFast => Self::store_fast,
            Opcode::DeleteFast => Self::delete_fast,
            Opcode::BuildTuple => Self::build_tuple,
            Opcode::BuildList => Self::build_list,
            Opcode::ListAppend => Self::list_append,
            Opcode::UnpackSequence => Self::unpack_sequence,
            Opcode::CompareOp => Self::compare_op,
            Opcode::JumpForward | Opcode::JumpAbsolute => Self::jump,
            Opcode::PopJumpIfFalse => Self::pop_jump_if_false,
            Opcode::PopJumpIfTrue => Self::pop_jump_if_true,
            Opcode::JumpIfFalseOrPop => Self::jump_if_false_or_pop,
            Opcode::JumpIfTrueOrPop => Self::jump_if_true_or_pop,
            Opcode::RaiseVarargs => Self::raise_varargs,
            Opcode::MakeFunction => Self::make_function,
            Opcode::CallFunction => Self::call_function,
            _ => return None,
        };
        Some(handler)
    }

    // === block unwinding ===

    /// Drains the current frame's block stack against `why`.
    ///
    /// Returns `None` once a block absorbed the signal and execution resumes in this frame,
    /// or the signal itself when no block is left to absorb it.
    fn drain(&mut self, why: Why) -> RunResult<Option<Why>> {
        loop {
            let frame = self.frame_mut()?;
            let Some(&block) = frame.block_stack.last() else {
                return Ok(Some(why));
            };
            if let (BlockKind::Loop, Why::Continue(target)) = (block.kind, why) {
                frame.jump(target);
                return Ok(None);
            }
            frame.block_stack.pop();
            let depth = frame.block_stack.len();
            let restored = frame.unwind_block(&block);
            self.tracer.on_block_pop(block.kind, depth);
            if let Some(restored) = restored? {
                self.restore_exception(restored, why == Why::Exception);
            }

            match (block.kind, why) {
                (BlockKind::Loop, Why::Break) => {
                    let target = handler_target(&block)?;
                    self.frame_mut()?.jump(target);
                    return Ok(None);
                }
                (BlockKind::SetupExcept | BlockKind::Finally, Why::Exception) if self.pending_is_catchable() => {
                    self.enter_handler(&block)?;
                    return Ok(None);
                }
                (BlockKind::Finally, Why::Return | Why::Break | Why::Continue(_)) => {
                    let target = handler_target(&block)?;
                    match why {
                        Why::Return => {
                            let value = self.pending_return_value.take().unwrap_or(Value::None);
                            self.push(value)?;
                        }
                        Why::Continue(loop_head) => {
                            let loop_head = i64::try_from(loop_head)
                                .map_err(|_| ExcType::system_error("continue target does not fit an int"))?;
                            self.push(Value::Int(loop_head))?;
                        }
                        _ => {}
                    }
                    self.push(Value::Signal(why))?;
                    self.frame_mut()?.jump(target);
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    /// Transfers control to an `except` or `finally` handler for the pending exception.
    ///
    /// Pushes an `ExceptHandler` block, then the exception triple twice: the lower copy is
    /// restored when the handler block goes away, the upper copy is what the handler code
    /// inspects and pops.
    fn enter_handler(&mut self, block: &Block) -> RunResult<()> {
        let target = handler_target(block)?;
        let state = self
            .pending_exception
            .take()
            .ok_or_else(|| ExcType::system_error("exception signal without a pending exception"))?;
        let frame = self.frame_mut()?;
        frame.push_block(BlockKind::ExceptHandler, None);
        let depth = frame.block_stack.len();
        for _ in 0..2 {
            frame.data_stack.extend(state.to_values());
        }
        frame.jump(target);
        self.tracer.on_block_push(BlockKind::ExceptHandler, depth);
        Ok(())
    }

    /// Puts an exception triple saved by an `ExceptHandler` block back into effect.
    ///
    /// While another exception is propagating, that newer exception stays pending and the
    /// restored one becomes its context (unless it already has one). Otherwise the restored
    /// exception becomes the pending one again, available to a bare `raise`.
    fn restore_exception(&mut self, restored: ExceptionState, exception_draining: bool) {
        if !exception_draining {
            self.pending_exception = Some(restored);
            return;
        }
        if let Some(pending) = &mut self.pending_exception
            && pending.exc.context().is_none()
            && !Rc::ptr_eq(&pending.exc, &restored.exc)
        {
            Rc::make_mut(&mut pending.exc).set_context(Some(restored.exc));
        }
    }

    fn pending_is_catchable(&self) -> bool {
        self.pending_exception
            .as_ref()
            .is_some_and(|state| !state.kind().is_fatal())
    }

    /// Makes `err` the pending exception and returns the signal that propagates it.
    ///
    /// The exception currently being handled, if any, becomes its context.
    fn raise(&mut self, err: SimpleException) -> Why {
        self.raise_state(ExceptionState::new(err))
    }

    fn raise_state(&mut self, mut state: ExceptionState) -> Why {
        if let Some(handled) = self.handled_exception()
            && !Rc::ptr_eq(&handled.exc, &state.exc)
        {
            Rc::make_mut(&mut state.exc).set_context(Some(handled.exc));
        }
        self.set_pending(state)
    }

    /// Installs an already-built exception state, e.g. one returned by a callee.
    fn set_pending(&mut self, state: ExceptionState) -> Why {
        self.tracer.on_exception(state.kind(), self.frames.len());
        self.pending_exception = Some(state);
        Why::Exception
    }

    /// The exception whose handler is innermost, following the caller chain outward.
    fn handled_exception(&self) -> Option<ExceptionState> {
        let mut index = self.frames.len().checked_sub(1);
        while let Some(i) = index {
            let frame = &self.frames[i];
            if let Some(block) = frame
                .block_stack
                .iter()
                .rev()
                .find(|block| block.kind == BlockKind::ExceptHandler)
            {
                let start = block.stack_depth_at_entry;
                let [trace, value, kind] = frame.data_stack.get(start..start + 3)? else {
                    return None;
                };
                return ExceptionState::from_values(kind, value.clone(), trace.clone()).ok();
            }
            index = frame.caller;
        }
        None
    }

    // === frame access and stack wrappers ===

    fn frame(&self) -> RunResult<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| ExcType::system_error("no frame is executing"))
    }

    fn frame_mut(&mut self) -> RunResult<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| ExcType::system_error("no frame is executing"))
    }

    fn push(&mut self, value: Value) -> RunResult<()> {
        self.frame_mut()?.push(value);
        Ok(())
    }

    fn pop(&mut self) -> RunResult<Value> {
        self.frame_mut()?.pop()
    }

    fn pop_n(&mut self, n: usize) -> RunResult<Vec<Value>> {
        self.frame_mut()?.pop_n(n)
    }

    fn top(&self) -> RunResult<&Value> {
        self.frame()?.top()
    }

    // === stack manipulation ===

    fn pop_top(&mut self, _: Operand) -> RunResult<Option<Why>> {
        self.pop()?;
        Ok(None)
    }

    fn rot_two(&mut self, _: Operand) -> RunResult<Option<Why>> {
        let [a, b] = self.pop_array()?;
        self.push(b)?;
        self.push(a)?;
        Ok(None)
    }

    /// `a b c` (c on top) becomes `c a b`.
    fn rot_three(&mut self, _: Operand) -> RunResult<Option<Why>> {
        let [a, b, c] = self.pop_array()?;
        self.push(c)?;
        self.push(a)?;
        self.push(b)?;
        Ok(None)
    }

    fn dup_top(&mut self, _: Operand) -> RunResult<Option<Why>> {
        let top = self.top()?.clone();
        self.push(top)?;
        Ok(None)
    }

    fn dup_top_two(&mut self, _: Operand) -> RunResult<Option<Why>> {
        let frame = self.frame_mut()?;
        let second = frame.peek_at(1)?.clone();
        let top = frame.peek_at(0)?.clone();
        frame.push(second);
        frame.push(top);
        Ok(None)
    }

    fn nop(&mut self, _: Operand) -> RunResult<Option<Why>> {
        Ok(None)
    }

    /// Pops `N` values, deepest first.
    fn pop_array<const N: usize>(&mut self) -> RunResult<[Value; N]> {
        self.pop_n(N)?
            .try_into()
            .map_err(|_| ExcType::stack_underflow())
    }

    // === names ===

    fn load_const(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        self.push(operand.into_const()?)?;
        Ok(None)
    }

    /// Resolution order: locals, globals, builtins.
    fn load_name(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let name = operand.into_name()?;
        let frame = self.frame()?;
        let value = frame
            .locals
            .get(&name)
            .or_else(|| frame.globals.get(&name))
            .or_else(|| frame.builtins.get(&name))
            .ok_or_else(|| ExcType::name_error(&name))?;
        self.push(value)?;
        Ok(None)
    }

    fn store_name(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let name = operand.into_name()?;
        let value = self.pop()?;
        self.frame()?.locals.set(name, value);
        Ok(None)
    }

    fn delete_name(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let name = operand.into_name()?;
        self.frame()?
            .locals
            .remove(&name)
            .ok_or_else(|| ExcType::name_error(&name))?;
        Ok(None)
    }

    fn load_global(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let name = operand.into_name()?;
        let frame = self.frame()?;
        let value = frame
            .globals
            .get(&name)
            .or_else(|| frame.builtins.get(&name))
            .ok_or_else(|| ExcType::name_error(&name))?;
        self.push(value)?;
        Ok(None)
    }

    fn store_global(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let name = operand.into_name()?;
        let value = self.pop()?;
        self.frame()?.globals.set(name, value);
        Ok(None)
    }

    fn delete_global(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let name = operand.into_name()?;
        self.frame()?
            .globals
            .remove(&name)
            .ok_or_else(|| ExcType::name_error(&name))?;
        Ok(None)
    }

    fn load_fast(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let name = operand.into_name()?;
        let value = self
            .frame()?
            .locals
            .get(&name)
            .ok_or_else(|| ExcType::unbound_local(&name))?;
        self.push(value)?;
        Ok(None)
    }

    fn store_fast(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        self.store_name(operand)
    }

    fn delete_fast(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let name = operand.into_name()?;
        self.frame()?
            .locals
            .remove(&name)
            .ok_or_else(|| ExcType::unbound_local(&name))?;
        Ok(None)
    }

    // === jumps ===

    fn jump(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let target = operand.into_jump()?;
        self.frame_mut()?.jump(target);
        Ok(None)
    }

    fn pop_jump_if_false(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let target = operand.into_jump()?;
        if !self.pop()?.truthy() {
            self.frame_mut()?.jump(target);
        }
        Ok(None)
    }

    fn pop_jump_if_true(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let target = operand.into_jump()?;
        if self.pop()?.truthy() {
            self.frame_mut()?.jump(target);
        }
        Ok(None)
    }

    /// Jumps keeping the condition when it is false, otherwise pops it.
    fn jump_if_false_or_pop(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let target = operand.into_jump()?;
        let frame = self.frame_mut()?;
        if frame.top()?.truthy() {
            frame.pop()?;
        } else {
            frame.jump(target);
        }
        Ok(None)
    }

    fn jump_if_true_or_pop(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let target = operand.into_jump()?;
        let frame = self.frame_mut()?;
        if frame.top()?.truthy() {
            frame.jump(target);
        } else {
            frame.pop()?;
        }
        Ok(None)
    }

    // === blocks ===

    fn setup_loop(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        self.push_block(BlockKind::Loop, operand)
    }

    fn setup_except(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        self.push_block(BlockKind::SetupExcept, operand)
    }

    fn setup_finally(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        self.push_block(BlockKind::Finally, operand)
    }

    fn push_block(&mut self, kind: BlockKind, operand: Operand) -> RunResult<Option<Why>> {
        let target = operand.into_jump()?;
        let frame = self.frame_mut()?;
        frame.push_block(kind, Some(target));
        let depth = frame.block_stack.len();
        self.tracer.on_block_push(kind, depth);
        Ok(None)
    }

    /// Removes the top block when its body completes normally; the data stack is untouched.
    fn pop_block(&mut self, _: Operand) -> RunResult<Option<Why>> {
        let frame = self.frame_mut()?;
        let block = frame.pop_block()?;
        let depth = frame.block_stack.len();
        self.tracer.on_block_pop(block.kind, depth);
        Ok(None)
    }

    fn break_loop(&mut self, _: Operand) -> RunResult<Option<Why>> {
        Ok(Some(Why::Break))
    }

    fn continue_loop(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        Ok(Some(Why::Continue(operand.into_jump()?)))
    }

    fn return_value(&mut self, _: Operand) -> RunResult<Option<Why>> {
        self.pending_return_value = Some(self.pop()?);
        Ok(Some(Why::Return))
    }
}

fn handler_target(block: &Block) -> RunResult<usize> {
    block
        .handler_target
        .ok_or_else(|| ExcType::system_error(format!("{:?} block has no handler target", block.kind)))
}
