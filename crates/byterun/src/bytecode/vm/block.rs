/// What a block on a frame's block stack guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// `SETUP_LOOP`: target is the instruction after the loop.
    Loop,
    /// `SETUP_EXCEPT`: target is the first `except` clause.
    SetupExcept,
    /// `SETUP_FINALLY`: target is the `finally` body.
    Finally,
    /// Pushed when control enters an `except` or `finally` handler because of an exception;
    /// the exception triple saved below it is restored when the block goes away.
    ExceptHandler,
}

/// A control-flow marker on a frame's block stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub handler_target: Option<usize>,
    /// Data stack length when the block was pushed; unwinding trims back to it.
    pub stack_depth_at_entry: usize,
}

/// Reason the normal instruction sequence was interrupted.
///
/// Handlers return `Option<Why>`; `None` means execution continues with the next
/// instruction. The payload of `Return` lives in the VM's pending return value and the
/// exception of `Exception` in its pending exception slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Why {
    Return,
    Break,
    /// Carries the loop head to resume at.
    Continue(usize),
    Exception,
}
