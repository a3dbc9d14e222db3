//! Exception kinds, the internal error carrier used by instruction handlers, and the
//! public [`Exception`] surfaced when an error escapes the root frame.

use std::{
    fmt::{self, Display},
    rc::Rc,
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::value::Value;

/// Result type alias for operations that can raise inside the VM.
pub type RunResult<T> = Result<T, SimpleException>;

/// Exception classes known to the VM.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>` implementations.
/// The string representation matches the variant name exactly (e.g., `ValueError` -> "ValueError"),
/// which is also the name the class is bound to in the builtin table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter, Serialize, Deserialize,
)]
pub enum ExcType {
    /// Root of the hierarchy, matches every exception in `except` clauses.
    BaseException,
    /// Base for all ordinary (non-exit) exceptions.
    Exception,

    // --- ArithmeticError hierarchy ---
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,

    // --- LookupError hierarchy ---
    LookupError,
    IndexError,
    KeyError,

    // --- NameError hierarchy ---
    NameError,
    /// Subclass of NameError - a local slot was read before assignment.
    UnboundLocalError,

    // --- TypeError hierarchy ---
    TypeError,
    /// Subclass of TypeError - positional arguments do not match a code object's `arg_count`.
    ArgumentCountMismatch,

    // --- RuntimeError hierarchy ---
    RuntimeError,
    RecursionError,

    ValueError,
    StopIteration,
    AssertionError,
    /// A result would need more memory than the resource policy allows.
    MemoryError,

    // --- fatal kinds: raised through the normal signal but never absorbed by a handler ---
    /// Pop or peek on an empty data stack.
    StackUnderflow,
    /// The decoded instruction has no handler.
    UnsupportedInstruction,
    /// Malformed code object (bad index, truncated operand, runaway instruction pointer).
    SystemError,
    /// An operation or wall-clock limit was exceeded.
    TimeoutError,
}

impl ExcType {
    /// Checks if this exception type is a subclass of `handler_type`, i.e. whether an
    /// `except handler_type:` clause catches it.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        if self == handler_type {
            return true;
        }
        match handler_type {
            Self::BaseException => true,
            Self::Exception => self != Self::BaseException,
            Self::ArithmeticError => matches!(self, Self::ZeroDivisionError | Self::OverflowError),
            Self::LookupError => matches!(self, Self::IndexError | Self::KeyError),
            Self::NameError => self == Self::UnboundLocalError,
            Self::TypeError => self == Self::ArgumentCountMismatch,
            Self::RuntimeError => self == Self::RecursionError,
            _ => false,
        }
    }

    /// Fatal kinds end the current run: `SETUP_EXCEPT` and `SETUP_FINALLY` blocks let them pass.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::StackUnderflow | Self::UnsupportedInstruction | Self::SystemError | Self::TimeoutError
        )
    }

    #[must_use]
    pub(crate) fn stack_underflow() -> SimpleException {
        SimpleException::new_msg(Self::StackUnderflow, "pop from empty data stack")
    }

    #[must_use]
    pub(crate) fn unsupported_instruction(name: impl Display) -> SimpleException {
        SimpleException::new_msg(Self::UnsupportedInstruction, format!("no handler for instruction {name}"))
    }

    #[must_use]
    pub(crate) fn system_error(msg: impl Display) -> SimpleException {
        SimpleException::new_msg(Self::SystemError, msg)
    }

    #[must_use]
    pub(crate) fn name_error(name: &str) -> SimpleException {
        SimpleException::new_msg(Self::NameError, format!("name '{name}' is not defined"))
    }

    #[must_use]
    pub(crate) fn unbound_local(name: &str) -> SimpleException {
        SimpleException::new_msg(
            Self::UnboundLocalError,
            format!("local variable '{name}' referenced before assignment"),
        )
    }

    #[must_use]
    pub(crate) fn zero_division(msg: &'static str) -> SimpleException {
        SimpleException::new_msg(Self::ZeroDivisionError, msg)
    }

    #[must_use]
    pub(crate) fn overflow(msg: &'static str) -> SimpleException {
        SimpleException::new_msg(Self::OverflowError, msg)
    }

    #[must_use]
    pub(crate) fn type_error(msg: impl Display) -> SimpleException {
        SimpleException::new_msg(Self::TypeError, msg)
    }

    #[must_use]
    pub(crate) fn value_error(msg: impl Display) -> SimpleException {
        SimpleException::new_msg(Self::ValueError, msg)
    }

    #[must_use]
    pub(crate) fn memory_error(msg: impl Display) -> SimpleException {
        SimpleException::new_msg(Self::MemoryError, msg)
    }

    #[must_use]
    pub(crate) fn index_error(msg: impl Display) -> SimpleException {
        SimpleException::new_msg(Self::IndexError, msg)
    }

    /// `unsupported operand type(s) for +: 'int' and 'str'`
    #[must_use]
    pub(crate) fn binary_type_error(op: &str, lhs_type: &str, rhs_type: &str) -> SimpleException {
        Self::type_error(format!(
            "unsupported operand type(s) for {op}: '{lhs_type}' and '{rhs_type}'"
        ))
    }

    /// Error for a call whose positional arguments do not fit the callee's parameters.
    #[must_use]
    pub(crate) fn argument_count(func_name: &str, expected: usize, given: usize) -> SimpleException {
        let plural = if expected == 1 { "" } else { "s" };
        let verb = if given == 1 { "was" } else { "were" };
        SimpleException::new_msg(
            Self::ArgumentCountMismatch,
            format!("{func_name}() takes {expected} positional argument{plural} but {given} {verb} given"),
        )
    }
}

/// An exception instance: its class, an optional message, and the chaining links.
///
/// `context` is the exception that was being handled when this one was raised;
/// `cause` is set explicitly by `raise X from Y`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleException {
    exc_type: ExcType,
    message: Option<String>,
    context: Option<Rc<SimpleException>>,
    cause: Option<Rc<SimpleException>>,
}

impl SimpleException {
    #[must_use]
    pub fn new(exc_type: ExcType, message: Option<String>) -> Self {
        Self {
            exc_type,
            message,
            context: None,
            cause: None,
        }
    }

    #[must_use]
    pub fn new_msg(exc_type: ExcType, message: impl Display) -> Self {
        Self::new(exc_type, Some(message.to_string()))
    }

    #[must_use]
    pub fn new_none(exc_type: ExcType) -> Self {
        Self::new(exc_type, None)
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn context(&self) -> Option<&Self> {
        self.context.as_deref()
    }

    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        self.cause.as_deref()
    }

    pub(crate) fn set_context(&mut self, context: Option<Rc<Self>>) {
        self.context = context;
    }

    pub(crate) fn set_cause(&mut self, cause: Option<Rc<Self>>) {
        self.cause = cause;
    }

    /// `ValueError('bad')`, or `ValueError()` when there is no message.
    #[must_use]
    pub fn py_repr(&self) -> String {
        match &self.message {
            Some(msg) => format!("{}({})", self.exc_type, Value::from(msg.as_str()).py_repr()),
            None => format!("{}()", self.exc_type),
        }
    }
}

impl Display for SimpleException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) if !msg.is_empty() => write!(f, "{}: {msg}", self.exc_type),
            _ => write!(f, "{}", self.exc_type),
        }
    }
}

impl std::error::Error for SimpleException {}

/// One traceback line: which code object was running and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Name of the code object executing in the frame.
    pub code_name: Rc<str>,
    /// Offset of the instruction that raised or propagated the exception.
    pub offset: usize,
}

/// Frames an exception passed through, innermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Traceback(Vec<StackFrame>);

impl Traceback {
    #[must_use]
    pub fn frames(&self) -> &[StackFrame] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The `(kind, value, trace)` triple held in the VM's pending-exception slot and staged
/// on the data stack for `except` and `finally` handlers.
#[derive(Debug, Clone)]
pub(crate) struct ExceptionState {
    pub exc: Rc<SimpleException>,
    pub trace: Option<Rc<Traceback>>,
}

impl ExceptionState {
    /// Wraps a freshly raised exception; the trace starts empty.
    pub fn new(exc: SimpleException) -> Self {
        Self {
            exc: Rc::new(exc),
            trace: None,
        }
    }

    pub fn kind(&self) -> ExcType {
        self.exc.exc_type()
    }

    /// Records that the exception is leaving the frame running `code_name`.
    pub fn push_frame(&mut self, code_name: Rc<str>, offset: usize) {
        let trace = self.trace.get_or_insert_with(Rc::default);
        Rc::make_mut(trace).0.push(StackFrame { code_name, offset });
    }

    /// Data-stack layout of the triple, deepest first: trace, value, type.
    pub fn to_values(&self) -> [Value; 3] {
        let trace = match &self.trace {
            Some(trace) => Value::Traceback(Rc::clone(trace)),
            None => Value::None,
        };
        [trace, Value::Exception(Rc::clone(&self.exc)), Value::ExcType(self.kind())]
    }

    /// Rebuilds a triple popped from the data stack.
    pub fn from_values(kind: &Value, value: Value, trace: Value) -> RunResult<Self> {
        let Value::ExcType(kind) = kind else {
            return Err(ExcType::system_error("exception state is missing its type"));
        };
        let exc = match value {
            Value::Exception(exc) => exc,
            Value::None => Rc::new(SimpleException::new_none(*kind)),
            other => {
                return Err(ExcType::system_error(format!(
                    "exception state holds a '{}' instead of an exception",
                    other.type_name()
                )));
            }
        };
        let trace = match trace {
            Value::Traceback(trace) => Some(trace),
            Value::None => None,
            other => {
                return Err(ExcType::system_error(format!(
                    "exception state holds a '{}' instead of a traceback",
                    other.type_name()
                )));
            }
        };
        Ok(Self { exc, trace })
    }
}

/// An exception that escaped the root frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    exc: SimpleException,
    traceback: Traceback,
}

impl Exception {
    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc.exc_type()
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.exc.message()
    }

    /// The exception instance, including its `context` and `cause` chain.
    #[must_use]
    pub fn exception(&self) -> &SimpleException {
        &self.exc
    }

    #[must_use]
    pub fn traceback(&self) -> &Traceback {
        &self.traceback
    }

    /// The `(kind, value, trace)` triple as VM values.
    #[must_use]
    pub fn triple(&self) -> (ExcType, Value, Value) {
        let trace = if self.traceback.is_empty() {
            Value::None
        } else {
            Value::Traceback(Rc::new(self.traceback.clone()))
        };
        (self.exc_type(), Value::Exception(Rc::new(self.exc.clone())), trace)
    }
}

impl From<ExceptionState> for Exception {
    fn from(state: ExceptionState) -> Self {
        Self {
            exc: Rc::unwrap_or_clone(state.exc),
            traceback: state.trace.map(Rc::unwrap_or_clone).unwrap_or_default(),
        }
    }
}

impl From<SimpleException> for Exception {
    fn from(exc: SimpleException) -> Self {
        Self {
            exc,
            traceback: Traceback::default(),
        }
    }
}

impl Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(cause) = self.exc.cause() {
            writeln!(f, "{cause}\n")?;
            writeln!(f, "The above exception was the direct cause of the following exception:\n")?;
        } else if let Some(context) = self.exc.context() {
            writeln!(f, "{context}\n")?;
            writeln!(f, "During handling of the above exception, another exception occurred:\n")?;
        }
        if !self.traceback.is_empty() {
            writeln!(f, "Traceback (most recent call last):")?;
            for frame in self.traceback.frames().iter().rev() {
                writeln!(f, "  in {}, offset {}", frame.code_name, frame.offset)?;
            }
        }
        write!(f, "{}", self.exc)
    }
}

impl std::error::Error for Exception {}
