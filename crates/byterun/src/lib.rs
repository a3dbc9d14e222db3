//! A stack-based bytecode virtual machine.
//!
//! Code objects use the classic CPython 3.5 instruction encoding. Loops, `try`/`except`
//! and `finally` are implemented with an explicit block stack per frame: every interruption
//! of the normal instruction sequence (`return`, `break`, `continue`, a raised exception)
//! is a [`Why`] signal that is drained through that stack until a block absorbs it or it
//! leaves the frame.
//!
//! Most hosts only need [`Runner`]; [`VirtualMachine`] is exposed for callers that want to
//! pick their own tracer or reuse an environment across runs.

mod builtins;
mod bytecode;
mod exception;
mod io;
mod namespace;
mod resource;
mod run;
pub mod tracer;
mod value;

pub use crate::{
    builtins::{BuiltinFunction, BuiltinTable},
    bytecode::{
        BinaryOp, Block, BlockKind, Code, CodeBuilder, CompareOp, HAVE_ARGUMENT, Instruction, JumpLabel, Opcode,
        Operand, OperandClass, UnaryOp, VirtualMachine, Why,
    },
    exception::{ExcType, Exception, SimpleException, StackFrame, Traceback},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    namespace::{Environment, Identifier, Namespace},
    resource::{
        DEFAULT_MAX_RECURSION_DEPTH, DEFAULT_MAX_RESULT_BYTES, LARGE_RESULT_THRESHOLD, LimitedTracker,
        MAX_DATA_RECURSION_DEPTH, NoLimitTracker, ResourceError, ResourceLimits, ResourceTracker,
    },
    run::Runner,
    tracer::{
        CoverageTracer, NoopTracer, ProfilingReport, ProfilingTracer, RecordingTracer, StderrTracer, TraceEvent,
        VmTracer,
    },
    value::{Function, Range, Value},
};
