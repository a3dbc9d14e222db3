//! Execution hooks for observing the VM.
//!
//! The VM calls a [`VmTracer`] at every dispatched instruction, frame push and pop,
//! block push and pop, and raised exception. Every hook defaults to an empty inline
//! function, so with [`NoopTracer`] the calls vanish after monomorphization.
//!
//! Bundled tracers:
//!
//! | Tracer | Records |
//! |--------|---------|
//! | [`NoopTracer`] | nothing, the default |
//! | [`StderrTracer`] | a line per event on stderr |
//! | [`ProfilingTracer`] | per-opcode counts, call and block depth, exceptions raised |
//! | [`CoverageTracer`] | the set of instruction offsets that ran |
//! | [`RecordingTracer`] | every event, in order |
//!
//! Pick one when constructing the VM, or pass it to `Runner::run_traced`:
//!
//! ```ignore
//! let (result, tracer) = runner.run_traced(vec![], NoLimitTracker, &mut NoPrint, ProfilingTracer::new());
//! println!("{}", tracer.report());
//! ```

use ahash::{AHashMap, AHashSet};

use crate::{
    bytecode::{BlockKind, Opcode},
    exception::ExcType,
};

/// One hook invocation, as stored by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// An opcode was dispatched at the given offset.
    Instruction {
        ip: usize,
        opcode: Opcode,
        /// Data stack depth of the current frame at dispatch.
        stack_depth: usize,
    },
    /// A frame was pushed.
    Call { func_name: String, depth: usize },
    /// A frame was popped.
    Return { depth: usize },
    /// A block was pushed on the current frame's block stack.
    BlockPush { kind: BlockKind, depth: usize },
    /// A block was popped, by `POP_BLOCK`/`POP_EXCEPT` or during unwinding.
    BlockPop { kind: BlockKind, depth: usize },
    /// An exception was raised (or re-raised) in the current frame.
    Exception { exc_type: ExcType, frame_depth: usize },
    /// `MAKE_FUNCTION` created a function object.
    MakeFunction { defaults_count: usize },
}

/// Observer of VM execution.
///
/// Every hook has an empty default body; implementors override only what they record.
pub trait VmTracer: std::fmt::Debug {
    /// Called after decoding, before the instruction's handler runs.
    ///
    /// # Arguments
    /// * `ip` - Offset of the opcode in the code object's instruction stream
    /// * `opcode` - The opcode about to be executed
    /// * `stack_depth` - Number of values on the current frame's data stack
    /// * `frame_depth` - Number of frames on the call stack
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {}

    /// Called when a new frame is pushed.
    ///
    /// # Arguments
    /// * `func_name` - Name of the code object the frame runs
    /// * `depth` - Call stack depth after the push
    #[inline(always)]
    fn on_call(&mut self, _func_name: &str, _depth: usize) {}

    /// Called when a frame is popped.
    ///
    /// # Arguments
    /// * `depth` - Call stack depth after the pop
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    /// Called after a block is pushed; `depth` is the block stack length after the push.
    #[inline(always)]
    fn on_block_push(&mut self, _kind: BlockKind, _depth: usize) {}

    /// Called after a block is popped; `depth` is the block stack length after the pop.
    #[inline(always)]
    fn on_block_pop(&mut self, _kind: BlockKind, _depth: usize) {}

    /// Called when an exception starts propagating through the current frame.
    #[inline(always)]
    fn on_exception(&mut self, _exc_type: ExcType, _frame_depth: usize) {}

    /// Called when a function object is created.
    #[inline(always)]
    fn on_make_function(&mut self, _defaults_count: usize) {}
}

// --- NoopTracer ---

/// Ignores every hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

// --- StderrTracer ---

/// Writes one line per event to stderr.
///
/// ```text
/// [   18] CALL_FUNCTION        stack=3  frames=1
///   >>> enter add depth=2
/// [    0] LOAD_FAST            stack=0  frames=2
/// [    3] LOAD_FAST            stack=1  frames=2
/// [    6] BINARY_ADD           stack=2  frames=2
/// [    7] RETURN_VALUE         stack=1  frames=2
///   <<< back to depth=1
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stderr tracer that goes quiet after `limit` instructions.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl VmTracer for StderrTracer {
    #[inline]
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, frame_depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("[{ip:>5}] {opcode:<20} stack={stack_depth}  frames={frame_depth}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("[trace stopped after {limit} instructions]");
            self.stopped = true;
        }
    }

    fn on_call(&mut self, func_name: &str, depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("  >>> enter {func_name} depth={depth}");
    }

    fn on_return(&mut self, depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("  <<< back to depth={depth}");
    }

    fn on_block_push(&mut self, kind: BlockKind, depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("  +++ BLOCK {kind:?} blocks={depth}");
    }

    fn on_block_pop(&mut self, kind: BlockKind, depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("  --- BLOCK {kind:?} blocks={depth}");
    }

    fn on_exception(&mut self, exc_type: ExcType, frame_depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("  !!! {exc_type} raised, frames={frame_depth}");
    }
}

// --- ProfilingTracer ---

/// Aggregates counters over a run; read them with [`ProfilingTracer::report`].
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    opcode_counts: AHashMap<Opcode, u64>,
    total_instructions: u64,
    max_depth: usize,
    total_calls: u64,
    total_exceptions: u64,
    max_block_depth: usize,
}

/// Counters collected by a [`ProfilingTracer`].
#[derive(Debug)]
pub struct ProfilingReport {
    /// Dispatch count per opcode, most frequent first.
    pub opcode_counts: Vec<(Opcode, u64)>,
    pub total_instructions: u64,
    /// Deepest call stack seen.
    pub max_depth: usize,
    pub total_calls: u64,
    /// Exceptions raised, including ones later handled.
    pub total_exceptions: u64,
    /// Deepest block stack seen in any frame.
    pub max_block_depth: usize,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the counters; opcode ties are ordered by opcode number.
    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        let mut opcode_counts: Vec<_> = self.opcode_counts.iter().map(|(&k, &v)| (k, v)).collect();
        opcode_counts.sort_by(|a, b| b.1.cmp(&a.1).then((a.0 as u8).cmp(&(b.0 as u8))));
        ProfilingReport {
            opcode_counts,
            total_instructions: self.total_instructions,
            max_depth: self.max_depth,
            total_calls: self.total_calls,
            total_exceptions: self.total_exceptions,
            max_block_depth: self.max_block_depth,
        }
    }
}

impl VmTracer for ProfilingTracer {
    #[inline]
    fn on_instruction(&mut self, _ip: usize, opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {
        *self.opcode_counts.entry(opcode).or_insert(0) += 1;
        self.total_instructions += 1;
    }

    #[inline]
    fn on_call(&mut self, _func_name: &str, depth: usize) {
        self.total_calls += 1;
        self.max_depth = self.max_depth.max(depth);
    }

    fn on_block_push(&mut self, _kind: BlockKind, depth: usize) {
        self.max_block_depth = self.max_block_depth.max(depth);
    }

    fn on_exception(&mut self, _exc_type: ExcType, _frame_depth: usize) {
        self.total_exceptions += 1;
    }
}

impl std::fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "instructions dispatched: {}", self.total_instructions)?;
        writeln!(f, "frames pushed:           {}", self.total_calls)?;
        writeln!(f, "deepest call stack:      {}", self.max_depth)?;
        writeln!(f, "deepest block stack:     {}", self.max_block_depth)?;
        writeln!(f, "exceptions raised:       {}", self.total_exceptions)?;
        writeln!(f)?;
        writeln!(f, "opcode counts:")?;
        for (opcode, count) in &self.opcode_counts {
            let pct = (*count as f64 / self.total_instructions as f64) * 100.0;
            writeln!(f, "  {opcode:<20} {count:>10}  ({pct:>5.1}%)")?;
        }
        Ok(())
    }
}

// --- CoverageTracer ---

/// Collects the offsets of dispatched instructions.
///
/// Useful for spotting dead paths in hand-assembled or compiled code.
#[derive(Debug, Default)]
pub struct CoverageTracer {
    ips: AHashSet<usize>,
}

impl CoverageTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offsets executed, across every frame.
    #[must_use]
    pub fn covered_ips(&self) -> &AHashSet<usize> {
        &self.ips
    }

    #[must_use]
    pub fn coverage_count(&self) -> usize {
        self.ips.len()
    }
}

impl VmTracer for CoverageTracer {
    #[inline]
    fn on_instruction(&mut self, ip: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {
        self.ips.insert(ip);
    }
}

// --- RecordingTracer ---

/// Tracer that records all events for post-mortem analysis.
///
/// Captures every trace event into a `Vec<TraceEvent>`. This is the most expensive
/// tracer (allocates per event), so use it only for short executions.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recording tracer that stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_some_and(|l| self.events.len() >= l) {
            return;
        }
        self.events.push(event);
    }
}

impl VmTracer for RecordingTracer {
    #[inline]
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, _frame_depth: usize) {
        self.record(TraceEvent::Instruction {
            ip,
            opcode,
            stack_depth,
        });
    }

    fn on_call(&mut self, func_name: &str, depth: usize) {
        self.record(TraceEvent::Call {
            func_name: func_name.to_owned(),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.record(TraceEvent::Return { depth });
    }

    fn on_block_push(&mut self, kind: BlockKind, depth: usize) {
        self.record(TraceEvent::BlockPush { kind, depth });
    }

    fn on_block_pop(&mut self, kind: BlockKind, depth: usize) {
        self.record(TraceEvent::BlockPop { kind, depth });
    }

    fn on_exception(&mut self, exc_type: ExcType, frame_depth: usize) {
        self.record(TraceEvent::Exception { exc_type, frame_depth });
    }

    fn on_make_function(&mut self, defaults_count: usize) {
        self.record(TraceEvent::MakeFunction { defaults_count });
    }
}
