//! Bounds on a run: instruction budget, wall-clock deadline and call depth.

use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::exception::{ExcType, SimpleException};

/// Call depth applied when no limit is configured.
///
/// Nested calls run on the native stack, so every tracker caps call depth even when the
/// host asked for no limits.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Estimated result size in bytes above which an operation consults
/// [`ResourceTracker::check_large_result`] before allocating.
pub const LARGE_RESULT_THRESHOLD: usize = 100_000;

/// Result size cap applied when no limit is configured.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 1 << 30;

/// Nesting cap for recursive value operations (repr, equality) over self-referencing lists.
pub const MAX_DATA_RECURSION_DEPTH: usize = 100;

/// A limit that stopped the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// More instructions were dispatched than the budget allows.
    InstructionBudget { limit: usize },
    /// The deadline passed before the run finished.
    Deadline { limit: Duration, elapsed: Duration },
    /// Pushing one more frame would exceed the call depth limit.
    CallDepth { limit: usize },
    /// An operation would build a result larger than the size limit.
    ResultSize { limit: usize, requested: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstructionBudget { limit } => write!(f, "instruction budget of {limit} exhausted"),
            Self::Deadline { limit, elapsed } => write!(f, "deadline of {limit:?} passed after {elapsed:?}"),
            Self::CallDepth { limit } => write!(f, "maximum recursion depth ({limit}) exceeded"),
            Self::ResultSize { limit, requested } => {
                write!(f, "result of {requested} bytes exceeds the limit of {limit} bytes")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

impl ResourceError {
    /// Exception raised in the frame that hit the limit.
    ///
    /// Budget and deadline become the fatal `TimeoutError`, which no handler absorbs;
    /// call depth becomes a catchable `RecursionError` and result size a `MemoryError`.
    #[must_use]
    pub fn into_exception(self) -> SimpleException {
        let exc_type = match self {
            Self::InstructionBudget { .. } | Self::Deadline { .. } => ExcType::TimeoutError,
            Self::CallDepth { .. } => ExcType::RecursionError,
            Self::ResultSize { .. } => ExcType::MemoryError,
        };
        SimpleException::new_msg(exc_type, self)
    }
}

impl From<ResourceError> for SimpleException {
    fn from(err: ResourceError) -> Self {
        err.into_exception()
    }
}

/// Policy consulted by the VM before each instruction and each frame push.
///
/// The VM is generic over its tracker, so with [`NoLimitTracker`] the per-instruction
/// check is an empty inline call.
pub trait ResourceTracker: fmt::Debug {
    /// Called once per dispatched instruction.
    fn on_instruction(&mut self) -> Result<(), ResourceError>;

    /// Called before a frame is pushed; `depth` is the call stack depth before the push.
    fn check_frame_push(&self, depth: usize) -> Result<(), ResourceError>;

    /// Called before building a result estimated above [`LARGE_RESULT_THRESHOLD`] bytes,
    /// e.g. a sequence repeat or `list(range(n))`, so it can be refused before allocating.
    fn check_large_result(&self, estimated_bytes: usize) -> Result<(), ResourceError>;

    /// Instructions dispatched so far, for trackers that count them.
    fn instructions_run(&self) -> Option<usize> {
        None
    }
}

/// No instruction budget and no deadline; call depth is capped at
/// [`DEFAULT_MAX_RECURSION_DEPTH`] and result size at [`DEFAULT_MAX_RESULT_BYTES`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_instruction(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn check_frame_push(&self, depth: usize) -> Result<(), ResourceError> {
        check_depth(depth, DEFAULT_MAX_RECURSION_DEPTH)
    }

    #[inline]
    fn check_large_result(&self, estimated_bytes: usize) -> Result<(), ResourceError> {
        check_size(estimated_bytes, DEFAULT_MAX_RESULT_BYTES)
    }
}

/// Limits for a [`LimitedTracker`]; every field is optional.
///
/// ```
/// use std::time::Duration;
/// use byterun::ResourceLimits;
///
/// let limits = ResourceLimits::new()
///     .max_operations(10_000)
///     .max_duration(Duration::from_millis(50))
///     .max_recursion_depth(Some(64));
/// assert_eq!(limits.max_operations, Some(10_000));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    /// Instructions a run may dispatch, across all frames.
    pub max_operations: Option<usize>,
    /// Wall-clock time from tracker creation.
    pub max_duration: Option<Duration>,
    /// Frames on the call stack, root included; [`DEFAULT_MAX_RECURSION_DEPTH`] when unset.
    pub max_recursion_depth: Option<usize>,
    /// Bytes a single result may occupy; [`DEFAULT_MAX_RESULT_BYTES`] when unset.
    pub max_result_bytes: Option<usize>,
}

impl ResourceLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_operations(mut self, limit: usize) -> Self {
        self.max_operations = Some(limit);
        self
    }

    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, limit: Option<usize>) -> Self {
        self.max_recursion_depth = limit;
        self
    }

    #[must_use]
    pub fn max_result_bytes(mut self, limit: usize) -> Self {
        self.max_result_bytes = Some(limit);
        self
    }
}

/// Enforces a [`ResourceLimits`].
///
/// The deadline clock starts when the tracker is created.
#[derive(Debug)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    started: Instant,
    instructions: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            started: Instant::now(),
            instructions: 0,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_instruction(&mut self) -> Result<(), ResourceError> {
        self.instructions += 1;
        if let Some(limit) = self.limits.max_operations
            && self.instructions > limit
        {
            return Err(ResourceError::InstructionBudget { limit });
        }
        if let Some(limit) = self.limits.max_duration {
            let elapsed = self.started.elapsed();
            if elapsed > limit {
                return Err(ResourceError::Deadline { limit, elapsed });
            }
        }
        Ok(())
    }

    fn check_frame_push(&self, depth: usize) -> Result<(), ResourceError> {
        check_depth(depth, self.limits.max_recursion_depth.unwrap_or(DEFAULT_MAX_RECURSION_DEPTH))
    }

    fn check_large_result(&self, estimated_bytes: usize) -> Result<(), ResourceError> {
        check_size(estimated_bytes, self.limits.max_result_bytes.unwrap_or(DEFAULT_MAX_RESULT_BYTES))
    }

    fn instructions_run(&self) -> Option<usize> {
        Some(self.instructions)
    }
}

fn check_depth(depth: usize, limit: usize) -> Result<(), ResourceError> {
    if depth >= limit {
        Err(ResourceError::CallDepth { limit })
    } else {
        Ok(())
    }
}

fn check_size(requested: usize, limit: usize) -> Result<(), ResourceError> {
    if requested > limit {
        Err(ResourceError::ResultSize { limit, requested })
    } else {
        Ok(())
    }
}

/// Consults `tracker` when an operation is about to build a result of `estimated_bytes`.
pub(crate) fn check_result_size(tracker: &impl ResourceTracker, estimated_bytes: usize) -> Result<(), ResourceError> {
    if estimated_bytes > LARGE_RESULT_THRESHOLD {
        tracker.check_large_result(estimated_bytes)
    } else {
        Ok(())
    }
}
