//! Destinations for `print()` and `PRINT_EXPR` output.

use std::{
    borrow::Cow,
    cell::RefCell,
    io::{self, Write as _},
};

use crate::exception::{ExcType, SimpleException};

/// Sink for text the running code writes.
///
/// A write error becomes an exception in the instruction that printed.
pub trait PrintWriter {
    /// Appends one formatted value; separators and line ends arrive through
    /// [`stdout_push`](Self::stdout_push).
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), SimpleException>;

    /// Appends a separating space or a newline.
    fn stdout_push(&mut self, end: char) -> Result<(), SimpleException>;
}

/// Writes to the process's stdout through a per-thread buffer, flushed on drop.
#[derive(Debug)]
pub struct StdPrint;

thread_local! {
    static STDOUT_BUFFER: RefCell<String> = const { RefCell::new(String::new()) };
}

/// Buffer size that triggers a flush at the next newline.
const FLUSH_THRESHOLD: usize = 8 * 1024;

impl PrintWriter for StdPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), SimpleException> {
        STDOUT_BUFFER.with(|buffer| buffer.borrow_mut().push_str(&output));
        Ok(())
    }

    fn stdout_push(&mut self, end: char) -> Result<(), SimpleException> {
        let full = STDOUT_BUFFER.with(|buffer| {
            let mut buffer = buffer.borrow_mut();
            buffer.push(end);
            end == '\n' && buffer.len() >= FLUSH_THRESHOLD
        });
        if full { flush_stdout() } else { Ok(()) }
    }
}

fn flush_stdout() -> Result<(), SimpleException> {
    STDOUT_BUFFER.with(|buffer| {
        let mut buffer = buffer.borrow_mut();
        if buffer.is_empty() {
            return Ok(());
        }
        let mut stdout = io::stdout().lock();
        stdout
            .write_all(buffer.as_bytes())
            .and_then(|()| stdout.flush())
            .map_err(|err| SimpleException::new_msg(ExcType::RuntimeError, format!("failed to write stdout: {err}")))?;
        buffer.clear();
        Ok(())
    })
}

impl Drop for StdPrint {
    fn drop(&mut self) {
        let _ = flush_stdout();
    }
}

/// Accumulates output in memory, for tests and hosts that capture it.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn output(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), SimpleException> {
        self.0.push_str(&output);
        Ok(())
    }

    fn stdout_push(&mut self, end: char) -> Result<(), SimpleException> {
        self.0.push(end);
        Ok(())
    }
}

/// Discards output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn stdout_write(&mut self, _output: Cow<'_, str>) -> Result<(), SimpleException> {
        Ok(())
    }

    fn stdout_push(&mut self, _end: char) -> Result<(), SimpleException> {
        Ok(())
    }
}
