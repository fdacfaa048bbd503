//! Worker process port.

use std::fmt;
use std::io;

use async_trait::async_trait;

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited with the given status code.
    Code(i32),
    /// Terminated by the given signal.
    Signal(i32),
}

impl ProcessExit {
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Code(0))
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// Handle on a worker OS process owned by an agent.
///
/// Implementations must be safe to poll repeatedly; the supervisor calls
/// [`try_exit`](Self::try_exit) once per pass.
#[async_trait]
pub trait WorkerProcess: Send + Sync {
    /// OS process id, if known.
    fn pid(&self) -> Option<u32>;

    /// Exit status without blocking. `None` while still running.
    fn try_exit(&mut self) -> io::Result<Option<ProcessExit>>;

    /// Forcibly terminate the process and everything it started.
    ///
    /// Best-effort and idempotent: killing an already dead process succeeds.
    async fn kill(&mut self) -> io::Result<()>;
}
