//! Execution outcomes and the command error taxonomy.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

/// Boxed error produced by remote-call and fallback functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shareable form of [`BoxError`], so one failure can resolve many callers.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of one execution attempt.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success = 0,
    Failure = 1,
    Timeout = 2,
    Rejected = 3,
    ShortCircuited = 4,
    /// Caller error. Tracked, but never a dependency health signal.
    BadRequest = 5,
}

impl Outcome {
    pub const ALL: [Outcome; 6] = [
        Outcome::Success,
        Outcome::Failure,
        Outcome::Timeout,
        Outcome::Rejected,
        Outcome::ShortCircuited,
        Outcome::BadRequest,
    ];

    /// Whether the outcome counts toward the breaker's error ratio.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Outcome::Failure | Outcome::Timeout | Outcome::Rejected | Outcome::ShortCircuited
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Timeout => "timeout",
            Outcome::Rejected => "rejected",
            Outcome::ShortCircuited => "short_circuited",
            Outcome::BadRequest => "bad_request",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a remote-call function.
///
/// The function decides whether a failure reflects the dependency's health
/// (`Failure`) or a problem with the caller's input (`BadRequest`).
#[derive(Debug)]
pub enum InvokeError {
    Failure(BoxError),
    BadRequest(BoxError),
}

impl InvokeError {
    pub fn failure(error: impl Into<BoxError>) -> Self {
        InvokeError::Failure(error.into())
    }

    pub fn bad_request(error: impl Into<BoxError>) -> Self {
        InvokeError::BadRequest(error.into())
    }
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeError::Failure(e) => write!(f, "invocation failed: {e}"),
            InvokeError::BadRequest(e) => write!(f, "bad request: {e}"),
        }
    }
}

impl std::error::Error for InvokeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InvokeError::Failure(e) | InvokeError::BadRequest(e) => Some(e.as_ref()),
        }
    }
}

/// Error surfaced by a command execution.
///
/// `Clone` so that a single batch failure can resolve every collapsed caller.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// The remote call returned an error.
    #[error("command '{command}' failed: {cause}")]
    Failure { command: String, cause: SharedError },

    /// The remote call did not finish before its deadline.
    #[error("command '{command}' timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    /// The isolation pool had no free slot.
    #[error("command '{command}' rejected: pool '{pool}' is saturated")]
    Rejected { command: String, pool: String },

    /// The circuit is open.
    #[error("command '{command}' short-circuited: circuit is open")]
    ShortCircuited { command: String },

    /// The caller supplied an invalid argument.
    #[error("command '{command}' received a bad request: {cause}")]
    BadRequest { command: String, cause: SharedError },

    /// A batch response did not line up with its requests.
    #[error("batch command '{command}' returned {actual} responses for {expected} requests")]
    BatchProtocolViolation {
        command: String,
        expected: usize,
        actual: usize,
    },

    /// The execution was abandoned before it produced a result.
    #[error("command '{command}' was cancelled")]
    Cancelled { command: String },
}

impl CommandError {
    /// The outcome this error reports. `None` for cancellations, which are
    /// not an execution outcome at all.
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            CommandError::Failure { .. } | CommandError::BatchProtocolViolation { .. } => {
                Some(Outcome::Failure)
            }
            CommandError::Timeout { .. } => Some(Outcome::Timeout),
            CommandError::Rejected { .. } => Some(Outcome::Rejected),
            CommandError::ShortCircuited { .. } => Some(Outcome::ShortCircuited),
            CommandError::BadRequest { .. } => Some(Outcome::BadRequest),
            CommandError::Cancelled { .. } => None,
        }
    }

    /// Key of the command that produced the error.
    pub fn command(&self) -> &str {
        match self {
            CommandError::Failure { command, .. }
            | CommandError::Timeout { command, .. }
            | CommandError::Rejected { command, .. }
            | CommandError::ShortCircuited { command }
            | CommandError::BadRequest { command, .. }
            | CommandError::BatchProtocolViolation { command, .. }
            | CommandError::Cancelled { command } => command,
        }
    }

    /// Whether a fallback may replace this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CommandError::BadRequest { .. } | CommandError::Cancelled { .. }
        )
    }

    pub(crate) fn from_invoke(command: &str, error: InvokeError) -> Self {
        match error {
            InvokeError::Failure(cause) => CommandError::Failure {
                command: command.to_string(),
                cause: Arc::from(cause),
            },
            InvokeError::BadRequest(cause) => CommandError::BadRequest {
                command: command.to_string(),
                cause: Arc::from(cause),
            },
        }
    }
}
