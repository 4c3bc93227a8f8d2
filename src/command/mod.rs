//! Commands: protected remote calls.
//!
//! # Responsibilities
//! - Wrap a user-supplied `invoke` with breaker admission, bulkhead
//!   isolation, a deadline and an optional fallback
//! - Classify every execution into an [`Outcome`] and record it
//! - Offer awaitable, blocking, spawned and streaming execution forms
//!
//! # Data Flow
//! ```text
//! Command::execute → CircuitBreaker::allow → IsolationPool::try_acquire
//!   → invoke (semaphore: caller task / worker: spawned task)
//!   → BreakerTicket::complete(outcome) → fallback?
//! ```
//!
//! # Design Decisions
//! - The remote function classifies its own errors through [`InvokeError`]
//! - Properties are re-read from the engine on every execution so a config
//!   reload applies without rebuilding commands

pub mod error;
pub mod executor;
pub mod stream;

pub use error::{BoxError, CommandError, InvokeError, Outcome, SharedError};
pub use executor::{Command, CommandBuilder};
pub use stream::{CommandFuture, CommandStream};
