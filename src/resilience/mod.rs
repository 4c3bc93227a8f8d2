//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Command execution:
//!     → circuit_breaker.rs (short-circuit while open, single probe when half-open)
//!     → isolation.rs (take a pool slot or reject immediately)
//!     → timeouts.rs (race the invocation against its deadline)
//!     → circuit_breaker.rs (record outcome in rolling.rs, maybe trip)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable unless explicitly disabled per command
//! - Breaker and window state are per command key, pools per pool key
//! - Nothing here blocks: every check is an atomic operation

pub mod circuit_breaker;
pub mod isolation;
pub mod rolling;
pub mod timeouts;

pub use circuit_breaker::{Admission, BreakerTicket, CircuitBreaker, CircuitState};
pub use isolation::{IsolationPool, PoolPermit, PoolSnapshot};
pub use rolling::{RollingWindow, WindowSnapshot};
