//! Resilient remote-call engine.
//!
//! Wraps calls to unreliable dependencies in [`Command`]s protected by a
//! circuit breaker, a bulkhead and a deadline, with optional fallbacks,
//! request-scoped result caching and request collapsing.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────── Engine ────────────────────────┐
//!   execute(arg)  │  ┌─────────┐   ┌───────────┐   ┌──────────┐            │
//!  ───────────────┼─▶│ breaker │──▶│ isolation │──▶│ deadline │──▶ invoke ─┼──▶ dependency
//!                 │  │ (per    │   │ pool (per │   │ race     │            │
//!                 │  │ command)│   │ pool key) │   └────┬─────┘            │
//!                 │  └────▲────┘   └───────────┘        │ outcome          │
//!                 │       └── rolling window ◀──────────┘                  │
//!                 │                                                        │
//!   submit(arg)   │  ┌───────────┐  scheduler task  ┌────────────────┐     │
//!  ───────────────┼─▶│ collapser │─────flush───────▶│ batch Command  │     │
//!                 │  └───────────┘                  └────────────────┘     │
//!                 │                                                        │
//!                 │  config (ArcSwap) · metrics · admin API · shutdown     │
//!                 └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use resilience_engine::{config::EngineConfig, Engine, InvokeError};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::new(EngineConfig::default())?;
//! let greet = engine
//!     .command("GetGreeting", |name: String| async move {
//!         Ok::<_, InvokeError>(format!("Hello {name}"))
//!     })
//!     .fallback_value("Hello".to_string())
//!     .build();
//!
//! assert_eq!(greet.execute("World".into()).await?, "Hello World");
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod cache;
pub mod collapser;
pub mod command;
pub mod config;
pub mod engine;
pub mod observability;
pub mod resilience;

pub use cache::RequestScope;
pub use collapser::{CollapsedFuture, Collapser};
pub use command::{Command, CommandError, CommandFuture, CommandStream, InvokeError, Outcome};
pub use engine::{CommandSnapshot, Engine, EngineError};
