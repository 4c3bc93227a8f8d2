//! Request collapsing.
//!
//! # Responsibilities
//! - Gather single-argument requests arriving within `collapsing_delay_ms`
//!   into one ordered batch call
//! - Flush early when a window reaches `max_batch_size`
//! - Fan the batch response (or its failure) back out to every caller
//!
//! # Data Flow
//! ```text
//! submit(arg) → live BatchWindow (ArcSwap)
//!   first request → Scheduler::schedule(delay, flush)
//!   size limit    → Scheduler::run_now(flush)
//! flush → detach (fresh window installed) → seal → spawn dispatch
//! dispatch → batch Command::execute(args) → response[i] → promise[i]
//! ```
//!
//! # Design Decisions
//! - One scheduler task per engine drives every collapser's timers
//! - Detaching swaps the window pointer before sealing it, so an append
//!   racing the flush either lands in the batch or is handed back and
//!   retried against the fresh window

pub mod request_collapser;
pub(crate) mod scheduler;
pub(crate) mod window;

pub use request_collapser::{CollapsedFuture, Collapser, CollapserBuilder};
