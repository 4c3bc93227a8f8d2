//! Request-scoped result cache.
//!
//! # Responsibilities
//! - Memoize command results for the lifetime of one logical request
//! - Collapse concurrent lookups of the same key onto one computation
//!
//! # Design Decisions
//! - The scope is an explicit value the caller creates and drops; nothing
//!   is stored in task-locals
//! - Values are type-erased so one scope serves commands of any result type

pub mod request_scope;

pub use request_scope::RequestScope;
