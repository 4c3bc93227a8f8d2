//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → EngineConfig (validated, immutable)
//!     → stored in the engine behind an ArcSwap
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → Engine::follow_config_updates swaps it in
//!     → next execution resolves the new properties
//! ```
//!
//! # Design Decisions
//! - Every field has a default; per-key tables only override what they name
//! - Properties are resolved per execution, never cached by commands
//! - Validation reports all problems at once

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, CollapserProperties, CommandProperties, EngineConfig, IsolationStrategy,
    ObservabilityConfig, PoolProperties,
};
