//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! guardian.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardianConfig (validated, immutable)
//!     → guards and registries built from it at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads + validates
//!     → HttpServer swaps tier budgets and header policy (arc-swap)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults so an empty file is a valid config
//! - Breaker thresholds and tokens apply at startup only; budgets and
//!   headers are hot-reloadable

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::*;
pub use validation::ValidationError;
