//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     SIGINT/SIGTERM → Shutdown::trigger → server stops accepting,
//!     background tasks exit → in-flight requests drain → exit
//! ```

pub mod shutdown;

pub use shutdown::{wait_for_signal, Shutdown};
