//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Load config → Validate → Initialize subsystems → Start listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain in-flight operations → Exit
//! ```
//!
//! # Design Decisions
//! - Shutdown is broadcast so the server and background tasks (audit
//!   writer, metrics) observe it independently

pub mod shutdown;

pub use shutdown::Shutdown;
