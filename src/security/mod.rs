//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming action:
//!     → rate_limit.rs (fail-secure admission per identity+action)
//!     → session.rs (session + CSRF validation)
//!     → validate.rs (input allowlists, length bounds)
//!     → Pass to the coordinator
//! ```
//!
//! # Design Decisions
//! - Fail closed: a limiter store outage denies, it never bypasses
//! - Tokens come from OS randomness, never from time-derived values
//! - No trust in client input

pub mod rate_limit;
pub mod session;
pub mod validate;
