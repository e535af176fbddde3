//! Resilience primitives for remote calls.
//!
//! # Responsibilities
//! - Jittered exponential backoff between retry attempts
//!
//! # Design Decisions
//! - Only transient remote failures are retried (classification lives in
//!   the inventory error type); terminal rejections surface immediately
//! - Jittered backoff prevents thundering herd against a recovering remote

pub mod backoff;
