//! Caller-facing HTTP operation surface.
//!
//! Thin JSON endpoints over the engine: authenticate, scan-and-resolve,
//! lookup, checkout, checkin, transfer. No pages are rendered here; kiosk
//! front-ends consume the JSON directly.
//!
//! Sessions ride in `X-Session-Token`; state-changing requests additionally
//! present `X-CSRF-Token`. Every denial maps to a stable reason code.

pub mod handlers;
pub mod server;

pub use server::{AppState, HttpServer};
