//! Secure asset transaction engine for a self-service equipment kiosk.
//!
//! The inventory of record lives in a remote asset-management service; this
//! engine turns scans into trusted codes, gates every state-changing action
//! behind session, rate-limit, and audit controls, and drives
//! checkout/checkin/transfer as a small optimistic-concurrency state machine
//! against the remote API.

// Core subsystems
pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod error;
pub mod http;
pub mod inventory;

// Cross-cutting concerns
pub mod audit;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::KioskConfig;
pub use coordinator::Coordinator;
pub use error::{EngineError, EngineResult};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
