//! Remote inventory API boundary.
//!
//! The remote asset-management service is the system of record; this engine
//! only reads state and proposes transitions. Everything behind the
//! [`InventoryApi`] trait is replaceable (the HTTP client in production,
//! in-memory fakes in tests).
//!
//! # Data Flow
//! ```text
//! coordinator / session manager
//!     → InventoryApi (trait)
//!         → client.rs (reqwest, bearer auth, connect/read timeouts)
//!             → remote REST API
//! ```

pub mod client;
pub mod types;

pub use client::InventoryClient;
pub use types::{AssetState, AssetStatus, InventoryApi, InventoryError, RemoteIdentity};
