//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, env overrides)
//!     → validation.rs (semantic checks)
//!     → KioskConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Secrets come from the environment, not the file

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::DecoderConfig;
pub use schema::KioskConfig;
pub use schema::RateLimitConfig;
pub use schema::RetryConfig;
pub use schema::SessionConfig;
