//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the kiosk
//! engine. All types derive Serde traits for deserialization from config
//! files.

use serde::{Deserialize, Serialize};

/// Root configuration for the kiosk engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct KioskConfig {
    /// Listener configuration (bind address, request timeout).
    pub listener: ListenerConfig,

    /// Remote inventory API settings.
    pub inventory: InventoryConfig,

    /// Session lifetime settings.
    pub session: SessionConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Barcode decoder settings.
    pub decoder: DecoderConfig,

    /// Audit trail settings.
    pub audit: AuditConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Security hardening settings.
    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Client-facing request timeout in seconds. Must stay longer than the
    /// remote API timeouts so a hung dependency reports an error instead of
    /// hanging the request.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Remote inventory API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Base URL of the remote API (e.g., "https://inventory.example.edu/api/v1").
    pub base_url: String,

    /// Bearer token for the remote API. Usually supplied via the
    /// `KIOSK_API_TOKEN` environment variable rather than the file.
    pub api_token: String,

    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Total per-request timeout in milliseconds.
    pub request_timeout_ms: u64,

    /// Retry behavior for transient remote failures.
    pub retries: RetryConfig,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1".to_string(),
            api_token: String::new(),
            connect_timeout_ms: 3_000,
            request_timeout_ms: 5_000,
            retries: RetryConfig::default(),
        }
    }
}

/// Retry configuration for remote calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (1 = no retries).
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

/// Session lifetime configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity timeout in seconds.
    pub inactivity_secs: u64,

    /// Absolute maximum session lifetime in seconds.
    pub absolute_lifetime_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_secs: 30 * 60,
            absolute_lifetime_secs: 12 * 60 * 60,
        }
    }
}

/// Rate limiting configuration. Each action carries an independent limit
/// counted per identity within the window.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Window length in seconds (fixed window).
    pub window_secs: u64,

    /// Sign-in attempts per window per identity.
    pub sign_in: u64,

    /// Scan/decode requests per window per identity.
    pub scan: u64,

    /// Asset lookups per window per identity.
    pub lookup: u64,

    /// Checkouts per window per identity.
    pub checkout: u64,

    /// Checkins per window per identity.
    pub checkin: u64,

    /// Transfers per window per identity.
    pub transfer: u64,

    /// Admin operations per window per identity.
    pub admin: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 60,
            sign_in: 5,
            scan: 20,
            lookup: 30,
            checkout: 10,
            checkin: 10,
            transfer: 10,
            admin: 10,
        }
    }
}

/// Barcode decoder configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Maximum accepted image payload in bytes.
    pub max_image_bytes: usize,

    /// Minimum accepted image payload in bytes (rejects truncated uploads).
    pub min_image_bytes: usize,

    /// Wall-clock budget for the whole preprocessing pipeline, milliseconds.
    pub time_budget_ms: u64,

    /// Maximum accepted decoded code length.
    pub max_code_len: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: 10 * 1024 * 1024,
            min_image_bytes: 100,
            time_budget_ms: 2_000,
            max_code_len: 50,
        }
    }
}

/// Audit trail configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Path of the append-only JSONL audit file.
    pub path: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: "logs/audit.jsonl".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum request body size in bytes.
    pub max_body_size: usize,

    /// Salt mixed into client IP hashes before they reach the audit trail.
    pub ip_hash_salt: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 16 * 1024 * 1024,
            ip_hash_salt: "kiosk".to_string(),
        }
    }
}
