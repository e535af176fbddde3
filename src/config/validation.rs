//! Configuration validation.
//!
//! Serde handles the syntactic layer; this module checks the semantics:
//! addresses parse, timeouts are ordered, limits are non-zero. All errors
//! are collected, not just the first.

use crate::config::schema::KioskConfig;

/// A single semantic validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn err(field: &'static str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        field,
        message: message.into(),
    }
}

/// Validate a configuration. Returns every problem found.
pub fn validate_config(config: &KioskConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(err(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(err("listener.request_timeout_secs", "must be > 0"));
    }

    match url::Url::parse(&config.inventory.base_url) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {}
        Ok(parsed) => errors.push(err(
            "inventory.base_url",
            format!("unsupported scheme: {}", parsed.scheme()),
        )),
        Err(e) => errors.push(err("inventory.base_url", format!("invalid URL: {}", e))),
    }
    if config.inventory.request_timeout_ms == 0 {
        errors.push(err("inventory.request_timeout_ms", "must be > 0"));
    }
    // The remote budget must fit inside the client-facing request timeout,
    // including the full retry schedule.
    let remote_worst_case_ms = config.inventory.request_timeout_ms
        * u64::from(config.inventory.retries.max_attempts.max(1));
    if remote_worst_case_ms >= config.listener.request_timeout_secs * 1000 {
        errors.push(err(
            "inventory.request_timeout_ms",
            "remote timeout times retry attempts must stay below the listener request timeout",
        ));
    }
    if config.inventory.retries.max_attempts == 0 {
        errors.push(err("inventory.retries.max_attempts", "must be >= 1"));
    }

    if config.session.inactivity_secs == 0 {
        errors.push(err("session.inactivity_secs", "must be > 0"));
    }
    if config.session.absolute_lifetime_secs < config.session.inactivity_secs {
        errors.push(err(
            "session.absolute_lifetime_secs",
            "must be >= session.inactivity_secs",
        ));
    }

    if config.rate_limit.enabled {
        if config.rate_limit.window_secs == 0 {
            errors.push(err("rate_limit.window_secs", "must be > 0"));
        }
        for (field, limit) in [
            ("rate_limit.sign_in", config.rate_limit.sign_in),
            ("rate_limit.scan", config.rate_limit.scan),
            ("rate_limit.lookup", config.rate_limit.lookup),
            ("rate_limit.checkout", config.rate_limit.checkout),
            ("rate_limit.checkin", config.rate_limit.checkin),
            ("rate_limit.transfer", config.rate_limit.transfer),
            ("rate_limit.admin", config.rate_limit.admin),
        ] {
            if limit == 0 {
                errors.push(err(field, "must be > 0 while rate limiting is enabled"));
            }
        }
    }

    if config.decoder.max_image_bytes <= config.decoder.min_image_bytes {
        errors.push(err(
            "decoder.max_image_bytes",
            "must be > decoder.min_image_bytes",
        ));
    }
    if config.decoder.time_budget_ms == 0 {
        errors.push(err("decoder.time_budget_ms", "must be > 0"));
    }
    if config.decoder.max_code_len < 3 {
        errors.push(err("decoder.max_code_len", "must be >= 3"));
    }

    if config.audit.path.is_empty() {
        errors.push(err("audit.path", "must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(validate_config(&KioskConfig::default()).is_ok());
    }

    #[test]
    fn test_bad_bind_address_rejected() {
        let mut config = KioskConfig::default();
        config.listener.bind_address = "not-an-address".into();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "listener.bind_address"));
    }

    #[test]
    fn test_collects_multiple_errors() {
        let mut config = KioskConfig::default();
        config.inventory.base_url = "ftp://inventory".into();
        config.session.inactivity_secs = 0;
        config.decoder.time_budget_ms = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.len() >= 3);
    }

    #[test]
    fn test_remote_timeout_must_fit_request_timeout() {
        let mut config = KioskConfig::default();
        config.inventory.request_timeout_ms = 20_000;
        config.inventory.retries.max_attempts = 3;
        config.listener.request_timeout_secs = 30;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.field == "inventory.request_timeout_ms"));
    }

    #[test]
    fn test_zero_limit_rejected_only_when_enabled() {
        let mut config = KioskConfig::default();
        config.rate_limit.checkout = 0;
        assert!(validate_config(&config).is_err());
        config.rate_limit.enabled = false;
        assert!(validate_config(&config).is_ok());
    }
}
