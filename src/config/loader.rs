//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::KioskConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file, then apply environment
/// overrides. Secrets (the API token) should come from the environment so
/// the config file can be world-readable on the kiosk.
pub fn load_config(path: &Path) -> Result<KioskConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let mut config: KioskConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    apply_env_overrides(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build a validated config from defaults plus environment overrides, for
/// deployments that run without a config file.
pub fn load_default_config() -> Result<KioskConfig, ConfigError> {
    let mut config = KioskConfig::default();
    apply_env_overrides(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut KioskConfig) {
    if let Ok(token) = std::env::var("KIOSK_API_TOKEN") {
        if !token.is_empty() {
            config.inventory.api_token = token;
        }
    }
    if let Ok(url) = std::env::var("KIOSK_API_URL") {
        if !url.is_empty() {
            config.inventory.base_url = url;
        }
    }
    if let Ok(bind) = std::env::var("KIOSK_BIND_ADDRESS") {
        if !bind.is_empty() {
            config.listener.bind_address = bind;
        }
    }
    if let Ok(salt) = std::env::var("KIOSK_IP_HASH_SALT") {
        if !salt.is_empty() {
            config.security.ip_hash_salt = salt;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir();
        let path = dir.join("kiosk_loader_test.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
            [inventory]
            base_url = "https://inventory.example.edu/api/v1"
            api_token = "t0ken"

            [listener]
            bind_address = "127.0.0.1:9999"
            "#
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9999");
        assert_eq!(config.inventory.api_token, "t0ken");

        fs::remove_file(&path).unwrap_or_default();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
