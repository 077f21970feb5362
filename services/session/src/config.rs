use secrecy::SecretString;
use std::str::FromStr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub base_url: String,
    pub api_key: SecretString,
    pub http_timeout: Duration,
    pub device_timeout: Duration,
    pub relay_close_timeout: Duration,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    /// `RUST_LOG` directives, e.g. `info` or `voxlink=debug,reqwest=warn`.
    pub log_filter: String,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_key = std::env::var("VOXLINK_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("VOXLINK_API_KEY".to_string()))?;

        let base_url = std::env::var("VOXLINK_BASE_URL")
            .map_err(|_| ConfigError::MissingVar("VOXLINK_BASE_URL".to_string()))?;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(
                "VOXLINK_BASE_URL".to_string(),
                format!("'{}' is not an http(s) URL", base_url),
            ));
        }

        let http_timeout = Duration::from_secs(parse_var("HTTP_TIMEOUT_SECS", 30)?);
        let device_timeout = Duration::from_millis(parse_var("DEVICE_TIMEOUT_MS", 2_000)?);
        let relay_close_timeout =
            Duration::from_millis(parse_var("RELAY_CLOSE_TIMEOUT_MS", 3_000)?);

        let input_device = std::env::var("INPUT_DEVICE").ok();
        let output_device = std::env::var("OUTPUT_DEVICE").ok();

        let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        EnvFilter::try_new(&log_filter).map_err(|e| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log filter: {}", log_filter, e),
            )
        })?;

        Ok(Self {
            base_url,
            api_key,
            http_timeout,
            device_timeout,
            relay_close_timeout,
            input_device,
            output_device,
            log_filter,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("VOXLINK_API_KEY");
            env::remove_var("VOXLINK_BASE_URL");
            env::remove_var("HTTP_TIMEOUT_SECS");
            env::remove_var("DEVICE_TIMEOUT_MS");
            env::remove_var("RELAY_CLOSE_TIMEOUT_MS");
            env::remove_var("INPUT_DEVICE");
            env::remove_var("OUTPUT_DEVICE");
            env::remove_var("RUST_LOG");
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("VOXLINK_API_KEY", "test-key");
            env::set_var("VOXLINK_BASE_URL", "https://api.example.test/v1");
        }
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.api_key.expose_secret(), "test-key");
        assert_eq!(config.base_url, "https://api.example.test/v1");
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.device_timeout, Duration::from_millis(2_000));
        assert_eq!(config.relay_close_timeout, Duration::from_millis(3_000));
        assert_eq!(config.input_device, None);
        assert_eq!(config.output_device, None);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("HTTP_TIMEOUT_SECS", "5");
            env::set_var("DEVICE_TIMEOUT_MS", "250");
            env::set_var("RELAY_CLOSE_TIMEOUT_MS", "750");
            env::set_var("INPUT_DEVICE", "USB Mic");
            env::set_var("OUTPUT_DEVICE", "Headphones");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert_eq!(config.device_timeout, Duration::from_millis(250));
        assert_eq!(config.relay_close_timeout, Duration::from_millis(750));
        assert_eq!(config.input_device.as_deref(), Some("USB Mic"));
        assert_eq!(config.output_device.as_deref(), Some("Headphones"));
        assert_eq!(config.log_filter, "debug");
    }

    #[test]
    #[serial]
    fn test_config_missing_api_key() {
        clear_env_vars();
        unsafe {
            env::set_var("VOXLINK_BASE_URL", "https://api.example.test/v1");
            env::set_var("VOXLINK_API_KEY", "   ");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "VOXLINK_API_KEY"),
            _ => panic!("Expected MissingVar for VOXLINK_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_missing_base_url() {
        clear_env_vars();
        unsafe {
            env::set_var("VOXLINK_API_KEY", "test-key");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "VOXLINK_BASE_URL"),
            _ => panic!("Expected MissingVar for VOXLINK_BASE_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_base_url() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("VOXLINK_BASE_URL", "ftp://files.example.test");
        }

        let err = Config::from_env().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value for environment variable VOXLINK_BASE_URL: \
             'ftp://files.example.test' is not an http(s) URL"
        );
    }

    #[test]
    #[serial]
    fn test_config_invalid_timeout() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("HTTP_TIMEOUT_SECS", "soon");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "HTTP_TIMEOUT_SECS"),
            _ => panic!("Expected InvalidValue for HTTP_TIMEOUT_SECS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_accepts_per_target_log_directives() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("RUST_LOG", "voxlink=debug,voxlink::server=warn");
        }

        let config = Config::from_env().expect("Config should load successfully");
        assert_eq!(config.log_filter, "voxlink=debug,voxlink::server=warn");
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("RUST_LOG", "voxlink=loud");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }
}
