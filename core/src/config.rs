//! Client configuration.
//!
//! # Design
//! Plain values with defaults and consuming `with_*` setters. `from_env`
//! overlays a handful of environment variables so deployments can tune
//! retries and compression without code changes; the lookup is injectable so
//! tests never touch the process environment.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use crate::error::HttpClientError;

pub const ENV_MAX_RETRIES: &str = "CDF_HTTP_MAX_RETRIES";
pub const ENV_MAX_BACKOFF_SECONDS: &str = "CDF_HTTP_MAX_BACKOFF_SECONDS";
pub const ENV_TIMEOUT_SECONDS: &str = "CDF_HTTP_TIMEOUT_SECONDS";
pub const ENV_DISABLE_GZIP: &str = "CDF_HTTP_DISABLE_GZIP";

pub const DEFAULT_API_VERSION: &str = "20230101";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Retries per error class (connect, read, status).
    pub max_retries: u32,
    /// Upper bound on a single backoff sleep.
    pub max_backoff: Duration,
    /// Idle connections kept per host.
    pub pool_connections: usize,
    /// Idle connections kept in total.
    pub pool_max_size: usize,
    pub retryable_status_codes: BTreeSet<u16>,
    /// Statuses that make a multi-item request split instead of retry.
    pub splittable_status_codes: BTreeSet<u16>,
    pub disable_gzip: bool,
    pub timeout: Duration,
    /// Default `cdf-version` header.
    pub api_version: String,
    pub product_name: String,
    pub product_version: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            max_backoff: Duration::from_secs(30),
            pool_connections: 10,
            pool_max_size: 20,
            retryable_status_codes: BTreeSet::from([429, 502, 503, 504]),
            splittable_status_codes: BTreeSet::from([400, 408, 409, 422, 502, 503, 504]),
            disable_gzip: false,
            timeout: Duration::from_secs(30),
            api_version: DEFAULT_API_VERSION.to_string(),
            product_name: env!("CARGO_PKG_NAME").to_string(),
            product_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl HttpClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with the `CDF_HTTP_*` environment variables.
    pub fn from_env() -> Result<Self, HttpClientError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    pub fn from_env_with<F>(lookup: F) -> Result<Self, HttpClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(retries) = parse_var::<u32, _>(&lookup, ENV_MAX_RETRIES)? {
            config.max_retries = retries;
        }
        if let Some(seconds) = parse_var::<f64, _>(&lookup, ENV_MAX_BACKOFF_SECONDS)? {
            config.max_backoff = seconds_to_duration(ENV_MAX_BACKOFF_SECONDS, seconds)?;
        }
        if let Some(seconds) = parse_var::<f64, _>(&lookup, ENV_TIMEOUT_SECONDS)? {
            config.timeout = seconds_to_duration(ENV_TIMEOUT_SECONDS, seconds)?;
        }
        if let Some(raw) = lookup(ENV_DISABLE_GZIP) {
            config.disable_gzip = matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    #[must_use]
    pub fn with_pool(mut self, connections: usize, max_size: usize) -> Self {
        self.pool_connections = connections;
        self.pool_max_size = max_size;
        self
    }

    #[must_use]
    pub fn with_retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_splittable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.splittable_status_codes = codes.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_gzip(mut self, enabled: bool) -> Self {
        self.disable_gzip = !enabled;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    #[must_use]
    pub fn with_product(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.product_name = name.into();
        self.product_version = version.into();
        self
    }

    pub fn gzip_enabled(&self) -> bool {
        !self.disable_gzip
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, HttpClientError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| HttpClientError::Config(format!("{key}={raw:?}: {e}"))),
    }
}

fn seconds_to_duration(key: &str, seconds: f64) -> Result<Duration, HttpClientError> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| HttpClientError::Config(format!("{key}={seconds}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = HttpClientConfig::default();
        assert_eq!(config.max_retries, 10);
        assert_eq!(
            config.retryable_status_codes,
            BTreeSet::from([429, 502, 503, 504])
        );
        assert_eq!(
            config.splittable_status_codes,
            BTreeSet::from([400, 408, 409, 422, 502, 503, 504])
        );
        assert!(config.gzip_enabled());
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
        assert_eq!(config.product_name, "cdf-http");
    }

    #[test]
    fn env_overrides_defaults() {
        let config = HttpClientConfig::from_env_with(lookup(&[
            (ENV_MAX_RETRIES, "3"),
            (ENV_MAX_BACKOFF_SECONDS, "1.5"),
            (ENV_TIMEOUT_SECONDS, " 5 "),
            (ENV_DISABLE_GZIP, "TRUE"),
        ]))
        .unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_backoff, Duration::from_millis(1500));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(!config.gzip_enabled());
    }

    #[test]
    fn empty_env_keeps_defaults() {
        let config = HttpClientConfig::from_env_with(|_| None).unwrap();
        assert_eq!(config.max_retries, 10);
        assert!(config.gzip_enabled());
    }

    #[test]
    fn falsy_gzip_flag_keeps_gzip() {
        let config = HttpClientConfig::from_env_with(lookup(&[(ENV_DISABLE_GZIP, "0")])).unwrap();
        assert!(config.gzip_enabled());
    }

    #[test]
    fn invalid_env_value_names_variable() {
        let err = HttpClientConfig::from_env_with(lookup(&[(ENV_MAX_RETRIES, "many")])).unwrap_err();
        assert!(matches!(err, HttpClientError::Config(ref msg) if msg.contains(ENV_MAX_RETRIES)));

        let err =
            HttpClientConfig::from_env_with(lookup(&[(ENV_MAX_BACKOFF_SECONDS, "-1")])).unwrap_err();
        assert!(matches!(err, HttpClientError::Config(_)));
    }

    #[test]
    fn builder_setters() {
        let config = HttpClientConfig::new()
            .with_max_retries(2)
            .with_gzip(false)
            .with_retryable_status_codes([500])
            .with_pool(4, 8)
            .with_api_version("beta");
        assert_eq!(config.max_retries, 2);
        assert!(config.disable_gzip);
        assert_eq!(config.retryable_status_codes, BTreeSet::from([500]));
        assert_eq!((config.pool_connections, config.pool_max_size), (4, 8));
        assert_eq!(config.api_version, "beta");
    }
}
