use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::channel::{MtlsEndpointUsage, PemFileMtlsProvider};
use crate::retry::{Code, RetrySettings};

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts including the first (0 = unbounded).
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds.
    pub initial_retry_delay_ms: u64,
    /// Multiplier applied to the backoff delay after each attempt.
    pub retry_delay_multiplier: f64,
    /// Upper bound on the backoff delay in milliseconds.
    pub max_retry_delay_ms: u64,
    /// Initial per-attempt timeout in milliseconds.
    pub initial_attempt_timeout_ms: u64,
    /// Multiplier applied to the per-attempt timeout after each attempt.
    pub attempt_timeout_multiplier: f64,
    /// Upper bound on the per-attempt timeout in milliseconds.
    pub max_attempt_timeout_ms: u64,
    /// Total time budget across all attempts, in milliseconds.
    pub total_timeout_ms: u64,
    /// Canonical code names considered retryable (e.g. "UNAVAILABLE").
    pub retryable_codes: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_retry_delay_ms: 250,
            retry_delay_multiplier: 2.0,
            max_retry_delay_ms: 30_000,
            initial_attempt_timeout_ms: 5_000,
            attempt_timeout_multiplier: 1.0,
            max_attempt_timeout_ms: 5_000,
            total_timeout_ms: 60_000,
            retryable_codes: vec!["UNAVAILABLE".to_string()],
        }
    }
}

impl RetryConfig {
    /// Convert into validated [`RetrySettings`]; unknown code names and
    /// invalid multipliers/caps fail here, before any call is attempted.
    pub fn to_settings(&self) -> Result<RetrySettings> {
        let mut codes = Vec::with_capacity(self.retryable_codes.len());
        for name in &self.retryable_codes {
            match Code::from_reason(name) {
                Some(code) => codes.push(code),
                None => bail!("unknown canonical status code: {name}"),
            }
        }

        let settings = RetrySettings::builder()
            .max_attempts(self.max_attempts)
            .initial_retry_delay(Duration::from_millis(self.initial_retry_delay_ms))
            .retry_delay_multiplier(self.retry_delay_multiplier)
            .max_retry_delay(Duration::from_millis(self.max_retry_delay_ms))
            .initial_attempt_timeout(Duration::from_millis(self.initial_attempt_timeout_ms))
            .attempt_timeout_multiplier(self.attempt_timeout_multiplier)
            .max_attempt_timeout(Duration::from_millis(self.max_attempt_timeout_ms))
            .total_timeout(Duration::from_millis(self.total_timeout_ms))
            .retryable_codes(codes)
            .build()?;
        Ok(settings)
    }
}

/// Mutual-TLS channel parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtlsConfig {
    /// Whether to attach the client certificate when one is available.
    #[serde(default)]
    pub use_client_certificate: bool,
    /// Endpoint selection policy: "auto", "always", or "never".
    #[serde(default)]
    pub endpoint_usage: MtlsEndpointUsage,
    /// Regular service endpoint.
    pub endpoint: String,
    /// Certificate-bound endpoint; defaults to the regular endpoint.
    #[serde(default)]
    pub mtls_endpoint: Option<String>,
    /// Path to a PEM bundle holding the client certificate chain and key.
    #[serde(default)]
    pub certificate_path: Option<PathBuf>,
}

impl MtlsConfig {
    pub fn to_provider(&self) -> PemFileMtlsProvider {
        let mtls_endpoint = self
            .mtls_endpoint
            .clone()
            .unwrap_or_else(|| self.endpoint.clone());
        PemFileMtlsProvider::new(
            self.use_client_certificate,
            self.endpoint_usage,
            self.endpoint.clone(),
            mtls_endpoint,
            self.certificate_path.clone(),
        )
    }
}

/// Global configuration loaded from `~/.config/recall/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecallConfig {
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Optional mTLS channel policy.
    #[serde(default)]
    pub mtls: Option<MtlsConfig>,
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("recall")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<RecallConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = RecallConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: RecallConfig = toml::from_str(&data)?;
    Ok(cfg)
}
