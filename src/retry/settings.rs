//! Immutable retry/backoff/deadline configuration.
//!
//! Built once at client-setup time and shared read-only across calls.
//! Invalid configuration fails at construction, never at call time.

use std::collections::BTreeSet;
use std::time::Duration;

use super::status::Code;

/// Configuration error raised by [`RetrySettingsBuilder::build`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("{name} must be a finite multiplier >= 1.0, got {value}")]
    InvalidMultiplier { name: &'static str, value: f64 },
    #[error("{name} cap {cap:?} is below the initial value {initial:?}")]
    CapBelowInitial {
        name: &'static str,
        cap: Duration,
        initial: Duration,
    },
}

/// Retry policy for one resilient call surface.
///
/// Backoff delay and attempt timeout grow multiplicatively and are capped
/// independently; total elapsed time is bounded by `total_timeout` and the
/// attempt count by `max_attempts` (0 = unbounded).
#[derive(Debug, Clone)]
pub struct RetrySettings {
    initial_attempt_timeout: Duration,
    attempt_timeout_multiplier: f64,
    max_attempt_timeout: Duration,
    initial_retry_delay: Duration,
    retry_delay_multiplier: f64,
    max_retry_delay: Duration,
    total_timeout: Duration,
    max_attempts: u32,
    retryable_codes: BTreeSet<Code>,
}

impl RetrySettings {
    pub fn builder() -> RetrySettingsBuilder {
        RetrySettingsBuilder::default()
    }

    pub fn initial_attempt_timeout(&self) -> Duration {
        self.initial_attempt_timeout
    }

    pub fn attempt_timeout_multiplier(&self) -> f64 {
        self.attempt_timeout_multiplier
    }

    pub fn max_attempt_timeout(&self) -> Duration {
        self.max_attempt_timeout
    }

    pub fn initial_retry_delay(&self) -> Duration {
        self.initial_retry_delay
    }

    pub fn retry_delay_multiplier(&self) -> f64 {
        self.retry_delay_multiplier
    }

    pub fn max_retry_delay(&self) -> Duration {
        self.max_retry_delay
    }

    pub fn total_timeout(&self) -> Duration {
        self.total_timeout
    }

    /// Maximum attempt count including the first; 0 means unbounded.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn retryable_codes(&self) -> &BTreeSet<Code> {
        &self.retryable_codes
    }

    pub fn is_retryable(&self, code: Code) -> bool {
        self.retryable_codes.contains(&code)
    }
}

/// Builder for [`RetrySettings`] with validation at `build` time.
#[derive(Debug, Clone)]
pub struct RetrySettingsBuilder {
    initial_attempt_timeout: Duration,
    attempt_timeout_multiplier: f64,
    max_attempt_timeout: Duration,
    initial_retry_delay: Duration,
    retry_delay_multiplier: f64,
    max_retry_delay: Duration,
    total_timeout: Duration,
    max_attempts: u32,
    retryable_codes: BTreeSet<Code>,
}

impl Default for RetrySettingsBuilder {
    fn default() -> Self {
        // No codes are retryable by default: retry is strictly opt-in.
        Self {
            initial_attempt_timeout: Duration::from_secs(5),
            attempt_timeout_multiplier: 1.0,
            max_attempt_timeout: Duration::from_secs(5),
            initial_retry_delay: Duration::from_millis(250),
            retry_delay_multiplier: 2.0,
            max_retry_delay: Duration::from_secs(30),
            total_timeout: Duration::from_secs(60),
            max_attempts: 5,
            retryable_codes: BTreeSet::new(),
        }
    }
}

impl RetrySettingsBuilder {
    pub fn initial_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.initial_attempt_timeout = timeout;
        self
    }

    pub fn attempt_timeout_multiplier(mut self, multiplier: f64) -> Self {
        self.attempt_timeout_multiplier = multiplier;
        self
    }

    pub fn max_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.max_attempt_timeout = timeout;
        self
    }

    pub fn initial_retry_delay(mut self, delay: Duration) -> Self {
        self.initial_retry_delay = delay;
        self
    }

    pub fn retry_delay_multiplier(mut self, multiplier: f64) -> Self {
        self.retry_delay_multiplier = multiplier;
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = timeout;
        self
    }

    /// 0 means unbounded (only the total timeout limits the call).
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn retryable_codes(mut self, codes: impl IntoIterator<Item = Code>) -> Self {
        self.retryable_codes = codes.into_iter().collect();
        self
    }

    pub fn build(self) -> Result<RetrySettings, SettingsError> {
        validate_multiplier("retry_delay_multiplier", self.retry_delay_multiplier)?;
        validate_multiplier("attempt_timeout_multiplier", self.attempt_timeout_multiplier)?;
        validate_cap(
            "max_retry_delay",
            self.max_retry_delay,
            self.initial_retry_delay,
        )?;
        validate_cap(
            "max_attempt_timeout",
            self.max_attempt_timeout,
            self.initial_attempt_timeout,
        )?;

        Ok(RetrySettings {
            initial_attempt_timeout: self.initial_attempt_timeout,
            attempt_timeout_multiplier: self.attempt_timeout_multiplier,
            max_attempt_timeout: self.max_attempt_timeout,
            initial_retry_delay: self.initial_retry_delay,
            retry_delay_multiplier: self.retry_delay_multiplier,
            max_retry_delay: self.max_retry_delay,
            total_timeout: self.total_timeout,
            max_attempts: self.max_attempts,
            retryable_codes: self.retryable_codes,
        })
    }
}

fn validate_multiplier(name: &'static str, value: f64) -> Result<(), SettingsError> {
    if !value.is_finite() || value < 1.0 {
        return Err(SettingsError::InvalidMultiplier { name, value });
    }
    Ok(())
}

fn validate_cap(
    name: &'static str,
    cap: Duration,
    initial: Duration,
) -> Result<(), SettingsError> {
    if cap < initial {
        return Err(SettingsError::CapBelowInitial { name, cap, initial });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_and_are_not_retryable() {
        let settings = RetrySettings::builder().build().unwrap();
        assert_eq!(settings.max_attempts(), 5);
        assert_eq!(settings.initial_retry_delay(), Duration::from_millis(250));
        assert!(settings.retryable_codes().is_empty());
        assert!(!settings.is_retryable(Code::Unavailable));
    }

    #[test]
    fn multiplier_below_one_is_rejected() {
        let err = RetrySettings::builder()
            .retry_delay_multiplier(0.5)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            SettingsError::InvalidMultiplier {
                name: "retry_delay_multiplier",
                value: 0.5
            }
        );
    }

    #[test]
    fn non_finite_multiplier_is_rejected() {
        assert!(RetrySettings::builder()
            .attempt_timeout_multiplier(f64::NAN)
            .build()
            .is_err());
    }

    #[test]
    fn cap_below_initial_is_rejected() {
        let err = RetrySettings::builder()
            .initial_retry_delay(Duration::from_secs(10))
            .max_retry_delay(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            SettingsError::CapBelowInitial {
                name: "max_retry_delay",
                ..
            }
        ));
    }

    #[test]
    fn zero_max_attempts_means_unbounded_and_is_valid() {
        let settings = RetrySettings::builder().max_attempts(0).build().unwrap();
        assert_eq!(settings.max_attempts(), 0);
    }

    #[test]
    fn retryable_codes_round_trip() {
        let settings = RetrySettings::builder()
            .retryable_codes([Code::Unavailable, Code::DeadlineExceeded])
            .build()
            .unwrap();
        assert!(settings.is_retryable(Code::Unavailable));
        assert!(settings.is_retryable(Code::DeadlineExceeded));
        assert!(!settings.is_retryable(Code::Internal));
    }
}
