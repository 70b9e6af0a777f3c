//! Error types for the MySQL controllers

use std::time::Duration;

use thiserror::Error;

use crate::controller::validation::SpecViolation;

/// Error variants are named with the `Error` suffix (e.g. `KubeError`, `ValidationError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(#[from] SpecViolation),

    /// An object with the intended name exists but belongs to someone else
    #[error("{kind} \"{name}\" already exists and is not owned by this database")]
    OwnershipConflictError { kind: &'static str, name: String },

    #[error("Timed out waiting for {0}")]
    TimeoutError(String),

    #[error("Transient error (will retry): {0}")]
    TransientError(String),

    #[error("Permanent error (will not retry): {0}")]
    PermanentError(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                // 4xx errors other than 409 Conflict and 429 TooManyRequests are not retryable
                kube::Error::Api(api_err) => {
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429;
                    }
                    true
                }
                _ => true,
            },
            Error::TransientError(_) => true,
            Error::PermanentError(_) => false,
            Error::InvalidConfig(_) => false,
            Error::ValidationError(_) => false,
            Error::OwnershipConflictError { .. } => false,
            Error::SerializationError(_) => false,
            Error::NotFound(_) => true,
            Error::TimeoutError(_) => true,
        }
    }

    /// Whether this is a 404 from the API server or a local not-found
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(e)) => e.code == 404,
            Error::NotFound(_) => true,
            _ => false,
        }
    }

    /// Short machine-readable reason used for status and events
    pub fn reason(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "KubernetesError",
            Error::SerializationError(_) => "SerializationError",
            Error::InvalidConfig(_) => "InvalidConfig",
            Error::NotFound(_) => "NotFound",
            Error::ValidationError(_) => "InvalidSpec",
            Error::OwnershipConflictError { .. } => "OwnershipConflict",
            Error::TimeoutError(_) => "Timeout",
            Error::TransientError(_) => "TransientError",
            Error::PermanentError(_) => "PermanentError",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Whether a raw kube error is a 404
pub fn is_kube_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

/// Whether a raw kube error is a 409 optimistic concurrency conflict
pub fn is_kube_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 409)
}

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Get the delay for an error; non-retryable errors wait the maximum delay
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            self.max_delay
        }
    }
}
