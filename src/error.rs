//! Error types for enrich-core.

use thiserror::Error;

/// Result type alias using enrich-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during enrichment operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Provider call failed at the HTTP or API layer.
    #[error("provider error: {provider} - {message}")]
    Provider { provider: String, message: String },

    /// Provider signalled a quota or rate limit; the key manager may rotate.
    #[error("rate limited: {provider} - {message}")]
    RateLimited { provider: String, message: String },

    /// A plan referenced a provider absent from the registry.
    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    /// A provider is disabled by the circuit breaker or cost governor.
    #[error("provider disabled: {name} ({reason})")]
    ProviderDisabled { name: String, reason: String },

    /// Every key in a provider's pool is exhausted.
    #[error("all API keys exhausted for {0}")]
    KeysExhausted(String),

    /// Timeout during an operation.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Budget depleted for the named resource.
    #[error("budget exhausted: {resource}")]
    BudgetExhausted { resource: String },

    /// Job deadline elapsed; partial evidence may still be usable.
    #[error("job cancelled: {0}")]
    Cancelled(String),

    /// Shared store (key state, L2 cache) failure.
    #[error("store error: {0}")]
    Store(String),

    /// Text generation failed.
    #[error("generation error: {0}")]
    Generation(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant broken.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a rate-limited error.
    pub fn rate_limited(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RateLimited {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a budget exhausted error.
    pub fn budget_exhausted(resource: impl Into<String>) -> Self {
        Self::BudgetExhausted {
            resource: resource.into(),
        }
    }

    /// Create a disabled-provider error.
    pub fn disabled(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProviderDisabled {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error counts as a failure for circuit-breaker purposes.
    ///
    /// Budget rejections and disabled-provider skips are routing outcomes,
    /// not provider health signals.
    pub fn is_breaker_failure(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. } | Self::RateLimited { .. } | Self::Timeout { .. }
        )
    }

    /// Whether this error should trigger API key rotation.
    pub fn is_quota(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Provider { message, .. } => is_quota_message(message),
            _ => false,
        }
    }

    /// Whether the condition is transient and locally recoverable.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::Provider { message, .. } => {
                let lower = message.to_ascii_lowercase();
                lower.contains("500")
                    || lower.contains("502")
                    || lower.contains("503")
                    || lower.contains("timeout")
                    || lower.contains("temporarily unavailable")
            }
            _ => false,
        }
    }
}

/// Match error text against known quota/exhaustion markers.
pub fn is_quota_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("429")
        || lower.contains("403")
        || lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("quota")
        || lower.contains("credits")
        || lower.contains("limit exceeded")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_classification() {
        assert!(Error::rate_limited("hunter", "slow down").is_quota());
        assert!(Error::provider("serper", "HTTP 429 too many requests").is_quota());
        assert!(Error::provider("serper", "monthly quota reached").is_quota());
        assert!(!Error::provider("serper", "HTTP 500 internal").is_quota());
        assert!(!Error::timeout(5000).is_quota());
    }

    #[test]
    fn test_breaker_failure_classification() {
        assert!(Error::provider("github", "HTTP 502").is_breaker_failure());
        assert!(Error::timeout(10_000).is_breaker_failure());
        assert!(!Error::budget_exhausted("row 7").is_breaker_failure());
        assert!(!Error::disabled("whois", "circuit open").is_breaker_failure());
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::timeout(1).is_transient());
        assert!(Error::provider("hunter", "503 temporarily unavailable").is_transient());
        assert!(!Error::ProviderNotFound("nope".into()).is_transient());
    }
}
