//! Error types for the reconciliation system
//!
//! Every error aborts the whole run. There is no retry anywhere; re-running
//! the process is the retry mechanism.

use thiserror::Error;

/// Result type alias for reconciliation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Missing environment variable, unreadable or malformed credential file,
    /// invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inventory listing or credential resolution failure
    #[error("Inventory provider error: {0}")]
    Provider(String),

    /// DNS zone listing failure
    #[error("Unable to list zones: {0}")]
    ZoneList(String),

    /// Failure while fetching the existing records for a hostname
    #[error("Unable to get existing record for {hostname}: {message}")]
    RecordFetch {
        /// Normalized hostname
        hostname: String,
        /// Underlying failure
        message: String,
    },

    /// More than one existing address record, or a record with empty content
    #[error("Inconsistent existing records for {hostname}: {reason}")]
    AmbiguousRecord {
        /// Normalized hostname
        hostname: String,
        /// What was wrong with the existing state
        reason: String,
    },

    /// Create, update or delete failure
    #[error("Failed to {action} {hostname}: {message}")]
    Mutation {
        /// Normalized hostname
        hostname: String,
        /// "create", "update" or "delete"
        action: &'static str,
        /// Underlying failure
        message: String,
    },

    /// Adapter-level API failure, classified by the engine
    #[error("API error ({provider}): {message}")]
    Api {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an inventory provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a zone listing error
    pub fn zone_list(msg: impl Into<String>) -> Self {
        Self::ZoneList(msg.into())
    }

    /// Create a record fetch error
    pub fn record_fetch(hostname: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RecordFetch {
            hostname: hostname.into(),
            message: message.into(),
        }
    }

    /// Create an ambiguous record error
    pub fn ambiguous_record(hostname: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AmbiguousRecord {
            hostname: hostname.into(),
            reason: reason.into(),
        }
    }

    /// Create a mutation error
    pub fn mutation(
        hostname: impl Into<String>,
        action: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::Mutation {
            hostname: hostname.into(),
            action,
            message: message.into(),
        }
    }

    /// Create an adapter-level API error
    pub fn api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether this error stems from configuration rather than runtime state
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_message_names_action_and_host() {
        let err = Error::mutation("vm1.example.com", "update", "HTTP 500");
        assert_eq!(err.to_string(), "Failed to update vm1.example.com: HTTP 500");
    }

    #[test]
    fn test_is_config() {
        assert!(Error::config("CLOUDFLARE_INI is not set").is_config());
        assert!(!Error::zone_list("boom").is_config());
    }

    #[test]
    fn test_from_anyhow() {
        let err: Error = anyhow::anyhow!("wrapped").into();
        assert!(matches!(err, Error::Other(ref m) if m == "wrapped"));
    }
}
