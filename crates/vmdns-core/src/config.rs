//! Configuration types and the credential loader
//!
//! The DNS credential lives in a certbot-style ini file whose path is given
//! by the `CLOUDFLARE_INI` environment variable:
//!
//! ```text
//! dns_cloudflare_api_token = 0123456789abcdef
//! ```
//!
//! or, for the legacy global API key:
//!
//! ```text
//! dns_cloudflare_email = ops@example.com
//! dns_cloudflare_api_key = 0123456789abcdef
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Environment variable naming the credential file
pub const CREDENTIAL_FILE_ENV: &str = "CLOUDFLARE_INI";

/// Key holding a scoped API token
pub const API_TOKEN_KEY: &str = "dns_cloudflare_api_token";

/// Key holding the account email (global API key auth)
pub const EMAIL_KEY: &str = "dns_cloudflare_email";

/// Key holding the global API key
pub const API_KEY_KEY: &str = "dns_cloudflare_api_key";

const RECOGNIZED_KEYS: &[&str] = &[API_TOKEN_KEY, EMAIL_KEY, API_KEY_KEY];

/// DNS provider credential
///
/// The variant is selected by which keys the credential file holds.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Scoped API token, sent as a bearer token
    ApiToken {
        /// ⚠️ NEVER log this value
        token: String,
    },

    /// Account email plus global API key
    GlobalApiKey {
        /// Account email
        email: String,
        /// ⚠️ NEVER log this value
        key: String,
    },
}

impl Credential {
    /// Short name of the authentication scheme (safe to log)
    pub fn scheme(&self) -> &'static str {
        match self {
            Credential::ApiToken { .. } => "api-token",
            Credential::GlobalApiKey { .. } => "global-api-key",
        }
    }
}

// Custom Debug implementation that hides secret material
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::ApiToken { .. } => f
                .debug_struct("ApiToken")
                .field("token", &"<REDACTED>")
                .finish(),
            Credential::GlobalApiKey { email, .. } => f
                .debug_struct("GlobalApiKey")
                .field("email", email)
                .field("key", &"<REDACTED>")
                .finish(),
        }
    }
}

/// Load the credential from the file named by `CLOUDFLARE_INI`
///
/// # Errors
///
/// `Error::Config` if the variable is unset, the file is unreadable, or the
/// content does not describe exactly one complete credential.
pub fn load_credential_from_env() -> Result<Credential, crate::Error> {
    load_credential_with(|name| std::env::var(name).ok())
}

/// Same as [`load_credential_from_env`] with an injectable variable lookup
pub fn load_credential_with(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Credential, crate::Error> {
    let path = lookup(CREDENTIAL_FILE_ENV)
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| {
            crate::Error::config(format!(
                "Need \"{}\" environment variable pointing at the DNS credential file",
                CREDENTIAL_FILE_ENV
            ))
        })?;

    load_credential_file(path)
}

/// Read and parse a credential file
pub fn load_credential_file(path: impl AsRef<Path>) -> Result<Credential, crate::Error> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::Error::config(format!(
            "Unable to read credential file {}: {}",
            path.display(),
            e
        ))
    })?;

    tracing::debug!("Parsing credential file {}", path.display());
    parse_credential(&content)
}

/// Parse `key = value` lines into a credential
///
/// Blank lines are ignored. Any other line must hold a recognized key and a
/// non-empty value, and each key may appear once.
pub fn parse_credential(content: &str) -> Result<Credential, crate::Error> {
    let mut values: HashMap<&str, String> = HashMap::new();

    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| {
            crate::Error::config(format!(
                "Invalid credential file: line {} is not a `key = value` pair",
                line_no
            ))
        })?;
        let (key, value) = (key.trim(), value.trim());

        if key.is_empty() || value.is_empty() {
            return Err(crate::Error::config(format!(
                "Invalid credential file: line {} has an empty key or value",
                line_no
            )));
        }

        let key = RECOGNIZED_KEYS
            .iter()
            .copied()
            .find(|known| *known == key)
            .ok_or_else(|| {
                crate::Error::config(format!(
                    "Invalid credential file: unrecognized key '{}' on line {}",
                    key, line_no
                ))
            })?;

        if values.insert(key, value.to_string()).is_some() {
            return Err(crate::Error::config(format!(
                "Invalid credential file: duplicate key '{}' on line {}",
                key, line_no
            )));
        }
    }

    let token = values.remove(API_TOKEN_KEY);
    let email = values.remove(EMAIL_KEY);
    let key = values.remove(API_KEY_KEY);

    match (token, email, key) {
        (Some(token), None, None) => Ok(Credential::ApiToken { token }),
        (None, Some(email), Some(key)) => Ok(Credential::GlobalApiKey { email, key }),
        (Some(_), _, _) => Err(crate::Error::config(format!(
            "Invalid credential file: '{}' cannot be combined with '{}'/'{}'",
            API_TOKEN_KEY, EMAIL_KEY, API_KEY_KEY
        ))),
        (None, Some(_), None) => Err(crate::Error::config(format!(
            "Invalid credential file: missing '{}'",
            API_KEY_KEY
        ))),
        (None, None, Some(_)) => Err(crate::Error::config(format!(
            "Invalid credential file: missing '{}'",
            EMAIL_KEY
        ))),
        (None, None, None) => Err(crate::Error::config(format!(
            "Invalid credential file: missing '{}' (or '{}' and '{}')",
            API_TOKEN_KEY, EMAIL_KEY, API_KEY_KEY
        ))),
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Compute and report actions without calling create/update/delete
    #[serde(default)]
    pub dry_run: bool,

    /// Wall-clock budget for the whole inventory fetch (in seconds)
    #[serde(default = "default_inventory_timeout_secs")]
    pub inventory_timeout_secs: u64,
}

impl SyncConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            dry_run: false,
            inventory_timeout_secs: default_inventory_timeout_secs(),
        }
    }

    /// Enable or disable dry-run mode
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the inventory timeout
    pub fn with_inventory_timeout_secs(mut self, secs: u64) -> Self {
        self.inventory_timeout_secs = secs;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.inventory_timeout_secs == 0 {
            return Err(crate::Error::config("Inventory timeout must be > 0"));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_inventory_timeout_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_api_token() {
        let cred = parse_credential("dns_cloudflare_api_token = abc123\n").unwrap();
        assert_eq!(
            cred,
            Credential::ApiToken {
                token: "abc123".to_string()
            }
        );
    }

    #[test]
    fn test_parse_email_and_key() {
        let cred = parse_credential(
            "dns_cloudflare_email = ops@example.com\n\ndns_cloudflare_api_key = k3y\n",
        )
        .unwrap();
        assert_eq!(
            cred,
            Credential::GlobalApiKey {
                email: "ops@example.com".to_string(),
                key: "k3y".to_string()
            }
        );
    }

    #[test]
    fn test_value_may_contain_equals() {
        let cred = parse_credential("dns_cloudflare_api_token = ab==").unwrap();
        assert_eq!(
            cred,
            Credential::ApiToken {
                token: "ab==".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = parse_credential("dns_cloudflare_api_token = a\nzone = b\n").unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("unrecognized key 'zone'"));
    }

    #[test]
    fn test_malformed_line_rejected() {
        let err = parse_credential("dns_cloudflare_api_token abc").unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_empty_value_rejected() {
        assert!(parse_credential("dns_cloudflare_api_token = ").unwrap_err().is_config());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = parse_credential("dns_cloudflare_api_token = a\ndns_cloudflare_api_token = b")
            .unwrap_err();
        assert!(err.to_string().contains("duplicate key"));
    }

    #[test]
    fn test_missing_keys() {
        assert!(parse_credential("").unwrap_err().is_config());

        let err = parse_credential("dns_cloudflare_email = ops@example.com").unwrap_err();
        assert!(err.to_string().contains("missing 'dns_cloudflare_api_key'"));

        let err = parse_credential("dns_cloudflare_api_key = k").unwrap_err();
        assert!(err.to_string().contains("missing 'dns_cloudflare_email'"));
    }

    #[test]
    fn test_token_combined_with_key_rejected() {
        let err = parse_credential(
            "dns_cloudflare_api_token = t\ndns_cloudflare_email = e\ndns_cloudflare_api_key = k",
        )
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_load_from_env_missing_variable() {
        let err = load_credential_with(|_| None).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains(CREDENTIAL_FILE_ENV));
    }

    #[test]
    fn test_load_from_env_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.ini");
        let missing = missing.to_string_lossy().into_owned();

        let err = load_credential_with(|_| Some(missing.clone())).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_load_from_env_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "dns_cloudflare_api_token = from-file").unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let cred = load_credential_with(|name| {
            (name == CREDENTIAL_FILE_ENV).then(|| path.clone())
        })
        .unwrap();
        assert_eq!(cred.scheme(), "api-token");
    }

    #[test]
    fn test_debug_hides_secrets() {
        let token = Credential::ApiToken {
            token: "secret_token_12345".to_string(),
        };
        let key = Credential::GlobalApiKey {
            email: "ops@example.com".to_string(),
            key: "secret_key_12345".to_string(),
        };

        assert!(!format!("{:?}", token).contains("secret_token"));
        let debug = format!("{:?}", key);
        assert!(!debug.contains("secret_key"));
        assert!(debug.contains("ops@example.com"));
    }

    #[test]
    fn test_sync_config_defaults_and_validation() {
        let config = SyncConfig::default();
        assert!(!config.dry_run);
        assert_eq!(config.inventory_timeout_secs, 60);
        assert!(config.validate().is_ok());

        assert!(SyncConfig::new().with_inventory_timeout_secs(0).validate().is_err());
    }

    #[test]
    fn test_sync_config_deserialize_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{"dry_run": true}"#).unwrap();
        assert!(config.dry_run);
        assert_eq!(config.inventory_timeout_secs, 60);
    }
}
