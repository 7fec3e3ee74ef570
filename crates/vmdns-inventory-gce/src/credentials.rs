//! Default credential chain for the Compute Engine API
//!
//! Key file: `GOOGLE_APPLICATION_CREDENTIALS`, else the well-known
//! application-default file written by `gcloud auth application-default login`.
//!
//! Project id: explicit override, `GOOGLE_CLOUD_PROJECT`,
//! `CLOUDSDK_CORE_PROJECT`, the key file, the metadata server, then
//! `gcloud config get-value project`.
//!
//! Access token: the key file (service-account JWT grant or user refresh
//! token), the metadata server (default service account), then
//! `gcloud auth application-default print-access-token`.

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;
use vmdns_core::{Error, Result};

/// GCE metadata server base URL
pub const METADATA_BASE: &str = "http://metadata.google.internal/computeMetadata/v1";

/// Environment variables consulted for the project id, in order
pub const PROJECT_ENV_VARS: &[&str] = &["GOOGLE_CLOUD_PROJECT", "CLOUDSDK_CORE_PROJECT"];

/// Environment variable naming an explicit key file
pub const CREDENTIALS_FILE_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// OAuth2 scope requested for key-file credentials
pub const COMPUTE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/compute.readonly";

const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ADC_FILE_NAME: &str = "application_default_credentials.json";

/// Lifetime of a self-signed assertion (the maximum Google accepts)
const ASSERTION_LIFETIME_SECS: u64 = 3600;

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolved project and bearer token
#[derive(Clone)]
pub struct GcpCredentials {
    /// Project whose instances are listed
    pub project_id: String,
    /// OAuth2 access token
    /// ⚠️ NEVER log this value
    access_token: String,
}

impl GcpCredentials {
    pub fn new(project_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            access_token: access_token.into(),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

// Custom Debug implementation that hides the access token
impl std::fmt::Debug for GcpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpCredentials")
            .field("project_id", &self.project_id)
            .field("access_token", &"<REDACTED>")
            .finish()
    }
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

/// Application-default credentials file
///
/// No `Debug`: both variants carry secrets.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KeyFile {
    ServiceAccount {
        project_id: Option<String>,
        client_email: String,
        private_key: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        quota_project_id: Option<String>,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
}

impl KeyFile {
    fn project_id(&self) -> Option<&str> {
        let project = match self {
            KeyFile::ServiceAccount { project_id, .. } => project_id,
            KeyFile::AuthorizedUser {
                quota_project_id, ..
            } => quota_project_id,
        };
        project.as_deref().filter(|p| !p.is_empty())
    }
}

/// Claims of the service-account JWT grant
#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

/// Token endpoint and metadata token response
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves [`GcpCredentials`] from the ambient environment
pub struct DefaultCredentialResolver {
    client: reqwest::Client,
    metadata_base: String,
    project_override: Option<String>,
    env: EnvLookup,
    use_gcloud: bool,
}

impl DefaultCredentialResolver {
    /// Create a resolver reading the process environment
    pub fn new(project_override: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(TOKEN_TIMEOUT)
            .build()
            .map_err(|e| Error::provider(format!("Failed to build credential client: {}", e)))?;

        Ok(Self {
            client,
            metadata_base: METADATA_BASE.to_string(),
            project_override: project_override.filter(|p| !p.is_empty()),
            env: Box::new(|name| std::env::var(name).ok()),
            use_gcloud: true,
        })
    }

    /// Point the resolver at another metadata server
    pub fn with_metadata_base(mut self, base: impl Into<String>) -> Self {
        self.metadata_base = base.into();
        self
    }

    /// Replace the environment lookup
    pub fn with_env(mut self, env: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.env = Box::new(env);
        self
    }

    /// Enable or disable the `gcloud` CLI fallback
    pub fn with_gcloud_fallback(mut self, enabled: bool) -> Self {
        self.use_gcloud = enabled;
        self
    }

    /// Resolve project id and access token
    ///
    /// # Errors
    ///
    /// `Error::Provider` if either cannot be determined, or if a key file is
    /// present but unusable.
    pub async fn resolve(&self) -> Result<GcpCredentials> {
        let key_file = self.key_file().await?;
        let project_id = self.project_id(key_file.as_ref()).await?;
        let access_token = self.access_token(key_file.as_ref()).await?;
        debug!("Resolved GCP credentials for project {}", project_id);
        Ok(GcpCredentials::new(project_id, access_token))
    }

    fn var(&self, name: &str) -> Option<String> {
        (self.env)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Well-known application-default credentials path
    fn well_known_file(&self) -> Option<PathBuf> {
        let dir = if cfg!(windows) {
            PathBuf::from(self.var("APPDATA")?).join("gcloud")
        } else {
            PathBuf::from(self.var("HOME")?).join(".config").join("gcloud")
        };
        Some(dir.join(ADC_FILE_NAME))
    }

    /// Load the key file, if any
    ///
    /// An explicit `GOOGLE_APPLICATION_CREDENTIALS` must be readable; a
    /// missing well-known file is not an error.
    async fn key_file(&self) -> Result<Option<KeyFile>> {
        let (path, explicit) = match self.var(CREDENTIALS_FILE_ENV) {
            Some(path) => (PathBuf::from(path), true),
            None => match self.well_known_file() {
                Some(path) => (path, false),
                None => return Ok(None),
            },
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::provider(format!(
                    "Unable to read credentials file {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let key_file = serde_json::from_str(&content).map_err(|e| {
            Error::provider(format!(
                "Invalid credentials file {}: {}",
                path.display(),
                e
            ))
        })?;

        debug!("Using credentials file {}", path.display());
        Ok(Some(key_file))
    }

    async fn project_id(&self, key_file: Option<&KeyFile>) -> Result<String> {
        if let Some(project) = &self.project_override {
            return Ok(project.clone());
        }

        for var in PROJECT_ENV_VARS {
            if let Some(project) = self.var(var) {
                debug!("Using project from {}", var);
                return Ok(project);
            }
        }

        if let Some(project) = key_file.and_then(KeyFile::project_id) {
            debug!("Using project from credentials file");
            return Ok(project.to_string());
        }

        if let Some(project) = self.metadata_text("project/project-id").await {
            debug!("Using project from metadata server");
            return Ok(project);
        }

        if self.use_gcloud {
            let project = gcloud(&["config", "get-value", "project"]).await?;
            if !project.is_empty() && project != "(unset)" {
                return Ok(project);
            }
        }

        Err(Error::provider(format!(
            "Unable to determine the GCP project; set {}",
            PROJECT_ENV_VARS.join(" or ")
        )))
    }

    async fn access_token(&self, key_file: Option<&KeyFile>) -> Result<String> {
        if let Some(key_file) = key_file {
            return self.exchange(key_file).await;
        }

        if let Some(token) = self.metadata_token().await {
            debug!("Using access token from metadata server");
            return Ok(token);
        }

        if self.use_gcloud {
            let token = gcloud(&["auth", "application-default", "print-access-token"]).await?;
            if !token.is_empty() {
                return Ok(token);
            }
        }

        Err(Error::provider(
            "Unable to obtain a GCP access token (no credentials file, no metadata server, no gcloud credentials)",
        ))
    }

    /// Trade key-file credentials for an access token
    async fn exchange(&self, key_file: &KeyFile) -> Result<String> {
        let (token_uri, form) = match key_file {
            KeyFile::ServiceAccount {
                client_email,
                private_key,
                token_uri,
                ..
            } => {
                let assertion = sign_assertion(client_email, private_key, token_uri)?;
                (
                    token_uri,
                    vec![("grant_type", JWT_BEARER_GRANT.to_string()), ("assertion", assertion)],
                )
            }
            KeyFile::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
                token_uri,
                ..
            } => (
                token_uri,
                vec![
                    ("grant_type", "refresh_token".to_string()),
                    ("client_id", client_id.clone()),
                    ("client_secret", client_secret.clone()),
                    ("refresh_token", refresh_token.clone()),
                ],
            ),
        };

        let response = self
            .client
            .post(token_uri)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::provider(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(Error::provider(format!(
                "Token request rejected: {} - {}",
                status, error_text
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::provider(format!("Invalid token response: {}", e)))?;

        debug!("Using access token from credentials file");
        Ok(token.access_token)
    }

    /// Default service-account token, `None` on any failure
    async fn metadata_token(&self) -> Option<String> {
        let resp = self
            .client
            .get(format!(
                "{}/instance/service-accounts/default/token",
                self.metadata_base
            ))
            .header("Metadata-Flavor", "Google")
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .ok()?;

        if !resp.status().is_success() {
            return None;
        }

        match resp.json::<TokenResponse>().await {
            Ok(token) => Some(token.access_token),
            Err(e) => {
                debug!("Ignoring unreadable metadata token response: {}", e);
                None
            }
        }
    }

    /// GET a plain-text metadata value, `None` on any failure
    async fn metadata_text(&self, path: &str) -> Option<String> {
        let resp = self
            .client
            .get(format!("{}/{}", self.metadata_base, path))
            .header("Metadata-Flavor", "Google")
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .ok()?;

        if !resp.status().is_success() {
            return None;
        }

        let text = resp.text().await.ok()?;
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// Build the RS256 assertion for the service-account JWT grant
fn sign_assertion(client_email: &str, private_key: &str, token_uri: &str) -> Result<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::provider(format!("System clock is before the epoch: {}", e)))?
        .as_secs();

    let claims = AssertionClaims {
        iss: client_email,
        scope: COMPUTE_READONLY_SCOPE,
        aud: token_uri,
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };

    let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
        .map_err(|e| Error::provider(format!("Invalid service account private key: {}", e)))?;

    encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| Error::provider(format!("Failed to sign token assertion: {}", e)))
}

/// Run `gcloud` and return its trimmed stdout
async fn gcloud(args: &[&str]) -> Result<String> {
    let output = tokio::process::Command::new("gcloud")
        .args(args)
        .output()
        .await
        .map_err(|e| Error::provider(format!("Failed to run gcloud CLI: {}", e)))?;

    if !output.status.success() {
        return Err(Error::provider(format!(
            "gcloud {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    String::from_utf8(output.stdout)
        .map(|s| s.trim().to_string())
        .map_err(|e| Error::provider(format!("gcloud produced invalid UTF-8: {}", e)))
}
