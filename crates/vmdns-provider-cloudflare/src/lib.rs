// # Cloudflare DNS Store
//
// This crate provides the Cloudflare implementation of `DnsStore` for
// cloud-vm-dns-sync.
//
// - ✅ One HTTP request per store call (plus pagination for listings)
// - ✅ Full error propagation to the engine (no retry, no backoff)
// - ✅ HTTP timeout configured (30 seconds)
// - ✅ Specific error messages for HTTP status codes (401/403, 404, 409, 429, 5xx)
// - ✅ API token (bearer) and global API key (email + key) authentication
// - ❌ NO dry-run handling here (owned by SyncEngine, which skips the call)
// - ❌ NO change detection here (owned by SyncEngine)
//
// ## Security Requirements
//
// - Credentials NEVER appear in logs or Debug output
//
// ## API Reference
//
// - Cloudflare API v4: https://developers.cloudflare.com/api/
// - List Zones: GET `/zones?page=N&per_page=50`
// - List DNS Records: GET `/zones/:zone_id/dns_records?type=A&name=...`
// - Create DNS Record: POST `/zones/:zone_id/dns_records`
// - Update DNS Record: PUT `/zones/:zone_id/dns_records/:record_id`
// - Delete DNS Record: DELETE `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use vmdns_core::traits::{ADDRESS_RECORD_TYPE, AddressRecordSpec, DnsRecord, DnsStore, Zone};
use vmdns_core::{Credential, Error, Result};

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size for zone listings
const ZONES_PER_PAGE: u32 = 50;

/// Page size for record listings
const RECORDS_PER_PAGE: u32 = 100;

/// "Automatic" TTL
const AUTO_TTL: u32 = 1;

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("cloud-vm-dns-sync/", env!("CARGO_PKG_VERSION"));

/// Response envelope shared by every API v4 endpoint
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    total_pages: u32,
}

/// Body for create and update
#[derive(Debug, Serialize)]
struct RecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    content: String,
    ttl: u32,
    proxied: bool,
}

impl<'a> From<&'a AddressRecordSpec> for RecordBody<'a> {
    fn from(spec: &'a AddressRecordSpec) -> Self {
        Self {
            record_type: ADDRESS_RECORD_TYPE,
            name: &spec.name,
            content: spec.content.to_string(),
            ttl: AUTO_TTL,
            proxied: spec.proxied,
        }
    }
}

/// Cloudflare DNS store
///
/// # Trust Level: Untrusted
///
/// The store is stateless and single-shot. Whether a call is needed, and
/// whether it is skipped in dry-run mode, is decided by `SyncEngine`.
pub struct CloudflareStore {
    /// ⚠️ NEVER log this value
    credential: Credential,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// API base URL (overridable for tests)
    api_base: String,
}

// Custom Debug implementation that hides the credential
impl std::fmt::Debug for CloudflareStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareStore")
            .field("credential", &self.credential.scheme())
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl CloudflareStore {
    /// Create a new Cloudflare store
    ///
    /// # Errors
    ///
    /// `Error::Config` if the credential holds an empty secret, or if the
    /// HTTP client cannot be built.
    pub fn new(credential: Credential) -> Result<Self> {
        let empty = match &credential {
            Credential::ApiToken { token } => token.is_empty(),
            Credential::GlobalApiKey { email, key } => email.is_empty() || key.is_empty(),
        };
        if empty {
            return Err(Error::config("Cloudflare credential cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            credential,
            client,
            api_base: CLOUDFLARE_API_BASE.to_string(),
        })
    }

    /// Point the store at another API endpoint
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Attach authentication headers
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credential {
            Credential::ApiToken { token } => request.bearer_auth(token),
            Credential::GlobalApiKey { email, key } => request
                .header("X-Auth-Email", email)
                .header("X-Auth-Key", key),
        }
    }

    /// Send a request and unwrap the envelope
    ///
    /// `what` describes the call for error messages.
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<(Option<T>, Option<ResultInfo>)> {
        let response = self
            .authorize(request)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| Error::api("cloudflare", format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response".to_string());
        let envelope: Option<Envelope<T>> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let detail = envelope
                .as_ref()
                .map(|e| describe_errors(&e.errors))
                .filter(|d| !d.is_empty())
                .unwrap_or(body);

            return Err(match status.as_u16() {
                401 | 403 => Error::api(
                    "cloudflare",
                    format!(
                        "Authentication failed: Invalid credential or insufficient permissions. Status: {} ({})",
                        status, detail
                    ),
                ),
                404 => Error::api("cloudflare", format!("Not found: {} ({})", what, detail)),
                409 => Error::api(
                    "cloudflare",
                    format!("Conflict: {} ({}). Status: {}", what, detail, status),
                ),
                429 => Error::api(
                    "cloudflare",
                    format!("Rate limit exceeded. Please retry later. Status: {}", status),
                ),
                500..=599 => Error::api(
                    "cloudflare",
                    format!("Cloudflare server error: {} - {}", status, detail),
                ),
                _ => Error::api(
                    "cloudflare",
                    format!("{} failed: {} - {}", what, status, detail),
                ),
            });
        }

        let envelope = envelope.ok_or_else(|| {
            Error::api(
                "cloudflare",
                format!("Failed to parse response for {}", what),
            )
        })?;

        if !envelope.success {
            return Err(Error::api(
                "cloudflare",
                format!("{} failed: {}", what, describe_errors(&envelope.errors)),
            ));
        }

        Ok((envelope.result, envelope.result_info))
    }

    /// GET every page of a listing endpoint
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        per_page: u32,
        what: &str,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page: u32 = 1;

        loop {
            let page_param = page.to_string();
            let per_page_param = per_page.to_string();
            let request = self
                .client
                .get(url)
                .query(query)
                .query(&[("page", page_param.as_str()), ("per_page", per_page_param.as_str())]);

            let (result, info) = self.send::<Vec<T>>(request, what).await?;
            let batch = result.unwrap_or_default();
            let batch_len = batch.len();
            items.extend(batch);

            let total_pages = info.map(|i| i.total_pages).unwrap_or(1);
            if page >= total_pages || batch_len == 0 {
                break;
            }
            page += 1;
        }

        Ok(items)
    }
}

fn describe_errors(errors: &[ApiMessage]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl DnsStore for CloudflareStore {
    async fn list_zones(&self) -> Result<Vec<Zone>> {
        let url = format!("{}/zones", self.api_base);
        let zones: Vec<Zone> = self
            .get_all_pages(&url, &[], ZONES_PER_PAGE, "zone listing")
            .await?;

        tracing::debug!("Cloudflare returned {} zone(s)", zones.len());
        Ok(zones)
    }

    async fn find_address_records(&self, zone: &Zone, name: &str) -> Result<Vec<DnsRecord>> {
        tracing::debug!("Looking up A records for {} in zone {}", name, zone.name);

        let url = format!("{}/zones/{}/dns_records", self.api_base, zone.id);
        self.get_all_pages(
            &url,
            &[("type", ADDRESS_RECORD_TYPE), ("name", name)],
            RECORDS_PER_PAGE,
            "record lookup",
        )
        .await
    }

    async fn create_address_record(
        &self,
        zone: &Zone,
        record: &AddressRecordSpec,
    ) -> Result<DnsRecord> {
        let url = format!("{}/zones/{}/dns_records", self.api_base, zone.id);
        let request = self.client.post(&url).json(&RecordBody::from(record));

        let (created, _) = self.send::<DnsRecord>(request, "record creation").await?;
        let created = created.ok_or_else(|| {
            Error::api("cloudflare", "Record creation returned no record")
        })?;

        tracing::debug!("Created record {} for {}", created.id, created.name);
        Ok(created)
    }

    async fn update_address_record(
        &self,
        zone: &Zone,
        record_id: &str,
        record: &AddressRecordSpec,
    ) -> Result<()> {
        let url = format!("{}/zones/{}/dns_records/{}", self.api_base, zone.id, record_id);
        let request = self.client.put(&url).json(&RecordBody::from(record));

        self.send::<serde_json::Value>(request, "record update").await?;
        tracing::debug!("Updated record {} -> {}", record_id, record.content);
        Ok(())
    }

    async fn delete_record(&self, zone: &Zone, record_id: &str) -> Result<()> {
        let url = format!("{}/zones/{}/dns_records/{}", self.api_base, zone.id, record_id);
        let request = self.client.delete(&url);

        self.send::<serde_json::Value>(request, "record deletion").await?;
        tracing::debug!("Deleted record {}", record_id);
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "cloudflare"
    }
}
