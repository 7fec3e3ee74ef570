// # Compute Engine Inventory Source
//
// This crate provides the Google Compute Engine inventory source for
// cloud-vm-dns-sync.
//
// ## Extraction rule
//
// Every VM in the project (all zones, via the aggregated list) is scanned.
// A network interface contributes an entry only when it has exactly one
// access configuration and that configuration carries a public PTR name
// (`publicPtrDomainName`, set in the console's network interface tab). The
// entry's address is the configuration's `natIP`, which is absent while the
// VM is stopped.
//
// ## API Reference
//
// - Aggregated instance list: GET `/compute/v1/projects/:project/aggregated/instances`

pub mod credentials;

pub use credentials::{DefaultCredentialResolver, GcpCredentials};

use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use vmdns_core::traits::{InventorySource, MachineRecord};
use vmdns_core::{Error, Result};

/// Compute Engine REST API base URL
pub const COMPUTE_API_BASE: &str = "https://compute.googleapis.com/compute/v1";

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("cloud-vm-dns-sync/", env!("CARGO_PKG_VERSION"));

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// One page of `instances.aggregatedList`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregatedInstanceList {
    #[serde(default)]
    items: BTreeMap<String, InstancesScopedList>,
    next_page_token: Option<String>,
}

/// Instances of one zone (zones without instances only carry a warning)
#[derive(Debug, Default, Deserialize)]
struct InstancesScopedList {
    #[serde(default)]
    instances: Vec<Instance>,
}

/// The subset of a Compute Engine instance this crate reads
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    #[serde(default)]
    pub access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    #[serde(rename = "natIP")]
    pub nat_ip: Option<String>,
    pub public_ptr_domain_name: Option<String>,
}

/// Apply the extraction rule to a list of instances
///
/// # Errors
///
/// `Error::Provider` if a `natIP` is not an IPv4 address.
pub fn machines_from_instances(instances: &[Instance]) -> Result<Vec<MachineRecord>> {
    let mut machines = Vec::new();

    for instance in instances {
        for nic in &instance.network_interfaces {
            let [access] = nic.access_configs.as_slice() else {
                continue;
            };

            let Some(hostname) = access
                .public_ptr_domain_name
                .as_deref()
                .filter(|h| !h.is_empty())
            else {
                continue;
            };

            let ip = match access.nat_ip.as_deref().filter(|ip| !ip.is_empty()) {
                Some(ip) => Some(ip.parse::<Ipv4Addr>().map_err(|e| {
                    Error::provider(format!(
                        "Instance {} has invalid natIP '{}': {}",
                        instance.name, ip, e
                    ))
                })?),
                None => None,
            };

            tracing::debug!("Instance {}: {} -> {:?}", instance.name, hostname, ip);
            machines.push(MachineRecord::new(hostname, ip));
        }
    }

    Ok(machines)
}

enum GceAuth {
    Static(GcpCredentials),
    Default(DefaultCredentialResolver),
}

/// Compute Engine inventory source
pub struct GceInventory {
    client: reqwest::Client,
    api_base: String,
    auth: GceAuth,
}

impl GceInventory {
    /// Create an inventory source using the default credential chain
    pub fn new(project_override: Option<String>) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            api_base: COMPUTE_API_BASE.to_string(),
            auth: GceAuth::Default(DefaultCredentialResolver::new(project_override)?),
        })
    }

    /// Create an inventory source with already-resolved credentials
    pub fn with_credentials(credentials: GcpCredentials) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            api_base: COMPUTE_API_BASE.to_string(),
            auth: GceAuth::Static(credentials),
        })
    }

    /// Point the source at another API endpoint
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn credentials(&self) -> Result<GcpCredentials> {
        match &self.auth {
            GceAuth::Static(credentials) => Ok(credentials.clone()),
            GceAuth::Default(resolver) => resolver.resolve().await,
        }
    }

    /// Fetch every page of the aggregated instance list
    async fn fetch_instances(&self, credentials: &GcpCredentials) -> Result<Vec<Instance>> {
        let url = format!(
            "{}/projects/{}/aggregated/instances",
            self.api_base, credentials.project_id
        );

        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(&url).bearer_auth(credentials.access_token());
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| Error::provider(format!("Listing instances failed: {}", e)))?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error response".to_string());

                return Err(match status.as_u16() {
                    401 | 403 => Error::provider(format!(
                        "Authentication failed listing instances of {}: {}",
                        credentials.project_id, status
                    )),
                    404 => Error::provider(format!(
                        "Project not found: {}",
                        credentials.project_id
                    )),
                    _ => Error::provider(format!(
                        "Listing instances failed: {} - {}",
                        status, error_text
                    )),
                });
            }

            let page: AggregatedInstanceList = response
                .json()
                .await
                .map_err(|e| Error::provider(format!("Failed to parse instance list: {}", e)))?;

            instances.extend(page.items.into_values().flat_map(|scope| scope.instances));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(instances)
    }
}

#[async_trait::async_trait]
impl InventorySource for GceInventory {
    async fn list_machines(&self) -> Result<Vec<MachineRecord>> {
        let credentials = self.credentials().await?;
        tracing::info!("Listing instances of project {}", credentials.project_id);

        let instances = self.fetch_instances(&credentials).await?;
        let machines = machines_from_instances(&instances)?;

        tracing::info!(
            "Found {} instance(s), {} with a PTR name",
            instances.len(),
            machines.len()
        );
        Ok(machines)
    }

    fn source_name(&self) -> &'static str {
        "gce"
    }
}

fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(DEFAULT_HTTP_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::provider(format!("Failed to build HTTP client: {}", e)))
}
