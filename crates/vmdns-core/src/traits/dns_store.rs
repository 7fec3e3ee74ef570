// # DNS Store Trait
//
// Defines the interface for reading and mutating address records at a
// hosted DNS provider.
//
// ## Implementations
//
// - Cloudflare: `vmdns-provider-cloudflare` crate
//
// ## Usage
//
// ```rust,ignore
// use vmdns_core::DnsStore;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let store = /* DnsStore implementation */;
//
//     let zones = store.list_zones().await?;
//     let records = store.find_address_records(&zones[0], "vm1.example.com").await?;
//     println!("{records:?}");
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// DNS record type managed by this system
pub const ADDRESS_RECORD_TYPE: &str = "A";

/// A DNS provider's delegation boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    /// Provider-specific zone ID
    pub id: String,
    /// Zone apex (e.g., "example.com")
    pub name: String,
}

impl Zone {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Whether `hostname` falls under this zone
    ///
    /// The zone name must match whole labels at the end of the hostname;
    /// comparison is ASCII case-insensitive.
    pub fn contains(&self, hostname: &str) -> bool {
        let zone = self.name.trim_end_matches('.');
        if zone.is_empty() || hostname.len() < zone.len() {
            return false;
        }

        let split = hostname.len() - zone.len();
        let (head, tail) = match (hostname.get(..split), hostname.get(split..)) {
            (Some(head), Some(tail)) => (head, tail),
            _ => return false,
        };

        tail.eq_ignore_ascii_case(zone) && (head.is_empty() || head.ends_with('.'))
    }
}

/// A record as stored by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Provider-specific record ID
    pub id: String,
    /// Record type ("A")
    #[serde(rename = "type")]
    pub record_type: String,
    /// Fully qualified record name
    pub name: String,
    /// Record content (the IP address for A records)
    pub content: String,
    /// Whether the provider proxies traffic for this record
    #[serde(default)]
    pub proxied: bool,
}

/// Payload for creating or updating an address record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecordSpec {
    /// Fully qualified record name
    pub name: String,
    /// Target address
    pub content: Ipv4Addr,
    /// Records are always DNS-only
    pub proxied: bool,
}

impl AddressRecordSpec {
    pub fn new(name: impl Into<String>, content: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            content,
            proxied: false,
        }
    }
}

/// Trait for DNS record store implementations
///
/// # Trust Level: Untrusted
///
/// Stores execute exactly the call they are asked for. They must not:
/// - retry or back off (a failure aborts the run)
/// - decide whether a change is needed (owned by `SyncEngine`)
/// - skip calls on their own in dry-run mode (owned by `SyncEngine`)
///
/// Errors are returned as [`crate::Error::Api`]; the engine classifies them.
#[async_trait]
pub trait DnsStore: Send + Sync {
    /// List all zones visible to the credential, in provider order
    async fn list_zones(&self) -> Result<Vec<Zone>, crate::Error>;

    /// List the address records named `name` in `zone`
    async fn find_address_records(
        &self,
        zone: &Zone,
        name: &str,
    ) -> Result<Vec<DnsRecord>, crate::Error>;

    /// Create an address record
    async fn create_address_record(
        &self,
        zone: &Zone,
        record: &AddressRecordSpec,
    ) -> Result<DnsRecord, crate::Error>;

    /// Replace the content of an existing address record
    async fn update_address_record(
        &self,
        zone: &Zone,
        record_id: &str,
        record: &AddressRecordSpec,
    ) -> Result<(), crate::Error>;

    /// Delete a record
    async fn delete_record(&self, zone: &Zone, record_id: &str) -> Result<(), crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_contains_subdomain() {
        let zone = Zone::new("z1", "example.com");
        assert!(zone.contains("vm1.example.com"));
        assert!(zone.contains("a.b.example.com"));
        assert!(zone.contains("example.com"));
    }

    #[test]
    fn test_zone_requires_label_boundary() {
        let zone = Zone::new("z1", "example.com");
        assert!(!zone.contains("notexample.com"));
        assert!(!zone.contains("example.org"));
        assert!(!zone.contains("com"));
    }

    #[test]
    fn test_zone_contains_ignores_case_and_trailing_dot() {
        let zone = Zone::new("z1", "Example.COM.");
        assert!(zone.contains("vm1.example.com"));
    }

    #[test]
    fn test_empty_zone_name_matches_nothing() {
        let zone = Zone::new("z1", "");
        assert!(!zone.contains("vm1.example.com"));
    }

    #[test]
    fn test_record_deserializes_provider_shape() {
        let record: DnsRecord = serde_json::from_value(serde_json::json!({
            "id": "r1",
            "type": "A",
            "name": "vm1.example.com",
            "content": "1.2.3.4"
        }))
        .unwrap();

        assert_eq!(record.record_type, "A");
        assert!(!record.proxied);
    }
}
