// # Inventory Source Trait
//
// Defines the interface for reading the VM inventory from a compute provider.
//
// ## Implementations
//
// - Google Compute Engine: `vmdns-inventory-gce` crate
//
// ## Usage
//
// ```rust,ignore
// use vmdns_core::{InventorySource, Inventory};
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let source = /* InventorySource implementation */;
//
//     let machines = source.list_machines().await?;
//     let inventory = Inventory::from_machines(machines);
//     for (hostname, ip) in inventory.iter() {
//         println!("{hostname} -> {ip:?}");
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// One machine discovered in the compute inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineRecord {
    /// Reverse-DNS hostname configured on the machine's network interface
    pub hostname: String,
    /// Current public address, `None` when the machine is stopped
    pub ip: Option<Ipv4Addr>,
}

impl MachineRecord {
    /// Create a new machine record
    pub fn new(hostname: impl Into<String>, ip: Option<Ipv4Addr>) -> Self {
        Self {
            hostname: hostname.into(),
            ip,
        }
    }
}

/// Desired state: hostname → public IP
///
/// Hostnames are stored without their trailing dot. Iteration is ordered by
/// hostname so that every run reconciles in the same order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    entries: BTreeMap<String, Option<Ipv4Addr>>,
}

impl Inventory {
    /// Create an empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an inventory from machine records
    ///
    /// A hostname reported twice keeps the last address seen.
    pub fn from_machines(machines: impl IntoIterator<Item = MachineRecord>) -> Self {
        let mut inventory = Self::new();
        for machine in machines {
            inventory.insert(machine.hostname, machine.ip);
        }
        inventory
    }

    /// Set the desired address for a hostname
    ///
    /// `vm1.example.com.` and `vm1.example.com` name the same entry.
    pub fn insert(&mut self, hostname: impl Into<String>, ip: Option<Ipv4Addr>) {
        let mut hostname = hostname.into();
        hostname.truncate(hostname.trim_end_matches('.').len());
        self.entries.insert(hostname, ip);
    }

    /// Desired address for a hostname, `None` if the hostname is unknown
    pub fn get(&self, hostname: &str) -> Option<Option<Ipv4Addr>> {
        self.entries.get(hostname.trim_end_matches('.')).copied()
    }

    /// Iterate over (hostname, desired address) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<Ipv4Addr>)> {
        self.entries.iter().map(|(host, ip)| (host.as_str(), *ip))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<MachineRecord> for Inventory {
    fn from_iter<T: IntoIterator<Item = MachineRecord>>(iter: T) -> Self {
        Self::from_machines(iter)
    }
}

/// Trait for compute inventory implementations
///
/// # Trust Level: Untrusted
///
/// Inventory sources only read from their provider. They must not retry,
/// cache across calls or spawn background tasks; the engine bounds the
/// whole call with a wall-clock timeout.
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// List every machine that carries a reverse-DNS hostname
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<MachineRecord>)`: machines with their current address
    /// - `Err(Error::Provider)`: if credentials cannot be resolved or listing fails
    async fn list_machines(&self) -> Result<Vec<MachineRecord>, crate::Error>;

    /// Get the source name (for logging/debugging)
    fn source_name(&self) -> &'static str;
}
