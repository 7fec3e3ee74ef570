//! Test doubles and common utilities for contract tests
//!
//! This module provides fixture-backed implementations of the capability
//! traits so the engine can be exercised without network access.

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vmdns_core::error::{Error, Result};
use vmdns_core::traits::{
    AddressRecordSpec, DnsRecord, DnsStore, InventorySource, MachineRecord, Zone,
};

pub use vmdns_core::{ReconcileEvent, SyncConfig, SyncEngine};

/// An inventory source returning fixed machines
pub struct FixtureInventory {
    machines: Vec<MachineRecord>,
    /// Artificial latency before answering
    delay: Option<Duration>,
    /// Fail instead of answering
    failure: Option<String>,
    call_count: Arc<AtomicUsize>,
}

impl FixtureInventory {
    pub fn new(machines: Vec<MachineRecord>) -> Self {
        Self {
            machines,
            delay: None,
            failure: None,
            call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer only after `delay`
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(Vec::new())
        }
    }

    /// Always fail with `message`
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl InventorySource for FixtureInventory {
    async fn list_machines(&self) -> Result<Vec<MachineRecord>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(message) => Err(Error::provider(message.clone())),
            None => Ok(self.machines.clone()),
        }
    }

    fn source_name(&self) -> &'static str {
        "fixture"
    }
}

/// Shorthand for a machine with an address
pub fn machine(hostname: &str, ip: [u8; 4]) -> MachineRecord {
    MachineRecord::new(hostname, Some(Ipv4Addr::from(ip)))
}

/// Shorthand for a stopped machine
pub fn stopped(hostname: &str) -> MachineRecord {
    MachineRecord::new(hostname, None)
}

/// Operation names used for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    ListZones,
    Find,
    Create,
    Update,
    Delete,
}

#[derive(Default)]
struct StoreState {
    zones: Vec<Zone>,
    /// (zone id, record)
    records: Vec<(String, DnsRecord)>,
    next_id: usize,
    /// Fail `Op` (for any hostname when `None`)
    failures: Vec<(Op, Option<String>)>,
}

/// An in-memory DNS store that tracks calls
pub struct MemoryDnsStore {
    state: Arc<Mutex<StoreState>>,
    list_zones_calls: Arc<AtomicUsize>,
    find_calls: Arc<AtomicUsize>,
    create_calls: Arc<AtomicUsize>,
    update_calls: Arc<AtomicUsize>,
    delete_calls: Arc<AtomicUsize>,
    /// Record names seen by mutating calls, in order
    mutated: Arc<Mutex<Vec<String>>>,
}

impl MemoryDnsStore {
    pub fn new(zones: &[(&str, &str)]) -> Self {
        let state = StoreState {
            zones: zones.iter().map(|(id, name)| Zone::new(*id, *name)).collect(),
            ..StoreState::default()
        };

        Self {
            state: Arc::new(Mutex::new(state)),
            list_zones_calls: Arc::new(AtomicUsize::new(0)),
            find_calls: Arc::new(AtomicUsize::new(0)),
            create_calls: Arc::new(AtomicUsize::new(0)),
            update_calls: Arc::new(AtomicUsize::new(0)),
            delete_calls: Arc::new(AtomicUsize::new(0)),
            mutated: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a new MemoryDnsStore that shares state and counters with an existing one
    pub fn sharing_state_with(other: &Self) -> Self {
        Self {
            state: Arc::clone(&other.state),
            list_zones_calls: Arc::clone(&other.list_zones_calls),
            find_calls: Arc::clone(&other.find_calls),
            create_calls: Arc::clone(&other.create_calls),
            update_calls: Arc::clone(&other.update_calls),
            delete_calls: Arc::clone(&other.delete_calls),
            mutated: Arc::clone(&other.mutated),
        }
    }

    /// Seed an existing A record
    pub fn with_record(self, zone_id: &str, name: &str, content: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = format!("rec-{}", state.next_id);
            state.records.push((
                zone_id.to_string(),
                DnsRecord {
                    id,
                    record_type: "A".to_string(),
                    name: name.to_string(),
                    content: content.to_string(),
                    proxied: false,
                },
            ));
        }
        self
    }

    /// Make `op` fail, for `hostname` only or for every call
    pub fn failing(self, op: Op, hostname: Option<&str>) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((op, hostname.map(str::to_string)));
        self
    }

    pub fn list_zones_calls(&self) -> usize {
        self.list_zones_calls.load(Ordering::SeqCst)
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn mutation_calls(&self) -> usize {
        self.create_calls() + self.update_calls() + self.delete_calls()
    }

    pub fn mutated(&self) -> Vec<String> {
        self.mutated.lock().unwrap().clone()
    }

    /// Current content of the A records named `name`
    pub fn contents(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|(_, r)| r.name == name)
            .map(|(_, r)| r.content.clone())
            .collect()
    }

    fn check_failure(&self, op: Op, hostname: &str) -> Result<()> {
        let state = self.state.lock().unwrap();
        let hit = state
            .failures
            .iter()
            .any(|(o, h)| *o == op && h.as_deref().is_none_or(|h| h == hostname));
        if hit {
            Err(Error::api("memory", format!("injected {:?} failure", op)))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl DnsStore for MemoryDnsStore {
    async fn list_zones(&self) -> Result<Vec<Zone>> {
        self.list_zones_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure(Op::ListZones, "")?;
        Ok(self.state.lock().unwrap().zones.clone())
    }

    async fn find_address_records(&self, zone: &Zone, name: &str) -> Result<Vec<DnsRecord>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure(Op::Find, name)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|(z, r)| *z == zone.id && r.name == name && r.record_type == "A")
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn create_address_record(
        &self,
        zone: &Zone,
        record: &AddressRecordSpec,
    ) -> Result<DnsRecord> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure(Op::Create, &record.name)?;
        self.mutated.lock().unwrap().push(record.name.clone());

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let created = DnsRecord {
            id: format!("rec-{}", state.next_id),
            record_type: "A".to_string(),
            name: record.name.clone(),
            content: record.content.to_string(),
            proxied: record.proxied,
        };
        state.records.push((zone.id.clone(), created.clone()));
        Ok(created)
    }

    async fn update_address_record(
        &self,
        _zone: &Zone,
        record_id: &str,
        record: &AddressRecordSpec,
    ) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure(Op::Update, &record.name)?;
        self.mutated.lock().unwrap().push(record.name.clone());

        let mut state = self.state.lock().unwrap();
        let (_, existing) = state
            .records
            .iter_mut()
            .find(|(_, r)| r.id == record_id)
            .ok_or_else(|| Error::api("memory", format!("no record {}", record_id)))?;
        existing.content = record.content.to_string();
        Ok(())
    }

    async fn delete_record(&self, _zone: &Zone, record_id: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let name = self
            .state
            .lock()
            .unwrap()
            .records
            .iter()
            .find(|(_, r)| r.id == record_id)
            .map(|(_, r)| r.name.clone())
            .unwrap_or_default();
        self.check_failure(Op::Delete, &name)?;
        self.mutated.lock().unwrap().push(name);

        self.state
            .lock()
            .unwrap()
            .records
            .retain(|(_, r)| r.id != record_id);
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}

/// Build an engine over `machines` and a store sharing state with `store`
pub fn engine_for(
    machines: Vec<MachineRecord>,
    store: &MemoryDnsStore,
    dry_run: bool,
) -> (SyncEngine, tokio::sync::mpsc::UnboundedReceiver<ReconcileEvent>) {
    SyncEngine::new(
        Box::new(FixtureInventory::new(machines)),
        Box::new(MemoryDnsStore::sharing_state_with(store)),
        SyncConfig::new().with_dry_run(dry_run),
    )
    .expect("engine construction succeeds")
}

/// Drain all queued status lines
pub fn drain_lines(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ReconcileEvent>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(event) = rx.try_recv() {
        lines.push(event.to_string());
    }
    lines
}
