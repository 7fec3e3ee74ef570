//! Reconciliation engine
//!
//! The SyncEngine is responsible for:
//! - Fetching the VM inventory (bounded by a wall-clock timeout)
//! - Matching each hostname to its owning DNS zone
//! - Comparing the desired address with the existing record
//! - Creating, updating or deleting the record (skipped in dry-run mode)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ InventorySource │─── Inventory ───┐
//! └─────────────────┘                 │
//!                                     ▼
//!                            ┌──────────────┐
//!                            │  SyncEngine  │
//!                            └──────────────┘
//!                                     │
//!                   ┌─────────────────┴─────────────────┐
//!                   │                                   │
//!                   ▼                                   ▼
//!           ┌──────────────┐                   ┌──────────────┐
//!           │   DnsStore   │                   │    Events    │
//!           │ (zones, CRUD)│                   │ (status line)│
//!           └──────────────┘                   └──────────────┘
//! ```
//!
//! ## Per-hostname flow
//!
//! 1. Strip the trailing dot
//! 2. First zone (provider order) containing the hostname, else skip silently
//! 3. Fetch existing A records: more than one, or one with empty content, aborts the run
//! 4. Unchanged / create / update / delete
//! 5. Emit a [`ReconcileEvent`]
//!
//! The first error aborts the remaining hostnames.

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::traits::{AddressRecordSpec, DnsRecord, DnsStore, Inventory, InventorySource, Zone};
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outcome of reconciling one hostname
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordAction {
    /// Existing record already matches (or neither exists)
    Unchanged,

    /// A new record was created
    Created {
        ip: Ipv4Addr,
    },

    /// The record's content was replaced
    Updated {
        from: String,
        to: Ipv4Addr,
    },

    /// The record was deleted because the machine has no address
    Removed {
        was: String,
    },
}

/// Event emitted for every hostname that matched a zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileEvent {
    /// Normalized hostname
    pub hostname: String,
    /// What was (or, in dry-run mode, would have been) done
    pub action: RecordAction,
    /// Whether the mutating call was skipped
    pub dry_run: bool,
}

impl fmt::Display for ReconcileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            RecordAction::Unchanged => write!(f, "{}: unchanged", self.hostname),
            RecordAction::Created { ip } => {
                write!(f, "{} created and set to {}", self.hostname, ip)
            }
            RecordAction::Updated { from, to } => {
                write!(f, "{} updated from {} to {}.", self.hostname, from, to)
            }
            RecordAction::Removed { was } => write!(f, "{} removed (was {}).", self.hostname, was),
        }
    }
}

/// Counters for one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub unchanged: usize,
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    /// Hostnames with no owning zone
    pub unmatched: usize,
}

impl SyncSummary {
    fn start() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            unchanged: 0,
            created: 0,
            updated: 0,
            removed: 0,
            unmatched: 0,
        }
    }

    fn record(&mut self, action: Option<&RecordAction>) {
        match action {
            None => self.unmatched += 1,
            Some(RecordAction::Unchanged) => self.unchanged += 1,
            Some(RecordAction::Created { .. }) => self.created += 1,
            Some(RecordAction::Updated { .. }) => self.updated += 1,
            Some(RecordAction::Removed { .. }) => self.removed += 1,
        }
    }

    /// Number of mutations performed (or planned, in dry-run mode)
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.removed
    }
}

/// Change required to bring one hostname in line with the inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Unchanged,
    Create {
        ip: Ipv4Addr,
    },
    Update {
        record_id: String,
        from: String,
        to: Ipv4Addr,
    },
    Delete {
        record_id: String,
        was: String,
    },
}

/// Strip the trailing separator from a reverse-DNS name
pub fn normalize_hostname(hostname: &str) -> &str {
    hostname.trim_end_matches('.')
}

/// First zone, in provider order, that contains `hostname`
pub fn select_zone<'a>(zones: &'a [Zone], hostname: &str) -> Option<&'a Zone> {
    zones.iter().find(|zone| zone.contains(hostname))
}

/// Decide the action for `hostname` given the existing address records
///
/// # Errors
///
/// `Error::AmbiguousRecord` when more than one record exists, or when the
/// single record has empty content.
pub fn plan(hostname: &str, desired: Option<Ipv4Addr>, existing: &[DnsRecord]) -> Result<Plan> {
    let current = match existing {
        [] => None,
        [record] => {
            if record.content.is_empty() {
                return Err(Error::ambiguous_record(
                    hostname,
                    "existing record has empty content",
                ));
            }
            Some(record)
        }
        records => {
            return Err(Error::ambiguous_record(
                hostname,
                format!("expected either 0 or 1 records, got {}", records.len()),
            ));
        }
    };

    let plan = match (desired, current) {
        (None, None) => Plan::Unchanged,
        (Some(ip), Some(record)) if record.content == ip.to_string() => Plan::Unchanged,
        (Some(ip), None) => Plan::Create { ip },
        (Some(ip), Some(record)) => Plan::Update {
            record_id: record.id.clone(),
            from: record.content.clone(),
            to: ip,
        },
        (None, Some(record)) => Plan::Delete {
            record_id: record.id.clone(),
            was: record.content.clone(),
        },
    };

    Ok(plan)
}

/// Core reconciliation engine
///
/// ## Lifecycle
///
/// 1. Create with [`SyncEngine::new()`]
/// 2. Run one pass with [`SyncEngine::run()`]
/// 3. Drain the event receiver to print status lines
///
/// ## Threading
///
/// One pass is strictly sequential: one hostname at a time, one provider
/// call at a time.
pub struct SyncEngine {
    /// Compute inventory
    inventory: Box<dyn InventorySource>,

    /// DNS record store
    store: Box<dyn DnsStore>,

    /// Skip create/update/delete calls
    dry_run: bool,

    /// Budget for the inventory fetch
    inventory_timeout: Duration,

    /// Event sender for status reporting
    event_tx: mpsc::UnboundedSender<ReconcileEvent>,
}

impl SyncEngine {
    /// Create a new engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields one
    /// [`ReconcileEvent`] per reconciled hostname
    pub fn new(
        inventory: Box<dyn InventorySource>,
        store: Box<dyn DnsStore>,
        config: SyncConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ReconcileEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();

        let engine = Self {
            inventory,
            store,
            dry_run: config.dry_run,
            inventory_timeout: Duration::from_secs(config.inventory_timeout_secs),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Whether mutating calls are skipped
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Fetch the inventory and reconcile every hostname
    pub async fn run(&self) -> Result<SyncSummary> {
        let inventory = self.fetch_inventory().await?;
        self.reconcile(&inventory).await
    }

    /// Fetch the inventory within the configured timeout
    ///
    /// # Errors
    ///
    /// `Error::Provider` if the source fails or exceeds the budget.
    pub async fn fetch_inventory(&self) -> Result<Inventory> {
        debug!(
            "Fetching inventory from {} (timeout {:?})",
            self.inventory.source_name(),
            self.inventory_timeout
        );

        let machines =
            match tokio::time::timeout(self.inventory_timeout, self.inventory.list_machines())
                .await
            {
                Ok(Ok(machines)) => machines,
                Ok(Err(Error::Provider(msg))) => return Err(Error::Provider(msg)),
                Ok(Err(e)) => return Err(Error::provider(e.to_string())),
                Err(_) => {
                    return Err(Error::provider(format!(
                        "{} inventory did not respond within {:?}",
                        self.inventory.source_name(),
                        self.inventory_timeout
                    )));
                }
            };

        let inventory = Inventory::from_machines(machines);
        info!("Inventory holds {} hostname(s)", inventory.len());
        Ok(inventory)
    }

    /// Reconcile the DNS store against `inventory`
    ///
    /// Stops at the first error.
    pub async fn reconcile(&self, inventory: &Inventory) -> Result<SyncSummary> {
        let mut summary = SyncSummary::start();

        let zones = self
            .store
            .list_zones()
            .await
            .map_err(|e| Error::zone_list(e.to_string()))?;
        debug!(
            "{} returned {} zone(s)",
            self.store.provider_name(),
            zones.len()
        );

        for (hostname, desired) in inventory.iter() {
            let action = self.reconcile_hostname(&zones, hostname, desired).await?;
            summary.record(action.as_ref());
        }

        summary.finished_at = Utc::now();
        info!(
            "Reconciled {} hostname(s): {} created, {} updated, {} removed, {} unchanged, {} without zone",
            inventory.len(),
            summary.created,
            summary.updated,
            summary.removed,
            summary.unchanged,
            summary.unmatched
        );
        Ok(summary)
    }

    /// Reconcile one hostname
    ///
    /// Returns `None` when no zone owns the hostname.
    async fn reconcile_hostname(
        &self,
        zones: &[Zone],
        hostname: &str,
        desired: Option<Ipv4Addr>,
    ) -> Result<Option<RecordAction>> {
        let hostname = normalize_hostname(hostname);

        let Some(zone) = select_zone(zones, hostname) else {
            debug!("No zone owns {}, skipping", hostname);
            return Ok(None);
        };

        let existing = self
            .store
            .find_address_records(zone, hostname)
            .await
            .map_err(|e| Error::record_fetch(hostname, e.to_string()))?;

        let action = match plan(hostname, desired, &existing)? {
            Plan::Unchanged => RecordAction::Unchanged,
            Plan::Create { ip } => {
                if !self.dry_run {
                    let spec = AddressRecordSpec::new(hostname, ip);
                    self.store
                        .create_address_record(zone, &spec)
                        .await
                        .map_err(|e| Error::mutation(hostname, "create", e.to_string()))?;
                }
                RecordAction::Created { ip }
            }
            Plan::Update {
                record_id,
                from,
                to,
            } => {
                if !self.dry_run {
                    let spec = AddressRecordSpec::new(hostname, to);
                    self.store
                        .update_address_record(zone, &record_id, &spec)
                        .await
                        .map_err(|e| Error::mutation(hostname, "update", e.to_string()))?;
                }
                RecordAction::Updated { from, to }
            }
            Plan::Delete { record_id, was } => {
                if !self.dry_run {
                    self.store
                        .delete_record(zone, &record_id)
                        .await
                        .map_err(|e| Error::mutation(hostname, "delete", e.to_string()))?;
                }
                RecordAction::Removed { was }
            }
        };

        if action != RecordAction::Unchanged {
            info!(
                "{}{:?} in zone {}",
                if self.dry_run { "[DRY-RUN] " } else { "" },
                action,
                zone.name
            );
        }

        self.emit_event(ReconcileEvent {
            hostname: hostname.to_string(),
            action: action.clone(),
            dry_run: self.dry_run,
        });

        Ok(Some(action))
    }

    /// Emit an engine event
    fn emit_event(&self, event: ReconcileEvent) {
        if self.event_tx.send(event).is_err() {
            warn!("Event receiver dropped, status line lost");
        }
    }
}
