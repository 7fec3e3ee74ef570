// # vmdns-core
//
// Core library for reconciling hosted-DNS address records with the public
// IPs of cloud virtual machines.
//
// ## Architecture Overview
//
// - **InventorySource**: Trait for reading hostname → IP pairs from a compute provider
// - **DnsStore**: Trait for listing zones and mutating address records
// - **Credential**: Typed DNS credential parsed from a `key = value` file
// - **SyncEngine**: Single-pass engine deciding create/update/delete per hostname
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Decision logic is separate from provider adapters
// 2. **All-or-nothing**: The first error aborts the pass; re-running is the retry
// 3. **Dry-run first**: Every action can be computed and reported without mutating
// 4. **Library-First**: The binary is a thin wiring layer over this crate

pub mod traits;
pub mod engine;
pub mod config;
pub mod error;

// Re-export core types for convenience
pub use traits::{InventorySource, DnsStore, Inventory, MachineRecord, Zone, DnsRecord, AddressRecordSpec};
pub use engine::{SyncEngine, SyncSummary, ReconcileEvent, RecordAction};
pub use config::{Credential, SyncConfig};
pub use error::{Error, Result};
