//! Core traits for the reconciliation system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`InventorySource`]: Read the VM inventory from a compute provider
//! - [`DnsStore`]: List zones and create/update/delete address records

pub mod inventory_source;
pub mod dns_store;

pub use inventory_source::{InventorySource, Inventory, MachineRecord};
pub use dns_store::{DnsStore, DnsRecord, Zone, AddressRecordSpec, ADDRESS_RECORD_TYPE};
