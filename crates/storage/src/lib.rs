//! Durable state for group 0
//!
//! This crate provides a minimal namespaced key-value interface that storage
//! backends implement, and [`SystemStore`], the typed view of the records
//! group 0 keeps across restarts:
//! - the peers learned during discovery
//! - the group 0 id, written once
//! - the upgrade progress marker
//! - this node's server id and bootstrap marker

pub mod kv;
pub mod system;

pub use kv::{KeyValueStorage, StorageError, StorageKey, StorageNamespace, StorageResult};
pub use system::{SystemStore, UpgradeState};
