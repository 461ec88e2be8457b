//! Azure Blob Storage upload store.
//!
//! Stores a forum's uploads (original files and optimized image variants)
//! in one Azure container, soft-deletes removed files into a `tombstone/`
//! namespace, purges tombstones after a grace period, and warns the
//! administrators before a configured SAS token expires.
//!
//! The host selects the store at startup through [`store::select_store`]
//! and drives [`jobs::run_sweep`] and [`jobs::run_expiry_check`] from its
//! own scheduler.

pub mod cdn;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod jobs;
pub mod metrics;
pub mod paths;
pub mod storage;
pub mod store;
pub mod tombstone;
pub mod watchdog;
