//! Memoized Azure transport.
//!
//! The transport is built on first use and bound to the settings snapshot
//! it was built from.  Asking for a client with different settings, or
//! calling [`ClientCache::invalidate`], rebuilds it.

use std::sync::{Arc, RwLock};
use tracing::info;

use super::azure::AzureBlobTransport;
use crate::config::AzureSettings;
use crate::credentials::resolve_credentials;
use crate::errors::TransportError;

/// Lazily built transport handle plus the settings it reflects.
#[derive(Default)]
pub struct ClientCache {
    slot: RwLock<Option<(AzureSettings, Arc<AzureBlobTransport>)>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached transport for `settings`, building it if the cache
    /// is empty or holds a client for other settings.
    pub fn get_or_build(
        &self,
        settings: &AzureSettings,
    ) -> Result<Arc<AzureBlobTransport>, TransportError> {
        if let Ok(slot) = self.slot.read() {
            if let Some((cached_for, client)) = slot.as_ref() {
                if cached_for == settings {
                    return Ok(Arc::clone(client));
                }
            }
        }

        let mut slot = self
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Another caller may have rebuilt while we waited for the lock.
        if let Some((cached_for, client)) = slot.as_ref() {
            if cached_for == settings {
                return Ok(Arc::clone(client));
            }
            info!("Azure settings changed, rebuilding blob client");
        }

        let client = Arc::new(AzureBlobTransport::new(
            resolve_credentials(settings),
            settings.container_name.clone(),
            &settings.endpoint_suffix,
        )?);
        *slot = Some((settings.clone(), Arc::clone(&client)));
        Ok(client)
    }

    /// Drop the cached transport; the next call rebuilds it.
    pub fn invalidate(&self) {
        let mut slot = self
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
    }

    pub fn is_cached(&self) -> bool {
        self.slot.read().map(|s| s.is_some()).unwrap_or(false)
    }
}
