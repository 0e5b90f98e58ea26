//! Client registry
//!
//! Application-owned map of `(scope, seed)` to shared [`ScopeClient`]
//! handles, so adapters can reuse one session per deployment instead of
//! relying on process-wide singletons.

use std::sync::Arc;

use dashmap::DashMap;
use scope_core::{ClientOptions, Result, ScopeConfig};
use tracing::{debug, info};

use crate::client::ScopeClient;

/// Registry key: normalized scope URL and seed
pub type ClientKey = (String, String);

#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<DashMap<ClientKey, ScopeClient>>,
    options: ClientOptions,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options used for clients the registry creates
    pub fn with_options(options: ClientOptions) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            options,
        }
    }

    /// Shared client for `config`, created on first use.
    ///
    /// Clients are keyed by the seed they were created with; a client that
    /// later `connect`s elsewhere stays under its original key.
    pub fn get_or_connect(&self, config: ScopeConfig) -> Result<ScopeClient> {
        let key = (config.scope.clone(), config.seed.clone());
        if let Some(client) = self.clients.get(&key) {
            if !client.is_closed() {
                return Ok(client.clone());
            }
        }

        let entry = self.clients.entry(key);
        match entry {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().is_closed() {
                    debug!(scope = %config.scope, "[ClientRegistry] Replacing closed client");
                    let client = ScopeClient::with_options(config, self.options.clone())?;
                    occupied.insert(client.clone());
                    Ok(client)
                } else {
                    Ok(occupied.get().clone())
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                info!(scope = %config.scope, seed = %config.seed, "[ClientRegistry] New client");
                let client = ScopeClient::with_options(config, self.options.clone())?;
                vacant.insert(client.clone());
                Ok(client)
            }
        }
    }

    pub fn get(&self, scope: &str, seed: &str) -> Option<ScopeClient> {
        self.clients
            .get(&(scope.to_string(), seed.to_string()))
            .map(|c| c.clone())
    }

    /// Forget a client without closing it
    pub fn remove(&self, scope: &str, seed: &str) -> Option<ScopeClient> {
        self.clients
            .remove(&(scope.to_string(), seed.to_string()))
            .map(|(_, client)| client)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Close and forget every client
    pub async fn close_all(&self) {
        let keys: Vec<ClientKey> = self.clients.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, client)) = self.clients.remove(&key) {
                client.close().await;
            }
        }
        debug!("[ClientRegistry] All clients closed");
    }
}
