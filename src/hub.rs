//! Hub — client registry and router.
//!
//! DESIGN
//! ======
//! The registry is one `HashMap<String, Client>` behind a tokio `RwLock`.
//! Register and unregister take the write lock; routing takes the read lock,
//! so lookups run concurrently with each other but never observe a
//! half-applied insert or delete.
//!
//! The registry entry owns the only `Sender` of a client's outbound queue.
//! Removing the entry drops the sender, which closes the queue and tells the
//! client's write loop to send a close frame and exit. Closure therefore
//! happens exactly once, at removal, and a second removal attempt finds
//! nothing to close.
//!
//! BACKPRESSURE
//! ============
//! Delivery is `try_send` only. A full queue means the consumer has stalled;
//! the router evicts it instead of blocking or buffering without bound. The
//! sender is never told.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use frames::Notice;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HubError {
    #[error("client id already registered: {0}")]
    DuplicateId(String),
}

/// One registered connection as seen by the registry.
#[derive(Debug)]
pub struct Client {
    id: String,
    /// Connection serial assigned at registration.
    conn: u64,
    tx: mpsc::Sender<String>,
}

impl Client {
    /// Allocate a client and its bounded outbound queue. The receiver belongs
    /// to the connection's write loop.
    #[must_use]
    pub fn new(id: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { id: id.into(), conn: 0, tx }, rx)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn key(&self) -> ClientKey {
        ClientKey { id: self.id.clone(), conn: self.conn }
    }
}

/// Handle a connection keeps to address its own registry entry.
///
/// Carries the connection serial so a stale key never removes a later
/// registration that happens to reuse the identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey {
    pub id: String,
    conn: u64,
}

/// What happened to a routed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Enqueued on the target's outbound queue.
    Delivered,
    /// No client registered under the target identifier.
    UnknownTarget,
    /// Target queue was full; this call removed the target.
    Evicted,
    /// Target was already going away (write loop gone, or evicted by a
    /// concurrent route). Frame discarded.
    Dropped,
}

// =============================================================================
// HUB
// =============================================================================

#[derive(Clone, Default)]
pub struct Hub {
    clients: Arc<RwLock<HashMap<String, Client>>>,
    next_conn: Arc<AtomicU64>,
}

impl Hub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client.
    ///
    /// The welcome notice is enqueued before the client becomes visible to
    /// routers, so it is always the first frame the client receives. A
    /// peer-list notice follows when others are connected, and every existing
    /// client is sent its refreshed peer list.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DuplicateId`] if the identifier is already taken.
    /// The existing registration is left untouched.
    pub async fn register(&self, mut client: Client) -> Result<ClientKey, HubError> {
        let mut clients = self.clients.write().await;
        if clients.contains_key(&client.id) {
            return Err(HubError::DuplicateId(client.id));
        }

        client.conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let key = client.key();

        let welcome = Notice::Welcome { id: client.id.clone() }.render();
        if client.tx.try_send(welcome).is_err() {
            warn!(client_id = %key.id, "hub: welcome notice not enqueued");
        }
        let peers = sorted_ids(&clients, None);
        if !peers.is_empty() && client.tx.try_send(Notice::Peers(peers).render()).is_err() {
            warn!(client_id = %key.id, "hub: peer list not enqueued");
        }

        clients.insert(key.id.clone(), client);

        let mut stalled = Vec::new();
        for (id, peer) in clients.iter() {
            if *id == key.id {
                continue;
            }
            let notice = Notice::Peers(sorted_ids(&clients, Some(id))).render();
            if peer.tx.try_send(notice).is_err() {
                stalled.push(peer.key());
            }
        }
        for stale in &stalled {
            if remove_if_current(&mut clients, stale) {
                warn!(client_id = %stale.id, "hub: peer unreachable on join, client evicted");
            }
        }

        info!(client_id = %key.id, clients = clients.len(), "hub: client registered");
        Ok(key)
    }

    /// Remove a client and close its queue. Returns `false` when the client
    /// was already gone, in which case nothing happens.
    pub async fn unregister(&self, key: &ClientKey) -> bool {
        let mut clients = self.clients.write().await;
        let removed = remove_if_current(&mut clients, key);
        if removed {
            info!(client_id = %key.id, clients = clients.len(), "hub: client unregistered");
        } else {
            debug!(client_id = %key.id, "hub: unregister for absent client ignored");
        }
        removed
    }

    /// Deliver a raw frame to `target` without blocking.
    pub async fn route(&self, target: &str, frame: String) -> RouteOutcome {
        let (stale, full) = {
            let clients = self.clients.read().await;
            let Some(client) = clients.get(target) else {
                info!(to = %target, "hub: target client not found, message dropped");
                return RouteOutcome::UnknownTarget;
            };
            match client.tx.try_send(frame) {
                Ok(()) => {
                    debug!(to = %target, "hub: message forwarded");
                    return RouteOutcome::Delivered;
                }
                Err(TrySendError::Full(_)) => (client.key(), true),
                Err(TrySendError::Closed(_)) => (client.key(), false),
            }
        };

        // Read lock released; re-check identity under the write lock so racing
        // routers remove the target once between them.
        let mut clients = self.clients.write().await;
        let removed = remove_if_current(&mut clients, &stale);
        match (removed, full) {
            (true, true) => {
                warn!(to = %target, "hub: outbound queue full, client evicted");
                RouteOutcome::Evicted
            }
            (true, false) => {
                info!(to = %target, "hub: target write loop gone, stale entry removed");
                RouteOutcome::Dropped
            }
            (false, _) => {
                debug!(to = %target, "hub: target already removed, message dropped");
                RouteOutcome::Dropped
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.clients.read().await.contains_key(id)
    }

    /// Sorted identifiers of every registered client.
    pub async fn ids(&self) -> Vec<String> {
        let clients = self.clients.read().await;
        sorted_ids(&clients, None)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn remove_if_current(clients: &mut HashMap<String, Client>, key: &ClientKey) -> bool {
    let current = clients.get(&key.id).is_some_and(|c| c.conn == key.conn);
    if current {
        clients.remove(&key.id);
    }
    current
}

fn sorted_ids(clients: &HashMap<String, Client>, except: Option<&String>) -> Vec<String> {
    let mut ids: Vec<String> = clients
        .keys()
        .filter(|id| Some(*id) != except)
        .cloned()
        .collect();
    ids.sort_unstable();
    ids
}

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;
