//! WebSocket subscription registry.
//!
//! Owned by the WebSocket task. Each subscription gets a local handle that
//! survives reconnects; the node's subscription id is only a route to it and
//! is rebound when the subscription is re-issued on a fresh connection.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;

/// A subscription ID returned by `eth_subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection-independent handle for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(pub u64);

/// Message forwarded to a subscription's receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionMessage {
    Notification(Value),
    /// Reconnecting failed; the subscription is gone.
    Lost { attempts: u32 },
}

struct Entry {
    /// Full `eth_subscribe` params, for re-issuing after reconnect.
    params: Vec<Value>,
    server_id: Option<SubscriptionId>,
    sender: mpsc::UnboundedSender<SubscriptionMessage>,
}

/// Tracks active subscriptions across reconnects.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<SubscriptionHandle, Entry>,
    routes: HashMap<SubscriptionId, SubscriptionHandle>,
    next_handle: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription the node just confirmed.
    pub fn register(
        &mut self,
        server_id: SubscriptionId,
        params: Vec<Value>,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<SubscriptionMessage>) {
        self.next_handle += 1;
        let handle = SubscriptionHandle(self.next_handle);
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.insert(server_id.clone(), handle);
        self.entries.insert(
            handle,
            Entry {
                params,
                server_id: Some(server_id),
                sender: tx,
            },
        );
        (handle, rx)
    }

    /// Forward a notification. Returns `false` if no subscription matched.
    ///
    /// A subscription whose receiver has been dropped is removed.
    pub fn dispatch(&mut self, server_id: &SubscriptionId, payload: Value) -> bool {
        let Some(handle) = self.routes.get(server_id).copied() else {
            return false;
        };
        let delivered = self
            .entries
            .get(&handle)
            .is_some_and(|e| e.sender.send(SubscriptionMessage::Notification(payload)).is_ok());
        if !delivered {
            tracing::debug!(subscription = %server_id, "receiver gone, dropping subscription");
            self.remove(handle);
        }
        delivered
    }

    /// Point a re-issued subscription at the node's new id.
    pub fn rebind(&mut self, handle: SubscriptionHandle, server_id: SubscriptionId) -> bool {
        let Some(entry) = self.entries.get_mut(&handle) else {
            return false;
        };
        if let Some(old) = entry.server_id.replace(server_id.clone()) {
            self.routes.remove(&old);
        }
        self.routes.insert(server_id, handle);
        true
    }

    /// Forget every node-side id; called when the connection drops.
    pub fn detach_all(&mut self) {
        self.routes.clear();
        for entry in self.entries.values_mut() {
            entry.server_id = None;
        }
    }

    /// Remove a subscription, returning its current node-side id if bound.
    pub fn remove(&mut self, handle: SubscriptionHandle) -> Option<SubscriptionId> {
        let entry = self.entries.remove(&handle)?;
        if let Some(id) = &entry.server_id {
            self.routes.remove(id);
        }
        entry.server_id
    }

    /// `(handle, params)` of every subscription, for re-subscribing.
    pub fn active(&self) -> Vec<(SubscriptionHandle, Vec<Value>)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|(h, e)| (*h, e.params.clone()))
            .collect();
        out.sort_by_key(|(h, _)| *h);
        out
    }

    /// Tell every subscriber the connection is gone for good, then clear.
    pub fn close_all(&mut self, attempts: u32) {
        for (_, entry) in self.entries.drain() {
            let _ = entry.sender.send(SubscriptionMessage::Lost { attempts });
        }
        self.routes.clear();
    }

    /// Send `Lost` to a single subscription and remove it.
    pub fn close(&mut self, handle: SubscriptionHandle, attempts: u32) {
        if let Some(entry) = self.entries.get(&handle) {
            let _ = entry.sender.send(SubscriptionMessage::Lost { attempts });
        }
        self.remove(handle);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
