//! In-memory bookkeeping of platform clients and event subscriptions.
//!
//! Only used to refuse duplicate subscriptions inside this process; nothing
//! here is persisted.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default, Clone)]
pub struct ListenerLedger {
    clients: BTreeSet<String>,
    listeners: BTreeMap<String, BTreeSet<String>>,
}

impl ListenerLedger {
    /// Record a listener. Returns `false` if it was already registered.
    pub fn add_listener(&mut self, key: &str, id: &str) -> bool {
        self.listeners
            .entry(key.to_string())
            .or_default()
            .insert(id.to_string())
    }

    pub fn has_listener(&self, key: &str, id: &str) -> bool {
        self.listeners.get(key).is_some_and(|ids| ids.contains(id))
    }

    pub fn remove_listener(&mut self, key: &str, id: &str) {
        if let Some(ids) = self.listeners.get_mut(key) {
            ids.remove(id);
            if ids.is_empty() {
                self.listeners.remove(key);
            }
        }
    }

    pub fn clear_listeners(&mut self, key: &str) {
        self.listeners.remove(key);
    }

    pub fn clear_all(&mut self) {
        self.listeners.clear();
        self.clients.clear();
    }

    pub fn track_client(&mut self, token_hint: &str) {
        self.clients.insert(token_hint.to_string());
    }

    pub fn forget_client(&mut self, token_hint: &str) {
        self.clients.remove(token_hint);
    }

    pub fn active_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn listener_keys(&self) -> Vec<String> {
        self.listeners.keys().cloned().collect()
    }
}
