//! Registered triggers, grouped by the bot token they listen on.
//!
//! A node id is registered at most once across all tokens; registering it
//! again replaces the previous entry wherever it was.

use std::collections::{BTreeMap, HashMap};

use {
    switchboard_channels::gating,
    switchboard_ipc::{ClientHandle, ConnId},
    switchboard_protocol::{
        TriggerParameters, TriggerRegistration, VoiceTriggerParameters, VoiceTriggerRegistration,
    },
    tracing::warn,
};

use crate::pattern::Pattern;

pub struct TriggerEntry {
    pub node_id: String,
    pub token: String,
    pub params: TriggerParameters,
    /// Compiled content pattern, or why it failed to compile.
    pub matcher: Result<Pattern, String>,
    pub conn: ClientHandle,
}

pub struct VoiceTriggerEntry {
    pub node_id: String,
    pub token: String,
    pub params: VoiceTriggerParameters,
    pub conn: ClientHandle,
}

/// Node ids dropped along with a closed connection.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Removed {
    pub triggers: Vec<String>,
    pub voice: Vec<(String, String)>,
}

impl Removed {
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty() && self.voice.is_empty()
    }
}

#[derive(Default)]
pub struct TriggerRegistry {
    triggers: HashMap<String, BTreeMap<String, TriggerEntry>>,
    voice: HashMap<String, BTreeMap<String, VoiceTriggerEntry>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a trigger. Returns `true` if the node was already
    /// registered.
    pub fn register(&mut self, registration: TriggerRegistration, conn: ClientHandle) -> bool {
        let TriggerRegistration {
            node_id,
            token,
            parameters,
        } = registration;
        let replaced = self.remove(&node_id).is_some();
        let matcher = Pattern::from_parameters(&parameters).map_err(|e| {
            warn!(node_id = %node_id, error = %e, "trigger pattern does not compile");
            e.to_string()
        });
        self.triggers.entry(token.clone()).or_default().insert(
            node_id.clone(),
            TriggerEntry {
                node_id,
                token,
                params: parameters,
                matcher,
                conn,
            },
        );
        replaced
    }

    pub fn remove(&mut self, node_id: &str) -> Option<TriggerEntry> {
        let token = self
            .triggers
            .iter()
            .find(|(_, nodes)| nodes.contains_key(node_id))
            .map(|(token, _)| token.clone())?;
        let nodes = self.triggers.get_mut(&token)?;
        let entry = nodes.remove(node_id);
        if nodes.is_empty() {
            self.triggers.remove(&token);
        }
        entry
    }

    pub fn register_voice(
        &mut self,
        registration: VoiceTriggerRegistration,
        conn: ClientHandle,
    ) -> bool {
        let VoiceTriggerRegistration {
            node_id,
            token,
            parameters,
        } = registration;
        let replaced = self.remove_voice(&node_id).is_some();
        self.voice.entry(token.clone()).or_default().insert(
            node_id.clone(),
            VoiceTriggerEntry {
                node_id,
                token,
                params: parameters,
                conn,
            },
        );
        replaced
    }

    pub fn remove_voice(&mut self, node_id: &str) -> Option<VoiceTriggerEntry> {
        let token = self
            .voice
            .iter()
            .find(|(_, nodes)| nodes.contains_key(node_id))
            .map(|(token, _)| token.clone())?;
        let nodes = self.voice.get_mut(&token)?;
        let entry = nodes.remove(node_id);
        if nodes.is_empty() {
            self.voice.remove(&token);
        }
        entry
    }

    /// Drop every trigger owned by `conn`. Voice nodes come back paired
    /// with their token.
    pub fn remove_connection(&mut self, conn: ConnId) -> Removed {
        let mut removed = Removed::default();
        for nodes in self.triggers.values_mut() {
            nodes.retain(|node_id, entry| {
                let keep = entry.conn.id != conn;
                if !keep {
                    removed.triggers.push(node_id.clone());
                }
                keep
            });
        }
        self.triggers.retain(|_, nodes| !nodes.is_empty());
        for (token, nodes) in &mut self.voice {
            nodes.retain(|node_id, entry| {
                let keep = entry.conn.id != conn;
                if !keep {
                    removed.voice.push((token.clone(), node_id.clone()));
                }
                keep
            });
        }
        self.voice.retain(|_, nodes| !nodes.is_empty());
        removed
    }

    pub fn triggers(&self, token: &str) -> impl Iterator<Item = &TriggerEntry> {
        self.triggers.get(token).into_iter().flat_map(BTreeMap::values)
    }

    pub fn trigger(&self, token: &str, node_id: &str) -> Option<&TriggerEntry> {
        self.triggers.get(token)?.get(node_id)
    }

    pub fn voice_triggers(&self, token: &str) -> impl Iterator<Item = &VoiceTriggerEntry> {
        self.voice.get(token).into_iter().flat_map(BTreeMap::values)
    }

    pub fn voice_trigger(&self, node_id: &str) -> Option<&VoiceTriggerEntry> {
        self.voice.values().find_map(|nodes| nodes.get(node_id))
    }

    /// Whether any voice trigger on `token` still monitors `channel_id`. A
    /// trigger without a channel list monitors every channel.
    pub fn monitors_voice_channel(&self, token: &str, channel_id: &str) -> bool {
        self.voice_triggers(token)
            .any(|entry| gating::is_allowed(channel_id, &entry.params.voice_channel_ids))
    }

    pub fn len(&self) -> usize {
        self.triggers.values().map(BTreeMap::len).sum()
    }

    pub fn voice_len(&self) -> usize {
        self.voice.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.voice_len() == 0
    }

    pub fn clear(&mut self) {
        self.triggers.clear();
        self.voice.clear();
    }
}
