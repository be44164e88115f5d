//! Routing of platform events to registered triggers.
//!
//! Filters that need only the event run first; a platform round-trip (the
//! replied-to message, the reacted-to message) happens once per event and
//! only when some trigger is still a candidate. The fetch runs in a spawned
//! task and the remaining steps resume on the actor.

use std::sync::Arc;

use {
    serde::Serialize,
    switchboard_channels::{PlatformClient, PlatformEvent},
    switchboard_common::types::{GuildRef, Message, Reaction},
    switchboard_protocol::{
        ToggleAction, TriggerType,
        events::{
            MemberPayload, MemberUpdatePayload, MessageCreatePayload, ReactionPayload,
            RolePayload, RoleUpdatePayload,
        },
        names,
    },
    tracing::{debug, info, trace, warn},
};

use crate::{
    coordinator::{Coordinator, Internal, Routed},
    debounce::{DebounceKey, Fired, Offer, TimerFired, Timing},
    filters::{self, SkipReason},
    pool::token_hint,
    registry::TriggerEntry,
    support::{self, Decision},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, coordinator as coord_metrics, labels};

fn skipped(node_id: &str, reason: SkipReason) {
    trace!(node_id, reason = reason.as_str(), "trigger skipped");
    #[cfg(feature = "metrics")]
    counter!(coord_metrics::SKIPS_TOTAL, labels::REASON => reason.as_str()).increment(1);
}

/// Every check of a message trigger that does not need the replied-to
/// message.
fn evaluate_message(
    entry: &TriggerEntry,
    message: &Message,
    own_user_id: &str,
    channel_disabled: bool,
) -> filters::Check {
    filters::message(&entry.params, message, own_user_id, channel_disabled)?;
    let pattern = entry
        .matcher
        .as_ref()
        .map_err(|_| SkipReason::InvalidPattern)?;
    if !pattern.is_match(&message.content, message.mentions_user(own_user_id)) {
        return Err(SkipReason::Pattern);
    }
    filters::attachments(&entry.params, message)
}

impl Coordinator {
    pub(crate) async fn on_platform_event(&mut self, token: &str, event: PlatformEvent) {
        #[cfg(feature = "metrics")]
        counter!(coord_metrics::EVENTS_ROUTED_TOTAL, labels::EVENT => event.name()).increment(1);
        let Some(client) = self.pool.client(token) else {
            return;
        };
        match event {
            PlatformEvent::MessageCreate(message) => self.on_message(token, client, message).await,
            PlatformEvent::MemberAdd { member, guild } => {
                let kind = TriggerType::UserJoin;
                self.route_guild_event(token, kind, &guild, names::GUILD_MEMBER_ADD, |node_id| {
                    MemberPayload {
                        guild_member: member.clone(),
                        guild: guild.clone(),
                        user: member.user.clone(),
                        node_id,
                    }
                })
            },
            PlatformEvent::MemberRemove { member, guild } => {
                let kind = TriggerType::UserLeave;
                self.route_guild_event(token, kind, &guild, names::GUILD_MEMBER_REMOVE, |node_id| {
                    MemberPayload {
                        guild_member: member.clone(),
                        guild: guild.clone(),
                        user: member.user.clone(),
                        node_id,
                    }
                })
            },
            PlatformEvent::MemberUpdate { old, new, guild } => {
                let kind = TriggerType::UserUpdate;
                self.route_guild_event(token, kind, &guild, names::GUILD_MEMBER_UPDATE, |node_id| {
                    MemberUpdatePayload {
                        old_member: old.clone(),
                        new_member: new.clone(),
                        guild: guild.clone(),
                        node_id,
                    }
                })
            },
            PlatformEvent::RoleCreate(role) => {
                let guild = role.guild.clone();
                let kind = TriggerType::RoleCreate;
                self.route_guild_event(token, kind, &guild, names::ROLE_CREATE, |node_id| {
                    RolePayload {
                        role: role.clone(),
                        guild: guild.clone(),
                        node_id,
                    }
                })
            },
            PlatformEvent::RoleDelete(role) => {
                let guild = role.guild.clone();
                let kind = TriggerType::RoleDelete;
                self.route_guild_event(token, kind, &guild, names::ROLE_DELETE, |node_id| {
                    RolePayload {
                        role: role.clone(),
                        guild: guild.clone(),
                        node_id,
                    }
                })
            },
            PlatformEvent::RoleUpdate { old, new } => {
                if !old.differs_meaningfully(&new) {
                    trace!(role_id = %new.id, "role update without visible change");
                    return;
                }
                let guild = new.guild.clone();
                let kind = TriggerType::RoleUpdate;
                self.route_guild_event(token, kind, &guild, names::ROLE_UPDATE, |node_id| {
                    RoleUpdatePayload {
                        old_role: old.clone(),
                        new_role: new.clone(),
                        guild: guild.clone(),
                        node_id,
                    }
                })
            },
            PlatformEvent::ReactionAdd(reaction) => self.on_reaction(token, client, reaction, true),
            PlatformEvent::ReactionRemove(reaction) => {
                self.on_reaction(token, client, reaction, false)
            },
            PlatformEvent::VoiceStateUpdate { old, new } => self.on_voice_state(token, &old, &new),
            PlatformEvent::Error(message) => {
                warn!(token = token_hint(token), error = %message, "platform client error");
            },
        }
    }

    /// Member and role events only filter on the guild.
    fn route_guild_event<T: Serialize>(
        &self,
        token: &str,
        kind: TriggerType,
        guild: &GuildRef,
        name: &'static str,
        build: impl Fn(String) -> T,
    ) {
        for entry in self.registry.triggers(token).filter(|e| e.params.kind == kind) {
            match filters::guild(&entry.params, Some(&guild.id)) {
                Ok(()) => Self::emit(&entry.conn, &entry.node_id, name, &build(entry.node_id.clone())),
                Err(reason) => skipped(&entry.node_id, reason),
            }
        }
    }

    // ── Messages ────────────────────────────────────────────────────────────

    async fn on_message(&mut self, token: &str, client: Arc<dyn PlatformClient>, message: Message) {
        if let Some(action) = support::parse_command(&message.content) {
            self.on_support_command(client, message, action).await;
            return;
        }

        let own_user_id = client.user_id().to_string();
        let channel_disabled = self.disabled.is_disabled(&message.channel_id);
        let mut candidates = Vec::new();
        for entry in self.registry.triggers(token).filter(|e| e.params.kind.is_message()) {
            match evaluate_message(entry, &message, &own_user_id, channel_disabled) {
                Ok(()) => candidates.push(entry.node_id.clone()),
                Err(reason) => skipped(&entry.node_id, reason),
            }
        }
        if candidates.is_empty() {
            return;
        }

        let Some(reference) = message.reference.clone() else {
            self.deliver_message(token, &message, None, &candidates);
            return;
        };
        let internal = self.internal_tx.clone();
        let token = token.to_string();
        tokio::spawn(async move {
            match client
                .fetch_message(&reference.channel_id, &reference.message_id)
                .await
            {
                Ok(resolved) => {
                    let _ = internal.send(Internal::MessageResolved {
                        token,
                        message,
                        reference: Some(resolved),
                        candidates,
                    });
                },
                Err(e) => {
                    debug!(message_id = %message.id, error = %e, "referenced message unavailable");
                    for node_id in &candidates {
                        skipped(node_id, SkipReason::ReferenceUnavailable);
                    }
                },
            }
        });
    }

    async fn on_support_command(
        &mut self,
        client: Arc<dyn PlatformClient>,
        message: Message,
        action: ToggleAction,
    ) {
        let reply = match support::authorize(&message, action) {
            Decision::Rejected(reply) => reply,
            Decision::Apply(action) => {
                match self.disabled.apply(&message.channel_id, action).await {
                    Ok(()) => {
                        info!(channel_id = %message.channel_id, ?action, user_id = %message.author.id, "channel toggled by command");
                        support::confirmation(action)
                    },
                    Err(e) => {
                        warn!(channel_id = %message.channel_id, error = %e, "support command failed");
                        support::FAILURE_REPLY
                    },
                }
            },
        };
        tokio::spawn(async move {
            if let Err(e) = client.reply(&message, reply).await {
                warn!(channel_id = %message.channel_id, error = %e, "failed to answer support command");
            }
        });
    }

    /// Hand matched message triggers to the debouncer. Triggers removed
    /// while the reference was being fetched are skipped.
    pub(crate) fn deliver_message(
        &mut self,
        token: &str,
        message: &Message,
        reference: Option<&Message>,
        candidates: &[String],
    ) {
        for node_id in candidates {
            let Some(entry) = self.registry.trigger(token, node_id) else {
                continue;
            };
            let timing = Timing::from_parameters(&entry.params);
            let key = DebounceKey::new(&message.channel_id, &message.author.id, node_id);
            let routed = Routed {
                token: token.to_string(),
                payload: MessageCreatePayload::new(message.clone(), reference.cloned(), node_id),
            };
            match self.debouncer.offer(key, routed, timing) {
                Offer::EmitNow(routed) => self.emit_message(&routed),
                Offer::Deferred { delay } => {
                    debug!(node_id = %node_id, delay_ms = delay.as_millis() as u64, "emission deferred");
                },
            }
        }
    }

    pub(crate) fn on_debounce_fired(&mut self, fired: TimerFired) {
        let node_id = fired.key.node_id.clone();
        match self.debouncer.fire(fired) {
            Fired::Emit(routed) => self.emit_message(&routed),
            Fired::Rescheduled { delay } => {
                debug!(node_id = %node_id, delay_ms = delay.as_millis() as u64, "cooldown active, emission rescheduled");
                #[cfg(feature = "metrics")]
                counter!(coord_metrics::DEBOUNCE_RESCHEDULES_TOTAL).increment(1);
            },
            Fired::Dropped => {
                warn!(node_id = %node_id, "pending emission dropped after repeated cooldown reschedules");
                #[cfg(feature = "metrics")]
                counter!(coord_metrics::DEBOUNCE_DROPPED_TOTAL).increment(1);
            },
            Fired::Stale => {},
        }
    }

    fn emit_message(&self, routed: &Routed) {
        let node_id = &routed.payload.node_id;
        match self.registry.trigger(&routed.token, node_id) {
            Some(entry) => Self::emit(&entry.conn, node_id, names::MESSAGE_CREATE, &routed.payload),
            None => debug!(node_id = %node_id, "trigger gone before emission"),
        }
    }

    // ── Reactions ───────────────────────────────────────────────────────────

    fn on_reaction(
        &self,
        token: &str,
        client: Arc<dyn PlatformClient>,
        reaction: Reaction,
        added: bool,
    ) {
        let kind = if added {
            TriggerType::MessageReactionAdd
        } else {
            TriggerType::MessageReactionRemove
        };
        let own_user_id = client.user_id().to_string();
        let mut candidates = Vec::new();
        for entry in self.registry.triggers(token).filter(|e| e.params.kind == kind) {
            match filters::reaction_early(&entry.params, &reaction, &own_user_id) {
                Ok(()) => candidates.push(entry.node_id.clone()),
                Err(reason) => skipped(&entry.node_id, reason),
            }
        }
        if candidates.is_empty() {
            return;
        }

        let internal = self.internal_tx.clone();
        let token = token.to_string();
        tokio::spawn(async move {
            match client
                .fetch_message(&reaction.channel_id, &reaction.message_id)
                .await
            {
                Ok(message) => {
                    let _ = internal.send(Internal::ReactionResolved {
                        token,
                        reaction,
                        added,
                        message,
                        candidates,
                    });
                },
                Err(e) => {
                    debug!(message_id = %reaction.message_id, error = %e, "reacted message unavailable");
                    for node_id in &candidates {
                        skipped(node_id, SkipReason::ReferenceUnavailable);
                    }
                },
            }
        });
    }

    pub(crate) fn deliver_reaction(
        &self,
        token: &str,
        reaction: &Reaction,
        added: bool,
        message: &Message,
        candidates: &[String],
    ) {
        let name = if added {
            names::MESSAGE_REACTION_ADD
        } else {
            names::MESSAGE_REACTION_REMOVE
        };
        for node_id in candidates {
            let Some(entry) = self.registry.trigger(token, node_id) else {
                continue;
            };
            if let Err(reason) = filters::reaction_late(&entry.params, reaction, message) {
                skipped(node_id, reason);
                continue;
            }
            let payload = ReactionPayload {
                message_reaction: reaction.clone(),
                message: message.clone(),
                user: reaction.user.clone(),
                guild: message.guild.clone(),
                node_id: node_id.clone(),
            };
            Self::emit(&entry.conn, node_id, name, &payload);
        }
    }
}
