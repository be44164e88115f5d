//! Voice state routing and voice session bookkeeping.

use {
    switchboard_channels::gating,
    switchboard_common::types::{ChannelRef, RoleRef, User, VoiceState},
    switchboard_protocol::{
        VoiceMode,
        events::{VoiceActivityAction, VoiceActivityPayload, VoiceErrorPayload, VoiceStateUpdatePayload},
        names,
    },
    switchboard_voice::{RecordingTarget, VoiceEvent, user_passes},
    tracing::{debug, info, trace},
};

use crate::{coordinator::Coordinator, pool::token_hint};

impl Coordinator {
    pub(crate) fn on_voice_state(&mut self, token: &str, old: &VoiceState, new: &VoiceState) {
        let guild = &new.guild;
        let channel_id = new.channel_id().or(old.channel_id());
        let (user, roles): (User, Vec<RoleRef>) = new
            .member
            .as_ref()
            .or(old.member.as_ref())
            .map(|m| (m.user.clone(), m.roles.clone()))
            .unwrap_or_default();
        let joined = match (&new.channel, &old.channel) {
            (Some(channel), None) => Some(channel),
            _ => None,
        };

        let mut joins: Vec<(ChannelRef, RecordingTarget)> = Vec::new();
        for entry in self.registry.voice_triggers(token) {
            let params = &entry.params;
            if !gating::is_allowed(&guild.id, &params.guild_ids) {
                trace!(node_id = %entry.node_id, "voice trigger skipped: guild");
                continue;
            }
            if !gating::is_allowed_opt(channel_id, &params.voice_channel_ids) {
                trace!(node_id = %entry.node_id, "voice trigger skipped: channel");
                continue;
            }
            if !user_passes(&params.user_filters, &user, &roles) {
                trace!(node_id = %entry.node_id, "voice trigger skipped: user filters");
                continue;
            }
            match params.voice_mode {
                VoiceMode::VoiceState => {
                    let payload = VoiceStateUpdatePayload {
                        old_state: old.into(),
                        new_state: new.into(),
                        member: new.member.clone(),
                        guild: guild.clone(),
                        node_id: entry.node_id.clone(),
                    };
                    Self::emit(&entry.conn, &entry.node_id, names::VOICE_STATE_UPDATE, &payload);
                },
                VoiceMode::VoiceActivity => {
                    let Some(action) = VoiceActivityAction::classify(old.channel_id(), new.channel_id())
                    else {
                        continue;
                    };
                    let payload = VoiceActivityPayload {
                        action,
                        user: user.clone(),
                        old_channel_id: old.channel_id().map(str::to_string),
                        new_channel_id: new.channel_id().map(str::to_string),
                        guild: guild.clone(),
                        node_id: entry.node_id.clone(),
                    };
                    Self::emit(&entry.conn, &entry.node_id, names::VOICE_ACTIVITY, &payload);
                },
                VoiceMode::VoiceRecording => {
                    if let Some(channel) = joined
                        && params.additional_options.auto_join
                    {
                        joins.push((channel.clone(), RecordingTarget::new(&entry.node_id, params)));
                    }
                },
            }
        }

        let Some(voice) = self.pool.voice_mut(token) else {
            return;
        };
        for (channel, target) in joins {
            if voice.ensure_session(guild, &channel, target) {
                debug!(guild_id = %guild.id, channel_id = %channel.id, "joining voice channel");
            }
            voice.schedule_idle_check(&guild.id, &channel.id);
        }
        if let Some(left) = old.channel_id()
            && new.channel_id() != Some(left)
        {
            voice.schedule_idle_check(&old.guild.id, left);
        }
    }

    pub(crate) fn on_voice_event(&mut self, event: VoiceEvent) {
        match event {
            VoiceEvent::Ready { owner, session } => {
                debug!(token = token_hint(&owner), %session, "voice session ready");
            },
            VoiceEvent::Recording { node_id, payload } => {
                match self.registry.voice_trigger(&node_id) {
                    Some(entry) => Self::emit(&entry.conn, &node_id, names::VOICE_RECORDING, &*payload),
                    None => debug!(node_id = %node_id, "voice trigger gone, recording dropped"),
                }
            },
            VoiceEvent::Error { node_id, message } => {
                if let Some(entry) = self.registry.voice_trigger(&node_id) {
                    let payload = VoiceErrorPayload::new(message, &node_id);
                    Self::emit(&entry.conn, &node_id, names::VOICE_ERROR, &payload);
                }
            },
            VoiceEvent::Idle { owner, session, id } => {
                if let Some(voice) = self.pool.voice_mut(&owner)
                    && voice.end_session(&session, id)
                {
                    info!(%session, "left empty voice channel");
                }
            },
            VoiceEvent::Closed { owner, session, id } => {
                if let Some(voice) = self.pool.voice_mut(&owner) {
                    voice.end_session(&session, id);
                }
            },
        }
    }

    /// Detach `node_id` from the sessions of `token` and leave every channel
    /// no remaining voice trigger monitors.
    pub(crate) fn prune_voice_sessions(&mut self, token: &str, node_id: &str) {
        let registry = &self.registry;
        let Some(voice) = self.pool.voice_mut(token) else {
            return;
        };
        voice.remove_target(node_id);
        voice.retain(|key| registry.monitors_voice_channel(token, &key.channel_id));
    }
}
