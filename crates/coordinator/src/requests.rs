//! Handlers for client requests that call the platform.
//!
//! Each runs in its own task and answers on the requesting connection.

use std::{sync::Arc, time::Duration};

use {
    switchboard_channels::{ConfirmationPrompt, OutboundMessage, PlatformClient},
    switchboard_common::types::{ChannelInfo, ChannelKind},
    switchboard_ipc::ClientHandle,
    switchboard_protocol::{
        ListOption,
        actions::{
            ActionDone, ActionParameters, ActionType, ConfirmationParameters, ConfirmationResult,
            SendMessageParameters, SentMessage,
        },
        names,
    },
    tracing::{debug, warn},
};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Guilds,
    Channels,
    Categories,
    Roles,
    VoiceChannels,
}

impl ListKind {
    pub fn reply_name(self) -> &'static str {
        match self {
            Self::Guilds => names::LIST_GUILDS,
            Self::Channels => names::LIST_CHANNELS,
            Self::Categories => names::LIST_CATEGORIES,
            Self::Roles => names::LIST_ROLES,
            Self::VoiceChannels => names::LIST_VOICE_CHANNELS,
        }
    }
}

/// Options for a node's dropdowns. Everything but guilds is restricted to
/// `guild_ids`.
pub async fn list(
    client: Arc<dyn PlatformClient>,
    kind: ListKind,
    guild_ids: &[String],
) -> Result<Vec<ListOption>> {
    let guilds = client.guilds().await?;
    if kind == ListKind::Guilds {
        return Ok(guilds
            .into_iter()
            .map(|g| ListOption::new(g.name, g.id))
            .collect());
    }

    let mut options = Vec::new();
    for guild in guilds.iter().filter(|g| guild_ids.contains(&g.id)) {
        if kind == ListKind::Roles {
            for role in client.roles(&guild.id).await? {
                options.push(ListOption::new(role.name, role.id));
            }
            continue;
        }
        for channel in client.channels(&guild.id).await? {
            let name = match (kind, channel.kind) {
                (ListKind::Channels, ChannelKind::GuildText)
                | (ListKind::Categories, ChannelKind::GuildCategory) => channel.name,
                (ListKind::VoiceChannels, k) if k.is_voice() => {
                    format!("{} - {}", guild.name, channel.name)
                },
                _ => continue,
            };
            options.push(ListOption::new(name, channel.id));
        }
    }
    Ok(options)
}

fn ensure_text(channel: &ChannelInfo) -> Result<()> {
    match channel.kind {
        ChannelKind::GuildText | ChannelKind::Dm => Ok(()),
        _ => Err(Error::message(format!(
            "channel {} is not a text channel",
            channel.id
        ))),
    }
}

async fn text_channel(client: &dyn PlatformClient, channel_id: &str) -> Result<ChannelInfo> {
    let channel = client.channel(channel_id).await?;
    ensure_text(&channel)?;
    Ok(channel)
}

pub async fn post_message(
    client: &dyn PlatformClient,
    params: &SendMessageParameters,
) -> Result<SentMessage> {
    let channel = text_channel(client, &params.channel_id).await?;
    let sent = client
        .send_message(&channel.id, OutboundMessage {
            content: params.compose_content(),
            files: params.file_urls(),
        })
        .await?;
    Ok(SentMessage {
        channel_id: channel.id,
        message_id: sent.id,
    })
}

/// `send:message`: replies `{channelId, messageId}`, or `false` on failure.
pub async fn send_message(
    client: Arc<dyn PlatformClient>,
    params: SendMessageParameters,
    conn: ClientHandle,
) {
    match post_message(client.as_ref(), &params).await {
        Ok(sent) => {
            debug!(channel_id = %sent.channel_id, message_id = %sent.message_id, "message sent");
            conn.emit(names::CALLBACK_SEND_MESSAGE, &sent);
        },
        Err(e) => {
            warn!(channel_id = %params.channel_id, error = %e, "send message failed");
            conn.emit(names::CALLBACK_SEND_MESSAGE, &false);
        },
    }
}

pub async fn perform_action(
    client: &dyn PlatformClient,
    params: &ActionParameters,
) -> Result<ActionDone> {
    let action = params.action_type.as_str().to_string();
    match params.action_type {
        ActionType::GetMessages => {
            let channel = text_channel(client, &params.channel_id).await?;
            let messages = client
                .fetch_messages(&channel.id, params.message_limit())
                .await?
                .iter()
                .map(serde_json::to_value)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ActionDone {
                action,
                messages: Some(messages),
            })
        },
        ActionType::RemoveMessages => {
            let channel = text_channel(client, &params.channel_id).await?;
            let count = params.remove_messages_number.unwrap_or(0);
            if count > 0 {
                match client.bulk_delete(&channel.id, count).await {
                    Ok(deleted) => debug!(channel_id = %channel.id, deleted, "messages removed"),
                    Err(e) => warn!(channel_id = %channel.id, error = %e, "bulk delete failed"),
                }
            }
            Ok(ActionDone {
                action,
                messages: None,
            })
        },
        ActionType::AddRole | ActionType::RemoveRole => {
            let guilds = client.guilds().await?;
            if !guilds.iter().any(|g| g.id == params.guild_id) {
                return Err(Error::message(format!("unknown guild {}", params.guild_id)));
            }
            let member = client.member(&params.guild_id, &params.user_id).await?;
            let adding = params.action_type == ActionType::AddRole;
            for role_id in &params.role_update_ids {
                match (adding, member.has_role(role_id)) {
                    (true, false) => {
                        client
                            .add_member_role(&params.guild_id, &params.user_id, role_id)
                            .await?
                    },
                    (false, true) => {
                        client
                            .remove_member_role(&params.guild_id, &params.user_id, role_id)
                            .await?
                    },
                    _ => {},
                }
            }
            Ok(ActionDone {
                action,
                messages: None,
            })
        },
    }
}

/// `send:action`: replies `{action, messages?}`, or `false` on failure.
pub async fn send_action(
    client: Arc<dyn PlatformClient>,
    params: ActionParameters,
    conn: ClientHandle,
) {
    match perform_action(client.as_ref(), &params).await {
        Ok(done) => {
            conn.emit(names::CALLBACK_SEND_ACTION, &done);
        },
        Err(e) => {
            warn!(action = params.action_type.as_str(), error = %e, "action failed");
            conn.emit(names::CALLBACK_SEND_ACTION, &false);
        },
    }
}

pub async fn confirm(
    client: &dyn PlatformClient,
    params: &ConfirmationParameters,
) -> ConfirmationResult {
    let channel = match text_channel(client, &params.message.channel_id).await {
        Ok(channel) => channel,
        Err(e) => {
            warn!(channel_id = %params.message.channel_id, error = %e, "confirmation channel unavailable");
            return ConfirmationResult {
                confirmed: None,
                success: false,
            };
        },
    };
    let prompt = ConfirmationPrompt {
        message: OutboundMessage {
            content: params.message.compose_content(),
            files: params.message.file_urls(),
        },
        yes_label: params.yes_label().to_string(),
        no_label: params.no_label().to_string(),
    };
    let timeout = Duration::from_secs(params.timeout_secs());
    let confirmed = match client.confirm(&channel.id, prompt, timeout).await {
        Ok(answer) => answer,
        Err(e) => {
            warn!(channel_id = %channel.id, error = %e, "confirmation failed");
            None
        },
    };
    ConfirmationResult {
        confirmed,
        success: true,
    }
}

/// `send:confirmation`: replies `{confirmed, success}`.
pub async fn send_confirmation(
    client: Arc<dyn PlatformClient>,
    params: ConfirmationParameters,
    conn: ClientHandle,
) {
    let result = confirm(client.as_ref(), &params).await;
    conn.emit(names::CALLBACK_SEND_CONFIRMATION, &result);
}
