//! CLI subcommands for closing and opening channels on a running coordinator.

use std::time::Duration;

use {
    anyhow::{Result, bail},
    clap::Subcommand,
    switchboard_config::SwitchboardConfig,
    switchboard_ipc::CoordinatorClient,
    switchboard_protocol::ToggleAction,
};

#[derive(Subcommand)]
pub enum ChannelAction {
    /// Stop routing messages from a channel.
    Close { channel_id: String },
    /// Resume routing messages from a channel.
    Open { channel_id: String },
    /// Show whether a channel is closed.
    Status { channel_id: String },
}

pub async fn handle_channel(config: &SwitchboardConfig, action: ChannelAction) -> Result<()> {
    let client = CoordinatorClient::connect(&config.coordinator.socket_path)
        .await?
        .with_timeout(Duration::from_secs(config.coordinator.request_timeout_secs));

    match action {
        ChannelAction::Close { channel_id } => toggle(&client, &channel_id, ToggleAction::Close).await,
        ChannelAction::Open { channel_id } => toggle(&client, &channel_id, ToggleAction::Open).await,
        ChannelAction::Status { channel_id } => {
            let status = client.channel_status(&channel_id).await?;
            let state = if status.is_disabled { "closed" } else { "open" };
            println!("{}: {state}", status.channel_id);
            Ok(())
        },
    }
}

async fn toggle(client: &CoordinatorClient, channel_id: &str, action: ToggleAction) -> Result<()> {
    let reply = client.toggle_channel(channel_id, action).await?;
    if !reply.success {
        bail!("coordinator could not update channel {channel_id}");
    }
    let verb = match action {
        ToggleAction::Close => "closed",
        ToggleAction::Open => "opened",
    };
    println!("Channel {channel_id} {verb}.");
    Ok(())
}
