//! In-chat administrative commands that close or reopen a channel.

use {
    switchboard_common::types::Message,
    switchboard_protocol::ToggleAction,
};

pub const CLOSE_COMMAND: &str = "/support-close";
pub const OPEN_COMMAND: &str = "/support-open";

pub const GUILD_ONLY_REPLY: &str = "This command can only be used in server channels.";
pub const PERMISSION_REPLY: &str =
    "You do not have permission to use this command. Required permission: Manage Channels";
pub const CLOSED_REPLY: &str = "✅ Ticket closed. This channel will no longer trigger workflows.";
pub const OPENED_REPLY: &str = "✅ Ticket opened. This channel will now trigger workflows.";
pub const FAILURE_REPLY: &str = "❌ An error occurred while processing the command.";

/// The command a message carries, if its whole content is one.
pub fn parse_command(content: &str) -> Option<ToggleAction> {
    match content {
        CLOSE_COMMAND => Some(ToggleAction::Close),
        OPEN_COMMAND => Some(ToggleAction::Open),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Rejected(&'static str),
    Apply(ToggleAction),
}

/// Check that the author may run `action` where they sent it.
pub fn authorize(message: &Message, action: ToggleAction) -> Decision {
    let Some(member) = message.member.as_ref().filter(|_| message.guild.is_some()) else {
        return Decision::Rejected(GUILD_ONLY_REPLY);
    };
    if !member.manage_channels {
        return Decision::Rejected(PERMISSION_REPLY);
    }
    Decision::Apply(action)
}

pub fn confirmation(action: ToggleAction) -> &'static str {
    match action {
        ToggleAction::Close => CLOSED_REPLY,
        ToggleAction::Open => OPENED_REPLY,
    }
}
