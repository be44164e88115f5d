//! Parameters of the outbound `send:*` requests.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileList {
    pub file: Vec<FileRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendMessageParameters {
    pub channel_id: String,
    pub content: Option<String>,
    pub mention_roles: Vec<String>,
    pub files: FileList,
}

impl SendMessageParameters {
    /// Message body with role mentions appended, as the node UI composes it.
    pub fn compose_content(&self) -> String {
        let mut content = self.content.clone().unwrap_or_default();
        for role in &self.mention_roles {
            content.push_str(&format!(" <@&{role}>"));
        }
        content
    }

    pub fn file_urls(&self) -> Vec<String> {
        self.files.file.iter().map(|f| f.url.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    GetMessages,
    RemoveMessages,
    AddRole,
    RemoveRole,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetMessages => "getMessages",
            Self::RemoveMessages => "removeMessages",
            Self::AddRole => "addRole",
            Self::RemoveRole => "removeRole",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionParameters {
    pub action_type: ActionType,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub get_messages_limit: Option<u32>,
    #[serde(default)]
    pub remove_messages_number: Option<u32>,
    #[serde(default)]
    pub guild_id: String,
    #[serde(default)]
    pub user_id: String,
    /// Either a comma separated string or a list.
    #[serde(default, deserialize_with = "comma_list")]
    pub role_update_ids: Vec<String>,
}

impl ActionParameters {
    pub const DEFAULT_MESSAGE_LIMIT: u32 = 10;

    pub fn message_limit(&self) -> u32 {
        self.get_messages_limit
            .filter(|l| *l > 0)
            .unwrap_or(Self::DEFAULT_MESSAGE_LIMIT)
    }
}

fn comma_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        List(Vec<String>),
        Null,
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s
            .split(',')
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect(),
        Raw::List(ids) => ids,
        Raw::Null => Vec::new(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfirmationFields {
    /// Seconds; zero or absent means the default.
    pub timeout: Option<u64>,
    pub yes_label: Option<String>,
    pub no_label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfirmationParameters {
    #[serde(flatten)]
    pub message: SendMessageParameters,
    pub additional_confirmation_fields: ConfirmationFields,
}

impl ConfirmationParameters {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

    pub fn timeout_secs(&self) -> u64 {
        self.additional_confirmation_fields
            .timeout
            .filter(|t| *t > 0)
            .unwrap_or(Self::DEFAULT_TIMEOUT_SECS)
    }

    pub fn yes_label(&self) -> &str {
        label_or(&self.additional_confirmation_fields.yes_label, "Yes")
    }

    pub fn no_label(&self) -> &str {
        label_or(&self.additional_confirmation_fields.no_label, "No")
    }
}

fn label_or<'a>(label: &'a Option<String>, fallback: &'a str) -> &'a str {
    match label.as_deref() {
        Some(l) if !l.is_empty() => l,
        _ => fallback,
    }
}

// ── Replies ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub channel_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDone {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationResult {
    pub confirmed: Option<bool>,
    pub success: bool,
}
