//! Voice trigger parameters.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VoiceMode {
    /// Forward raw voice state changes.
    VoiceState,
    /// Join the channel and record each speaker.
    #[default]
    VoiceRecording,
    /// Report joins, leaves and moves.
    VoiceActivity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserFilters {
    pub ignore_bots: bool,
    /// Comma separated user ids, as typed into the node UI.
    pub user_ids: String,
    pub role_ids: Vec<String>,
}

impl UserFilters {
    pub fn user_id_list(&self) -> Vec<&str> {
        self.user_ids
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingOptions {
    pub audio_format: String,
    /// Seconds.
    pub max_duration: f64,
    /// Seconds of silence that end a capture.
    pub silence_timeout: f64,
    /// Milliseconds; shorter captures are discarded.
    pub min_speaking_duration: f64,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            audio_format: "ogg".into(),
            max_duration: 60.0,
            silence_timeout: 2.0,
            min_speaking_duration: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdditionalOptions {
    pub auto_join: bool,
    pub auto_leave: bool,
    pub save_to_file: bool,
    pub file_path: String,
}

impl Default for AdditionalOptions {
    fn default() -> Self {
        Self {
            auto_join: true,
            auto_leave: true,
            save_to_file: false,
            file_path: "./recordings".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Transcription {
    pub enabled: bool,
    pub provider: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoiceTriggerParameters {
    pub guild_ids: Vec<String>,
    pub voice_channel_ids: Vec<String>,
    pub voice_mode: VoiceMode,
    pub user_filters: UserFilters,
    pub recording_options: RecordingOptions,
    pub additional_options: AdditionalOptions,
    pub transcription: Transcription,
}

impl VoiceTriggerParameters {
    pub fn monitors_channel(&self, channel_id: &str) -> bool {
        self.voice_channel_ids.iter().any(|id| id == channel_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_recording_defaults() {
        let params: VoiceTriggerParameters = serde_json::from_str("{}").unwrap();
        assert_eq!(params.voice_mode, VoiceMode::VoiceRecording);
        assert_eq!(params.recording_options.audio_format, "ogg");
        assert_eq!(params.recording_options.max_duration, 60.0);
        assert!(params.additional_options.auto_join);
        assert!(params.additional_options.auto_leave);
        assert!(!params.additional_options.save_to_file);
    }

    #[test]
    fn user_ids_are_split_and_trimmed() {
        let filters = UserFilters {
            user_ids: " 1, 2 ,,3".into(),
            ..Default::default()
        };
        assert_eq!(filters.user_id_list(), vec!["1", "2", "3"]);
    }
}
