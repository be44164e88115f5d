//! One joined voice channel and its per-speaker captures.

use std::{
    collections::HashSet,
    fmt,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use {
    switchboard_channels::{PlatformClient, VoiceConnection, VoiceLinkEvent, VoiceStatus},
    switchboard_common::types::{ChannelRef, GuildRef, User},
    switchboard_protocol::{
        AdditionalOptions, RecordingOptions, Transcription, UserFilters, VoiceTriggerParameters,
        events::{Recording, VoiceRecordingPayload},
    },
    tokio::{
        sync::{mpsc, watch},
        task::JoinSet,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    capture::{self, CaptureLimits, Captured},
    filters::user_passes,
    transcribe::{TranscribeRequest, Transcriber},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, voice as voice_metrics};

/// (guild, voice channel) a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub guild_id: String,
    pub channel_id: String,
}

impl SessionKey {
    pub fn new(guild_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.guild_id, self.channel_id)
    }
}

/// Distinguishes successive sessions on the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub(crate) u64);

/// A recording trigger that receives a session's captures.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingTarget {
    pub node_id: String,
    pub recording: RecordingOptions,
    pub options: AdditionalOptions,
    pub transcription: Transcription,
    pub user_filters: UserFilters,
}

impl RecordingTarget {
    pub fn new(node_id: impl Into<String>, params: &VoiceTriggerParameters) -> Self {
        Self {
            node_id: node_id.into(),
            recording: params.recording_options.clone(),
            options: params.additional_options.clone(),
            transcription: params.transcription.clone(),
            user_filters: params.user_filters.clone(),
        }
    }
}

/// What sessions report back to their owner.
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    /// The connection reached Ready.
    Ready { owner: String, session: SessionKey },
    /// A finished recording for `node_id`.
    Recording {
        node_id: String,
        payload: Box<VoiceRecordingPayload>,
    },
    /// A connection-level error for `node_id`.
    Error { node_id: String, message: String },
    /// The idle check found no human left in the channel.
    Idle {
        owner: String,
        session: SessionKey,
        id: SessionId,
    },
    /// The session task ended on its own.
    Closed {
        owner: String,
        session: SessionKey,
        id: SessionId,
    },
}

/// State shared by a session task and its capture tasks.
pub(crate) struct SessionShared {
    pub owner: String,
    pub key: SessionKey,
    pub id: SessionId,
    pub guild: GuildRef,
    pub channel: ChannelRef,
    pub client: Arc<dyn PlatformClient>,
    pub targets: watch::Receiver<Vec<RecordingTarget>>,
    pub events: mpsc::UnboundedSender<VoiceEvent>,
    pub transcriber: Arc<dyn Transcriber>,
    pub recordings_dir: PathBuf,
    pub ready_transitions: Arc<AtomicUsize>,
}

impl SessionShared {
    fn targets(&self) -> Vec<RecordingTarget> {
        self.targets.borrow().clone()
    }

    fn report_error(&self, message: &str) {
        for target in self.targets() {
            let _ = self.events.send(VoiceEvent::Error {
                node_id: target.node_id,
                message: message.to_string(),
            });
        }
    }

    fn closed(&self) {
        let _ = self.events.send(VoiceEvent::Closed {
            owner: self.owner.clone(),
            session: self.key.clone(),
            id: self.id,
        });
    }
}

/// Join the channel and serve it until cancelled or disconnected.
pub(crate) async fn run(shared: Arc<SessionShared>, cancel: CancellationToken) {
    let joined = tokio::select! {
        () = cancel.cancelled() => return,
        joined = shared.client.join_voice(&shared.key.guild_id, &shared.key.channel_id) => joined,
    };
    let link = match joined {
        Ok(link) => link,
        Err(e) => {
            warn!(session = %shared.key, error = %e, "failed to join voice channel");
            shared.report_error(&format!("Failed to join voice channel: {e}"));
            shared.closed();
            return;
        },
    };
    let connection = link.connection;
    let mut link_events = link.events;

    let mut ready = false;
    let mut capturing = HashSet::new();
    let mut captures: JoinSet<String> = JoinSet::new();
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            Some(done) = captures.join_next(), if !captures.is_empty() => {
                if let Ok(user_id) = done {
                    capturing.remove(&user_id);
                }
            },
            event = link_events.recv() => match event {
                None => break,
                Some(VoiceLinkEvent::Status(VoiceStatus::Ready)) => {
                    if !ready {
                        ready = true;
                        shared.ready_transitions.fetch_add(1, Ordering::SeqCst);
                        info!(session = %shared.key, "voice connection ready");
                        let _ = shared.events.send(VoiceEvent::Ready {
                            owner: shared.owner.clone(),
                            session: shared.key.clone(),
                        });
                    }
                },
                Some(VoiceLinkEvent::Status(status)) if status.is_terminal() => {
                    info!(session = %shared.key, ?status, "voice connection ended");
                    break;
                },
                Some(VoiceLinkEvent::Status(status)) => {
                    debug!(session = %shared.key, ?status, "voice connection status");
                    ready = false;
                },
                Some(VoiceLinkEvent::SpeakingStarted { user_id }) => {
                    if ready && capturing.insert(user_id.clone()) {
                        captures.spawn(capture(
                            Arc::clone(&shared),
                            Arc::clone(&connection),
                            user_id,
                        ));
                    }
                },
                Some(VoiceLinkEvent::Error { message }) => {
                    warn!(session = %shared.key, error = %message, "voice connection error");
                    shared.report_error(&message);
                },
            },
        }
    }

    captures.abort_all();
    connection.destroy();
    if !cancel.is_cancelled() {
        shared.closed();
    }
}

/// Record one speaker and deliver the result to every target that accepts
/// them. Returns the speaker's id.
async fn capture(
    shared: Arc<SessionShared>,
    connection: Arc<dyn VoiceConnection>,
    user_id: String,
) -> String {
    let (user, roles) = match shared.client.member(&shared.key.guild_id, &user_id).await {
        Ok(member) => (member.user, member.roles),
        Err(e) => {
            debug!(session = %shared.key, user_id, error = %e, "speaker lookup failed");
            (
                User {
                    id: user_id.clone(),
                    ..Default::default()
                },
                Vec::new(),
            )
        },
    };
    let recipients: Vec<RecordingTarget> = shared
        .targets()
        .into_iter()
        .filter(|t| user_passes(&t.user_filters, &user, &roles))
        .collect();
    let Some(primary) = recipients.first() else {
        return user_id;
    };

    let limits = CaptureLimits::from(&primary.recording);
    let audio = connection.subscribe(&user_id, limits.silence_timeout);
    let Some(captured) = capture::collect(audio, limits).await else {
        debug!(session = %shared.key, user_id, "capture below minimum duration, discarded");
        #[cfg(feature = "metrics")]
        counter!(voice_metrics::RECORDINGS_DISCARDED_TOTAL).increment(1);
        return user_id;
    };

    for target in &recipients {
        deliver(&shared, target, &user, &captured).await;
    }
    user_id
}

async fn deliver(shared: &SessionShared, target: &RecordingTarget, user: &User, captured: &Captured) {
    let format = target.recording.audio_format.clone();

    let mut file_path = None;
    if target.options.save_to_file {
        let dir = if target.options.file_path.trim().is_empty() {
            shared.recordings_dir.clone()
        } else {
            PathBuf::from(&target.options.file_path)
        };
        match capture::save(&dir, &user.id, &format, &captured.audio).await {
            Ok(path) => file_path = Some(path.display().to_string()),
            Err(e) => {
                warn!(node_id = %target.node_id, error = %e, "failed to save recording");
                let _ = shared.events.send(VoiceEvent::Error {
                    node_id: target.node_id.clone(),
                    message: e.to_string(),
                });
            },
        }
    }

    let mut transcription = None;
    if target.transcription.enabled {
        let request = TranscribeRequest {
            audio: captured.audio.clone(),
            format: format.clone(),
            language: target.transcription.language.clone(),
            provider: target.transcription.provider.clone(),
        };
        match shared.transcriber.transcribe(request).await {
            Ok(text) => transcription = text,
            Err(e) => {
                warn!(node_id = %target.node_id, provider = shared.transcriber.id(), error = %e, "transcription failed");
            },
        }
    }

    let payload = VoiceRecordingPayload {
        recording: Recording {
            buffer: captured.to_base64(),
            duration: captured.duration_ms(),
            format,
            file_path,
        },
        user: user.clone(),
        channel: shared.channel.clone(),
        guild: shared.guild.clone(),
        node_id: target.node_id.clone(),
        transcription,
    };
    #[cfg(feature = "metrics")]
    counter!(voice_metrics::RECORDINGS_TOTAL).increment(1);
    let _ = shared.events.send(VoiceEvent::Recording {
        node_id: target.node_id.clone(),
        payload: Box::new(payload),
    });
}
