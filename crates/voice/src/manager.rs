//! Voice sessions of one platform client, keyed by (guild, voice channel).
//!
//! The manager is owned by a single task. Creating a session is synchronous:
//! the entry is inserted before the join is awaited in a spawned task, so a
//! second join request for the same key always finds the first session.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    switchboard_channels::PlatformClient,
    switchboard_common::types::{ChannelRef, GuildRef},
    tokio::sync::{mpsc, watch},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    session::{self, RecordingTarget, SessionId, SessionKey, SessionShared, VoiceEvent},
    transcribe::{NoopTranscriber, Transcriber},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{gauge, voice as voice_metrics};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSettings {
    /// Delay before checking whether a channel has emptied.
    pub idle_grace: Duration,
    /// Where recordings go when a trigger saves to file without a path.
    pub recordings_dir: PathBuf,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            idle_grace: Duration::from_secs(5),
            recordings_dir: PathBuf::from("./recordings"),
        }
    }
}

struct SessionEntry {
    id: SessionId,
    targets: watch::Sender<Vec<RecordingTarget>>,
    cancel: CancellationToken,
    ready_transitions: Arc<AtomicUsize>,
}

impl SessionEntry {
    fn auto_leave(&self) -> bool {
        self.targets.borrow().iter().any(|t| t.options.auto_leave)
    }
}

pub struct VoiceManager {
    owner: String,
    client: Arc<dyn PlatformClient>,
    events: mpsc::UnboundedSender<VoiceEvent>,
    settings: VoiceSettings,
    transcriber: Arc<dyn Transcriber>,
    sessions: HashMap<SessionKey, SessionEntry>,
    next_id: u64,
}

impl VoiceManager {
    /// `owner` is echoed in session events so the receiver can tell managers
    /// apart.
    pub fn new(
        owner: impl Into<String>,
        client: Arc<dyn PlatformClient>,
        events: mpsc::UnboundedSender<VoiceEvent>,
        settings: VoiceSettings,
    ) -> Self {
        Self {
            owner: owner.into(),
            client,
            events,
            settings,
            transcriber: Arc::new(NoopTranscriber),
            sessions: HashMap::new(),
            next_id: 1,
        }
    }

    #[must_use]
    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = transcriber;
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Make sure a session exists for (guild, channel) and that `target`
    /// receives its recordings. Returns `true` when a new session was started.
    pub fn ensure_session(
        &mut self,
        guild: &GuildRef,
        channel: &ChannelRef,
        target: RecordingTarget,
    ) -> bool {
        let key = SessionKey::new(&guild.id, &channel.id);
        if let Some(entry) = self.sessions.get(&key) {
            entry.targets.send_modify(|targets| upsert(targets, target));
            debug!(session = %key, "reusing voice session");
            return false;
        }

        let id = SessionId(self.next_id);
        self.next_id += 1;
        let (targets_tx, targets_rx) = watch::channel(vec![target]);
        let cancel = CancellationToken::new();
        let ready_transitions = Arc::new(AtomicUsize::new(0));
        let shared = Arc::new(SessionShared {
            owner: self.owner.clone(),
            key: key.clone(),
            id,
            guild: guild.clone(),
            channel: channel.clone(),
            client: Arc::clone(&self.client),
            targets: targets_rx,
            events: self.events.clone(),
            transcriber: Arc::clone(&self.transcriber),
            recordings_dir: self.settings.recordings_dir.clone(),
            ready_transitions: Arc::clone(&ready_transitions),
        });
        tokio::spawn(session::run(shared, cancel.clone()));

        info!(session = %key, "voice session started");
        #[cfg(feature = "metrics")]
        gauge!(voice_metrics::SESSIONS_ACTIVE).increment(1.0);
        self.sessions.insert(key, SessionEntry {
            id,
            targets: targets_tx,
            cancel,
            ready_transitions,
        });
        true
    }

    pub fn has_session(&self, guild_id: &str, channel_id: &str) -> bool {
        self.sessions
            .contains_key(&SessionKey::new(guild_id, channel_id))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> Vec<SessionKey> {
        let mut keys: Vec<_> = self.sessions.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// How many times the session's connection reached Ready.
    pub fn ready_transitions(&self, guild_id: &str, channel_id: &str) -> Option<usize> {
        self.sessions
            .get(&SessionKey::new(guild_id, channel_id))
            .map(|e| e.ready_transitions.load(Ordering::SeqCst))
    }

    /// After the grace period, report [`VoiceEvent::Idle`] if only bots are
    /// left in the channel. Sessions without an auto-leave target are kept.
    pub fn schedule_idle_check(&self, guild_id: &str, channel_id: &str) {
        let key = SessionKey::new(guild_id, channel_id);
        let Some(entry) = self.sessions.get(&key) else {
            return;
        };
        if !entry.auto_leave() {
            return;
        }
        let client = Arc::clone(&self.client);
        let events = self.events.clone();
        let owner = self.owner.clone();
        let cancel = entry.cancel.clone();
        let id = entry.id;
        let grace = self.settings.idle_grace;
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(grace) => {},
            }
            match client
                .voice_channel_members(&key.guild_id, &key.channel_id)
                .await
            {
                Ok(members) if members.iter().all(|m| m.user.bot) => {
                    debug!(session = %key, "voice channel is empty");
                    let _ = events.send(VoiceEvent::Idle {
                        owner,
                        session: key,
                        id,
                    });
                },
                Ok(_) => {},
                Err(e) => warn!(session = %key, error = %e, "idle check failed"),
            }
        });
    }

    /// Destroy the session on `key` if it is still the one identified by
    /// `id`. Used for [`VoiceEvent::Idle`] and [`VoiceEvent::Closed`].
    pub fn end_session(&mut self, key: &SessionKey, id: SessionId) -> bool {
        if self.sessions.get(key).is_some_and(|e| e.id == id) {
            self.destroy_key(key);
            true
        } else {
            false
        }
    }

    /// Stop sending recordings to `node_id`; sessions left without any
    /// target are destroyed.
    pub fn remove_target(&mut self, node_id: &str) {
        let mut emptied = Vec::new();
        for (key, entry) in &self.sessions {
            entry
                .targets
                .send_modify(|targets| targets.retain(|t| t.node_id != node_id));
            if entry.targets.borrow().is_empty() {
                emptied.push(key.clone());
            }
        }
        for key in emptied {
            self.destroy_key(&key);
        }
    }

    /// Keep only the sessions for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&SessionKey) -> bool) {
        let doomed: Vec<_> = self
            .sessions
            .keys()
            .filter(|key| !keep(key))
            .cloned()
            .collect();
        for key in doomed {
            self.destroy_key(&key);
        }
    }

    pub fn destroy(&mut self, guild_id: &str, channel_id: &str) -> bool {
        self.destroy_key(&SessionKey::new(guild_id, channel_id))
    }

    pub fn destroy_all(&mut self) {
        let keys: Vec<_> = self.sessions.keys().cloned().collect();
        for key in keys {
            self.destroy_key(&key);
        }
    }

    fn destroy_key(&mut self, key: &SessionKey) -> bool {
        let Some(entry) = self.sessions.remove(key) else {
            return false;
        };
        entry.cancel.cancel();
        info!(session = %key, "voice session destroyed");
        #[cfg(feature = "metrics")]
        gauge!(voice_metrics::SESSIONS_ACTIVE).decrement(1.0);
        true
    }
}

impl Drop for VoiceManager {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

fn upsert(targets: &mut Vec<RecordingTarget>, target: RecordingTarget) {
    match targets.iter_mut().find(|t| t.node_id == target.node_id) {
        Some(existing) => *existing = target,
        None => targets.push(target),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        bytes::Bytes,
        switchboard_channels::{MemoryPlatform, VoiceStatus},
        switchboard_common::types::{ChannelInfo, ChannelKind, Member, User},
        switchboard_protocol::VoiceTriggerParameters,
    };

    fn guild() -> GuildRef {
        GuildRef {
            id: "g1".into(),
            name: "Guild".into(),
        }
    }

    fn channel() -> ChannelRef {
        ChannelRef {
            id: "v1".into(),
            name: "Voice".into(),
        }
    }

    fn target(node_id: &str) -> RecordingTarget {
        RecordingTarget::new(node_id, &VoiceTriggerParameters::default())
    }

    fn member(id: &str, bot: bool) -> Member {
        Member {
            user: User {
                id: id.into(),
                username: id.into(),
                bot,
                ..Default::default()
            },
            guild_id: "g1".into(),
            ..Default::default()
        }
    }

    fn setup() -> (
        Arc<MemoryPlatform>,
        VoiceManager,
        mpsc::UnboundedReceiver<VoiceEvent>,
    ) {
        let platform = MemoryPlatform::new("bot", "bot");
        platform.add_channel(ChannelInfo {
            id: "v1".into(),
            name: "Voice".into(),
            kind: ChannelKind::GuildVoice,
            guild_id: Some("g1".into()),
            parent_id: None,
        });
        platform.add_member(member("u1", false));
        let (tx, rx) = mpsc::unbounded_channel();
        let client: Arc<dyn PlatformClient> = platform.clone();
        let manager = VoiceManager::new("tok", client, tx, VoiceSettings::default());
        (platform, manager, rx)
    }

    async fn next_ready(rx: &mut mpsc::UnboundedReceiver<VoiceEvent>) -> SessionKey {
        loop {
            if let VoiceEvent::Ready { session, .. } = rx.recv().await.unwrap() {
                return session;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_joins_share_one_session() {
        let (platform, mut manager, mut rx) = setup();
        assert!(manager.ensure_session(&guild(), &channel(), target("n1")));
        assert!(!manager.ensure_session(&guild(), &channel(), target("n2")));

        let key = next_ready(&mut rx).await;
        assert_eq!(key, SessionKey::new("g1", "v1"));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(manager.session_count(), 1);
        assert_eq!(platform.voice_joins(), 1);
        assert_eq!(manager.ready_transitions("g1", "v1"), Some(1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn speaker_recording_reaches_every_target() {
        let (platform, mut manager, mut rx) = setup();
        manager.ensure_session(&guild(), &channel(), target("n1"));
        manager.ensure_session(&guild(), &channel(), target("n2"));
        next_ready(&mut rx).await;

        let conn = platform.voice_connection("g1", "v1").unwrap();
        conn.speak("u1", vec![Bytes::from_static(b"hi")]).await;

        let mut nodes = Vec::new();
        for _ in 0..2 {
            match rx.recv().await.unwrap() {
                VoiceEvent::Recording { node_id, payload } => {
                    assert_eq!(payload.user.id, "u1");
                    assert_eq!(payload.recording.buffer, "aGk=");
                    assert_eq!(payload.recording.format, "ogg");
                    assert!(payload.recording.duration >= 2000);
                    assert!(payload.transcription.is_none());
                    nodes.push(node_id);
                },
                other => panic!("unexpected event {other:?}"),
            }
        }
        nodes.sort();
        assert_eq!(nodes, vec!["n1", "n2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn short_speech_is_not_delivered() {
        let (platform, mut manager, mut rx) = setup();
        let mut params = VoiceTriggerParameters::default();
        params.recording_options.min_speaking_duration = 5000.0;
        manager.ensure_session(&guild(), &channel(), RecordingTarget::new("n1", &params));
        next_ready(&mut rx).await;

        let conn = platform.voice_connection("g1", "v1").unwrap();
        conn.speak("u1", vec![Bytes::from_static(b"hi")]).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_check_reports_empty_channel() {
        let (platform, mut manager, mut rx) = setup();
        manager.ensure_session(&guild(), &channel(), target("n1"));
        next_ready(&mut rx).await;

        platform.set_voice_members("g1", "v1", vec![member("u1", false)]);
        manager.schedule_idle_check("g1", "v1");
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(rx.try_recv().is_err());

        platform.set_voice_members("g1", "v1", vec![member("bot", true)]);
        manager.schedule_idle_check("g1", "v1");
        let VoiceEvent::Idle { session, id, .. } = rx.recv().await.unwrap() else {
            panic!("expected idle");
        };
        assert!(manager.end_session(&session, id));
        assert!(!manager.end_session(&session, id));
        assert_eq!(manager.session_count(), 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(platform.voice_connection("g1", "v1").unwrap().is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn platform_disconnect_closes_session() {
        let (platform, mut manager, mut rx) = setup();
        manager.ensure_session(&guild(), &channel(), target("n1"));
        next_ready(&mut rx).await;

        let conn = platform.voice_connection("g1", "v1").unwrap();
        conn.set_status(VoiceStatus::Disconnected).await;
        let VoiceEvent::Closed { session, id, .. } = rx.recv().await.unwrap() else {
            panic!("expected closed");
        };
        assert!(manager.end_session(&session, id));
        assert!(!manager.has_session("g1", "v1"));
    }

    #[tokio::test(start_paused = true)]
    async fn removing_last_target_destroys_session() {
        let (_platform, mut manager, mut rx) = setup();
        manager.ensure_session(&guild(), &channel(), target("n1"));
        manager.ensure_session(&guild(), &channel(), target("n2"));
        next_ready(&mut rx).await;

        manager.remove_target("n1");
        assert!(manager.has_session("g1", "v1"));
        manager.remove_target("n2");
        assert!(!manager.has_session("g1", "v1"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_join_reports_error_to_targets() {
        let (platform, mut manager, mut rx) = setup();
        platform.add_channel(ChannelInfo {
            id: "t1".into(),
            name: "text".into(),
            kind: ChannelKind::GuildText,
            guild_id: Some("g1".into()),
            parent_id: None,
        });
        let text = ChannelRef {
            id: "t1".into(),
            name: "text".into(),
        };
        manager.ensure_session(&guild(), &text, target("n1"));
        let VoiceEvent::Error { node_id, message } = rx.recv().await.unwrap() else {
            panic!("expected error");
        };
        assert_eq!(node_id, "n1");
        assert!(message.starts_with("Failed to join voice channel"));
        assert!(matches!(rx.recv().await.unwrap(), VoiceEvent::Closed { .. }));
    }
}
