//! Scriptable in-process platform.
//!
//! Tests seed guilds, channels, members and messages, push
//! [`PlatformEvent`]s with [`MemoryPlatform::emit`] and inspect what the
//! coordinator sent back. `switchboard serve --platform memory` uses it with
//! [`MemoryConnector::accept_any`].

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    switchboard_common::types::{
        ChannelInfo, ChannelKind, GuildRef, Member, Message, Role, RoleRef, User,
    },
    tokio::sync::mpsc,
    tracing::debug,
};

use crate::{
    Error, Result,
    platform::{
        ConfirmationPrompt, OutboundMessage, PlatformClient, PlatformConnection,
        PlatformConnector, PlatformEvent,
    },
    voice::{VoiceConnection, VoiceLink, VoiceLinkEvent, VoiceStatus},
};

const EVENT_BUFFER: usize = 256;

/// Something the coordinator sent through the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentRecord {
    Message {
        channel_id: String,
        message: OutboundMessage,
    },
    Reply {
        to: String,
        content: String,
    },
    Confirmation {
        channel_id: String,
        prompt: ConfirmationPrompt,
    },
}

#[derive(Default)]
struct MemoryState {
    guilds: Vec<GuildRef>,
    channels: Vec<ChannelInfo>,
    roles: Vec<Role>,
    members: Vec<Member>,
    messages: HashMap<String, Vec<Message>>,
    voice_members: HashMap<(String, String), Vec<Member>>,
    sent: Vec<SentRecord>,
    confirmation: Option<bool>,
}

pub struct MemoryPlatform {
    user: User,
    state: Mutex<MemoryState>,
    events: Mutex<Option<mpsc::Sender<PlatformEvent>>>,
    voice: Mutex<HashMap<(String, String), Arc<MemoryVoiceConnection>>>,
    voice_joins: AtomicUsize,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl MemoryPlatform {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            user: User {
                id: user_id.into(),
                username: username.into(),
                bot: true,
                ..Default::default()
            },
            state: Mutex::default(),
            events: Mutex::default(),
            voice: Mutex::default(),
            voice_joins: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        })
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn bot_user(&self) -> &User {
        &self.user
    }

    pub fn add_guild(&self, guild: GuildRef) {
        self.state().guilds.push(guild);
    }

    pub fn add_channel(&self, channel: ChannelInfo) {
        self.state().channels.push(channel);
    }

    pub fn add_role(&self, role: Role) {
        self.state().roles.push(role);
    }

    pub fn add_member(&self, member: Member) {
        self.state().members.push(member);
    }

    pub fn insert_message(&self, message: Message) {
        self.state()
            .messages
            .entry(message.channel_id.clone())
            .or_default()
            .push(message);
    }

    /// Answer given to every confirmation prompt; `None` models a timeout.
    pub fn set_confirmation(&self, answer: Option<bool>) {
        self.state().confirmation = answer;
    }

    pub fn set_voice_members(&self, guild_id: &str, channel_id: &str, members: Vec<Member>) {
        self.state()
            .voice_members
            .insert((guild_id.to_string(), channel_id.to_string()), members);
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.state().sent.clone()
    }

    pub fn messages(&self, channel_id: &str) -> Vec<Message> {
        self.state()
            .messages
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn member_snapshot(&self, guild_id: &str, user_id: &str) -> Option<Member> {
        self.state()
            .members
            .iter()
            .find(|m| m.guild_id == guild_id && m.user.id == user_id)
            .cloned()
    }

    pub fn voice_joins(&self) -> usize {
        self.voice_joins.load(Ordering::SeqCst)
    }

    pub fn voice_connection(&self, guild_id: &str, channel_id: &str) -> Option<Arc<MemoryVoiceConnection>> {
        self.voice
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(guild_id.to_string(), channel_id.to_string()))
            .cloned()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Deliver an event to the logged-in client. Returns `false` when no
    /// client is listening.
    pub async fn emit(&self, event: PlatformEvent) -> bool {
        let sender = self.events.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    fn attach(&self) -> mpsc::Receiver<PlatformEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        *self.events.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        self.shut_down.store(false, Ordering::SeqCst);
        rx
    }

    fn next_message(&self, channel_id: &str, content: String) -> Message {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = self.state();
        let channel = state.channels.iter().find(|c| c.id == channel_id);
        let guild = channel
            .and_then(|c| c.guild_id.as_deref())
            .and_then(|gid| state.guilds.iter().find(|g| g.id == gid))
            .cloned();
        Message {
            id: format!("sent-{id}"),
            channel_id: channel_id.to_string(),
            channel_kind: channel.map(|c| c.kind).unwrap_or_default(),
            parent_id: channel.and_then(|c| c.parent_id.clone()),
            guild,
            author: self.user.clone(),
            content,
            ..Default::default()
        }
    }

    fn role_ref(&self, guild_id: &str, role_id: &str) -> Result<RoleRef> {
        self.state()
            .roles
            .iter()
            .find(|r| r.guild.id == guild_id && r.id == role_id)
            .map(|r| RoleRef {
                id: r.id.clone(),
                name: r.name.clone(),
            })
            .ok_or_else(|| Error::not_found("role", role_id))
    }

    fn with_member<T>(
        &self,
        guild_id: &str,
        user_id: &str,
        f: impl FnOnce(&mut Member) -> T,
    ) -> Result<T> {
        let mut state = self.state();
        state
            .members
            .iter_mut()
            .find(|m| m.guild_id == guild_id && m.user.id == user_id)
            .map(f)
            .ok_or_else(|| Error::not_found("member", user_id))
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::unavailable("client is shut down"));
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformClient for MemoryPlatform {
    fn user_id(&self) -> &str {
        &self.user.id
    }

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<Message> {
        self.ensure_live()?;
        self.state()
            .messages
            .get(channel_id)
            .and_then(|msgs| msgs.iter().find(|m| m.id == message_id))
            .cloned()
            .ok_or_else(|| Error::not_found("message", message_id))
    }

    async fn send_message(&self, channel_id: &str, message: OutboundMessage) -> Result<Message> {
        self.ensure_live()?;
        let sent = self.next_message(channel_id, message.content.clone());
        let mut state = self.state();
        if !state.channels.iter().any(|c| c.id == channel_id) {
            return Err(Error::not_found("channel", channel_id));
        }
        state.sent.push(SentRecord::Message {
            channel_id: channel_id.to_string(),
            message,
        });
        state
            .messages
            .entry(channel_id.to_string())
            .or_default()
            .push(sent.clone());
        Ok(sent)
    }

    async fn reply(&self, to: &Message, content: &str) -> Result<Message> {
        self.ensure_live()?;
        let sent = self.next_message(&to.channel_id, content.to_string());
        let mut state = self.state();
        state.sent.push(SentRecord::Reply {
            to: to.id.clone(),
            content: content.to_string(),
        });
        state
            .messages
            .entry(to.channel_id.clone())
            .or_default()
            .push(sent.clone());
        Ok(sent)
    }

    async fn fetch_messages(&self, channel_id: &str, limit: u32) -> Result<Vec<Message>> {
        self.ensure_live()?;
        let state = self.state();
        let msgs = state.messages.get(channel_id).cloned().unwrap_or_default();
        Ok(msgs.into_iter().rev().take(limit as usize).collect())
    }

    async fn bulk_delete(&self, channel_id: &str, count: u32) -> Result<u32> {
        self.ensure_live()?;
        let mut state = self.state();
        let Some(msgs) = state.messages.get_mut(channel_id) else {
            return Ok(0);
        };
        let n = msgs.len().min(count as usize);
        msgs.truncate(msgs.len() - n);
        Ok(u32::try_from(n).unwrap_or(u32::MAX))
    }

    async fn member(&self, guild_id: &str, user_id: &str) -> Result<Member> {
        self.ensure_live()?;
        self.member_snapshot(guild_id, user_id)
            .ok_or_else(|| Error::not_found("member", user_id))
    }

    async fn add_member_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> Result<()> {
        self.ensure_live()?;
        let role = self.role_ref(guild_id, role_id)?;
        self.with_member(guild_id, user_id, |m| {
            if !m.has_role(&role.id) {
                m.roles.push(role);
            }
        })
    }

    async fn remove_member_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> Result<()> {
        self.ensure_live()?;
        self.with_member(guild_id, user_id, |m| m.roles.retain(|r| r.id != role_id))
    }

    async fn confirm(
        &self,
        channel_id: &str,
        prompt: ConfirmationPrompt,
        _timeout: Duration,
    ) -> Result<Option<bool>> {
        self.ensure_live()?;
        let mut state = self.state();
        state.sent.push(SentRecord::Confirmation {
            channel_id: channel_id.to_string(),
            prompt,
        });
        Ok(state.confirmation)
    }

    async fn guilds(&self) -> Result<Vec<GuildRef>> {
        self.ensure_live()?;
        Ok(self.state().guilds.clone())
    }

    async fn channels(&self, guild_id: &str) -> Result<Vec<ChannelInfo>> {
        self.ensure_live()?;
        Ok(self
            .state()
            .channels
            .iter()
            .filter(|c| c.guild_id.as_deref() == Some(guild_id))
            .cloned()
            .collect())
    }

    async fn channel(&self, channel_id: &str) -> Result<ChannelInfo> {
        self.ensure_live()?;
        self.state()
            .channels
            .iter()
            .find(|c| c.id == channel_id)
            .cloned()
            .ok_or_else(|| Error::not_found("channel", channel_id))
    }

    async fn roles(&self, guild_id: &str) -> Result<Vec<Role>> {
        self.ensure_live()?;
        Ok(self
            .state()
            .roles
            .iter()
            .filter(|r| r.guild.id == guild_id)
            .cloned()
            .collect())
    }

    async fn voice_channel_members(&self, guild_id: &str, channel_id: &str) -> Result<Vec<Member>> {
        self.ensure_live()?;
        Ok(self
            .state()
            .voice_members
            .get(&(guild_id.to_string(), channel_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn join_voice(&self, guild_id: &str, channel_id: &str) -> Result<VoiceLink> {
        self.ensure_live()?;
        let is_voice = self
            .state()
            .channels
            .iter()
            .find(|c| c.id == channel_id)
            .is_none_or(|c| c.kind.is_voice());
        if !is_voice {
            return Err(Error::invalid_input(format!("{channel_id} is not a voice channel")));
        }
        self.voice_joins.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        for status in [
            VoiceStatus::Signalling,
            VoiceStatus::Connecting,
            VoiceStatus::Ready,
        ] {
            let _ = tx.try_send(VoiceLinkEvent::Status(status));
        }
        let connection = Arc::new(MemoryVoiceConnection {
            events: tx,
            pending: Mutex::default(),
            destroyed: AtomicBool::new(false),
        });
        self.voice
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                (guild_id.to_string(), channel_id.to_string()),
                Arc::clone(&connection),
            );
        debug!(guild_id, channel_id, "memory platform joined voice");
        Ok(VoiceLink {
            connection,
            events: rx,
        })
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.events.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

/// Voice connection whose speakers are scripted with [`Self::speak`].
pub struct MemoryVoiceConnection {
    events: mpsc::Sender<VoiceLinkEvent>,
    pending: Mutex<HashMap<String, Vec<Bytes>>>,
    destroyed: AtomicBool,
}

impl MemoryVoiceConnection {
    /// Queue audio for `user_id` and announce that they started speaking.
    /// The subscription receives the chunks, then ends as if silence followed.
    pub async fn speak(&self, user_id: &str, chunks: Vec<Bytes>) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id.to_string(), chunks);
        let _ = self
            .events
            .send(VoiceLinkEvent::SpeakingStarted {
                user_id: user_id.to_string(),
            })
            .await;
    }

    pub async fn set_status(&self, status: VoiceStatus) {
        let _ = self.events.send(VoiceLinkEvent::Status(status)).await;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl VoiceConnection for MemoryVoiceConnection {
    fn subscribe(&self, user_id: &str, end_after_silence: Duration) -> mpsc::Receiver<Bytes> {
        let chunks = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id)
            .unwrap_or_default();
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            let _ = tx.try_send(chunk);
        }
        // The stream ends once the speaker has been silent long enough.
        tokio::spawn(async move {
            tokio::time::sleep(end_after_silence).await;
            drop(tx);
        });
        rx
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            let _ = self
                .events
                .try_send(VoiceLinkEvent::Status(VoiceStatus::Destroyed));
        }
    }
}

/// Connector handing out [`MemoryPlatform`]s by token.
#[derive(Default)]
pub struct MemoryConnector {
    accounts: Mutex<HashMap<String, Arc<MemoryPlatform>>>,
    accept_any: bool,
    login_delay: Duration,
    logins: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept every token, creating an empty platform on first login.
    pub fn accept_any() -> Self {
        Self {
            accept_any: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = delay;
        self
    }

    pub fn register(&self, token: &str, platform: Arc<MemoryPlatform>) {
        self.accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(token.to_string(), platform);
    }

    pub fn platform(&self, token: &str) -> Option<Arc<MemoryPlatform>> {
        self.accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(token)
            .cloned()
    }

    /// Number of login attempts so far.
    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformConnector for MemoryConnector {
    async fn connect(&self, token: &str, client_id: &str) -> Result<PlatformConnection> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if !self.login_delay.is_zero() {
            tokio::time::sleep(self.login_delay).await;
        }
        let platform = {
            let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
            match accounts.get(token) {
                Some(platform) => Arc::clone(platform),
                None if self.accept_any => {
                    let platform = MemoryPlatform::new(client_id, "switchboard");
                    accounts.insert(token.to_string(), Arc::clone(&platform));
                    platform
                },
                None => return Err(Error::login("An invalid token was provided.")),
            }
        };
        let events = platform.attach();
        Ok(PlatformConnection {
            client: platform,
            events,
        })
    }
}

/// A text channel for seeding.
pub fn text_channel(id: &str, guild_id: &str, parent_id: Option<&str>) -> ChannelInfo {
    ChannelInfo {
        id: id.to_string(),
        name: format!("channel-{id}"),
        kind: ChannelKind::GuildText,
        guild_id: Some(guild_id.to_string()),
        parent_id: parent_id.map(str::to_string),
    }
}
