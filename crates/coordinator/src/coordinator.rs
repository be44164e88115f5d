//! The coordinator actor.
//!
//! One task owns the registry, the connection pool, the debounce state and
//! the disabled-channel set. Client frames, platform events, timers and
//! voice session reports all arrive as messages on its inbox; slow platform
//! calls run in spawned tasks that report back the same way.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use {
    serde::Serialize,
    switchboard_channels::{PlatformClient, PlatformConnection, PlatformConnector, PlatformEvent},
    switchboard_common::types::{Message, Reaction},
    switchboard_config::SwitchboardConfig,
    switchboard_ipc::{ClientHandle, ConnId, ServerEvent},
    switchboard_lock::{ListenerLedger, SharedLock},
    switchboard_protocol::{
        ChannelStatusReply, ClientMessage, CredentialStatus, Credentials, Envelope, ListRequest,
        ToggleChannel, ToggleReply, events::MessageCreatePayload, names,
    },
    switchboard_voice::{NoopTranscriber, Transcriber, VoiceEvent, VoiceManager, VoiceSettings},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    debounce::{Debouncer, TimerFired},
    disabled::DisabledChannels,
    pool::{self, Acquire, ConnectionPool, ReadyClient},
    registry::TriggerRegistry,
    requests,
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, coordinator as coord_metrics, gauge, labels};

/// Ledger listener id of the event pump.
const EVENTS_LISTENER: &str = "router";

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    /// How often a pending emission may be pushed back by a cooldown.
    pub max_cooldown_reschedules: u32,
    pub voice: VoiceSettings,
    /// Where the disabled-channel set is persisted; `None` keeps it in memory.
    pub disabled_channels: Option<PathBuf>,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_cooldown_reschedules: 16,
            voice: VoiceSettings::default(),
            disabled_channels: None,
        }
    }
}

impl From<&SwitchboardConfig> for CoordinatorSettings {
    fn from(config: &SwitchboardConfig) -> Self {
        Self {
            max_cooldown_reschedules: config.routing.max_cooldown_reschedules,
            voice: VoiceSettings {
                idle_grace: std::time::Duration::from_secs(config.voice.idle_grace_secs),
                recordings_dir: config.voice.default_recordings_dir.clone(),
            },
            disabled_channels: Some(config.coordinator.disabled_channels_path()),
        }
    }
}

/// A message trigger's payload waiting in the debouncer.
pub(crate) struct Routed {
    pub token: String,
    pub payload: MessageCreatePayload,
}

/// Work reported back to the actor by spawned tasks.
pub(crate) enum Internal {
    LoginFinished {
        token: String,
        generation: u64,
        reply: ClientHandle,
        result: switchboard_channels::Result<PlatformConnection>,
    },
    Platform {
        token: String,
        generation: u64,
        event: PlatformEvent,
    },
    PlatformClosed {
        token: String,
        generation: u64,
    },
    MessageResolved {
        token: String,
        message: Message,
        reference: Option<Message>,
        candidates: Vec<String>,
    },
    ReactionResolved {
        token: String,
        reaction: Reaction,
        added: bool,
        message: Message,
        candidates: Vec<String>,
    },
}

struct Inbox {
    internal: mpsc::UnboundedReceiver<Internal>,
    timers: mpsc::UnboundedReceiver<TimerFired>,
    voice: mpsc::UnboundedReceiver<VoiceEvent>,
}

pub struct Coordinator {
    pub(crate) settings: CoordinatorSettings,
    pub(crate) connector: Arc<dyn PlatformConnector>,
    pub(crate) lock: SharedLock,
    pub(crate) transcriber: Arc<dyn Transcriber>,
    pub(crate) registry: TriggerRegistry,
    pub(crate) pool: ConnectionPool,
    pub(crate) debouncer: Debouncer<Routed>,
    pub(crate) disabled: DisabledChannels,
    pub(crate) connections: HashMap<ConnId, ClientHandle>,
    pub(crate) internal_tx: mpsc::UnboundedSender<Internal>,
    pub(crate) voice_tx: mpsc::UnboundedSender<VoiceEvent>,
    inbox: Option<Inbox>,
}

impl Coordinator {
    pub async fn new(
        settings: CoordinatorSettings,
        connector: Arc<dyn PlatformConnector>,
        lock: SharedLock,
    ) -> Self {
        let disabled = match &settings.disabled_channels {
            Some(path) => DisabledChannels::load(path).await,
            None => DisabledChannels::in_memory(),
        };
        let (internal_tx, internal) = mpsc::unbounded_channel();
        let (timers_tx, timers) = mpsc::unbounded_channel();
        let (voice_tx, voice) = mpsc::unbounded_channel();
        Self {
            debouncer: Debouncer::new(timers_tx, settings.max_cooldown_reschedules),
            settings,
            connector,
            lock,
            transcriber: Arc::new(NoopTranscriber),
            registry: TriggerRegistry::new(),
            pool: ConnectionPool::new(),
            disabled,
            connections: HashMap::new(),
            internal_tx,
            voice_tx,
            inbox: Some(Inbox {
                internal,
                timers,
                voice,
            }),
        }
    }

    #[must_use]
    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = transcriber;
        self
    }

    /// Serve until `shutdown` fires or the server event stream ends, then
    /// tear everything down and release the lock.
    pub async fn run(
        mut self,
        mut server_events: mpsc::UnboundedReceiver<ServerEvent>,
        shutdown: CancellationToken,
    ) {
        let Some(mut inbox) = self.inbox.take() else {
            return;
        };
        info!("coordinator running");
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                event = server_events.recv() => match event {
                    Some(event) => self.on_server_event(event).await,
                    None => break,
                },
                Some(internal) = inbox.internal.recv() => self.on_internal(internal).await,
                Some(fired) = inbox.timers.recv() => self.on_debounce_fired(fired),
                Some(event) = inbox.voice.recv() => self.on_voice_event(event),
            }
        }
        self.shutdown().await;
    }

    /// Cleanup in dependency order: pending timers, voice sessions, platform
    /// clients, registries, the listener ledger, and finally the lock.
    pub async fn shutdown(&mut self) {
        info!("coordinator shutting down");
        self.debouncer.cancel_all();

        let mut clients: Vec<ReadyClient> = self
            .pool
            .drain()
            .into_iter()
            .filter_map(|(_, entry)| entry.into_ready())
            .collect();
        for client in &mut clients {
            client.voice.destroy_all();
        }
        for client in clients {
            client.close().await;
        }

        self.registry.clear();
        self.connections.clear();
        self.with_ledger(ListenerLedger::clear_all);
        self.lock
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .release();
        #[cfg(feature = "metrics")]
        {
            gauge!(coord_metrics::PLATFORM_CLIENTS_ACTIVE).set(0.0);
            gauge!(coord_metrics::TRIGGERS_ACTIVE).set(0.0);
        }
    }

    pub(crate) fn with_ledger<R>(&self, f: impl FnOnce(&mut ListenerLedger) -> R) -> R {
        let mut lock = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        f(lock.ledger_mut())
    }

    // ── Client side ─────────────────────────────────────────────────────────

    async fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected(handle) => {
                debug!(conn_id = %handle.id, "client connected");
                self.connections.insert(handle.id, handle);
            },
            ServerEvent::Message { from, envelope } => self.on_client_frame(from, envelope).await,
            ServerEvent::Disconnected(conn) => self.on_disconnected(conn),
        }
    }

    fn on_disconnected(&mut self, conn: ConnId) {
        self.connections.remove(&conn);
        let removed = self.registry.remove_connection(conn);
        if removed.is_empty() {
            debug!(conn_id = %conn, "client disconnected");
            return;
        }
        info!(
            conn_id = %conn,
            triggers = removed.triggers.len(),
            voice_triggers = removed.voice.len(),
            "client disconnected, dropping its triggers"
        );
        for node_id in &removed.triggers {
            self.debouncer.cancel_node(node_id);
        }
        for (token, node_id) in &removed.voice {
            self.prune_voice_sessions(token, node_id);
        }
        self.record_trigger_gauge();
    }

    async fn on_client_frame(&mut self, from: ConnId, envelope: Envelope) {
        let Some(conn) = self.connections.get(&from).cloned() else {
            debug!(conn_id = %from, kind = %envelope.kind, "frame from unknown connection");
            return;
        };
        let message = match ClientMessage::from_envelope(&envelope) {
            Ok(message) => message,
            Err(e) => {
                warn!(conn_id = %from, kind = %envelope.kind, error = %e, "ignoring unknown or malformed message");
                return;
            },
        };
        match message {
            ClientMessage::Credentials(credentials) => self.on_credentials(credentials, conn),
            ClientMessage::TriggerNodeRegistered(registration) => {
                let node_id = registration.node_id.clone();
                if self.registry.register(registration, conn) {
                    self.debouncer.cancel_node(&node_id);
                    debug!(node_id = %node_id, "trigger re-registered");
                } else {
                    info!(node_id = %node_id, "trigger registered");
                }
                self.record_trigger_gauge();
            },
            ClientMessage::TriggerNodeRemoved(node) => {
                if self.registry.remove(&node.node_id).is_some() {
                    self.debouncer.cancel_node(&node.node_id);
                    info!(node_id = %node.node_id, "trigger removed");
                }
                self.record_trigger_gauge();
            },
            ClientMessage::VoiceTriggerNodeRegistered(registration) => {
                let node_id = registration.node_id.clone();
                let token = registration.token.clone();
                if let Some(previous) = self.registry.remove_voice(&node_id) {
                    self.registry.register_voice(registration, conn);
                    self.prune_voice_sessions(&previous.token, &node_id);
                    debug!(node_id = %node_id, "voice trigger re-registered");
                } else {
                    self.registry.register_voice(registration, conn);
                    info!(node_id = %node_id, token = pool::token_hint(&token), "voice trigger registered");
                }
                self.record_trigger_gauge();
            },
            ClientMessage::VoiceTriggerNodeRemoved(node) => {
                if let Some(entry) = self.registry.remove_voice(&node.node_id) {
                    self.prune_voice_sessions(&entry.token, &node.node_id);
                    info!(node_id = %node.node_id, "voice trigger removed");
                }
                self.record_trigger_gauge();
            },
            ClientMessage::ListGuilds(request) => {
                self.spawn_list(requests::ListKind::Guilds, request, conn)
            },
            ClientMessage::ListChannels(request) => {
                self.spawn_list(requests::ListKind::Channels, request, conn)
            },
            ClientMessage::ListCategories(request) => {
                self.spawn_list(requests::ListKind::Categories, request, conn)
            },
            ClientMessage::ListRoles(request) => {
                self.spawn_list(requests::ListKind::Roles, request, conn)
            },
            ClientMessage::ListVoiceChannels(request) => {
                self.spawn_list(requests::ListKind::VoiceChannels, request, conn)
            },
            ClientMessage::SendMessage(request) => {
                let Some(client) = self.ready_client(&request.token, names::SEND_MESSAGE) else {
                    return;
                };
                tokio::spawn(requests::send_message(client, request.node_parameters, conn));
            },
            ClientMessage::SendAction(request) => {
                let Some(client) = self.ready_client(&request.token, names::SEND_ACTION) else {
                    return;
                };
                tokio::spawn(requests::send_action(client, request.node_parameters, conn));
            },
            ClientMessage::SendConfirmation(request) => {
                let Some(client) = self.ready_client(&request.token, names::SEND_CONFIRMATION)
                else {
                    return;
                };
                tokio::spawn(requests::send_confirmation(
                    client,
                    request.node_parameters,
                    conn,
                ));
            },
            ClientMessage::ToggleChannel(toggle) => self.on_toggle_channel(toggle, conn).await,
            ClientMessage::CheckChannelStatus(query) => {
                let reply = ChannelStatusReply::new(
                    &query.channel_id,
                    self.disabled.is_disabled(&query.channel_id),
                );
                conn.emit(names::CALLBACK_CHECK_CHANNEL_STATUS, &reply);
            },
        }
    }

    fn ready_client(
        &self,
        token: &str,
        kind: &'static str,
    ) -> Option<Arc<dyn PlatformClient>> {
        let client = self.pool.client(token);
        if client.is_none() {
            debug!(kind, token = pool::token_hint(token), "platform client not ready, ignoring request");
        }
        client
    }

    fn spawn_list(
        &self,
        kind: requests::ListKind,
        request: ListRequest,
        conn: ClientHandle,
    ) {
        let Some(client) = self.ready_client(&request.token, kind.reply_name()) else {
            return;
        };
        tokio::spawn(async move {
            match requests::list(client, kind, &request.guild_ids).await {
                Ok(options) => {
                    conn.emit(kind.reply_name(), &options);
                },
                Err(e) => warn!(kind = kind.reply_name(), error = %e, "list request failed"),
            }
        });
    }

    async fn on_toggle_channel(&mut self, toggle: ToggleChannel, conn: ClientHandle) {
        let reply = match self.disabled.apply(&toggle.channel_id, toggle.action).await {
            Ok(()) => {
                info!(channel_id = %toggle.channel_id, action = ?toggle.action, "channel toggled");
                ToggleReply {
                    success: true,
                    action: Some(toggle.action),
                    channel_id: Some(toggle.channel_id),
                }
            },
            Err(e) => {
                warn!(channel_id = %toggle.channel_id, error = %e, "failed to toggle channel");
                ToggleReply {
                    success: false,
                    action: None,
                    channel_id: None,
                }
            },
        };
        conn.emit(names::CALLBACK_TOGGLE_CHANNEL, &reply);
    }

    // ── Platform clients ────────────────────────────────────────────────────

    fn on_credentials(&mut self, credentials: Credentials, reply: ClientHandle) {
        let acquire = self.pool.get_or_create(&credentials);
        if let Some(status) = acquire.immediate_status() {
            debug!(token = pool::token_hint(&credentials.token), ?status, "credentials answered");
            reply.emit(names::CREDENTIALS, &status);
            return;
        }
        let Acquire::Started { generation } = acquire else {
            return;
        };
        info!(token = pool::token_hint(&credentials.token), "logging in");
        let connector = Arc::clone(&self.connector);
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = connector
                .connect(&credentials.token, &credentials.client_id)
                .await;
            let _ = internal.send(Internal::LoginFinished {
                token: credentials.token,
                generation,
                reply,
                result,
            });
        });
    }

    fn on_login_finished(
        &mut self,
        token: String,
        generation: u64,
        reply: ClientHandle,
        result: switchboard_channels::Result<PlatformConnection>,
    ) {
        let hint = pool::token_hint(&token).to_string();
        let connection = match result {
            Ok(connection) => connection,
            Err(e) => {
                warn!(token = %hint, error = %e, "platform login failed");
                #[cfg(feature = "metrics")]
                counter!(coord_metrics::LOGIN_FAILURES_TOTAL).increment(1);
                self.pool.fail_login(&token, generation);
                reply.emit(names::CREDENTIALS, &CredentialStatus::Error);
                return;
            },
        };
        if !self.pool.is_current(&token, generation) {
            debug!(token = %hint, "discarding superseded login");
            let client = connection.client;
            tokio::spawn(async move { client.shutdown().await });
            return;
        }

        let listener_key = pool::events_listener_key(&token);
        let fresh = self.with_ledger(|ledger| {
            ledger.track_client(&hint);
            ledger.add_listener(&listener_key, EVENTS_LISTENER)
        });
        if !fresh {
            warn!(token = %hint, "event subscription already recorded, replacing it");
        }

        let PlatformConnection { client, events } = connection;
        let pump = tokio::spawn(pump_events(
            events,
            self.internal_tx.clone(),
            token.clone(),
            generation,
        ))
        .abort_handle();
        let voice = VoiceManager::new(
            token.clone(),
            Arc::clone(&client),
            self.voice_tx.clone(),
            self.settings.voice.clone(),
        )
        .with_transcriber(Arc::clone(&self.transcriber));
        let ready = ReadyClient {
            client,
            voice,
            pump,
        };
        if let Err(ready) = self.pool.complete_login(&token, generation, ready) {
            tokio::spawn(ready.close());
            return;
        }
        info!(token = %hint, "platform client ready");
        #[cfg(feature = "metrics")]
        gauge!(coord_metrics::PLATFORM_CLIENTS_ACTIVE).set(self.pool.ready_count() as f64);
        reply.emit(names::CREDENTIALS, &CredentialStatus::Ready);
    }

    /// The client's event stream ended: it logged out or lost its session
    /// for good. The next `credentials` request logs in again.
    fn on_platform_closed(&mut self, token: &str, generation: u64) {
        if !self.pool.is_current(token, generation) {
            return;
        }
        let hint = pool::token_hint(token).to_string();
        warn!(token = %hint, "platform event stream ended, dropping client");
        self.with_ledger(|ledger| {
            ledger.clear_listeners(&pool::events_listener_key(token));
            ledger.forget_client(&hint);
        });
        if let Some(ready) = self.pool.remove(token).and_then(|e| e.into_ready()) {
            tokio::spawn(ready.close());
        }
        #[cfg(feature = "metrics")]
        gauge!(coord_metrics::PLATFORM_CLIENTS_ACTIVE).set(self.pool.ready_count() as f64);
    }

    async fn on_internal(&mut self, internal: Internal) {
        match internal {
            Internal::LoginFinished {
                token,
                generation,
                reply,
                result,
            } => self.on_login_finished(token, generation, reply, result),
            Internal::Platform {
                token,
                generation,
                event,
            } => {
                if self.pool.is_current(&token, generation) {
                    self.on_platform_event(&token, event).await;
                }
            },
            Internal::PlatformClosed { token, generation } => {
                self.on_platform_closed(&token, generation)
            },
            Internal::MessageResolved {
                token,
                message,
                reference,
                candidates,
            } => self.deliver_message(&token, &message, reference.as_ref(), &candidates),
            Internal::ReactionResolved {
                token,
                reaction,
                added,
                message,
                candidates,
            } => self.deliver_reaction(&token, &reaction, added, &message, &candidates),
        }
    }

    // ── Emission ────────────────────────────────────────────────────────────

    /// Push `payload` to the connection owning a trigger.
    pub(crate) fn emit<T: Serialize>(
        conn: &ClientHandle,
        node_id: &str,
        kind: &'static str,
        payload: &T,
    ) {
        if conn.emit(kind, payload) {
            debug!(node_id, kind, "event emitted");
            #[cfg(feature = "metrics")]
            counter!(coord_metrics::EMISSIONS_TOTAL, labels::EVENT => kind).increment(1);
        } else {
            debug!(node_id, kind, conn_id = %conn.id, "connection gone, event dropped");
        }
    }

    pub(crate) fn record_trigger_gauge(&self) {
        #[cfg(feature = "metrics")]
        gauge!(coord_metrics::TRIGGERS_ACTIVE)
            .set((self.registry.len() + self.registry.voice_len()) as f64);
    }
}

async fn pump_events(
    mut events: mpsc::Receiver<PlatformEvent>,
    internal: mpsc::UnboundedSender<Internal>,
    token: String,
    generation: u64,
) {
    while let Some(event) = events.recv().await {
        let forwarded = internal.send(Internal::Platform {
            token: token.clone(),
            generation,
            event,
        });
        if forwarded.is_err() {
            return;
        }
    }
    let _ = internal.send(Internal::PlatformClosed { token, generation });
}
