#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end routing through a coordinator driven by detached client
//! handles and the in-memory platform.

use std::{sync::Arc, time::Duration};

use {
    serde_json::json,
    switchboard_channels::{
        MemoryConnector, MemoryPlatform, PlatformConnector, PlatformEvent, SentRecord,
        memory::text_channel,
    },
    switchboard_common::types::{
        ChannelInfo, ChannelKind, ChannelRef, GuildRef, Member, Message, MessageReference,
        Reaction, Role, RoleRef, User, VoiceState,
    },
    switchboard_coordinator::{Coordinator, CoordinatorSettings, FatalCleanup, support},
    switchboard_ipc::{ClientHandle, ServerEvent},
    switchboard_lock::{CoordinatorLock, MemoryLock, SharedLock, shared},
    switchboard_protocol::{
        ChannelStatusQuery, ClientMessage, Credentials, Envelope, ListRequest, NodeRef,
        SendRequest, ToggleAction, ToggleChannel, TriggerParameters, TriggerRegistration,
        VoiceTriggerParameters, VoiceTriggerRegistration, names,
    },
    tokio::{sync::mpsc, task::JoinHandle},
    tokio_util::sync::CancellationToken,
};

const TOKEN: &str = "token-abcdefghijklmnop";
const BOT_ID: &str = "bot-1";

struct Client {
    handle: ClientHandle,
    rx: mpsc::UnboundedReceiver<String>,
}

impl Client {
    async fn next(&mut self) -> Envelope {
        let line = tokio::time::timeout(Duration::from_secs(30), self.rx.recv())
            .await
            .expect("no frame within timeout")
            .expect("connection closed");
        Envelope::decode(&line).unwrap()
    }

    async fn next_of(&mut self, kind: &str) -> Envelope {
        loop {
            let envelope = self.next().await;
            if envelope.kind == kind {
                return envelope;
            }
        }
    }

    fn pending(&mut self) -> Vec<Envelope> {
        let mut frames = Vec::new();
        while let Ok(line) = self.rx.try_recv() {
            frames.push(Envelope::decode(&line).unwrap());
        }
        frames
    }
}

struct Harness {
    events: mpsc::UnboundedSender<ServerEvent>,
    platform: Arc<MemoryPlatform>,
    connector: Arc<MemoryConnector>,
    lock: SharedLock,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Harness {
    async fn start() -> Self {
        Self::with_connector(MemoryConnector::new()).await
    }

    async fn with_connector(connector: MemoryConnector) -> Self {
        let platform = seeded_platform();
        connector.register(TOKEN, Arc::clone(&platform));
        let connector = Arc::new(connector);

        let mut lock: Box<dyn CoordinatorLock> = Box::new(MemoryLock::new());
        assert!(lock.acquire().await.unwrap());
        let lock = shared(lock);

        let coordinator = Coordinator::new(
            CoordinatorSettings::default(),
            Arc::clone(&connector) as Arc<dyn PlatformConnector>,
            Arc::clone(&lock),
        )
        .await;
        let (events, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(coordinator.run(events_rx, shutdown.clone()));
        Self {
            events,
            platform,
            connector,
            lock,
            shutdown,
            task,
        }
    }

    fn connect(&self) -> Client {
        let (handle, rx) = ClientHandle::detached();
        self.events
            .send(ServerEvent::Connected(handle.clone()))
            .unwrap();
        Client { handle, rx }
    }

    fn send(&self, client: &Client, message: &ClientMessage) {
        self.events
            .send(ServerEvent::Message {
                from: client.handle.id,
                envelope: message.to_envelope().unwrap(),
            })
            .unwrap();
    }

    /// Round-trip a request so everything sent before it has been handled.
    async fn sync(&self, client: &mut Client) {
        self.send(
            client,
            &ClientMessage::CheckChannelStatus(ChannelStatusQuery {
                channel_id: "sync".into(),
            }),
        );
        client.next_of(names::CALLBACK_CHECK_CHANNEL_STATUS).await;
    }

    async fn login(&self, client: &mut Client) {
        self.send(client, &credentials(TOKEN));
        let reply = client.next_of(names::CREDENTIALS).await;
        assert_eq!(reply.data, json!("ready"));
    }

    async fn register(&self, client: &mut Client, node_id: &str, parameters: serde_json::Value) {
        let parameters: TriggerParameters = serde_json::from_value(parameters).unwrap();
        self.send(
            client,
            &ClientMessage::TriggerNodeRegistered(TriggerRegistration {
                node_id: node_id.into(),
                token: TOKEN.into(),
                parameters,
            }),
        );
        self.sync(client).await;
    }

    async fn emit(&self, event: PlatformEvent) {
        assert!(self.platform.emit(event).await);
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.task.await.unwrap();
    }
}

fn credentials(token: &str) -> ClientMessage {
    ClientMessage::Credentials(Credentials {
        token: token.into(),
        client_id: "app".into(),
    })
}

fn guild() -> GuildRef {
    GuildRef {
        id: "g1".into(),
        name: "Guild".into(),
    }
}

fn user(id: &str) -> User {
    User {
        id: id.into(),
        username: format!("user-{id}"),
        ..Default::default()
    }
}

fn member(id: &str, manage_channels: bool) -> Member {
    Member {
        user: user(id),
        guild_id: "g1".into(),
        roles: vec![RoleRef {
            id: "r1".into(),
            name: "members".into(),
        }],
        manage_channels,
        ..Default::default()
    }
}

fn seeded_platform() -> Arc<MemoryPlatform> {
    let platform = MemoryPlatform::new(BOT_ID, "switchboard");
    platform.add_guild(guild());
    platform.add_channel(text_channel("c1", "g1", Some("cat1")));
    platform.add_channel(text_channel("c2", "g1", None));
    platform.add_channel(ChannelInfo {
        id: "v1".into(),
        name: "Lounge".into(),
        kind: ChannelKind::GuildVoice,
        guild_id: Some("g1".into()),
        parent_id: None,
    });
    platform.add_member(member("u1", false));
    platform.add_member(member("mod", true));
    platform
}

fn message(id: &str, channel_id: &str, author: &str, content: &str) -> Message {
    Message {
        id: id.into(),
        channel_id: channel_id.into(),
        parent_id: (channel_id == "c1").then(|| "cat1".to_string()),
        guild: Some(guild()),
        author: user(author),
        member: Some(member(author, author == "mod")),
        content: content.into(),
        ..Default::default()
    }
}

fn direct_message(id: &str, content: &str) -> Message {
    Message {
        channel_kind: ChannelKind::Dm,
        channel_id: "dm-u1".into(),
        parent_id: None,
        guild: None,
        member: None,
        ..message(id, "dm-u1", "u1", content)
    }
}

// ── Credentials ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn credentials_lifecycle() {
    let harness = Harness::start().await;
    let mut client = harness.connect();

    harness.send(
        &client,
        &ClientMessage::Credentials(Credentials {
            token: TOKEN.into(),
            client_id: String::new(),
        }),
    );
    assert_eq!(client.next_of(names::CREDENTIALS).await.data, json!("missing"));

    harness.login(&mut client).await;
    harness.send(&client, &credentials(TOKEN));
    assert_eq!(client.next_of(names::CREDENTIALS).await.data, json!("already"));

    harness.send(&client, &credentials("not-a-token"));
    assert_eq!(client.next_of(names::CREDENTIALS).await.data, json!("error"));
    assert_eq!(harness.connector.logins(), 2);
    harness.stop().await;
}

#[tokio::test]
async fn concurrent_logins_share_one_client() {
    let harness =
        Harness::with_connector(MemoryConnector::new().with_login_delay(Duration::from_millis(200)))
            .await;
    let mut first = harness.connect();
    let mut second = harness.connect();
    harness.send(&first, &credentials(TOKEN));
    harness.send(&second, &credentials(TOKEN));

    assert_eq!(second.next_of(names::CREDENTIALS).await.data, json!("login"));
    assert_eq!(first.next_of(names::CREDENTIALS).await.data, json!("ready"));
    assert_eq!(harness.connector.logins(), 1);
    harness.stop().await;
}

// ── Message triggers ────────────────────────────────────────────────────────

#[tokio::test]
async fn matching_message_reaches_its_trigger() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    harness
        .register(&mut client, "n1", json!({ "type": "message", "pattern": "contain", "value": "help" }))
        .await;

    harness
        .emit(PlatformEvent::MessageCreate(message("m1", "c1", "u1", "hello there")))
        .await;
    harness
        .emit(PlatformEvent::MessageCreate(message("m2", "c1", "u1", "can you HELP me")))
        .await;

    let frame = client.next_of(names::MESSAGE_CREATE).await;
    assert_eq!(frame.data["nodeId"], "n1");
    assert_eq!(frame.data["message"]["id"], "m2");
    assert_eq!(frame.data["author"]["id"], "u1");
    assert_eq!(frame.data["memberRoles"][0]["id"], "r1");

    harness.sync(&mut client).await;
    assert!(client
        .pending()
        .iter()
        .all(|f| f.kind != names::MESSAGE_CREATE));
    harness.stop().await;
}

#[tokio::test]
async fn each_connection_gets_its_own_trigger_events() {
    let harness = Harness::start().await;
    let mut a = harness.connect();
    let mut b = harness.connect();
    harness.login(&mut a).await;
    harness
        .register(&mut a, "na", json!({ "type": "message", "pattern": "every" }))
        .await;
    harness
        .register(&mut b, "nb", json!({ "type": "message", "pattern": "start", "value": "!" }))
        .await;

    harness
        .emit(PlatformEvent::MessageCreate(message("m1", "c1", "u1", "!deploy")))
        .await;
    assert_eq!(a.next_of(names::MESSAGE_CREATE).await.data["nodeId"], "na");
    assert_eq!(b.next_of(names::MESSAGE_CREATE).await.data["nodeId"], "nb");
    harness.stop().await;
}

#[tokio::test]
async fn bot_authors_are_ignored_unless_allowed() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    harness
        .register(&mut client, "strict", json!({ "type": "message", "pattern": "every" }))
        .await;
    harness
        .register(
            &mut client,
            "relaxed",
            json!({ "type": "message", "pattern": "every", "additionalFields": { "externalBotTrigger": true } }),
        )
        .await;

    let mut from_bot = message("m1", "c1", "other-bot", "beep");
    from_bot.author.bot = true;
    harness.emit(PlatformEvent::MessageCreate(from_bot)).await;
    let frame = client.next_of(names::MESSAGE_CREATE).await;
    assert_eq!(frame.data["nodeId"], "relaxed");

    let own = message("m2", "c1", BOT_ID, "my own words");
    harness.emit(PlatformEvent::MessageCreate(own)).await;
    harness.sync(&mut client).await;
    assert!(client
        .pending()
        .iter()
        .all(|f| f.kind != names::MESSAGE_CREATE));
    harness.stop().await;
}

#[tokio::test]
async fn reply_carries_the_referenced_message() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    harness
        .register(
            &mut client,
            "n1",
            json!({ "type": "message", "pattern": "every", "messageReferenceRequired": true }),
        )
        .await;

    harness
        .platform
        .insert_message(message("m0", "c1", "mod", "original question"));
    let mut reply = message("m1", "c1", "u1", "answer");
    reply.reference = Some(MessageReference {
        channel_id: "c1".into(),
        message_id: "m0".into(),
    });
    harness
        .emit(PlatformEvent::MessageCreate(message("m-plain", "c1", "u1", "no reply")))
        .await;
    harness.emit(PlatformEvent::MessageCreate(reply)).await;

    let frame = client.next_of(names::MESSAGE_CREATE).await;
    assert_eq!(frame.data["message"]["id"], "m1");
    assert_eq!(frame.data["messageReference"]["id"], "m0");
    assert_eq!(frame.data["referenceAuthor"]["id"], "mod");
    harness.stop().await;
}

#[tokio::test]
async fn direct_messages_only_reach_direct_message_triggers() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    harness
        .register(&mut client, "guild", json!({ "type": "message", "pattern": "every" }))
        .await;
    harness
        .register(&mut client, "dm", json!({ "type": "direct-message", "pattern": "every" }))
        .await;

    harness
        .emit(PlatformEvent::MessageCreate(direct_message("m1", "hi bot")))
        .await;
    let frame = client.next_of(names::MESSAGE_CREATE).await;
    assert_eq!(frame.data["nodeId"], "dm");
    harness.sync(&mut client).await;
    assert!(client.pending().iter().all(|f| f.kind != names::MESSAGE_CREATE));
    harness.stop().await;
}

#[tokio::test]
async fn removed_and_disconnected_triggers_stop_firing() {
    let harness = Harness::start().await;
    let mut owner = harness.connect();
    let mut other = harness.connect();
    harness.login(&mut owner).await;
    harness
        .register(&mut owner, "n1", json!({ "type": "message", "pattern": "every" }))
        .await;
    harness
        .register(&mut other, "n2", json!({ "type": "message", "pattern": "every" }))
        .await;

    harness.send(
        &owner,
        &ClientMessage::TriggerNodeRemoved(NodeRef {
            node_id: "n1".into(),
        }),
    );
    harness
        .events
        .send(ServerEvent::Disconnected(other.handle.id))
        .unwrap();
    harness.sync(&mut owner).await;

    harness
        .emit(PlatformEvent::MessageCreate(message("m1", "c1", "u1", "anyone?")))
        .await;
    harness.sync(&mut owner).await;
    assert!(owner.pending().iter().all(|f| f.kind != names::MESSAGE_CREATE));
    assert!(other.pending().iter().all(|f| f.kind != names::MESSAGE_CREATE));
    harness.stop().await;
}

// ── Debounce and cooldown ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn debounce_emits_the_last_message_of_a_burst() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    harness
        .register(
            &mut client,
            "n1",
            json!({ "type": "message", "pattern": "every", "additionalFields": { "debounceSeconds": 2 } }),
        )
        .await;

    for (id, content) in [("m1", "one"), ("m2", "two"), ("m3", "three")] {
        harness
            .emit(PlatformEvent::MessageCreate(message(id, "c1", "u1", content)))
            .await;
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    let frame = client.next_of(names::MESSAGE_CREATE).await;
    assert_eq!(frame.data["message"]["content"], "three");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(client.pending().iter().all(|f| f.kind != names::MESSAGE_CREATE));
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn removing_a_trigger_drops_its_pending_message() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    for node_id in ["n1", "n2"] {
        harness
            .register(
                &mut client,
                node_id,
                json!({ "type": "message", "pattern": "every", "additionalFields": { "debounceSeconds": 2 } }),
            )
            .await;
    }

    harness
        .emit(PlatformEvent::MessageCreate(message("m1", "c1", "u1", "pending")))
        .await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    harness.send(
        &client,
        &ClientMessage::TriggerNodeRemoved(NodeRef {
            node_id: "n1".into(),
        }),
    );
    harness.sync(&mut client).await;

    let frame = client.next_of(names::MESSAGE_CREATE).await;
    assert_eq!(frame.data["nodeId"], "n2");
    tokio::time::sleep(Duration::from_secs(5)).await;
    harness.sync(&mut client).await;
    assert!(client.pending().iter().all(|f| f.kind != names::MESSAGE_CREATE));
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cooldown_defers_the_second_message() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    harness
        .register(
            &mut client,
            "n1",
            json!({ "type": "message", "pattern": "every", "additionalFields": { "cooldownSeconds": 5 } }),
        )
        .await;

    let start = tokio::time::Instant::now();
    harness
        .emit(PlatformEvent::MessageCreate(message("m1", "c1", "u1", "first")))
        .await;
    let first = client.next_of(names::MESSAGE_CREATE).await;
    assert_eq!(first.data["message"]["content"], "first");

    harness
        .emit(PlatformEvent::MessageCreate(message("m2", "c1", "u1", "second")))
        .await;
    let second = client.next_of(names::MESSAGE_CREATE).await;
    assert_eq!(second.data["message"]["content"], "second");
    assert!(start.elapsed() >= Duration::from_secs(5));
    harness.stop().await;
}

// ── Closing channels ────────────────────────────────────────────────────────

#[tokio::test]
async fn closed_channels_do_not_trigger() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    harness
        .register(&mut client, "n1", json!({ "type": "message", "pattern": "every" }))
        .await;

    harness.send(
        &client,
        &ClientMessage::ToggleChannel(ToggleChannel {
            channel_id: "c1".into(),
            action: ToggleAction::Close,
        }),
    );
    let toggled = client.next_of(names::CALLBACK_TOGGLE_CHANNEL).await;
    assert_eq!(
        toggled.data,
        json!({ "success": true, "action": "close", "channelId": "c1" })
    );

    harness.send(
        &client,
        &ClientMessage::CheckChannelStatus(ChannelStatusQuery {
            channel_id: "c1".into(),
        }),
    );
    let status = client.next_of(names::CALLBACK_CHECK_CHANNEL_STATUS).await;
    assert_eq!(
        status.data,
        json!({ "channelId": "c1", "isDisabled": true, "isEnabled": false })
    );

    harness
        .emit(PlatformEvent::MessageCreate(message("m1", "c1", "u1", "closed")))
        .await;
    harness
        .emit(PlatformEvent::MessageCreate(message("m2", "c2", "u1", "open")))
        .await;
    let frame = client.next_of(names::MESSAGE_CREATE).await;
    assert_eq!(frame.data["message"]["id"], "m2");
    harness.stop().await;
}

#[tokio::test]
async fn support_commands_toggle_and_reply() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    harness
        .register(&mut client, "n1", json!({ "type": "message", "pattern": "every" }))
        .await;

    harness
        .emit(PlatformEvent::MessageCreate(message("m1", "c1", "u1", "/support-close")))
        .await;
    harness
        .emit(PlatformEvent::MessageCreate(message("m2", "c1", "mod", "/support-close")))
        .await;
    harness.sync(&mut client).await;

    // Replies are sent from spawned tasks.
    let mut replies = Vec::new();
    for _ in 0..100 {
        replies = harness
            .platform
            .sent()
            .into_iter()
            .filter_map(|record| match record {
                SentRecord::Reply { to, content } => Some((to, content)),
                _ => None,
            })
            .collect::<Vec<_>>();
        if replies.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    replies.sort();
    assert_eq!(replies, vec![
        ("m1".to_string(), support::PERMISSION_REPLY.to_string()),
        ("m2".to_string(), support::CLOSED_REPLY.to_string()),
    ]);

    harness.send(
        &client,
        &ClientMessage::CheckChannelStatus(ChannelStatusQuery {
            channel_id: "c1".into(),
        }),
    );
    let status = client.next_of(names::CALLBACK_CHECK_CHANNEL_STATUS).await;
    assert_eq!(status.data["isDisabled"], true);
    assert!(client.pending().iter().all(|f| f.kind != names::MESSAGE_CREATE));
    harness.stop().await;
}

// ── Member, role and reaction triggers ──────────────────────────────────────

#[tokio::test]
async fn member_events_respect_the_guild_filter() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    harness
        .register(&mut client, "here", json!({ "type": "user-join", "guildIds": ["g1"] }))
        .await;
    harness
        .register(&mut client, "elsewhere", json!({ "type": "user-join", "guildIds": ["g2"] }))
        .await;

    harness
        .emit(PlatformEvent::MemberAdd {
            member: member("u9", false),
            guild: guild(),
        })
        .await;
    let frame = client.next_of(names::GUILD_MEMBER_ADD).await;
    assert_eq!(frame.data["nodeId"], "here");
    assert_eq!(frame.data["user"]["id"], "u9");
    harness.sync(&mut client).await;
    assert!(client.pending().iter().all(|f| f.kind != names::GUILD_MEMBER_ADD));
    harness.stop().await;
}

#[tokio::test]
async fn role_updates_need_a_visible_change() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    harness
        .register(&mut client, "n1", json!({ "type": "role-update" }))
        .await;

    let role = Role {
        id: "r1".into(),
        guild: guild(),
        name: "members".into(),
        position: 1,
        ..Default::default()
    };
    harness
        .emit(PlatformEvent::RoleUpdate {
            old: role.clone(),
            new: Role {
                position: 4,
                ..role.clone()
            },
        })
        .await;
    harness
        .emit(PlatformEvent::RoleUpdate {
            old: role.clone(),
            new: Role {
                name: "regulars".into(),
                ..role
            },
        })
        .await;
    let frame = client.next_of(names::ROLE_UPDATE).await;
    assert_eq!(frame.data["newRole"]["name"], "regulars");
    assert_eq!(frame.data["oldRole"]["name"], "members");
    harness.sync(&mut client).await;
    assert!(client.pending().iter().all(|f| f.kind != names::ROLE_UPDATE));
    harness.stop().await;
}

#[tokio::test]
async fn reactions_resolve_the_message() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    harness
        .register(
            &mut client,
            "n1",
            json!({ "type": "message-reaction-add", "messageIds": ["m0"] }),
        )
        .await;
    harness
        .platform
        .insert_message(message("m0", "c1", "mod", "vote here"));

    let reaction = |message_id: &str| Reaction {
        emoji: "👍".into(),
        message_id: message_id.into(),
        channel_id: "c1".into(),
        guild_id: Some("g1".into()),
        user: user("u1"),
        member: Some(member("u1", false)),
    };
    harness
        .emit(PlatformEvent::ReactionAdd(reaction("m-other")))
        .await;
    harness.emit(PlatformEvent::ReactionAdd(reaction("m0"))).await;

    let frame = client.next_of(names::MESSAGE_REACTION_ADD).await;
    assert_eq!(frame.data["nodeId"], "n1");
    assert_eq!(frame.data["message"]["content"], "vote here");
    assert_eq!(frame.data["messageReaction"]["emoji"], "👍");
    assert_eq!(frame.data["user"]["id"], "u1");
    harness.stop().await;
}

// ── Voice ───────────────────────────────────────────────────────────────────

fn voice_state(channel: Option<&str>, user_id: &str) -> VoiceState {
    VoiceState {
        guild: guild(),
        channel: channel.map(|id| ChannelRef {
            id: id.into(),
            name: "Lounge".into(),
        }),
        member: Some(member(user_id, false)),
        ..Default::default()
    }
}

async fn register_voice(harness: &Harness, client: &mut Client, node_id: &str, parameters: serde_json::Value) {
    let parameters: VoiceTriggerParameters = serde_json::from_value(parameters).unwrap();
    harness.send(
        client,
        &ClientMessage::VoiceTriggerNodeRegistered(VoiceTriggerRegistration {
            node_id: node_id.into(),
            token: TOKEN.into(),
            parameters,
        }),
    );
    harness.sync(client).await;
}

#[tokio::test]
async fn voice_activity_reports_joins_and_moves() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    register_voice(&harness, &mut client, "va", json!({ "voiceMode": "voice-activity" })).await;

    harness
        .emit(PlatformEvent::VoiceStateUpdate {
            old: voice_state(None, "u1"),
            new: voice_state(Some("v1"), "u1"),
        })
        .await;
    let joined = client.next_of(names::VOICE_ACTIVITY).await;
    assert_eq!(joined.data["action"], "join");
    assert_eq!(joined.data["newChannelId"], "v1");

    harness
        .emit(PlatformEvent::VoiceStateUpdate {
            old: voice_state(Some("v1"), "u1"),
            new: voice_state(Some("v2"), "u1"),
        })
        .await;
    let moved = client.next_of(names::VOICE_ACTIVITY).await;
    assert_eq!(moved.data["action"], "move");
    assert_eq!(moved.data["oldChannelId"], "v1");
    harness.stop().await;
}

#[tokio::test]
async fn voice_state_mode_forwards_snapshots() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    register_voice(
        &harness,
        &mut client,
        "vs",
        json!({ "voiceMode": "voice-state", "voiceChannelIds": ["v1"] }),
    )
    .await;

    let mut muted = voice_state(Some("v1"), "u1");
    muted.self_mute = true;
    harness
        .emit(PlatformEvent::VoiceStateUpdate {
            old: voice_state(Some("v1"), "u1"),
            new: muted,
        })
        .await;
    let frame = client.next_of(names::VOICE_STATE_UPDATE).await;
    assert_eq!(frame.data["newState"]["selfMute"], true);
    assert_eq!(frame.data["oldState"]["selfMute"], false);
    assert_eq!(frame.data["nodeId"], "vs");
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn recording_trigger_joins_records_and_leaves() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    register_voice(
        &harness,
        &mut client,
        "rec",
        json!({ "voiceMode": "voice-recording", "voiceChannelIds": ["v1"] }),
    )
    .await;
    harness
        .platform
        .set_voice_members("g1", "v1", vec![member("u1", false)]);

    harness
        .emit(PlatformEvent::VoiceStateUpdate {
            old: voice_state(None, "u1"),
            new: voice_state(Some("v1"), "u1"),
        })
        .await;
    let mut connection = None;
    for _ in 0..100 {
        connection = harness.platform.voice_connection("g1", "v1");
        if connection.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let connection = connection.expect("voice channel joined");
    tokio::time::sleep(Duration::from_millis(50)).await;
    connection
        .speak("u1", vec![bytes::Bytes::from_static(b"hi")])
        .await;

    let frame = client.next_of(names::VOICE_RECORDING).await;
    assert_eq!(frame.data["nodeId"], "rec");
    assert_eq!(frame.data["recording"]["buffer"], "aGk=");
    assert_eq!(frame.data["user"]["id"], "u1");
    assert_eq!(harness.platform.voice_joins(), 1);

    harness.platform.set_voice_members("g1", "v1", Vec::new());
    harness
        .emit(PlatformEvent::VoiceStateUpdate {
            old: voice_state(Some("v1"), "u1"),
            new: voice_state(None, "u1"),
        })
        .await;
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(connection.is_destroyed());
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn removing_the_voice_trigger_leaves_the_channel() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    register_voice(
        &harness,
        &mut client,
        "rec",
        json!({ "voiceChannelIds": ["v1"], "additionalOptions": { "autoLeave": false } }),
    )
    .await;
    harness
        .emit(PlatformEvent::VoiceStateUpdate {
            old: voice_state(None, "u1"),
            new: voice_state(Some("v1"), "u1"),
        })
        .await;
    let mut connection = None;
    for _ in 0..100 {
        connection = harness.platform.voice_connection("g1", "v1");
        if connection.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let connection = connection.expect("voice channel joined");

    harness.send(
        &client,
        &ClientMessage::VoiceTriggerNodeRemoved(NodeRef {
            node_id: "rec".into(),
        }),
    );
    harness.sync(&mut client).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(connection.is_destroyed());
    harness.stop().await;
}

// ── Requests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn requests_need_a_ready_client() {
    let harness = Harness::start().await;
    let mut client = harness.connect();

    let list = ClientMessage::ListGuilds(ListRequest {
        token: TOKEN.into(),
        guild_ids: Vec::new(),
    });
    harness.send(&client, &list);
    harness.sync(&mut client).await;
    assert!(client.pending().iter().all(|f| f.kind != names::LIST_GUILDS));

    harness.login(&mut client).await;
    harness.send(&client, &list);
    let guilds = client.next_of(names::LIST_GUILDS).await;
    assert_eq!(guilds.data, json!([{ "name": "Guild", "value": "g1" }]));
    harness.stop().await;
}

#[tokio::test]
async fn send_message_replies_with_ids() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;

    let send = |channel_id: &str| {
        ClientMessage::SendMessage(SendRequest {
            token: TOKEN.into(),
            node_parameters: serde_json::from_value(json!({
                "channelId": channel_id,
                "content": "build finished"
            }))
            .unwrap(),
        })
    };
    harness.send(&client, &send("c1"));
    let sent = client.next_of(names::CALLBACK_SEND_MESSAGE).await;
    assert_eq!(sent.data["channelId"], "c1");
    assert!(sent.data["messageId"].is_string());

    harness.send(&client, &send("missing"));
    let failed = client.next_of(names::CALLBACK_SEND_MESSAGE).await;
    assert_eq!(failed.data, json!(false));
    harness.stop().await;
}

#[tokio::test]
async fn confirmation_round_trip() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    harness.platform.set_confirmation(Some(true));

    harness.send(
        &client,
        &ClientMessage::SendConfirmation(SendRequest {
            token: TOKEN.into(),
            node_parameters: serde_json::from_value(json!({
                "channelId": "c1",
                "content": "Deploy to production?"
            }))
            .unwrap(),
        }),
    );
    let reply = client.next_of(names::CALLBACK_SEND_CONFIRMATION).await;
    assert_eq!(reply.data, json!({ "confirmed": true, "success": true }));
    harness.stop().await;
}

// ── Shutdown ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_logs_out_and_releases_the_lock() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    harness
        .register(&mut client, "n1", json!({ "type": "message", "pattern": "every" }))
        .await;
    {
        let lock = harness.lock.lock().unwrap();
        assert!(lock.has_lock());
        assert_eq!(lock.ledger().active_clients(), 1);
    }

    let platform = Arc::clone(&harness.platform);
    let lock = Arc::clone(&harness.lock);
    harness.stop().await;
    assert!(platform.is_shut_down());
    let lock = lock.lock().unwrap();
    assert!(!lock.has_lock());
    assert_eq!(lock.ledger().active_clients(), 0);
    assert!(lock.ledger().listener_keys().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fatal_cleanup_runs_the_full_shutdown() {
    let harness = Harness::start().await;
    let mut client = harness.connect();
    harness.login(&mut client).await;
    register_voice(
        &harness,
        &mut client,
        "rec",
        json!({ "voiceChannelIds": ["v1"], "additionalOptions": { "autoLeave": false } }),
    )
    .await;
    harness
        .emit(PlatformEvent::VoiceStateUpdate {
            old: voice_state(None, "u1"),
            new: voice_state(Some("v1"), "u1"),
        })
        .await;
    let mut connection = None;
    for _ in 0..500 {
        connection = harness.platform.voice_connection("g1", "v1");
        if connection.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let connection = connection.expect("voice channel joined");

    let (cleanup, stopped) = FatalCleanup::new(
        Arc::clone(&harness.lock),
        harness.shutdown.clone(),
        Duration::from_secs(10),
    );
    let Harness {
        events: _events,
        platform,
        lock,
        task,
        ..
    } = harness;
    tokio::spawn(async move {
        task.await.unwrap();
        drop(stopped);
    });

    let finished = tokio::task::spawn_blocking(move || cleanup.run())
        .await
        .unwrap();
    assert!(finished);
    assert!(platform.is_shut_down());
    for _ in 0..500 {
        if connection.is_destroyed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(connection.is_destroyed());
    let lock = lock.lock().unwrap();
    assert!(!lock.has_lock());
    assert_eq!(lock.ledger().active_clients(), 0);
}
