//! Client side of the messaging channel, used by workflow processes and the
//! CLI to talk to a running coordinator.

use std::{
    collections::{HashMap, VecDeque},
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    serde::de::DeserializeOwned,
    switchboard_protocol::{
        ChannelStatusQuery, ChannelStatusReply, ClientMessage, CredentialStatus, Credentials,
        Envelope, ListOption, ListRequest, REQUEST_TIMEOUT, ToggleAction, ToggleChannel,
        ToggleReply,
    },
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
        sync::{mpsc, oneshot},
        task::JoinHandle,
    },
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    transport,
};

/// Suffix appended to every explanatory option returned in place of a list.
pub const REOPEN_HINT: &str = " - Close and reopen this node modal once you have made changes.";

type Waiters = Arc<Mutex<HashMap<String, VecDeque<oneshot::Sender<Envelope>>>>>;

pub struct CoordinatorClient {
    writer: mpsc::UnboundedSender<String>,
    waiters: Waiters,
    events: Option<mpsc::UnboundedReceiver<Envelope>>,
    timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl CoordinatorClient {
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = transport::connect(path).await?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already connected stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let waiters: Waiters = Arc::default();

        let write_task = tokio::spawn(async move {
            while let Some(line) = writer_rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let read_waiters = Arc::clone(&waiters);
        let read_task = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "coordinator read error");
                        break;
                    },
                };
                if line.trim().is_empty() {
                    continue;
                }
                let envelope = match Envelope::decode(&line) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(error = %e, "ignoring malformed frame from coordinator");
                        continue;
                    },
                };
                let waiter = take_waiter(&read_waiters, &envelope.kind);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(envelope);
                    },
                    None => {
                        let _ = events_tx.send(envelope);
                    },
                }
            }
            // Dropping the senders wakes every pending request with `Disconnected`.
            if let Ok(mut waiters) = read_waiters.lock() {
                waiters.clear();
            }
        });

        Self {
            writer: writer_tx,
            waiters,
            events: Some(events_rx),
            timeout: REQUEST_TIMEOUT,
            tasks: vec![write_task, read_task],
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Push frames that were not replies to a pending request.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<Envelope>> {
        self.events.take()
    }

    /// Fire-and-forget send.
    pub fn send(&self, message: &ClientMessage) -> Result<()> {
        self.send_envelope(&message.to_envelope()?)
    }

    pub fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        self.writer
            .send(envelope.encode()?)
            .map_err(|_| Error::Disconnected)
    }

    /// Send a request and wait for the frame carrying its reply name.
    pub async fn request<T: DeserializeOwned>(&self, message: &ClientMessage) -> Result<T> {
        let envelope = message.to_envelope()?;
        let reply = message.reply_name().ok_or_else(|| Error::NoReply {
            kind: envelope.kind.clone(),
        })?;

        let (tx, rx) = oneshot::channel();
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.entry(reply.to_string()).or_default().push_back(tx);
        }
        self.send_envelope(&envelope)?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply.payload()?),
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                self.prune_closed(reply);
                Err(Error::Timeout {
                    kind: envelope.kind,
                })
            },
        }
    }

    fn prune_closed(&self, reply: &str) {
        if let Ok(mut waiters) = self.waiters.lock()
            && let Some(queue) = waiters.get_mut(reply)
        {
            queue.retain(|tx| !tx.is_closed());
        }
    }

    pub async fn credentials(&self, token: &str, client_id: &str) -> Result<CredentialStatus> {
        self.request(&ClientMessage::Credentials(Credentials {
            token: token.to_string(),
            client_id: client_id.to_string(),
        }))
        .await
    }

    pub async fn list_guilds(&self, creds: &Credentials) -> Vec<ListOption> {
        let request = ListRequest {
            token: creds.token.clone(),
            guild_ids: Vec::new(),
        };
        self.options(
            creds,
            ClientMessage::ListGuilds(request),
            "Your bot is not part of any guilds. Please add the bot to at least one guild.",
        )
        .await
    }

    pub async fn list_channels(&self, creds: &Credentials, guild_ids: &[String]) -> Vec<ListOption> {
        self.options(
            creds,
            ClientMessage::ListChannels(list_request(creds, guild_ids)),
            "Your Discord server has no text channels, please add at least one text channel",
        )
        .await
    }

    pub async fn list_categories(&self, creds: &Credentials, guild_ids: &[String]) -> Vec<ListOption> {
        self.options(
            creds,
            ClientMessage::ListCategories(list_request(creds, guild_ids)),
            "Your Discord server has no categories, please add at least one category",
        )
        .await
    }

    /// Roles without the implicit `@everyone` role.
    pub async fn list_roles(&self, creds: &Credentials, guild_ids: &[String]) -> Vec<ListOption> {
        let mut options = self
            .options(
                creds,
                ClientMessage::ListRoles(list_request(creds, guild_ids)),
                "Your Discord server has no roles, please add at least one if you want to restrict the trigger to specific users",
            )
            .await;
        options.retain(|o| o.name != "@everyone");
        if options.is_empty() {
            options.push(ListOption::new(
                format!("Your Discord server has no roles, please add at least one if you want to restrict the trigger to specific users{REOPEN_HINT}"),
                "false",
            ));
        }
        options
    }

    pub async fn list_voice_channels(&self, creds: &Credentials, guild_ids: &[String]) -> Vec<ListOption> {
        self.options(
            creds,
            ClientMessage::ListVoiceChannels(list_request(creds, guild_ids)),
            "Your Discord server has no voice channels, please add at least one voice channel",
        )
        .await
    }

    /// Resolve credentials, then run a `list:*` request. Failures become a
    /// single explanatory option with value `"false"`.
    async fn options(
        &self,
        creds: &Credentials,
        message: ClientMessage,
        empty_message: &str,
    ) -> Vec<ListOption> {
        let status = match self.credentials(&creds.token, &creds.client_id).await {
            Ok(status) if status.is_connected() => status,
            Ok(status) => return vec![explain(status.describe())],
            Err(Error::Timeout { .. }) => return vec![explain("timeout")],
            Err(e) => return vec![explain(&e.to_string())],
        };
        debug!(?status, "credentials accepted");

        match self.request::<Vec<ListOption>>(&message).await {
            Ok(options) if !options.is_empty() => options,
            Ok(_) => vec![explain(empty_message)],
            Err(e) => {
                debug!(error = %e, "list request failed");
                vec![ListOption::new("Unexpected error", "false")]
            },
        }
    }

    pub async fn toggle_channel(&self, channel_id: &str, action: ToggleAction) -> Result<ToggleReply> {
        self.request(&ClientMessage::ToggleChannel(ToggleChannel {
            channel_id: channel_id.to_string(),
            action,
        }))
        .await
    }

    pub async fn channel_status(&self, channel_id: &str) -> Result<ChannelStatusReply> {
        self.request(&ClientMessage::CheckChannelStatus(ChannelStatusQuery {
            channel_id: channel_id.to_string(),
        }))
        .await
    }
}

impl Drop for CoordinatorClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn take_waiter(waiters: &Waiters, kind: &str) -> Option<oneshot::Sender<Envelope>> {
    let mut waiters = waiters.lock().ok()?;
    let queue = waiters.get_mut(kind)?;
    while let Some(tx) = queue.pop_front() {
        if !tx.is_closed() {
            return Some(tx);
        }
    }
    None
}

fn list_request(creds: &Credentials, guild_ids: &[String]) -> ListRequest {
    ListRequest {
        token: creds.token.clone(),
        guild_ids: guild_ids.to_vec(),
    }
}

fn explain(message: &str) -> ListOption {
    ListOption::new(format!("{message}{REOPEN_HINT}"), "false")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        switchboard_protocol::names,
        tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    };

    /// A scripted coordinator on the far end of a duplex pipe: answers each
    /// request with the canned reply for its type.
    fn scripted(replies: Vec<(&'static str, serde_json::Value)>) -> CoordinatorClient {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server);
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let env = Envelope::decode(&line).unwrap();
                let msg = ClientMessage::from_envelope(&env).unwrap();
                let Some(reply) = msg.reply_name() else {
                    continue;
                };
                if let Some((_, data)) = replies.iter().find(|(k, _)| *k == reply) {
                    let out = Envelope::new(reply, data.clone()).encode().unwrap();
                    write_half.write_all(out.as_bytes()).await.unwrap();
                }
            }
        });
        CoordinatorClient::from_stream(client)
    }

    fn creds() -> Credentials {
        Credentials {
            token: "tok".into(),
            client_id: "cid".into(),
        }
    }

    #[tokio::test]
    async fn credentials_reply_is_typed() {
        let client = scripted(vec![(names::CREDENTIALS, serde_json::json!("already"))]);
        assert_eq!(
            client.credentials("tok", "cid").await.unwrap(),
            CredentialStatus::Already
        );
    }

    #[tokio::test]
    async fn guild_list_passes_through() {
        let client = scripted(vec![
            (names::CREDENTIALS, serde_json::json!("ready")),
            (
                names::LIST_GUILDS,
                serde_json::json!([{ "name": "Home", "value": "g1" }]),
            ),
        ]);
        let options = client.list_guilds(&creds()).await;
        assert_eq!(options, vec![ListOption::new("Home", "g1")]);
    }

    #[tokio::test]
    async fn bad_credentials_become_an_explanation() {
        let client = scripted(vec![(names::CREDENTIALS, serde_json::json!("error"))]);
        let options = client.list_channels(&creds(), &[]).await;
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].value, "false");
        assert_eq!(
            options[0].name,
            format!("Invalid credentials{REOPEN_HINT}")
        );
    }

    #[tokio::test]
    async fn everyone_role_is_hidden() {
        let client = scripted(vec![
            (names::CREDENTIALS, serde_json::json!("ready")),
            (
                names::LIST_ROLES,
                serde_json::json!([{ "name": "@everyone", "value": "g1" }]),
            ),
        ]);
        let options = client.list_roles(&creds(), &["g1".into()]).await;
        assert_eq!(options.len(), 1);
        assert!(options[0].name.starts_with("Your Discord server has no roles"));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out() {
        let client = scripted(vec![]).with_timeout(Duration::from_secs(15));
        let err = client.channel_status("c1").await.unwrap_err();
        assert!(matches!(err, Error::Timeout { kind } if kind == "support:check-channel-status"));
    }

    #[tokio::test]
    async fn registrations_are_not_requests() {
        let client = scripted(vec![]);
        let msg = ClientMessage::TriggerNodeRemoved(switchboard_protocol::NodeRef {
            node_id: "n".into(),
        });
        assert!(matches!(
            client.request::<serde_json::Value>(&msg).await,
            Err(Error::NoReply { .. })
        ));
        client.send(&msg).unwrap();
    }
}
