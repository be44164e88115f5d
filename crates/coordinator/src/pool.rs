//! Logged-in platform clients, one per bot token.
//!
//! Every login gets a generation number. Results and events carrying an
//! older generation belong to a client that has since been replaced and are
//! dropped by the owner.

use std::{collections::HashMap, sync::Arc};

use {
    switchboard_channels::PlatformClient,
    switchboard_protocol::{CredentialStatus, Credentials},
    switchboard_voice::VoiceManager,
    tokio::task::AbortHandle,
};

/// Log-safe prefix of a bot token.
pub fn token_hint(token: &str) -> &str {
    token
        .char_indices()
        .nth(10)
        .map_or(token, |(end, _)| &token[..end])
}

/// Ledger key of a token's platform event subscription.
pub fn events_listener_key(token: &str) -> String {
    format!("{}-events", token_hint(token))
}

pub struct ReadyClient {
    pub client: Arc<dyn PlatformClient>,
    pub voice: VoiceManager,
    /// Task forwarding the client's events to the coordinator.
    pub pump: AbortHandle,
}

impl ReadyClient {
    /// Leave every voice channel, stop the event pump and log out.
    pub async fn close(mut self) {
        self.voice.destroy_all();
        self.pump.abort();
        self.client.shutdown().await;
    }
}

enum State {
    LoggingIn,
    Ready(ReadyClient),
}

pub struct PoolEntry {
    pub generation: u64,
    pub client_id: String,
    state: State,
}

impl PoolEntry {
    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    pub fn ready(&self) -> Option<&ReadyClient> {
        match &self.state {
            State::Ready(ready) => Some(ready),
            State::LoggingIn => None,
        }
    }

    pub fn into_ready(self) -> Option<ReadyClient> {
        match self.state {
            State::Ready(ready) => Some(ready),
            State::LoggingIn => None,
        }
    }
}

/// Outcome of a `credentials` request against the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Missing,
    Already,
    InProgress,
    /// A login was registered; the caller performs it.
    Started { generation: u64 },
}

impl Acquire {
    /// Reply to send right away, `None` when the reply waits for the login.
    pub fn immediate_status(self) -> Option<CredentialStatus> {
        match self {
            Self::Missing => Some(CredentialStatus::Missing),
            Self::Already => Some(CredentialStatus::Already),
            Self::InProgress => Some(CredentialStatus::Login),
            Self::Started { .. } => None,
        }
    }
}

#[derive(Default)]
pub struct ConnectionPool {
    entries: HashMap<String, PoolEntry>,
    next_generation: u64,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse the client of `credentials.token` or register a new login.
    pub fn get_or_create(&mut self, credentials: &Credentials) -> Acquire {
        if !credentials.is_complete() {
            return Acquire::Missing;
        }
        match self.entries.get(&credentials.token) {
            Some(entry) if entry.is_ready() => Acquire::Already,
            Some(_) => Acquire::InProgress,
            None => {
                self.next_generation += 1;
                let generation = self.next_generation;
                self.entries.insert(credentials.token.clone(), PoolEntry {
                    generation,
                    client_id: credentials.client_id.clone(),
                    state: State::LoggingIn,
                });
                Acquire::Started { generation }
            },
        }
    }

    pub fn is_current(&self, token: &str, generation: u64) -> bool {
        self.entries
            .get(token)
            .is_some_and(|e| e.generation == generation)
    }

    /// Store a finished login. Returns the client back if the login was
    /// superseded in the meantime.
    pub fn complete_login(
        &mut self,
        token: &str,
        generation: u64,
        ready: ReadyClient,
    ) -> Result<(), ReadyClient> {
        match self.entries.get_mut(token) {
            Some(entry) if entry.generation == generation && !entry.is_ready() => {
                entry.state = State::Ready(ready);
                Ok(())
            },
            _ => Err(ready),
        }
    }

    /// Forget a failed login so the next request retries.
    pub fn fail_login(&mut self, token: &str, generation: u64) -> bool {
        if self.is_current(token, generation) {
            self.entries.remove(token);
            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, token: &str) -> Option<PoolEntry> {
        self.entries.remove(token)
    }

    pub fn client(&self, token: &str) -> Option<Arc<dyn PlatformClient>> {
        self.entries
            .get(token)
            .and_then(PoolEntry::ready)
            .map(|r| Arc::clone(&r.client))
    }

    pub fn voice_mut(&mut self, token: &str) -> Option<&mut VoiceManager> {
        match &mut self.entries.get_mut(token)?.state {
            State::Ready(ready) => Some(&mut ready.voice),
            State::LoggingIn => None,
        }
    }

    pub fn ready_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_ready()).count()
    }

    pub fn drain(&mut self) -> Vec<(String, PoolEntry)> {
        self.entries.drain().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        switchboard_channels::MemoryPlatform,
        switchboard_voice::VoiceSettings,
        tokio::sync::mpsc,
    };

    fn creds(token: &str) -> Credentials {
        Credentials {
            token: token.into(),
            client_id: "app".into(),
        }
    }

    fn ready_client() -> ReadyClient {
        let platform = MemoryPlatform::new("bot", "switchboard");
        let client: Arc<dyn PlatformClient> = platform;
        let (voice_tx, _voice_rx) = mpsc::unbounded_channel();
        let voice = VoiceManager::new("t", Arc::clone(&client), voice_tx, VoiceSettings::default());
        let pump = tokio::spawn(async {}).abort_handle();
        ReadyClient {
            client,
            voice,
            pump,
        }
    }

    #[test]
    fn hints_are_prefixes() {
        assert_eq!(token_hint("abcdefghijklmnop"), "abcdefghij");
        assert_eq!(token_hint("short"), "short");
        assert_eq!(events_listener_key("abcdefghijklmnop"), "abcdefghij-events");
    }

    #[test]
    fn incomplete_credentials_are_missing() {
        let mut pool = ConnectionPool::new();
        let acquire = pool.get_or_create(&Credentials {
            token: "t".into(),
            client_id: String::new(),
        });
        assert_eq!(acquire, Acquire::Missing);
        assert_eq!(acquire.immediate_status(), Some(CredentialStatus::Missing));
    }

    #[tokio::test]
    async fn login_lifecycle() {
        let mut pool = ConnectionPool::new();
        let Acquire::Started { generation } = pool.get_or_create(&creds("t")) else {
            panic!("expected a new login");
        };
        assert_eq!(pool.get_or_create(&creds("t")), Acquire::InProgress);
        assert!(pool.client("t").is_none());

        assert!(pool.complete_login("t", generation, ready_client()).is_ok());
        assert_eq!(pool.get_or_create(&creds("t")), Acquire::Already);
        assert!(pool.client("t").is_some());
        assert_eq!(pool.ready_count(), 1);
    }

    #[tokio::test]
    async fn superseded_login_is_returned() {
        let mut pool = ConnectionPool::new();
        let Acquire::Started { generation } = pool.get_or_create(&creds("t")) else {
            panic!("expected a new login");
        };
        pool.remove("t");
        let Acquire::Started { generation: second } = pool.get_or_create(&creds("t")) else {
            panic!("expected a new login");
        };
        assert_ne!(generation, second);
        assert!(pool.complete_login("t", generation, ready_client()).is_err());
        assert!(!pool.fail_login("t", generation));
        assert!(pool.fail_login("t", second));
        assert!(matches!(pool.get_or_create(&creds("t")), Acquire::Started { .. }));
    }
}
