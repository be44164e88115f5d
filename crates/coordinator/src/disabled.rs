//! Channels closed for workflow triggering, persisted as a JSON array.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use {
    switchboard_protocol::ToggleAction,
    tracing::{debug, warn},
};

use crate::error::{Context, Result};

#[derive(Debug, Default)]
pub struct DisabledChannels {
    path: Option<PathBuf>,
    channels: BTreeSet<String>,
}

impl DisabledChannels {
    /// A set that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the set from `path`. A missing or unreadable file yields an
    /// empty set; the file is recreated on the next change.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let channels = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(ids) => ids.into_iter().collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring malformed disabled-channel list");
                    BTreeSet::new()
                },
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read disabled-channel list");
                BTreeSet::new()
            },
        };
        debug!(path = %path.display(), count = channels.len(), "disabled channels loaded");
        Self {
            path: Some(path),
            channels,
        }
    }

    pub fn is_disabled(&self, channel_id: &str) -> bool {
        self.channels.contains(channel_id)
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Apply `action` to `channel_id` and persist the whole set. The set is
    /// left unchanged when the write fails.
    pub async fn apply(&mut self, channel_id: &str, action: ToggleAction) -> Result<()> {
        let mut next = self.channels.clone();
        match action {
            ToggleAction::Close => {
                next.insert(channel_id.to_string());
            },
            ToggleAction::Open => {
                next.remove(channel_id);
            },
        }
        if let Some(path) = &self.path {
            persist(path, &next).await?;
        }
        self.channels = next;
        Ok(())
    }
}

async fn persist(path: &Path, channels: &BTreeSet<String>) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let ids: Vec<&String> = channels.iter().collect();
    let body = serde_json::to_string_pretty(&ids)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body)
        .await
        .with_context(|| format!("write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
