//! Per-speaker audio capture.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use {
    base64::{Engine as _, engine::general_purpose::STANDARD},
    bytes::{Bytes, BytesMut},
    switchboard_protocol::RecordingOptions,
    tokio::{sync::mpsc, time::Instant},
};

use crate::error::{Error, Result};

/// Capture limits derived from a trigger's recording options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureLimits {
    pub max_duration: Duration,
    pub silence_timeout: Duration,
    pub min_duration: Duration,
}

impl From<&RecordingOptions> for CaptureLimits {
    fn from(opts: &RecordingOptions) -> Self {
        Self {
            max_duration: secs(opts.max_duration),
            silence_timeout: secs(opts.silence_timeout),
            min_duration: secs(opts.min_speaking_duration / 1000.0),
        }
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

/// Audio collected from one speaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub audio: Bytes,
    pub duration: Duration,
}

impl Captured {
    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.audio)
    }
}

/// Drain `audio` until the platform ends the stream after silence or
/// `max_duration` elapses. Captures shorter than `min_duration` yield `None`.
pub async fn collect(mut audio: mpsc::Receiver<Bytes>, limits: CaptureLimits) -> Option<Captured> {
    let start = Instant::now();
    let deadline = start + limits.max_duration;
    let mut buffer = BytesMut::new();
    loop {
        tokio::select! {
            chunk = audio.recv() => match chunk {
                Some(chunk) => buffer.extend_from_slice(&chunk),
                None => break,
            },
            () = tokio::time::sleep_until(deadline) => break,
        }
    }
    let duration = start.elapsed();
    if duration < limits.min_duration {
        return None;
    }
    Some(Captured {
        audio: buffer.freeze(),
        duration,
    })
}

/// File name for a recording: `<user id>-<unix millis>.<format>`.
pub fn recording_file_name(user_id: &str, timestamp_ms: i64, format: &str) -> String {
    format!("{user_id}-{timestamp_ms}.{format}")
}

/// Write a recording into `dir`, creating it when absent.
pub async fn save(dir: &Path, user_id: &str, format: &str, audio: &[u8]) -> Result<PathBuf> {
    let path = dir.join(recording_file_name(
        user_id,
        chrono::Utc::now().timestamp_millis(),
        format,
    ));
    let wrap = |source| Error::Save {
        path: path.display().to_string(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(wrap)?;
    tokio::fs::write(&path, audio).await.map_err(wrap)?;
    Ok(path)
}
