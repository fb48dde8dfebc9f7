//! Camera devices and their media tracks.

use crate::error::{LectureHubError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Channel depth between a device and the capture loop.
pub const CHUNK_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Handle to one media track. Clones share the stopped flag.
#[derive(Debug, Clone)]
pub struct Track {
    id: String,
    kind: TrackKind,
    stopped: Arc<AtomicBool>,
}

impl Track {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Releases the track. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!(track_id = %self.id, kind = ?self.kind, "Track stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Start/stop control for a device's recorder.
///
/// Every `start` begins a new recording numbered one higher than the last, and a device
/// that honours the gate emits a self-contained clip (container header first) for it.
/// Devices that record continuously may ignore it.
#[derive(Debug, Clone)]
pub struct RecordingGate {
    state: Arc<watch::Sender<Option<u64>>>,
    started: Arc<AtomicU64>,
}

impl Default for RecordingGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingGate {
    pub fn new() -> Self {
        Self {
            state: Arc::new(watch::channel(None).0),
            started: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn start(&self) {
        let number = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(Some(number));
    }

    pub fn stop(&self) {
        self.state.send_replace(None);
    }

    /// Number of the recording in progress, if any.
    pub fn current(&self) -> Option<u64> {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<u64>> {
        self.state.subscribe()
    }
}

/// An opened camera: its tracks plus the encoded media chunks it produces.
pub struct CameraStream {
    pub tracks: Vec<Track>,
    pub chunks: mpsc::Receiver<Bytes>,
    pub mime_type: String,
    pub gate: RecordingGate,
}

/// A source of encoded video, e.g. a webcam behind a permission prompt.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Opens the device. Fails when access is denied or the device is missing.
    async fn open(&self) -> Result<CameraStream>;
}

/// Replays a media file as a live camera, one chunk per `chunk_interval`.
///
/// Nothing is emitted until the gate starts a recording, and each recording replays the
/// file from its first byte.
#[derive(Debug, Clone)]
pub struct FileCamera {
    path: PathBuf,
    chunk_size: usize,
    chunk_interval: Duration,
    looping: bool,
}

impl FileCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chunk_size: 64 * 1024,
            chunk_interval: Duration::from_millis(250),
            looping: true,
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_interval(mut self, chunk_interval: Duration) -> Self {
        self.chunk_interval = chunk_interval;
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }
}

/// Maps a file extension to the MIME type the recorder would report.
pub fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("webm") => "video/webm",
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl CameraDevice for FileCamera {
    async fn open(&self) -> Result<CameraStream> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| LectureHubError::Device {
                message: format!("Cannot open {}: {}", self.path.display(), e),
            })?;

        let track = Track::new(format!("file:{}", self.path.display()), TrackKind::Video);
        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let gate = RecordingGate::new();

        info!(path = %self.path.display(), "Opened file camera");
        tokio::spawn(pump_file(FilePump {
            file,
            tx,
            track: track.clone(),
            gate: gate.subscribe(),
            chunk_size: self.chunk_size,
            chunk_interval: self.chunk_interval,
            looping: self.looping,
        }));

        Ok(CameraStream {
            tracks: vec![track],
            chunks: rx,
            mime_type: mime_for_path(&self.path).to_string(),
            gate,
        })
    }
}

struct FilePump {
    file: tokio::fs::File,
    tx: mpsc::Sender<Bytes>,
    track: Track,
    gate: watch::Receiver<Option<u64>>,
    chunk_size: usize,
    chunk_interval: Duration,
    looping: bool,
}

/// Feeds file chunks into the channel while a recording is open. Ends, stopping the
/// track, when the track is stopped, the reader goes away, the gate is dropped or the
/// file runs out (an empty file ends right away even when looping).
async fn pump_file(mut pump: FilePump) {
    let mut buf = vec![0u8; pump.chunk_size];
    let mut recording = None;
    let mut read_this_pass = 0usize;

    while !pump.track.is_stopped() {
        let current = *pump.gate.borrow_and_update();
        let Some(number) = current else {
            tokio::select! {
                changed = pump.gate.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = pump.tx.closed() => break,
            }
            continue;
        };

        if recording != Some(number) {
            recording = Some(number);
            read_this_pass = 0;
            if pump.file.seek(SeekFrom::Start(0)).await.is_err() {
                break;
            }
            debug!(recording = number, "File camera restarted from the header");
        }

        let read = match pump.file.read(&mut buf).await {
            Ok(0) if pump.looping && read_this_pass > 0 => {
                read_this_pass = 0;
                if pump.file.seek(SeekFrom::Start(0)).await.is_err() {
                    break;
                }
                continue;
            }
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "File camera read failed");
                break;
            }
        };
        read_this_pass += read;

        // The recording may have closed while the read was pending.
        if *pump.gate.borrow() != Some(number) {
            continue;
        }
        if pump.tx.send(Bytes::copy_from_slice(&buf[..read])).await.is_err() {
            break;
        }
        tokio::time::sleep(pump.chunk_interval).await;
    }
    pump.track.stop();
}
