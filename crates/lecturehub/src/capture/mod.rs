//! Webcam capture loop.
//!
//! One session records a fixed window of media, uploads it as a single clip, waits a
//! fixed pause and starts over:
//!
//! 1. `Recording` for `record_secs` with the device's [`RecordingGate`] open, so each
//!    window is a self-contained clip
//! 2. `IdleWaiting` while the clip uploads (failures are logged and counted)
//! 3. still `IdleWaiting` for `pause_secs`
//! 4. back to 1
//!
//! The loop is a single task, so a cycle never overlaps the next one. The task and its
//! timers belong to [`CaptureSession`]; shutting the session down (or dropping it)
//! aborts them and stops every device track.

mod clip;
pub mod device;

pub use clip::{ClipBuilder, ClipMetadata, VideoClip};
pub use device::{CameraDevice, CameraStream, FileCamera, RecordingGate, Track, TrackKind};

use crate::api::ClipUploader;
use crate::config::CaptureConfig;
use crate::error::Result;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePhase {
    #[default]
    Recording,
    IdleWaiting,
    /// Session shut down or the device stopped producing media
    Released,
}

/// Observable state of a capture session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStatus {
    pub phase: CapturePhase,
    /// Number of the current (or last) cycle, starting at 1
    pub cycle: u64,
    pub clips_uploaded: u64,
    pub uploads_failed: u64,
    /// Cycles that ended with no media to send
    pub clips_skipped: u64,
}

/// A running capture loop bound to one opened camera.
pub struct CaptureSession {
    tracks: Vec<Track>,
    status: Arc<watch::Sender<CaptureStatus>>,
    tasks: JoinSet<()>,
}

impl CaptureSession {
    /// Opens the camera and enters `Recording` right away.
    pub async fn start(
        device: &dyn CameraDevice,
        uploader: Arc<dyn ClipUploader>,
        config: &CaptureConfig,
    ) -> Result<Self> {
        let stream = device.open().await.map_err(|e| {
            error!(error = %e, "Camera access failed");
            e
        })?;

        let CameraStream {
            tracks,
            chunks,
            mime_type,
            gate,
        } = stream;

        let status = Arc::new(watch::channel(CaptureStatus::default()).0);
        let capture_loop = CaptureLoop {
            chunks,
            gate,
            mime_type,
            uploader,
            metadata: ClipMetadata::from(config),
            record: config.record_duration(),
            pause: config.pause_duration(),
            status: status.clone(),
        };

        info!(
            tracks = tracks.len(),
            record_secs = config.record_secs,
            pause_secs = config.pause_secs,
            "Starting capture loop"
        );

        let mut tasks = JoinSet::new();
        tasks.spawn(capture_loop.run());

        Ok(Self {
            tracks,
            status,
            tasks,
        })
    }

    pub fn status(&self) -> CaptureStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureStatus> {
        self.status.subscribe()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Aborts the loop, waits for it to unwind and releases the camera.
    pub async fn shutdown(mut self) {
        info!("Stopping capture session");
        self.tasks.shutdown().await;
        self.release();
    }

    fn release(&self) {
        for track in &self.tracks {
            track.stop();
        }
        self.status.send_modify(|s| s.phase = CapturePhase::Released);
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.tasks.abort_all();
        self.release();
    }
}

struct CaptureLoop {
    chunks: mpsc::Receiver<Bytes>,
    gate: RecordingGate,
    mime_type: String,
    uploader: Arc<dyn ClipUploader>,
    metadata: ClipMetadata,
    record: Duration,
    pause: Duration,
    status: Arc<watch::Sender<CaptureStatus>>,
}

impl CaptureLoop {
    async fn run(mut self) {
        loop {
            let mut cycle = 0;
            self.status.send_modify(|s| {
                s.phase = CapturePhase::Recording;
                s.cycle += 1;
                cycle = s.cycle;
            });

            // Media produced while idle belongs to no window.
            while self.chunks.try_recv().is_ok() {}
            self.gate.start();

            debug!(cycle = cycle, "Recording");
            let (builder, device_ended) = self.record_window().await;
            self.gate.stop();
            self.status.send_modify(|s| s.phase = CapturePhase::IdleWaiting);

            if builder.is_empty() {
                debug!(cycle = cycle, "No media recorded, skipping upload");
                self.status.send_modify(|s| s.clips_skipped += 1);
            } else {
                let clip = builder.finish(cycle, &self.mime_type, self.metadata.clone());
                match self.uploader.upload(clip).await {
                    Ok(result) => {
                        debug!(cycle = cycle, result = %result, "Clip processed");
                        self.status.send_modify(|s| s.clips_uploaded += 1);
                    }
                    Err(e) => {
                        warn!(cycle = cycle, error = %e, "Clip upload failed, continuing");
                        self.status.send_modify(|s| s.uploads_failed += 1);
                    }
                }
            }

            if device_ended {
                warn!(cycle = cycle, "Camera stopped producing media, ending capture");
                break;
            }

            tokio::time::sleep(self.pause).await;
        }

        self.status.send_modify(|s| s.phase = CapturePhase::Released);
    }

    /// Collects chunks until the window closes. The flag is true if the device went away.
    async fn record_window(&mut self) -> (ClipBuilder, bool) {
        let mut builder = ClipBuilder::new();
        let deadline = tokio::time::sleep(self.record);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => return (builder, false),
                chunk = self.chunks.recv() => match chunk {
                    Some(chunk) => builder.push(&chunk),
                    None => return (builder, true),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LectureHubError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::Instant;

    /// Emits chunk `n` at 250ms + n * 500ms; each chunk carries its sequence number.
    struct MockCamera {
        silent: bool,
    }

    #[async_trait]
    impl CameraDevice for MockCamera {
        async fn open(&self) -> Result<CameraStream> {
            let track = Track::new("cam-0", TrackKind::Video);
            let audio = Track::new("mic-0", TrackKind::Audio);
            let (tx, rx) = mpsc::channel(device::CHUNK_CHANNEL_CAPACITY);
            let producer_track = track.clone();
            let silent = self.silent;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(250)).await;
                let mut seq: u32 = 0;
                while !producer_track.is_stopped() {
                    if !silent && tx.send(Bytes::from(seq.to_be_bytes().to_vec())).await.is_err() {
                        break;
                    }
                    if silent && tx.is_closed() {
                        break;
                    }
                    seq += 1;
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            });
            Ok(CameraStream {
                tracks: vec![track, audio],
                chunks: rx,
                mime_type: "video/webm".to_string(),
                gate: RecordingGate::new(),
            })
        }
    }

    struct DeniedCamera;

    #[async_trait]
    impl CameraDevice for DeniedCamera {
        async fn open(&self) -> Result<CameraStream> {
            Err(LectureHubError::Device {
                message: "Permission denied".to_string(),
            })
        }
    }

    struct Upload {
        cycle: u64,
        at: Duration,
        sequences: Vec<u32>,
    }

    struct MockUploader {
        started: Instant,
        fail: AtomicBool,
        tx: mpsc::UnboundedSender<Upload>,
    }

    #[async_trait]
    impl ClipUploader for MockUploader {
        async fn upload(&self, clip: VideoClip) -> Result<serde_json::Value> {
            let sequences = clip
                .data
                .chunks(4)
                .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            let _ = self.tx.send(Upload {
                cycle: clip.cycle,
                at: self.started.elapsed(),
                sequences,
            });
            if self.fail.load(Ordering::SeqCst) {
                return Err(LectureHubError::Network {
                    message: "inference service down".to_string(),
                });
            }
            Ok(serde_json::json!({ "status": "ok" }))
        }
    }

    fn uploader(fail: bool) -> (Arc<MockUploader>, mpsc::UnboundedReceiver<Upload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let uploader = Arc::new(MockUploader {
            started: Instant::now(),
            fail: AtomicBool::new(fail),
            tx,
        });
        (uploader, rx)
    }

    fn assert_near(actual: Duration, expected_secs: u64) {
        let expected = Duration::from_secs(expected_secs);
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(100),
            "expected ~{:?}, got {:?}",
            expected,
            actual
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_pause_cadence_over_three_cycles() {
        let (uploader, mut uploads) = uploader(false);
        let session = CaptureSession::start(
            &MockCamera { silent: false },
            uploader,
            &CaptureConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(session.status().phase, CapturePhase::Recording);

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(uploads.recv().await.unwrap());
        }

        assert_near(seen[0].at, 5);
        assert_near(seen[1].at, 15);
        assert_near(seen[2].at, 25);

        // Window k covers [10k, 10k + 5): chunks 20k..20k+10, nothing from the idle gap.
        for (k, upload) in seen.iter().enumerate() {
            assert_eq!(upload.cycle, k as u64 + 1);
            let first = 20 * k as u32;
            let expected: Vec<u32> = (first..first + 10).collect();
            assert_eq!(upload.sequences, expected);
        }

        let status = session.status();
        assert_eq!(status.clips_uploaded, 3);
        assert_eq!(status.uploads_failed, 0);
        assert_eq!(status.phase, CapturePhase::IdleWaiting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_failures_do_not_stop_the_loop() {
        let (uploader, mut uploads) = uploader(true);
        let session = CaptureSession::start(
            &MockCamera { silent: false },
            uploader,
            &CaptureConfig::default(),
        )
        .await
        .unwrap();

        for _ in 0..3 {
            uploads.recv().await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let status = session.status();
        assert_eq!(status.uploads_failed, 3);
        assert_eq!(status.clips_uploaded, 0);
        assert_eq!(status.cycle, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_cycle_stops_tracks() {
        let (uploader, mut uploads) = uploader(false);
        let session = CaptureSession::start(
            &MockCamera { silent: false },
            uploader,
            &CaptureConfig::default(),
        )
        .await
        .unwrap();
        let tracks = session.tracks().to_vec();
        let status = session.subscribe();

        tokio::time::sleep(Duration::from_secs(2)).await;
        session.shutdown().await;

        assert!(tracks.iter().all(Track::is_stopped));
        assert_eq!(status.borrow().phase, CapturePhase::Released);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(uploads.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_camera() {
        let (uploader, _uploads) = uploader(false);
        let session = CaptureSession::start(
            &MockCamera { silent: false },
            uploader,
            &CaptureConfig::default(),
        )
        .await
        .unwrap();
        let tracks = session.tracks().to_vec();

        tokio::time::sleep(Duration::from_secs(7)).await;
        drop(session);

        assert!(tracks.iter().all(Track::is_stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_window_skips_upload() {
        let (uploader, mut uploads) = uploader(false);
        let session = CaptureSession::start(
            &MockCamera { silent: true },
            uploader,
            &CaptureConfig::default(),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_secs(16)).await;
        let status = session.status();
        assert_eq!(status.clips_skipped, 2);
        assert_eq!(status.cycle, 2);
        assert!(uploads.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_denied_camera_fails_start() {
        let (uploader, _uploads) = uploader(false);
        let config = CaptureConfig::default();
        let result = CaptureSession::start(&DeniedCamera, uploader, &config).await;
        assert!(matches!(result, Err(LectureHubError::Device { .. })));
    }

    struct ClipSink {
        tx: mpsc::UnboundedSender<VideoClip>,
    }

    #[async_trait]
    impl ClipUploader for ClipSink {
        async fn upload(&self, clip: VideoClip) -> Result<serde_json::Value> {
            let _ = self.tx.send(clip);
            Ok(serde_json::json!({ "status": "ok" }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_clip_from_a_file_starts_with_its_header() {
        let mut content = b"HDR!".to_vec();
        content.extend((0..60u8).map(|b| b + 1));
        let path = std::env::temp_dir().join(format!(
            "lecturehub-clips-{}.webm",
            std::process::id()
        ));
        std::fs::write(&path, &content).unwrap();

        let (tx, mut clips) = mpsc::unbounded_channel();
        let camera = FileCamera::new(&path)
            .chunk_size(8)
            .chunk_interval(Duration::from_millis(500));
        let sink = Arc::new(ClipSink { tx });
        let session = CaptureSession::start(&camera, sink, &CaptureConfig::default())
            .await
            .unwrap();

        for cycle in 1..=3u64 {
            let clip = clips.recv().await.unwrap();
            assert_eq!(clip.cycle, cycle);
            assert_eq!(&clip.data[..4], b"HDR!", "clip {} lacks the header", cycle);
            assert_eq!(clip.file_name, "clip.webm");
        }

        session.shutdown().await;
        let _ = std::fs::remove_file(&path);
    }
}
