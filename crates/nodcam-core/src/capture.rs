//! Frame and audio extraction from the camera's RTSP stream via an external
//! ffmpeg process.
//!
//! The extractor may fail (non-zero exit, carried in the error) or hang (the
//! caller's retry policy kills it via its per-attempt timeout; `kill_on_drop`
//! reaps the child when the future is abandoned).

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// What to pull from the stream.
#[derive(Debug, Clone)]
pub enum CaptureKind {
    /// One still image.
    Frame,
    /// Up to `max` of raw audio, resampled to 16 kHz mono WAV.
    Audio { max: Duration },
}

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub source_url: String,
    pub kind: CaptureKind,
}

#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

/// Runs ffmpeg against the stream URL and collects stdout.
pub struct FrameSource {
    ffmpeg: String,
    stream_url: String,
}

impl FrameSource {
    pub fn new(ffmpeg: impl Into<String>, stream_url: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            stream_url: stream_url.into(),
        }
    }

    pub async fn capture(&self, request: &CaptureRequest) -> CoreResult<CaptureResult> {
        let (args, mime): (Vec<String>, &'static str) = match &request.kind {
            CaptureKind::Frame => (
                vec![
                    "-rtsp_transport".into(),
                    "tcp".into(),
                    "-i".into(),
                    request.source_url.clone(),
                    "-frames:v".into(),
                    "1".into(),
                    "-c:v".into(),
                    "mjpeg".into(),
                    "-f".into(),
                    "image2".into(),
                    "pipe:1".into(),
                ],
                "image/jpeg",
            ),
            CaptureKind::Audio { max } => (
                vec![
                    "-rtsp_transport".into(),
                    "tcp".into(),
                    "-i".into(),
                    request.source_url.clone(),
                    "-t".into(),
                    format!("{:.1}", max.as_secs_f32()),
                    "-vn".into(),
                    "-acodec".into(),
                    "pcm_s16le".into(),
                    "-ar".into(),
                    "16000".into(),
                    "-ac".into(),
                    "1".into(),
                    "-f".into(),
                    "wav".into(),
                    "pipe:1".into(),
                ],
                "audio/wav",
            ),
        };

        debug!(url = %request.source_url, kind = ?request.kind, "spawning extractor");
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::Process {
                code: output.status.code(),
                stderr: stderr.chars().take(300).collect(),
            });
        }
        if output.stdout.is_empty() {
            return Err(CoreError::NoData);
        }

        Ok(CaptureResult {
            bytes: output.stdout,
            mime,
        })
    }

    /// One still frame from the configured stream.
    pub async fn frame(&self) -> CoreResult<Vec<u8>> {
        self.capture(&CaptureRequest {
            source_url: self.stream_url.clone(),
            kind: CaptureKind::Frame,
        })
        .await
        .map(|r| r.bytes)
    }

    /// Up to `max` of stream audio as 16 kHz mono WAV.
    pub async fn audio(&self, max: Duration) -> CoreResult<Vec<u8>> {
        self.capture(&CaptureRequest {
            source_url: self.stream_url.clone(),
            kind: CaptureKind::Audio { max },
        })
        .await
        .map(|r| r.bytes)
    }
}

/// The frame supplier the scheduler and voice sessions depend on; lets tests
/// run without a stream.
#[async_trait]
pub trait FrameGrabber: Send + Sync {
    async fn grab_frame(&self) -> CoreResult<Vec<u8>>;
}

#[async_trait]
impl FrameGrabber for FrameSource {
    async fn grab_frame(&self) -> CoreResult<Vec<u8>> {
        self.frame().await
    }
}

/// Scripted frame supplier: pops queued results, then repeats the last
/// behavior. Defaults to a tiny fake JPEG.
pub struct PlaceholderFrames {
    queued: Mutex<Vec<CoreResult<Vec<u8>>>>,
}

impl PlaceholderFrames {
    pub fn new() -> Self {
        Self {
            queued: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        let s = Self::new();
        s.queued
            .lock()
            .unwrap()
            .push(Err(CoreError::NoData));
        s
    }

    pub fn push(&self, result: CoreResult<Vec<u8>>) {
        self.queued.lock().unwrap().push(result);
    }
}

impl Default for PlaceholderFrames {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameGrabber for PlaceholderFrames {
    async fn grab_frame(&self) -> CoreResult<Vec<u8>> {
        let mut queued = self.queued.lock().unwrap();
        if queued.is_empty() {
            return Ok(vec![0xFF, 0xD8, 0xFF, 0xD9]);
        }
        let result = queued.remove(0);
        if queued.is_empty() {
            // keep repeating the terminal behavior
            match &result {
                Ok(bytes) => queued.push(Ok(bytes.clone())),
                Err(_) => queued.push(Err(CoreError::NoData)),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placeholder_defaults_to_fake_jpeg() {
        let frames = PlaceholderFrames::new();
        let bytes = frames.grab_frame().await.unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn placeholder_repeats_terminal_failure() {
        let frames = PlaceholderFrames::failing();
        assert!(frames.grab_frame().await.is_err());
        assert!(frames.grab_frame().await.is_err());
    }

    #[tokio::test]
    async fn missing_binary_is_an_io_error() {
        let source = FrameSource::new("/nonexistent/ffmpeg", "rtsp://cam/stream");
        let err = source.frame().await.unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
