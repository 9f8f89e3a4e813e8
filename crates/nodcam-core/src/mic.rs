//! Local microphone capture with a trailing-silence early stop.
//!
//! Captures f32 PCM off the default input device in small chunks and stops
//! when the configured maximum elapses or, once something loud has been
//! heard, when the trailing gap of silence exceeds the threshold. The
//! recording is handed to the recognizer as 16-bit WAV.

use crate::digest::DigestAuthClient;
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Microphone capture settings.
#[derive(Debug, Clone)]
pub struct MicConfig {
    /// Sample rate in Hz (default 16000, what the recognizer expects).
    pub sample_rate: u32,
    /// Mono capture.
    pub channels: u16,
    /// Hard cap on recording length.
    pub max_duration: Duration,
    /// Trailing silence that ends the recording early once speech was heard.
    pub silence_gap: Duration,
    /// RMS level below which a chunk counts as silence.
    pub silence_threshold: f32,
}

impl Default for MicConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            max_duration: Duration::from_secs(6),
            silence_gap: Duration::from_millis(800),
            silence_threshold: 0.015,
        }
    }
}

/// Default-input-device recorder. Capture is blocking (the cpal stream is not
/// `Send` on every platform); call from `spawn_blocking` in async contexts.
pub struct LocalMic {
    config: MicConfig,
}

impl LocalMic {
    pub fn new(config: MicConfig) -> Self {
        Self { config }
    }

    /// Record one utterance. Returns raw f32 PCM at the configured rate.
    pub fn record_blocking(&self) -> CoreResult<Vec<f32>> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| CoreError::AudioDevice("no input device available".to_string()))?;
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        info!(device = %name, rate = self.config.sample_rate, "recording from local microphone");

        let stream_config = StreamConfig {
            channels: self.config.channels,
            sample_rate: SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<f32>>();
        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _ = chunk_tx.send(data.to_vec());
                },
                move |err| warn!(error = %err, "input stream error"),
                None,
            )
            .map_err(|e| CoreError::AudioDevice(e.to_string()))?;
        stream
            .play()
            .map_err(|e| CoreError::AudioDevice(e.to_string()))?;

        let started = Instant::now();
        let mut samples: Vec<f32> = Vec::new();
        let mut heard_speech = false;
        let mut last_loud = started;

        while started.elapsed() < self.config.max_duration {
            match chunk_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(chunk) => {
                    let level = rms(&chunk);
                    samples.extend_from_slice(&chunk);
                    if level >= self.config.silence_threshold {
                        heard_speech = true;
                        last_loud = Instant::now();
                    } else if heard_speech && last_loud.elapsed() >= self.config.silence_gap {
                        debug!("trailing silence gap reached; stopping early");
                        break;
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if heard_speech && last_loud.elapsed() >= self.config.silence_gap {
                        debug!("trailing silence gap reached; stopping early");
                        break;
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        drop(stream);

        info!(
            samples = samples.len(),
            seconds = started.elapsed().as_secs_f32(),
            heard_speech,
            "recording finished"
        );
        Ok(samples)
    }

    /// Record and encode as 16-bit WAV in one step.
    pub fn record_wav_blocking(&self) -> CoreResult<Vec<u8>> {
        let samples = self.record_blocking()?;
        Ok(pcm_to_wav(&samples, self.config.sample_rate))
    }
}

/// Root-mean-square level of an f32 PCM buffer.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Encode f32 PCM (mono) to 16-bit WAV bytes.
pub fn pcm_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = samples.len() * 2;
    let mut buf = Vec::with_capacity(44 + data_len);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len as u32).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    // fmt subchunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    // data subchunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &s in samples {
        let i = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        buf.extend_from_slice(&i.to_le_bytes());
    }
    buf
}

/// RMS level of a 16-bit mono WAV body, used by the recognizer fallback to
/// tell "speech the recognizer could not handle" apart from plain silence.
pub fn wav_rms(wav: &[u8]) -> f32 {
    if wav.len() <= 44 {
        return 0.0;
    }
    let data = &wav[44..];
    let mut sum_sq = 0.0f64;
    let mut count = 0usize;
    for pair in data.chunks_exact(2) {
        let v = i16::from_le_bytes([pair[0], pair[1]]) as f64 / 32768.0;
        sum_sq += v * v;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        (sum_sq / count as f64).sqrt() as f32
    }
}

/// Recording source for voice sessions and the wake-word loop. The camera's
/// own microphone and a local one are interchangeable behind this; which is
/// wired in is a configuration decision.
#[async_trait]
pub trait AudioRecorder: Send + Sync {
    /// Record up to `max` of audio, ready for the recognizer.
    async fn record(&self, max: Duration) -> CoreResult<Vec<u8>>;
}

/// Records from the local default input device.
pub struct LocalMicRecorder {
    config: MicConfig,
}

impl LocalMicRecorder {
    pub fn new(config: MicConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AudioRecorder for LocalMicRecorder {
    async fn record(&self, max: Duration) -> CoreResult<Vec<u8>> {
        let mut config = self.config.clone();
        config.max_duration = max;
        // cpal streams are not Send on every platform; record off-runtime
        tokio::task::spawn_blocking(move || LocalMic::new(config).record_wav_blocking())
            .await
            .map_err(|e| CoreError::AudioDevice(format!("recording worker died: {e}")))?
    }
}

/// Pulls audio from the camera's microphone over the digest-authenticated
/// audio endpoint.
pub struct CameraMicRecorder {
    client: Arc<DigestAuthClient>,
    path: String,
}

impl CameraMicRecorder {
    pub fn new(client: Arc<DigestAuthClient>, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }
}

#[async_trait]
impl AudioRecorder for CameraMicRecorder {
    async fn record(&self, max: Duration) -> CoreResult<Vec<u8>> {
        self.client.fetch_audio(&self.path, max).await
    }
}

/// Scripted recorder: pops queued results, then repeats the last behavior.
/// Defaults to a short loud WAV.
pub struct PlaceholderRecorder {
    queued: Mutex<Vec<Result<Vec<u8>, String>>>,
}

impl PlaceholderRecorder {
    pub fn new() -> Self {
        Self {
            queued: Mutex::new(Vec::new()),
        }
    }

    pub fn with_wav(wav: Vec<u8>) -> Self {
        let s = Self::new();
        s.queued.lock().unwrap().push(Ok(wav));
        s
    }

    pub fn failing() -> Self {
        let s = Self::new();
        s.queued
            .lock()
            .unwrap()
            .push(Err("scripted recording failure".to_string()));
        s
    }

    pub fn push(&self, result: Result<Vec<u8>, String>) {
        self.queued.lock().unwrap().push(result);
    }
}

impl Default for PlaceholderRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioRecorder for PlaceholderRecorder {
    async fn record(&self, _max: Duration) -> CoreResult<Vec<u8>> {
        let mut queued = self.queued.lock().unwrap();
        if queued.is_empty() {
            return Ok(pcm_to_wav(&[0.3; 1600], 16000));
        }
        let result = if queued.len() > 1 {
            queued.remove(0)
        } else {
            queued[0].clone()
        };
        result.map_err(CoreError::AudioDevice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.0; 480]), 0.0);
    }

    #[test]
    fn rms_of_constant_signal() {
        let level = rms(&[0.5; 480]);
        assert!((level - 0.5).abs() < 1e-6);
    }

    #[test]
    fn wav_header_and_size() {
        let wav = pcm_to_wav(&[0.0; 480], 16000);
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 480 * 2);
    }

    #[test]
    fn wav_rms_round_trips_level() {
        let loud = pcm_to_wav(&[0.5; 1600], 16000);
        let quiet = pcm_to_wav(&[0.001; 1600], 16000);
        assert!(wav_rms(&loud) > 0.4);
        assert!(wav_rms(&quiet) < 0.01);
        assert_eq!(wav_rms(&[]), 0.0);
    }

    #[test]
    fn clipping_is_clamped() {
        let wav = pcm_to_wav(&[2.0, -2.0], 16000);
        let a = i16::from_le_bytes([wav[44], wav[45]]);
        let b = i16::from_le_bytes([wav[46], wav[47]]);
        assert_eq!(a, 32767);
        assert_eq!(b, -32767);
    }
}
