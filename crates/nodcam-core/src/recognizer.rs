//! Speech recognition boundary and the transcription fallback cascade.
//!
//! The recognizer's "no speech" sentinel is distinct from recognizer failure:
//! the sentinel is benign and mapped to `TranscriptOutcome::NoSpeech` here at
//! the boundary. When the recognizer itself errors, the audio-volume
//! heuristic decides between "speech was present but unrecognized" and plain
//! silence, so the caller sees one explicit three-way outcome instead of a
//! cascade of sentinel strings.

use crate::error::{CoreError, CoreResult};
use crate::mic;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

/// Result of transcribing one recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptOutcome {
    /// Usable transcript text.
    Text(String),
    /// Nothing worth transcribing was heard.
    NoSpeech,
    /// Audio carried sound, but no transcript could be produced.
    Unrecognized,
}

/// The recognition boundary. An `Err` is a recognizer failure, not an empty
/// transcript — the sentinel is already folded into the outcome.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn transcribe(&self, wav: &[u8]) -> CoreResult<TranscriptOutcome>;
}

/// RMS above this means the recording carried audible sound.
const AUDIBLE_RMS: f32 = 0.01;

/// Transcribe with the fallback cascade: recognizer first; on recognizer
/// failure, the volume heuristic distinguishes unrecognized speech from
/// silence.
pub async fn resolve_transcript(
    recognizer: &dyn SpeechRecognizer,
    wav: &[u8],
) -> TranscriptOutcome {
    match recognizer.transcribe(wav).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "recognizer failed; falling back to volume heuristic");
            if mic::wav_rms(wav) >= AUDIBLE_RMS {
                TranscriptOutcome::Unrecognized
            } else {
                TranscriptOutcome::NoSpeech
            }
        }
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI-compatible transcription API backend (multipart WAV upload).
pub struct OpenAiTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    no_speech_sentinel: String,
}

impl OpenAiTranscriber {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        no_speech_sentinel: impl Into<String>,
    ) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            no_speech_sentinel: no_speech_sentinel.into(),
        })
    }

    fn classify(&self, text: &str) -> TranscriptOutcome {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(&self.no_speech_sentinel) {
            TranscriptOutcome::NoSpeech
        } else {
            TranscriptOutcome::Text(trimmed.to_string())
        }
    }
}

#[async_trait]
impl SpeechRecognizer for OpenAiTranscriber {
    async fn transcribe(&self, wav: &[u8]) -> CoreResult<TranscriptOutcome> {
        if wav.len() <= 44 {
            return Ok(TranscriptOutcome::NoSpeech);
        }
        let url = format!("{}/audio/transcriptions", self.base_url);
        let part = reqwest::multipart::Part::bytes(wav.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| CoreError::Recognizer(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CoreError::Recognizer(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CoreError::Recognizer(format!(
                "transcription API error {status}: {body}"
            )));
        }
        let parsed: TranscriptionResponse = res
            .json()
            .await
            .map_err(|e| CoreError::Recognizer(e.to_string()))?;
        Ok(self.classify(&parsed.text))
    }
}

/// Scripted recognizer: pops queued outcomes, then repeats the last; counts
/// calls.
pub struct PlaceholderRecognizer {
    outcomes: Mutex<Vec<Result<TranscriptOutcome, String>>>,
    calls: AtomicUsize,
}

impl PlaceholderRecognizer {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::with_outcomes(vec![Ok(TranscriptOutcome::Text(text.into()))])
    }

    pub fn no_speech() -> Self {
        Self::with_outcomes(vec![Ok(TranscriptOutcome::NoSpeech)])
    }

    /// Recognizer failure (the error path, not the sentinel).
    pub fn failing() -> Self {
        Self::with_outcomes(vec![Err("scripted recognizer failure".to_string())])
    }

    pub fn with_outcomes(outcomes: Vec<Result<TranscriptOutcome, String>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechRecognizer for PlaceholderRecognizer {
    async fn transcribe(&self, _wav: &[u8]) -> CoreResult<TranscriptOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut outcomes = self.outcomes.lock().unwrap();
        let next = if outcomes.len() > 1 {
            outcomes.remove(0)
        } else {
            outcomes
                .first()
                .cloned()
                .unwrap_or(Ok(TranscriptOutcome::NoSpeech))
        };
        next.map_err(CoreError::Recognizer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mic::pcm_to_wav;

    #[tokio::test]
    async fn sentinel_maps_to_no_speech() {
        let t = OpenAiTranscriber::new("http://localhost", "k", "whisper-1", "no speech detected")
            .unwrap();
        assert_eq!(t.classify("no speech detected"), TranscriptOutcome::NoSpeech);
        assert_eq!(t.classify("  NO SPEECH DETECTED  "), TranscriptOutcome::NoSpeech);
        assert_eq!(t.classify(""), TranscriptOutcome::NoSpeech);
        assert_eq!(
            t.classify(" is it raining "),
            TranscriptOutcome::Text("is it raining".to_string())
        );
    }

    #[tokio::test]
    async fn fallback_on_loud_audio_is_unrecognized() {
        let recognizer = PlaceholderRecognizer::failing();
        let loud = pcm_to_wav(&[0.5; 1600], 16000);
        assert_eq!(
            resolve_transcript(&recognizer, &loud).await,
            TranscriptOutcome::Unrecognized
        );
    }

    #[tokio::test]
    async fn fallback_on_quiet_audio_is_no_speech() {
        let recognizer = PlaceholderRecognizer::failing();
        let quiet = pcm_to_wav(&[0.0; 1600], 16000);
        assert_eq!(
            resolve_transcript(&recognizer, &quiet).await,
            TranscriptOutcome::NoSpeech
        );
    }

    #[tokio::test]
    async fn recognizer_outcome_passes_through() {
        let recognizer = PlaceholderRecognizer::with_text("hello camera");
        let wav = pcm_to_wav(&[0.2; 1600], 16000);
        assert_eq!(
            resolve_transcript(&recognizer, &wav).await,
            TranscriptOutcome::Text("hello camera".to_string())
        );
        assert_eq!(recognizer.calls(), 1);
    }
}
