//! **WakeWordMonitor** — continuous listening for an activation phrase.
//!
//! Each iteration records a short window, transcribes it, and checks for the
//! wake phrase by fuzzy containment (the exact phrase or a configured set of
//! near-homophones — the variant list is configuration, not code). On a hit
//! the text after the phrase becomes the question for a full voice session.
//! The loop is cooperatively cancellable: the flag is checked per iteration
//! and an in-flight capture is never interrupted.

use crate::mic::AudioRecorder;
use crate::recognizer::{resolve_transcript, SpeechRecognizer, TranscriptOutcome};
use crate::retry::{with_retry, RetryConfig};
use crate::voice::{QuestionTrigger, VoiceSession};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wake-word loop tunables.
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// The canonical activation phrase.
    pub phrase: String,
    /// Accepted spellings, including near-homophones the recognizer tends to
    /// produce. Matching is case-insensitive containment.
    pub variants: Vec<String>,
    /// Length of each listening window.
    pub listen_window: Duration,
    /// Pause between windows when nothing was heard.
    pub idle_delay: Duration,
    pub listen_retry: RetryConfig,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            phrase: "jarvis".to_string(),
            variants: vec![
                "jarvis".to_string(),
                "jarvus".to_string(),
                "travis".to_string(),
            ],
            listen_window: Duration::from_secs(4),
            idle_delay: Duration::from_millis(500),
            listen_retry: RetryConfig {
                max_attempts: 2,
                backoff: Duration::from_millis(500),
                timeout: Duration::from_secs(10),
            },
        }
    }
}

/// Find a wake variant in the transcript and return the question that
/// follows it, or `None` when no variant occurs or nothing follows.
pub fn extract_question(transcript: &str, variants: &[String]) -> Option<String> {
    let folded = transcript.to_lowercase();
    let mut earliest: Option<(usize, usize)> = None;
    for variant in variants {
        let needle = variant.to_lowercase();
        if needle.is_empty() {
            continue;
        }
        if let Some(pos) = folded.find(&needle) {
            let candidate = (pos, pos + needle.len());
            if earliest.map(|(p, _)| pos < p).unwrap_or(true) {
                earliest = Some(candidate);
            }
        }
    }
    let (_, end) = earliest?;
    let question = folded[end..]
        .trim_start_matches(|c: char| c.is_whitespace() || c == ',' || c == ':' || c == '.')
        .trim()
        .to_string();
    if question.is_empty() {
        None
    } else {
        Some(question)
    }
}

/// Unbounded listen → match → ask loop built on top of `VoiceSession`.
pub struct WakeWordMonitor {
    recorder: Arc<dyn AudioRecorder>,
    recognizer: Arc<dyn SpeechRecognizer>,
    session: Arc<VoiceSession>,
    config: WakeConfig,
}

impl WakeWordMonitor {
    pub fn new(
        recorder: Arc<dyn AudioRecorder>,
        recognizer: Arc<dyn SpeechRecognizer>,
        session: Arc<VoiceSession>,
        config: WakeConfig,
    ) -> Self {
        Self {
            recorder,
            recognizer,
            session,
            config,
        }
    }

    /// Listen until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(phrase = %self.config.phrase, "wake-word monitor started");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.listen_once().await {
                Some(question) => {
                    info!(question = %question, "wake phrase detected");
                    let outcome = self
                        .session
                        .run(QuestionTrigger::Typed(question))
                        .await;
                    info!(?outcome, "wake-triggered session finished");
                }
                None => tokio::time::sleep(self.config.idle_delay).await,
            }
        }
        info!("wake-word monitor stopped");
    }

    /// One listening window: capture, transcribe, match. Not lock-guarded —
    /// listening does not touch the camera or reasoner.
    async fn listen_once(&self) -> Option<String> {
        let wav = match with_retry("wake listening", self.config.listen_retry, || {
            self.recorder.record(self.config.listen_window)
        })
        .await
        {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "wake listening capture failed");
                return None;
            }
        };

        match resolve_transcript(self.recognizer.as_ref(), &wav).await {
            TranscriptOutcome::Text(t) => {
                debug!(heard = %t, "wake window transcribed");
                extract_question(&t, &self.config.variants)
            }
            TranscriptOutcome::NoSpeech | TranscriptOutcome::Unrecognized => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PlaceholderFrames;
    use crate::coordinator::ActivityCoordinator;
    use crate::device::{PtzDevice, ScriptedPtz};
    use crate::gesture::GestureConfig;
    use crate::mic::PlaceholderRecorder;
    use crate::reasoner::{PlaceholderReasoner, VisionReasoner};
    use crate::recognizer::PlaceholderRecognizer;
    use crate::voice::VoiceConfig;

    fn variants() -> Vec<String> {
        WakeConfig::default().variants
    }

    #[test]
    fn extracts_question_after_phrase() {
        assert_eq!(
            extract_question("jarvis is it raining", &variants()).as_deref(),
            Some("is it raining")
        );
    }

    #[test]
    fn no_phrase_no_question() {
        assert_eq!(extract_question("hello there", &variants()), None);
    }

    #[test]
    fn homophone_variant_matches() {
        assert_eq!(
            extract_question("Travis, is the door open", &variants()).as_deref(),
            Some("is the door open")
        );
    }

    #[test]
    fn bare_phrase_yields_nothing() {
        assert_eq!(extract_question("jarvis", &variants()), None);
        assert_eq!(extract_question("jarvis  ,", &variants()), None);
    }

    #[test]
    fn case_insensitive_match() {
        assert_eq!(
            extract_question("JARVIS is it dark outside", &variants()).as_deref(),
            Some("is it dark outside")
        );
    }

    #[tokio::test]
    async fn monitor_feeds_question_into_session() {
        let coordinator = Arc::new(ActivityCoordinator::new());
        let reasoner = Arc::new(PlaceholderReasoner::with_reply("yes"));
        let session = Arc::new(VoiceSession::new(
            coordinator,
            Arc::new(PlaceholderRecorder::new()),
            Arc::new(PlaceholderFrames::new()),
            Arc::new(PlaceholderRecognizer::no_speech()),
            Arc::clone(&reasoner) as Arc<dyn VisionReasoner>,
            Arc::new(ScriptedPtz::new()) as Arc<dyn PtzDevice>,
            GestureConfig {
                magnitude: 0.3,
                active_ms: 1,
                rest_ms: 1,
            },
            VoiceConfig::default(),
        ));

        // hears the wake phrase once, then silence forever
        let listener = PlaceholderRecognizer::with_outcomes(vec![
            Ok(TranscriptOutcome::Text("jarvis is the door open".to_string())),
            Ok(TranscriptOutcome::NoSpeech),
        ]);
        let monitor = Arc::new(WakeWordMonitor::new(
            Arc::new(PlaceholderRecorder::new()),
            Arc::new(listener),
            session,
            WakeConfig {
                idle_delay: Duration::from_millis(1),
                ..Default::default()
            },
        ));

        let cancel = CancellationToken::new();
        let task = {
            let monitor = Arc::clone(&monitor);
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(cancel).await })
        };

        // the extracted question reaches the reasoner exactly once
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while reasoner.calls() == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(reasoner.calls(), 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}
