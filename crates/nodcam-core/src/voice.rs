//! **VoiceSession** — one user question, end to end:
//! Recording → Transcribing → Reasoning → Gesturing → Done.
//!
//! A new session is rejected outright when another component holds the
//! activity lock; overlapping questions would produce ambiguous gestures, so
//! the new trigger is dropped rather than queued. The lock is held through a
//! scoped guard and released on every exit path, including stage failures.

use crate::capture::FrameGrabber;
use crate::coordinator::{ActivityCoordinator, ActivityOwner};
use crate::device::PtzDevice;
use crate::gesture::{Gesture, GestureConfig, GestureEngine};
use crate::mic::AudioRecorder;
use crate::reasoner::VisionReasoner;
use crate::recognizer::{resolve_transcript, SpeechRecognizer, TranscriptOutcome};
use crate::retry::{with_retry, RetryConfig};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What started the session.
#[derive(Debug, Clone)]
pub enum QuestionTrigger {
    /// Record from the configured microphone and transcribe.
    Spoken,
    /// The question text is already known (typed, or extracted by the
    /// wake-word monitor); recording and transcription are skipped.
    Typed(String),
}

/// The reasoner's answer, classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Yes,
    No,
    Ambiguous,
}

/// Terminal state of one session. Benign endings are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The pipeline ran to the end; `Ambiguous` means no gesture was made.
    Answered(Verdict),
    /// Nothing worth transcribing was heard. No reasoner call was made.
    NoSpeech,
    /// Audio carried sound the recognizer could not turn into text.
    Unrecognized,
    /// Another component holds the activity lock; the trigger was dropped.
    Rejected,
    /// A pipeline stage failed unrecoverably; names the stage.
    Failed(&'static str),
}

/// One question's lifecycle record. Mutated as stages complete, logged, then
/// discarded with the session.
#[derive(Debug, Clone, Default)]
pub struct VoiceQuestion {
    pub started_at: Option<DateTime<Utc>>,
    pub capture_bytes: usize,
    pub transcript: Option<String>,
    pub answer: Option<String>,
    pub verdict: Option<Verdict>,
}

/// Classify a reasoner reply: case-folded containment, "yes" wins over "no",
/// anything else is ambiguous.
pub fn classify_answer(reply: &str) -> Verdict {
    let folded = reply.trim().to_lowercase();
    if folded.contains("yes") {
        Verdict::Yes
    } else if folded.contains("no") {
        Verdict::No
    } else {
        Verdict::Ambiguous
    }
}

/// Session tunables.
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Recording cap for spoken questions.
    pub record_max: Duration,
    pub system_prompt: String,
    pub record_retry: RetryConfig,
    pub frame_retry: RetryConfig,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            record_max: Duration::from_secs(6),
            system_prompt: "You are a camera looking at a scene. Answer the user's question \
                            about what you see with a plain yes or no."
                .to_string(),
            record_retry: RetryConfig {
                max_attempts: 2,
                backoff: Duration::from_millis(500),
                timeout: Duration::from_secs(15),
            },
            frame_retry: RetryConfig::default(),
        }
    }
}

/// Coordinates capture → transcribe → ask → gesture for one user question.
pub struct VoiceSession {
    coordinator: Arc<ActivityCoordinator>,
    recorder: Arc<dyn AudioRecorder>,
    frames: Arc<dyn FrameGrabber>,
    recognizer: Arc<dyn SpeechRecognizer>,
    reasoner: Arc<dyn VisionReasoner>,
    engine: GestureEngine<dyn PtzDevice>,
    gesture_config: GestureConfig,
    config: VoiceConfig,
}

impl VoiceSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        coordinator: Arc<ActivityCoordinator>,
        recorder: Arc<dyn AudioRecorder>,
        frames: Arc<dyn FrameGrabber>,
        recognizer: Arc<dyn SpeechRecognizer>,
        reasoner: Arc<dyn VisionReasoner>,
        device: Arc<dyn PtzDevice>,
        gesture_config: GestureConfig,
        config: VoiceConfig,
    ) -> Self {
        Self {
            coordinator,
            recorder,
            frames,
            recognizer,
            reasoner,
            engine: GestureEngine::new(device),
            gesture_config,
            config,
        }
    }

    /// Run one session. Never panics and never blocks on the lock.
    pub async fn run(&self, trigger: QuestionTrigger) -> SessionOutcome {
        let _guard = match self.coordinator.acquire_scoped(ActivityOwner::Voice) {
            Some(g) => g,
            None => {
                info!(
                    holder = ?self.coordinator.holder().map(ActivityOwner::name),
                    "voice session rejected: camera is busy"
                );
                return SessionOutcome::Rejected;
            }
        };

        let mut question = VoiceQuestion {
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        // Recording + Transcribing
        let transcript = match trigger {
            QuestionTrigger::Typed(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    return SessionOutcome::NoSpeech;
                }
                text
            }
            QuestionTrigger::Spoken => {
                let wav = match with_retry("question recording", self.config.record_retry, || {
                    self.recorder.record(self.config.record_max)
                })
                .await
                {
                    Ok(w) => w,
                    Err(e) => {
                        warn!(error = %e, "recording failed; aborting session");
                        return SessionOutcome::Failed("recording");
                    }
                };
                question.capture_bytes = wav.len();

                match resolve_transcript(self.recognizer.as_ref(), &wav).await {
                    TranscriptOutcome::Text(t) => t,
                    TranscriptOutcome::NoSpeech => {
                        info!("no speech detected; session ends without a reasoner call");
                        return SessionOutcome::NoSpeech;
                    }
                    TranscriptOutcome::Unrecognized => {
                        info!("speech present but unrecognized; session ends");
                        return SessionOutcome::Unrecognized;
                    }
                }
            }
        };
        info!(question = %transcript, "question transcribed");
        question.transcript = Some(transcript.clone());

        // Reasoning
        let frame = match with_retry("question frame capture", self.config.frame_retry, || {
            self.frames.grab_frame()
        })
        .await
        {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "frame capture failed; aborting session");
                return SessionOutcome::Failed("capture");
            }
        };

        let prompt = format!(
            "Answer with a plain yes or no, nothing else. Question: {transcript}"
        );
        let answer = match self
            .reasoner
            .ask(&self.config.system_prompt, &prompt, Some(&frame))
            .await
        {
            Some(a) => a,
            None => {
                warn!("reasoner gave no answer; aborting session");
                return SessionOutcome::Failed("reasoning");
            }
        };
        let verdict = classify_answer(&answer);
        question.answer = Some(answer.clone());
        question.verdict = Some(verdict);

        // Gesturing — runs under this session's lock; the engine does not
        // acquire for itself.
        match verdict {
            Verdict::Yes => self.engine.run(&Gesture::affirm(&self.gesture_config)).await,
            Verdict::No => self.engine.run(&Gesture::negate(&self.gesture_config)).await,
            Verdict::Ambiguous => info!(answer = %answer, "ambiguous answer; no gesture"),
        }

        let elapsed_ms = question
            .started_at
            .map(|t| (Utc::now() - t).num_milliseconds())
            .unwrap_or_default();
        info!(
            transcript = %transcript,
            answer = %answer,
            verdict = ?verdict,
            capture_bytes = question.capture_bytes,
            elapsed_ms,
            "voice session complete"
        );
        SessionOutcome::Answered(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PlaceholderFrames;
    use crate::device::{DeviceCommand, MotionVector, ScriptedPtz};
    use crate::mic::{pcm_to_wav, PlaceholderRecorder};
    use crate::reasoner::PlaceholderReasoner;
    use crate::recognizer::PlaceholderRecognizer;

    #[test]
    fn classification_vectors() {
        assert_eq!(classify_answer("YES please"), Verdict::Yes);
        assert_eq!(classify_answer("Not really, no"), Verdict::No);
        assert_eq!(classify_answer("maybe"), Verdict::Ambiguous);
        assert_eq!(classify_answer("  Yes."), Verdict::Yes);
        assert_eq!(classify_answer(""), Verdict::Ambiguous);
    }

    struct Fixture {
        coordinator: Arc<ActivityCoordinator>,
        device: Arc<ScriptedPtz>,
        recognizer: Arc<PlaceholderRecognizer>,
        reasoner: Arc<PlaceholderReasoner>,
        session: VoiceSession,
    }

    fn quick_gestures() -> GestureConfig {
        GestureConfig {
            magnitude: 0.3,
            active_ms: 1,
            rest_ms: 1,
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 1,
            backoff: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    fn fixture(recognizer: PlaceholderRecognizer, reasoner: PlaceholderReasoner) -> Fixture {
        let coordinator = Arc::new(ActivityCoordinator::new());
        let device = Arc::new(ScriptedPtz::new());
        let recognizer = Arc::new(recognizer);
        let reasoner = Arc::new(reasoner);
        let session = VoiceSession::new(
            Arc::clone(&coordinator),
            Arc::new(PlaceholderRecorder::with_wav(pcm_to_wav(&[0.3; 1600], 16000))),
            Arc::new(PlaceholderFrames::new()),
            Arc::clone(&recognizer) as Arc<dyn SpeechRecognizer>,
            Arc::clone(&reasoner) as Arc<dyn VisionReasoner>,
            Arc::clone(&device) as Arc<dyn PtzDevice>,
            quick_gestures(),
            VoiceConfig {
                record_retry: fast_retry(),
                frame_retry: fast_retry(),
                ..Default::default()
            },
        );
        Fixture {
            coordinator,
            device,
            recognizer,
            reasoner,
            session,
        }
    }

    #[tokio::test]
    async fn spoken_yes_drives_affirm() {
        let f = fixture(
            PlaceholderRecognizer::with_text("is the door open"),
            PlaceholderReasoner::with_reply("YES please"),
        );
        let outcome = f.session.run(QuestionTrigger::Spoken).await;
        assert_eq!(outcome, SessionOutcome::Answered(Verdict::Yes));

        let commands = f.device.commands();
        assert!(!commands.is_empty());
        // nod: first step tilts up
        assert_eq!(
            commands[0],
            DeviceCommand::Move(MotionVector::new(0.0, 0.3, 0.0))
        );
        assert_eq!(commands[commands.len() - 1], DeviceCommand::Stop);
        assert_eq!(f.coordinator.holder(), None);
    }

    #[tokio::test]
    async fn no_speech_consumes_no_reasoner_call() {
        let f = fixture(
            PlaceholderRecognizer::no_speech(),
            PlaceholderReasoner::new(),
        );
        let outcome = f.session.run(QuestionTrigger::Spoken).await;
        assert_eq!(outcome, SessionOutcome::NoSpeech);
        assert_eq!(f.reasoner.calls(), 0);
        assert!(f.device.commands().is_empty());
        assert_eq!(f.coordinator.holder(), None);
    }

    #[tokio::test]
    async fn ambiguous_answer_makes_no_gesture() {
        let f = fixture(
            PlaceholderRecognizer::with_text("is it raining"),
            PlaceholderReasoner::with_reply("maybe"),
        );
        let outcome = f.session.run(QuestionTrigger::Spoken).await;
        assert_eq!(outcome, SessionOutcome::Answered(Verdict::Ambiguous));
        assert!(f.device.commands().is_empty());
    }

    #[tokio::test]
    async fn negative_answer_drives_negate() {
        let f = fixture(
            PlaceholderRecognizer::with_text("is anyone there"),
            PlaceholderReasoner::with_reply("Not really, no"),
        );
        let outcome = f.session.run(QuestionTrigger::Spoken).await;
        assert_eq!(outcome, SessionOutcome::Answered(Verdict::No));
        let commands = f.device.commands();
        // head-shake: first step pans left
        assert_eq!(
            commands[0],
            DeviceCommand::Move(MotionVector::new(-0.3, 0.0, 0.0))
        );
    }

    #[tokio::test]
    async fn typed_question_skips_recording() {
        let f = fixture(
            PlaceholderRecognizer::failing(),
            PlaceholderReasoner::with_reply("yes"),
        );
        let outcome = f
            .session
            .run(QuestionTrigger::Typed("is the light on".to_string()))
            .await;
        assert_eq!(outcome, SessionOutcome::Answered(Verdict::Yes));
        assert_eq!(f.recognizer.calls(), 0);
    }

    #[tokio::test]
    async fn busy_lock_rejects_session() {
        let f = fixture(
            PlaceholderRecognizer::with_text("question"),
            PlaceholderReasoner::new(),
        );
        assert!(f.coordinator.try_acquire(ActivityOwner::Analysis));
        let outcome = f.session.run(QuestionTrigger::Spoken).await;
        assert_eq!(outcome, SessionOutcome::Rejected);
        assert_eq!(f.reasoner.calls(), 0);
        // the rejecting session must not have disturbed the holder
        assert_eq!(f.coordinator.holder(), Some(ActivityOwner::Analysis));
    }

    #[tokio::test]
    async fn reasoner_failure_releases_lock() {
        let f = fixture(
            PlaceholderRecognizer::with_text("question"),
            PlaceholderReasoner::failing(),
        );
        let outcome = f.session.run(QuestionTrigger::Spoken).await;
        assert_eq!(outcome, SessionOutcome::Failed("reasoning"));
        assert_eq!(f.coordinator.holder(), None);
    }
}
