//! # nodcam — camera interaction orchestrator
//!
//! Drives a network PTZ camera that answers spoken or typed yes/no questions:
//! capture a frame, ask a vision-capable reasoner, and express the answer as
//! a physical nod or head-shake. One actuator, one microphone, and one
//! outstanding AI request are kept consistent while keyboard, polling, and
//! wake-word triggers compete for them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   ActivityCoordinator (lock)                 │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌───────────────┐  │
//! │  │ VoiceSession │  │AnalysisScheduler │  │ GestureEngine │  │
//! │  │ rec→stt→ask  │  │  poll→see→ask    │  │ step→neutral  │  │
//! │  └──────┬───────┘  └────────┬─────────┘  └───────┬───────┘  │
//! │         │                   │                    │          │
//! │  ┌──────┴───────────────────┴────────────────────┴───────┐  │
//! │  │   RetryPolicy over: DigestAuthClient · FrameSource    │  │
//! │  │        SpeechRecognizer · VisionReasoner · PTZ        │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod analysis;
pub mod capture;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod digest;
pub mod error;
pub mod gesture;
pub mod mic;
pub mod reasoner;
pub mod recognizer;
pub mod retry;
pub mod voice;
pub mod wake;

pub use analysis::{AnalysisConfig, AnalysisCycle, AnalysisScheduler, CycleOutcome};
pub use capture::{CaptureKind, CaptureRequest, CaptureResult, FrameGrabber, FrameSource, PlaceholderFrames};
pub use config::{MicSource, NodcamConfig};
pub use coordinator::{ActivityCoordinator, ActivityGuard, ActivityOwner};
pub use device::{DeviceCommand, MotionVector, OnvifPtz, PtzDevice, ScriptedPtz};
pub use digest::{
    digest_authorization, DigestAuthClient, DigestChallenge, DigestCredentials, PlaybackOutcome,
};
pub use error::{CoreError, CoreResult};
pub use gesture::{Gesture, GestureConfig, GestureEngine, GestureStep};
pub use mic::{
    AudioRecorder, CameraMicRecorder, LocalMic, LocalMicRecorder, MicConfig, PlaceholderRecorder,
};
pub use reasoner::{OpenAiVision, PlaceholderReasoner, ReasonerMode, VisionReasoner};
pub use recognizer::{
    resolve_transcript, OpenAiTranscriber, PlaceholderRecognizer, SpeechRecognizer,
    TranscriptOutcome,
};
pub use retry::{with_retry, RetryConfig};
pub use voice::{
    classify_answer, QuestionTrigger, SessionOutcome, Verdict, VoiceConfig, VoiceQuestion,
    VoiceSession,
};
pub use wake::{extract_question, WakeConfig, WakeWordMonitor};
