//! nodcam-console: keyboard-driven control loop for the camera orchestrator.
//!
//! Single-keypress commands map straight onto the core components: a voice or
//! typed question starts a VoiceSession, `w` toggles the wake-word monitor,
//! `a` toggles the background analysis poller, `m` runs the microphone
//! self-test, `q` quits (stopping the camera on the way out).

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use nodcam_core::{
    config::MicSource, ActivityCoordinator, AnalysisScheduler, AudioRecorder, CameraMicRecorder,
    DigestAuthClient, DigestCredentials, FrameGrabber, FrameSource, GestureConfig,
    LocalMicRecorder, NodcamConfig, OnvifPtz, OpenAiTranscriber, OpenAiVision,
    PlaceholderReasoner, PlaybackOutcome, PtzDevice, QuestionTrigger, ReasonerMode,
    SessionOutcome, SpeechRecognizer, Verdict, VisionReasoner, VoiceConfig, VoiceSession,
    WakeWordMonitor,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Load .env if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[nodcam-console] .env not loaded: {e} (using system environment)");
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = NodcamConfig::load().context("load configuration")?;
    let runtime = tokio::runtime::Runtime::new().context("build tokio runtime")?;
    let mut app = App::build(&config)?;

    println!("nodcam console — camera at {}", config.camera.base_url());
    print_legend();

    if config.analysis.enabled {
        app.toggle_analysis(&runtime);
    }

    loop {
        let code = wait_for_key()?;
        match code {
            KeyCode::Char('v') | KeyCode::Char('V') => {
                println!("🎤 Ask your question...");
                let outcome = runtime.block_on(app.session.run(QuestionTrigger::Spoken));
                report_outcome(&outcome);
            }
            KeyCode::Char('t') | KeyCode::Char('T') => {
                if let Some(question) = prompt_line("Type your question: ")? {
                    let outcome = runtime.block_on(app.session.run(QuestionTrigger::Typed(question)));
                    report_outcome(&outcome);
                }
            }
            KeyCode::Char('m') | KeyCode::Char('M') => {
                runtime.block_on(app.mic_self_test());
            }
            KeyCode::Char('w') | KeyCode::Char('W') => {
                app.toggle_wake(&runtime);
            }
            KeyCode::Char('a') | KeyCode::Char('A') => {
                app.toggle_analysis(&runtime);
            }
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => break,
            _ => print_legend(),
        }
    }

    app.shutdown(&runtime);
    println!("👋 Goodbye.");
    Ok(())
}

fn print_legend() {
    println!(
        "Keys: [V] voice question  [T] typed question  [M] mic self-test  [W] wake mode  [A] analysis  [Q] quit"
    );
}

/// Raw mode only while idle, so command output and logs print normally.
fn wait_for_key() -> Result<KeyCode> {
    enable_raw_mode()?;
    let code = loop {
        if event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    break key.code;
                }
            }
        }
    };
    disable_raw_mode()?;
    Ok(code)
}

fn prompt_line(prompt: &str) -> Result<Option<String>> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let line = line.trim().to_string();
    Ok(if line.is_empty() { None } else { Some(line) })
}

fn report_outcome(outcome: &SessionOutcome) {
    match outcome {
        SessionOutcome::Answered(Verdict::Yes) => println!("✅ Yes — the camera nodded."),
        SessionOutcome::Answered(Verdict::No) => println!("❎ No — the camera shook its head."),
        SessionOutcome::Answered(Verdict::Ambiguous) => {
            println!("🤷 The answer was ambiguous; no gesture.")
        }
        SessionOutcome::NoSpeech => println!("🤫 Heard nothing to transcribe."),
        SessionOutcome::Unrecognized => println!("❓ Heard something, but couldn't make it out."),
        SessionOutcome::Rejected => println!("⏳ The camera is busy; try again in a moment."),
        SessionOutcome::Failed(stage) => println!("⚠️ The {stage} stage failed; see logs."),
    }
}

struct App {
    session: Arc<VoiceSession>,
    scheduler: Arc<AnalysisScheduler>,
    wake_monitor: Arc<WakeWordMonitor>,
    device: Arc<dyn PtzDevice>,
    digest: Arc<DigestAuthClient>,
    recorder: Arc<dyn AudioRecorder>,
    audio_push_path: String,
    analysis_cancel: Option<CancellationToken>,
    wake_cancel: Option<CancellationToken>,
}

impl App {
    fn build(config: &NodcamConfig) -> Result<Self> {
        let coordinator = Arc::new(ActivityCoordinator::new());

        let device: Arc<dyn PtzDevice> = Arc::new(
            OnvifPtz::new(
                config.camera.onvif_endpoint(),
                config.camera.profile_token.clone(),
            )
            .context("build PTZ client")?,
        );

        let digest = Arc::new(
            DigestAuthClient::new(
                config.camera.base_url(),
                DigestCredentials {
                    username: config.camera.username.clone(),
                    password: config.camera.password.clone(),
                },
            )
            .context("build digest client")?,
        );

        let recorder: Arc<dyn AudioRecorder> = match config.mic.source() {
            MicSource::Camera => Arc::new(CameraMicRecorder::new(
                Arc::clone(&digest),
                config.camera.audio_fetch_path(),
            )),
            MicSource::Local => Arc::new(LocalMicRecorder::new(config.mic.to_mic_config())),
        };

        let frames: Arc<dyn FrameGrabber> = Arc::new(FrameSource::new(
            config.camera.ffmpeg.clone(),
            config.camera.effective_stream_url(),
        ));

        let recognizer: Arc<dyn SpeechRecognizer> = {
            let api_key = config.recognizer.resolve_api_key().unwrap_or_default();
            if api_key.is_empty() {
                warn!("no recognizer API key configured; transcription will fail over to the volume heuristic");
            }
            Arc::new(
                OpenAiTranscriber::new(
                    config.recognizer.base_url.clone(),
                    api_key,
                    config.recognizer.model.clone(),
                    config.recognizer.no_speech_sentinel.clone(),
                )
                .context("build transcriber")?,
            )
        };

        let reasoner: Arc<dyn VisionReasoner> = match config.reasoner.mode() {
            ReasonerMode::Live => match config.reasoner.resolve_api_key() {
                Some(key) => Arc::new(
                    OpenAiVision::new(
                        config.reasoner.base_url.clone(),
                        key,
                        config.reasoner.model.clone(),
                    )
                    .context("build reasoner")?,
                ),
                None => {
                    warn!("reasoner mode is live but no API key was found; using the mock reasoner");
                    Arc::new(PlaceholderReasoner::new())
                }
            },
            ReasonerMode::Mock => {
                info!("mock reasoner active; every question is answered yes");
                Arc::new(PlaceholderReasoner::new())
            }
        };

        let voice_config = VoiceConfig {
            record_max: config.mic.record_max(),
            ..Default::default()
        };
        let gesture_config: GestureConfig = config.gesture.clone();

        let session = Arc::new(VoiceSession::new(
            Arc::clone(&coordinator),
            Arc::clone(&recorder),
            Arc::clone(&frames),
            Arc::clone(&recognizer),
            Arc::clone(&reasoner),
            Arc::clone(&device),
            gesture_config,
            voice_config,
        ));

        let scheduler = Arc::new(AnalysisScheduler::new(
            Arc::clone(&coordinator),
            Arc::clone(&frames),
            Arc::clone(&reasoner),
            config.analysis.to_config(),
        ));

        let wake_monitor = Arc::new(WakeWordMonitor::new(
            Arc::clone(&recorder),
            Arc::clone(&recognizer),
            Arc::clone(&session),
            config.wake.to_config(),
        ));

        Ok(Self {
            session,
            scheduler,
            wake_monitor,
            device,
            digest,
            recorder,
            audio_push_path: config.camera.audio_push_path(),
            analysis_cancel: None,
            wake_cancel: None,
        })
    }

    fn toggle_analysis(&mut self, runtime: &tokio::runtime::Runtime) {
        match self.analysis_cancel.take() {
            Some(cancel) => {
                cancel.cancel();
                println!("📷 Scene analysis off.");
            }
            None => {
                let cancel = CancellationToken::new();
                let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
                let scheduler = Arc::clone(&self.scheduler);
                runtime.spawn({
                    let cancel = cancel.clone();
                    async move { scheduler.run(cancel, tx).await }
                });
                runtime.spawn(async move {
                    while let Some(cycle) = rx.recv().await {
                        if let Some(verdict) = cycle.verdict {
                            info!(verdict = %verdict, "scene update");
                        }
                    }
                });
                self.analysis_cancel = Some(cancel);
                println!("📷 Scene analysis on.");
            }
        }
    }

    fn toggle_wake(&mut self, runtime: &tokio::runtime::Runtime) {
        match self.wake_cancel.take() {
            Some(cancel) => {
                cancel.cancel();
                println!("💤 Wake mode off.");
            }
            None => {
                let cancel = CancellationToken::new();
                let monitor = Arc::clone(&self.wake_monitor);
                runtime.spawn({
                    let cancel = cancel.clone();
                    async move { monitor.run(cancel).await }
                });
                self.wake_cancel = Some(cancel);
                println!("👂 Wake mode on — say the wake phrase, then your question.");
            }
        }
    }

    /// Record a short clip, report its level, and best-effort play it back
    /// through the camera speaker to exercise the push path.
    async fn mic_self_test(&self) {
        println!("🎙️ Recording 2 seconds...");
        match self.recorder.record(Duration::from_secs(2)).await {
            Ok(audio) => {
                let level = nodcam_core::mic::wav_rms(&audio);
                println!("   {} bytes captured, RMS level {:.4}", audio.len(), level);
                if level < 0.005 {
                    println!("   Level is very low — check the input device.");
                }
                match self.digest.push_audio(&self.audio_push_path, &audio).await {
                    PlaybackOutcome::Accepted => println!("   🔊 Camera accepted playback."),
                    PlaybackOutcome::Unsupported => {
                        println!("   Camera playback unsupported (or unreachable); capture-only.")
                    }
                }
            }
            Err(e) => println!("   Recording failed: {e}"),
        }
    }

    fn shutdown(&mut self, runtime: &tokio::runtime::Runtime) {
        if let Some(cancel) = self.wake_cancel.take() {
            cancel.cancel();
        }
        if let Some(cancel) = self.analysis_cancel.take() {
            cancel.cancel();
        }
        // leave the camera stationary on the way out
        if let Err(e) = runtime.block_on(self.device.stop()) {
            warn!(error = %e, "final stop failed");
        }
    }
}
