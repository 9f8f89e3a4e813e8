//! **AnalysisScheduler** — non-overlapping vision polling.
//!
//! On each poll the scheduler either takes the activity lock or skips the
//! cycle outright; skipped cycles are never queued, so polling cannot back up
//! behind a long voice session. Capture or reasoning failures shorten the
//! next cooldown (fast retry) instead of waiting out the steady interval.

use crate::capture::FrameGrabber;
use crate::coordinator::{ActivityCoordinator, ActivityOwner};
use crate::reasoner::VisionReasoner;
use crate::retry::{with_retry, RetryConfig};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How one poll cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Success,
    CaptureFailed,
    ReasonerFailed,
    /// The lock was held by another component; no work was attempted.
    Skipped,
}

/// One poll tick's record. Ephemeral: emitted to the observer, not persisted.
#[derive(Debug, Clone)]
pub struct AnalysisCycle {
    pub started_at: DateTime<Utc>,
    pub verdict: Option<String>,
    pub outcome: CycleOutcome,
}

/// Scheduler tunables.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Steady-state poll interval.
    pub interval: Duration,
    /// Cooldown after a failed cycle (shorter than `interval`).
    pub failure_cooldown: Duration,
    pub system_prompt: String,
    pub prompt: String,
    pub capture_retry: RetryConfig,
    pub reason_retry: RetryConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            failure_cooldown: Duration::from_secs(5),
            system_prompt: "You are watching a camera feed. Answer concisely.".to_string(),
            prompt: "Describe anything notable in this frame.".to_string(),
            capture_retry: RetryConfig::default(),
            reason_retry: RetryConfig {
                max_attempts: 2,
                backoff: Duration::from_secs(1),
                timeout: Duration::from_secs(45),
            },
        }
    }
}

/// Timed frame-capture → reasoning loop, suppressed while any other component
/// holds the activity lock.
pub struct AnalysisScheduler {
    coordinator: Arc<ActivityCoordinator>,
    frames: Arc<dyn FrameGrabber>,
    reasoner: Arc<dyn VisionReasoner>,
    config: AnalysisConfig,
}

impl AnalysisScheduler {
    pub fn new(
        coordinator: Arc<ActivityCoordinator>,
        frames: Arc<dyn FrameGrabber>,
        reasoner: Arc<dyn VisionReasoner>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            coordinator,
            frames,
            reasoner,
            config,
        }
    }

    /// Poll until cancelled. Each cycle is emitted to `observer`. The token is
    /// checked between ticks: the current wait and any cycle in flight run to
    /// completion, but no further cycle arms after it fires.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        observer: mpsc::UnboundedSender<AnalysisCycle>,
    ) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "analysis scheduler started"
        );
        let mut delay = self.config.interval;
        loop {
            tokio::time::sleep(delay).await;
            if cancel.is_cancelled() {
                info!("analysis scheduler shutting down");
                break;
            }

            let cycle = self.run_cycle().await;
            delay = match cycle.outcome {
                CycleOutcome::CaptureFailed | CycleOutcome::ReasonerFailed => {
                    self.config.failure_cooldown
                }
                _ => self.config.interval,
            };
            let _ = observer.send(cycle);
        }
    }

    /// One cycle: acquire-or-skip, capture, reason, release.
    pub async fn run_cycle(&self) -> AnalysisCycle {
        let started_at = Utc::now();

        let _guard = match self.coordinator.acquire_scoped(ActivityOwner::Analysis) {
            Some(g) => g,
            None => {
                debug!(
                    holder = ?self.coordinator.holder().map(ActivityOwner::name),
                    "activity lock busy; skipping analysis cycle"
                );
                return AnalysisCycle {
                    started_at,
                    verdict: None,
                    outcome: CycleOutcome::Skipped,
                };
            }
        };

        let frame = match with_retry("frame capture", self.config.capture_retry, || {
            self.frames.grab_frame()
        })
        .await
        {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "analysis capture failed");
                return AnalysisCycle {
                    started_at,
                    verdict: None,
                    outcome: CycleOutcome::CaptureFailed,
                };
            }
        };

        let verdict = match with_retry("scene analysis", self.config.reason_retry, || {
            self.reason_once(&frame)
        })
        .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "analysis reasoning failed");
                return AnalysisCycle {
                    started_at,
                    verdict: None,
                    outcome: CycleOutcome::ReasonerFailed,
                };
            }
        };

        info!(verdict = %verdict, "analysis cycle complete");
        AnalysisCycle {
            started_at,
            verdict: Some(verdict),
            outcome: CycleOutcome::Success,
        }
    }

    async fn reason_once(&self, frame: &[u8]) -> crate::error::CoreResult<String> {
        self.reasoner
            .ask(&self.config.system_prompt, &self.config.prompt, Some(frame))
            .await
            .ok_or_else(|| {
                crate::error::CoreError::TransientIo("reasoner returned no answer".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PlaceholderFrames;
    use crate::reasoner::PlaceholderReasoner;

    fn fast_config() -> AnalysisConfig {
        AnalysisConfig {
            interval: Duration::from_millis(5),
            failure_cooldown: Duration::from_millis(1),
            capture_retry: RetryConfig {
                max_attempts: 1,
                backoff: Duration::from_millis(1),
                timeout: Duration::from_millis(100),
            },
            reason_retry: RetryConfig {
                max_attempts: 1,
                backoff: Duration::from_millis(1),
                timeout: Duration::from_millis(100),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn skips_while_lock_held() {
        let coordinator = Arc::new(ActivityCoordinator::new());
        let reasoner = Arc::new(PlaceholderReasoner::new());
        let scheduler = AnalysisScheduler::new(
            Arc::clone(&coordinator),
            Arc::new(PlaceholderFrames::new()),
            Arc::clone(&reasoner) as Arc<dyn VisionReasoner>,
            fast_config(),
        );

        assert!(coordinator.try_acquire(ActivityOwner::Voice));
        let cycle = scheduler.run_cycle().await;
        assert_eq!(cycle.outcome, CycleOutcome::Skipped);
        assert_eq!(reasoner.calls(), 0);

        coordinator.release(ActivityOwner::Voice);
        let cycle = scheduler.run_cycle().await;
        assert_eq!(cycle.outcome, CycleOutcome::Success);
        assert_eq!(reasoner.calls(), 1);
    }

    #[tokio::test]
    async fn success_releases_lock_and_carries_verdict() {
        let coordinator = Arc::new(ActivityCoordinator::new());
        let scheduler = AnalysisScheduler::new(
            Arc::clone(&coordinator),
            Arc::new(PlaceholderFrames::new()),
            Arc::new(PlaceholderReasoner::with_reply("a cat on the sofa")),
            fast_config(),
        );

        let cycle = scheduler.run_cycle().await;
        assert_eq!(cycle.outcome, CycleOutcome::Success);
        assert_eq!(cycle.verdict.as_deref(), Some("a cat on the sofa"));
        assert_eq!(coordinator.holder(), None);
    }

    #[tokio::test]
    async fn capture_failure_short_circuits() {
        let coordinator = Arc::new(ActivityCoordinator::new());
        let reasoner = Arc::new(PlaceholderReasoner::new());
        let scheduler = AnalysisScheduler::new(
            Arc::clone(&coordinator),
            Arc::new(PlaceholderFrames::failing()),
            Arc::clone(&reasoner) as Arc<dyn VisionReasoner>,
            fast_config(),
        );

        let cycle = scheduler.run_cycle().await;
        assert_eq!(cycle.outcome, CycleOutcome::CaptureFailed);
        assert_eq!(reasoner.calls(), 0);
        assert_eq!(coordinator.holder(), None);
    }

    #[tokio::test]
    async fn reasoner_failure_is_reported() {
        let coordinator = Arc::new(ActivityCoordinator::new());
        let scheduler = AnalysisScheduler::new(
            coordinator,
            Arc::new(PlaceholderFrames::new()),
            Arc::new(PlaceholderReasoner::failing()),
            fast_config(),
        );

        let cycle = scheduler.run_cycle().await;
        assert_eq!(cycle.outcome, CycleOutcome::ReasonerFailed);
    }

    #[tokio::test]
    async fn loop_stops_on_cancellation() {
        let coordinator = Arc::new(ActivityCoordinator::new());
        let scheduler = Arc::new(AnalysisScheduler::new(
            coordinator,
            Arc::new(PlaceholderFrames::new()),
            Arc::new(PlaceholderReasoner::new()),
            fast_config(),
        ));

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = {
            let scheduler = Arc::clone(&scheduler);
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel, tx).await })
        };

        // at least one cycle lands, then cancellation stops the loop
        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no cycle within 1s");
        assert!(first.is_some());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
