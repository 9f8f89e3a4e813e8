//! **ActivityCoordinator** — the single-owner lock serializing the camera,
//! microphone, and reasoner.
//!
//! Replaces the scattered "in progress" booleans of the original controller
//! with one cell holding `Free` or `HeldBy(owner)`. Acquisition is
//! non-blocking: components skip or reject when the lock is busy, they never
//! queue behind it. The cell is a compare-and-set atomic so the invariant
//! survives a move to genuinely parallel tasks.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

const FREE: u8 = 0;

/// Components that may own the activity lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActivityOwner {
    Gesture = 1,
    Analysis = 2,
    Voice = 3,
}

impl ActivityOwner {
    pub fn name(self) -> &'static str {
        match self {
            ActivityOwner::Gesture => "gesture",
            ActivityOwner::Analysis => "analysis",
            ActivityOwner::Voice => "voice",
        }
    }

    fn from_cell(v: u8) -> Option<Self> {
        match v {
            1 => Some(ActivityOwner::Gesture),
            2 => Some(ActivityOwner::Analysis),
            3 => Some(ActivityOwner::Voice),
            _ => None,
        }
    }
}

/// Lock state: `Free` or `HeldBy(owner)`. Transitions only Free→Held and
/// Held→Free, both by compare-and-set.
pub struct ActivityCoordinator {
    cell: AtomicU8,
}

impl ActivityCoordinator {
    pub fn new() -> Self {
        Self {
            cell: AtomicU8::new(FREE),
        }
    }

    /// Try to take the lock. Never waits; reports whether the lock was
    /// obtained. Re-acquisition by the current owner succeeds (a voice
    /// session keeps the lock while it drives the gesture engine).
    pub fn try_acquire(&self, owner: ActivityOwner) -> bool {
        match self
            .cell
            .compare_exchange(FREE, owner as u8, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                debug!(owner = owner.name(), "activity lock acquired");
                true
            }
            Err(current) => current == owner as u8,
        }
    }

    /// Release the lock if `owner` holds it. A mismatched release is a bug in
    /// the caller and is logged, not acted on.
    pub fn release(&self, owner: ActivityOwner) {
        match self
            .cell
            .compare_exchange(owner as u8, FREE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => debug!(owner = owner.name(), "activity lock released"),
            Err(current) => debug!(
                owner = owner.name(),
                held_by = ?ActivityOwner::from_cell(current).map(ActivityOwner::name),
                "release ignored: lock not held by releasing owner"
            ),
        }
    }

    /// Current holder, if any.
    pub fn holder(&self) -> Option<ActivityOwner> {
        ActivityOwner::from_cell(self.cell.load(Ordering::Acquire))
    }

    /// Acquire with scoped release: the returned guard frees the lock on every
    /// exit path, including panics and early returns. Returns `None` when the
    /// lock is busy — also when `owner` itself already holds it, since the
    /// existing guard will do the release.
    pub fn acquire_scoped(self: &Arc<Self>, owner: ActivityOwner) -> Option<ActivityGuard> {
        if self
            .cell
            .compare_exchange(FREE, owner as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!(owner = owner.name(), "activity lock acquired (scoped)");
            Some(ActivityGuard {
                coordinator: Arc::clone(self),
                owner,
            })
        } else {
            None
        }
    }
}

impl Default for ActivityCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII holder of the activity lock. Dropping releases.
pub struct ActivityGuard {
    coordinator: Arc<ActivityCoordinator>,
    owner: ActivityOwner,
}

impl ActivityGuard {
    pub fn owner(&self) -> ActivityOwner {
        self.owner
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.coordinator.release(self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_acquire() {
        let lock = ActivityCoordinator::new();
        assert!(lock.try_acquire(ActivityOwner::Voice));
        assert!(!lock.try_acquire(ActivityOwner::Analysis));
        assert!(!lock.try_acquire(ActivityOwner::Gesture));
        assert_eq!(lock.holder(), Some(ActivityOwner::Voice));
    }

    #[test]
    fn reentrant_same_owner() {
        let lock = ActivityCoordinator::new();
        assert!(lock.try_acquire(ActivityOwner::Voice));
        assert!(lock.try_acquire(ActivityOwner::Voice));
        lock.release(ActivityOwner::Voice);
        assert_eq!(lock.holder(), None);
    }

    #[test]
    fn mismatched_release_is_ignored() {
        let lock = ActivityCoordinator::new();
        assert!(lock.try_acquire(ActivityOwner::Analysis));
        lock.release(ActivityOwner::Voice);
        assert_eq!(lock.holder(), Some(ActivityOwner::Analysis));
    }

    #[test]
    fn guard_releases_on_drop() {
        let lock = Arc::new(ActivityCoordinator::new());
        {
            let guard = lock.acquire_scoped(ActivityOwner::Gesture).unwrap();
            assert_eq!(guard.owner(), ActivityOwner::Gesture);
            assert!(lock.acquire_scoped(ActivityOwner::Voice).is_none());
        }
        assert_eq!(lock.holder(), None);
        assert!(lock.acquire_scoped(ActivityOwner::Voice).is_some());
    }

    #[test]
    fn concurrent_acquire_has_single_winner() {
        let lock = Arc::new(ActivityCoordinator::new());
        let owners = [
            ActivityOwner::Gesture,
            ActivityOwner::Analysis,
            ActivityOwner::Voice,
        ];
        let handles: Vec<_> = owners
            .iter()
            .map(|&owner| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || lock.try_acquire(owner))
            })
            .collect();
        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
    }
}
