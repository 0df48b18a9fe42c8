use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunKind {
    Generation,
    UpdateScan,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Generation => f.write_str("generation"),
            RunKind::UpdateScan => f.write_str("update-scan"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
}

#[derive(Debug, Default, Clone)]
pub struct RunGuard {
    generation: Arc<AtomicBool>,
    update_scan: Arc<AtomicBool>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, kind: RunKind) -> &Arc<AtomicBool> {
        match kind {
            RunKind::Generation => &self.generation,
            RunKind::UpdateScan => &self.update_scan,
        }
    }

    /// Move `kind` from Idle to Running. Returns `None` if it is already running.
    pub fn try_acquire(&self, kind: RunKind) -> Option<RunPermit> {
        let flag = self.flag(kind);
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                kind,
                flag: Arc::clone(flag),
            })
    }

    pub fn state(&self, kind: RunKind) -> RunState {
        if self.flag(kind).load(Ordering::Acquire) {
            RunState::Running
        } else {
            RunState::Idle
        }
    }
}

/// Held for the length of a run. Dropping it returns the kind to idle.
#[derive(Debug)]
pub struct RunPermit {
    kind: RunKind,
    flag: Arc<AtomicBool>,
}

impl RunPermit {
    pub fn kind(&self) -> RunKind {
        self.kind
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let guard = RunGuard::new();
        let permit = guard.try_acquire(RunKind::Generation).unwrap();
        assert_eq!(guard.state(RunKind::Generation), RunState::Running);
        assert!(guard.try_acquire(RunKind::Generation).is_none());

        drop(permit);
        assert_eq!(guard.state(RunKind::Generation), RunState::Idle);
        assert!(guard.try_acquire(RunKind::Generation).is_some());
    }

    #[test]
    fn kinds_are_independent() {
        let guard = RunGuard::new();
        let _gen = guard.try_acquire(RunKind::Generation).unwrap();
        let scan = guard.try_acquire(RunKind::UpdateScan).unwrap();
        assert_eq!(scan.kind(), RunKind::UpdateScan);
    }

    #[test]
    fn permit_released_on_panic() {
        let guard = RunGuard::new();
        let g = guard.clone();
        let result = std::panic::catch_unwind(move || {
            let _permit = g.try_acquire(RunKind::UpdateScan).unwrap();
            panic!("run blew up");
        });
        assert!(result.is_err());
        assert_eq!(guard.state(RunKind::UpdateScan), RunState::Idle);
    }
}
