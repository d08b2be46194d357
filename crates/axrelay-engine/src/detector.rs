//! Focus change detection.
//!
//! The detector remembers which application is tracked and decides whether a
//! fresh sample is a change. Rebuilds are tagged with generation tickets so a
//! rebuild that finishes after a newer one started can never overwrite the
//! newer identity.

use axrelay_protocol::AppFocusState;

use crate::source::FocusedApplication;

/// Outcome of comparing a sample against the tracked application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDecision {
    /// Same application, or no usable sample.
    NoChange,
    /// A different application (or a stale graph) needs a rebuild.
    ChangedTo(FocusedApplication),
}

/// Generation token for one rebuild attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildTicket(u64);

/// Tracks the current and previous focused applications.
#[derive(Debug, Default)]
pub struct FocusChangeDetector {
    /// Application whose subscriptions are live.
    current: Option<FocusedApplication>,
    /// Application tracked before `current`.
    previous: Option<FocusedApplication>,
    /// Latest ticket handed out.
    issued: u64,
    /// Set when a rebuild failed and left the graph empty.
    stale: bool,
}

impl FocusChangeDetector {
    /// Create a detector with nothing tracked.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare a sample with the tracked application. Application identity is
    /// the pid; an absent sample never counts as a change.
    pub fn on_sample(&self, sample: Option<FocusedApplication>) -> ChangeDecision {
        let Some(app) = sample else {
            return ChangeDecision::NoChange;
        };
        let same = self.current.as_ref().is_some_and(|c| c.pid() == app.pid());
        if same && !self.stale {
            ChangeDecision::NoChange
        } else {
            ChangeDecision::ChangedTo(app)
        }
    }

    /// Start a rebuild. Any ticket issued earlier becomes stale.
    pub fn begin_rebuild(&mut self) -> RebuildTicket {
        self.issued += 1;
        RebuildTicket(self.issued)
    }

    /// Commit `app` as the tracked application if `ticket` is the newest one.
    /// Returns false for stale tickets, leaving state untouched.
    pub fn commit(&mut self, ticket: RebuildTicket, app: FocusedApplication) -> bool {
        if ticket.0 != self.issued {
            return false;
        }
        self.stale = false;
        match &mut self.current {
            Some(cur) if cur.pid() == app.pid() => *cur = app,
            _ => self.previous = self.current.replace(app),
        }
        true
    }

    /// Record that a rebuild failed. The tracked identity is kept, but the next
    /// sample of the same application triggers another rebuild.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Currently tracked application.
    pub fn current(&self) -> Option<&FocusedApplication> {
        self.current.as_ref()
    }

    /// Previously tracked application.
    pub fn previous(&self) -> Option<&FocusedApplication> {
        self.previous.as_ref()
    }

    /// Snapshot of the previous and current applications.
    pub fn app_focus_state(&self) -> AppFocusState {
        AppFocusState {
            previous_app: self.previous.as_ref().map(|a| a.info.clone()),
            current_app: self.current.as_ref().map(|a| a.info.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSource;
    use crate::source::AccessibilitySource;

    fn app(src: &mut MockSource, pid: i32) -> FocusedApplication {
        src.focus(pid);
        let el = src.sample_focused_element().expect("sample");
        src.resolve_application(&el).expect("resolve")
    }

    #[test]
    fn same_pid_is_no_change() {
        let mut src = MockSource::detached();
        src.add_app(100, "A");
        let a = app(&mut src, 100);
        let mut det = FocusChangeDetector::new();
        let t = det.begin_rebuild();
        assert!(det.commit(t, a.clone()));
        assert_eq!(det.on_sample(Some(a)), ChangeDecision::NoChange);
        assert_eq!(det.on_sample(None), ChangeDecision::NoChange);
    }

    #[test]
    fn different_pid_is_a_change() {
        let mut src = MockSource::detached();
        src.add_app(100, "A");
        src.add_app(200, "B");
        let a = app(&mut src, 100);
        let b = app(&mut src, 200);
        let mut det = FocusChangeDetector::new();
        assert_eq!(
            det.on_sample(Some(a.clone())),
            ChangeDecision::ChangedTo(a.clone())
        );
        let t = det.begin_rebuild();
        det.commit(t, a.clone());
        assert_eq!(det.on_sample(Some(b.clone())), ChangeDecision::ChangedTo(b.clone()));
        let t = det.begin_rebuild();
        det.commit(t, b);
        let state = det.app_focus_state();
        assert_eq!(state.previous_app.map(|i| i.pid), Some(100));
        assert_eq!(state.current_app.map(|i| i.pid), Some(200));
    }

    #[test]
    fn stale_ticket_cannot_commit() {
        let mut src = MockSource::detached();
        src.add_app(100, "A");
        src.add_app(200, "B");
        let a = app(&mut src, 100);
        let b = app(&mut src, 200);
        let mut det = FocusChangeDetector::new();
        let older = det.begin_rebuild();
        let newer = det.begin_rebuild();
        assert!(det.commit(newer, b));
        assert!(!det.commit(older, a));
        assert_eq!(det.current().map(|c| c.pid()), Some(200));
        assert!(det.previous().is_none());
    }

    #[test]
    fn stale_graph_forces_rebuild_of_same_app() {
        let mut src = MockSource::detached();
        src.add_app(100, "A");
        let a = app(&mut src, 100);
        let mut det = FocusChangeDetector::new();
        let t = det.begin_rebuild();
        det.commit(t, a.clone());
        det.mark_stale();
        assert_eq!(det.on_sample(Some(a.clone())), ChangeDecision::ChangedTo(a.clone()));
        let t = det.begin_rebuild();
        det.commit(t, a.clone());
        assert_eq!(det.on_sample(Some(a)), ChangeDecision::NoChange);
        assert!(det.previous().is_none());
    }
}
