//! Subscription graph for the tracked application.
//!
//! The graph owns every live subscription. Entries are keyed by element id and
//! hold one handle per notification kind, so subscribing the same
//! (element, kind) twice is impossible by construction. Application-level
//! watches hang off the app root; window-level watches are added when a window
//! becomes main and removed when that window is destroyed, which keeps the
//! graph bounded by the number of live windows.

use std::collections::{BTreeMap, HashMap};

use axrelay_protocol::NotificationKind;
use tracing::{debug, trace, warn};

use crate::{
    error::{Error, Result},
    source::{
        AccessibilitySource, ElementClass, ElementId, FocusedApplication, ObservedElement,
        SubscriptionHandle,
    },
};

/// Notifications watched on the application root.
pub const APP_KINDS: [NotificationKind; 4] = [
    NotificationKind::WindowCreated,
    NotificationKind::MainWindowChanged,
    NotificationKind::Moved,
    NotificationKind::FocusedWindowChanged,
];

/// Notifications watched on each main window. Destruction comes first: a
/// window without a destruction watch could never be pruned.
pub const WINDOW_KINDS: [NotificationKind; 2] =
    [NotificationKind::ElementDestroyed, NotificationKind::Moved];

/// Subscriptions attached to one element.
#[derive(Debug)]
struct Entry {
    /// The element itself.
    element: ObservedElement,
    /// Active handles by kind.
    subs: BTreeMap<NotificationKind, SubscriptionHandle>,
}

/// Result of a successful rebuild.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebuildReport {
    /// Subscriptions removed from the previous owner.
    pub torn_down: usize,
    /// App-level subscriptions established.
    pub established: usize,
    /// App-level subscriptions that failed.
    pub failed: usize,
}

/// Live subscriptions for the currently tracked application.
#[derive(Debug, Default)]
pub struct SubscriptionGraph {
    /// Pid whose elements the graph currently watches.
    owner: Option<i32>,
    /// Entries by element.
    entries: HashMap<ElementId, Entry>,
}

impl SubscriptionGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pid the graph is attached to, if any.
    pub fn owner(&self) -> Option<i32> {
        self.owner
    }

    /// Total number of live subscriptions.
    pub fn len(&self) -> usize {
        self.entries.values().map(|e| e.subs.len()).sum()
    }

    /// True when no subscriptions are live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of elements with at least one subscription.
    pub fn element_count(&self) -> usize {
        self.entries.len()
    }

    /// True when `element` has a live `kind` subscription.
    pub fn contains(&self, element: ElementId, kind: NotificationKind) -> bool {
        self.entries
            .get(&element)
            .is_some_and(|e| e.subs.contains_key(&kind))
    }

    /// Number of live subscriptions on elements owned by `pid`.
    pub fn count_for_pid(&self, pid: i32) -> usize {
        self.entries
            .values()
            .filter(|e| e.element.pid == pid)
            .map(|e| e.subs.len())
            .sum()
    }

    /// Sorted (element, kind) pairs, for structural comparison.
    pub fn snapshot(&self) -> Vec<(ElementId, NotificationKind)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .flat_map(|(id, e)| e.subs.keys().map(move |k| (*id, *k)))
            .collect();
        out.sort();
        out
    }

    /// Remove every subscription. Returns how many were removed.
    pub fn teardown<S>(&mut self, source: &mut S) -> usize
    where
        S: AccessibilitySource + ?Sized,
    {
        let mut removed = 0;
        for (_, entry) in self.entries.drain() {
            for handle in entry.subs.into_values() {
                source.unsubscribe(handle);
                removed += 1;
            }
        }
        self.owner = None;
        removed
    }

    /// Replace the graph with app-level subscriptions for `app`.
    ///
    /// Existing subscriptions are torn down first. Individual failures are
    /// logged and skipped; the rebuild fails only if nothing was established,
    /// in which case the graph is left empty and unowned.
    pub fn rebuild_for<S>(
        &mut self,
        source: &mut S,
        app: &FocusedApplication,
    ) -> Result<RebuildReport>
    where
        S: AccessibilitySource + ?Sized,
    {
        let mut report = RebuildReport {
            torn_down: self.teardown(source),
            ..RebuildReport::default()
        };
        for kind in APP_KINDS {
            match self.add(source, &app.root, kind) {
                Ok(_) => report.established += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(pid = app.pid(), kind = kind.ax_name(), error = %err, "subscribe failed");
                }
            }
        }
        if report.established == 0 {
            return Err(Error::RebuildFailed { pid: app.pid() });
        }
        self.owner = Some(app.pid());
        debug!(
            pid = app.pid(),
            established = report.established,
            failed = report.failed,
            torn_down = report.torn_down,
            "subscription graph rebuilt"
        );
        Ok(report)
    }

    /// Attach window-level watches to a new main window. Already watched
    /// windows, and elements that are not windows, are left alone. Returns how
    /// many subscriptions were added.
    pub fn on_main_window_changed<S>(&mut self, source: &mut S, window: &ObservedElement) -> usize
    where
        S: AccessibilitySource + ?Sized,
    {
        if self.owner != Some(window.pid) {
            trace!(pid = window.pid, "main window of untracked app");
            return 0;
        }
        if window.class != ElementClass::Window {
            trace!(element = window.id.0, class = ?window.class, "main window is not a window");
            return 0;
        }
        let mut added = 0;
        for kind in WINDOW_KINDS {
            match self.add(source, window, kind) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(err) if kind == NotificationKind::ElementDestroyed => {
                    warn!(element = window.id.0, error = %err, "cannot watch window destruction");
                    return added;
                }
                Err(err) => {
                    warn!(
                        element = window.id.0,
                        kind = kind.ax_name(),
                        error = %err,
                        "subscribe failed"
                    );
                }
            }
        }
        added
    }

    /// Drop every subscription on a destroyed element. Returns how many were
    /// removed; unknown elements remove nothing.
    pub fn on_element_destroyed<S>(&mut self, source: &mut S, element: ElementId) -> usize
    where
        S: AccessibilitySource + ?Sized,
    {
        let Some(entry) = self.entries.remove(&element) else {
            return 0;
        };
        let removed = entry.subs.len();
        for handle in entry.subs.into_values() {
            source.unsubscribe(handle);
        }
        trace!(element = element.0, removed, "pruned destroyed element");
        removed
    }

    /// Subscribe `kind` on `element` unless already present. Returns whether a
    /// new subscription was created.
    fn add<S>(
        &mut self,
        source: &mut S,
        element: &ObservedElement,
        kind: NotificationKind,
    ) -> Result<bool>
    where
        S: AccessibilitySource + ?Sized,
    {
        if self.contains(element.id, kind) {
            return Ok(false);
        }
        let handle = source.subscribe(element, kind)?;
        self.entries
            .entry(element.id)
            .or_insert_with(|| Entry {
                element: element.clone(),
                subs: BTreeMap::new(),
            })
            .subs
            .insert(kind, handle);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSource;

    fn focused(src: &mut MockSource, pid: i32) -> FocusedApplication {
        src.focus(pid);
        let el = src.sample_focused_element().expect("sample");
        src.resolve_application(&el).expect("resolve")
    }

    #[test]
    fn rebuild_subscribes_app_kinds() {
        let mut src = MockSource::detached();
        let root = src.add_app(100, "A");
        let app = focused(&mut src, 100);
        let mut g = SubscriptionGraph::new();
        let report = g.rebuild_for(&mut src, &app).expect("rebuild");
        assert_eq!(report.established, 4);
        assert_eq!(g.owner(), Some(100));
        for kind in APP_KINDS {
            assert!(g.contains(root.id, kind));
            assert!(src.is_subscribed(&root, kind));
        }
        assert_eq!(src.active_subscriptions(), 4);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let mut src = MockSource::detached();
        src.add_app(100, "A");
        let app = focused(&mut src, 100);
        let mut g = SubscriptionGraph::new();
        g.rebuild_for(&mut src, &app).expect("first");
        let first = g.snapshot();
        let report = g.rebuild_for(&mut src, &app).expect("second");
        assert_eq!(report.torn_down, 4);
        assert_eq!(g.snapshot(), first);
        assert_eq!(src.active_subscriptions(), 4);
    }

    #[test]
    fn rebuild_switches_owner() {
        let mut src = MockSource::detached();
        src.add_app(100, "A");
        src.add_app(200, "B");
        let a = focused(&mut src, 100);
        let b = focused(&mut src, 200);
        let mut g = SubscriptionGraph::new();
        g.rebuild_for(&mut src, &a).expect("a");
        let w = src.window(100, "doc");
        g.on_main_window_changed(&mut src, &w);
        g.rebuild_for(&mut src, &b).expect("b");
        assert_eq!(g.count_for_pid(100), 0);
        assert_eq!(src.active_for_pid(100), 0);
        assert_eq!(g.count_for_pid(200), 4);
    }

    #[test]
    fn partial_rebuild_commits() {
        let mut src = MockSource::detached();
        src.add_app(100, "A");
        src.fail_subscribe(NotificationKind::Moved, true);
        let app = focused(&mut src, 100);
        let mut g = SubscriptionGraph::new();
        let report = g.rebuild_for(&mut src, &app).expect("rebuild");
        assert_eq!((report.established, report.failed), (3, 1));
        assert_eq!(g.owner(), Some(100));
    }

    #[test]
    fn total_failure_leaves_graph_empty() {
        let mut src = MockSource::detached();
        src.add_app(100, "A");
        src.add_app(200, "B");
        let a = focused(&mut src, 100);
        let b = focused(&mut src, 200);
        let mut g = SubscriptionGraph::new();
        g.rebuild_for(&mut src, &a).expect("a");
        for kind in APP_KINDS {
            src.fail_subscribe(kind, true);
        }
        let err = g.rebuild_for(&mut src, &b).expect_err("must fail");
        assert!(matches!(err, Error::RebuildFailed { pid: 200 }));
        assert!(g.is_empty());
        assert_eq!(g.owner(), None);
        assert_eq!(src.active_subscriptions(), 0);
    }

    #[test]
    fn main_window_watches_are_not_duplicated() {
        let mut src = MockSource::detached();
        src.add_app(100, "A");
        let app = focused(&mut src, 100);
        let mut g = SubscriptionGraph::new();
        g.rebuild_for(&mut src, &app).expect("rebuild");
        let w = src.window(100, "W1");
        assert_eq!(g.on_main_window_changed(&mut src, &w), 2);
        assert_eq!(g.on_main_window_changed(&mut src, &w), 0);
        assert_eq!(g.len(), 6);
        assert!(g.contains(w.id, NotificationKind::ElementDestroyed));
        assert!(g.contains(w.id, NotificationKind::Moved));
    }

    #[test]
    fn window_without_destruction_watch_is_skipped() {
        let mut src = MockSource::detached();
        src.add_app(100, "A");
        let app = focused(&mut src, 100);
        let mut g = SubscriptionGraph::new();
        g.rebuild_for(&mut src, &app).expect("rebuild");
        src.fail_subscribe(NotificationKind::ElementDestroyed, true);
        let w = src.window(100, "W1");
        assert_eq!(g.on_main_window_changed(&mut src, &w), 0);
        assert_eq!(g.element_count(), 1);
    }

    #[test]
    fn windows_of_other_apps_are_ignored() {
        let mut src = MockSource::detached();
        src.add_app(100, "A");
        let app = focused(&mut src, 100);
        let mut g = SubscriptionGraph::new();
        g.rebuild_for(&mut src, &app).expect("rebuild");
        let foreign = src.window(300, "elsewhere");
        assert_eq!(g.on_main_window_changed(&mut src, &foreign), 0);
        assert_eq!(g.len(), 4);
    }

    #[test]
    fn destroyed_windows_are_pruned() {
        let mut src = MockSource::detached();
        src.add_app(100, "A");
        let app = focused(&mut src, 100);
        let mut g = SubscriptionGraph::new();
        g.rebuild_for(&mut src, &app).expect("rebuild");
        let before = g.snapshot();
        let w = src.window(100, "W1");
        g.on_main_window_changed(&mut src, &w);
        assert_eq!(g.on_element_destroyed(&mut src, w.id), 2);
        assert_eq!(g.snapshot(), before);
        assert_eq!(src.active_subscriptions(), 4);
        assert_eq!(g.on_element_destroyed(&mut src, w.id), 0);
    }

    #[test]
    fn growth_is_bounded_by_live_windows() {
        let mut src = MockSource::detached();
        src.add_app(100, "A");
        let app = focused(&mut src, 100);
        let mut g = SubscriptionGraph::new();
        g.rebuild_for(&mut src, &app).expect("rebuild");
        for i in 0..50 {
            let w = src.window(100, &format!("W{i}"));
            g.on_main_window_changed(&mut src, &w);
            g.on_main_window_changed(&mut src, &w);
            g.on_element_destroyed(&mut src, w.id);
            assert!(g.len() <= 4 + 2);
        }
        assert_eq!(g.len(), 4);
    }

    #[test]
    fn overlapping_windows_destroyed_in_any_order() {
        let mut src = MockSource::detached();
        src.add_app(100, "A");
        let app = focused(&mut src, 100);
        let mut g = SubscriptionGraph::new();
        g.rebuild_for(&mut src, &app).expect("rebuild");
        let windows: Vec<_> = (1..=5).map(|i| src.window(100, &format!("W{i}"))).collect();
        for w in &windows {
            assert_eq!(g.on_main_window_changed(&mut src, w), 2);
        }
        assert_eq!(g.len(), 4 + 2 * windows.len());
        assert_eq!(src.active_subscriptions(), g.len());

        for (n, i) in [3, 0, 4, 1, 2].into_iter().enumerate() {
            assert_eq!(g.on_element_destroyed(&mut src, windows[i].id), 2);
            assert_eq!(g.len(), 4 + 2 * (windows.len() - n - 1));
            assert_eq!(src.active_subscriptions(), g.len());
        }
        assert_eq!(g.len(), 4);
        assert_eq!(src.active_subscriptions(), 4);
    }

    #[test]
    fn main_window_change_on_root_adds_nothing() {
        let mut src = MockSource::detached();
        let root = src.add_app(100, "A");
        let app = focused(&mut src, 100);
        let mut g = SubscriptionGraph::new();
        g.rebuild_for(&mut src, &app).expect("rebuild");
        assert_eq!(g.on_main_window_changed(&mut src, &root), 0);
        assert!(!g.contains(root.id, NotificationKind::ElementDestroyed));
        assert_eq!(g.len(), 4);
        assert_eq!(src.active_subscriptions(), 4);
    }
}
