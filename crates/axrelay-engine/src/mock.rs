//! Scriptable in-memory accessibility source for tests (enabled with the
//! `test-utils` feature).

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use axrelay_protocol::{AppInfo, NotificationKind};
use parking_lot::Mutex;

use crate::{
    runtime::NotificationSink,
    source::{
        AccessibilitySource, AxNotification, ElementClass, ElementId, FocusedApplication,
        ObservedElement, SourceError, SubscriptionHandle,
    },
};

/// Shared mock state.
#[derive(Default)]
struct State {
    /// Known applications and their root elements, by pid.
    apps: HashMap<i32, FocusedApplication>,
    /// Element returned by the next focus sample.
    focused: Option<ObservedElement>,
    /// Error returned by focus sampling instead of the focused element.
    sample_error: Option<SourceError>,
    /// Notification kinds whose subscriptions fail.
    failing_kinds: HashSet<NotificationKind>,
    /// Active subscriptions: element, owning pid, kind.
    active: HashMap<SubscriptionHandle, (ElementId, i32, NotificationKind)>,
    /// Next handle to hand out.
    next_handle: u64,
    /// Next element id to hand out.
    next_element: u64,
    /// Call log.
    calls: Vec<String>,
}

/// Mock [`AccessibilitySource`]. Clones share state, so a test can keep one
/// clone for scripting while the engine owns another.
#[derive(Clone)]
pub struct MockSource {
    /// Shared state.
    state: Arc<Mutex<State>>,
    /// Where [`MockSource::emit`] delivers notifications.
    sink: Option<NotificationSink>,
}

impl MockSource {
    /// Create a mock that delivers notifications into `sink`.
    pub fn new(sink: NotificationSink) -> Self {
        Self {
            sink: Some(sink),
            ..Self::detached()
        }
    }

    /// Create a mock without a notification sink; [`MockSource::emit`] is a no-op.
    pub fn detached() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next_element: 1,
                next_handle: 1,
                ..State::default()
            })),
            sink: None,
        }
    }

    /// Allocate a fresh element.
    fn element(&self, pid: i32, class: ElementClass, title: Option<&str>) -> ObservedElement {
        let mut st = self.state.lock();
        let id = ElementId(st.next_element);
        st.next_element += 1;
        let role = match class {
            ElementClass::Application => "AXApplication",
            ElementClass::Window => "AXWindow",
            ElementClass::Other => "AXTextArea",
        };
        ObservedElement {
            id,
            pid,
            class,
            role: Some(role.to_string()),
            title: title.map(str::to_string),
        }
    }

    /// Register an application and return its root element.
    pub fn add_app(&self, pid: i32, name: &str) -> ObservedElement {
        let root = self.element(pid, ElementClass::Application, Some(name));
        let info = AppInfo {
            bundle_id: Some(format!("com.example.{}", name.to_lowercase())),
            name: Some(name.to_string()),
            pid,
            is_finished_launching: true,
        };
        self.state.lock().apps.insert(
            pid,
            FocusedApplication {
                info,
                root: root.clone(),
            },
        );
        root
    }

    /// Create a window element owned by `pid`.
    pub fn window(&self, pid: i32, title: &str) -> ObservedElement {
        self.element(pid, ElementClass::Window, Some(title))
    }

    /// Move focus to a control inside application `pid`.
    pub fn focus(&self, pid: i32) {
        let el = self.element(pid, ElementClass::Other, None);
        let mut st = self.state.lock();
        st.focused = Some(el);
        st.sample_error = None;
    }

    /// Make focus sampling fail with `err` until the next [`MockSource::focus`]
    /// or [`MockSource::clear_sample_error`].
    pub fn fail_sampling(&self, err: SourceError) {
        self.state.lock().sample_error = Some(err);
    }

    /// Let focus sampling succeed again.
    pub fn clear_sample_error(&self) {
        self.state.lock().sample_error = None;
    }

    /// Make subscriptions of `kind` fail (or succeed again).
    pub fn fail_subscribe(&self, kind: NotificationKind, fail: bool) {
        let mut st = self.state.lock();
        if fail {
            st.failing_kinds.insert(kind);
        } else {
            st.failing_kinds.remove(&kind);
        }
    }

    /// Deliver a notification through the sink, as the OS would.
    pub fn emit(&self, element: &ObservedElement, kind: NotificationKind) -> bool {
        match &self.sink {
            Some(sink) => sink.deliver(AxNotification {
                element: element.clone(),
                kind,
            }),
            None => false,
        }
    }

    /// Number of subscriptions currently active at the source.
    pub fn active_subscriptions(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Number of active subscriptions on elements owned by `pid`.
    pub fn active_for_pid(&self, pid: i32) -> usize {
        self.state
            .lock()
            .active
            .values()
            .filter(|&&(_, p, _)| p == pid)
            .count()
    }

    /// True when `element` has an active `kind` subscription.
    pub fn is_subscribed(&self, element: &ObservedElement, kind: NotificationKind) -> bool {
        self.state
            .lock()
            .active
            .values()
            .any(|&(id, _, k)| id == element.id && k == kind)
    }

    /// Check whether a call matching `prefix` was made.
    pub fn calls_contains(&self, prefix: &str) -> bool {
        self.state.lock().calls.iter().any(|c| c.starts_with(prefix))
    }

    /// Count the calls matching `prefix`.
    pub fn calls_count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Clear the call log.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }
}

impl AccessibilitySource for MockSource {
    fn sample_focused_element(&mut self) -> Result<ObservedElement, SourceError> {
        let mut st = self.state.lock();
        st.calls.push("sample".into());
        if let Some(err) = &st.sample_error {
            return Err(err.clone());
        }
        st.focused.clone().ok_or(SourceError::NoFocusedElement)
    }

    fn resolve_application(
        &mut self,
        element: &ObservedElement,
    ) -> Result<FocusedApplication, SourceError> {
        let mut st = self.state.lock();
        st.calls.push(format!("resolve:{}", element.pid));
        st.apps
            .get(&element.pid)
            .cloned()
            .ok_or(SourceError::Resolution(element.pid))
    }

    fn subscribe(
        &mut self,
        element: &ObservedElement,
        kind: NotificationKind,
    ) -> Result<SubscriptionHandle, SourceError> {
        let mut st = self.state.lock();
        st.calls
            .push(format!("subscribe:{}:{}", element.id.0, kind.ax_name()));
        if st.failing_kinds.contains(&kind) {
            return Err(SourceError::Os {
                op: "subscribe",
                code: -25204,
            });
        }
        let handle = SubscriptionHandle(st.next_handle);
        st.next_handle += 1;
        st.active.insert(handle, (element.id, element.pid, kind));
        Ok(handle)
    }

    fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        let mut st = self.state.lock();
        st.calls.push(format!("unsubscribe:{}", handle.0));
        st.active.remove(&handle);
    }
}
