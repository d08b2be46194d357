//! axrelay engine
//!
//! The engine keeps a live set of accessibility subscriptions attached to
//! whichever application currently owns system focus:
//! - samples the focused application on a fixed tick, with failure backoff
//! - rebuilds the subscription graph when the focused application changes
//! - grows and prunes window-level watches as windows come and go
//! - forwards every notification and closes one boundary per burst
//! - answers snapshot queries and stores pushed editor content
//!
//! All state lives on a single task. OS callbacks, queries, and content
//! updates reach it through one ordered queue (see [`queue`]), and the
//! platform is reached only through [`AccessibilitySource`].

use std::time::Duration;

use axrelay_protocol::{
    AppFocusState, Event, FocusStatus, NotificationEvent, NotificationKind, QueryKind, Response,
};
use tokio::{
    sync::mpsc::UnboundedSender,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, trace, warn};

mod coalescer;
mod content;
mod detector;
mod error;
mod graph;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
mod runtime;
mod sampler;
mod source;

pub use coalescer::EventCoalescer;
pub use content::{ContentModel, InMemoryContent};
pub use detector::{ChangeDecision, FocusChangeDetector, RebuildTicket};
pub use error::{Error, Result};
pub use graph::{APP_KINDS, RebuildReport, SubscriptionGraph, WINDOW_KINDS};
pub use runtime::{EngineHandle, Inbox, NotificationSink, queue};
pub use sampler::{FocusSampler, SampleBackoff};
pub use source::{
    AccessibilitySource, AxNotification, ElementClass, ElementId, FocusedApplication,
    ObservedElement, SourceError, SubscriptionHandle,
};

use runtime::Command;

/// Sender for events produced by the engine.
pub type EventTx = UnboundedSender<Event>;

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineCfg {
    /// Interval between focus samples.
    pub poll_interval: Duration,
    /// Ceiling on ticks skipped after repeated sampling failures.
    pub max_backoff_ticks: u32,
    /// Application names or bundle ids treated as editors.
    pub editor_apps: Vec<String>,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_backoff_ticks: 50,
            editor_apps: vec!["Xcode".into(), "com.apple.dt.Xcode".into()],
        }
    }
}

/// Whether the loop keeps running after a command.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    /// Keep going.
    Continue,
    /// Leave the loop.
    Stop,
}

/// Focus tracker and subscription manager.
///
/// Construct with [`Engine::new`] from an [`Inbox`] returned by [`queue`], then
/// either drive it with [`Engine::run`] or step it manually with
/// [`Engine::poll_once`] and [`Engine::drain_pending`].
pub struct Engine<S: AccessibilitySource> {
    /// Tuning.
    cfg: EngineCfg,
    /// Platform access.
    source: S,
    /// Editor content holder.
    content: Box<dyn ContentModel>,
    /// Focus sampler with backoff.
    sampler: FocusSampler,
    /// Tracked application and rebuild tickets.
    detector: FocusChangeDetector,
    /// Live subscriptions.
    graph: SubscriptionGraph,
    /// Burst boundary tracker.
    coalescer: EventCoalescer,
    /// Command queue.
    inbox: Inbox,
    /// Downstream events.
    events: EventTx,
    /// Committed rebuilds so far.
    rebuilds: u64,
}

impl<S: AccessibilitySource> Engine<S> {
    /// Create an engine over `source`, emitting events on `events`.
    pub fn new(source: S, inbox: Inbox, events: EventTx, cfg: EngineCfg) -> Self {
        Self {
            sampler: FocusSampler::new(cfg.max_backoff_ticks),
            cfg,
            source,
            content: Box::new(InMemoryContent::default()),
            detector: FocusChangeDetector::new(),
            graph: SubscriptionGraph::new(),
            coalescer: EventCoalescer::new(),
            inbox,
            events,
            rebuilds: 0,
        }
    }

    /// Replace the editor content holder.
    pub fn with_content(mut self, content: Box<dyn ContentModel>) -> Self {
        self.content = content;
        self
    }

    /// Run until a shutdown command arrives or every handle is dropped.
    ///
    /// Queued commands are always handled before the next tick. Each tick
    /// pumps the source for pending callbacks and then samples focus.
    pub async fn run(mut self) {
        let mut ticker = time::interval(self.cfg.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            poll_ms = self.cfg.poll_interval.as_millis(),
            "engine started"
        );
        loop {
            tokio::select! {
                biased;
                cmd = self.inbox.rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if self.handle(cmd) == Flow::Stop {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.source.pump();
                    self.poll_once();
                }
            }
        }
        let removed = self.graph.teardown(&mut self.source);
        info!(removed, "engine stopped");
    }

    /// Sample focus once and rebuild the graph if the application changed.
    /// Returns true when a rebuild was committed.
    pub fn poll_once(&mut self) -> bool {
        let sample = self.sampler.sample(&mut self.source);
        let ChangeDecision::ChangedTo(app) = self.detector.on_sample(sample) else {
            return false;
        };
        let ticket = self.detector.begin_rebuild();
        let prior = self.detector.current().map(FocusedApplication::pid);
        debug!(from = ?prior, to = app.pid(), "focused application changed");
        if let Err(err) = self.graph.rebuild_for(&mut self.source, &app) {
            warn!(error = %err, "rebuild failed, will retry");
            self.detector.mark_stale();
            return false;
        }
        let pid = app.pid();
        if !self.detector.commit(ticket, app) {
            trace!(pid, "stale rebuild discarded");
            return false;
        }
        self.rebuilds += 1;
        if prior != Some(pid) {
            let state = self.detector.app_focus_state();
            info!(
                pid,
                app = state
                    .current_app
                    .as_ref()
                    .and_then(|a| a.name.as_deref())
                    .unwrap_or("?"),
                "tracking application"
            );
            self.emit(Event::AppFocusChanged(state));
        }
        true
    }

    /// Handle every command already queued, without waiting. Returns how many
    /// were handled. Stops early at a shutdown command.
    pub fn drain_pending(&mut self) -> usize {
        let mut n = 0;
        while let Ok(cmd) = self.inbox.rx.try_recv() {
            n += 1;
            if self.handle(cmd) == Flow::Stop {
                break;
            }
        }
        n
    }

    /// Current editor focus status.
    pub fn snapshot_focus_status(&self) -> FocusStatus {
        let app = self.detector.current().map(|a| a.info.clone());
        let editor_focused = app
            .as_ref()
            .is_some_and(|a| self.cfg.editor_apps.iter().any(|e| a.matches(e)));
        FocusStatus {
            app,
            editor_focused,
        }
    }

    /// Previous and current tracked applications.
    pub fn snapshot_app_focus_status(&self) -> AppFocusState {
        self.detector.app_focus_state()
    }

    /// The subscription graph.
    pub fn graph(&self) -> &SubscriptionGraph {
        &self.graph
    }

    /// Number of committed rebuilds.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    /// The accessibility source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Dispatch one command.
    fn handle(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::Notify(n) => self.on_notification(n),
            Command::CloseBoundary => {
                if let Some(seq) = self.coalescer.close() {
                    self.emit(Event::BoundaryClosed { seq });
                }
            }
            Command::Query { kind, respond } => {
                if respond.send(self.answer(&kind)).is_err() {
                    trace!(query = kind.as_str(), "query caller went away");
                }
            }
            Command::UpdateContent(content) => {
                trace!(len = content.len(), "content updated");
                self.content.apply_content_update(content);
            }
            Command::Shutdown => return Flow::Stop,
        }
        Flow::Continue
    }

    /// Apply a notification to the graph and forward it.
    fn on_notification(&mut self, n: AxNotification) {
        if self.graph.owner() != Some(n.element.pid) {
            trace!(
                pid = n.element.pid,
                kind = n.kind.ax_name(),
                "notification for untracked app dropped"
            );
            return;
        }
        match n.kind {
            NotificationKind::MainWindowChanged => {
                self.graph.on_main_window_changed(&mut self.source, &n.element);
            }
            NotificationKind::ElementDestroyed => {
                self.graph.on_element_destroyed(&mut self.source, n.element.id);
            }
            _ => {}
        }
        self.emit(Event::Notification(NotificationEvent {
            kind: n.kind,
            pid: n.element.pid,
            element: n.element.id.0,
            role: n.element.role,
            title: n.element.title,
        }));
        if self.coalescer.on_event() && !self.inbox.post(Command::CloseBoundary) {
            // Queue is closing; nothing else will arrive in this burst.
            if let Some(seq) = self.coalescer.close() {
                self.emit(Event::BoundaryClosed { seq });
            }
        }
    }

    /// Build the reply for a query. Unknown kinds have no reply.
    fn answer(&self, kind: &QueryKind) -> Option<Response> {
        match kind {
            QueryKind::EditorContent => Some(Response::EditorContent {
                content: self.content.snapshot_content(),
            }),
            QueryKind::EditorFocusStatus => {
                Some(Response::FocusStatus(self.snapshot_focus_status()))
            }
            QueryKind::AppFocusState => {
                Some(Response::AppFocusState(self.snapshot_app_focus_status()))
            }
            QueryKind::Unknown(_) => None,
        }
    }

    /// Send an event downstream. A closed channel only loses the event.
    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            trace!("event receiver gone");
        }
    }
}

#[cfg(test)]
mod tests;
