use std::time::Duration;

use axrelay_protocol::{Event, NotificationKind, QueryKind, Response};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver},
    time,
};

use super::*;
use crate::mock::MockSource;

struct Harness {
    engine: Engine<MockSource>,
    mock: MockSource,
    handle: EngineHandle,
    events: UnboundedReceiver<Event>,
}

fn harness() -> Harness {
    let (handle, inbox) = queue();
    let mock = MockSource::new(handle.notification_sink());
    let (tx, events) = mpsc::unbounded_channel();
    let engine = Engine::new(mock.clone(), inbox, tx, EngineCfg::default());
    Harness {
        engine,
        mock,
        handle,
        events,
    }
}

fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

fn boundaries(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, Event::BoundaryClosed { .. }))
        .count()
}

#[test]
fn focus_switch_moves_all_subscriptions() {
    let mut h = harness();
    h.mock.add_app(100, "Terminal");
    h.mock.add_app(200, "Xcode");
    h.mock.focus(100);
    assert!(h.engine.poll_once());

    let w = h.mock.window(100, "shell");
    h.mock.emit(&w, NotificationKind::MainWindowChanged);
    h.engine.drain_pending();
    assert_eq!(h.engine.graph().count_for_pid(100), 6);

    h.mock.focus(200);
    assert!(h.engine.poll_once());
    assert_eq!(h.engine.graph().count_for_pid(100), 0);
    assert_eq!(h.mock.active_for_pid(100), 0);
    assert_eq!(h.engine.graph().count_for_pid(200), 4);
    assert_eq!(h.engine.graph().owner(), Some(200));

    let changes: Vec<_> = drain(&mut h.events)
        .into_iter()
        .filter_map(|e| match e {
            Event::AppFocusChanged(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(changes.len(), 2);
    let last = &changes[1];
    assert_eq!(last.previous_app.as_ref().map(|a| a.pid), Some(100));
    assert_eq!(last.current_app.as_ref().map(|a| a.pid), Some(200));
}

#[test]
fn unchanged_focus_does_not_rebuild() {
    let mut h = harness();
    h.mock.add_app(100, "Terminal");
    h.mock.focus(100);
    assert!(h.engine.poll_once());
    h.mock.focus(100);
    assert!(!h.engine.poll_once());
    assert!(!h.engine.poll_once());
    assert_eq!(h.engine.rebuild_count(), 1);
    assert_eq!(h.mock.calls_count("subscribe"), 4);
}

#[test]
fn window_lifecycle_returns_graph_to_prior_shape() {
    let mut h = harness();
    let root = h.mock.add_app(100, "Terminal");
    h.mock.focus(100);
    h.engine.poll_once();
    drain(&mut h.events);
    let before = h.engine.graph().snapshot();

    let w1 = h.mock.window(100, "W1");
    h.mock.emit(&root, NotificationKind::WindowCreated);
    h.mock.emit(&w1, NotificationKind::MainWindowChanged);
    h.mock.emit(&w1, NotificationKind::ElementDestroyed);
    h.engine.drain_pending();

    assert_eq!(h.engine.graph().snapshot(), before);
    assert_eq!(h.mock.active_subscriptions(), 4);

    let events = drain(&mut h.events);
    let kinds: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::Notification(n) => Some(n.kind),
            _ => None,
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            NotificationKind::WindowCreated,
            NotificationKind::MainWindowChanged,
            NotificationKind::ElementDestroyed,
        ]
    );
    assert_eq!(boundaries(&events), 1);
    assert!(matches!(events.last(), Some(Event::BoundaryClosed { .. })));
}

#[test]
fn each_burst_gets_exactly_one_boundary() {
    let mut h = harness();
    let root = h.mock.add_app(100, "Terminal");
    h.mock.focus(100);
    h.engine.poll_once();
    drain(&mut h.events);

    for (i, burst) in [1usize, 3, 7].into_iter().enumerate() {
        for _ in 0..burst {
            h.mock.emit(&root, NotificationKind::Moved);
        }
        h.engine.drain_pending();
        let events = drain(&mut h.events);
        assert_eq!(events.len(), burst + 1);
        assert_eq!(
            events.last(),
            Some(&Event::BoundaryClosed { seq: i as u64 + 1 })
        );
    }
}

#[test]
fn notifications_from_untracked_apps_are_dropped() {
    let mut h = harness();
    h.mock.add_app(100, "Terminal");
    h.mock.focus(100);
    h.engine.poll_once();
    drain(&mut h.events);

    let stray = h.mock.window(999, "elsewhere");
    h.mock.emit(&stray, NotificationKind::MainWindowChanged);
    h.mock.emit(&stray, NotificationKind::Moved);
    assert_eq!(h.engine.drain_pending(), 2);
    assert!(drain(&mut h.events).is_empty());
    assert_eq!(h.engine.graph().len(), 4);
}

#[test]
fn failed_rebuild_keeps_identity_and_retries() {
    let mut h = harness();
    h.mock.add_app(100, "Terminal");
    h.mock.add_app(200, "Xcode");
    h.mock.focus(100);
    h.engine.poll_once();

    for kind in APP_KINDS {
        h.mock.fail_subscribe(kind, true);
    }
    h.mock.focus(200);
    assert!(!h.engine.poll_once());
    let state = h.engine.snapshot_app_focus_status();
    assert_eq!(state.current_app.map(|a| a.pid), Some(100));
    assert!(h.engine.graph().is_empty());

    for kind in APP_KINDS {
        h.mock.fail_subscribe(kind, false);
    }
    assert!(h.engine.poll_once());
    let state = h.engine.snapshot_app_focus_status();
    assert_eq!(state.current_app.map(|a| a.pid), Some(200));
    assert_eq!(state.previous_app.map(|a| a.pid), Some(100));
}

#[test]
fn returning_to_app_after_failed_rebuild_repairs_graph() {
    let mut h = harness();
    h.mock.add_app(100, "Terminal");
    h.mock.add_app(200, "Xcode");
    h.mock.focus(100);
    h.engine.poll_once();
    drain(&mut h.events);

    for kind in APP_KINDS {
        h.mock.fail_subscribe(kind, true);
    }
    h.mock.focus(200);
    h.engine.poll_once();
    for kind in APP_KINDS {
        h.mock.fail_subscribe(kind, false);
    }
    h.mock.focus(100);
    assert!(h.engine.poll_once());
    assert_eq!(h.engine.graph().owner(), Some(100));
    assert_eq!(h.engine.graph().len(), 4);
    // Same application as before the failure: no focus change is reported.
    assert!(drain(&mut h.events).is_empty());
}

#[test]
fn focus_status_reports_editor_apps() {
    let mut h = harness();
    h.mock.add_app(100, "Terminal");
    h.mock.add_app(200, "Xcode");
    assert!(!h.engine.snapshot_focus_status().editor_focused);
    h.mock.focus(100);
    h.engine.poll_once();
    assert!(!h.engine.snapshot_focus_status().editor_focused);
    h.mock.focus(200);
    h.engine.poll_once();
    let status = h.engine.snapshot_focus_status();
    assert!(status.editor_focused);
    assert_eq!(status.app.map(|a| a.pid), Some(200));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn run_loop_answers_queries_and_tears_down() {
    let Harness {
        engine,
        mock,
        handle,
        events: _events,
    } = harness();
    mock.add_app(300, "Xcode");
    mock.focus(300);

    let client = async {
        time::sleep(Duration::from_millis(250)).await;
        assert!(handle.update_content("fn main() {}".into()));
        let content = handle.query(QueryKind::EditorContent).await;
        let focus = handle.query(QueryKind::EditorFocusStatus).await;
        let unknown = handle.query(QueryKind::Unknown("getWeather".into())).await;
        handle.shutdown();
        (content, focus, unknown)
    };
    let ((), (content, focus, unknown)) = tokio::join!(engine.run(), client);

    assert_eq!(
        content,
        Some(Response::EditorContent {
            content: Some("fn main() {}".into())
        })
    );
    match focus {
        Some(Response::FocusStatus(status)) => assert!(status.editor_focused),
        other => panic!("unexpected reply: {other:?}"),
    }
    assert_eq!(unknown, None);
    assert_eq!(mock.active_subscriptions(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn run_loop_backs_off_while_sampling_fails() {
    let Harness {
        engine,
        mock,
        handle,
        events: _events,
    } = harness();
    mock.fail_sampling(SourceError::PermissionDenied);

    let stopper = async {
        // 100 ticks at the default interval.
        time::sleep(Duration::from_millis(10_000)).await;
        handle.shutdown();
    };
    tokio::join!(engine.run(), stopper);
    let attempts = mock.calls_count("sample");
    assert!(attempts > 3, "attempts: {attempts}");
    assert!(attempts < 20, "attempts: {attempts}");
}

#[test]
fn many_windows_closed_out_of_order_leave_only_app_watches() {
    let mut h = harness();
    h.mock.add_app(100, "Terminal");
    h.mock.focus(100);
    h.engine.poll_once();
    let before = h.engine.graph().snapshot();

    let windows: Vec<_> = (1..=5)
        .map(|i| h.mock.window(100, &format!("W{i}")))
        .collect();
    for w in &windows {
        h.mock.emit(w, NotificationKind::MainWindowChanged);
    }
    h.engine.drain_pending();
    assert_eq!(h.engine.graph().len(), 14);
    assert_eq!(h.mock.active_subscriptions(), 14);

    for i in [3, 0, 4, 1, 2] {
        h.mock.emit(&windows[i], NotificationKind::ElementDestroyed);
    }
    h.engine.drain_pending();
    assert_eq!(h.engine.graph().snapshot(), before);
    assert_eq!(h.engine.graph().len(), 4);
    assert_eq!(h.mock.active_subscriptions(), 4);
}
