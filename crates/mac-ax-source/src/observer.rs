//! Per-process `AXObserver` with its run-loop source and callback context.

use std::{cell::RefCell, ffi::c_void, rc::Rc};

use axrelay_engine::{AxNotification, ElementClass, NotificationSink, ObservedElement};
use axrelay_protocol::NotificationKind;
use core_foundation::{
    base::{CFTypeRef, TCFType},
    runloop::{CFRunLoopGetCurrent, CFRunLoopSourceRef, kCFRunLoopDefaultMode},
    string::{CFString, CFStringRef},
};
use tracing::{debug, trace};

use crate::{
    elements::ElementTable,
    error::Error,
    ffi::{
        self, AxElement, AxObserver, CFEqual, CFRunLoopAddSource, CFRunLoopRemoveSource,
    },
};

/// Every kind an observer may be asked to deliver.
const KINDS: [NotificationKind; 5] = [
    NotificationKind::WindowCreated,
    NotificationKind::MainWindowChanged,
    NotificationKind::Moved,
    NotificationKind::FocusedWindowChanged,
    NotificationKind::ElementDestroyed,
];

/// AX error returned when a notification is already registered.
const AX_ERROR_ALREADY_REGISTERED: i32 = -25209;
/// AX error returned when removing a notification that is not registered.
const AX_ERROR_NOT_REGISTERED: i32 = -25208;

/// State reachable from the C callback.
struct Ctx {
    /// Observed process.
    pid: i32,
    /// Engine queue.
    sink: NotificationSink,
    /// Shared element identities.
    table: Rc<RefCell<ElementTable>>,
    /// Notification names paired with their kinds.
    names: Vec<(CFString, NotificationKind)>,
}

impl Ctx {
    /// Map a notification name back to its kind.
    fn kind_for(&self, name: CFStringRef) -> Option<NotificationKind> {
        self.names
            .iter()
            // SAFETY: both are live CFStrings.
            .find(|(n, _)| unsafe { CFEqual(name as CFTypeRef, n.as_concrete_TypeRef() as _) })
            .map(|(_, k)| *k)
    }
}

extern "C" fn ax_callback(
    _observer: *mut c_void,
    element: *mut c_void,
    notification: CFStringRef,
    refcon: *mut c_void,
) {
    if refcon.is_null() || notification.is_null() {
        return;
    }
    // SAFETY: refcon is the `Ctx` owned by the `PidObserver` that registered
    // this callback, and it outlives the observer's run-loop source.
    let ctx = unsafe { &*(refcon as *const Ctx) };
    let Some(kind) = ctx.kind_for(notification) else {
        return;
    };
    let Some(element) = AxElement::retain(element) else {
        return;
    };
    let Some(observed) = describe(ctx.pid, element, &ctx.table) else {
        trace!(pid = ctx.pid, ?kind, "element table busy; notification dropped");
        return;
    };
    if !ctx.sink.deliver(AxNotification {
        element: observed,
        kind,
    }) {
        trace!(pid = ctx.pid, ?kind, "engine gone; notification dropped");
    }
}

/// Classify an AX role string.
pub(crate) fn class_for_role(role: Option<&str>) -> ElementClass {
    match role {
        Some("AXApplication") => ElementClass::Application,
        Some("AXWindow") => ElementClass::Window,
        _ => ElementClass::Other,
    }
}

/// Intern `element` and read its descriptive attributes.
///
/// `pid` is taken from the caller because destroyed elements no longer answer
/// attribute queries. Returns `None` if the table is already borrowed.
pub(crate) fn describe(
    pid: i32,
    element: AxElement,
    table: &RefCell<ElementTable>,
) -> Option<ObservedElement> {
    let role = element.string_attr("AXRole");
    let title = element.string_attr("AXTitle");
    let id = table.try_borrow_mut().ok()?.intern(element);
    Some(ObservedElement {
        id,
        pid,
        class: class_for_role(role.as_deref()),
        role,
        title,
    })
}

/// One observer per process, with its source installed on the current run loop.
pub(crate) struct PidObserver {
    pid: i32,
    observer: AxObserver,
    /// Run loop the source was added to.
    run_loop: *mut c_void,
    /// Observer run-loop source, owned by `observer`.
    source: CFRunLoopSourceRef,
    /// Boxed `Ctx`; reclaimed on drop after the source is removed.
    ctx: *mut Ctx,
    /// Active registrations on this observer.
    active: usize,
}

impl PidObserver {
    /// Create the observer and add its source to the current thread's run loop.
    pub(crate) fn install(
        pid: i32,
        sink: NotificationSink,
        table: Rc<RefCell<ElementTable>>,
    ) -> Result<Self, Error> {
        let observer = AxObserver::create(pid, ax_callback)?;
        // SAFETY: valid observer; the source is owned by it (get rule).
        let source = unsafe { ffi::AXObserverGetRunLoopSource(observer.as_ptr()) };
        if source.is_null() {
            return Err(Error::Null("AXObserverGetRunLoopSource"));
        }
        let source = source as CFRunLoopSourceRef;
        let ctx = Box::into_raw(Box::new(Ctx {
            pid,
            sink,
            table,
            names: KINDS
                .iter()
                .map(|k| (CFString::from_static_string(k.ax_name()), *k))
                .collect(),
        }));
        // SAFETY: called on the engine thread; source and mode are valid.
        let run_loop = unsafe {
            let rl = CFRunLoopGetCurrent() as *mut c_void;
            CFRunLoopAddSource(rl, source, kCFRunLoopDefaultMode);
            rl
        };
        debug!(pid, "installed AX observer");
        Ok(Self {
            pid,
            observer,
            run_loop,
            source,
            ctx,
            active: 0,
        })
    }

    /// Register `kind` for `element`. A duplicate registration is accepted.
    pub(crate) fn add(&mut self, element: &AxElement, kind: NotificationKind) -> Result<(), Error> {
        let name = CFString::from_static_string(kind.ax_name());
        // SAFETY: live observer and element; ctx outlives the registration.
        let err = unsafe {
            ffi::AXObserverAddNotification(
                self.observer.as_ptr(),
                element.as_ptr(),
                name.as_concrete_TypeRef(),
                self.ctx as *mut c_void,
            )
        };
        if err != 0 && err != AX_ERROR_ALREADY_REGISTERED {
            return Err(Error::Ax {
                op: "AXObserverAddNotification",
                code: err,
            });
        }
        self.active += 1;
        Ok(())
    }

    /// Remove a registration. Failures are logged; the element may already be gone.
    pub(crate) fn remove(&mut self, element: &AxElement, kind: NotificationKind) {
        let name = CFString::from_static_string(kind.ax_name());
        // SAFETY: live observer and element.
        let err = unsafe {
            ffi::AXObserverRemoveNotification(
                self.observer.as_ptr(),
                element.as_ptr(),
                name.as_concrete_TypeRef(),
            )
        };
        if err != 0 && err != AX_ERROR_NOT_REGISTERED {
            trace!(pid = self.pid, ?kind, err, "AXObserverRemoveNotification failed");
        }
        self.active = self.active.saturating_sub(1);
    }

    /// True when no registrations remain.
    pub(crate) fn is_idle(&self) -> bool {
        self.active == 0
    }
}

impl Drop for PidObserver {
    fn drop(&mut self) {
        // SAFETY: the source was added to this run loop in `install`; once it is
        // removed no callback can observe `ctx`, which we then reclaim.
        unsafe {
            CFRunLoopRemoveSource(self.run_loop, self.source, kCFRunLoopDefaultMode);
            drop(Box::from_raw(self.ctx));
        }
        debug!(pid = self.pid, "removed AX observer");
    }
}
