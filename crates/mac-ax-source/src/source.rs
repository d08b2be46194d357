//! [`AccessibilitySource`] backed by the macOS Accessibility API.

use std::{
    cell::RefCell,
    collections::HashMap,
    ffi::{CStr, c_char},
    path::Path,
    rc::Rc,
    time::Duration,
};

use axrelay_engine::{
    AccessibilitySource, ElementId, FocusedApplication, NotificationSink, ObservedElement,
    SourceError, SubscriptionHandle,
};
use axrelay_protocol::{AppInfo, NotificationKind};
use core_foundation::{
    base::TCFType,
    bundle::CFBundle,
    runloop::{CFRunLoop, kCFRunLoopDefaultMode},
    string::CFString,
    url::CFURL,
};
use tracing::{debug, trace, warn};

use crate::{
    elements::ElementTable,
    error::{AX_ERROR_API_DISABLED, AX_ERROR_NO_VALUE, Error},
    ffi::{self, AxElement},
    observer::{PidObserver, describe},
};

/// Bundle ids remembered before the cache is reset.
const BUNDLE_CACHE_CAPACITY: usize = 128;

/// One active registration.
#[derive(Debug, Clone, Copy)]
struct Subscription {
    pid: i32,
    element: ElementId,
    kind: NotificationKind,
}

/// Live accessibility source. Must stay on the thread that created it.
pub struct MacAxSource {
    /// Delivery path for observer callbacks.
    sink: NotificationSink,
    /// Element identities, shared with observer callbacks.
    table: Rc<RefCell<ElementTable>>,
    /// System-wide element used for focus sampling.
    system: Option<AxElement>,
    observers: HashMap<i32, PidObserver>,
    subs: HashMap<SubscriptionHandle, Subscription>,
    next_handle: u64,
    /// Bundle ids by pid.
    bundles: HashMap<i32, Option<String>>,
}

impl MacAxSource {
    /// Create a source delivering notifications into `sink`.
    pub fn new(sink: NotificationSink) -> Self {
        // SAFETY: no preconditions; result follows the create rule.
        let system = AxElement::from_create(unsafe { ffi::AXUIElementCreateSystemWide() });
        if system.is_none() {
            warn!("AXUIElementCreateSystemWide returned null; focus sampling will fail");
        }
        Self {
            sink,
            table: Rc::default(),
            system,
            observers: HashMap::new(),
            subs: HashMap::new(),
            next_handle: 0,
            bundles: HashMap::new(),
        }
    }

    fn observe(&self, pid: i32, element: AxElement) -> Result<ObservedElement, SourceError> {
        describe(pid, element, &self.table).ok_or(SourceError::Os {
            op: "element table",
            code: 0,
        })
    }

    fn bundle_id(&mut self, pid: i32) -> Option<String> {
        if let Some(cached) = self.bundles.get(&pid) {
            return cached.clone();
        }
        if self.bundles.len() >= BUNDLE_CACHE_CAPACITY {
            self.bundles.clear();
        }
        let id = bundle_id_for_pid(pid);
        trace!(pid, bundle_id = ?id, "resolved bundle id");
        self.bundles.insert(pid, id.clone());
        id
    }
}

/// Executable path for `pid`.
fn executable_path(pid: i32) -> Option<String> {
    let mut buf = [0 as c_char; libc::PROC_PIDPATHINFO_MAXSIZE as usize];
    // SAFETY: buffer and its length are valid.
    let n = unsafe { libc::proc_pidpath(pid, buf.as_mut_ptr().cast(), buf.len() as u32) };
    if n <= 0 {
        return None;
    }
    // SAFETY: proc_pidpath NUL-terminates on success.
    let path = unsafe { CStr::from_ptr(buf.as_ptr()) };
    path.to_str().ok().map(str::to_string)
}

/// Bundle identifier of the `.app` bundle containing the process executable.
fn bundle_id_for_pid(pid: i32) -> Option<String> {
    let exe = executable_path(pid)?;
    let bundle_path = Path::new(&exe)
        .ancestors()
        .find(|p| p.extension().is_some_and(|e| e == "app"))?;
    let url = CFURL::from_path(bundle_path, true)?;
    let bundle = CFBundle::new(url)?;
    // SAFETY: valid bundle; the identifier follows the get rule.
    let ident = unsafe { ffi::CFBundleGetIdentifier(bundle.as_concrete_TypeRef() as *const _) };
    if ident.is_null() {
        return None;
    }
    // SAFETY: non-null CFString borrowed from the bundle.
    Some(unsafe { CFString::wrap_under_get_rule(ident) }.to_string())
}

impl AccessibilitySource for MacAxSource {
    fn sample_focused_element(&mut self) -> Result<ObservedElement, SourceError> {
        let system = self.system.as_ref().ok_or(SourceError::Os {
            op: "AXUIElementCreateSystemWide",
            code: 0,
        })?;
        let element = match system.element_attr("AXFocusedUIElement") {
            Ok(el) => el,
            Err(Error::Ax {
                code: AX_ERROR_API_DISABLED,
                ..
            }) => return Err(SourceError::PermissionDenied),
            Err(Error::Ax {
                code: AX_ERROR_NO_VALUE,
                ..
            }
            | Error::Null(_)) => return Err(SourceError::NoFocusedElement),
            Err(e) => return Err(e.into()),
        };
        let pid = element.pid().ok_or(SourceError::NoFocusedElement)?;
        self.observe(pid, element)
    }

    fn resolve_application(
        &mut self,
        element: &ObservedElement,
    ) -> Result<FocusedApplication, SourceError> {
        let pid = element.pid;
        // SAFETY: any pid is accepted; result follows the create rule.
        let app = AxElement::from_create(unsafe { ffi::AXUIElementCreateApplication(pid) })
            .ok_or(SourceError::Resolution(pid))?;
        if !app.has_attr("AXRole") {
            return Err(SourceError::Resolution(pid));
        }
        let info = AppInfo {
            bundle_id: self.bundle_id(pid),
            name: app.string_attr("AXTitle"),
            pid,
            // Apps still launching do not expose their window list yet.
            is_finished_launching: app.has_attr("AXWindows"),
        };
        let root = self.observe(pid, app)?;
        Ok(FocusedApplication { info, root })
    }

    fn subscribe(
        &mut self,
        element: &ObservedElement,
        kind: NotificationKind,
    ) -> Result<SubscriptionHandle, SourceError> {
        let pid = element.pid;
        if self.table.borrow().get(element.id).is_none() {
            return Err(SourceError::InvalidElement(element.id));
        }
        let fresh = !self.observers.contains_key(&pid);
        if fresh {
            let observer = PidObserver::install(pid, self.sink.clone(), Rc::clone(&self.table))?;
            self.observers.insert(pid, observer);
        }
        let result = {
            let table = self.table.borrow();
            let ax = table
                .get(element.id)
                .ok_or(SourceError::InvalidElement(element.id))?;
            self.observers
                .get_mut(&pid)
                .ok_or(SourceError::Resolution(pid))?
                .add(ax, kind)
        };
        if let Err(e) = result {
            if fresh {
                self.observers.remove(&pid);
            }
            return Err(e.into());
        }
        self.table.borrow_mut().pin(element.id);
        self.next_handle += 1;
        let handle = SubscriptionHandle(self.next_handle);
        self.subs.insert(
            handle,
            Subscription {
                pid,
                element: element.id,
                kind,
            },
        );
        trace!(pid, element = element.id.0, ?kind, "subscribed");
        Ok(handle)
    }

    fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        let Some(sub) = self.subs.remove(&handle) else {
            return;
        };
        if let Some(observer) = self.observers.get_mut(&sub.pid) {
            if let Some(ax) = self.table.borrow().get(sub.element) {
                observer.remove(ax, sub.kind);
            }
            if observer.is_idle() {
                self.observers.remove(&sub.pid);
            }
        }
        self.table.borrow_mut().unpin(sub.element);
        trace!(
            pid = sub.pid,
            element = sub.element.0,
            kind = ?sub.kind,
            elements = self.table.borrow().len(),
            "unsubscribed"
        );
    }

    fn pump(&mut self) {
        // SAFETY: reading the default-mode constant.
        let mode = unsafe { kCFRunLoopDefaultMode };
        let _ = CFRunLoop::run_in_mode(mode, Duration::ZERO, false);
    }
}

impl Drop for MacAxSource {
    fn drop(&mut self) {
        let handles: Vec<_> = self.subs.keys().copied().collect();
        if !handles.is_empty() {
            debug!(count = handles.len(), "releasing leftover AX subscriptions");
        }
        for handle in handles {
            self.unsubscribe(handle);
        }
    }
}
