//! Raw Accessibility and CoreFoundation bindings plus small RAII helpers.

use std::{ffi::c_void, ptr};

use core_foundation::{
    base::{CFGetTypeID, CFRelease, CFRetain, CFTypeRef, TCFType},
    runloop::CFRunLoopSourceRef,
    string::{CFString, CFStringRef},
};

use crate::error::Error;

/// AXObserver callback signature.
pub(crate) type ObserverCallback =
    extern "C" fn(*mut c_void, *mut c_void, CFStringRef, *mut c_void);

#[link(name = "ApplicationServices", kind = "framework")]
unsafe extern "C" {
    pub(crate) fn AXIsProcessTrusted() -> bool;

    pub(crate) fn AXUIElementCreateSystemWide() -> *mut c_void;
    pub(crate) fn AXUIElementCreateApplication(pid: i32) -> *mut c_void;
    pub(crate) fn AXUIElementCopyAttributeValue(
        element: *mut c_void,
        attr: CFStringRef,
        value: *mut CFTypeRef,
    ) -> i32;
    pub(crate) fn AXUIElementGetPid(element: *mut c_void, pid: *mut i32) -> i32;

    pub(crate) fn AXObserverCreate(
        pid: i32,
        callback: ObserverCallback,
        out: *mut *mut c_void,
    ) -> i32;
    pub(crate) fn AXObserverAddNotification(
        observer: *mut c_void,
        element: *mut c_void,
        notification: CFStringRef,
        refcon: *mut c_void,
    ) -> i32;
    pub(crate) fn AXObserverRemoveNotification(
        observer: *mut c_void,
        element: *mut c_void,
        notification: CFStringRef,
    ) -> i32;
    pub(crate) fn AXObserverGetRunLoopSource(observer: *mut c_void) -> *mut c_void;
}

#[link(name = "CoreFoundation", kind = "framework")]
unsafe extern "C" {
    pub(crate) fn CFEqual(a: CFTypeRef, b: CFTypeRef) -> bool;
    pub(crate) fn CFRunLoopAddSource(
        rl: *mut c_void,
        source: CFRunLoopSourceRef,
        mode: CFStringRef,
    );
    pub(crate) fn CFRunLoopRemoveSource(
        rl: *mut c_void,
        source: CFRunLoopSourceRef,
        mode: CFStringRef,
    );
    pub(crate) fn CFBundleGetIdentifier(bundle: *const c_void) -> CFStringRef;
}

/// Retained `AXUIElementRef`, released on drop.
#[derive(Debug)]
pub(crate) struct AxElement(*mut c_void);

impl AxElement {
    /// Take ownership of a reference returned under the create rule.
    pub(crate) fn from_create(ptr: *mut c_void) -> Option<Self> {
        if ptr.is_null() { None } else { Some(Self(ptr)) }
    }

    /// Retain a borrowed reference, e.g. the element handed to an observer callback.
    pub(crate) fn retain(ptr: *mut c_void) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }
        // SAFETY: non-null CF object owned by the caller for the duration of this call.
        unsafe { CFRetain(ptr as CFTypeRef) };
        Some(Self(ptr))
    }

    pub(crate) fn as_ptr(&self) -> *mut c_void {
        self.0
    }

    /// CF equality: two references to the same on-screen element compare equal.
    pub(crate) fn same_as(&self, other: *mut c_void) -> bool {
        // SAFETY: both are live CF objects.
        unsafe { CFEqual(self.0 as CFTypeRef, other as CFTypeRef) }
    }

    /// Owning process, if the element still answers.
    pub(crate) fn pid(&self) -> Option<i32> {
        let mut pid = 0;
        // SAFETY: valid element and out pointer.
        let err = unsafe { AXUIElementGetPid(self.0, &mut pid) };
        (err == 0).then_some(pid)
    }

    /// Copy an element-valued attribute.
    pub(crate) fn element_attr(&self, name: &'static str) -> Result<Self, Error> {
        let attr = CFString::from_static_string(name);
        let mut v: CFTypeRef = ptr::null_mut();
        // SAFETY: valid element, attribute string, and out pointer.
        let err =
            unsafe { AXUIElementCopyAttributeValue(self.0, attr.as_concrete_TypeRef(), &mut v) };
        if err != 0 {
            return Err(Error::Ax { op: name, code: err });
        }
        Self::from_create(v as *mut c_void).ok_or(Error::Null(name))
    }

    /// Copy a string-valued attribute; `None` when missing or not a string.
    pub(crate) fn string_attr(&self, name: &'static str) -> Option<String> {
        let attr = CFString::from_static_string(name);
        let mut v: CFTypeRef = ptr::null_mut();
        // SAFETY: valid element, attribute string, and out pointer.
        let err =
            unsafe { AXUIElementCopyAttributeValue(self.0, attr.as_concrete_TypeRef(), &mut v) };
        if err != 0 || v.is_null() {
            return None;
        }
        // SAFETY: `v` is a live CF object returned under the create rule.
        unsafe {
            if CFGetTypeID(v) != CFString::type_id() {
                CFRelease(v);
                return None;
            }
            Some(CFString::wrap_under_create_rule(v as CFStringRef).to_string())
        }
    }

    /// Whether the attribute can be read at all.
    pub(crate) fn has_attr(&self, name: &'static str) -> bool {
        let attr = CFString::from_static_string(name);
        let mut v: CFTypeRef = ptr::null_mut();
        // SAFETY: valid element, attribute string, and out pointer.
        let err =
            unsafe { AXUIElementCopyAttributeValue(self.0, attr.as_concrete_TypeRef(), &mut v) };
        if !v.is_null() {
            // SAFETY: returned under the create rule.
            unsafe { CFRelease(v) };
        }
        err == 0
    }
}

impl Drop for AxElement {
    fn drop(&mut self) {
        // SAFETY: we own one retain count.
        unsafe { CFRelease(self.0 as CFTypeRef) }
    }
}

/// Retained `AXObserverRef`, released on drop.
pub(crate) struct AxObserver(*mut c_void);

impl AxObserver {
    /// Create an observer for `pid` delivering to `callback`.
    pub(crate) fn create(pid: i32, callback: ObserverCallback) -> Result<Self, Error> {
        let mut ptr: *mut c_void = ptr::null_mut();
        // SAFETY: valid callback and out pointer.
        let err = unsafe { AXObserverCreate(pid, callback, &mut ptr) };
        if err != 0 {
            return Err(Error::Ax {
                op: "AXObserverCreate",
                code: err,
            });
        }
        if ptr.is_null() {
            return Err(Error::Null("AXObserverCreate"));
        }
        Ok(Self(ptr))
    }

    pub(crate) fn as_ptr(&self) -> *mut c_void {
        self.0
    }
}

impl Drop for AxObserver {
    fn drop(&mut self) {
        // SAFETY: we own one retain count.
        unsafe { CFRelease(self.0 as CFTypeRef) }
    }
}
