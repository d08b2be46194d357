//! Identity table mapping live AX element references to stable [`ElementId`]s.
//!
//! AX hands out a fresh reference for every query, so identity is decided by
//! `CFEqual` against the elements already known. Elements with active
//! subscriptions are pinned; unpinned entries are kept in a small FIFO so that
//! repeated samples of the same element keep their id between ticks.

use std::{
    collections::{HashMap, VecDeque},
    ffi::c_void,
};

use axrelay_engine::ElementId;

use crate::ffi::AxElement;

/// Number of unpinned elements remembered.
const RECENT_CAPACITY: usize = 64;

/// A known element and how many subscriptions hold it.
struct Slot {
    element: AxElement,
    pins: usize,
}

/// Element identity table.
#[derive(Default)]
pub(crate) struct ElementTable {
    /// Known elements by id.
    slots: HashMap<ElementId, Slot>,
    /// Unpinned ids, oldest first.
    recent: VecDeque<ElementId>,
    /// Last id handed out.
    next: u64,
}

impl ElementTable {
    /// Return the id for `element`, inserting it when unseen.
    pub(crate) fn intern(&mut self, element: AxElement) -> ElementId {
        if let Some(id) = self.find(element.as_ptr()) {
            return id;
        }
        self.next += 1;
        let id = ElementId(self.next);
        self.slots.insert(id, Slot { element, pins: 0 });
        self.remember(id);
        id
    }

    /// Look up an id by CF equality.
    fn find(&self, ptr: *mut c_void) -> Option<ElementId> {
        self.slots
            .iter()
            .find(|(_, slot)| slot.element.same_as(ptr))
            .map(|(id, _)| *id)
    }

    pub(crate) fn get(&self, id: ElementId) -> Option<&AxElement> {
        self.slots.get(&id).map(|s| &s.element)
    }

    /// Hold `id` until a matching [`Self::unpin`].
    pub(crate) fn pin(&mut self, id: ElementId) {
        if let Some(slot) = self.slots.get_mut(&id) {
            if slot.pins == 0 {
                self.recent.retain(|r| *r != id);
            }
            slot.pins += 1;
        }
    }

    /// Release one pin; the element becomes evictable when none remain.
    pub(crate) fn unpin(&mut self, id: ElementId) {
        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };
        slot.pins = slot.pins.saturating_sub(1);
        if slot.pins == 0 {
            self.remember(id);
        }
    }

    /// Queue an unpinned id, evicting the oldest beyond capacity.
    fn remember(&mut self, id: ElementId) {
        self.recent.push_back(id);
        while self.recent.len() > RECENT_CAPACITY {
            if let Some(old) = self.recent.pop_front() {
                self.slots.remove(&old);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use core_foundation::{base::TCFType, string::CFString};

    use super::*;

    /// Any CF object works for identity tests; strings compare by value.
    fn elem(s: &str) -> AxElement {
        let cf = CFString::new(s);
        AxElement::retain(cf.as_concrete_TypeRef() as *mut c_void).expect("non-null")
    }

    #[test]
    fn equal_elements_share_an_id() {
        let mut table = ElementTable::default();
        let a = table.intern(elem("window-1"));
        let b = table.intern(elem("window-1"));
        let c = table.intern(elem("window-2"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn pinned_elements_survive_eviction() {
        let mut table = ElementTable::default();
        let pinned = table.intern(elem("pinned"));
        table.pin(pinned);
        for i in 0..RECENT_CAPACITY * 2 {
            table.intern(elem(&format!("tmp-{i}")));
        }
        assert!(table.get(pinned).is_some());
        assert_eq!(table.len(), RECENT_CAPACITY + 1);
        assert_eq!(table.intern(elem("pinned")), pinned);

        table.unpin(pinned);
        for i in 0..RECENT_CAPACITY {
            table.intern(elem(&format!("more-{i}")));
        }
        assert!(table.get(pinned).is_none());
    }
}
