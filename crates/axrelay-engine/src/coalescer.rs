//! Event boundary coalescing.
//!
//! Notifications tend to arrive in bursts. Each one is forwarded as it
//! arrives, and the first of a burst opens a boundary. The engine then queues
//! a close behind everything already waiting, so one boundary marker follows
//! the whole burst rather than each event.

/// Boundary tracker.
#[derive(Debug, Default)]
pub struct EventCoalescer {
    /// True between the first event of a burst and its close.
    boundary_open: bool,
    /// Sequence number of the last closed boundary.
    seq: u64,
}

impl EventCoalescer {
    /// Create a coalescer with no open boundary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event. Returns true when this event opened a boundary and a
    /// close must be scheduled.
    pub fn on_event(&mut self) -> bool {
        if self.boundary_open {
            false
        } else {
            self.boundary_open = true;
            true
        }
    }

    /// Close the open boundary, returning its sequence number. Returns `None`
    /// when nothing was open.
    pub fn close(&mut self) -> Option<u64> {
        if !self.boundary_open {
            return None;
        }
        self.boundary_open = false;
        self.seq += 1;
        Some(self.seq)
    }

    /// True while a boundary is open.
    pub fn is_open(&self) -> bool {
        self.boundary_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_close_per_burst() {
        let mut c = EventCoalescer::new();
        let scheduled = (0..5).filter(|_| c.on_event()).count();
        assert_eq!(scheduled, 1);
        assert_eq!(c.close(), Some(1));
        assert_eq!(c.close(), None);
    }

    #[test]
    fn bursts_get_increasing_sequence_numbers() {
        let mut c = EventCoalescer::new();
        for expected in 1..=3 {
            assert!(c.on_event());
            assert!(!c.on_event());
            assert!(c.is_open());
            assert_eq!(c.close(), Some(expected));
            assert!(!c.is_open());
        }
    }
}
