//! A frame-delta driven timer, generic over any id type a caller finds
//! useful (session tokens, peer ids) rather than a single fixed id type.
//!
//! Nothing in this crate reads the wall clock: callers drive `update_and_get_list`
//! with a delta they measured themselves, which is what makes the host-side
//! reconnection window and pre-close grace period in [`crate::lobby`]
//! deterministically testable.

struct TimeEntry<Id> {
    id: Id,
    remaining_seconds: f32,
}

pub struct Timer<Id> {
    entries: Vec<TimeEntry<Id>>,
}

impl<Id: Clone + PartialEq> Timer<Id> {
    pub fn new() -> Self {
        Timer {
            entries: Vec::new(),
        }
    }

    /// Starts a new timer. A timer already registered under `id` is replaced.
    pub fn start_timer(&mut self, id: Id, remaining_seconds: f32) {
        self.entries.retain(|e| e.id != id);
        self.entries.push(TimeEntry {
            id,
            remaining_seconds,
        });
    }

    /// Kills a timer, if one is still running under `id`.
    pub fn cancel_timer(&mut self, id: &Id) {
        self.entries.retain(|e| &e.id != id);
    }

    pub fn is_running(&self, id: &Id) -> bool {
        self.entries.iter().any(|e| &e.id == id)
    }

    /// Advances every running timer by `delta_seconds` and returns the ids of
    /// every timer that expired this tick, removing them.
    pub fn update_and_get_list(&mut self, delta_seconds: f32) -> Vec<Id> {
        let mut expired = Vec::new();
        for entry in self.entries.iter_mut() {
            entry.remaining_seconds -= delta_seconds;
            if entry.remaining_seconds <= 0.0 {
                expired.push(entry.id.clone());
            }
        }
        self.entries.retain(|e| !expired.contains(&e.id));
        expired
    }
}

impl<Id: Clone + PartialEq> Default for Timer<Id> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_remaining_time_elapses() {
        let mut timer: Timer<&str> = Timer::new();
        timer.start_timer("reconnect:p1", 5.0);
        assert!(timer.update_and_get_list(3.0).is_empty());
        assert_eq!(timer.update_and_get_list(2.5), vec!["reconnect:p1"]);
        assert!(timer.update_and_get_list(10.0).is_empty());
    }

    #[test]
    fn restart_overwrites_remaining_time() {
        let mut timer: Timer<&str> = Timer::new();
        timer.start_timer("grace:p2", 1.0);
        timer.start_timer("grace:p2", 5.0);
        assert!(timer.update_and_get_list(1.5).is_empty());
        assert!(timer.is_running(&"grace:p2"));
    }

    #[test]
    fn cancel_prevents_firing() {
        let mut timer: Timer<&str> = Timer::new();
        timer.start_timer("reconnect:p3", 2.0);
        timer.cancel_timer(&"reconnect:p3");
        assert!(timer.update_and_get_list(5.0).is_empty());
    }
}
