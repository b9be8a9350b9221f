//! Zone transition state machine
//!
//! Holds the single current zone and turns each cycle's membership result into
//! Entered / Exited events. At most one zone is current at a time.

use crate::domain::types::{TransitionEvent, ZoneId};
use smallvec::SmallVec;

/// Events produced by one update; never more than an exit plus an entry
pub type TransitionEvents = SmallVec<[TransitionEvent; 2]>;

/// Where the tracked subject is relative to the zone set
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ZoneState {
    #[default]
    Outside,
    Inside(ZoneId),
}

#[derive(Debug, Default)]
pub struct TransitionTracker {
    state: ZoneState,
}

impl TransitionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ZoneState {
        &self.state
    }

    /// Id of the zone currently occupied
    pub fn current(&self) -> Option<&ZoneId> {
        match &self.state {
            ZoneState::Inside(id) => Some(id),
            ZoneState::Outside => None,
        }
    }

    /// Apply the zone found by the latest cycle
    ///
    /// A move straight from one zone to another emits `Exited` before `Entered`.
    pub fn update(&mut self, new_zone: Option<ZoneId>) -> TransitionEvents {
        let mut events = TransitionEvents::new();

        match (&self.state, new_zone) {
            (ZoneState::Outside, None) => {}
            (ZoneState::Outside, Some(entered)) => {
                events.push(TransitionEvent::Entered(entered.clone()));
                self.state = ZoneState::Inside(entered);
            }
            (ZoneState::Inside(current), Some(next)) if *current == next => {}
            (ZoneState::Inside(current), Some(next)) => {
                events.push(TransitionEvent::Exited(current.clone()));
                events.push(TransitionEvent::Entered(next.clone()));
                self.state = ZoneState::Inside(next);
            }
            (ZoneState::Inside(current), None) => {
                events.push(TransitionEvent::Exited(current.clone()));
                self.state = ZoneState::Outside;
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn z(id: &str) -> ZoneId {
        ZoneId::new(id)
    }

    #[test]
    fn test_outside_stays_outside() {
        let mut tracker = TransitionTracker::new();
        assert!(tracker.update(None).is_empty());
        assert_eq!(tracker.state(), &ZoneState::Outside);
    }

    #[test]
    fn test_enter_stay_exit() {
        let mut tracker = TransitionTracker::new();

        let events = tracker.update(Some(z("A")));
        assert_eq!(events.as_slice(), &[TransitionEvent::Entered(z("A"))]);
        assert_eq!(tracker.current(), Some(&z("A")));

        assert!(tracker.update(Some(z("A"))).is_empty());

        let events = tracker.update(None);
        assert_eq!(events.as_slice(), &[TransitionEvent::Exited(z("A"))]);
        assert_eq!(tracker.current(), None);
    }

    #[test]
    fn test_direct_switch_exits_first() {
        let mut tracker = TransitionTracker::new();
        tracker.update(Some(z("A")));

        let events = tracker.update(Some(z("B")));
        assert_eq!(
            events.as_slice(),
            &[TransitionEvent::Exited(z("A")), TransitionEvent::Entered(z("B"))]
        );
        assert_eq!(tracker.state(), &ZoneState::Inside(z("B")));
    }

    #[test]
    fn test_entered_minus_exited_is_zero_or_one() {
        let mut tracker = TransitionTracker::new();
        let inputs = [Some("A"), Some("A"), Some("B"), None, None, Some("A"), Some("B"), Some("C"), None];
        let mut balance: std::collections::HashMap<ZoneId, i32> = Default::default();

        for input in inputs {
            for event in tracker.update(input.map(z)) {
                let delta = match event {
                    TransitionEvent::Entered(_) => 1,
                    TransitionEvent::Exited(_) => -1,
                };
                *balance.entry(event.zone_id().clone()).or_default() += delta;
            }
            for (zone, b) in &balance {
                assert!(*b == 0 || *b == 1, "zone {zone} balance {b}");
            }
        }
        assert!(balance.values().all(|b| *b == 0));
    }
}
