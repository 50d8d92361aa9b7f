//! A keyed timer.  Scheduling an event under a key replaces any prior event under that key, so
//! retries are idempotent by construction.  The scheduler never preempts:  the driver supplies
//! `now` and drains whatever has come due.

use std::collections::{BTreeMap, HashMap};

use parliament_pb::CitizenID;

/////////////////////////////////////////////// Timer //////////////////////////////////////////////

/// The events that drive a citizen.  Synchronize doubles as the ping event:  the message sent
/// when the timer fires depends upon whether the peer has anything to catch up on.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Timer {
    /// Synchronize the provided peer.
    Synchronize { peer: CitizenID },
    /// The leader has gone quiet; abandon two-phase commit and run paxos.
    Collapse,
    /// Retry an in-progress paxos proposal.
    Propose,
}

///////////////////////////////////////////// Scheduler ////////////////////////////////////////////

/// A deterministic keyed timer.  Given identical `now` inputs and identical scheduling calls,
/// `due` returns events in a stable order, ties broken by insertion order.
#[derive(Debug, Default)]
pub struct Scheduler {
    counter: u64,
    schedule: BTreeMap<(u64, u64), Timer>,
    index: HashMap<Timer, (u64, u64)>,
}

impl Scheduler {
    /// A scheduler with nothing scheduled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `timer` to fire at `when`, replacing any prior schedule for the same timer.
    pub fn schedule(&mut self, when: u64, timer: Timer) {
        if let Some(key) = self.index.remove(&timer) {
            self.schedule.remove(&key);
        }
        self.counter += 1;
        let key = (when, self.counter);
        self.index.insert(timer.clone(), key);
        self.schedule.insert(key, timer);
    }

    /// Remove any schedule for `timer`.
    pub fn unschedule(&mut self, timer: &Timer) {
        if let Some(key) = self.index.remove(timer) {
            self.schedule.remove(&key);
        }
    }

    /// Remove every schedule.
    pub fn clear(&mut self) {
        self.schedule.clear();
        self.index.clear();
    }

    /// Drain every timer that has come due at `now`.
    pub fn due(&mut self, now: u64) -> Vec<Timer> {
        let mut due = Vec::new();
        while let Some((&key, _)) = self.schedule.iter().next() {
            if key.0 > now {
                break;
            }
            let timer = self.schedule.remove(&key).expect("key was just observed");
            self.index.remove(&timer);
            due.push(timer);
        }
        due
    }

    /// The number of scheduled timers.
    pub fn len(&self) -> usize {
        self.schedule.len()
    }

    /// True iff nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty()
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn citizen(x: u8) -> CitizenID {
        CitizenID::new([x; 16])
    }

    #[test]
    fn schedule_replaces_by_key() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(5, Timer::Collapse);
        scheduler.schedule(10, Timer::Collapse);
        assert!(scheduler.due(5).is_empty());
        assert_eq!(vec![Timer::Collapse], scheduler.due(10));
    }

    #[test]
    fn distinct_peers_are_distinct_keys() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(1, Timer::Synchronize { peer: citizen(1) });
        scheduler.schedule(1, Timer::Synchronize { peer: citizen(2) });
        assert_eq!(2, scheduler.due(1).len());
    }

    #[test]
    fn ties_fire_in_insertion_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(3, Timer::Propose);
        scheduler.schedule(3, Timer::Collapse);
        scheduler.schedule(3, Timer::Synchronize { peer: citizen(1) });
        assert_eq!(
            vec![
                Timer::Propose,
                Timer::Collapse,
                Timer::Synchronize { peer: citizen(1) },
            ],
            scheduler.due(3),
        );
    }

    #[test]
    fn unschedule_removes() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(1, Timer::Collapse);
        scheduler.unschedule(&Timer::Collapse);
        assert!(scheduler.due(1).is_empty());
    }

    #[test]
    fn clear_removes_everything() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(1, Timer::Collapse);
        scheduler.schedule(2, Timer::Propose);
        scheduler.clear();
        assert!(scheduler.is_empty());
        assert!(scheduler.due(u64::MAX).is_empty());
    }

    #[test]
    fn due_is_monotonic() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(1, Timer::Collapse);
        scheduler.schedule(2, Timer::Propose);
        assert_eq!(vec![Timer::Collapse], scheduler.due(1));
        assert_eq!(vec![Timer::Propose], scheduler.due(2));
        assert!(scheduler.due(3).is_empty());
    }
}
