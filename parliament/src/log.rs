//! The atomic log:  an append-only chain of entries keyed by promise, with a moving trailer.
//! Entries are never mutated after push.  The indexer keeps a balanced-tree view keyed on
//! promise so lookups are logarithmic while appends and trailer shifts stay constant-time.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use biometrics::{Collector, Counter};

use parliament_pb::{Body, LogEntry, Promise};

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static PUSH: Counter = Counter::new("parliament.log.push");
static SHIFT: Counter = Counter::new("parliament.log.shift");

/// Registers this module's biometrics.
pub fn register_biometrics(collector: &Collector) {
    collector.register_counter(&PUSH);
    collector.register_counter(&SHIFT);
}

//////////////////////////////////////////////// Log ///////////////////////////////////////////////

/// The log of one citizen.  A fresh log holds a single placeholder entry at `0/0` so that a
/// citizen that has committed nothing has a well-defined head; the placeholder is garbage
/// collected like any other entry once the cluster minimum rises past it.
#[derive(Debug)]
pub struct Log {
    entries: VecDeque<LogEntry>,
    index: BTreeMap<Promise, u64>,
    base: u64,
}

impl Log {
    /// A log holding only the placeholder entry.
    pub fn new() -> Self {
        let placeholder = LogEntry {
            promise: Promise::BOTTOM,
            previous: Promise::BOTTOM,
            body: Body::Nop,
        };
        let mut index = BTreeMap::new();
        index.insert(Promise::BOTTOM, 0);
        let mut entries = VecDeque::new();
        entries.push_back(placeholder);
        Self {
            entries,
            index,
            base: 0,
        }
    }

    /// Append an entry at the head.  The entry must chain onto the current head; a violation is
    /// a bug in the caller and aborts the process.  The sole exception is the first entry to
    /// land atop the placeholder:  a naturalizing citizen's first commit chains onto whatever
    /// its sender's log held, so only the entry's internal invariants are checked.
    pub fn push(&mut self, entry: LogEntry) {
        assert!(entry.promise > entry.previous);
        if entry.is_government() {
            // Contended recovery rounds may skip majors; they never reuse or regress one.
            assert!(entry.promise.is_boundary());
            assert!(entry.promise.government > entry.previous.government);
        } else {
            assert_eq!(entry.previous.next_round(), entry.promise);
        }
        if !self.at_genesis() {
            assert_eq!(self.head().promise, entry.previous);
        }
        PUSH.click();
        let position = self.base + self.entries.len() as u64;
        self.index.insert(entry.promise, position);
        self.entries.push_back(entry);
    }

    /// The entry at the head of the log.
    pub fn head(&self) -> &LogEntry {
        self.entries.back().expect("log is never empty")
    }

    /// The entry at the provided promise, if the log still holds it.
    pub fn find(&self, promise: Promise) -> Option<&LogEntry> {
        let position = *self.index.get(&promise)?;
        self.entries.get((position - self.base) as usize)
    }

    /// Entries at or above the provided promise, in chain order.
    pub fn tail(&self, promise: Promise) -> impl Iterator<Item = &LogEntry> + '_ {
        self.index
            .range(promise..)
            .filter_map(move |(_, position)| self.entries.get((position - self.base) as usize))
    }

    /// Advance the trailer past every entry whose promise is strictly less than `propagated`,
    /// never past the head.  Returns the number of entries collected.
    pub fn shift_trailer(&mut self, propagated: Promise) -> usize {
        let mut shifted = 0;
        while self.entries.len() > 1 {
            let front = self.entries.front().expect("log is never empty");
            if front.promise >= propagated {
                break;
            }
            self.index.remove(&front.promise);
            self.entries.pop_front();
            self.base += 1;
            shifted += 1;
            SHIFT.click();
        }
        shifted
    }

    /// The promise of the entry at the trailer.
    pub fn trailer(&self) -> Promise {
        self.entries.front().expect("log is never empty").promise
    }

    /// The number of entries the log currently holds.  A log is never empty:  the count
    /// includes the placeholder until the trailer collects it.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Every entry, in chain order.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> + '_ {
        self.entries.iter()
    }

    /// True iff the log holds only the placeholder, so the next push starts the chain.
    pub fn at_genesis(&self) -> bool {
        self.base == 0
            && self.entries.len() == 1
            && self.head().promise == Promise::BOTTOM
    }
}

impl Default for Log {
    fn default() -> Self {
        Self::new()
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use parliament_pb::Government;

    use super::*;

    fn government(promise: Promise, previous: Promise) -> LogEntry {
        LogEntry {
            promise,
            previous,
            body: Body::Government(Government {
                promise,
                ..Government::default()
            }),
        }
    }

    fn entry(promise: Promise, previous: Promise) -> LogEntry {
        LogEntry {
            promise,
            previous,
            body: Body::Entry(vec![0xc0, 0xff, 0xee]),
        }
    }

    #[test]
    fn genesis() {
        let log = Log::new();
        assert!(log.at_genesis());
        assert_eq!(Promise::BOTTOM, log.head().promise);
        assert_eq!(1, log.len());
    }

    #[test]
    fn chains() {
        let mut log = Log::new();
        log.push(government(Promise::new(1, 0), Promise::BOTTOM));
        log.push(entry(Promise::new(1, 1), Promise::new(1, 0)));
        log.push(entry(Promise::new(1, 2), Promise::new(1, 1)));
        log.push(government(Promise::new(2, 0), Promise::new(1, 2)));
        assert_eq!(Promise::new(2, 0), log.head().promise);
        assert_eq!(5, log.len());
        assert!(log.find(Promise::new(1, 1)).is_some());
        assert!(log.find(Promise::new(1, 3)).is_none());
    }

    #[test]
    fn naturalization_starts_midchain() {
        let mut log = Log::new();
        log.push(government(Promise::new(2, 0), Promise::new(1, 0)));
        assert_eq!(Promise::new(2, 0), log.head().promise);
        assert!(!log.at_genesis());
    }

    #[test]
    #[should_panic]
    fn branching_aborts() {
        let mut log = Log::new();
        log.push(government(Promise::new(1, 0), Promise::BOTTOM));
        log.push(entry(Promise::new(1, 1), Promise::new(1, 0)));
        log.push(entry(Promise::new(1, 2), Promise::new(1, 0)));
    }

    #[test]
    #[should_panic]
    fn governments_land_on_boundaries() {
        let mut log = Log::new();
        log.push(government(Promise::new(1, 0), Promise::BOTTOM));
        log.push(entry(Promise::new(1, 1), Promise::new(1, 0)));
        log.push(government(Promise::new(1, 2), Promise::new(1, 1)));
    }

    #[test]
    fn recovery_governments_may_skip_majors() {
        let mut log = Log::new();
        log.push(government(Promise::new(1, 0), Promise::BOTTOM));
        log.push(government(Promise::new(4, 0), Promise::new(1, 0)));
        assert_eq!(Promise::new(4, 0), log.head().promise);
    }

    #[test]
    fn trailer_respects_minimum() {
        let mut log = Log::new();
        log.push(government(Promise::new(1, 0), Promise::BOTTOM));
        log.push(entry(Promise::new(1, 1), Promise::new(1, 0)));
        log.push(entry(Promise::new(1, 2), Promise::new(1, 1)));
        assert_eq!(2, log.shift_trailer(Promise::new(1, 1)));
        assert_eq!(Promise::new(1, 1), log.trailer());
        assert!(log.find(Promise::new(1, 0)).is_none());
        assert!(log.find(Promise::new(1, 1)).is_some());
    }

    #[test]
    fn trailer_never_passes_head() {
        let mut log = Log::new();
        log.push(government(Promise::new(1, 0), Promise::BOTTOM));
        assert_eq!(1, log.shift_trailer(Promise::TOP));
        assert_eq!(1, log.len());
        assert_eq!(Promise::new(1, 0), log.head().promise);
    }

    #[test]
    fn tail_iterates_in_chain_order() {
        let mut log = Log::new();
        log.push(government(Promise::new(1, 0), Promise::BOTTOM));
        log.push(entry(Promise::new(1, 1), Promise::new(1, 0)));
        log.push(entry(Promise::new(1, 2), Promise::new(1, 1)));
        let promises: Vec<Promise> = log.tail(Promise::new(1, 1)).map(|e| e.promise).collect();
        assert_eq!(vec![Promise::new(1, 1), Promise::new(1, 2)], promises);
    }
}
