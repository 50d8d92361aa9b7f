//! The acceptor side of paxos recovery.  An acceptor never supports a promise lower than the
//! highest it has prepared, and it remembers the proposer it promised so that two proposers
//! working the same ballot cannot both win it.

use biometrics::{Collector, Counter};

use parliament_pb::{Accepted, CitizenID, LogEntry, Message, Promise, Promised, Reject};

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static PROMISED: Counter = Counter::new("parliament.acceptor.promised");
static ACCEPTED: Counter = Counter::new("parliament.acceptor.accepted");
static REJECTED: Counter = Counter::new("parliament.acceptor.rejected");

/// Registers this module's biometrics.
pub fn register_biometrics(collector: &Collector) {
    collector.register_counter(&PROMISED);
    collector.register_counter(&ACCEPTED);
    collector.register_counter(&REJECTED);
}

///////////////////////////////////////////// Acceptor /////////////////////////////////////////////

/// The acceptor a recorder becomes when two-phase commit breaks down.  `promised` starts at the
/// promise of the government that was enacted when the conversion happened, so no recovery
/// ballot can regress behind the log.
#[derive(Debug)]
pub struct Acceptor {
    promised: Promise,
    promised_to: CitizenID,
    accepted: Option<LogEntry>,
}

impl Acceptor {
    /// An acceptor floored at `version`.
    pub fn new(version: Promise) -> Self {
        Self {
            promised: version,
            promised_to: CitizenID::BOTTOM,
            accepted: None,
        }
    }

    /// The highest promise this acceptor has prepared.
    pub fn promised(&self) -> Promise {
        self.promised
    }

    fn supports(&self, from: CitizenID, promise: Promise) -> bool {
        promise > self.promised || (promise == self.promised && from == self.promised_to)
    }

    /// Phase one:  promise to support `promise` iff it is the highest seen, relaying the
    /// highest previously accepted entry.
    pub fn prepare(&mut self, from: CitizenID, promise: Promise) -> Message {
        if !self.supports(from, promise) {
            REJECTED.click();
            return Message::Reject(Reject {
                promise: self.promised,
            });
        }
        PROMISED.click();
        self.promised = promise;
        self.promised_to = from;
        Message::Promised(Promised {
            promise,
            accepted: self.accepted.clone(),
        })
    }

    /// Phase two:  accept the entry iff its ballot is still the highest seen.
    pub fn accept(&mut self, from: CitizenID, entry: LogEntry) -> Message {
        let promise = entry.promise;
        if !self.supports(from, promise) {
            REJECTED.click();
            return Message::Reject(Reject {
                promise: self.promised,
            });
        }
        ACCEPTED.click();
        self.promised = promise;
        self.promised_to = from;
        self.accepted = Some(entry);
        Message::Accepted(Accepted { promise })
    }

    /// Phase three:  the ballot won.  Surrender the accepted entry for commit, if it matches.
    pub fn learn(&mut self, promise: Promise) -> Option<LogEntry> {
        match &self.accepted {
            Some(entry) if entry.promise == promise => self.accepted.clone(),
            _ => None,
        }
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use parliament_pb::{Body, Government};

    use super::*;

    fn citizen(x: u8) -> CitizenID {
        CitizenID::new([x; 16])
    }

    fn entry(promise: Promise) -> LogEntry {
        LogEntry {
            promise,
            previous: Promise::new(promise.government - 1, 0),
            body: Body::Government(Government {
                promise,
                ..Government::default()
            }),
        }
    }

    #[test]
    fn prepare_accept_learn() {
        let mut acceptor = Acceptor::new(Promise::new(4, 0));
        match acceptor.prepare(citizen(1), Promise::new(5, 0)) {
            Message::Promised(promised) => {
                assert_eq!(Promise::new(5, 0), promised.promise);
                assert!(promised.accepted.is_none());
            }
            message => panic!("expected promised, got {message:?}"),
        }
        match acceptor.accept(citizen(1), entry(Promise::new(5, 0))) {
            Message::Accepted(_) => {}
            message => panic!("expected accepted, got {message:?}"),
        }
        assert_eq!(
            Some(entry(Promise::new(5, 0))),
            acceptor.learn(Promise::new(5, 0)),
        );
    }

    #[test]
    fn lower_ballots_are_rejected() {
        let mut acceptor = Acceptor::new(Promise::new(4, 0));
        acceptor.prepare(citizen(1), Promise::new(6, 0));
        match acceptor.prepare(citizen(2), Promise::new(5, 0)) {
            Message::Reject(reject) => assert_eq!(Promise::new(6, 0), reject.promise),
            message => panic!("expected reject, got {message:?}"),
        }
    }

    #[test]
    fn equal_ballots_stay_with_the_first_proposer() {
        let mut acceptor = Acceptor::new(Promise::new(4, 0));
        acceptor.prepare(citizen(1), Promise::new(5, 0));
        match acceptor.prepare(citizen(2), Promise::new(5, 0)) {
            Message::Reject(_) => {}
            message => panic!("expected reject, got {message:?}"),
        }
        match acceptor.prepare(citizen(1), Promise::new(5, 0)) {
            Message::Promised(_) => {}
            message => panic!("expected promised, got {message:?}"),
        }
    }

    #[test]
    fn prepare_relays_prior_acceptance() {
        let mut acceptor = Acceptor::new(Promise::new(4, 0));
        acceptor.prepare(citizen(1), Promise::new(5, 0));
        acceptor.accept(citizen(1), entry(Promise::new(5, 0)));
        match acceptor.prepare(citizen(2), Promise::new(6, 0)) {
            Message::Promised(promised) => {
                assert_eq!(Some(entry(Promise::new(5, 0))), promised.accepted);
            }
            message => panic!("expected promised, got {message:?}"),
        }
    }

    #[test]
    fn accept_without_prepare_supersedes() {
        let mut acceptor = Acceptor::new(Promise::new(4, 0));
        match acceptor.accept(citizen(1), entry(Promise::new(5, 0))) {
            Message::Accepted(_) => {}
            message => panic!("expected accepted, got {message:?}"),
        }
    }

    #[test]
    fn learn_of_unknown_ballot_is_empty() {
        let mut acceptor = Acceptor::new(Promise::new(4, 0));
        assert_eq!(None, acceptor.learn(Promise::new(5, 0)));
    }
}
