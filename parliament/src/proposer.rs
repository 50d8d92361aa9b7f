//! The proposer side of paxos recovery.  A collapsed citizen computes a fresh government ballot
//! one major past the government it collapsed under, rallies a quorum behind it, and drives the
//! highest previously accepted value, or its own candidate government, through accept and learn.

use biometrics::{Collector, Counter};

use parliament_pb::{
    Accept, Body, CitizenID, Government, Learn, LogEntry, Message, Prepare, Promise,
};

use super::Dispatch;

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static PREPARE: Counter = Counter::new("parliament.proposer.prepare");
static ACCEPT: Counter = Counter::new("parliament.proposer.accept");
static LEARN: Counter = Counter::new("parliament.proposer.learn");
static ADOPTED: Counter = Counter::new("parliament.proposer.adopted");
static RETRY: Counter = Counter::new("parliament.proposer.retry");

/// Registers this module's biometrics.
pub fn register_biometrics(collector: &Collector) {
    collector.register_counter(&PREPARE);
    collector.register_counter(&ACCEPT);
    collector.register_counter(&LEARN);
    collector.register_counter(&ADOPTED);
    collector.register_counter(&RETRY);
}

/////////////////////////////////////////////// Jitter /////////////////////////////////////////////

const MULTIPLIER: u64 = 16807;
const MODULUS: u64 = (1 << 31) - 1;

/// The deterministic linear-congruential generator behind retry backoff.  Replayed histories
/// draw identical jitter.
#[derive(Clone, Debug)]
pub struct Jitter {
    seed: u64,
}

impl Jitter {
    /// A jitter stream seeded by `seed`.
    pub fn new(seed: u64) -> Self {
        let seed = seed % MODULUS;
        let seed = if seed == 0 { 1 } else { seed };
        Self { seed }
    }

    /// The next draw.
    pub fn next(&mut self) -> u64 {
        self.seed = (self.seed * MULTIPLIER) % MODULUS;
        self.seed
    }

    /// A delay in `[0, timeout)`.
    pub fn backoff(&mut self, timeout: u64) -> u64 {
        if timeout == 0 {
            0
        } else {
            self.next() % timeout
        }
    }
}

//////////////////////////////////////////////// Urge //////////////////////////////////////////////

/// What the citizen should do after the proposer digests a batch of responses.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Urge {
    /// Ship these requests.
    Dispatch(Vec<Dispatch>),
    /// The round failed; schedule a retry.
    Retry,
    /// The batch was stale or the round is already past this phase.
    Nothing,
}

///////////////////////////////////////////// Proposer /////////////////////////////////////////////

#[derive(Clone, Debug, Eq, PartialEq)]
enum Phase {
    Preparing,
    Accepting,
    Learning,
}

/// A proposer driving one recovery ballot.  The quorum is the majority the proposer elected; the
/// whole quorum must answer every phase, so a single rejection or unreachable member fails the
/// round and the citizen retries under a refreshed ballot.
#[derive(Debug)]
pub struct Proposer {
    version: Promise,
    ballot: Promise,
    government: Government,
    quorum: Vec<CitizenID>,
    phase: Phase,
    rejection: Promise,
}

impl Proposer {
    /// A proposer for `government`, championed under `ballot`, collapsed out of the government
    /// enacted at `version`.
    pub fn new(
        version: Promise,
        ballot: Promise,
        government: Government,
        quorum: Vec<CitizenID>,
    ) -> Self {
        assert!(ballot.is_boundary());
        assert!(ballot > version);
        Self {
            version,
            ballot,
            government,
            quorum,
            phase: Phase::Preparing,
            rejection: Promise::BOTTOM,
        }
    }

    /// The government promise this proposer collapsed under.
    pub fn version(&self) -> Promise {
        self.version
    }

    /// The ballot this proposer champions.
    pub fn ballot(&self) -> Promise {
        self.ballot
    }

    /// The highest rejection promise observed across failed rounds.
    pub fn rejection(&self) -> Promise {
        self.rejection
    }

    /// The quorum this proposer rallies.
    pub fn quorum(&self) -> &[CitizenID] {
        &self.quorum
    }

    /// Open the round:  prepare the ballot with the quorum.
    pub fn prepare(&self) -> Vec<Dispatch> {
        PREPARE.click();
        vec![Dispatch {
            to: self.quorum.clone(),
            message: Message::Prepare(Prepare {
                promise: self.ballot,
            }),
        }]
    }

    fn digest(&mut self, batch: &[Option<Message>]) -> Result<Vec<Message>, ()> {
        let mut messages = Vec::new();
        let mut failed = false;
        for response in batch {
            match response {
                Some(message) => {
                    if let Some(promise) = message.rejection() {
                        if promise > self.rejection {
                            self.rejection = promise;
                        }
                        failed = true;
                    }
                    messages.push(message.clone());
                }
                None => {
                    failed = true;
                }
            }
        }
        if failed || messages.len() < self.quorum.len() {
            RETRY.click();
            Err(())
        } else {
            Ok(messages)
        }
    }

    /// Digest the responses to a prepare.  On unanimous support, accept the highest previously
    /// accepted value, re-stamped under this ballot, or this proposer's own candidate.
    pub fn promised(
        &mut self,
        prepare: &Prepare,
        head: Promise,
        batch: &[Option<Message>],
    ) -> Urge {
        if prepare.promise != self.ballot || self.phase != Phase::Preparing {
            return Urge::Nothing;
        }
        let messages = match self.digest(batch) {
            Ok(messages) => messages,
            Err(()) => {
                return Urge::Retry;
            }
        };
        let mut adopted: Option<LogEntry> = None;
        for message in messages {
            let promised = match message {
                Message::Promised(promised) => promised,
                _ => {
                    return Urge::Retry;
                }
            };
            if promised.promise != self.ballot {
                return Urge::Retry;
            }
            if let Some(accepted) = promised.accepted {
                if adopted
                    .as_ref()
                    .map(|a| accepted.promise > a.promise)
                    .unwrap_or(true)
                {
                    adopted = Some(accepted);
                }
            }
        }
        let mut government = match adopted {
            Some(accepted) => {
                ADOPTED.click();
                match accepted.body {
                    Body::Government(government) => government,
                    _ => self.government.clone(),
                }
            }
            None => self.government.clone(),
        };
        government.promise = self.ballot;
        let entry = LogEntry {
            promise: self.ballot,
            previous: head,
            body: Body::Government(government),
        };
        self.phase = Phase::Accepting;
        ACCEPT.click();
        Urge::Dispatch(vec![Dispatch {
            to: self.quorum.clone(),
            message: Message::Accept(Accept { entry }),
        }])
    }

    /// Digest the responses to an accept.  On unanimous acceptance, tell the quorum to learn.
    pub fn accepted(&mut self, accept: &Accept, batch: &[Option<Message>]) -> Urge {
        if accept.entry.promise != self.ballot || self.phase != Phase::Accepting {
            return Urge::Nothing;
        }
        let messages = match self.digest(batch) {
            Ok(messages) => messages,
            Err(()) => {
                return Urge::Retry;
            }
        };
        for message in messages {
            match message {
                Message::Accepted(accepted) if accepted.promise == self.ballot => {}
                _ => {
                    return Urge::Retry;
                }
            }
        }
        self.phase = Phase::Learning;
        LEARN.click();
        Urge::Dispatch(vec![Dispatch {
            to: self.quorum.clone(),
            message: Message::Learn(Learn {
                promise: self.ballot,
            }),
        }])
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////
