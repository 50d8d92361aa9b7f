//! The follower's half of two-phase commit.  The recorder accepts writes from the current
//! leader, holds them provisionally, and finalizes them on commit.  A request that runs ahead of
//! the expected next slot, or any paxos traffic, converts the recorder into an acceptor.

use std::collections::VecDeque;

use biometrics::{Collector, Counter};

use parliament_pb::{Commit, Committed, LogEntry, Message, Promise, Reject, Write, Written};

use super::log::Log;

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static RECORDED: Counter = Counter::new("parliament.recorder.recorded");
static FINALIZED: Counter = Counter::new("parliament.recorder.finalized");
static REJECTED: Counter = Counter::new("parliament.recorder.rejected");
static CONVERTED: Counter = Counter::new("parliament.recorder.converted");

/// Registers this module's biometrics.
pub fn register_biometrics(collector: &Collector) {
    collector.register_counter(&RECORDED);
    collector.register_counter(&FINALIZED);
    collector.register_counter(&REJECTED);
    collector.register_counter(&CONVERTED);
}

///////////////////////////////////////////// Recorded /////////////////////////////////////////////

/// What the citizen should do with a write or commit the recorder has examined.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Recorded {
    /// Return the reply as-is.
    Reply(Message),
    /// Commit the entry to the log, then return the reply.
    Commit { entry: LogEntry, reply: Message },
    /// The request ran ahead of this recorder; convert to an acceptor and reject.
    Convert,
}

///////////////////////////////////////////// Recorder /////////////////////////////////////////////

/// The recorder for one government.  Provisional entries chain onto the log head in order, at
/// most two deep to mirror the writer's pipeline.
#[derive(Debug)]
pub struct Recorder {
    version: Promise,
    writing: VecDeque<LogEntry>,
}

impl Recorder {
    /// A recorder bound to the government enacted at `version`.
    pub fn new(version: Promise) -> Self {
        Self {
            version,
            writing: VecDeque::new(),
        }
    }

    /// The government promise this recorder records under.
    pub fn version(&self) -> Promise {
        self.version
    }

    fn expected(&self, log: &Log, boundary: bool) -> (Promise, Promise) {
        let base = self
            .writing
            .back()
            .map(|e| e.promise)
            .unwrap_or(log.head().promise);
        let expected = if boundary {
            Promise::new(base.government + 1, 0)
        } else {
            base.next_round()
        };
        (base, expected)
    }

    /// Provisionally record a write from the leader.
    pub fn write(&mut self, log: &Log, write: &Write) -> Recorded {
        if write.version != self.version {
            REJECTED.click();
            return Recorded::Reply(Message::Reject(Reject {
                promise: self.version,
            }));
        }
        if let Some(provisional) = self.writing.iter().find(|e| e.promise == write.promise) {
            if provisional.body == write.body {
                return Recorded::Reply(Message::Written(Written {
                    promise: write.promise,
                }));
            }
            REJECTED.click();
            return Recorded::Reply(Message::Reject(Reject {
                promise: self.version,
            }));
        }
        if log.find(write.promise).is_some() {
            return Recorded::Reply(Message::Written(Written {
                promise: write.promise,
            }));
        }
        let (base, expected) = self.expected(log, write.body.is_government());
        if write.promise == expected {
            RECORDED.click();
            self.writing.push_back(LogEntry {
                promise: write.promise,
                previous: base,
                body: write.body.clone(),
            });
            return Recorded::Reply(Message::Written(Written {
                promise: write.promise,
            }));
        }
        if write.promise > expected {
            CONVERTED.click();
            return Recorded::Convert;
        }
        REJECTED.click();
        Recorded::Reply(Message::Reject(Reject {
            promise: self.version,
        }))
    }

    /// Finalize a provisionally recorded write.
    pub fn commit(&mut self, log: &Log, commit: &Commit) -> Recorded {
        if commit.version != self.version {
            REJECTED.click();
            return Recorded::Reply(Message::Reject(Reject {
                promise: self.version,
            }));
        }
        if self
            .writing
            .front()
            .map(|e| e.promise == commit.promise)
            .unwrap_or(false)
        {
            let entry = self.writing.pop_front().expect("front was just observed");
            FINALIZED.click();
            return Recorded::Commit {
                entry,
                reply: Message::Committed(Committed {
                    promise: commit.promise,
                }),
            };
        }
        if commit.promise <= log.head().promise {
            return Recorded::Reply(Message::Committed(Committed {
                promise: commit.promise,
            }));
        }
        CONVERTED.click();
        Recorded::Convert
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////
