//! The leader's half of two-phase commit.  The writer batches proposals to the government's
//! majority:  a write provisionally records an entry at every member of the quorum, and the
//! commit that follows finalizes it.  Any rejection means a higher promise exists somewhere and
//! the leader must collapse into a paxos round.

use std::collections::VecDeque;

use biometrics::{Collector, Counter};

use parliament_pb::{Body, CitizenID, Commit, Government, Message, Promise, Remap, Write};

use super::Dispatch;

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static PUSH: Counter = Counter::new("parliament.writer.push");
static UNSHIFT: Counter = Counter::new("parliament.writer.unshift");
static WRITE: Counter = Counter::new("parliament.writer.write");
static PIGGYBACK: Counter = Counter::new("parliament.writer.piggyback");
static REJECTED: Counter = Counter::new("parliament.writer.rejected");

/// Registers this module's biometrics.
pub fn register_biometrics(collector: &Collector) {
    collector.register_counter(&PUSH);
    collector.register_counter(&UNSHIFT);
    collector.register_counter(&WRITE);
    collector.register_counter(&PIGGYBACK);
    collector.register_counter(&REJECTED);
}

///////////////////////////////////////////// Proposal /////////////////////////////////////////////

/// A proposal owned by the writer until it commits or is re-mapped by a new government.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Proposal {
    pub promise: Promise,
    pub quorum: Vec<CitizenID>,
    pub body: Body,
    pub was: Option<Promise>,
}

///////////////////////////////////////////// InFlight /////////////////////////////////////////////

#[derive(Clone, Debug)]
struct InFlight {
    proposal: Proposal,
    committing: bool,
}

////////////////////////////////////////////// Writer //////////////////////////////////////////////

/// The writer for one government.  At most two proposals are in flight:  the one being
/// committed and an optional piggybacked successor.  Governments always fly alone so that a
/// membership change clears the pipeline before anything commits under it.
#[derive(Debug)]
pub struct Writer {
    version: Promise,
    next: Promise,
    proposals: VecDeque<Proposal>,
    writing: VecDeque<InFlight>,
}

impl Writer {
    /// A writer bound to the government enacted at `version`.
    pub fn new(version: Promise) -> Self {
        Self {
            version,
            next: version,
            proposals: VecDeque::new(),
            writing: VecDeque::new(),
        }
    }

    /// The government promise this writer writes under.
    pub fn version(&self) -> Promise {
        self.version
    }

    /// Append a proposal, assigning it the next minor promise.
    pub fn push(&mut self, quorum: Vec<CitizenID>, body: Body) -> Promise {
        assert!(!body.is_government());
        PUSH.click();
        self.next = self.next.next_round();
        self.proposals.push_back(Proposal {
            promise: self.next,
            quorum,
            body,
            was: None,
        });
        self.next
    }

    /// Re-map every queued proposal to a post-government promise.  Returns the map that the
    /// government entry will carry so that clients can follow their proposals across the
    /// boundary.  Call this before `unshift`ing the government itself.
    pub fn remap(&mut self, boundary: Promise) -> Vec<Remap> {
        let mut map = Vec::new();
        let mut next = boundary;
        for proposal in self.proposals.iter_mut() {
            next = next.next_round();
            map.push(Remap {
                was: proposal.promise,
                now: next,
            });
            proposal.was = Some(proposal.promise);
            proposal.promise = next;
        }
        self.next = next;
        map
    }

    /// Prepend a government proposal so that it jumps the queue.
    pub fn unshift(&mut self, quorum: Vec<CitizenID>, government: Government) {
        UNSHIFT.click();
        let promise = government.promise;
        assert!(promise.is_boundary());
        self.proposals.push_front(Proposal {
            promise,
            quorum,
            body: Body::Government(government),
            was: None,
        });
        if self.next < promise {
            self.next = promise;
        }
    }

    /// If nothing is in flight and the queue is non-empty, move the head proposal into flight
    /// and produce the write for its quorum.
    pub fn nudge(&mut self) -> Vec<Dispatch> {
        if !self.writing.is_empty() {
            return Vec::new();
        }
        let proposal = match self.proposals.pop_front() {
            Some(proposal) => proposal,
            None => {
                return Vec::new();
            }
        };
        WRITE.click();
        let dispatch = Dispatch {
            to: proposal.quorum.clone(),
            message: Message::Write(Write {
                version: self.version,
                promise: proposal.promise,
                body: proposal.body.clone(),
            }),
        };
        self.writing.push_back(InFlight {
            proposal,
            committing: false,
        });
        vec![dispatch]
    }

    /// The quorum acknowledged (or failed) a write.  On success the in-flight slot moves to the
    /// commit phase, and a successor write may piggyback when neither entry is a government
    /// boundary.  `failure` carries the rejection promise, or `0/0` for an unreachable quorum
    /// member; either way the writer cannot proceed and the citizen must collapse.
    pub fn written(
        &mut self,
        write: &Write,
        failure: Option<Promise>,
    ) -> Result<Vec<Dispatch>, Promise> {
        if write.version != self.version {
            return Ok(Vec::new());
        }
        let position = match self
            .writing
            .iter()
            .position(|w| w.proposal.promise == write.promise && !w.committing)
        {
            Some(position) => position,
            None => {
                return Ok(Vec::new());
            }
        };
        if let Some(rejection) = failure {
            REJECTED.click();
            return Err(rejection);
        }
        self.writing[position].committing = true;
        let quorum = self.writing[position].proposal.quorum.clone();
        let mut dispatches = vec![Dispatch {
            to: quorum,
            message: Message::Commit(Commit {
                version: self.version,
                promise: write.promise,
            }),
        }];
        let boundary = self.writing[position].proposal.body.is_government();
        if self.writing.len() == 1
            && !boundary
            && self
                .proposals
                .front()
                .map(|p| !p.body.is_government())
                .unwrap_or(false)
        {
            let proposal = self.proposals.pop_front().expect("front was just observed");
            PIGGYBACK.click();
            dispatches.push(Dispatch {
                to: proposal.quorum.clone(),
                message: Message::Write(Write {
                    version: self.version,
                    promise: proposal.promise,
                    body: proposal.body.clone(),
                }),
            });
            self.writing.push_back(InFlight {
                proposal,
                committing: false,
            });
        }
        Ok(dispatches)
    }

    /// The quorum acknowledged (or failed) a commit.  On success the in-flight slot pops and the
    /// next proposal is nudged into flight.
    pub fn committed(
        &mut self,
        commit: &Commit,
        failure: Option<Promise>,
    ) -> Result<Vec<Dispatch>, Promise> {
        if commit.version != self.version {
            return Ok(Vec::new());
        }
        let position = match self
            .writing
            .iter()
            .position(|w| w.proposal.promise == commit.promise && w.committing)
        {
            Some(position) => position,
            None => {
                return Ok(Vec::new());
            }
        };
        if let Some(rejection) = failure {
            REJECTED.click();
            return Err(rejection);
        }
        let _ = self.writing.remove(position);
        Ok(self.nudge())
    }

    /// Surrender the queued proposals, dropping anything in flight.  Used when a government
    /// enacts and a fresh writer takes over.
    pub fn drain(self) -> VecDeque<Proposal> {
        self.proposals
            .into_iter()
            .filter(|p| !p.body.is_government())
            .collect()
    }

    /// Take over a proposal that survived a government boundary.
    pub fn requeue(&mut self, proposal: Proposal) {
        if self.next < proposal.promise {
            self.next = proposal.promise;
        }
        self.proposals.push_back(proposal);
    }

    /// True iff nothing is queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.proposals.is_empty() && self.writing.is_empty()
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn citizen(x: u8) -> CitizenID {
        CitizenID::new([x; 16])
    }

    fn quorum() -> Vec<CitizenID> {
        vec![citizen(0), citizen(1)]
    }

    fn write_of(dispatch: &Dispatch) -> &Write {
        match &dispatch.message {
            Message::Write(write) => write,
            _ => panic!("expected a write"),
        }
    }

    #[test]
    fn push_assigns_minor_promises() {
        let mut writer = Writer::new(Promise::new(4, 0));
        assert_eq!(Promise::new(4, 1), writer.push(quorum(), Body::Entry(vec![1])));
        assert_eq!(Promise::new(4, 2), writer.push(quorum(), Body::Entry(vec![2])));
    }

    #[test]
    fn nudge_moves_one_into_flight() {
        let mut writer = Writer::new(Promise::new(4, 0));
        writer.push(quorum(), Body::Entry(vec![1]));
        writer.push(quorum(), Body::Entry(vec![2]));
        let dispatches = writer.nudge();
        assert_eq!(1, dispatches.len());
        assert_eq!(Promise::new(4, 1), write_of(&dispatches[0]).promise);
        assert!(writer.nudge().is_empty());
    }

    #[test]
    fn write_ack_commits_and_piggybacks() {
        let mut writer = Writer::new(Promise::new(4, 0));
        writer.push(quorum(), Body::Entry(vec![1]));
        writer.push(quorum(), Body::Entry(vec![2]));
        let dispatches = writer.nudge();
        let write = write_of(&dispatches[0]).clone();
        let dispatches = writer.written(&write, None).expect("no rejection");
        assert_eq!(2, dispatches.len());
        match &dispatches[0].message {
            Message::Commit(commit) => assert_eq!(Promise::new(4, 1), commit.promise),
            _ => panic!("expected a commit"),
        }
        assert_eq!(Promise::new(4, 2), write_of(&dispatches[1]).promise);
    }

    #[test]
    fn governments_never_piggyback() {
        let mut writer = Writer::new(Promise::new(4, 0));
        writer.push(quorum(), Body::Entry(vec![1]));
        let map = writer.remap(Promise::new(5, 0));
        assert_eq!(
            vec![Remap {
                was: Promise::new(4, 1),
                now: Promise::new(5, 1),
            }],
            map,
        );
        writer.unshift(
            quorum(),
            Government {
                promise: Promise::new(5, 0),
                ..Government::default()
            },
        );
        let dispatches = writer.nudge();
        let write = write_of(&dispatches[0]).clone();
        assert_eq!(Promise::new(5, 0), write.promise);
        let dispatches = writer.written(&write, None).expect("no rejection");
        assert_eq!(1, dispatches.len());
        match &dispatches[0].message {
            Message::Commit(commit) => assert_eq!(Promise::new(5, 0), commit.promise),
            _ => panic!("expected a commit"),
        }
    }

    #[test]
    fn rejection_collapses() {
        let mut writer = Writer::new(Promise::new(4, 0));
        writer.push(quorum(), Body::Entry(vec![1]));
        let dispatches = writer.nudge();
        let write = write_of(&dispatches[0]).clone();
        assert_eq!(
            Err(Promise::new(5, 0)),
            writer.written(&write, Some(Promise::new(5, 0))),
        );
    }

    #[test]
    fn stale_versions_are_ignored() {
        let mut writer = Writer::new(Promise::new(4, 0));
        let write = Write {
            version: Promise::new(3, 0),
            promise: Promise::new(3, 1),
            body: Body::Entry(vec![1]),
        };
        assert_eq!(Ok(Vec::new()), writer.written(&write, Some(Promise::new(9, 0))));
    }

    #[test]
    fn commit_ack_pops_and_nudges() {
        let mut writer = Writer::new(Promise::new(4, 0));
        writer.push(quorum(), Body::Entry(vec![1]));
        writer.push(quorum(), Body::Entry(vec![2]));
        let write1 = write_of(&writer.nudge()[0]).clone();
        let dispatches = writer.written(&write1, None).expect("no rejection");
        let write2 = write_of(&dispatches[1]).clone();
        let commit1 = Commit {
            version: Promise::new(4, 0),
            promise: write1.promise,
        };
        assert!(writer.committed(&commit1, None).expect("no rejection").is_empty());
        let dispatches = writer.written(&write2, None).expect("no rejection");
        assert_eq!(1, dispatches.len());
        let commit2 = Commit {
            version: Promise::new(4, 0),
            promise: write2.promise,
        };
        writer.committed(&commit2, None).expect("no rejection");
        assert!(writer.is_idle());
    }

    #[test]
    fn drain_survives_governments() {
        let mut writer = Writer::new(Promise::new(4, 0));
        writer.push(quorum(), Body::Entry(vec![1]));
        writer.remap(Promise::new(5, 0));
        writer.unshift(
            quorum(),
            Government {
                promise: Promise::new(5, 0),
                ..Government::default()
            },
        );
        let survivors = writer.drain();
        assert_eq!(1, survivors.len());
        assert_eq!(Promise::new(5, 1), survivors[0].promise);
        assert_eq!(Some(Promise::new(4, 1)), survivors[0].was);
    }
}
