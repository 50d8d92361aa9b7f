#![doc = include_str!("../README.md")]

use prototk_derive::Message as ProtoMessage;

use one_two_eight::{generate_id, generate_id_prototk};

use zerror_core::ErrorCore;

///////////////////////////////////////////// Constants ////////////////////////////////////////////

/// The default number of seats in a parliament.  A cluster with fewer citizens than this seats
/// every citizen it can while keeping the parliament odd.
pub const DEFAULT_PARLIAMENT_SIZE: usize = 5;
/// The smallest permissible parliament.
pub const MIN_PARLIAMENT_SIZE: usize = 1;
/// The largest permissible parliament.
pub const MAX_PARLIAMENT_SIZE: usize = 63;

//////////////////////////////////////////////// IDs ///////////////////////////////////////////////

generate_id!(RepublicID, "republic:");
generate_id_prototk!(RepublicID);

generate_id!(CitizenID, "citizen:");
generate_id_prototk!(CitizenID);

/////////////////////////////////////////////// Error //////////////////////////////////////////////

#[derive(ProtoMessage, zerror_derive::Z)]
pub enum Error {
    #[prototk(638976, message)]
    Success {
        #[prototk(1, message)]
        core: ErrorCore,
    },
    #[prototk(638977, message)]
    SerializationError {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, message)]
        what: prototk::Error,
    },
}

impl Default for Error {
    fn default() -> Self {
        Self::Success {
            core: ErrorCore::default(),
        }
    }
}

impl From<prototk::Error> for Error {
    fn from(what: prototk::Error) -> Self {
        Self::SerializationError {
            core: ErrorCore::default(),
            what,
        }
    }
}

////////////////////////////////////////////// Promise /////////////////////////////////////////////

/// Promises are two-part versions `government/round`, compared lexicographically.  Every log
/// position in the cluster is addressed by exactly one promise.  A promise with round zero marks a
/// government boundary; all other promises address ordinary entries committed under the government
/// named by their major.
///
/// Promises only ever increase.  `next_government` bumps the major and resets the round;
/// `next_round` bumps the round.  The overall protocol guarantees that no two citizens commit
/// different entries under the same promise.
#[derive(Clone, Copy, Debug, Eq, Hash, ProtoMessage, PartialEq, PartialOrd, Ord)]
pub struct Promise {
    #[prototk(1, uint64)]
    pub government: u64,
    #[prototk(2, uint64)]
    pub round: u64,
}

impl Promise {
    /// The smallest possible promise.  A citizen that has committed nothing is at `0/0`.
    pub const BOTTOM: Promise = Promise {
        government: 0,
        round: 0,
    };

    /// The largest possible promise.
    pub const TOP: Promise = Promise {
        government: u64::MAX,
        round: u64::MAX,
    };

    /// A promise at `government/round`.
    pub fn new(government: u64, round: u64) -> Self {
        Self { government, round }
    }

    /// The boundary promise of the government that succeeds this promise's government.
    pub fn next_government(&self) -> Promise {
        Promise {
            government: self.government + 1,
            round: 0,
        }
    }

    /// The promise immediately following this one within the same government.
    pub fn next_round(&self) -> Promise {
        Promise {
            government: self.government,
            round: self.round + 1,
        }
    }

    /// True iff this promise addresses a government boundary.
    pub fn is_boundary(&self) -> bool {
        self.round == 0
    }
}

impl Default for Promise {
    fn default() -> Self {
        Self::BOTTOM
    }
}

impl std::fmt::Display for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(f, "{}/{}", self.government, self.round)
    }
}

/////////////////////////////////////////////// Body ///////////////////////////////////////////////

/// The body of a log entry.  Governments carry the complete membership snapshot they install;
/// ordinary entries carry an opaque payload owned by the application.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub enum Body {
    #[prototk(1, message)]
    #[default]
    Nop,
    #[prototk(2, message)]
    Government(Government),
    #[prototk(3, bytes)]
    Entry(Vec<u8>),
}

impl Body {
    /// True iff this body installs a government.
    pub fn is_government(&self) -> bool {
        matches!(self, Body::Government(_))
    }
}

///////////////////////////////////////////// LogEntry /////////////////////////////////////////////

/// One position in the atomic log.  `previous` names the promise of the entry immediately
/// preceding this one in the canonical sequence, so a log is a chain that can be checked one link
/// at a time.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct LogEntry {
    #[prototk(1, message)]
    pub promise: Promise,
    #[prototk(2, message)]
    pub previous: Promise,
    #[prototk(3, message)]
    pub body: Body,
}

impl LogEntry {
    /// True iff this entry installs a government.
    pub fn is_government(&self) -> bool {
        self.body.is_government()
    }

    /// The government this entry installs, if it installs one.
    pub fn government(&self) -> Option<&Government> {
        match &self.body {
            Body::Government(government) => Some(government),
            _ => None,
        }
    }
}

//////////////////////////////////////// CitizenProperties /////////////////////////////////////////

/// The application-supplied properties of one citizen.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct CitizenProperties {
    #[prototk(1, message)]
    pub citizen: CitizenID,
    #[prototk(2, string)]
    pub properties: String,
}

///////////////////////////////////////// Naturalization ///////////////////////////////////////////

/// The record of one citizen's admission.  The promise is the boundary of the government under
/// which the citizen immigrated and acts as a generation cookie:  a citizen that leaves and
/// returns immigrates again under a new promise.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Naturalization {
    #[prototk(1, message)]
    pub citizen: CitizenID,
    #[prototk(2, message)]
    pub promise: Promise,
}

/////////////////////////////////////////////// Remap //////////////////////////////////////////////

/// A government supersedes all queued proposals; this records where one such proposal landed.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Remap {
    #[prototk(1, message)]
    pub was: Promise,
    #[prototk(2, message)]
    pub now: Promise,
}

//////////////////////////////////////////// Immigration ///////////////////////////////////////////

/// A request to admit a new citizen.  The cookie is the citizen's creation time and
/// disambiguates a returning citizen from its earlier incarnation.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Immigration {
    #[prototk(1, message)]
    pub citizen: CitizenID,
    #[prototk(2, uint64)]
    pub cookie: u64,
    #[prototk(3, string)]
    pub properties: String,
}

//////////////////////////////////////////// Government ////////////////////////////////////////////

/// An immutable membership snapshot, installed by a committed log entry at a boundary promise.
/// The majority votes and contains the leader at index zero; the minority votes but does not
/// write; constituents replicate without voting.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Government {
    #[prototk(1, message)]
    pub promise: Promise,
    #[prototk(2, message)]
    pub majority: Vec<CitizenID>,
    #[prototk(3, message)]
    pub minority: Vec<CitizenID>,
    #[prototk(4, message)]
    pub constituents: Vec<CitizenID>,
    #[prototk(5, message)]
    pub properties: Vec<CitizenProperties>,
    #[prototk(6, message)]
    pub immigrated: Vec<Naturalization>,
    #[prototk(7, message)]
    pub map: Vec<Remap>,
    #[prototk(8, message)]
    pub immigrate: Option<Immigration>,
    #[prototk(9, message)]
    pub exile: Option<CitizenID>,
}

impl Government {
    /// The leader of this government, if it has one.
    pub fn leader(&self) -> Option<CitizenID> {
        self.majority.first().copied()
    }

    /// Majority and minority together:  the voting members.
    pub fn parliament(&self) -> Vec<CitizenID> {
        let mut parliament = self.majority.clone();
        parliament.extend(self.minority.iter().copied());
        parliament
    }

    /// Every citizen of the republic under this government.
    pub fn citizens(&self) -> Vec<CitizenID> {
        let mut citizens = self.parliament();
        citizens.extend(self.constituents.iter().copied());
        citizens
    }

    /// Is the provided citizen a member of this government in any role.
    pub fn is_citizen(&self, citizen: CitizenID) -> bool {
        self.citizens().iter().any(|c| c == &citizen)
    }

    /// Is the provided citizen a voting member.
    pub fn is_parliament(&self, citizen: CitizenID) -> bool {
        self.parliament().iter().any(|c| c == &citizen)
    }

    /// Is the provided citizen in the majority.
    pub fn is_majority(&self, citizen: CitizenID) -> bool {
        self.majority.iter().any(|c| c == &citizen)
    }

    /// The promise under which the provided citizen immigrated.
    pub fn naturalization(&self, citizen: CitizenID) -> Option<Promise> {
        self.immigrated
            .iter()
            .find(|n| n.citizen == citizen)
            .map(|n| n.promise)
    }

    /// The citizen that immigrated under the provided boundary promise.
    pub fn naturalized_under(&self, promise: Promise) -> Option<CitizenID> {
        self.immigrated
            .iter()
            .find(|n| n.promise == promise)
            .map(|n| n.citizen)
    }

    /// The application-supplied properties of the provided citizen.
    pub fn properties(&self, citizen: CitizenID) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.citizen == citizen)
            .map(|p| p.properties.as_str())
    }

    /// The set of peers the provided citizen synchronizes.  The leader fans out to the rest of
    /// the majority, majority members fan out to the minority, and minority members fan out to
    /// the constituents.  When a tier is empty its responsibility cascades to the next tier down,
    /// so a one-member majority synchronizes its constituents directly.
    pub fn constituency(&self, citizen: CitizenID) -> Vec<CitizenID> {
        let leader = match self.leader() {
            Some(leader) => leader,
            None => {
                return Vec::new();
            }
        };
        let followers = &self.majority[1..];
        if citizen == leader {
            let mut constituency = followers.to_vec();
            if followers.is_empty() {
                if !self.minority.is_empty() {
                    constituency = self.minority.clone();
                } else {
                    constituency = self.constituents.clone();
                }
            }
            return constituency;
        }
        if let Some(index) = followers.iter().position(|c| c == &citizen) {
            let charges = if !self.minority.is_empty() {
                &self.minority
            } else {
                &self.constituents
            };
            return round_robin(charges, index, followers.len());
        }
        if let Some(index) = self.minority.iter().position(|c| c == &citizen) {
            if self.majority.len() > 1 {
                return round_robin(&self.constituents, index, self.minority.len());
            }
        }
        Vec::new()
    }
}

fn round_robin(charges: &[CitizenID], index: usize, syncers: usize) -> Vec<CitizenID> {
    charges
        .iter()
        .enumerate()
        .filter(|(i, _)| i % syncers == index)
        .map(|(_, c)| *c)
        .collect()
}

/// The number of voting seats a cluster of `citizens` fills:  the largest odd number of seats
/// that is at most `parliament_size` and at most the number of citizens.
pub fn parliament_target(citizens: usize, parliament_size: usize) -> usize {
    let mut target = std::cmp::min(citizens, parliament_size);
    if target % 2 == 0 {
        target = target.saturating_sub(1);
    }
    std::cmp::max(target, 1)
}

/// The size of the majority for a parliament of the provided size.
pub fn majority_size(parliament: usize) -> usize {
    parliament / 2 + 1
}

////////////////////////////////////////////// Minimum /////////////////////////////////////////////

/// The truncation state one citizen advertises.  `propagated` is the floor this citizen enforces
/// on its own trailer; `version` is the government under which `reduced` was computed; `reduced`
/// is the floor this citizen's subtree could tolerate, or `0/0` when a constituent has yet to
/// report under the current government.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Minimum {
    #[prototk(1, message)]
    pub version: Promise,
    #[prototk(2, message)]
    pub propagated: Promise,
    #[prototk(3, message)]
    pub reduced: Promise,
}

////////////////////////////////////////////// Receipt /////////////////////////////////////////////

/// One citizen's view of one peer, relayed upward on every response so that evidence of progress
/// and reachability reaches the leader across multi-tier constituencies.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Receipt {
    #[prototk(1, message)]
    pub citizen: CitizenID,
    #[prototk(2, message)]
    pub committed: Promise,
    #[prototk(3, Bool)]
    pub naturalized: bool,
    #[prototk(4, uint64)]
    pub when: u64,
    #[prototk(5, Bool)]
    pub reachable: bool,
}

////////////////////////////////////////////// Messages ////////////////////////////////////////////

/// Synchronize requests carry no payload of their own; the sync segment does the work.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Synchronize {}

/// Ping requests are synchronize requests sent when the peer is fully caught up.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Ping {}

/// The first phase of two-phase commit:  the leader asks its quorum to provisionally record an
/// entry.  `version` names the government the leader believes is enacted.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Write {
    #[prototk(1, message)]
    pub version: Promise,
    #[prototk(2, message)]
    pub promise: Promise,
    #[prototk(3, message)]
    pub body: Body,
}

/// The second phase of two-phase commit:  finalize a provisionally recorded entry.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Commit {
    #[prototk(1, message)]
    pub version: Promise,
    #[prototk(2, message)]
    pub promise: Promise,
}

/// Paxos phase one:  rally support for a fresh government ballot.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Prepare {
    #[prototk(1, message)]
    pub promise: Promise,
}

/// Paxos phase two:  assign a government entry under a rallied ballot.  The ballot is the
/// entry's own promise.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Accept {
    #[prototk(1, message)]
    pub entry: LogEntry,
}

/// Paxos phase three:  the ballot won; commit the accepted entry.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Learn {
    #[prototk(1, message)]
    pub promise: Promise,
}

/// A recorder provisionally recorded a write.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Written {
    #[prototk(1, message)]
    pub promise: Promise,
}

/// A recorder finalized a commit.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Committed {
    #[prototk(1, message)]
    pub promise: Promise,
}

/// An acceptor supports a ballot.  `accepted` relays the highest entry the acceptor previously
/// accepted, which the proposer is obliged to re-propose.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Promised {
    #[prototk(1, message)]
    pub promise: Promise,
    #[prototk(2, message)]
    pub accepted: Option<LogEntry>,
}

/// An acceptor accepted an entry under a ballot.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Accepted {
    #[prototk(1, message)]
    pub promise: Promise,
}

/// The request conflicts with a higher promise at the responder.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Reject {
    #[prototk(1, message)]
    pub promise: Promise,
}

/// The synthetic response standing in for a peer that could not be reached.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Unreachable {}

////////////////////////////////////////////// Message /////////////////////////////////////////////

/// Every message a citizen sends or returns.
#[derive(Clone, Debug, Eq, ProtoMessage, PartialEq)]
pub enum Message {
    #[prototk(1, message)]
    Synchronize(Synchronize),
    #[prototk(2, message)]
    Ping(Ping),
    #[prototk(3, message)]
    Write(Write),
    #[prototk(4, message)]
    Commit(Commit),
    #[prototk(5, message)]
    Prepare(Prepare),
    #[prototk(6, message)]
    Accept(Accept),
    #[prototk(7, message)]
    Learn(Learn),
    #[prototk(8, message)]
    Written(Written),
    #[prototk(9, message)]
    Committed(Committed),
    #[prototk(10, message)]
    Promised(Promised),
    #[prototk(11, message)]
    Accepted(Accepted),
    #[prototk(12, message)]
    Reject(Reject),
    #[prototk(13, message)]
    Unreachable(Unreachable),
}

impl Message {
    /// A short name for this message, for diagnostics.
    pub fn method(&self) -> &'static str {
        match self {
            Message::Synchronize(_) => "synchronize",
            Message::Ping(_) => "ping",
            Message::Write(_) => "write",
            Message::Commit(_) => "commit",
            Message::Prepare(_) => "prepare",
            Message::Accept(_) => "accept",
            Message::Learn(_) => "learn",
            Message::Written(_) => "written",
            Message::Committed(_) => "committed",
            Message::Promised(_) => "promised",
            Message::Accepted(_) => "accepted",
            Message::Reject(_) => "reject",
            Message::Unreachable(_) => "unreachable",
        }
    }

    /// The rejection promise, when this message is a rejection.
    pub fn rejection(&self) -> Option<Promise> {
        match self {
            Message::Reject(reject) => Some(reject.promise),
            _ => None,
        }
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::Unreachable(Unreachable {})
    }
}

//////////////////////////////////////////////// Sync //////////////////////////////////////////////

/// The synchronization segment that rides every request.  `naturalized` is the promise under
/// which the sender immigrated; `committed` is the sender's head, or absent when the sender has
/// committed nothing; `commits` carries entries the receiver is believed to be missing, in chain
/// order.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Sync {
    #[prototk(1, message)]
    pub republic: RepublicID,
    #[prototk(2, message)]
    pub from: CitizenID,
    #[prototk(3, message)]
    pub naturalized: Promise,
    #[prototk(4, message)]
    pub minimum: Option<Minimum>,
    #[prototk(5, message)]
    pub committed: Option<Promise>,
    #[prototk(6, message)]
    pub commits: Vec<LogEntry>,
}

////////////////////////////////////////////// Request /////////////////////////////////////////////

/// A request shipped to a peer:  the message plus the sender's sync segment.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Request {
    #[prototk(1, message)]
    pub message: Message,
    #[prototk(2, message)]
    pub sync: Sync,
}

///////////////////////////////////////////// Response /////////////////////////////////////////////

/// A response returned by a peer.  `minimum` is the responder's own truncation triple;
/// `unreachable` lists peers the responder has escalated; `receipts` is the responder's
/// index-by-peer progress table.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Response {
    #[prototk(1, message)]
    pub message: Message,
    #[prototk(2, message)]
    pub sync: Sync,
    #[prototk(3, message)]
    pub minimum: Option<Minimum>,
    #[prototk(4, message)]
    pub unreachable: Vec<CitizenID>,
    #[prototk(5, message)]
    pub receipts: Vec<Receipt>,
}

///////////////////////////////////////////// Envelope /////////////////////////////////////////////

/// An outbound request addressed to one or more peers.  The transport ships the request to every
/// peer in `to` and hands the sender one response, or None, per peer.
#[derive(Clone, Debug, Default, Eq, ProtoMessage, PartialEq)]
pub struct Envelope {
    #[prototk(1, message)]
    pub to: Vec<CitizenID>,
    #[prototk(2, message)]
    pub from: CitizenID,
    #[prototk(3, message)]
    pub request: Request,
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////

#[cfg(test)]
mod promises {
    use super::*;

    #[test]
    fn ordering_is_lexicographic() {
        assert!(Promise::new(1, 0) < Promise::new(1, 1));
        assert!(Promise::new(1, 9) < Promise::new(2, 0));
        assert!(Promise::new(2, 0) < Promise::new(2, 1));
        assert!(Promise::BOTTOM < Promise::new(0, 1));
        assert!(Promise::new(u64::MAX, 0) < Promise::TOP);
    }

    #[test]
    fn increments() {
        assert_eq!(Promise::new(2, 0), Promise::new(1, 7).next_government());
        assert_eq!(Promise::new(1, 8), Promise::new(1, 7).next_round());
        assert_eq!(Promise::new(1, 0), Promise::BOTTOM.next_government());
    }

    #[test]
    fn boundaries() {
        assert!(Promise::new(3, 0).is_boundary());
        assert!(!Promise::new(3, 1).is_boundary());
        assert!(Promise::BOTTOM.is_boundary());
    }

    #[test]
    fn display() {
        assert_eq!("3/14", format!("{}", Promise::new(3, 14)));
        assert_eq!("0/0", format!("{}", Promise::BOTTOM));
    }
}
