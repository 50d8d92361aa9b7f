//! The citizen owns everything:  the log, the scheduler, the two-phase strategies, the paxos
//! strategies, the shaper, and the reachability tables.  It dispatches incoming requests,
//! assembles outbound envelopes, and commits entries.  All operations run to completion; time
//! is injected; the transport is whoever drains the outbox.

use std::collections::HashMap;

use biometrics::{Collector, Counter};
use indicio::{clue, INFO, WARNING};

use parliament_pb::{
    Body, CitizenID, CitizenProperties, Committed, Envelope, Government, Immigration, LogEntry,
    Message, Naturalization, Ping, Promise, Receipt, Reject, Request, RepublicID, Response, Sync,
    Synchronize,
};

use super::acceptor::Acceptor;
use super::log::Log;
use super::pinger::Pinger;
use super::proposer::{Jitter, Proposer, Urge};
use super::recorder::{Recorded, Recorder};
use super::scheduler::{Scheduler, Timer};
use super::shaper::{Shape, Shaper};
use super::writer::Writer;
use super::{CitizenOptions, Dispatch, COLLECTOR, SYNC_COMMITS};

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static BOOTSTRAP: Counter = Counter::new("parliament.citizen.bootstrap");
static ENQUEUE: Counter = Counter::new("parliament.citizen.enqueue");
static IMMIGRATE: Counter = Counter::new("parliament.citizen.immigrate");
static COMMIT: Counter = Counter::new("parliament.citizen.commit");
static ENACT: Counter = Counter::new("parliament.citizen.enact");
static COLLAPSE: Counter = Counter::new("parliament.citizen.collapse");
static CAMPAIGN: Counter = Counter::new("parliament.citizen.campaign");
static NATURALIZE: Counter = Counter::new("parliament.citizen.naturalize");

/// Registers this module's biometrics.
pub fn register_biometrics(collector: &Collector) {
    collector.register_counter(&BOOTSTRAP);
    collector.register_counter(&ENQUEUE);
    collector.register_counter(&IMMIGRATE);
    collector.register_counter(&COMMIT);
    collector.register_counter(&ENACT);
    collector.register_counter(&COLLAPSE);
    collector.register_counter(&CAMPAIGN);
    collector.register_counter(&NATURALIZE);
}

////////////////////////////////////////////// Posted //////////////////////////////////////////////

/// The outcome of handing a proposal or immigration to a citizen.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Posted {
    /// The proposal was accepted.  Enqueued entries name the promise they will commit under,
    /// barring re-mapping by an intervening government; immigrations carry no promise until
    /// their government commits.
    Enqueued { promise: Option<Promise> },
    /// This citizen is not the leader; try the named one.
    NotLeader { leader: Option<CitizenID> },
    /// The cluster is between governments; retry once paxos recovery finishes.
    Collapsed,
    /// The request named a republic this citizen does not belong to.
    WrongRepublic,
    /// The immigrating citizen is already a member; wait for its exile before retrying.
    Duplicate { leader: Option<CitizenID> },
}

impl Posted {
    /// True iff the proposal was accepted.
    pub fn enqueued(&self) -> bool {
        matches!(self, Posted::Enqueued { .. })
    }

    /// The leader the caller should redirect to, if one is known.
    pub fn leader(&self) -> Option<CitizenID> {
        match self {
            Posted::NotLeader { leader } => *leader,
            Posted::Duplicate { leader } => *leader,
            _ => None,
        }
    }
}

///////////////////////////////////////////// Strategy /////////////////////////////////////////////

// The writer and proposer occupy one slot, as do the recorder and acceptor.  The citizen always
// calls through the slot; which variant answers depends on whether the government is healthy.

#[derive(Debug)]
enum WriteStrategy {
    Writer(Writer),
    Proposer(Proposer),
}

#[derive(Debug)]
enum RecordStrategy {
    Recorder(Recorder),
    Acceptor(Acceptor),
}

////////////////////////////////////////////// Citizen /////////////////////////////////////////////

/// One participant in a parliament cluster.
pub struct Citizen {
    id: CitizenID,
    cookie: u64,
    options: CitizenOptions,
    republic: Option<RepublicID>,
    government: Government,
    naturalized: Promise,
    log: Log,
    scheduler: Scheduler,
    writer: WriteStrategy,
    recorder: RecordStrategy,
    shaper: Shaper,
    pinger: Pinger,
    jitter: Jitter,
    outbox: Vec<Envelope>,
}

impl Citizen {
    /// A citizen that has not yet joined any republic.  `cookie` is the creation time and acts
    /// as a generation marker when the same id immigrates more than once.
    pub fn new(id: CitizenID, cookie: u64, options: CitizenOptions) -> Self {
        let mut seed = cookie;
        for byte in id.id.iter() {
            seed = seed.wrapping_mul(257).wrapping_add(*byte as u64);
        }
        Self {
            id,
            cookie,
            options,
            republic: None,
            government: Government::default(),
            naturalized: Promise::BOTTOM,
            log: Log::new(),
            scheduler: Scheduler::new(),
            writer: WriteStrategy::Writer(Writer::new(Promise::BOTTOM)),
            recorder: RecordStrategy::Recorder(Recorder::new(Promise::BOTTOM)),
            shaper: Shaper::relay(),
            pinger: Pinger::new(),
            jitter: Jitter::new(seed),
            outbox: Vec::new(),
        }
    }

    /// This citizen's id.
    pub fn id(&self) -> CitizenID {
        self.id
    }

    /// The republic this citizen belongs to, once it belongs to one.
    pub fn republic(&self) -> Option<RepublicID> {
        self.republic
    }

    /// The currently enacted government.
    pub fn government(&self) -> &Government {
        &self.government
    }

    /// The promise under which this citizen immigrated.
    pub fn naturalized(&self) -> Promise {
        self.naturalized
    }

    /// This citizen's log.
    pub fn log(&self) -> &Log {
        &self.log
    }

    /// The promise at the head of this citizen's log.
    pub fn head(&self) -> Promise {
        self.log.head().promise
    }

    /// True iff this citizen has abandoned two-phase commit and is running paxos recovery.
    pub fn collapsed(&self) -> bool {
        matches!(self.writer, WriteStrategy::Proposer(_))
    }

    /// The leader this citizen believes in.
    pub fn leader(&self) -> Option<CitizenID> {
        self.government.leader()
    }

    /// Drain the envelopes this citizen wants shipped.
    pub fn outbox(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outbox)
    }

    /// Install a dictator government containing only this citizen.  The first citizen of a
    /// republic bootstraps; everyone else immigrates.
    pub fn bootstrap(&mut self, now: u64, republic: RepublicID, properties: &str) {
        assert!(self.republic.is_none());
        BOOTSTRAP.click();
        self.republic = Some(republic);
        let promise = Promise::new(1, 0);
        self.naturalized = promise;
        let government = Government {
            promise,
            majority: vec![self.id],
            minority: Vec::new(),
            constituents: Vec::new(),
            properties: vec![CitizenProperties {
                citizen: self.id,
                properties: properties.to_owned(),
            }],
            immigrated: vec![Naturalization {
                citizen: self.id,
                promise,
            }],
            map: Vec::new(),
            immigrate: Some(Immigration {
                citizen: self.id,
                cookie: self.cookie,
                properties: properties.to_owned(),
            }),
            exile: None,
        };
        self.commit(
            now,
            LogEntry {
                promise,
                previous: Promise::BOTTOM,
                body: Body::Government(government),
            },
        );
    }

    /// Enqueue an entry for commit.  Only the leader of a healthy government accepts entries.
    /// Due timers fire first, so an enqueue that arrives after the collapse deadline observes
    /// the collapse.
    pub fn enqueue(&mut self, now: u64, republic: RepublicID, body: Vec<u8>) -> Posted {
        self.advance(now);
        if Some(republic) != self.republic {
            return Posted::WrongRepublic;
        }
        if Some(self.id) != self.government.leader() {
            return Posted::NotLeader {
                leader: self.government.leader(),
            };
        }
        let writer = match &mut self.writer {
            WriteStrategy::Writer(writer) => writer,
            WriteStrategy::Proposer(_) => {
                return Posted::Collapsed;
            }
        };
        ENQUEUE.click();
        let promise = writer.push(self.government.majority.clone(), Body::Entry(body));
        let dispatches = writer.nudge();
        self.send(dispatches);
        Posted::Enqueued {
            promise: Some(promise),
        }
    }

    /// Admit a new citizen.  The shaper decides when the admitting government goes out; the
    /// request is queued behind any government already in flight.
    pub fn immigrate(
        &mut self,
        now: u64,
        republic: RepublicID,
        immigration: Immigration,
    ) -> Posted {
        self.advance(now);
        if Some(republic) != self.republic {
            return Posted::WrongRepublic;
        }
        if Some(self.id) != self.government.leader() {
            return Posted::NotLeader {
                leader: self.government.leader(),
            };
        }
        if matches!(self.writer, WriteStrategy::Proposer(_)) {
            return Posted::Collapsed;
        }
        if self.government.is_citizen(immigration.citizen) {
            return Posted::Duplicate {
                leader: self.government.leader(),
            };
        }
        IMMIGRATE.click();
        let shape = self.shaper.immigrate(&self.government, immigration);
        if let Some(shape) = shape {
            self.propose(shape);
        }
        Posted::Enqueued { promise: None }
    }

    /// Drain every timer that has come due and dispatch it.
    pub fn advance(&mut self, now: u64) {
        for timer in self.scheduler.due(now) {
            self.event(now, timer);
        }
    }

    /// Dispatch one scheduler event.
    pub fn event(&mut self, now: u64, timer: Timer) {
        match timer {
            Timer::Synchronize { peer } => self.synchronize(peer),
            Timer::Collapse => self.collapse(now),
            Timer::Propose => self.repropose(now),
        }
    }

    /// Abandon two-phase commit and campaign for a fresh government.
    pub fn collapse(&mut self, now: u64) {
        if matches!(self.writer, WriteStrategy::Proposer(_)) {
            return;
        }
        if self.government.promise == Promise::BOTTOM {
            return;
        }
        COLLAPSE.click();
        clue!(COLLECTOR, WARNING, {
            collapse: {
                government: format!("{}", self.government.promise),
            },
        });
        let ballot = self.government.promise.next_government();
        self.campaign(now, ballot);
    }

    /// The server side of the protocol.  Returns None when the request must be silently
    /// dropped:  wrong republic, wrong generation, or a sync this citizen cannot yet join.
    pub fn request(&mut self, now: u64, req: &Request) -> Option<Response> {
        let sync = &req.sync;
        if let Some(republic) = self.republic {
            if sync.republic != republic {
                return None;
            }
        }
        if self.government.promise > Promise::BOTTOM {
            if let Some(expected) = self.government.naturalization(sync.from) {
                if sync.naturalized != expected {
                    return None;
                }
            }
        }
        if Some(sync.from) == self.government.leader()
            && Some(self.id) != self.government.leader()
            && self.government.is_majority(self.id)
        {
            self.scheduler
                .schedule(now + self.options.timeout, Timer::Collapse);
        }
        self.apply_sync(now, sync);
        if self.republic.is_none() {
            return None;
        }
        if let Some(minimum) = &sync.minimum {
            self.pinger.adopt(minimum.propagated);
        }
        let constituency = self.government.constituency(self.id);
        self.pinger.reduce(self.log.head().promise, &constituency);
        self.log.shift_trailer(self.pinger.propagated());
        let reply = self.serve(now, req);
        let response_sync = self.sync_segment(Some(sync.from), sync.committed);
        Some(Response {
            message: reply,
            sync: response_sync,
            minimum: Some(self.pinger.own().clone()),
            unreachable: self.pinger.escalated_peers(),
            receipts: self.receipts(now),
        })
    }

    /// The client side of the protocol.  `responses` holds one entry per addressee; a missing
    /// or None entry is a network failure.
    pub fn response(
        &mut self,
        now: u64,
        envelope: &Envelope,
        responses: &HashMap<CitizenID, Option<Response>>,
    ) {
        let mut newly_naturalized = Vec::new();
        let mut newly_unreachable = Vec::new();
        for peer in &envelope.to {
            let response = responses.get(peer).and_then(|r| r.as_ref());
            let response = match response {
                Some(response) => response,
                None => {
                    if *peer != self.id
                        && self.pinger.miss(now, *peer, self.options.timeout)
                    {
                        newly_unreachable.push(*peer);
                    }
                    continue;
                }
            };
            if *peer != self.id {
                newly_naturalized.extend(self.pinger.beat(
                    now,
                    *peer,
                    response,
                    &self.government,
                    self.id,
                ));
                for citizen in &response.unreachable {
                    if *citizen != self.id && self.pinger.hearsay(*citizen) {
                        newly_unreachable.push(*citizen);
                    }
                }
            }
            self.apply_sync(now, &response.sync);
            if let Some(minimum) = &response.minimum {
                self.pinger.adopt(minimum.propagated);
            }
        }
        let constituency = self.government.constituency(self.id);
        self.pinger.reduce(self.log.head().promise, &constituency);
        if Some(self.id) == self.government.leader() {
            self.pinger.adopt_reduced();
            self.log.shift_trailer(self.pinger.propagated());
        }
        for citizen in newly_naturalized {
            NATURALIZE.click();
            let shape = self.shaper.naturalized(&self.government, citizen);
            if let Some(shape) = shape {
                self.propose(shape);
            }
        }
        for citizen in newly_unreachable {
            clue!(COLLECTOR, INFO, {
                unreachable: {
                    citizen: citizen.human_readable(),
                },
            });
            let shape = self.shaper.unreachable(&self.government, citizen);
            if let Some(shape) = shape {
                self.propose(shape);
            }
        }
        let batch: Vec<Option<Message>> = envelope
            .to
            .iter()
            .map(|peer| {
                responses
                    .get(peer)
                    .and_then(|r| r.as_ref())
                    .map(|r| r.message.clone())
            })
            .collect();
        match &envelope.request.message {
            Message::Write(write) => {
                let failure = Self::failure(&batch);
                let result = match &mut self.writer {
                    WriteStrategy::Writer(writer) => writer.written(write, failure),
                    WriteStrategy::Proposer(_) => Ok(Vec::new()),
                };
                match result {
                    Ok(dispatches) => self.send(dispatches),
                    Err(rejection) => {
                        clue!(COLLECTOR, WARNING, {
                            rejected: {
                                write: format!("{}", write.promise),
                                by: format!("{rejection}"),
                            },
                        });
                        self.collapse(now);
                    }
                }
            }
            Message::Commit(commit) => {
                let failure = Self::failure(&batch);
                let result = match &mut self.writer {
                    WriteStrategy::Writer(writer) => writer.committed(commit, failure),
                    WriteStrategy::Proposer(_) => Ok(Vec::new()),
                };
                match result {
                    Ok(dispatches) => self.send(dispatches),
                    Err(_) => self.collapse(now),
                }
            }
            Message::Prepare(prepare) => {
                let head = self.log.head().promise;
                let urge = match &mut self.writer {
                    WriteStrategy::Proposer(proposer)
                        if proposer.version() == self.government.promise =>
                    {
                        proposer.promised(prepare, head, &batch)
                    }
                    _ => Urge::Nothing,
                };
                self.urged(now, urge);
            }
            Message::Accept(accept) => {
                let urge = match &mut self.writer {
                    WriteStrategy::Proposer(proposer)
                        if proposer.version() == self.government.promise =>
                    {
                        proposer.accepted(accept, &batch)
                    }
                    _ => Urge::Nothing,
                };
                self.urged(now, urge);
            }
            Message::Synchronize(_) | Message::Ping(_) => {
                let head = self.log.head().promise;
                let constituency = self.government.constituency(self.id);
                for peer in &envelope.to {
                    if !constituency.contains(peer) {
                        continue;
                    }
                    let caught_up = self
                        .pinger
                        .committed_of(*peer)
                        .map(|committed| committed >= head)
                        .unwrap_or(false);
                    let delay = if caught_up { self.options.ping } else { 0 };
                    self.scheduler
                        .schedule(now + delay, Timer::Synchronize { peer: *peer });
                }
            }
            _ => {}
        }
    }

    fn failure(batch: &[Option<Message>]) -> Option<Promise> {
        let mut failure: Option<Promise> = None;
        for message in batch {
            match message {
                Some(message) => {
                    if let Some(rejection) = message.rejection() {
                        if failure.map(|f| rejection > f).unwrap_or(true) {
                            failure = Some(rejection);
                        }
                    }
                }
                None => {
                    if failure.is_none() {
                        failure = Some(Promise::BOTTOM);
                    }
                }
            }
        }
        failure
    }

    fn urged(&mut self, now: u64, urge: Urge) {
        match urge {
            Urge::Dispatch(dispatches) => self.send(dispatches),
            Urge::Retry => {
                let delay = if Some(self.id) == self.government.leader() {
                    0
                } else {
                    self.jitter.backoff(self.options.timeout)
                };
                self.scheduler.schedule(now + delay, Timer::Propose);
            }
            Urge::Nothing => {}
        }
    }

    fn serve(&mut self, now: u64, req: &Request) -> Message {
        match &req.message {
            Message::Synchronize(_) | Message::Ping(_) => {
                let committed = req.sync.committed.unwrap_or(Promise::BOTTOM);
                let head = self.log.head().promise;
                if committed < head {
                    Message::Reject(Reject { promise: head })
                } else {
                    Message::Synchronize(Synchronize {})
                }
            }
            Message::Write(write) => {
                let recorded = match &mut self.recorder {
                    RecordStrategy::Recorder(recorder) => recorder.write(&self.log, write),
                    RecordStrategy::Acceptor(acceptor) => {
                        return Message::Reject(Reject {
                            promise: acceptor.promised(),
                        });
                    }
                };
                match recorded {
                    Recorded::Reply(message) => message,
                    Recorded::Commit { .. } => unreachable!("writes never commit directly"),
                    Recorded::Convert => self.convert(),
                }
            }
            Message::Commit(commit) => {
                let recorded = match &mut self.recorder {
                    RecordStrategy::Recorder(recorder) => recorder.commit(&self.log, commit),
                    RecordStrategy::Acceptor(acceptor) => {
                        return Message::Reject(Reject {
                            promise: acceptor.promised(),
                        });
                    }
                };
                match recorded {
                    Recorded::Reply(message) => message,
                    Recorded::Commit { entry, reply } => {
                        self.commit(now, entry);
                        reply
                    }
                    Recorded::Convert => self.convert(),
                }
            }
            Message::Prepare(prepare) => {
                let from = req.sync.from;
                let promise = prepare.promise;
                self.acceptor().prepare(from, promise)
            }
            Message::Accept(accept) => {
                let from = req.sync.from;
                let entry = accept.entry.clone();
                self.acceptor().accept(from, entry)
            }
            Message::Learn(learn) => {
                let promise = learn.promise;
                let learned = self.acceptor().learn(promise);
                match learned {
                    Some(entry)
                        if entry.previous == self.log.head().promise
                            || self.log.find(entry.promise).is_some() =>
                    {
                        self.commit(now, entry);
                        Message::Committed(Committed { promise })
                    }
                    _ => Message::Reject(Reject {
                        promise: self.log.head().promise,
                    }),
                }
            }
            _ => Message::Reject(Reject {
                promise: Promise::BOTTOM,
            }),
        }
    }

    fn convert(&mut self) -> Message {
        let promise = self.government.promise;
        self.recorder = RecordStrategy::Acceptor(Acceptor::new(promise));
        Message::Reject(Reject { promise })
    }

    fn acceptor(&mut self) -> &mut Acceptor {
        if let RecordStrategy::Recorder(_) = self.recorder {
            self.recorder = RecordStrategy::Acceptor(Acceptor::new(self.government.promise));
        }
        match &mut self.recorder {
            RecordStrategy::Acceptor(acceptor) => acceptor,
            RecordStrategy::Recorder(_) => unreachable!("recorder was just converted"),
        }
    }

    fn apply_sync(&mut self, now: u64, sync: &Sync) {
        for commit in &sync.commits {
            if self.log.at_genesis() {
                let government = match commit.government() {
                    Some(government) => government,
                    None => {
                        break;
                    }
                };
                let ours = government
                    .immigrate
                    .as_ref()
                    .map(|imm| imm.citizen == self.id && imm.cookie == self.cookie)
                    .unwrap_or(false);
                if !ours {
                    break;
                }
                NATURALIZE.click();
                self.republic = Some(sync.republic);
                self.naturalized = commit.promise;
                self.commit(now, commit.clone());
            } else {
                let head = self.log.head().promise;
                if commit.promise <= head {
                    if let Some(existing) = self.log.find(commit.promise) {
                        assert_eq!(existing, commit);
                    }
                    continue;
                }
                if commit.previous != head {
                    break;
                }
                self.commit(now, commit.clone());
            }
        }
    }

    fn commit(&mut self, now: u64, entry: LogEntry) {
        if !self.log.at_genesis() && entry.promise <= self.log.head().promise {
            if let Some(existing) = self.log.find(entry.promise) {
                assert_eq!(*existing, entry);
            }
            return;
        }
        COMMIT.click();
        clue!(COLLECTOR, INFO, {
            commit: {
                promise: format!("{}", entry.promise),
                government: entry.is_government(),
            },
        });
        let government = entry.government().cloned();
        self.log.push(entry);
        if let Some(government) = government {
            self.enact(now, government);
        }
    }

    /// A government entry committed.  Replace every derived structure with one bound to the new
    /// government and restart synchronization from scratch.
    fn enact(&mut self, now: u64, government: Government) {
        ENACT.click();
        clue!(COLLECTOR, INFO, {
            enact: {
                promise: format!("{}", government.promise),
                leader: government
                    .leader()
                    .map(|l| l.human_readable())
                    .unwrap_or_default(),
            },
        });
        let leader = Some(self.id) == government.leader();
        self.scheduler.clear();
        let old_writer = std::mem::replace(
            &mut self.writer,
            WriteStrategy::Writer(Writer::new(government.promise)),
        );
        if leader {
            if let WriteStrategy::Writer(old_writer) = old_writer {
                let survivors = old_writer.drain();
                if let WriteStrategy::Writer(writer) = &mut self.writer {
                    for mut proposal in survivors {
                        if proposal.promise.government == government.promise.government {
                            proposal.quorum = government.majority.clone();
                            writer.requeue(proposal);
                        }
                    }
                }
            }
        }
        self.recorder = RecordStrategy::Recorder(Recorder::new(government.promise));
        let old_shaper = std::mem::replace(&mut self.shaper, Shaper::relay());
        if leader {
            self.shaper = Shaper::planner(self.options.parliament_size, old_shaper.carry());
        }
        self.government = government;
        let constituency = self.government.constituency(self.id);
        self.pinger.reset(&self.government, &constituency);
        for peer in &constituency {
            if *peer != self.id {
                self.scheduler.schedule(now, Timer::Synchronize { peer: *peer });
            }
        }
        if !leader && self.government.is_majority(self.id) {
            self.scheduler
                .schedule(now + self.options.timeout, Timer::Collapse);
        }
        if leader {
            let dispatches = match &mut self.writer {
                WriteStrategy::Writer(writer) => writer.nudge(),
                WriteStrategy::Proposer(_) => Vec::new(),
            };
            self.send(dispatches);
            for citizen in self.pinger.escalated_peers() {
                let shape = self.shaper.unreachable(&self.government, citizen);
                if let Some(shape) = shape {
                    self.propose(shape);
                }
            }
            let shape = self.shaper.pending(&self.government);
            if let Some(shape) = shape {
                self.propose(shape);
            }
        }
    }

    /// Turn a shape into a government proposal and jump it to the front of the write queue.
    fn propose(&mut self, shape: Shape) {
        let boundary = self.government.promise.next_government();
        let writer = match &mut self.writer {
            WriteStrategy::Writer(writer) => writer,
            WriteStrategy::Proposer(_) => {
                return;
            }
        };
        let map = writer.remap(boundary);
        let mut properties = self.government.properties.clone();
        let mut immigrated = self.government.immigrated.clone();
        if let Some(immigration) = &shape.immigrate {
            properties.push(CitizenProperties {
                citizen: immigration.citizen,
                properties: immigration.properties.clone(),
            });
            immigrated.push(Naturalization {
                citizen: immigration.citizen,
                promise: boundary,
            });
        }
        if let Some(exilee) = shape.exile {
            properties.retain(|p| p.citizen != exilee);
            immigrated.retain(|n| n.citizen != exilee);
        }
        let government = Government {
            promise: boundary,
            majority: shape.majority,
            minority: shape.minority,
            constituents: shape.constituents,
            properties,
            immigrated,
            map,
            immigrate: shape.immigrate,
            exile: shape.exile,
        };
        writer.unshift(self.government.majority.clone(), government);
        let dispatches = writer.nudge();
        self.send(dispatches);
    }

    /// Start or restart a paxos campaign under `ballot`.
    fn campaign(&mut self, now: u64, ballot: Promise) {
        CAMPAIGN.click();
        let (majority, minority) = self.elect();
        let government = Government {
            promise: ballot,
            majority: majority.clone(),
            minority,
            constituents: self.government.constituents.clone(),
            properties: self.government.properties.clone(),
            immigrated: self.government.immigrated.clone(),
            map: Vec::new(),
            immigrate: None,
            exile: None,
        };
        let proposer = Proposer::new(self.government.promise, ballot, government, majority);
        let dispatches = proposer.prepare();
        self.writer = WriteStrategy::Proposer(proposer);
        // A watchdog in case the round's responses never come back.
        self.scheduler
            .schedule(now + self.options.timeout, Timer::Propose);
        self.send(dispatches);
    }

    /// Choose the majority for a recovery government:  this citizen first, then reachable
    /// members of the current parliament in deterministic order, relegating disappeared peers
    /// to the minority.  When too few reachable members exist, clear the disappearance map and
    /// take anyone.
    fn elect(&mut self) -> (Vec<CitizenID>, Vec<CitizenID>) {
        let parliament = self.government.parliament();
        let size = std::cmp::max(self.government.majority.len(), 1);
        let mut majority = vec![self.id];
        for peer in &parliament {
            if majority.len() == size {
                break;
            }
            if *peer != self.id && !self.pinger.is_disappeared(*peer) {
                majority.push(*peer);
            }
        }
        if majority.len() < size {
            self.pinger.clear_disappeared();
            for peer in &parliament {
                if majority.len() == size {
                    break;
                }
                if *peer != self.id && !majority.contains(peer) {
                    majority.push(*peer);
                }
            }
        }
        let minority = parliament
            .into_iter()
            .filter(|c| !majority.contains(c))
            .collect();
        (majority, minority)
    }

    fn repropose(&mut self, now: u64) {
        let ballot = match &self.writer {
            WriteStrategy::Proposer(proposer) => {
                if proposer.version() != self.government.promise {
                    return;
                }
                if proposer.rejection() >= proposer.ballot() {
                    proposer.rejection().next_government()
                } else {
                    proposer.ballot()
                }
            }
            WriteStrategy::Writer(_) => {
                return;
            }
        };
        self.campaign(now, ballot);
    }

    fn synchronize(&mut self, peer: CitizenID) {
        if peer == self.id {
            return;
        }
        let committed = self.pinger.committed_of(peer);
        let sync = self.sync_segment(Some(peer), committed);
        let message = if sync.commits.is_empty() {
            Message::Ping(Ping {})
        } else {
            Message::Synchronize(Synchronize {})
        };
        self.outbox.push(Envelope {
            to: vec![peer],
            from: self.id,
            request: Request { message, sync },
        });
    }

    fn send(&mut self, dispatches: Vec<Dispatch>) {
        for dispatch in dispatches {
            let sync = self.sync_segment(None, None);
            self.outbox.push(Envelope {
                to: dispatch.to,
                from: self.id,
                request: Request {
                    message: dispatch.message,
                    sync,
                },
            });
        }
    }

    fn sync_segment(&self, peer: Option<CitizenID>, committed: Option<Promise>) -> Sync {
        let commits = match peer {
            Some(peer) => self.assemble(peer, committed),
            None => Vec::new(),
        };
        Sync {
            republic: self.republic.unwrap_or(RepublicID::BOTTOM),
            from: self.id,
            naturalized: self.naturalized,
            minimum: Some(self.pinger.own().clone()),
            committed: Some(self.log.head().promise),
            commits,
        }
    }

    /// The commits to ship a peer.  A peer that has committed nothing receives its own
    /// immigration government first; anyone else receives the entries after its head, provided
    /// this log still chains onto it.
    fn assemble(&self, peer: CitizenID, committed: Option<Promise>) -> Vec<LogEntry> {
        let committed = committed.unwrap_or(Promise::BOTTOM);
        let mut commits = Vec::new();
        if committed == Promise::BOTTOM {
            let start = match self.government.naturalization(peer) {
                Some(start) => start,
                None => {
                    return Vec::new();
                }
            };
            for entry in self.log.tail(start) {
                commits.push(entry.clone());
                if commits.len() == SYNC_COMMITS {
                    break;
                }
            }
        } else {
            for entry in self.log.tail(committed) {
                if entry.promise == committed {
                    continue;
                }
                if commits.is_empty() && entry.previous != committed {
                    return Vec::new();
                }
                commits.push(entry.clone());
                if commits.len() == SYNC_COMMITS {
                    break;
                }
            }
        }
        commits
    }

    fn receipts(&self, now: u64) -> Vec<Receipt> {
        let head = self.log.head().promise;
        let mut receipts = vec![Receipt {
            citizen: self.id,
            committed: head,
            naturalized: self.government.promise > Promise::BOTTOM
                && head >= self.government.promise,
            when: now,
            reachable: true,
        }];
        receipts.extend(self.pinger.receipts());
        receipts
    }
}

impl std::fmt::Debug for Citizen {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        f.debug_struct("Citizen")
            .field("id", &self.id.human_readable())
            .field("government", &self.government.promise)
            .field("head", &self.log.head().promise)
            .field("collapsed", &self.collapsed())
            .finish()
    }
}
