//! The reachability and truncation-minimum tracker.  Every response updates a per-peer receipt;
//! peers that stop answering are marked disappeared and escalate to unreachable after the
//! timeout.  The same tables drive the cluster truncation minimum:  each citizen reduces over
//! its constituents' reported floors, the leader adopts the cluster-wide floor as its
//! propagated minimum, and followers inherit the propagated floor from upstream syncs.

use std::collections::{BTreeSet, HashMap};

use biometrics::{Collector, Counter};

use parliament_pb::{CitizenID, Government, Minimum, Promise, Receipt, Response};

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static BEAT: Counter = Counter::new("parliament.pinger.beat");
static MISS: Counter = Counter::new("parliament.pinger.miss");
static ESCALATE: Counter = Counter::new("parliament.pinger.escalate");

/// Registers this module's biometrics.
pub fn register_biometrics(collector: &Collector) {
    collector.register_counter(&BEAT);
    collector.register_counter(&MISS);
    collector.register_counter(&ESCALATE);
}

////////////////////////////////////////////// Pinger //////////////////////////////////////////////

/// The per-citizen tables:  receipts indexed by peer, reported minimums indexed by peer, and
/// the first-failure times of peers that have gone quiet.
#[derive(Debug, Default)]
pub struct Pinger {
    receipts: HashMap<CitizenID, Receipt>,
    minimums: HashMap<CitizenID, Minimum>,
    disappeared: HashMap<CitizenID, u64>,
    escalated: BTreeSet<CitizenID>,
    own: Minimum,
}

impl Pinger {
    /// A pinger with no evidence.
    pub fn new() -> Self {
        Self::default()
    }

    /// A government enacted.  Keep evidence only for the citizens this node now synchronizes,
    /// and drop disappearance for parliament members:  paxos may have succeeded despite stale
    /// disappearance, and the collapse watchdog re-detects a dead parliament anyway.  Retained
    /// receipts lose their naturalized flag; peers must re-prove themselves under the new
    /// government.
    pub fn reset(&mut self, government: &Government, constituency: &[CitizenID]) {
        self.receipts.retain(|c, _| constituency.contains(c));
        for receipt in self.receipts.values_mut() {
            receipt.naturalized = false;
        }
        self.minimums.retain(|c, _| constituency.contains(c));
        for member in government.parliament() {
            self.disappeared.remove(&member);
            self.escalated.remove(&member);
        }
        self.own.version = government.promise;
        self.own.reduced = Promise::BOTTOM;
    }

    /// A peer answered.  Update its receipt, adopt its reported minimum, and merge the receipts
    /// it relayed.  Returns the citizens newly observed to have caught up to the current
    /// government.
    pub fn beat(
        &mut self,
        now: u64,
        peer: CitizenID,
        response: &Response,
        government: &Government,
        myself: CitizenID,
    ) -> Vec<CitizenID> {
        BEAT.click();
        self.disappeared.remove(&peer);
        self.escalated.remove(&peer);
        let mut newly = Vec::new();
        let committed = response.sync.committed.unwrap_or(Promise::BOTTOM);
        let naturalized =
            government.promise > Promise::BOTTOM && committed >= government.promise;
        if naturalized
            && self
                .receipts
                .get(&peer)
                .map(|r| !r.naturalized)
                .unwrap_or(true)
        {
            newly.push(peer);
        }
        self.receipts.insert(
            peer,
            Receipt {
                citizen: peer,
                committed,
                naturalized,
                when: now,
                reachable: true,
            },
        );
        if let Some(minimum) = &response.minimum {
            self.minimums.insert(peer, minimum.clone());
        }
        for hearsay in &response.receipts {
            if hearsay.citizen == peer || hearsay.citizen == myself {
                continue;
            }
            let fresher = self
                .receipts
                .get(&hearsay.citizen)
                .map(|r| hearsay.when > r.when)
                .unwrap_or(true);
            if !fresher {
                continue;
            }
            let naturalized = government.promise > Promise::BOTTOM
                && hearsay.committed >= government.promise;
            if naturalized
                && self
                    .receipts
                    .get(&hearsay.citizen)
                    .map(|r| !r.naturalized)
                    .unwrap_or(true)
            {
                newly.push(hearsay.citizen);
            }
            self.receipts.insert(
                hearsay.citizen,
                Receipt {
                    naturalized,
                    ..hearsay.clone()
                },
            );
        }
        newly
    }

    /// A peer failed to answer.  Returns true when this miss escalates the peer from
    /// disappeared to unreachable.
    pub fn miss(&mut self, now: u64, peer: CitizenID, timeout: u64) -> bool {
        MISS.click();
        let when = *self.disappeared.entry(peer).or_insert(now);
        if let Some(receipt) = self.receipts.get_mut(&peer) {
            receipt.reachable = false;
        }
        if now.saturating_sub(when) >= timeout && self.escalated.insert(peer) {
            ESCALATE.click();
            true
        } else {
            false
        }
    }

    /// A downstream node reported the peer unreachable.  Returns true when the report is news.
    pub fn hearsay(&mut self, peer: CitizenID) -> bool {
        self.escalated.insert(peer)
    }

    /// The peers currently escalated to unreachable.
    pub fn escalated_peers(&self) -> Vec<CitizenID> {
        self.escalated.iter().copied().collect()
    }

    /// Is the peer in the disappeared table.
    pub fn is_disappeared(&self, peer: CitizenID) -> bool {
        self.disappeared.contains_key(&peer)
    }

    /// Forget every disappearance.  Desperation mode:  a collapsed citizen that cannot fill a
    /// majority from reachable peers starts over.
    pub fn clear_disappeared(&mut self) {
        self.disappeared.clear();
        self.escalated.clear();
    }

    /// The last committed promise reported by the peer, if any.
    pub fn committed_of(&self, peer: CitizenID) -> Option<Promise> {
        self.receipts.get(&peer).map(|r| r.committed)
    }

    /// The receipt table, for relaying upward.
    pub fn receipts(&self) -> Vec<Receipt> {
        let mut receipts: Vec<Receipt> = self.receipts.values().cloned().collect();
        receipts.sort_by_key(|r| r.citizen);
        receipts
    }

    /// Recompute the floor this node's subtree can reduce to:  the minimum of this node's own
    /// head and every constituent's reported floor, provided every constituent has reported
    /// under the current government.  Otherwise `0/0`, which blocks truncation.
    pub fn reduce(&mut self, head: Promise, constituency: &[CitizenID]) {
        let mut floor = head;
        for peer in constituency {
            match self.minimums.get(peer) {
                Some(minimum)
                    if minimum.version == self.own.version
                        && minimum.reduced > Promise::BOTTOM =>
                {
                    if minimum.reduced < floor {
                        floor = minimum.reduced;
                    }
                }
                _ => {
                    self.own.reduced = Promise::BOTTOM;
                    return;
                }
            }
        }
        self.own.reduced = floor;
    }

    /// Raise the propagated floor.  The floor never falls.
    pub fn adopt(&mut self, propagated: Promise) {
        if propagated > self.own.propagated {
            self.own.propagated = propagated;
        }
    }

    /// The leader adopts its own reduction as the cluster floor.
    pub fn adopt_reduced(&mut self) {
        if self.own.reduced > Promise::BOTTOM {
            let reduced = self.own.reduced;
            self.adopt(reduced);
        }
    }

    /// This node's own truncation triple.
    pub fn own(&self) -> &Minimum {
        &self.own
    }

    /// The propagated floor this node enforces on its trailer.
    pub fn propagated(&self) -> Promise {
        self.own.propagated
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use parliament_pb::Sync;

    use super::*;

    fn citizen(x: u8) -> CitizenID {
        CitizenID::new([x; 16])
    }

    fn government() -> Government {
        Government {
            promise: Promise::new(4, 0),
            majority: vec![citizen(0), citizen(1)],
            minority: vec![citizen(2)],
            ..Government::default()
        }
    }

    fn response(committed: Promise, minimum: Option<Minimum>) -> Response {
        Response {
            sync: Sync {
                committed: Some(committed),
                ..Sync::default()
            },
            minimum,
            ..Response::default()
        }
    }

    #[test]
    fn beat_records_naturalization_once() {
        let mut pinger = Pinger::new();
        pinger.reset(&government(), &[citizen(1)]);
        let newly = pinger.beat(
            1,
            citizen(1),
            &response(Promise::new(4, 0), None),
            &government(),
            citizen(0),
        );
        assert_eq!(vec![citizen(1)], newly);
        let newly = pinger.beat(
            2,
            citizen(1),
            &response(Promise::new(4, 1), None),
            &government(),
            citizen(0),
        );
        assert!(newly.is_empty());
    }

    #[test]
    fn miss_escalates_after_timeout() {
        let mut pinger = Pinger::new();
        assert!(!pinger.miss(10, citizen(1), 5));
        assert!(!pinger.miss(12, citizen(1), 5));
        assert!(pinger.miss(15, citizen(1), 5));
        assert!(!pinger.miss(16, citizen(1), 5));
        assert_eq!(vec![citizen(1)], pinger.escalated_peers());
    }

    #[test]
    fn beat_clears_disappearance() {
        let mut pinger = Pinger::new();
        pinger.miss(10, citizen(1), 5);
        pinger.miss(15, citizen(1), 5);
        pinger.beat(
            16,
            citizen(1),
            &response(Promise::new(4, 0), None),
            &government(),
            citizen(0),
        );
        assert!(!pinger.is_disappeared(citizen(1)));
        assert!(pinger.escalated_peers().is_empty());
    }

    #[test]
    fn reduce_requires_every_constituent() {
        let mut pinger = Pinger::new();
        pinger.reset(&government(), &[citizen(1), citizen(2)]);
        let head = Promise::new(4, 3);
        pinger.reduce(head, &[citizen(1), citizen(2)]);
        assert_eq!(Promise::BOTTOM, pinger.own().reduced);
        let minimum = Minimum {
            version: Promise::new(4, 0),
            propagated: Promise::BOTTOM,
            reduced: Promise::new(4, 1),
        };
        pinger.beat(
            1,
            citizen(1),
            &response(Promise::new(4, 1), Some(minimum.clone())),
            &government(),
            citizen(0),
        );
        pinger.reduce(head, &[citizen(1), citizen(2)]);
        assert_eq!(Promise::BOTTOM, pinger.own().reduced);
        pinger.beat(
            1,
            citizen(2),
            &response(Promise::new(4, 2), Some(Minimum {
                version: Promise::new(4, 0),
                propagated: Promise::BOTTOM,
                reduced: Promise::new(4, 2),
            })),
            &government(),
            citizen(0),
        );
        pinger.reduce(head, &[citizen(1), citizen(2)]);
        assert_eq!(Promise::new(4, 1), pinger.own().reduced);
    }

    #[test]
    fn stale_versions_block_reduction() {
        let mut pinger = Pinger::new();
        pinger.reset(&government(), &[citizen(1)]);
        let minimum = Minimum {
            version: Promise::new(3, 0),
            propagated: Promise::BOTTOM,
            reduced: Promise::new(3, 1),
        };
        pinger.beat(
            1,
            citizen(1),
            &response(Promise::new(4, 0), Some(minimum)),
            &government(),
            citizen(0),
        );
        pinger.reduce(Promise::new(4, 1), &[citizen(1)]);
        assert_eq!(Promise::BOTTOM, pinger.own().reduced);
    }

    #[test]
    fn propagated_never_falls() {
        let mut pinger = Pinger::new();
        pinger.adopt(Promise::new(3, 0));
        pinger.adopt(Promise::new(2, 0));
        assert_eq!(Promise::new(3, 0), pinger.propagated());
    }

    #[test]
    fn hearsay_receipts_merge_by_freshness() {
        let mut pinger = Pinger::new();
        pinger.reset(&government(), &[citizen(1)]);
        let mut relayed = response(Promise::new(4, 0), None);
        relayed.receipts = vec![Receipt {
            citizen: citizen(2),
            committed: Promise::new(4, 0),
            naturalized: true,
            when: 5,
            reachable: true,
        }];
        let newly = pinger.beat(6, citizen(1), &relayed, &government(), citizen(0));
        assert_eq!(vec![citizen(1), citizen(2)], newly);
        assert_eq!(Some(Promise::new(4, 0)), pinger.committed_of(citizen(2)));
        let mut stale = response(Promise::new(4, 0), None);
        stale.receipts = vec![Receipt {
            citizen: citizen(2),
            committed: Promise::new(3, 0),
            naturalized: false,
            when: 2,
            reachable: true,
        }];
        pinger.beat(7, citizen(1), &stale, &government(), citizen(0));
        assert_eq!(Some(Promise::new(4, 0)), pinger.committed_of(citizen(2)));
    }
}
