//! The shaper is an advisory planner.  Given the current government and reachability evidence,
//! it emits at most one candidate government at a time:  admitting an immigrant, promoting
//! naturalized citizens toward a full parliament, repairing a majority around unreachable
//! members, or exiling a peer that has been gone too long.  Non-leaders hold the no-op relay
//! variant.

use std::collections::{BTreeSet, VecDeque};

use biometrics::{Collector, Counter};

use parliament_pb::{
    majority_size, parliament_target, CitizenID, Government, Immigration,
};

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static REPAIR: Counter = Counter::new("parliament.shaper.repair");
static EXILE: Counter = Counter::new("parliament.shaper.exile");
static GROW: Counter = Counter::new("parliament.shaper.grow");
static IMMIGRATE: Counter = Counter::new("parliament.shaper.immigrate");

/// Registers this module's biometrics.
pub fn register_biometrics(collector: &Collector) {
    collector.register_counter(&REPAIR);
    collector.register_counter(&EXILE);
    collector.register_counter(&GROW);
    collector.register_counter(&IMMIGRATE);
}

/////////////////////////////////////////////// Shape //////////////////////////////////////////////

/// A candidate government:  the membership to install, plus the immigration or exile clause
/// that motivated it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Shape {
    pub majority: Vec<CitizenID>,
    pub minority: Vec<CitizenID>,
    pub constituents: Vec<CitizenID>,
    pub immigrate: Option<Immigration>,
    pub exile: Option<CitizenID>,
}

////////////////////////////////////////////// Shaper //////////////////////////////////////////////

/// The shaper slot.  Leaders hold a planner; everyone else holds the relay, which shapes
/// nothing.
#[derive(Debug)]
pub enum Shaper {
    Planner(Planner),
    Relay,
}

impl Shaper {
    /// A planning shaper for a leader.
    pub fn planner(parliament_size: usize, immigrating: VecDeque<Immigration>) -> Self {
        Shaper::Planner(Planner {
            parliament_size,
            decided: false,
            immigrating,
            naturalized: BTreeSet::new(),
            unreachable: BTreeSet::new(),
        })
    }

    /// The no-op shaper for a non-leader.
    pub fn relay() -> Self {
        Shaper::Relay
    }

    /// Queue an immigration and maybe shape a government admitting it.
    pub fn immigrate(
        &mut self,
        government: &Government,
        immigration: Immigration,
    ) -> Option<Shape> {
        match self {
            Shaper::Planner(planner) => planner.immigrate(government, immigration),
            Shaper::Relay => None,
        }
    }

    /// Record that a peer has been unreachable past the timeout and maybe shape around it.
    pub fn unreachable(&mut self, government: &Government, citizen: CitizenID) -> Option<Shape> {
        match self {
            Shaper::Planner(planner) => planner.unreachable(government, citizen),
            Shaper::Relay => None,
        }
    }

    /// Record that a peer has caught up to the current government and maybe promote it.
    pub fn naturalized(&mut self, government: &Government, citizen: CitizenID) -> Option<Shape> {
        match self {
            Shaper::Planner(planner) => planner.naturalized(government, citizen),
            Shaper::Relay => None,
        }
    }

    /// Re-evaluate evidence already on hand, typically right after an enactment unlatches the
    /// shaper.  Queued immigrations get their government here.
    pub fn pending(&mut self, government: &Government) -> Option<Shape> {
        match self {
            Shaper::Planner(planner) => planner.plan(government),
            Shaper::Relay => None,
        }
    }

    /// True iff a shaped government is in flight and no further shapes will be emitted.
    pub fn is_decided(&self) -> bool {
        match self {
            Shaper::Planner(planner) => planner.decided,
            Shaper::Relay => false,
        }
    }

    /// Surrender the queued immigrations so they survive a government boundary.
    pub fn carry(self) -> VecDeque<Immigration> {
        match self {
            Shaper::Planner(planner) => planner.immigrating,
            Shaper::Relay => VecDeque::new(),
        }
    }
}

////////////////////////////////////////////// Planner /////////////////////////////////////////////

/// The planning state of a leader's shaper.
#[derive(Debug)]
pub struct Planner {
    parliament_size: usize,
    decided: bool,
    immigrating: VecDeque<Immigration>,
    naturalized: BTreeSet<CitizenID>,
    unreachable: BTreeSet<CitizenID>,
}

impl Planner {
    fn immigrate(&mut self, government: &Government, immigration: Immigration) -> Option<Shape> {
        if government.is_citizen(immigration.citizen) {
            return None;
        }
        self.immigrating.push_back(immigration);
        self.plan(government)
    }

    fn unreachable(&mut self, government: &Government, citizen: CitizenID) -> Option<Shape> {
        self.naturalized.remove(&citizen);
        self.unreachable.insert(citizen);
        self.plan(government)
    }

    fn naturalized(&mut self, government: &Government, citizen: CitizenID) -> Option<Shape> {
        self.unreachable.remove(&citizen);
        self.naturalized.insert(citizen);
        self.plan(government)
    }

    fn plan(&mut self, government: &Government) -> Option<Shape> {
        if self.decided {
            return None;
        }
        let shape = self
            .repair(government)
            .or_else(|| self.exile(government))
            .or_else(|| self.grow(government))
            .or_else(|| self.admit(government));
        if shape.is_some() {
            self.decided = true;
        }
        shape
    }

    /// Demote unreachable majority members and promote naturalized replacements so the
    /// parliament keeps its shape.
    fn repair(&mut self, government: &Government) -> Option<Shape> {
        if !government
            .majority
            .iter()
            .any(|c| self.unreachable.contains(c))
        {
            return None;
        }
        let mut majority: Vec<CitizenID> = government
            .majority
            .iter()
            .filter(|c| !self.unreachable.contains(c))
            .copied()
            .collect();
        let replacements = government
            .minority
            .iter()
            .chain(government.constituents.iter())
            .filter(|c| self.naturalized.contains(c) && !self.unreachable.contains(c));
        for citizen in replacements {
            if majority.len() == government.majority.len() {
                break;
            }
            majority.push(*citizen);
        }
        if majority.len() < government.majority.len() {
            return None;
        }
        let minority: Vec<CitizenID> = government
            .parliament()
            .into_iter()
            .filter(|c| !majority.contains(c))
            .collect();
        let constituents: Vec<CitizenID> = government
            .constituents
            .iter()
            .filter(|c| !majority.contains(c))
            .copied()
            .collect();
        REPAIR.click();
        Some(Shape {
            majority,
            minority,
            constituents,
            immigrate: None,
            exile: None,
        })
    }

    /// Exile one unreachable non-majority citizen.
    fn exile(&mut self, government: &Government) -> Option<Shape> {
        let exilee = *self
            .unreachable
            .iter()
            .find(|c| government.is_citizen(**c) && !government.is_majority(**c))?;
        EXILE.click();
        Some(Shape {
            majority: government.majority.clone(),
            minority: government
                .minority
                .iter()
                .filter(|c| **c != exilee)
                .copied()
                .collect(),
            constituents: government
                .constituents
                .iter()
                .filter(|c| **c != exilee)
                .copied()
                .collect(),
            immigrate: None,
            exile: Some(exilee),
        })
    }

    /// Grow the parliament toward its target by promoting naturalized constituents.
    fn grow(&mut self, government: &Government) -> Option<Shape> {
        let target = parliament_target(government.citizens().len(), self.parliament_size);
        let parliament = government.parliament();
        if parliament.len() >= target {
            return None;
        }
        let mut grown = parliament;
        for citizen in government.constituents.iter() {
            if grown.len() == target {
                break;
            }
            if self.naturalized.contains(citizen) && !self.unreachable.contains(citizen) {
                grown.push(*citizen);
            }
        }
        if grown.len() < target {
            return None;
        }
        let majority: Vec<CitizenID> = grown[..majority_size(target)].to_vec();
        let minority: Vec<CitizenID> = grown[majority_size(target)..].to_vec();
        let constituents: Vec<CitizenID> = government
            .constituents
            .iter()
            .filter(|c| !grown.contains(c))
            .copied()
            .collect();
        GROW.click();
        Some(Shape {
            majority,
            minority,
            constituents,
            immigrate: None,
            exile: None,
        })
    }

    /// Admit the next queued immigrant as a constituent.
    fn admit(&mut self, government: &Government) -> Option<Shape> {
        loop {
            let immigration = self.immigrating.pop_front()?;
            if government.is_citizen(immigration.citizen) {
                continue;
            }
            let mut constituents = government.constituents.clone();
            constituents.push(immigration.citizen);
            IMMIGRATE.click();
            return Some(Shape {
                majority: government.majority.clone(),
                minority: government.minority.clone(),
                constituents,
                immigrate: Some(immigration),
                exile: None,
            });
        }
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn citizen(x: u8) -> CitizenID {
        CitizenID::new([x; 16])
    }

    fn government(majority: &[u8], minority: &[u8], constituents: &[u8]) -> Government {
        Government {
            majority: majority.iter().copied().map(citizen).collect(),
            minority: minority.iter().copied().map(citizen).collect(),
            constituents: constituents.iter().copied().map(citizen).collect(),
            ..Government::default()
        }
    }

    fn immigration(x: u8) -> Immigration {
        Immigration {
            citizen: citizen(x),
            cookie: x as u64,
            properties: format!("{x}"),
        }
    }

    #[test]
    fn immigration_shapes_a_constituent() {
        let government = government(&[0], &[], &[]);
        let mut shaper = Shaper::planner(5, VecDeque::new());
        let shape = shaper
            .immigrate(&government, immigration(1))
            .expect("shape should emit");
        assert_eq!(vec![citizen(0)], shape.majority);
        assert_eq!(vec![citizen(1)], shape.constituents);
        assert_eq!(Some(immigration(1)), shape.immigrate);
    }

    #[test]
    fn duplicate_immigration_is_refused() {
        let government = government(&[0], &[], &[1]);
        let mut shaper = Shaper::planner(5, VecDeque::new());
        assert!(shaper.immigrate(&government, immigration(1)).is_none());
    }

    #[test]
    fn at_most_one_pending_shape() {
        let government = government(&[0], &[], &[]);
        let mut shaper = Shaper::planner(5, VecDeque::new());
        assert!(shaper.immigrate(&government, immigration(1)).is_some());
        assert!(shaper.is_decided());
        assert!(shaper.immigrate(&government, immigration(2)).is_none());
        let carried = shaper.carry();
        assert_eq!(1, carried.len());
        assert_eq!(citizen(2), carried[0].citizen);
    }

    #[test]
    fn naturalization_grows_the_parliament() {
        let government = government(&[0], &[], &[1, 2]);
        let mut shaper = Shaper::planner(5, VecDeque::new());
        assert!(shaper.naturalized(&government, citizen(1)).is_none());
        let shape = shaper
            .naturalized(&government, citizen(2))
            .expect("shape should emit");
        assert_eq!(vec![citizen(0), citizen(1)], shape.majority);
        assert_eq!(vec![citizen(2)], shape.minority);
        assert!(shape.constituents.is_empty());
    }

    #[test]
    fn two_citizens_stay_a_dictatorship() {
        let government = government(&[0], &[], &[1]);
        let mut shaper = Shaper::planner(5, VecDeque::new());
        assert!(shaper.naturalized(&government, citizen(1)).is_none());
    }

    #[test]
    fn unreachable_majority_is_repaired() {
        let government = government(&[0, 1], &[2], &[]);
        let mut shaper = Shaper::planner(5, VecDeque::new());
        assert!(shaper.naturalized(&government, citizen(2)).is_none());
        let shape = shaper
            .unreachable(&government, citizen(1))
            .expect("shape should emit");
        assert_eq!(vec![citizen(0), citizen(2)], shape.majority);
        assert_eq!(vec![citizen(1)], shape.minority);
    }

    #[test]
    fn unreachable_constituent_is_exiled() {
        let government = government(&[0, 1], &[2], &[3]);
        let mut shaper = Shaper::planner(5, VecDeque::new());
        let shape = shaper
            .unreachable(&government, citizen(3))
            .expect("shape should emit");
        assert_eq!(Some(citizen(3)), shape.exile);
        assert!(shape.constituents.is_empty());
        assert_eq!(vec![citizen(0), citizen(1)], shape.majority);
    }

    #[test]
    fn carried_immigrations_admit_on_pending() {
        let government = government(&[0], &[], &[1]);
        let mut carried = VecDeque::new();
        carried.push_back(immigration(2));
        let mut shaper = Shaper::planner(5, carried);
        let shape = shaper.pending(&government).expect("shape should emit");
        assert_eq!(Some(immigration(2)), shape.immigrate);
        assert_eq!(vec![citizen(1), citizen(2)], shape.constituents);
    }

    #[test]
    fn relay_shapes_nothing() {
        let government = government(&[0], &[], &[1, 2]);
        let mut shaper = Shaper::relay();
        assert!(shaper.immigrate(&government, immigration(3)).is_none());
        assert!(shaper.naturalized(&government, citizen(1)).is_none());
        assert!(shaper.unreachable(&government, citizen(1)).is_none());
        assert!(!shaper.is_decided());
    }
}
