#![doc = include_str!("../README.md")]

use biometrics::Collector;

use parliament_pb::{CitizenID, Message, DEFAULT_PARLIAMENT_SIZE};

pub mod acceptor;
pub mod citizen;
pub mod log;
pub mod pinger;
pub mod proposer;
pub mod recorder;
pub mod scheduler;
pub mod shaper;
pub mod writer;

pub use citizen::{Citizen, Posted};
pub use scheduler::Timer;

///////////////////////////////////////////// Constants ////////////////////////////////////////////

/// The largest number of commits one sync segment carries.  A peer further behind than this
/// catches up across several exchanges; the zero-delay reschedule keeps them back to back.
pub const SYNC_COMMITS: usize = 24;

////////////////////////////////////////////// clues ///////////////////////////////////////////////

/// The indicio collector for the parliament crate.
pub static COLLECTOR: indicio::Collector = indicio::Collector::new();

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

/// Registers this crate's biometrics with the provided Collector.
pub fn register_biometrics(collector: &Collector) {
    acceptor::register_biometrics(collector);
    citizen::register_biometrics(collector);
    log::register_biometrics(collector);
    pinger::register_biometrics(collector);
    proposer::register_biometrics(collector);
    recorder::register_biometrics(collector);
    shaper::register_biometrics(collector);
    writer::register_biometrics(collector);
}

///////////////////////////////////////////// Dispatch /////////////////////////////////////////////

/// A message one of the strategies wants shipped.  The citizen wraps dispatches into envelopes,
/// attaching the sync segment that rides every request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dispatch {
    pub to: Vec<CitizenID>,
    pub message: Message,
}

////////////////////////////////////////// CitizenOptions //////////////////////////////////////////

/// Tuning for one citizen.  `ping` and `timeout` are in whatever units the caller's clock
/// counts; `timeout` bounds both unreachability escalation and the collapse watchdog.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CitizenOptions {
    pub parliament_size: usize,
    pub ping: u64,
    pub timeout: u64,
}

impl CitizenOptions {
    /// Seat up to `parliament_size` voting members.
    pub fn parliament_size(mut self, parliament_size: usize) -> Self {
        self.parliament_size = parliament_size;
        self
    }

    /// Synchronize a caught-up peer every `ping`.
    pub fn ping(mut self, ping: u64) -> Self {
        self.ping = ping;
        self
    }

    /// Escalate a quiet peer to unreachable, and collapse a quiet leader, after `timeout`.
    pub fn timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for CitizenOptions {
    fn default() -> Self {
        Self {
            parliament_size: DEFAULT_PARLIAMENT_SIZE,
            ping: 1_000,
            timeout: 3_000,
        }
    }
}
