//! Proof-of-contribution engine: fee-gated submission of off-chain work,
//! validator endorsement with power-weighted quorum, reputation credits and
//! their conversion into tokens.

use serde::{Deserialize, Serialize};

pub mod contributions;
pub mod endorsements;
pub mod engine;
pub mod fees;
pub mod gate;
pub mod ledger;
pub mod metrics;
pub mod oracles;
pub mod params;
pub mod reputation;
pub mod rewards;
pub mod store;

pub use engine::{ErrorClass, HostContext, PocEngine, PocError, SubmitReceipt};

/// Height and timestamp of the block a transaction executes in.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockContext {
    pub height: u64,
    pub time: u64,
}
