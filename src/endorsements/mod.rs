//! Validator endorsements and power-weighted quorum.
//!
//! Each vote stores the validator's power at the time it was cast. The tally
//! sums those snapshots and compares them against the live total bonded power,
//! so a validator leaving the set later does not retract their past vote.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::contributions::{
    Contribution, ContributionId, ContributionStore, Decision, Endorsement,
};
use crate::ledger::AccountId;
use crate::oracles::VotingPowerOracle;
use crate::params::{Params, BPS_DENOMINATOR};
use crate::reputation;
use crate::store::{StateAccess, StoreError};
use crate::BlockContext;

#[derive(Debug, thiserror::Error)]
pub enum EndorseError {
    #[error("contribution {0} not found")]
    ContributionNotFound(ContributionId),
    #[error("{0} is not a current validator")]
    NotAValidator(AccountId),
    #[error("validator {0} has no voting power")]
    ZeroPower(AccountId),
    #[error("validator {validator} already endorsed contribution {id}")]
    AlreadyEndorsed {
        id: ContributionId,
        validator: AccountId,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tally {
    pub approve_power: u128,
    pub reject_power: u128,
    pub total_bonded_power: u64,
    pub quorum_reached: bool,
}

/// `approve * 10000 >= quorum_bps * total`, and never with no bonded power.
pub fn quorum_reached(approve_power: u128, total_bonded_power: u64, quorum_bps: u32) -> bool {
    if total_bonded_power == 0 {
        return false;
    }
    approve_power * BPS_DENOMINATOR as u128 >= quorum_bps as u128 * total_bonded_power as u128
}

pub fn tally(contribution: &Contribution, total_bonded_power: u64, quorum_bps: u32) -> Tally {
    let approve_power = contribution.approval_power();
    Tally {
        approve_power,
        reject_power: contribution.rejection_power(),
        total_bonded_power,
        quorum_reached: quorum_reached(approve_power, total_bonded_power, quorum_bps),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndorseOutcome {
    pub contribution: Contribution,
    pub tally: Tally,
    /// Set only on the vote that flipped the contribution to verified.
    pub newly_verified: bool,
    pub credits_granted: u64,
}

/// Records one validator vote and, on the first crossing of quorum, verifies
/// the contribution and credits its author `base_reward_unit`.
pub fn endorse(
    state: &mut dyn StateAccess,
    params: &Params,
    validators: &dyn VotingPowerOracle,
    block: &BlockContext,
    id: ContributionId,
    validator: &AccountId,
    decision: Decision,
) -> Result<EndorseOutcome, EndorseError> {
    let mut contribution =
        ContributionStore::get(state, id)?.ok_or(EndorseError::ContributionNotFound(id))?;

    if !validators.is_current_validator(validator) {
        return Err(EndorseError::NotAValidator(validator.clone()));
    }
    let power = validators.voting_power(validator);
    if power == 0 {
        return Err(EndorseError::ZeroPower(validator.clone()));
    }
    if contribution.has_endorsed(validator) {
        return Err(EndorseError::AlreadyEndorsed {
            id,
            validator: validator.clone(),
        });
    }

    contribution.endorsements.push(Endorsement {
        validator: validator.clone(),
        decision,
        power,
        height: block.height,
        timestamp: block.time,
    });
    debug!(id, %validator, ?decision, power, "endorsement recorded");

    let tally = tally(&contribution, validators.total_bonded_power(), params.quorum_bps);
    let mut newly_verified = false;
    let mut credits_granted = 0;
    if tally.quorum_reached && contribution.mark_verified(block.height) {
        newly_verified = true;
        reputation::credit(state, &contribution.contributor, params.base_reward_unit)?;
        credits_granted = params.base_reward_unit;
        info!(
            id,
            contributor = %contribution.contributor,
            approve_power = %tally.approve_power,
            total_bonded_power = tally.total_bonded_power,
            credits = credits_granted,
            "contribution verified"
        );
    }

    ContributionStore::put(state, &contribution)?;
    Ok(EndorseOutcome {
        contribution,
        tally,
        newly_verified,
        credits_granted,
    })
}
