//! Submission policy: ctype allow-list, identity and reputation prerequisites,
//! and the per-block rate limit.
//!
//! The block counter lives under `poc::block_count::{height}` and is written
//! through the caller's overlay, so the reservation is rolled back together
//! with everything else if fee collection fails afterwards.

use tracing::debug;

use crate::ledger::AccountId;
use crate::oracles::{IdentityError, IdentityOracle};
use crate::params::{ContributionType, Params};
use crate::store::{keys, read_u64, write_u64, StateAccess, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("contribution type {0} is not allowed")]
    CtypeNotAllowed(ContributionType),
    #[error("contribution type {ctype} requires a verified identity for {account}")]
    IdentityNotVerified {
        account: AccountId,
        ctype: ContributionType,
    },
    #[error("identity check failed: {0}")]
    IdentityCheckFailed(#[from] IdentityError),
    #[error("insufficient reputation: {required} credits required, {available} held")]
    InsufficientReputation { required: u64, available: u64 },
    #[error("rate limit exceeded: block {height} already holds {limit} submissions")]
    RateLimitExceeded { height: u64, limit: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counter state observed when a submission slot was reserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reservation {
    /// Accepted submissions in this block before this one.
    pub submissions_before: u64,
}

pub fn submissions_in_block(state: &dyn StateAccess, height: u64) -> Result<u64, StoreError> {
    read_u64(state, &keys::block_count_key(height))
}

/// Runs every policy check in order and, if all pass, bumps the block counter.
pub fn check_and_reserve(
    state: &mut dyn StateAccess,
    params: &Params,
    identity: &dyn IdentityOracle,
    contributor: &AccountId,
    ctype: ContributionType,
    credits: u64,
    height: u64,
) -> Result<Reservation, GateError> {
    let rule = params
        .rule_for(ctype)
        .ok_or(GateError::CtypeNotAllowed(ctype))?;

    if rule.requires_identity && !identity.is_identity_verified(contributor)? {
        return Err(GateError::IdentityNotVerified {
            account: contributor.clone(),
            ctype,
        });
    }

    if credits < rule.min_credits {
        return Err(GateError::InsufficientReputation {
            required: rule.min_credits,
            available: credits,
        });
    }

    let key = keys::block_count_key(height);
    let submissions_before = read_u64(state, &key)?;
    if submissions_before >= params.max_contributions_per_block {
        return Err(GateError::RateLimitExceeded {
            height,
            limit: params.max_contributions_per_block,
        });
    }
    write_u64(state, &key, submissions_before + 1)?;
    debug!(%contributor, %ctype, height, slot = submissions_before + 1, "submission slot reserved");

    Ok(Reservation { submissions_before })
}

/// Drops the counter for a finalized block.
pub fn reset_block(state: &mut dyn StateAccess, height: u64) -> Result<(), StoreError> {
    state.delete(&keys::block_count_key(height))
}
