//! Append-only fee and withdrawal aggregates.
//!
//! These records are audit data. Nothing in the engine reads them to make a
//! decision; they are only ever written next to the ledger movement they
//! describe, inside the same overlay.

use serde::{Deserialize, Serialize};

use crate::ledger::{AccountId, Amount};
use crate::store::{keys, read_json, write_json, StateAccess, StoreError};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FeeMetrics {
    pub total_fees: u128,
    pub total_burned: u128,
    pub total_to_pool: u128,
    pub total_withdrawn: u128,
    pub total_minted_for_rewards: u128,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ContributorFeeStats {
    pub total_fees: u128,
    pub total_burned: u128,
    pub submission_count: u64,
    pub first_height: Option<u64>,
    pub last_height: Option<u64>,
    pub total_withdrawn: u128,
}

/// One fee movement as split by the reward distributor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeSplit {
    pub fee: Amount,
    pub burned: Amount,
    pub to_pool: Amount,
}

pub fn fee_metrics(state: &dyn StateAccess) -> Result<FeeMetrics, StoreError> {
    Ok(read_json(state, keys::FEE_METRICS_KEY)?.unwrap_or_default())
}

pub fn contributor_stats(
    state: &dyn StateAccess,
    contributor: &AccountId,
) -> Result<Option<ContributorFeeStats>, StoreError> {
    read_json(state, &keys::fee_stats_key(contributor))
}

pub fn record_fee(
    state: &mut dyn StateAccess,
    contributor: &AccountId,
    split: FeeSplit,
    height: u64,
) -> Result<(), StoreError> {
    let mut metrics = fee_metrics(state)?;
    metrics.total_fees += split.fee as u128;
    metrics.total_burned += split.burned as u128;
    metrics.total_to_pool += split.to_pool as u128;
    write_json(state, keys::FEE_METRICS_KEY, &metrics)?;

    let key = keys::fee_stats_key(contributor);
    let mut stats: ContributorFeeStats = read_json(state, &key)?.unwrap_or_default();
    stats.total_fees += split.fee as u128;
    stats.total_burned += split.burned as u128;
    stats.submission_count = stats.submission_count.saturating_add(1);
    stats.first_height.get_or_insert(height);
    stats.last_height = Some(height);
    write_json(state, &key, &stats)
}

pub fn record_withdrawal(
    state: &mut dyn StateAccess,
    contributor: &AccountId,
    paid: Amount,
    minted: Amount,
) -> Result<(), StoreError> {
    let mut metrics = fee_metrics(state)?;
    metrics.total_withdrawn += paid as u128;
    metrics.total_minted_for_rewards += minted as u128;
    write_json(state, keys::FEE_METRICS_KEY, &metrics)?;

    let key = keys::fee_stats_key(contributor);
    let mut stats: ContributorFeeStats = read_json(state, &key)?.unwrap_or_default();
    stats.total_withdrawn += paid as u128;
    write_json(state, &key, &stats)
}
