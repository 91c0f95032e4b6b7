//! Fee collection and credit withdrawal.
//!
//! A collected fee moves from the submitter to the `poc` module account, where
//! the burn share is destroyed and the rest is forwarded to the reward pool.
//! Withdrawals convert credits 1:1 into tokens paid from that pool, with a
//! bounded mint covering any shortfall.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::contributions::{Contribution, ContributionId, ContributionStore};
use crate::ledger::{
    AccountId, Amount, LedgerError, TokenLedger, POC_MODULE_ACCOUNT, REWARD_POOL_ACCOUNT,
};
use crate::metrics::{self, FeeSplit};
use crate::params::{Params, BPS_DENOMINATOR};
use crate::reputation::{self, ReputationError};
use crate::store::{StateAccess, StoreError};
use crate::BlockContext;

#[derive(Debug, thiserror::Error)]
pub enum FeeError {
    #[error("fee {fee} is below the minimum {minimum}")]
    FeeBelowMinimum { fee: Amount, minimum: Amount },
    #[error("fee {fee} exceeds the maximum {maximum}")]
    FeeAboveMaximum { fee: Amount, maximum: Amount },
    #[error("insufficient balance for fee: needed {needed}, available {available}")]
    InsufficientFee { needed: Amount, available: Amount },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum WithdrawError {
    #[error("account {0} holds no credits")]
    NoCredits(AccountId),
    #[error(
        "reward pool holds {pool} of {requested}; \
         the {shortfall} shortfall exceeds the inflation allowance {allowance}"
    )]
    RewardPoolInsufficient {
        requested: Amount,
        pool: Amount,
        shortfall: Amount,
        allowance: Amount,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ReputationError> for WithdrawError {
    fn from(err: ReputationError) -> Self {
        match err {
            ReputationError::NoCredits(account) => WithdrawError::NoCredits(account),
            ReputationError::Store(err) => WithdrawError::Store(err),
        }
    }
}

/// Burn/pool split with the odd unit assigned to the burn.
pub fn split_fee(fee: Amount, burn_ratio_bps: u32) -> FeeSplit {
    let pool_bps = BPS_DENOMINATOR.saturating_sub(burn_ratio_bps) as u128;
    let to_pool = (fee as u128 * pool_bps / BPS_DENOMINATOR as u128) as Amount;
    FeeSplit {
        fee,
        burned: fee - to_pool,
        to_pool,
    }
}

fn module_account() -> AccountId {
    POC_MODULE_ACCOUNT.to_string()
}

fn pool_account() -> AccountId {
    REWARD_POOL_ACCOUNT.to_string()
}

/// Charges `fee` to `contributor` and routes it through burn and pool.
pub fn collect_fee(
    state: &mut dyn StateAccess,
    bank: &dyn TokenLedger,
    params: &Params,
    block: &BlockContext,
    contributor: &AccountId,
    fee: Amount,
) -> Result<FeeSplit, FeeError> {
    if fee < params.minimum_submission_fee {
        return Err(FeeError::FeeBelowMinimum {
            fee,
            minimum: params.minimum_submission_fee,
        });
    }
    if fee > params.maximum_submission_fee {
        warn!(fee, maximum = params.maximum_submission_fee, "fee breaker tripped");
        return Err(FeeError::FeeAboveMaximum {
            fee,
            maximum: params.maximum_submission_fee,
        });
    }
    let available = bank.balance(state, contributor)?;
    if available < fee {
        return Err(FeeError::InsufficientFee {
            needed: fee,
            available,
        });
    }

    let split = split_fee(fee, params.burn_ratio_bps);
    let module = module_account();
    bank.transfer(state, contributor, &module, fee)?;
    bank.burn(state, &module, split.burned)?;
    bank.transfer(state, &module, &pool_account(), split.to_pool)?;
    metrics::record_fee(state, contributor, split, block.height)?;

    info!(
        %contributor,
        fee,
        burned = split.burned,
        to_pool = split.to_pool,
        height = block.height,
        "submission fee collected"
    );
    Ok(split)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WithdrawReceipt {
    /// Credits converted, paid out 1:1 in tokens.
    pub credits: u64,
    pub from_pool: Amount,
    pub minted: Amount,
    /// Verified contributions whose reward this withdrawal settled.
    pub rewarded: Vec<ContributionId>,
}

/// Largest shortfall that may be minted for a withdrawal of `credits`.
pub fn mint_allowance(credits: u64, inflation_share_bps: u32) -> Amount {
    (credits as u128 * inflation_share_bps.min(BPS_DENOMINATOR) as u128 / BPS_DENOMINATOR as u128)
        as Amount
}

/// Converts every credit `contributor` holds into tokens.
///
/// The pool pays first. A shortfall is minted into the pool when it fits
/// within `inflation_share_bps` of the withdrawal; otherwise the call fails
/// and the caller's overlay discards the credit debit. On success the
/// contributor's verified contributions are flagged rewarded.
pub fn withdraw(
    state: &mut dyn StateAccess,
    bank: &dyn TokenLedger,
    params: &Params,
    contributor: &AccountId,
) -> Result<WithdrawReceipt, WithdrawError> {
    let credits = reputation::debit_all(state, contributor)?;
    let pool = pool_account();
    let pool_balance = bank.balance(state, &pool)?;
    let from_pool = credits.min(pool_balance);
    let shortfall = credits - from_pool;

    if shortfall > 0 {
        let allowance = mint_allowance(credits, params.inflation_share_bps);
        if shortfall > allowance {
            warn!(
                %contributor,
                credits,
                pool = pool_balance,
                shortfall,
                allowance,
                "withdrawal exceeds reward pool"
            );
            return Err(WithdrawError::RewardPoolInsufficient {
                requested: credits,
                pool: pool_balance,
                shortfall,
                allowance,
            });
        }
        bank.mint(state, &pool, shortfall)?;
    }
    bank.transfer(state, &pool, contributor, credits)?;
    metrics::record_withdrawal(state, contributor, credits, shortfall)?;
    let rewarded = settle_verified(state, contributor)?;

    info!(
        %contributor,
        credits,
        from_pool,
        minted = shortfall,
        contributions = rewarded.len(),
        "credits withdrawn"
    );
    Ok(WithdrawReceipt {
        credits,
        from_pool,
        minted: shortfall,
        rewarded,
    })
}

/// Flags every verified, not yet rewarded contribution of `contributor` as
/// rewarded and returns their ids.
fn settle_verified(
    state: &mut dyn StateAccess,
    contributor: &AccountId,
) -> Result<Vec<ContributionId>, StoreError> {
    let pending: Vec<Contribution> = ContributionStore::list_by_contributor(&*state, contributor)?
        .filter(|item| match item {
            Ok(contribution) => contribution.verified && !contribution.rewarded,
            Err(_) => true,
        })
        .collect::<Result<_, _>>()?;

    let mut rewarded = Vec::with_capacity(pending.len());
    for mut contribution in pending {
        if contribution.mark_rewarded() {
            ContributionStore::put(state, &contribution)?;
            rewarded.push(contribution.id);
        }
    }
    Ok(rewarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contributions::validate_submission;
    use crate::ledger::BankLedger;
    use crate::store::{atomically, MemStore};

    fn block() -> BlockContext {
        BlockContext {
            height: 12,
            time: 60,
        }
    }

    fn funded(account: &str, amount: Amount) -> (MemStore, BankLedger) {
        let mut store = MemStore::new();
        let bank = BankLedger::new();
        bank.fund_genesis(&mut store, &account.to_string(), amount).unwrap();
        (store, bank)
    }

    #[test]
    fn odd_unit_goes_to_burn() {
        assert_eq!(
            split_fee(30_001, 5_000),
            FeeSplit {
                fee: 30_001,
                burned: 15_001,
                to_pool: 15_000
            }
        );
        let split = split_fee(3_333, 1_000);
        assert_eq!(split.to_pool, 2_999);
        assert_eq!(split.burned + split.to_pool, split.fee);
    }

    #[test]
    fn fee_is_burned_and_pooled_exactly() {
        let (mut store, bank) = funded("alice", 100_000);
        let params = Params::default();
        let alice = "alice".to_string();
        let split = collect_fee(&mut store, &bank, &params, &block(), &alice, 30_000).unwrap();
        assert_eq!((split.burned, split.to_pool), (15_000, 15_000));

        assert_eq!(bank.balance(&store, &alice).unwrap(), 70_000);
        assert_eq!(bank.balance(&store, &pool_account()).unwrap(), 15_000);
        assert_eq!(bank.balance(&store, &module_account()).unwrap(), 0);
        let report = bank.supply_report(&store).unwrap();
        assert_eq!(report.total_supply, 85_000);
        assert!(report.is_conserved());

        let metrics = metrics::fee_metrics(&store).unwrap();
        assert_eq!(metrics.total_fees, 30_000);
        assert_eq!(metrics.total_burned, 15_000);
    }

    #[test]
    fn fee_bounds_and_balance_are_checked() {
        let (mut store, bank) = funded("alice", 5_000);
        let params = Params::default();
        let alice = "alice".to_string();
        assert!(matches!(
            collect_fee(&mut store, &bank, &params, &block(), &alice, 2_999),
            Err(FeeError::FeeBelowMinimum { .. })
        ));
        assert!(matches!(
            collect_fee(&mut store, &bank, &params, &block(), &alice, 150_001),
            Err(FeeError::FeeAboveMaximum { .. })
        ));
        assert!(matches!(
            collect_fee(&mut store, &bank, &params, &block(), &alice, 5_001),
            Err(FeeError::InsufficientFee {
                needed: 5_001,
                available: 5_000
            })
        ));
    }

    #[test]
    fn withdrawal_is_paid_from_pool() {
        let (mut store, bank) = funded(REWARD_POOL_ACCOUNT, 1_000);
        let params = Params::default();
        let alice = "alice".to_string();
        reputation::credit(&mut store, &alice, 300).unwrap();

        let receipt = withdraw(&mut store, &bank, &params, &alice).unwrap();
        assert_eq!(receipt.credits, 300);
        assert_eq!(receipt.from_pool, 300);
        assert_eq!(receipt.minted, 0);
        assert!(receipt.rewarded.is_empty());
        assert_eq!(bank.balance(&store, &alice).unwrap(), 300);
        assert_eq!(reputation::balance(&store, &alice).unwrap(), 0);
        assert!(matches!(
            withdraw(&mut store, &bank, &params, &alice),
            Err(WithdrawError::NoCredits(_))
        ));
    }

    #[test]
    fn shortfall_within_allowance_is_minted() {
        let (mut store, bank) = funded(REWARD_POOL_ACCOUNT, 85);
        let params = Params::default();
        let alice = "alice".to_string();
        reputation::credit(&mut store, &alice, 100).unwrap();

        let receipt = withdraw(&mut store, &bank, &params, &alice).unwrap();
        assert_eq!(receipt.from_pool, 85);
        assert_eq!(receipt.minted, 15);
        assert_eq!(bank.balance(&store, &alice).unwrap(), 100);
        assert_eq!(bank.balance(&store, &pool_account()).unwrap(), 0);
        let report = bank.supply_report(&store).unwrap();
        assert_eq!(report.minted, 15);
        assert!(report.is_conserved());
        assert_eq!(
            metrics::fee_metrics(&store).unwrap().total_minted_for_rewards,
            15
        );
    }

    #[test]
    fn failed_withdrawal_keeps_credits() {
        let (mut store, bank) = funded(REWARD_POOL_ACCOUNT, 10);
        let params = Params::default();
        let alice = "alice".to_string();
        reputation::credit(&mut store, &alice, 100).unwrap();
        let root = store.state_root();

        let result = atomically(&mut store, |overlay| withdraw(overlay, &bank, &params, &alice));
        match result {
            Err(WithdrawError::RewardPoolInsufficient {
                shortfall,
                allowance,
                ..
            }) => {
                assert_eq!(shortfall, 90);
                assert_eq!(allowance, 20);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(store.state_root(), root);
        assert_eq!(reputation::balance(&store, &alice).unwrap(), 100);
    }

    #[test]
    fn withdrawal_settles_verified_contributions() {
        let (mut store, bank) = funded(REWARD_POOL_ACCOUNT, 1_000);
        let params = Params::default();
        let alice = "alice".to_string();
        let submit = |store: &mut MemStore, contributor: &str| {
            let submission = validate_submission(
                contributor,
                "code",
                "https://example.org/pull/9",
                &"ab".repeat(32),
            )
            .unwrap();
            ContributionStore::insert_new(store, &block(), submission).unwrap()
        };
        let mut verified = submit(&mut store, "alice");
        let pending = submit(&mut store, "alice");
        let mut other = submit(&mut store, "bob");
        for contribution in [&mut verified, &mut other] {
            contribution.mark_verified(13);
            ContributionStore::put(&mut store, contribution).unwrap();
        }
        reputation::credit(&mut store, &alice, 100).unwrap();

        let receipt = withdraw(&mut store, &bank, &params, &alice).unwrap();
        assert_eq!(receipt.rewarded, vec![verified.id]);

        let get = |id| ContributionStore::get(&store, id).unwrap().unwrap();
        assert!(get(verified.id).rewarded);
        assert!(!get(pending.id).rewarded);
        assert!(!get(other.id).rewarded);
    }
}
