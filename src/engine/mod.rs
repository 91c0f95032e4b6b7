//! Transaction and query surface of the proof-of-contribution engine.
//!
//! Every state-changing call runs inside [`atomically`]: the handler writes
//! into a [`StateOverlay`](crate::store::StateOverlay) and the batch reaches
//! the host store only if the whole handler succeeds.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::contributions::{
    validate_submission, Contribution, ContributionFilter, ContributionId, ContributionIter,
    ContributionStore, Decision, SubmitError,
};
use crate::endorsements::{self, EndorseError, EndorseOutcome};
use crate::fees::{compute_fee, FeeBreakdown};
use crate::gate::{self, GateError};
use crate::ledger::{is_valid_account_id, AccountId, LedgerError, TokenLedger};
use crate::metrics::{self, ContributorFeeStats, FeeMetrics, FeeSplit};
use crate::oracles::{IdentityOracle, VotingPowerOracle};
use crate::params::{ParamError, ParamSetError, ParameterStore, Params};
use crate::reputation::{self, CreditsView};
use crate::rewards::{self, FeeError, WithdrawError, WithdrawReceipt};
use crate::store::{atomically, StateAccess, StoreError};
use crate::BlockContext;

/// Coarse error classes callers use to decide how to react.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed input; resubmit corrected.
    InputValidation,
    /// A prerequisite is unmet; wait or satisfy it.
    Policy,
    /// Funding or fee bounds.
    Economic,
    /// Caller or replay mistake against existing state.
    State,
    /// Rejected parameter write.
    Configuration,
    /// Storage or collaborator failure.
    Fault,
}

#[derive(Debug, thiserror::Error)]
pub enum PocError {
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Fee(#[from] FeeError),
    #[error(transparent)]
    Endorse(#[from] EndorseError),
    #[error(transparent)]
    Withdraw(#[from] WithdrawError),
    #[error(transparent)]
    Params(#[from] ParamError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ParamSetError> for PocError {
    fn from(err: ParamSetError) -> Self {
        match err {
            ParamSetError::Invalid(err) => PocError::Params(err),
            ParamSetError::Store(err) => PocError::Store(err),
        }
    }
}

impl PocError {
    pub fn kind(&self) -> ErrorClass {
        match self {
            PocError::InvalidAddress(_) => ErrorClass::InputValidation,
            PocError::Submit(SubmitError::Store(_)) => ErrorClass::Fault,
            PocError::Submit(_) => ErrorClass::InputValidation,
            PocError::Gate(GateError::IdentityCheckFailed(_) | GateError::Store(_)) => {
                ErrorClass::Fault
            }
            PocError::Gate(_) => ErrorClass::Policy,
            PocError::Fee(FeeError::Ledger(_) | FeeError::Store(_)) => ErrorClass::Fault,
            PocError::Fee(_) => ErrorClass::Economic,
            PocError::Endorse(
                EndorseError::ContributionNotFound(_) | EndorseError::AlreadyEndorsed { .. },
            ) => ErrorClass::State,
            PocError::Endorse(EndorseError::NotAValidator(_) | EndorseError::ZeroPower(_)) => {
                ErrorClass::Policy
            }
            PocError::Endorse(EndorseError::Store(_)) => ErrorClass::Fault,
            PocError::Withdraw(WithdrawError::NoCredits(_)) => ErrorClass::State,
            PocError::Withdraw(WithdrawError::RewardPoolInsufficient { .. }) => {
                ErrorClass::Economic
            }
            PocError::Withdraw(_) => ErrorClass::Fault,
            PocError::Params(_) => ErrorClass::Configuration,
            PocError::Ledger(_) | PocError::Store(_) => ErrorClass::Fault,
        }
    }
}

/// Collaborators owned by the host chain.
#[derive(Clone, Copy)]
pub struct HostContext<'h> {
    pub validators: &'h dyn VotingPowerOracle,
    pub identity: &'h dyn IdentityOracle,
    pub bank: &'h dyn TokenLedger,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub id: ContributionId,
    pub fee: FeeBreakdown,
    pub burned: u64,
    pub to_pool: u64,
}

pub struct PocEngine<'h> {
    host: HostContext<'h>,
}

fn check_address(account: &str) -> Result<AccountId, PocError> {
    if is_valid_account_id(account) {
        Ok(account.to_string())
    } else {
        Err(PocError::InvalidAddress(account.to_string()))
    }
}

impl<'h> PocEngine<'h> {
    pub fn new(host: HostContext<'h>) -> Self {
        Self { host }
    }

    /// Writes the genesis parameter set. Must run before any transaction.
    pub fn init_genesis(
        &self,
        state: &mut dyn StateAccess,
        params: &Params,
    ) -> Result<(), PocError> {
        atomically(state, |overlay| -> Result<(), PocError> {
            ParameterStore::set(overlay, params)?;
            Ok(())
        })?;
        info!("poc genesis initialized");
        Ok(())
    }

    pub fn submit_contribution(
        &self,
        state: &mut dyn StateAccess,
        block: &BlockContext,
        contributor: &str,
        ctype: &str,
        uri: &str,
        content_hash: &str,
    ) -> Result<SubmitReceipt, PocError> {
        let submission = validate_submission(contributor, ctype, uri, content_hash)?;
        let host = self.host;
        let result = atomically(state, |overlay| -> Result<SubmitReceipt, PocError> {
            let params = ParameterStore::get(&*overlay)?;
            let credits = reputation::balance(&*overlay, &submission.contributor)?;
            let reservation = gate::check_and_reserve(
                overlay,
                &params,
                host.identity,
                &submission.contributor,
                submission.ctype,
                credits,
                block.height,
            )?;
            let fee = compute_fee(&params, credits, reservation.submissions_before);
            let split: FeeSplit = rewards::collect_fee(
                overlay,
                host.bank,
                &params,
                block,
                &submission.contributor,
                fee.fee,
            )?;
            let contribution = ContributionStore::insert_new(overlay, block, submission)?;
            Ok(SubmitReceipt {
                id: contribution.id,
                fee,
                burned: split.burned,
                to_pool: split.to_pool,
            })
        });
        if let Err(err) = &result {
            warn!(%contributor, height = block.height, error = %err, "submission rejected");
        }
        result
    }

    pub fn endorse(
        &self,
        state: &mut dyn StateAccess,
        block: &BlockContext,
        validator: &str,
        id: ContributionId,
        decision: Decision,
    ) -> Result<EndorseOutcome, PocError> {
        let validator = check_address(validator)?;
        let validators = self.host.validators;
        atomically(state, |overlay| -> Result<EndorseOutcome, PocError> {
            let params = ParameterStore::get(&*overlay)?;
            Ok(endorsements::endorse(
                overlay, &params, validators, block, id, &validator, decision,
            )?)
        })
    }

    pub fn withdraw_rewards(
        &self,
        state: &mut dyn StateAccess,
        contributor: &str,
    ) -> Result<WithdrawReceipt, PocError> {
        let contributor = check_address(contributor)?;
        let bank = self.host.bank;
        atomically(state, |overlay| -> Result<WithdrawReceipt, PocError> {
            let params = ParameterStore::get(&*overlay)?;
            Ok(rewards::withdraw(overlay, bank, &params, &contributor)?)
        })
    }

    /// Replaces the parameter set as one unit.
    pub fn set_params(&self, state: &mut dyn StateAccess, params: &Params) -> Result<(), PocError> {
        atomically(state, |overlay| -> Result<(), PocError> {
            ParameterStore::set(overlay, params)?;
            Ok(())
        })
    }

    /// Block finalization hook: clears the per-block submission counter.
    pub fn end_block(&self, state: &mut dyn StateAccess, height: u64) -> Result<(), PocError> {
        atomically(state, |overlay| -> Result<(), PocError> {
            gate::reset_block(overlay, height)?;
            Ok(())
        })
    }

    /// Fee the next submission by `contributor` at `height` would pay.
    pub fn quote_fee(
        &self,
        state: &dyn StateAccess,
        contributor: &str,
        height: u64,
    ) -> Result<FeeBreakdown, PocError> {
        let contributor = check_address(contributor)?;
        let params = ParameterStore::get(state)?;
        let credits = reputation::balance(state, &contributor)?;
        let submissions = gate::submissions_in_block(state, height)?;
        Ok(compute_fee(&params, credits, submissions))
    }

    pub fn get_contribution(
        &self,
        state: &dyn StateAccess,
        id: ContributionId,
    ) -> Result<Option<Contribution>, PocError> {
        Ok(ContributionStore::get(state, id)?)
    }

    pub fn list_contributions<'s>(
        &self,
        state: &'s dyn StateAccess,
        filter: ContributionFilter,
    ) -> Result<ContributionIter<'s>, PocError> {
        Ok(ContributionStore::list(state, filter)?)
    }

    pub fn get_credits(
        &self,
        state: &dyn StateAccess,
        account: &str,
    ) -> Result<CreditsView, PocError> {
        let account = check_address(account)?;
        let params = ParameterStore::get(state)?;
        Ok(reputation::view(state, &params, &account)?)
    }

    pub fn get_fee_metrics(&self, state: &dyn StateAccess) -> Result<FeeMetrics, PocError> {
        Ok(metrics::fee_metrics(state)?)
    }

    pub fn get_contributor_fee_stats(
        &self,
        state: &dyn StateAccess,
        account: &str,
    ) -> Result<Option<ContributorFeeStats>, PocError> {
        let account = check_address(account)?;
        Ok(metrics::contributor_stats(state, &account)?)
    }

    pub fn get_params(&self, state: &dyn StateAccess) -> Result<Params, PocError> {
        Ok(ParameterStore::get(state)?)
    }
}
