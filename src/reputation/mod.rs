//! Per-address reputation credits.
//!
//! Credits are earned once per verified contribution and leave only through a
//! full withdrawal. A zero balance is stored as an absent key.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ledger::AccountId;
use crate::params::Params;
use crate::store::{keys, read_u64, write_u64, StateAccess, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ReputationError {
    #[error("account {0} holds no credits")]
    NoCredits(AccountId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreditsView {
    pub address: AccountId,
    pub amount: u64,
    pub tier: Option<String>,
}

pub fn balance(state: &dyn StateAccess, account: &AccountId) -> Result<u64, StoreError> {
    read_u64(state, &keys::credits_key(account))
}

/// Adds `amount`, saturating at `u64::MAX`. Returns the new balance.
pub fn credit(
    state: &mut dyn StateAccess,
    account: &AccountId,
    amount: u64,
) -> Result<u64, StoreError> {
    let key = keys::credits_key(account);
    let updated = read_u64(state, &key)?.saturating_add(amount);
    write_u64(state, &key, updated)?;
    debug!(%account, amount, balance = updated, "credits granted");
    Ok(updated)
}

/// Zeroes the balance and returns what it held.
pub fn debit_all(state: &mut dyn StateAccess, account: &AccountId) -> Result<u64, ReputationError> {
    let key = keys::credits_key(account);
    let held = read_u64(state, &key)?;
    if held == 0 {
        return Err(ReputationError::NoCredits(account.clone()));
    }
    state.delete(&key)?;
    Ok(held)
}

pub fn view(
    state: &dyn StateAccess,
    params: &Params,
    account: &AccountId,
) -> Result<CreditsView, StoreError> {
    let amount = balance(state, account)?;
    Ok(CreditsView {
        address: account.clone(),
        amount,
        tier: params.tier_for(amount).map(|tier| tier.name.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    #[test]
    fn credit_accumulates_and_saturates() {
        let mut store = MemStore::new();
        let alice = "alice".to_string();
        assert_eq!(credit(&mut store, &alice, 100).unwrap(), 100);
        assert_eq!(credit(&mut store, &alice, 100).unwrap(), 200);
        assert_eq!(credit(&mut store, &alice, u64::MAX).unwrap(), u64::MAX);
        assert_eq!(balance(&store, &alice).unwrap(), u64::MAX);
    }

    #[test]
    fn debit_all_empties_the_account() {
        let mut store = MemStore::new();
        let alice = "alice".to_string();
        credit(&mut store, &alice, 300).unwrap();
        assert_eq!(debit_all(&mut store, &alice).unwrap(), 300);
        assert_eq!(balance(&store, &alice).unwrap(), 0);
        assert!(store.is_empty());
        assert!(matches!(
            debit_all(&mut store, &alice),
            Err(ReputationError::NoCredits(_))
        ));
    }

    #[test]
    fn view_reports_tier() {
        let mut store = MemStore::new();
        let params = Params::default();
        let alice = "alice".to_string();
        assert_eq!(view(&store, &params, &alice).unwrap().tier, None);
        credit(&mut store, &alice, 600).unwrap();
        let credits = view(&store, &params, &alice).unwrap();
        assert_eq!(credits.amount, 600);
        assert_eq!(credits.tier.as_deref(), Some("silver"));
    }
}
