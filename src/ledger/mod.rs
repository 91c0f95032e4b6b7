use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::{display_key, keys, read_u64, write_u64, StateAccess, StoreError};

pub type AccountId = String;
pub type Amount = u64;

/// Module account that receives every collected fee before it is split.
pub const POC_MODULE_ACCOUNT: &str = "poc";
/// Module account holding the non-burned share of fees; source of withdrawals.
pub const REWARD_POOL_ACCOUNT: &str = "poc_reward_pool";

const MAX_ACCOUNT_LEN: usize = 128;

/// Accepts 1..=128 ASCII alphanumerics, `_`, `-` and `.`.
pub fn is_valid_account_id(account: &str) -> bool {
    !account.is_empty()
        && account.len() <= MAX_ACCOUNT_LEN
        && account
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient funds in account {account}: needed {needed}, available {available}")]
    InsufficientAccountFunds {
        account: AccountId,
        needed: Amount,
        available: Amount,
    },
    #[error("supply overflow while crediting {account}")]
    SupplyOverflow { account: AccountId },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Token primitive owned by the host chain.
///
/// Every method receives the caller's transactional state handle, so ledger
/// writes land in the same overlay as the engine's own writes and commit or
/// vanish together with them.
pub trait TokenLedger {
    fn balance(&self, state: &dyn StateAccess, account: &AccountId) -> Result<Amount, LedgerError>;

    fn transfer(
        &self,
        state: &mut dyn StateAccess,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError>;

    /// Creates `amount` new units in `module`'s account.
    fn mint(
        &self,
        state: &mut dyn StateAccess,
        module: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError>;

    /// Destroys `amount` units held by `module`.
    fn burn(
        &self,
        state: &mut dyn StateAccess,
        module: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError>;
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SupplyReport {
    pub genesis: Amount,
    pub minted: Amount,
    pub burned: Amount,
    pub total_supply: Amount,
}

impl SupplyReport {
    /// `total_supply == genesis + minted - burned`, computed without wrapping.
    pub fn is_conserved(&self) -> bool {
        let expected = self.genesis as i128 + self.minted as i128 - self.burned as i128;
        expected == self.total_supply as i128
    }
}

/// Store-backed bank used by the replay tool and tests.
///
/// Balances live under `bank::balance::`; supply and the cumulative mint and
/// burn counters are kept alongside so conservation can be audited at any
/// height.
#[derive(Clone, Copy, Debug, Default)]
pub struct BankLedger;

impl BankLedger {
    pub fn new() -> Self {
        Self
    }

    /// Seeds an account at genesis. Counted as genesis supply, not as a mint.
    pub fn fund_genesis(
        &self,
        state: &mut dyn StateAccess,
        account: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.credit_account(state, account, amount)?;
        let genesis = read_u64(state, keys::BANK_GENESIS_KEY)?;
        let genesis = genesis
            .checked_add(amount)
            .ok_or_else(|| LedgerError::SupplyOverflow {
                account: account.clone(),
            })?;
        write_u64(state, keys::BANK_GENESIS_KEY, genesis)?;
        self.adjust_supply(state, account, amount as i128)
    }

    pub fn supply_report(&self, state: &dyn StateAccess) -> Result<SupplyReport, LedgerError> {
        Ok(SupplyReport {
            genesis: read_u64(state, keys::BANK_GENESIS_KEY)?,
            minted: read_u64(state, keys::BANK_MINTED_KEY)?,
            burned: read_u64(state, keys::BANK_BURNED_KEY)?,
            total_supply: read_u64(state, keys::BANK_SUPPLY_KEY)?,
        })
    }

    /// Sum of every account balance; equals total supply when the bank is sound.
    pub fn sum_balances(&self, state: &dyn StateAccess) -> Result<u128, LedgerError> {
        let mut total = 0u128;
        for item in state.prefix_scan(keys::BANK_BALANCE_PREFIX)? {
            let (key, value) = item?;
            let raw: [u8; 8] = value.as_slice().try_into().map_err(|_| StoreError::Decode {
                key: display_key(&key),
                reason: "balance must be 8 bytes".into(),
            })?;
            total += u64::from_be_bytes(raw) as u128;
        }
        Ok(total)
    }

    fn credit_account(
        &self,
        state: &mut dyn StateAccess,
        account: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let key = keys::bank_balance_key(account);
        let balance = read_u64(state, &key)?;
        let balance = balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::SupplyOverflow {
                account: account.clone(),
            })?;
        write_u64(state, &key, balance)?;
        Ok(())
    }

    fn debit_account(
        &self,
        state: &mut dyn StateAccess,
        account: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let key = keys::bank_balance_key(account);
        let available = read_u64(state, &key)?;
        if available < amount {
            return Err(LedgerError::InsufficientAccountFunds {
                account: account.clone(),
                needed: amount,
                available,
            });
        }
        let remaining = available - amount;
        if remaining == 0 {
            state.delete(&key)?;
        } else {
            write_u64(state, &key, remaining)?;
        }
        Ok(())
    }

    fn adjust_supply(
        &self,
        state: &mut dyn StateAccess,
        account: &AccountId,
        delta: i128,
    ) -> Result<(), LedgerError> {
        let supply = read_u64(state, keys::BANK_SUPPLY_KEY)? as i128 + delta;
        let supply = u64::try_from(supply).map_err(|_| LedgerError::SupplyOverflow {
            account: account.clone(),
        })?;
        write_u64(state, keys::BANK_SUPPLY_KEY, supply)?;
        Ok(())
    }

    fn bump_counter(
        &self,
        state: &mut dyn StateAccess,
        key: &[u8],
        account: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let value = read_u64(state, key)?
            .checked_add(amount)
            .ok_or_else(|| LedgerError::SupplyOverflow {
                account: account.clone(),
            })?;
        write_u64(state, key, value)?;
        Ok(())
    }
}

impl TokenLedger for BankLedger {
    fn balance(&self, state: &dyn StateAccess, account: &AccountId) -> Result<Amount, LedgerError> {
        Ok(read_u64(state, &keys::bank_balance_key(account))?)
    }

    fn transfer(
        &self,
        state: &mut dyn StateAccess,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        self.debit_account(state, from, amount)?;
        self.credit_account(state, to, amount)?;
        debug!(%from, %to, amount, "bank transfer");
        Ok(())
    }

    fn mint(
        &self,
        state: &mut dyn StateAccess,
        module: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        self.credit_account(state, module, amount)?;
        self.adjust_supply(state, module, amount as i128)?;
        self.bump_counter(state, keys::BANK_MINTED_KEY, module, amount)?;
        debug!(%module, amount, "bank mint");
        Ok(())
    }

    fn burn(
        &self,
        state: &mut dyn StateAccess,
        module: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        self.debit_account(state, module, amount)?;
        self.adjust_supply(state, module, -(amount as i128))?;
        self.bump_counter(state, keys::BANK_BURNED_KEY, module, amount)?;
        debug!(%module, amount, "bank burn");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    #[test]
    fn account_id_validation() {
        assert!(is_valid_account_id("alice"));
        assert!(is_valid_account_id("poc_reward_pool"));
        assert!(is_valid_account_id("val-1.node"));
        assert!(!is_valid_account_id(""));
        assert!(!is_valid_account_id("bad account"));
        assert!(!is_valid_account_id("a::b"));
        assert!(!is_valid_account_id(&"x".repeat(129)));
    }

    #[test]
    fn transfer_moves_funds_and_keeps_supply() {
        let mut store = MemStore::new();
        let bank = BankLedger::new();
        bank.fund_genesis(&mut store, &"treasury".to_string(), 10_000)
            .unwrap();
        bank.transfer(&mut store, &"treasury".to_string(), &"alice".to_string(), 1_000)
            .unwrap();
        assert_eq!(bank.balance(&store, &"alice".to_string()).unwrap(), 1_000);
        assert_eq!(bank.balance(&store, &"treasury".to_string()).unwrap(), 9_000);
        let report = bank.supply_report(&store).unwrap();
        assert_eq!(report.total_supply, 10_000);
        assert!(report.is_conserved());
        assert_eq!(bank.sum_balances(&store).unwrap(), 10_000);
    }

    #[test]
    fn overdraft_is_rejected() {
        let mut store = MemStore::new();
        let bank = BankLedger::new();
        bank.fund_genesis(&mut store, &"alice".to_string(), 50).unwrap();
        let err = bank
            .transfer(&mut store, &"alice".to_string(), &"bob".to_string(), 51)
            .unwrap_err();
        match err {
            LedgerError::InsufficientAccountFunds {
                needed, available, ..
            } => {
                assert_eq!(needed, 51);
                assert_eq!(available, 50);
            }
            _ => panic!("unexpected error"),
        }
    }

    #[test]
    fn mint_and_burn_are_tracked() {
        let mut store = MemStore::new();
        let bank = BankLedger::new();
        let module = POC_MODULE_ACCOUNT.to_string();
        bank.fund_genesis(&mut store, &"alice".to_string(), 1_000).unwrap();
        bank.mint(&mut store, &module, 300).unwrap();
        bank.burn(&mut store, &module, 120).unwrap();
        let report = bank.supply_report(&store).unwrap();
        assert_eq!(report.genesis, 1_000);
        assert_eq!(report.minted, 300);
        assert_eq!(report.burned, 120);
        assert_eq!(report.total_supply, 1_180);
        assert!(report.is_conserved());
        assert_eq!(bank.sum_balances(&store).unwrap(), 1_180);
    }
}
