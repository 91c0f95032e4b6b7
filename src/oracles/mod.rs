//! Read-only views the host exposes to the engine: validator voting power and
//! identity attestation.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ledger::AccountId;

pub trait VotingPowerOracle {
    fn is_current_validator(&self, account: &AccountId) -> bool;

    fn voting_power(&self, account: &AccountId) -> u64;

    fn total_bonded_power(&self) -> u64;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("identity lookup for {account} failed: {reason}")]
pub struct IdentityError {
    pub account: AccountId,
    pub reason: String,
}

pub trait IdentityOracle {
    fn is_identity_verified(&self, account: &AccountId) -> Result<bool, IdentityError>;
}

/// Static validator set snapshot.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ValidatorSet {
    powers: BTreeMap<AccountId, u64>,
}

impl ValidatorSet {
    pub fn new(members: impl IntoIterator<Item = (AccountId, u64)>) -> Self {
        Self {
            powers: members.into_iter().collect(),
        }
    }

    pub fn set_power(&mut self, validator: AccountId, power: u64) {
        self.powers.insert(validator, power);
    }

    pub fn remove(&mut self, validator: &AccountId) {
        self.powers.remove(validator);
    }
}

impl VotingPowerOracle for ValidatorSet {
    fn is_current_validator(&self, account: &AccountId) -> bool {
        self.powers.contains_key(account)
    }

    fn voting_power(&self, account: &AccountId) -> u64 {
        self.powers.get(account).copied().unwrap_or(0)
    }

    fn total_bonded_power(&self) -> u64 {
        self.powers
            .values()
            .fold(0u64, |acc, power| acc.saturating_add(*power))
    }
}

/// Set of accounts with a verified identity attestation.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityRegistry {
    verified: BTreeSet<AccountId>,
}

impl IdentityRegistry {
    pub fn new(verified: impl IntoIterator<Item = AccountId>) -> Self {
        Self {
            verified: verified.into_iter().collect(),
        }
    }

    pub fn verify(&mut self, account: AccountId) {
        self.verified.insert(account);
    }
}

impl IdentityOracle for IdentityRegistry {
    fn is_identity_verified(&self, account: &AccountId) -> Result<bool, IdentityError> {
        Ok(self.verified.contains(account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_set_reports_power() {
        let mut set = ValidatorSet::new([("v1".to_string(), 40), ("v2".to_string(), 60)]);
        assert!(set.is_current_validator(&"v1".to_string()));
        assert!(!set.is_current_validator(&"v3".to_string()));
        assert_eq!(set.voting_power(&"v3".to_string()), 0);
        assert_eq!(set.total_bonded_power(), 100);
        set.set_power("v3".to_string(), 0);
        assert!(set.is_current_validator(&"v3".to_string()));
        assert_eq!(set.total_bonded_power(), 100);
        set.remove(&"v1".to_string());
        assert_eq!(set.total_bonded_power(), 60);
    }

    #[test]
    fn identity_registry_lookup() {
        let mut registry = IdentityRegistry::new(["alice".to_string()]);
        assert!(registry.is_identity_verified(&"alice".to_string()).unwrap());
        assert!(!registry.is_identity_verified(&"bob".to_string()).unwrap());
        registry.verify("bob".to_string());
        assert!(registry.is_identity_verified(&"bob".to_string()).unwrap());

        let parsed: IdentityRegistry = serde_json::from_str(r#"{"verified":["alice"]}"#).unwrap();
        assert_eq!(parsed, IdentityRegistry::new(["alice".to_string()]));
    }
}
