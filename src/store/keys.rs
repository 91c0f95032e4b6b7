//! Well-known state keys.
//!
//! Integers are big-endian so prefix scans return records in numeric order.
//! Addresses are length-prefixed so one address can never be a prefix of
//! another inside a composite key.

use crate::ledger::AccountId;

pub const PARAMS_KEY: &[u8] = b"poc::params";
pub const NEXT_CONTRIBUTION_ID_KEY: &[u8] = b"poc::next_id";
pub const CONTRIBUTION_PREFIX: &[u8] = b"poc::contribution::";
pub const CONTRIBUTOR_INDEX_PREFIX: &[u8] = b"poc::by_contributor::";
pub const CREDITS_PREFIX: &[u8] = b"poc::credits::";
pub const BLOCK_COUNT_PREFIX: &[u8] = b"poc::block_count::";
pub const FEE_METRICS_KEY: &[u8] = b"poc::fee_metrics";
pub const FEE_STATS_PREFIX: &[u8] = b"poc::fee_stats::";

pub const BANK_BALANCE_PREFIX: &[u8] = b"bank::balance::";
pub const BANK_SUPPLY_KEY: &[u8] = b"bank::supply";
pub const BANK_MINTED_KEY: &[u8] = b"bank::minted";
pub const BANK_BURNED_KEY: &[u8] = b"bank::burned";
pub const BANK_GENESIS_KEY: &[u8] = b"bank::genesis";

fn account_segment(account: &AccountId) -> Vec<u8> {
    let bytes = account.as_bytes();
    let mut out = Vec::with_capacity(2 + bytes.len());
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
    out
}

pub fn contribution_key(id: u64) -> Vec<u8> {
    [CONTRIBUTION_PREFIX, &id.to_be_bytes()].concat()
}

pub fn contributor_index_prefix(contributor: &AccountId) -> Vec<u8> {
    [CONTRIBUTOR_INDEX_PREFIX, account_segment(contributor).as_slice()].concat()
}

pub fn contributor_index_key(contributor: &AccountId, id: u64) -> Vec<u8> {
    [contributor_index_prefix(contributor).as_slice(), &id.to_be_bytes()].concat()
}

/// Recovers the contribution id from the trailing eight bytes of an index key.
pub fn id_from_index_key(key: &[u8]) -> Option<u64> {
    let start = key.len().checked_sub(8)?;
    let raw: [u8; 8] = key[start..].try_into().ok()?;
    Some(u64::from_be_bytes(raw))
}

pub fn credits_key(account: &AccountId) -> Vec<u8> {
    [CREDITS_PREFIX, account_segment(account).as_slice()].concat()
}

pub fn block_count_key(height: u64) -> Vec<u8> {
    [BLOCK_COUNT_PREFIX, &height.to_be_bytes()].concat()
}

pub fn fee_stats_key(account: &AccountId) -> Vec<u8> {
    [FEE_STATS_PREFIX, account_segment(account).as_slice()].concat()
}

pub fn bank_balance_key(account: &AccountId) -> Vec<u8> {
    [BANK_BALANCE_PREFIX, account_segment(account).as_slice()].concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_keys_do_not_collide_across_prefixed_addresses() {
        let short = contributor_index_prefix(&"alice".to_string());
        let long = contributor_index_key(&"alice2".to_string(), 1);
        assert!(!long.starts_with(&short));
    }

    #[test]
    fn index_key_round_trips_id() {
        let key = contributor_index_key(&"bob".to_string(), 42);
        assert_eq!(id_from_index_key(&key), Some(42));
        assert_eq!(id_from_index_key(b"short"), None);
    }

    #[test]
    fn contribution_keys_sort_numerically() {
        assert!(contribution_key(2) < contribution_key(10));
        assert!(contribution_key(255) < contribution_key(256));
    }
}
