use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::ledger::{is_valid_account_id, AccountId};
use crate::params::ContributionType;
use crate::store::{
    decode_json, display_key, keys, read_json, read_u64, write_json, write_u64, ScanIter,
    StateAccess, StoreError,
};
use crate::BlockContext;

pub type ContributionId = u64;

/// Digest sizes accepted for `content_hash` (RIPEMD-160/SHA-1, SHA-256, SHA-512).
pub const SUPPORTED_DIGEST_LENGTHS: [usize; 3] = [20, 32, 64];
pub const MAX_URI_LEN: usize = 2_048;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endorsement {
    pub validator: AccountId,
    pub decision: Decision,
    /// Voting power captured when the vote was cast.
    pub power: u64,
    pub height: u64,
    pub timestamp: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contribution {
    pub id: ContributionId,
    pub contributor: AccountId,
    pub ctype: ContributionType,
    pub uri: String,
    #[serde(with = "hex_bytes")]
    pub content_hash: Vec<u8>,
    pub endorsements: Vec<Endorsement>,
    pub verified: bool,
    pub rewarded: bool,
    pub submitted_height: u64,
    pub submitted_time: u64,
    pub verified_height: Option<u64>,
}

impl Contribution {
    pub fn has_endorsed(&self, validator: &AccountId) -> bool {
        self.endorsements
            .iter()
            .any(|endorsement| &endorsement.validator == validator)
    }

    fn power_for(&self, decision: Decision) -> u128 {
        self.endorsements
            .iter()
            .filter(|endorsement| endorsement.decision == decision)
            .map(|endorsement| endorsement.power as u128)
            .sum()
    }

    /// Sum of approve-vote power snapshots.
    pub fn approval_power(&self) -> u128 {
        self.power_for(Decision::Approve)
    }

    pub fn rejection_power(&self) -> u128 {
        self.power_for(Decision::Reject)
    }

    /// Flips `verified` on. Returns `false` if it was already set.
    pub fn mark_verified(&mut self, height: u64) -> bool {
        if self.verified {
            return false;
        }
        self.verified = true;
        self.verified_height = Some(height);
        true
    }

    /// Flips `rewarded` on. Returns `false` if the contribution is not
    /// verified yet or was already rewarded.
    pub fn mark_rewarded(&mut self) -> bool {
        if !self.verified || self.rewarded {
            return false;
        }
        self.rewarded = true;
        true
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("invalid contribution type {0:?}")]
    InvalidContributionType(String),
    #[error("invalid URI: {0}")]
    InvalidUri(String),
    #[error("invalid hash: {0}")]
    InvalidHash(String),
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Submission input that passed every format check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedSubmission {
    pub contributor: AccountId,
    pub ctype: ContributionType,
    pub uri: String,
    pub content_hash: Vec<u8>,
}

pub fn validate_submission(
    contributor: &str,
    ctype: &str,
    uri: &str,
    content_hash: &str,
) -> Result<ValidatedSubmission, SubmitError> {
    if !is_valid_account_id(contributor) {
        return Err(SubmitError::InvalidAddress(contributor.to_string()));
    }
    let ctype = ctype
        .parse::<ContributionType>()
        .map_err(|_| SubmitError::InvalidContributionType(ctype.to_string()))?;
    validate_uri(uri)?;
    let content_hash = decode_content_hash(content_hash)?;
    Ok(ValidatedSubmission {
        contributor: contributor.to_string(),
        ctype,
        uri: uri.to_string(),
        content_hash,
    })
}

fn validate_uri(uri: &str) -> Result<(), SubmitError> {
    if uri.is_empty() {
        return Err(SubmitError::InvalidUri("empty".into()));
    }
    if uri.len() > MAX_URI_LEN {
        return Err(SubmitError::InvalidUri(format!(
            "{} bytes exceeds the {MAX_URI_LEN} byte limit",
            uri.len()
        )));
    }
    if uri.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(SubmitError::InvalidUri(
            "contains whitespace or control characters".into(),
        ));
    }
    Url::parse(uri).map_err(|err| SubmitError::InvalidUri(err.to_string()))?;
    Ok(())
}

fn decode_content_hash(content_hash: &str) -> Result<Vec<u8>, SubmitError> {
    let bytes = hex::decode(content_hash)
        .map_err(|err| SubmitError::InvalidHash(format!("not hex: {err}")))?;
    if !SUPPORTED_DIGEST_LENGTHS.contains(&bytes.len()) {
        return Err(SubmitError::InvalidHash(format!(
            "{} byte digest, expected one of {:?}",
            bytes.len(),
            SUPPORTED_DIGEST_LENGTHS
        )));
    }
    Ok(bytes)
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContributionFilter {
    #[serde(default)]
    pub contributor: Option<AccountId>,
    #[serde(default)]
    pub ctype: Option<ContributionType>,
    #[serde(default)]
    pub verified_only: bool,
}

impl ContributionFilter {
    pub fn matches(&self, contribution: &Contribution) -> bool {
        if let Some(contributor) = &self.contributor {
            if &contribution.contributor != contributor {
                return false;
            }
        }
        if let Some(ctype) = self.ctype {
            if contribution.ctype != ctype {
                return false;
            }
        }
        !self.verified_only || contribution.verified
    }
}

pub type ContributionIter<'a> = Box<dyn Iterator<Item = Result<Contribution, StoreError>> + 'a>;

/// Durable contribution records plus the by-contributor index.
pub struct ContributionStore;

impl ContributionStore {
    /// Validates raw input and stores it without any gate or fee step.
    pub fn submit(
        state: &mut dyn StateAccess,
        block: &BlockContext,
        contributor: &str,
        ctype: &str,
        uri: &str,
        content_hash: &str,
    ) -> Result<ContributionId, SubmitError> {
        let submission = validate_submission(contributor, ctype, uri, content_hash)?;
        Ok(Self::insert_new(state, block, submission)?.id)
    }

    /// Assigns the next id and persists a pending record. Callers validate
    /// first, so ids are never consumed by rejected input.
    pub fn insert_new(
        state: &mut dyn StateAccess,
        block: &BlockContext,
        submission: ValidatedSubmission,
    ) -> Result<Contribution, StoreError> {
        let id = read_u64(state, keys::NEXT_CONTRIBUTION_ID_KEY)?;
        let next = id
            .checked_add(1)
            .ok_or_else(|| StoreError::Backend("contribution id space exhausted".into()))?;
        write_u64(state, keys::NEXT_CONTRIBUTION_ID_KEY, next)?;

        let contribution = Contribution {
            id,
            contributor: submission.contributor,
            ctype: submission.ctype,
            uri: submission.uri,
            content_hash: submission.content_hash,
            endorsements: Vec::new(),
            verified: false,
            rewarded: false,
            submitted_height: block.height,
            submitted_time: block.time,
            verified_height: None,
        };
        Self::put(state, &contribution)?;
        state.insert(
            &keys::contributor_index_key(&contribution.contributor, id),
            &[],
        )?;
        info!(
            id,
            contributor = %contribution.contributor,
            ctype = %contribution.ctype,
            height = block.height,
            "contribution stored"
        );
        Ok(contribution)
    }

    pub fn get(
        state: &dyn StateAccess,
        id: ContributionId,
    ) -> Result<Option<Contribution>, StoreError> {
        read_json(state, &keys::contribution_key(id))
    }

    pub fn put(state: &mut dyn StateAccess, contribution: &Contribution) -> Result<(), StoreError> {
        write_json(state, &keys::contribution_key(contribution.id), contribution)
    }

    /// Next id that will be assigned.
    pub fn next_id(state: &dyn StateAccess) -> Result<ContributionId, StoreError> {
        read_u64(state, keys::NEXT_CONTRIBUTION_ID_KEY)
    }

    /// Lazily walks a contributor's submissions in insertion order.
    pub fn list_by_contributor<'a>(
        state: &'a dyn StateAccess,
        contributor: &AccountId,
    ) -> Result<ContributionIter<'a>, StoreError> {
        let scan: ScanIter<'a> = state.prefix_scan(&keys::contributor_index_prefix(contributor))?;
        Ok(Box::new(scan.map(move |item| {
            let (key, _) = item?;
            let id = keys::id_from_index_key(&key).ok_or_else(|| StoreError::Decode {
                key: display_key(&key),
                reason: "index key lacks a contribution id".into(),
            })?;
            Self::get(state, id)?.ok_or_else(|| StoreError::Missing {
                key: display_key(&keys::contribution_key(id)),
            })
        })))
    }

    pub fn list<'a>(
        state: &'a dyn StateAccess,
        filter: ContributionFilter,
    ) -> Result<ContributionIter<'a>, StoreError> {
        let source: ContributionIter<'a> = match &filter.contributor {
            Some(contributor) => Self::list_by_contributor(state, contributor)?,
            None => {
                let scan: ScanIter<'a> = state.prefix_scan(keys::CONTRIBUTION_PREFIX)?;
                Box::new(scan.map(|item| {
                    let (key, value) = item?;
                    decode_json::<Contribution>(&key, &value)
                }))
            }
        };
        Ok(Box::new(source.filter(move |item| match item {
            Ok(contribution) => filter.matches(contribution),
            Err(_) => true,
        })))
    }
}

mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(D::Error::custom)
    }
}
