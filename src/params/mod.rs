//! Governance-controlled engine parameters.
//!
//! Fractions are basis points (10 000 = 1.0); amounts are base units.
//! [`Params::validate`] checks the whole set as one unit and
//! [`ParameterStore::set`] writes only a fully valid set.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ledger::Amount;
use crate::store::{display_key, keys, read_json, write_json, StateAccess, StoreError};

pub const BPS_DENOMINATOR: u32 = 10_000;

/// Closed set of contribution kinds the engine understands.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContributionType {
    Code,
    Documentation,
    Dataset,
    Research,
    Review,
    Design,
}

impl ContributionType {
    pub const ALL: [ContributionType; 6] = [
        ContributionType::Code,
        ContributionType::Documentation,
        ContributionType::Dataset,
        ContributionType::Research,
        ContributionType::Review,
        ContributionType::Design,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContributionType::Code => "code",
            ContributionType::Documentation => "documentation",
            ContributionType::Dataset => "dataset",
            ContributionType::Research => "research",
            ContributionType::Review => "review",
            ContributionType::Design => "design",
        }
    }
}

impl fmt::Display for ContributionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown contribution type {0:?}")]
pub struct UnknownContributionType(pub String);

impl FromStr for ContributionType {
    type Err = UnknownContributionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContributionType::ALL
            .into_iter()
            .find(|ctype| ctype.as_str() == s)
            .ok_or_else(|| UnknownContributionType(s.to_string()))
    }
}

/// Allow-list entry: a ctype is accepted only if a rule for it exists.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CtypeRule {
    pub ctype: ContributionType,
    #[serde(default)]
    pub requires_identity: bool,
    /// Credits the submitter must already hold.
    #[serde(default)]
    pub min_credits: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tier {
    pub name: String,
    pub min_credits: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Params {
    pub quorum_bps: u32,
    pub base_submission_fee: Amount,
    pub minimum_submission_fee: Amount,
    pub maximum_submission_fee: Amount,
    pub target_submissions_per_block: u64,
    pub max_cscore_discount_bps: u32,
    pub burn_ratio_bps: u32,
    pub burn_ratio_floor_bps: u32,
    pub burn_ratio_ceiling_bps: u32,
    pub base_reward_unit: u64,
    /// Largest share of a single withdrawal that may be newly minted when the
    /// reward pool cannot cover it.
    pub inflation_share_bps: u32,
    pub max_contributions_per_block: u64,
    pub ctype_rules: Vec<CtypeRule>,
    pub tiers: Vec<Tier>,
}

impl Default for Params {
    fn default() -> Self {
        let rule = |ctype, requires_identity| CtypeRule {
            ctype,
            requires_identity,
            min_credits: 0,
        };
        let tier = |name: &str, min_credits| Tier {
            name: name.to_string(),
            min_credits,
        };
        Self {
            quorum_bps: 6_667,
            base_submission_fee: 30_000,
            minimum_submission_fee: 3_000,
            maximum_submission_fee: 150_000,
            target_submissions_per_block: 5,
            max_cscore_discount_bps: 9_000,
            burn_ratio_bps: 5_000,
            burn_ratio_floor_bps: 1_000,
            burn_ratio_ceiling_bps: 9_000,
            base_reward_unit: 100,
            inflation_share_bps: 2_000,
            max_contributions_per_block: 100,
            ctype_rules: vec![
                rule(ContributionType::Code, false),
                rule(ContributionType::Documentation, false),
                rule(ContributionType::Dataset, true),
                rule(ContributionType::Research, true),
                rule(ContributionType::Review, false),
                rule(ContributionType::Design, false),
            ],
            tiers: vec![
                tier("bronze", 100),
                tier("silver", 500),
                tier("gold", 1_000),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("invalid quorum: {0} bps is outside (0, 10000]")]
    InvalidQuorum(u32),
    #[error(
        "invalid fee bounds: require 0 < minimum {minimum} <= base {base} <= maximum {maximum}"
    )]
    InvalidFee {
        minimum: Amount,
        base: Amount,
        maximum: Amount,
    },
    #[error("invalid target submissions per block: must be positive")]
    InvalidTarget,
    #[error("invalid max discount: {0} bps exceeds 10000")]
    InvalidDiscount(u32),
    #[error(
        "invalid burn ratio: require floor {floor} <= ratio {ratio} <= ceiling {ceiling} <= 10000"
    )]
    InvalidBurnRatio {
        ratio: u32,
        floor: u32,
        ceiling: u32,
    },
    #[error("invalid reward unit: must be positive")]
    InvalidRewardUnit,
    #[error("invalid inflation share: {0} bps exceeds 10000")]
    InvalidInflationShare(u32),
    #[error("invalid rate limit: max contributions per block must be positive")]
    InvalidRateLimit,
    #[error("invalid tiers: {0}")]
    InvalidTiers(String),
    #[error("duplicate rule for contribution type {0}")]
    DuplicateContributionType(ContributionType),
}

impl Params {
    pub fn validate(&self) -> Result<(), ParamError> {
        if self.quorum_bps == 0 || self.quorum_bps > BPS_DENOMINATOR {
            return Err(ParamError::InvalidQuorum(self.quorum_bps));
        }
        if self.minimum_submission_fee == 0
            || self.minimum_submission_fee > self.base_submission_fee
            || self.base_submission_fee > self.maximum_submission_fee
        {
            return Err(ParamError::InvalidFee {
                minimum: self.minimum_submission_fee,
                base: self.base_submission_fee,
                maximum: self.maximum_submission_fee,
            });
        }
        if self.target_submissions_per_block == 0 {
            return Err(ParamError::InvalidTarget);
        }
        if self.max_cscore_discount_bps > BPS_DENOMINATOR {
            return Err(ParamError::InvalidDiscount(self.max_cscore_discount_bps));
        }
        if self.burn_ratio_floor_bps > self.burn_ratio_ceiling_bps
            || self.burn_ratio_ceiling_bps > BPS_DENOMINATOR
            || self.burn_ratio_bps < self.burn_ratio_floor_bps
            || self.burn_ratio_bps > self.burn_ratio_ceiling_bps
        {
            return Err(ParamError::InvalidBurnRatio {
                ratio: self.burn_ratio_bps,
                floor: self.burn_ratio_floor_bps,
                ceiling: self.burn_ratio_ceiling_bps,
            });
        }
        if self.base_reward_unit == 0 {
            return Err(ParamError::InvalidRewardUnit);
        }
        if self.inflation_share_bps > BPS_DENOMINATOR {
            return Err(ParamError::InvalidInflationShare(self.inflation_share_bps));
        }
        if self.max_contributions_per_block == 0 {
            return Err(ParamError::InvalidRateLimit);
        }
        let mut seen = BTreeSet::new();
        for rule in &self.ctype_rules {
            if !seen.insert(rule.ctype) {
                return Err(ParamError::DuplicateContributionType(rule.ctype));
            }
        }
        self.validate_tiers()
    }

    fn validate_tiers(&self) -> Result<(), ParamError> {
        let mut names = BTreeSet::new();
        for (idx, tier) in self.tiers.iter().enumerate() {
            if tier.name.trim().is_empty() {
                return Err(ParamError::InvalidTiers(format!("tier {idx} has an empty name")));
            }
            if !names.insert(tier.name.as_str()) {
                return Err(ParamError::InvalidTiers(format!(
                    "tier name {} is repeated",
                    tier.name
                )));
            }
            if let Some(prev) = idx.checked_sub(1).and_then(|i| self.tiers.get(i)) {
                if tier.min_credits <= prev.min_credits {
                    return Err(ParamError::InvalidTiers(format!(
                        "cutoff for {} ({}) must exceed {} ({})",
                        tier.name, tier.min_credits, prev.name, prev.min_credits
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn rule_for(&self, ctype: ContributionType) -> Option<&CtypeRule> {
        self.ctype_rules.iter().find(|rule| rule.ctype == ctype)
    }

    /// Highest tier whose cutoff the balance reaches, if any.
    pub fn tier_for(&self, credits: u64) -> Option<&Tier> {
        self.tiers
            .iter()
            .rev()
            .find(|tier| credits >= tier.min_credits)
    }
}

/// Persists [`Params`] under a single key.
pub struct ParameterStore;

impl ParameterStore {
    pub fn get(state: &dyn StateAccess) -> Result<Params, StoreError> {
        read_json(state, keys::PARAMS_KEY)?.ok_or_else(|| StoreError::Missing {
            key: display_key(keys::PARAMS_KEY),
        })
    }

    /// Validates `params` as one unit; on error nothing is written.
    pub fn set(state: &mut dyn StateAccess, params: &Params) -> Result<(), ParamSetError> {
        params.validate()?;
        write_json(state, keys::PARAMS_KEY, params)?;
        info!(
            quorum_bps = params.quorum_bps,
            base_fee = params.base_submission_fee,
            burn_ratio_bps = params.burn_ratio_bps,
            "parameters updated"
        );
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParamSetError {
    #[error(transparent)]
    Invalid(#[from] ParamError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    #[test]
    fn defaults_are_valid() {
        Params::default().validate().unwrap();
    }

    #[test]
    fn ctype_parses_from_wire_names() {
        assert_eq!("code".parse::<ContributionType>().unwrap(), ContributionType::Code);
        assert_eq!(
            "dataset".parse::<ContributionType>().unwrap(),
            ContributionType::Dataset
        );
        assert!("".parse::<ContributionType>().is_err());
        assert!("Code".parse::<ContributionType>().is_err());
        assert!("memes".parse::<ContributionType>().is_err());
    }

    fn invalid(mutate: impl FnOnce(&mut Params)) -> ParamError {
        let mut params = Params::default();
        mutate(&mut params);
        params.validate().unwrap_err()
    }

    #[test]
    fn each_invalid_field_is_reported() {
        assert_eq!(
            invalid(|p| p.quorum_bps = 15_000),
            ParamError::InvalidQuorum(15_000)
        );
        assert_eq!(invalid(|p| p.quorum_bps = 0), ParamError::InvalidQuorum(0));
        assert!(matches!(
            invalid(|p| p.minimum_submission_fee = 40_000),
            ParamError::InvalidFee { .. }
        ));
        assert!(matches!(
            invalid(|p| p.maximum_submission_fee = 20_000),
            ParamError::InvalidFee { .. }
        ));
        assert!(matches!(
            invalid(|p| p.burn_ratio_bps = 9_500),
            ParamError::InvalidBurnRatio { .. }
        ));
        assert!(matches!(
            invalid(|p| p.burn_ratio_ceiling_bps = 12_000),
            ParamError::InvalidBurnRatio { .. }
        ));
        assert_eq!(
            invalid(|p| p.base_reward_unit = 0),
            ParamError::InvalidRewardUnit
        );
        assert_eq!(
            invalid(|p| p.inflation_share_bps = 10_001),
            ParamError::InvalidInflationShare(10_001)
        );
        assert_eq!(
            invalid(|p| p.target_submissions_per_block = 0),
            ParamError::InvalidTarget
        );
        assert_eq!(
            invalid(|p| p.max_contributions_per_block = 0),
            ParamError::InvalidRateLimit
        );
        assert!(matches!(
            invalid(|p| p.tiers[1].min_credits = 100),
            ParamError::InvalidTiers(_)
        ));
    }

    #[test]
    fn quorum_of_exactly_one_is_accepted() {
        let params = Params {
            quorum_bps: BPS_DENOMINATOR,
            ..Params::default()
        };
        params.validate().unwrap();
    }

    #[test]
    fn duplicate_ctype_rules_are_rejected() {
        let mut params = Params::default();
        params.ctype_rules.push(CtypeRule {
            ctype: ContributionType::Code,
            requires_identity: true,
            min_credits: 0,
        });
        assert_eq!(
            params.validate().unwrap_err(),
            ParamError::DuplicateContributionType(ContributionType::Code)
        );
    }

    #[test]
    fn invalid_write_leaves_previous_params() {
        let mut store = MemStore::new();
        let original = Params::default();
        ParameterStore::set(&mut store, &original).unwrap();

        let bad = Params {
            quorum_bps: 15_000,
            base_submission_fee: 1,
            ..original.clone()
        };
        let err = ParameterStore::set(&mut store, &bad).unwrap_err();
        assert!(matches!(
            err,
            ParamSetError::Invalid(ParamError::InvalidQuorum(15_000))
        ));
        assert_eq!(ParameterStore::get(&store).unwrap(), original);
    }

    #[test]
    fn tier_lookup_picks_highest_reached_band() {
        let params = Params::default();
        assert_eq!(params.tier_for(0), None);
        assert_eq!(params.tier_for(99), None);
        assert_eq!(params.tier_for(100).unwrap().name, "bronze");
        assert_eq!(params.tier_for(999).unwrap().name, "silver");
        assert_eq!(params.tier_for(5_000).unwrap().name, "gold");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let params: Params = serde_json::from_str(r#"{"quorum_bps": 5000}"#).unwrap();
        assert_eq!(params.quorum_bps, 5_000);
        assert_eq!(params.base_submission_fee, 30_000);
        params.validate().unwrap();
    }
}
