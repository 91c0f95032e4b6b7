//! Three-layer submission pricing.
//!
//! ```text
//! epoch_multiplier = clamp(submissions / target, 0.8, 5.0)
//! cscore_discount  = min(max_discount, credits / 1000)
//! fee              = max(base * epoch_multiplier * (1 - cscore_discount), minimum)
//! ```
//!
//! Everything is integer arithmetic on `u128` with a single floor at the end,
//! so every replica arrives at the same amount.

use serde::{Deserialize, Serialize};

use crate::ledger::Amount;
use crate::params::{Params, BPS_DENOMINATOR};

/// Credits needed for a full 1.0 discount before the cap applies.
pub const CREDITS_PER_FULL_DISCOUNT: u64 = 1_000;

const MULTIPLIER_FLOOR: (u64, u64) = (4, 5);
const MULTIPLIER_CEILING: (u64, u64) = (5, 1);

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub fee: Amount,
    /// Congestion multiplier as the exact fraction `num / den`.
    pub multiplier_num: u64,
    pub multiplier_den: u64,
    pub discount_bps: u32,
    pub floored: bool,
}

fn epoch_multiplier(submissions: u64, target: u64) -> (u64, u64) {
    if target == 0 {
        return MULTIPLIER_CEILING;
    }
    let (floor_num, floor_den) = MULTIPLIER_FLOOR;
    // submissions / target < 4 / 5
    if (submissions as u128) * (floor_den as u128) < (target as u128) * (floor_num as u128) {
        return MULTIPLIER_FLOOR;
    }
    if (submissions as u128) > (target as u128) * (MULTIPLIER_CEILING.0 as u128) {
        return MULTIPLIER_CEILING;
    }
    (submissions, target)
}

fn cscore_discount_bps(credits: u64, max_discount_bps: u32) -> u32 {
    // credits / 1000 expressed in bps is credits * 10
    let scale = (BPS_DENOMINATOR as u64 / CREDITS_PER_FULL_DISCOUNT) as u128;
    let raw = credits as u128 * scale;
    raw.min(max_discount_bps.min(BPS_DENOMINATOR) as u128) as u32
}

/// `floor(a * num / den)` without intermediate overflow for `num <= 5 * den`.
fn mul_div_floor(a: u128, num: u64, den: u64) -> u128 {
    let (num, den) = (num as u128, den as u128);
    (a / den)
        .saturating_mul(num)
        .saturating_add((a % den).saturating_mul(num) / den)
}

/// Computes the submission fee. Total for any validated `Params`.
pub fn compute_fee(params: &Params, credits: u64, submissions_this_block: u64) -> FeeBreakdown {
    let (multiplier_num, multiplier_den) =
        epoch_multiplier(submissions_this_block, params.target_submissions_per_block);
    let discount_bps = cscore_discount_bps(credits, params.max_cscore_discount_bps);

    let discounted = params.base_submission_fee as u128 * (BPS_DENOMINATOR - discount_bps) as u128;
    let scaled =
        mul_div_floor(discounted, multiplier_num, multiplier_den) / BPS_DENOMINATOR as u128;
    let scaled = u64::try_from(scaled).unwrap_or(u64::MAX);

    let floored = scaled < params.minimum_submission_fee;
    FeeBreakdown {
        fee: scaled.max(params.minimum_submission_fee),
        multiplier_num,
        multiplier_den,
        discount_bps,
        floored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_params() -> Params {
        Params {
            base_submission_fee: 30_000,
            target_submissions_per_block: 5,
            max_cscore_discount_bps: 9_000,
            minimum_submission_fee: 3_000,
            ..Params::default()
        }
    }

    #[test]
    fn reference_points() {
        let params = reference_params();
        assert_eq!(compute_fee(&params, 0, 5).fee, 30_000);
        assert_eq!(compute_fee(&params, 1_000, 5).fee, 3_000);
        assert_eq!(compute_fee(&params, 500, 25).fee, 75_000);
        assert_eq!(compute_fee(&params, 0, 0).fee, 24_000);
    }

    #[test]
    fn multiplier_clamps_at_both_ends() {
        let params = reference_params();
        let idle = compute_fee(&params, 0, 3);
        assert_eq!((idle.multiplier_num, idle.multiplier_den), (4, 5));
        assert_eq!(idle.fee, 24_000);

        let busy = compute_fee(&params, 0, 1_000);
        assert_eq!((busy.multiplier_num, busy.multiplier_den), (5, 1));
        assert_eq!(busy.fee, 150_000);

        // 4 / 5 is inside the band and stays exact
        let edge = compute_fee(&params, 0, 4);
        assert_eq!(edge.fee, 24_000);
        let third = compute_fee(&params, 0, 7);
        assert_eq!(third.fee, 42_000);
    }

    #[test]
    fn non_terminating_ratio_floors_once() {
        let params = Params {
            base_submission_fee: 10_000,
            minimum_submission_fee: 1,
            target_submissions_per_block: 3,
            ..Params::default()
        };
        // 10000 * 4/3 = 13333.33..
        assert_eq!(compute_fee(&params, 0, 4).fee, 13_333);
        // 10000 * 4/3 * (1 - 0.001) = 13320.0
        assert_eq!(compute_fee(&params, 1, 4).fee, 13_320);
    }

    #[test]
    fn discount_is_capped() {
        let params = reference_params();
        let quote = compute_fee(&params, 1_000_000, 5);
        assert_eq!(quote.discount_bps, 9_000);
        assert_eq!(quote.fee, 3_000);

        let uncapped = Params {
            max_cscore_discount_bps: BPS_DENOMINATOR,
            ..reference_params()
        };
        let free = compute_fee(&uncapped, 2_000, 5);
        assert_eq!(free.discount_bps, 10_000);
        assert!(free.floored);
        assert_eq!(free.fee, 3_000);
    }

    #[test]
    fn extreme_inputs_do_not_panic() {
        let params = Params {
            base_submission_fee: u64::MAX,
            minimum_submission_fee: 1,
            maximum_submission_fee: u64::MAX,
            target_submissions_per_block: u64::MAX,
            ..Params::default()
        };
        let quote = compute_fee(&params, u64::MAX, u64::MAX);
        assert!(quote.fee >= 1);
        let quote = compute_fee(&params, 0, u64::MAX - 1);
        assert!(quote.fee > 0);

        let tiny_target = Params {
            base_submission_fee: u64::MAX,
            minimum_submission_fee: 1,
            maximum_submission_fee: u64::MAX,
            target_submissions_per_block: 1,
            ..Params::default()
        };
        assert_eq!(compute_fee(&tiny_target, 0, u64::MAX).fee, u64::MAX);
    }
}
