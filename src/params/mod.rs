//! Per-module typed configuration.
//!
//! No message in this chain's wire format amends a parameter at runtime
//! (there is no `MsgUpdateParams`), so parameters are a plain, namespaced
//! Rust value built once at `InitChain` from genesis and held by `App` —
//! not a `State` tree of their own. If a future governance proposal type
//! needs to amend them, `Params` is the seam: wrap it in `State` and give
//! `App` a child slot the way every other module gets one.

use crate::coins::{Amount, Decimal};

#[derive(Clone, Copy, Debug)]
pub struct StakingParams {
    pub unbonding_period_seconds: i64,
    pub redelegation_period_seconds: i64,
    pub max_validators: u32,
    pub max_entries: u32,
}

impl Default for StakingParams {
    fn default() -> Self {
        StakingParams {
            unbonding_period_seconds: 3 * 7 * 24 * 60 * 60,
            redelegation_period_seconds: 3 * 7 * 24 * 60 * 60,
            max_validators: 100,
            max_entries: 7,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DistributionParams {
    pub community_tax: Decimal,
    pub base_proposer_reward: Decimal,
    pub bonus_proposer_reward: Decimal,
}

impl Default for DistributionParams {
    fn default() -> Self {
        DistributionParams {
            community_tax: decimal_pct(2),
            base_proposer_reward: decimal_pct(1),
            bonus_proposer_reward: decimal_pct(4),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SlashingParams {
    pub signed_blocks_window: u64,
    pub min_signed_per_window: Decimal,
    pub downtime_jail_duration_seconds: i64,
    pub slash_fraction_double_sign: Decimal,
    pub slash_fraction_downtime: Decimal,
    pub max_evidence_age_seconds: i64,
    pub validator_update_delay: u64,
}

impl Default for SlashingParams {
    fn default() -> Self {
        SlashingParams {
            signed_blocks_window: 10_000,
            min_signed_per_window: decimal_pct(50),
            downtime_jail_duration_seconds: 10 * 60,
            slash_fraction_double_sign: decimal_ratio(1, 20),
            slash_fraction_downtime: decimal_ratio(1, 10_000),
            max_evidence_age_seconds: 3 * 7 * 24 * 60 * 60,
            validator_update_delay: 1,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GovernanceParams {
    pub min_deposit: Amount,
    pub max_deposit_period_seconds: i64,
    pub voting_period_seconds: i64,
    pub quorum: Decimal,
    pub threshold: Decimal,
    pub veto_threshold: Decimal,
}

impl Default for GovernanceParams {
    fn default() -> Self {
        GovernanceParams {
            min_deposit: Amount::new(10_000_000),
            max_deposit_period_seconds: 2 * 7 * 24 * 60 * 60,
            voting_period_seconds: 2 * 7 * 24 * 60 * 60,
            quorum: decimal_permille(334),
            threshold: decimal_pct(50),
            veto_threshold: decimal_permille(334),
        }
    }
}

fn decimal_pct(pct: i64) -> Decimal {
    Decimal::from_ratio(pct, 100).expect("nonzero denominator")
}

fn decimal_permille(permille: i64) -> Decimal {
    Decimal::from_ratio(permille, 1000).expect("nonzero denominator")
}

fn decimal_ratio(num: i64, denom: i64) -> Decimal {
    Decimal::from_ratio(num, denom).expect("nonzero denominator")
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Params {
    pub staking: StakingParams,
    pub distribution: DistributionParams,
    pub slashing: SlashingParams,
    pub governance: GovernanceParams,
}
