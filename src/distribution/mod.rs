//! F1 fee distribution: per-validator reward accounting that lets every
//! delegator's pending reward be computed in O(1), independent of how many
//! other delegators share that validator.
//!
//! Staking calls into this module at the points spec.md designates a
//! share-price-changing event (delegate, undelegate, slash, commission
//! change) via [`Distribution::increment_validator_period`]; it never
//! reaches back into staking's internals (see the design notes on
//! breaking the staking/distribution/slashing cycle with narrow, one-way
//! hook surfaces).

use std::collections::BTreeMap;

use crate::coins::{Accounts, Address, Amount, Decimal};
use crate::collections::Map;
use crate::error::Error;
use crate::plugins::Validators;
use crate::state::{Attacher, Flusher, Loader, State};
use crate::store::Store;
use crate::Result;

#[derive(Clone, Copy, Debug, Default)]
pub struct CurrentRewards {
    pub rewards: Decimal,
    pub period: u64,
}

impl State for CurrentRewards {
    fn attach(&mut self, _store: Store) -> Result<()> {
        Ok(())
    }
    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.rewards)?
            .flush_child(self.period)?;
        Ok(())
    }
    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(CurrentRewards {
            rewards: loader.load_child()?,
            period: loader.load_child()?,
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HistoricalRewards {
    pub cumulative_reward_ratio: Decimal,
    pub reference_count: u16,
}

impl State for HistoricalRewards {
    fn attach(&mut self, _store: Store) -> Result<()> {
        Ok(())
    }
    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.cumulative_reward_ratio)?
            .flush_child(self.reference_count)?;
        Ok(())
    }
    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(HistoricalRewards {
            cumulative_reward_ratio: loader.load_child()?,
            reference_count: loader.load_child()?,
        })
    }
}

/// Recorded when a validator is slashed so delegators whose starting
/// period predates the slash still pick up the reduction the next time
/// they withdraw (spec.md 4.2.6).
#[derive(Clone, Copy, Debug, Default)]
pub struct SlashEvent {
    pub period: u64,
    pub fraction: Decimal,
}

impl State for SlashEvent {
    fn attach(&mut self, _store: Store) -> Result<()> {
        Ok(())
    }
    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.period)?
            .flush_child(self.fraction)?;
        Ok(())
    }
    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(SlashEvent {
            period: loader.load_child()?,
            fraction: loader.load_child()?,
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DelegatorStartingInfo {
    pub previous_period: u64,
    pub stake: Decimal,
    pub creation_height: u64,
}

impl State for DelegatorStartingInfo {
    fn attach(&mut self, _store: Store) -> Result<()> {
        Ok(())
    }
    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.previous_period)?
            .flush_child(self.stake)?
            .flush_child(self.creation_height)?;
        Ok(())
    }
    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(DelegatorStartingInfo {
            previous_period: loader.load_child()?,
            stake: loader.load_child()?,
            creation_height: loader.load_child()?,
        })
    }
}

/// `(delegator, validator)`, the composite key for starting-info and vote
/// records throughout distribution and governance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, ed::Encode, ed::Decode)]
pub struct DelegationKey {
    pub delegator: Address,
    pub validator: Address,
}

pub struct ValidatorDistInfo {
    pub current_rewards: CurrentRewards,
    pub historical_rewards: Map<u64, HistoricalRewards>,
    pub slash_events: Map<u64, SlashEvent>,
    pub accumulated_commission: Decimal,
    pub outstanding_rewards: Decimal,
}

impl Default for ValidatorDistInfo {
    fn default() -> Self {
        ValidatorDistInfo {
            current_rewards: CurrentRewards {
                rewards: Decimal::zero(),
                period: 1,
            },
            historical_rewards: Map::default(),
            slash_events: Map::default(),
            accumulated_commission: Decimal::zero(),
            outstanding_rewards: Decimal::zero(),
        }
    }
}

impl State for ValidatorDistInfo {
    fn attach(&mut self, store: Store) -> Result<()> {
        Attacher::new(store)
            .attach_child(&mut self.current_rewards)?
            .attach_child(&mut self.historical_rewards)?
            .attach_child(&mut self.slash_events)?
            .attach_child(&mut self.accumulated_commission)?
            .attach_child(&mut self.outstanding_rewards)?;
        Ok(())
    }

    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.current_rewards)?
            .flush_child(self.historical_rewards)?
            .flush_child(self.slash_events)?
            .flush_child(self.accumulated_commission)?
            .flush_child(self.outstanding_rewards)?;
        Ok(())
    }

    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(ValidatorDistInfo {
            current_rewards: loader.load_child()?,
            historical_rewards: loader.load_child()?,
            slash_events: loader.load_child()?,
            accumulated_commission: loader.load_child()?,
            outstanding_rewards: loader.load_child()?,
        })
    }
}

#[derive(Default)]
pub struct Distribution {
    pub validators: Map<Address, ValidatorDistInfo>,
    pub delegator_starting_info: Map<DelegationKey, DelegatorStartingInfo>,
    pub community_pool: Decimal,
    pub previous_proposer: Option<Address>,
}

impl State for Distribution {
    fn attach(&mut self, store: Store) -> Result<()> {
        Attacher::new(store)
            .attach_child(&mut self.validators)?
            .attach_child(&mut self.delegator_starting_info)?
            .attach_child(&mut self.community_pool)?
            .attach_child(&mut self.previous_proposer)?;
        Ok(())
    }

    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.validators)?
            .flush_child(self.delegator_starting_info)?
            .flush_child(self.community_pool)?
            .flush_child(self.previous_proposer)?;
        Ok(())
    }

    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(Distribution {
            validators: loader.load_child()?,
            delegator_starting_info: loader.load_child()?,
            community_pool: loader.load_child()?,
            previous_proposer: loader.load_child()?,
        })
    }
}

/// What distribution needs to read from staking on every call — a narrow,
/// one-directional view so distribution never reaches back into staking's
/// storage layout (spec.md's "hooks with explicit ordering" design note).
pub trait StakingView {
    fn validator_tokens(&self, validator: Address) -> Result<Amount>;
    fn validator_commission_rate(&self, validator: Address) -> Result<Decimal>;
    fn validator_operator_addresses(&self) -> Result<Vec<Address>>;
}

impl Distribution {
    fn validator_mut(&mut self, validator: Address) -> Result<crate::collections::map::ChildMut<'_, Address, ValidatorDistInfo>> {
        self.validators.get_mut_or_insert_default(validator)
    }

    /// spec.md 4.2.4: ends the validator's current reward epoch, folding
    /// its accumulated per-share reward into a new historical entry, and
    /// starts a fresh one. Returns the period number that just ended.
    pub fn increment_validator_period(
        &mut self,
        validator: Address,
        staking: &impl StakingView,
    ) -> Result<u64> {
        let tokens = staking.validator_tokens(validator)?;
        let mut info = self.validator_mut(validator)?;

        let current = if tokens.is_zero() {
            self.community_pool = self.community_pool.checked_add(info.current_rewards.rewards)?;
            Decimal::zero()
        } else {
            info.current_rewards.rewards / Decimal::from(tokens)
        };

        let ended_period = info.current_rewards.period;
        let previous = info
            .historical_rewards
            .get(ended_period - 1)?
            .unwrap_or_default();
        let cumulative = previous.cumulative_reward_ratio.checked_add(current)?;
        info.historical_rewards.insert(
            ended_period,
            HistoricalRewards {
                cumulative_reward_ratio: cumulative,
                reference_count: 1,
            },
        )?;

        if ended_period >= 1 {
            Self::decrement_reference_count(&mut info.historical_rewards, ended_period - 1)?;
        }

        info.current_rewards = CurrentRewards {
            rewards: Decimal::zero(),
            period: ended_period + 1,
        };

        Ok(ended_period)
    }

    fn decrement_reference_count(historical: &mut Map<u64, HistoricalRewards>, period: u64) -> Result<()> {
        if let Some(mut entry) = historical.get_mut(period)? {
            if entry.reference_count > 0 {
                entry.reference_count -= 1;
            }
            let count = entry.reference_count;
            drop(entry);
            if count == 0 {
                historical.remove(period)?;
            }
        }
        Ok(())
    }

    /// spec.md 4.2.3: splits an incoming reward between the validator's
    /// commission and its delegators' shared pot.
    pub fn allocate_tokens_to_validator(
        &mut self,
        validator: Address,
        reward: Decimal,
        staking: &impl StakingView,
    ) -> Result<()> {
        let rate = staking.validator_commission_rate(validator)?;
        let commission = reward * rate;
        let shared = reward.checked_sub(commission)?;

        let mut info = self.validator_mut(validator)?;
        info.accumulated_commission = info.accumulated_commission.checked_add(commission)?;
        info.current_rewards.rewards = info.current_rewards.rewards.checked_add(shared)?;
        info.outstanding_rewards = info.outstanding_rewards.checked_add(reward)?;
        Ok(())
    }

    /// spec.md 4.2.2: BeginBlock allocation of the previous block's fees
    /// among the previous proposer, precommit-signing validators, and the
    /// community pool.
    pub fn allocate_fees(
        &mut self,
        fees: Decimal,
        votes: &Validators,
        params: &crate::params::DistributionParams,
        staking: &impl StakingView,
    ) -> Result<()> {
        let total_power = votes.total_power();
        if total_power == 0 {
            self.community_pool = self.community_pool.checked_add(fees)?;
            return Ok(());
        }

        let precommit_power = votes.signed_power();
        let fraction = Decimal::from_ratio(precommit_power as i64, total_power as i64)?;
        let proposer_multiplier = params
            .base_proposer_reward
            .checked_add(params.bonus_proposer_reward.checked_mul(fraction)?)?;

        let mut remaining = fees;

        if let Some(proposer) = votes.proposer {
            let proposer_reward = fees * proposer_multiplier;
            if staking.validator_operator_addresses()?.contains(&proposer) {
                self.allocate_tokens_to_validator(proposer, proposer_reward, staking)?;
                remaining = remaining.checked_sub(proposer_reward)?;
            } else {
                log::warn!("previous proposer {proposer} is no longer a known validator, skipping proposer reward");
            }
        }

        let community_tax = params.community_tax;
        let vote_multiplier = Decimal::one()
            .checked_sub(proposer_multiplier)?
            .checked_sub(community_tax)?;

        for vote in votes.votes.iter().filter(|v| v.signed) {
            let power_fraction = Decimal::from_ratio(vote.power as i64, total_power as i64)?;
            let reward = fees * vote_multiplier * power_fraction;
            self.allocate_tokens_to_validator(vote.address, reward, staking)?;
            remaining = remaining.checked_sub(reward)?;
        }

        self.community_pool = self.community_pool.checked_add(remaining)?;
        Ok(())
    }

    pub fn set_delegator_starting_info(
        &mut self,
        validator: Address,
        delegator: Address,
        period: u64,
        stake: Decimal,
        height: u64,
    ) -> Result<()> {
        if let Some(mut entry) = self
            .validators
            .get_mut(validator)?
        {
            entry.historical_rewards.get_mut_or_insert_default(period)?.reference_count += 1;
        }
        self.delegator_starting_info.insert(
            DelegationKey { delegator, validator },
            DelegatorStartingInfo {
                previous_period: period,
                stake,
                creation_height: height,
            },
        )
    }

    /// spec.md 4.2.6: records that `validator` was slashed by `fraction` so
    /// a delegation spanning the slash picks up the reduction on withdraw.
    pub fn record_slash_event(
        &mut self,
        validator: Address,
        height: u64,
        fraction: Decimal,
        staking: &impl StakingView,
    ) -> Result<()> {
        let period = self.increment_validator_period(validator, staking)?;
        let mut info = self.validator_mut(validator)?;
        info.slash_events.insert(height, SlashEvent { period, fraction })?;
        info.historical_rewards.get_mut_or_insert_default(period)?.reference_count += 1;
        Ok(())
    }

    /// Computes the reward owed for a delegation spanning
    /// `(starting_info.creation_height, now]`, applying any slash events
    /// recorded in that window in order (spec.md 4.2.6), without ever
    /// touching another delegator's record.
    fn calculate_delegation_rewards(
        &mut self,
        validator: Address,
        key: DelegationKey,
        ending_period: u64,
    ) -> Result<Decimal> {
        let starting_info = match self.delegator_starting_info.get(key)? {
            Some(info) => info,
            None => return Ok(Decimal::zero()),
        };

        let mut stake = starting_info.stake;
        let mut previous_period = starting_info.previous_period;

        let slash_heights: Vec<u64> = {
            let info = self.validators.get(validator)?.unwrap_or_default();
            let mut heights = vec![];
            for (height, _) in info.slash_events.iter()? {
                if height > starting_info.creation_height {
                    heights.push(height);
                }
            }
            heights.sort_unstable();
            heights
        };

        let mut total = Decimal::zero();
        for height in slash_heights {
            let event = {
                let info = self.validators.get(validator)?.unwrap_or_default();
                info.slash_events.get(height)?
            };
            let event = match event {
                Some(e) => e,
                None => continue,
            };
            if event.period > ending_period {
                continue;
            }
            total = total.checked_add(self.reward_between(validator, previous_period, event.period, stake)?)?;
            let remaining_fraction = Decimal::one().checked_sub(event.fraction)?;
            stake = (stake * remaining_fraction).to_amount_floor().map(Decimal::from).unwrap_or(Decimal::zero());
            previous_period = event.period;
        }

        total = total.checked_add(self.reward_between(validator, previous_period, ending_period, stake)?)?;
        Ok(total)
    }

    fn reward_between(&self, validator: Address, start: u64, end: u64, stake: Decimal) -> Result<Decimal> {
        let info = self.validators.get(validator)?.unwrap_or_default();
        let starting = info.historical_rewards.get(start)?.unwrap_or_default();
        let ending = info.historical_rewards.get(end)?.unwrap_or_default();
        let difference = ending
            .cumulative_reward_ratio
            .checked_sub(starting.cumulative_reward_ratio)?;
        Ok(stake * difference)
    }

    /// spec.md 4.2.5: pays a delegator's pending reward to its withdraw
    /// address, clearing and re-initializing its starting-info record.
    pub fn withdraw_delegation_reward(
        &mut self,
        validator: Address,
        delegator: Address,
        delegator_shares: Decimal,
        height: u64,
        accounts: &mut Accounts,
        staking: &impl StakingView,
    ) -> Result<Amount> {
        let key = DelegationKey { delegator, validator };
        let ending_period = self.increment_validator_period(validator, staking)?;
        let reward_raw = self.calculate_delegation_rewards(validator, key, ending_period)?;

        let mut info = self.validator_mut(validator)?;
        let reward = if reward_raw > info.outstanding_rewards {
            info.outstanding_rewards
        } else {
            reward_raw
        };
        let amount = reward.to_amount_floor()?;
        let paid = Decimal::from(amount);
        let remainder = reward.checked_sub(paid)?;
        info.outstanding_rewards = info.outstanding_rewards.checked_sub(reward)?;
        drop(info);
        self.community_pool = self.community_pool.checked_add(remainder)?;

        if let Some(starting) = self.delegator_starting_info.remove(key)? {
            self.validator_mut(validator)
                .ok()
                .map(|mut info| {
                    let _ = Self::decrement_reference_count(&mut info.historical_rewards, starting.previous_period);
                });
        }

        if !delegator_shares.is_zero() {
            let new_period = self.validator_mut(validator)?.current_rewards.period;
            self.set_delegator_starting_info(validator, delegator, new_period, delegator_shares, height)?;
        }

        let withdraw_to = accounts.withdraw_address(delegator)?;
        accounts.deposit(withdraw_to, amount)?;
        Ok(amount)
    }

    /// Commission withdrawal: drains `accumulated_commission`, truncates,
    /// credits liquid tokens, leaves the decimal remainder in place.
    pub fn withdraw_validator_commission(
        &mut self,
        validator: Address,
        accounts: &mut Accounts,
    ) -> Result<Amount> {
        let mut info = self.validator_mut(validator)?;
        let amount = info.accumulated_commission.to_amount_floor()?;
        let paid = Decimal::from(amount);
        info.accumulated_commission = info.accumulated_commission.checked_sub(paid)?;
        info.outstanding_rewards = info.outstanding_rewards.checked_sub(paid)?;
        drop(info);

        let withdraw_to = accounts.withdraw_address(validator)?;
        accounts.deposit(withdraw_to, amount)?;
        Ok(amount)
    }

    pub fn outstanding_rewards(&self, validator: Address) -> Result<Decimal> {
        Ok(self.validators.get(validator)?.unwrap_or_default().outstanding_rewards)
    }

    pub fn accumulated_commission(&self, validator: Address) -> Result<Decimal> {
        Ok(self.validators.get(validator)?.unwrap_or_default().accumulated_commission)
    }
}

pub fn fees_per_block(fees: &BTreeMap<Address, Amount>) -> Decimal {
    let total: Amount = fees.values().copied().sum();
    Decimal::from(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MapStore;

    struct FixedStaking {
        tokens: Amount,
        rate: Decimal,
    }

    impl StakingView for FixedStaking {
        fn validator_tokens(&self, _validator: Address) -> Result<Amount> {
            Ok(self.tokens)
        }
        fn validator_commission_rate(&self, _validator: Address) -> Result<Decimal> {
            Ok(self.rate)
        }
        fn validator_operator_addresses(&self) -> Result<Vec<Address>> {
            Ok(vec![])
        }
    }

    fn setup() -> (Distribution, Address) {
        let mut dist = Distribution::default();
        dist.attach(Store::new(MapStore::new())).unwrap();
        (dist, Address::from_pubkey([9; 33]))
    }

    #[test]
    fn allocate_and_increment_period() {
        let (mut dist, validator) = setup();
        let staking = FixedStaking {
            tokens: Amount::new(100),
            rate: Decimal::zero(),
        };
        dist.allocate_tokens_to_validator(validator, Decimal::from(Amount::new(10)), &staking)
            .unwrap();
        let period = dist.increment_validator_period(validator, &staking).unwrap();
        assert_eq!(period, 1);
        let info = dist.validators.get(validator).unwrap().unwrap();
        assert_eq!(info.current_rewards.period, 2);
    }

    #[test]
    fn delegator_withdrawal_pays_proportional_reward() {
        let (mut dist, validator) = setup();
        let staking = FixedStaking {
            tokens: Amount::new(150),
            rate: Decimal::zero(),
        };
        let delegator = Address::from_pubkey([10; 33]);
        let mut accounts = Accounts::default();
        accounts.attach(Store::new(MapStore::new())).unwrap();

        dist.set_delegator_starting_info(validator, delegator, 1, Decimal::from(Amount::new(50)), 0)
            .unwrap();
        dist.allocate_tokens_to_validator(validator, Decimal::from(Amount::new(15)), &staking)
            .unwrap();

        let paid = dist
            .withdraw_delegation_reward(validator, delegator, Decimal::from(Amount::new(50)), 0, &mut accounts, &staking)
            .unwrap();
        assert_eq!(paid, Amount::new(5));
    }
}
