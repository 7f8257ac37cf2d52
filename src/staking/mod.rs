//! Validators, delegations, the power-ranked selection index, and the
//! unbonding/redelegation maturation queues.
//!
//! Staking never calls into distribution or slashing directly — `app.rs`
//! orchestrates the fixed ordering spec.md's design notes call for
//! (incrementing a validator's reward period before any share-price-
//! changing event; distribution before slashing on every hook point) by
//! calling this module's plain accessor/mutator methods in the right
//! order itself. [`SlashAdapter`] is the one exception: executing a slash
//! needs a single call that touches both staking and distribution, so it
//! gets a narrow struct bundling a mutable handle to each.

pub mod validator;

pub use validator::{power_to_tokens, Commission, Delegation, Status, Validator};

use crate::coins::{Address, Amount, Decimal};
use crate::collections::{Deque, Entry, EntryMap, Map};
use crate::distribution::{Distribution, StakingView};
use crate::error::Error;
use crate::slashing::StakingHandle;
use crate::state::{Attacher, Flusher, Loader, State};
use crate::store::Store;
use crate::Result;

#[derive(Clone, Copy, Debug, Default)]
pub struct StakePool {
    pub bonded_tokens: Amount,
    pub not_bonded_tokens: Amount,
}

impl State for StakePool {
    fn attach(&mut self, _store: Store) -> Result<()> {
        Ok(())
    }
    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.bonded_tokens)?
            .flush_child(self.not_bonded_tokens)?;
        Ok(())
    }
    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(StakePool {
            bonded_tokens: loader.load_child()?,
            not_bonded_tokens: loader.load_child()?,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, ed::Encode, ed::Decode)]
pub struct DelegationKey {
    pub delegator: Address,
    pub validator: Address,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, ed::Encode, ed::Decode)]
pub struct RedelegationKey {
    pub delegator: Address,
    pub src: Address,
    pub dst: Address,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UnbondingEntry {
    pub creation_height: u64,
    pub completion_time: i64,
    pub initial_balance: Amount,
    pub balance: Amount,
}

impl State for UnbondingEntry {
    fn attach(&mut self, _store: Store) -> Result<()> {
        Ok(())
    }
    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.creation_height)?
            .flush_child(self.completion_time)?
            .flush_child(self.initial_balance)?
            .flush_child(self.balance)?;
        Ok(())
    }
    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(UnbondingEntry {
            creation_height: loader.load_child()?,
            completion_time: loader.load_child()?,
            initial_balance: loader.load_child()?,
            balance: loader.load_child()?,
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RedelegationEntry {
    pub creation_height: u64,
    pub completion_time: i64,
    pub initial_balance: Amount,
    pub shares_dst: Decimal,
}

impl State for RedelegationEntry {
    fn attach(&mut self, _store: Store) -> Result<()> {
        Ok(())
    }
    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.creation_height)?
            .flush_child(self.completion_time)?
            .flush_child(self.initial_balance)?
            .flush_child(self.shares_dst)?;
        Ok(())
    }
    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(RedelegationEntry {
            creation_height: loader.load_child()?,
            completion_time: loader.load_child()?,
            initial_balance: loader.load_child()?,
            shares_dst: loader.load_child()?,
        })
    }
}

/// Every unbonding in the chain shares the same `unbonding_period`
/// parameter, so entries mature in the order they were created — a plain
/// FIFO queue of `(key, completion_time)` pairs is enough to find "every
/// entry matured as of now" at EndBlock without a time-indexed tree.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnbondingMaturation {
    pub key: DelegationKey,
    pub completion_time: i64,
}

impl State for UnbondingMaturation {
    fn attach(&mut self, _store: Store) -> Result<()> {
        Ok(())
    }
    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.key.delegator)?
            .flush_child(self.key.validator)?
            .flush_child(self.completion_time)?;
        Ok(())
    }
    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        let delegator = loader.load_child()?;
        let validator = loader.load_child()?;
        let completion_time = loader.load_child()?;
        Ok(UnbondingMaturation { key: DelegationKey { delegator, validator }, completion_time })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RedelegationMaturation {
    pub key: RedelegationKey,
    pub completion_time: i64,
}

impl State for RedelegationMaturation {
    fn attach(&mut self, _store: Store) -> Result<()> {
        Ok(())
    }
    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.key.delegator)?
            .flush_child(self.key.src)?
            .flush_child(self.key.dst)?
            .flush_child(self.completion_time)?;
        Ok(())
    }
    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        let delegator = loader.load_child()?;
        let src = loader.load_child()?;
        let dst = loader.load_child()?;
        let completion_time = loader.load_child()?;
        Ok(RedelegationMaturation { key: RedelegationKey { delegator, src, dst }, completion_time })
    }
}

/// Packs `(power, operator)` into the big-endian-power /
/// one's-complement-address key spec.md's power-ranked index uses, so
/// ascending byte order sorts by ascending power with a deterministic
/// tie-break; reading the index in reverse gives descending power order.
#[derive(Clone, Copy, Debug)]
pub struct ValidatorPowerEntry {
    pub power: u64,
    pub operator: Address,
}

impl Entry for ValidatorPowerEntry {
    fn into_entry(self) -> Result<Vec<u8>> {
        let mut key = self.power.to_be_bytes().to_vec();
        for byte in self.operator.bytes() {
            key.push(!byte);
        }
        Ok(key)
    }
}

fn power_entry_operator(key: &[u8]) -> Address {
    let mut bytes = [0u8; Address::LENGTH];
    for (i, byte) in key[8..8 + Address::LENGTH].iter().enumerate() {
        bytes[i] = !byte;
    }
    Address::from(bytes)
}

#[derive(Default)]
pub struct Staking {
    pub validators: Map<Address, Validator>,
    pub validators_by_power: EntryMap<ValidatorPowerEntry>,
    pub last_validator_powers: Map<Address, u64>,
    pub unbonding_entries: Map<DelegationKey, Deque<UnbondingEntry>>,
    pub redelegation_entries: Map<RedelegationKey, Deque<RedelegationEntry>>,
    pub unbonding_queue: Deque<UnbondingMaturation>,
    pub redelegation_queue: Deque<RedelegationMaturation>,
    pub pool: StakePool,
}

impl State for Staking {
    fn attach(&mut self, store: Store) -> Result<()> {
        Attacher::new(store)
            .attach_child(&mut self.validators)?
            .attach_child(&mut self.validators_by_power)?
            .attach_child(&mut self.last_validator_powers)?
            .attach_child(&mut self.unbonding_entries)?
            .attach_child(&mut self.redelegation_entries)?
            .attach_child(&mut self.unbonding_queue)?
            .attach_child(&mut self.redelegation_queue)?
            .attach_child(&mut self.pool)?;
        Ok(())
    }

    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.validators)?
            .flush_child(self.validators_by_power)?
            .flush_child(self.last_validator_powers)?
            .flush_child(self.unbonding_entries)?
            .flush_child(self.redelegation_entries)?
            .flush_child(self.unbonding_queue)?
            .flush_child(self.redelegation_queue)?
            .flush_child(self.pool)?;
        Ok(())
    }

    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(Staking {
            validators: loader.load_child()?,
            validators_by_power: loader.load_child()?,
            last_validator_powers: loader.load_child()?,
            unbonding_entries: loader.load_child()?,
            redelegation_entries: loader.load_child()?,
            unbonding_queue: loader.load_child()?,
            redelegation_queue: loader.load_child()?,
            pool: loader.load_child()?,
        })
    }
}

pub struct CreateValidator {
    pub operator: Address,
    pub consensus_key: Address,
    pub amount: Amount,
    pub commission_rate: Decimal,
    pub commission_max_rate: Decimal,
    pub commission_max_change_rate: Decimal,
    pub min_self_delegation: Amount,
}

/// A validator removed from the power-ranked set or newly added to it,
/// for `app.rs` to forward to the consensus engine as a validator-power
/// update (spec.md 4.1.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowerUpdate {
    pub operator: Address,
    pub power: u64,
}

impl Staking {
    pub fn validator(&self, operator: Address) -> Result<Validator> {
        self.validators
            .get(operator)?
            .ok_or_else(|| Error::Coins("validator does not exist".into()))
    }

    pub fn validator_exists(&self, operator: Address) -> Result<bool> {
        self.validators.contains_key(operator)
    }

    fn update_power_index(&mut self, operator: Address, old_power: Option<u64>, new_power: u64) -> Result<()> {
        if let Some(old) = old_power {
            if old != new_power {
                self.validators_by_power.delete(ValidatorPowerEntry { power: old, operator })?;
            }
        }
        if new_power > 0 {
            self.validators_by_power.insert(ValidatorPowerEntry { power: new_power, operator })?;
        }
        Ok(())
    }

    /// spec.md 4.1: `MsgCreateValidator`.
    pub fn create_validator(&mut self, msg: CreateValidator, now: i64) -> Result<()> {
        if self.validator_exists(msg.operator)? {
            return Err(Error::Coins("validator already exists".into()));
        }
        if msg.amount.is_zero() {
            return Err(Error::Coins("self-delegation amount must be nonzero".into()));
        }
        if msg.min_self_delegation.is_zero() {
            return Err(Error::Coins("min_self_delegation must be nonzero".into()));
        }

        let mut validator = Validator {
            operator: msg.operator,
            consensus_key: msg.consensus_key,
            commission: Commission {
                rate: msg.commission_rate,
                max_rate: msg.commission_max_rate,
                max_change_rate: msg.commission_max_change_rate,
                update_time: now,
            },
            min_self_delegation: msg.min_self_delegation,
            ..Default::default()
        };
        let issued = validator.add_tokens(msg.amount)?;
        validator.delegations.insert(msg.operator, Delegation { shares: issued })?;
        self.pool.not_bonded_tokens = self.pool.not_bonded_tokens.checked_add(msg.amount)?;
        let power = validator.potential_power();
        self.update_power_index(msg.operator, None, power)?;
        self.validators.insert(msg.operator, validator)?;
        Ok(())
    }

    pub fn edit_validator(&mut self, operator: Address, new_rate: Option<Decimal>, now: i64) -> Result<()> {
        let mut validator = self
            .validators
            .get_mut(operator)?
            .ok_or_else(|| Error::Coins("validator does not exist".into()))?;
        if let Some(rate) = new_rate {
            validator.commission.validate_update(rate, now)?;
            validator.commission.rate = rate;
            validator.commission.update_time = now;
        }
        Ok(())
    }

    /// spec.md 4.1.1. Returns the issued shares so the caller (app.rs) can
    /// record distribution starting info with them.
    pub fn delegate(&mut self, delegator: Address, operator: Address, amount: Amount) -> Result<Decimal> {
        if amount.is_zero() {
            return Err(Error::Coins("delegation amount must be nonzero".into()));
        }
        let mut validator = self
            .validators
            .get_mut(operator)?
            .ok_or_else(|| Error::Coins("validator does not exist".into()))?;
        if validator.invalid_exchange_rate() {
            return Err(Error::Coins("validator has an invalid exchange rate".into()));
        }

        let old_power = validator.potential_power();
        let issued = validator.add_tokens(amount)?;
        let mut delegation = validator.delegations.get(delegator)?.unwrap_or_default();
        delegation.shares = delegation.shares.checked_add(issued)?;
        validator.delegations.insert(delegator, delegation)?;

        let bonded = validator.status == Status::Bonded;
        let new_power = validator.potential_power();
        drop(validator);

        self.update_power_index(operator, Some(old_power), new_power)?;
        if bonded {
            self.pool.bonded_tokens = self.pool.bonded_tokens.checked_add(amount)?;
        } else {
            self.pool.not_bonded_tokens = self.pool.not_bonded_tokens.checked_add(amount)?;
        }
        Ok(issued)
    }

    /// spec.md 4.1.1 / 4.1.4: queues an unbonding entry, returns the
    /// queued token amount, the delegator's remaining shares, and whether
    /// the validator was jailed for falling below its self-delegation
    /// floor.
    pub fn undelegate(
        &mut self,
        delegator: Address,
        operator: Address,
        shares: Decimal,
        height: u64,
        now: i64,
        unbonding_period_seconds: i64,
        max_entries: u32,
    ) -> Result<(Amount, Decimal, bool)> {
        if self.pending_unbonding_count(delegator, operator)? >= max_entries {
            return Err(Error::Coins("too many unbonding entries".into()));
        }

        let mut validator = self
            .validators
            .get_mut(operator)?
            .ok_or_else(|| Error::Coins("validator does not exist".into()))?;

        let mut delegation = validator
            .delegations
            .get(delegator)?
            .ok_or_else(|| Error::Coins("delegation does not exist".into()))?;
        if shares > delegation.shares {
            return Err(Error::Coins("not enough delegation shares".into()));
        }

        let old_power = validator.potential_power();
        let returned = validator.remove_shares(shares)?;
        delegation.shares = delegation.shares.checked_sub(shares)?;
        let remaining_shares = delegation.shares;
        if remaining_shares.is_zero() {
            validator.delegations.remove(delegator)?;
        } else {
            validator.delegations.insert(delegator, delegation)?;
        }

        let mut jailed = false;
        if delegator == operator && !validator.jailed && validator.below_min_self_delegation()? {
            validator.jailed = true;
            jailed = true;
        }

        let remove_validator = validator.delegator_shares.is_zero() && validator.status == Status::Unbonded;
        let bonded = validator.status == Status::Bonded;
        let new_power = if jailed { 0 } else { validator.potential_power() };
        drop(validator);

        self.update_power_index(operator, Some(old_power), new_power)?;
        if remove_validator {
            self.validators.remove(operator)?;
        }
        if bonded {
            self.pool.bonded_tokens = self.pool.bonded_tokens.checked_sub(returned)?;
            self.pool.not_bonded_tokens = self.pool.not_bonded_tokens.checked_add(returned)?;
        }

        let completion_time = now + unbonding_period_seconds;
        let key = DelegationKey { delegator, validator: operator };
        self.unbonding_entries.entry(key)?.or_default().push_back(UnbondingEntry {
            creation_height: height,
            completion_time,
            initial_balance: returned,
            balance: returned,
        })?;
        self.unbonding_queue.push_back(UnbondingMaturation { key, completion_time })?;

        Ok((returned, remaining_shares, jailed))
    }

    pub fn pending_unbonding_count(&self, delegator: Address, operator: Address) -> Result<u32> {
        let key = DelegationKey { delegator, validator: operator };
        Ok(self.unbonding_entries.get(key)?.map(|d| d.len() as u32).unwrap_or(0))
    }

    /// spec.md 4.1.4: moves shares from `src` to `dst` without passing
    /// through the unbonding queue, subject to its own maturation period.
    /// Rejects redelegating to the same validator; transitive hops are
    /// rejected by `app.rs` tracking which validators a delegator has
    /// already redelegated into this unbonding period.
    #[allow(clippy::too_many_arguments)]
    pub fn begin_redelegation(
        &mut self,
        delegator: Address,
        src: Address,
        dst: Address,
        shares: Decimal,
        height: u64,
        now: i64,
        redelegation_period_seconds: i64,
        max_entries: u32,
    ) -> Result<Decimal> {
        if src == dst {
            return Err(Error::Coins("cannot redelegate to the same validator".into()));
        }
        let existing = RedelegationKey { delegator, src, dst };
        if self.redelegation_entries.get(existing)?.map(|d| d.len() as u32).unwrap_or(0) >= max_entries {
            return Err(Error::Coins("too many redelegation entries".into()));
        }

        let mut src_validator = self
            .validators
            .get_mut(src)?
            .ok_or_else(|| Error::Coins("source validator does not exist".into()))?;
        let mut delegation = src_validator
            .delegations
            .get(delegator)?
            .ok_or_else(|| Error::Coins("delegation does not exist".into()))?;
        if shares > delegation.shares {
            return Err(Error::Coins("not enough delegation shares".into()));
        }

        let src_old_power = src_validator.potential_power();
        let tokens = src_validator.remove_shares(shares)?;
        delegation.shares = delegation.shares.checked_sub(shares)?;
        if delegation.shares.is_zero() {
            src_validator.delegations.remove(delegator)?;
        } else {
            src_validator.delegations.insert(delegator, delegation)?;
        }
        let src_power = src_validator.potential_power();
        drop(src_validator);
        self.update_power_index(src, Some(src_old_power), src_power)?;

        let mut dst_validator = self
            .validators
            .get_mut(dst)?
            .ok_or_else(|| Error::Coins("destination validator does not exist".into()))?;
        let dst_old_power = dst_validator.potential_power();
        let issued = dst_validator.add_tokens(tokens)?;
        let mut dst_delegation = dst_validator.delegations.get(delegator)?.unwrap_or_default();
        dst_delegation.shares = dst_delegation.shares.checked_add(issued)?;
        dst_validator.delegations.insert(delegator, dst_delegation)?;
        let dst_power = dst_validator.potential_power();
        drop(dst_validator);
        self.update_power_index(dst, Some(dst_old_power), dst_power)?;

        let completion_time = now + redelegation_period_seconds;
        self.redelegation_entries.entry(existing)?.or_default().push_back(RedelegationEntry {
            creation_height: height,
            completion_time,
            initial_balance: tokens,
            shares_dst: issued,
        })?;
        self.redelegation_queue.push_back(RedelegationMaturation { key: existing, completion_time })?;

        Ok(issued)
    }

    pub fn jail(&mut self, operator: Address) -> Result<()> {
        let mut validator = self.validator_mut_or_err(operator)?;
        let old_power = validator.potential_power();
        validator.jailed = true;
        drop(validator);
        self.update_power_index(operator, Some(old_power), 0)
    }

    pub fn unjail(&mut self, operator: Address) -> Result<()> {
        let mut validator = self.validator_mut_or_err(operator)?;
        if validator.below_min_self_delegation()? {
            return Err(Error::Coins("self-delegation below minimum".into()));
        }
        validator.jailed = false;
        let power = validator.potential_power();
        drop(validator);
        // a jailed validator is always indexed at power 0 (see `jail`), regardless
        // of how many tokens it still holds.
        self.update_power_index(operator, Some(0), power)
    }

    fn validator_mut_or_err(&mut self, operator: Address) -> Result<crate::collections::map::ChildMut<'_, Address, Validator>> {
        self.validators
            .get_mut(operator)?
            .ok_or_else(|| Error::Coins("validator does not exist".into()))
    }

    /// spec.md 4.3.3: reduces a validator's live tokens by `fraction`, and
    /// applies the same fraction to every unbonding/redelegation entry
    /// whose `creation_height` is at or after `infraction_height` (those
    /// tokens were still bonded to this validator at the time of the
    /// infraction even though they've since started unwinding). Slashed
    /// tokens are burned, not redistributed.
    pub fn slash(&mut self, operator: Address, infraction_height: u64, power: u64, fraction: Decimal) -> Result<Amount> {
        let mut total_slashed = Amount::zero();

        let keys: Vec<DelegationKey> = self
            .unbonding_entries
            .iter()?
            .into_iter()
            .map(|(k, _)| k)
            .filter(|k| k.validator == operator)
            .collect();
        for key in keys {
            if let Some(mut deque) = self.unbonding_entries.get_mut(key)? {
                for i in 0..deque.len() {
                    let mut entry = match deque.get(i)? {
                        Some(entry) => entry,
                        None => continue,
                    };
                    if entry.creation_height >= infraction_height && !entry.balance.is_zero() {
                        let slashed = (Decimal::from(entry.balance) * fraction).to_amount_floor()?;
                        entry.balance = entry.balance.checked_sub(slashed)?;
                        total_slashed = total_slashed.checked_add(slashed)?;
                        self.pool.not_bonded_tokens = self.pool.not_bonded_tokens.checked_sub(slashed)?;
                        deque.set(i, entry)?;
                    }
                }
            }
        }

        // a redelegation moved stake off `operator` after the infraction, so
        // the same fraction has to be burned out from under it at `dst`
        // (examples/original_source/x/staking/keeper/slash.go:334, slashRedelegation).
        let redelegation_keys: Vec<RedelegationKey> = self
            .redelegation_entries
            .iter()?
            .into_iter()
            .map(|(k, _)| k)
            .filter(|k| k.src == operator)
            .collect();
        for key in redelegation_keys {
            if let Some(deque) = self.redelegation_entries.get(key)? {
                for i in 0..deque.len() {
                    if let Some(entry) = deque.get(i)? {
                        if entry.creation_height >= infraction_height {
                            let slashed = (Decimal::from(entry.initial_balance) * fraction).to_amount_floor()?;
                            total_slashed = total_slashed.checked_add(slashed)?;

                            let mut shares_to_unbond = entry.shares_dst * fraction;
                            if !shares_to_unbond.is_zero() {
                                if let Some(mut dst_validator) = self.validators.get_mut(key.dst)? {
                                    let delegation_shares = dst_validator
                                        .delegations
                                        .get(key.delegator)?
                                        .map(|d| d.shares)
                                        .unwrap_or_default();
                                    if !delegation_shares.is_zero() {
                                        if shares_to_unbond > delegation_shares {
                                            shares_to_unbond = delegation_shares;
                                        }
                                        let dst_old_power = dst_validator.potential_power();
                                        let burned = dst_validator.remove_shares(shares_to_unbond)?;
                                        let remaining_shares = delegation_shares.checked_sub(shares_to_unbond)?;
                                        if remaining_shares.is_zero() {
                                            dst_validator.delegations.remove(key.delegator)?;
                                        } else {
                                            dst_validator
                                                .delegations
                                                .insert(key.delegator, Delegation { shares: remaining_shares })?;
                                        }
                                        let dst_bonded = dst_validator.status == Status::Bonded;
                                        let dst_new_power = dst_validator.potential_power();
                                        drop(dst_validator);

                                        if dst_bonded {
                                            self.pool.bonded_tokens = self.pool.bonded_tokens.checked_sub(burned)?;
                                        } else {
                                            self.pool.not_bonded_tokens =
                                                self.pool.not_bonded_tokens.checked_sub(burned)?;
                                        }
                                        self.update_power_index(key.dst, Some(dst_old_power), dst_new_power)?;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        // remainingSlashAmount: the infraction-height stake not already
        // accounted for by the unbonding/redelegation deductions above is
        // burned directly from the validator's live tokens (slash.go:89,146-171).
        let mut validator = self.validator_mut_or_err(operator)?;
        let old_power = validator.potential_power();
        let slash_amount = (Decimal::from(power_to_tokens(power)) * fraction).to_amount_floor()?;
        let remaining = if slash_amount.value() > total_slashed.value() {
            Amount::from(slash_amount.value() - total_slashed.value())
        } else {
            Amount::zero()
        };
        let tokens_to_burn = remaining.min(validator.tokens);
        validator.tokens = validator.tokens.checked_sub(tokens_to_burn)?;
        total_slashed = total_slashed.checked_add(tokens_to_burn)?;
        let bonded = validator.status == Status::Bonded;
        let new_power = validator.potential_power();
        drop(validator);

        if bonded {
            self.pool.bonded_tokens = self.pool.bonded_tokens.checked_sub(tokens_to_burn)?;
        } else {
            self.pool.not_bonded_tokens = self.pool.not_bonded_tokens.checked_sub(tokens_to_burn)?;
        }
        self.update_power_index(operator, Some(old_power), new_power)?;

        Ok(total_slashed)
    }

    /// spec.md 4.1.3: recomputes which validators belong in the active
    /// set, returning the power deltas the consensus engine needs to hear
    /// about (newly active, power changed, or dropped to zero).
    pub fn end_block_step(&mut self, max_validators: u32) -> Result<Vec<PowerUpdate>> {
        let mut ranked: Vec<(u64, Address)> = self
            .validators_by_power
            .iter_rev()
            .into_iter()
            .map(|key| {
                let power = u64::from_be_bytes(key[..8].try_into().unwrap());
                (power, power_entry_operator(&key))
            })
            .collect();
        ranked.truncate(max_validators as usize);

        let mut updates = vec![];
        let mut seen = std::collections::BTreeSet::new();
        for (power, operator) in &ranked {
            seen.insert(*operator);
            let previous = self.last_validator_powers.get(*operator)?;
            if previous != Some(*power) {
                updates.push(PowerUpdate { operator: *operator, power: *power });
                self.last_validator_powers.insert(*operator, *power)?;
            }
            if let Some(mut validator) = self.validators.get_mut(*operator)? {
                if validator.status != Status::Bonded {
                    validator.status = Status::Bonded;
                }
            }
        }

        let previously_bonded: Vec<Address> = self.last_validator_powers.iter()?.into_iter().map(|(k, _)| k).collect();
        for operator in previously_bonded {
            if !seen.contains(&operator) {
                updates.push(PowerUpdate { operator, power: 0 });
                self.last_validator_powers.remove(operator)?;
                if let Some(mut validator) = self.validators.get_mut(operator)? {
                    validator.status = Status::Unbonded;
                }
            }
        }

        Ok(updates)
    }

    /// spec.md 4.1.4: releases every unbonding/redelegation entry whose
    /// `completion_time` has passed, crediting the delegator's account for
    /// unbondings (redelegations already moved the tokens at creation
    /// time, so maturing one is a pure cleanup).
    pub fn process_maturities(&mut self, now: i64, accounts: &mut crate::coins::Accounts) -> Result<()> {
        while let Some(front) = self.unbonding_queue.front()? {
            if front.completion_time > now {
                break;
            }
            self.unbonding_queue.pop_front()?;
            let mut remove = false;
            if let Some(mut deque) = self.unbonding_entries.get_mut(front.key)? {
                if let Some(entry) = deque.pop_front()? {
                    self.pool.not_bonded_tokens = self.pool.not_bonded_tokens.checked_sub(entry.balance)?;
                    accounts.deposit(front.key.delegator, entry.balance)?;
                }
                remove = deque.is_empty();
            }
            if remove {
                self.unbonding_entries.remove(front.key)?;
            }
        }

        while let Some(front) = self.redelegation_queue.front()? {
            if front.completion_time > now {
                break;
            }
            self.redelegation_queue.pop_front()?;
            let mut remove = false;
            if let Some(mut deque) = self.redelegation_entries.get_mut(front.key)? {
                deque.pop_front()?;
                remove = deque.is_empty();
            }
            if remove {
                self.redelegation_entries.remove(front.key)?;
            }
        }

        Ok(())
    }
}

impl crate::governance::VotingPowerSource for Staking {
    /// Sums a delegator's token-equivalent stake across every validator.
    /// O(validators) per call; acceptable at this chain's validator-set
    /// scale (spec.md bounds `max_validators` in the low hundreds), and
    /// governance only calls this once per proposal per voter at tally
    /// time, not per block.
    fn voting_power(&self, delegator: Address) -> Result<Amount> {
        let mut total = Amount::zero();
        for (_, validator) in self.validators.iter()? {
            if let Some(delegation) = validator.delegations.get(delegator)? {
                total = total.checked_add(validator.tokens_for_shares(delegation.shares)?)?;
            }
        }
        Ok(total)
    }

    fn total_bonded_tokens(&self) -> Result<Amount> {
        Ok(self.pool.bonded_tokens)
    }
}

impl StakingView for Staking {
    fn validator_tokens(&self, validator: Address) -> Result<Amount> {
        Ok(self.validators.get(validator)?.map(|v| v.tokens).unwrap_or_default())
    }

    fn validator_commission_rate(&self, validator: Address) -> Result<Decimal> {
        Ok(self.validators.get(validator)?.map(|v| v.commission.rate).unwrap_or_default())
    }

    fn validator_operator_addresses(&self) -> Result<Vec<Address>> {
        Ok(self.validators.iter()?.into_iter().map(|(k, _)| k).collect())
    }
}

/// Bundles staking and distribution so a slash both reduces the
/// validator's tokens and records the share-price event distribution
/// needs to replay for delegations spanning it (spec.md 4.2.6).
pub struct SlashAdapter<'a> {
    pub staking: &'a mut Staking,
    pub distribution: &'a mut Distribution,
}

impl<'a> StakingHandle for SlashAdapter<'a> {
    fn validator_power(&self, address: Address) -> Result<u64> {
        Ok(self.staking.validators.get(address)?.map(|v| v.potential_power()).unwrap_or(0))
    }

    fn slash(&mut self, address: Address, infraction_height: u64, power: u64, fraction: Decimal) -> Result<()> {
        self.distribution.record_slash_event(address, infraction_height, fraction, self.staking)?;
        self.staking.slash(address, infraction_height, power, fraction)?;
        Ok(())
    }

    fn jail(&mut self, address: Address) -> Result<()> {
        self.staking.jail(address)
    }

    fn is_tombstoned_or_unbonded(&self, address: Address) -> Result<bool> {
        Ok(self
            .staking
            .validators
            .get(address)?
            .map(|v| v.status == Status::Unbonded)
            .unwrap_or(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coins::Address;
    use crate::store::MapStore;

    fn staking() -> Staking {
        let mut s = Staking::default();
        s.attach(Store::new(MapStore::new())).unwrap();
        s
    }

    fn operator(byte: u8) -> Address {
        Address::from_pubkey([byte; 33])
    }

    #[test]
    fn create_and_delegate() {
        let mut s = staking();
        let op = operator(1);
        s.create_validator(
            CreateValidator {
                operator: op,
                consensus_key: op,
                amount: Amount::new(100),
                commission_rate: Decimal::zero(),
                commission_max_rate: Decimal::one(),
                commission_max_change_rate: Decimal::one(),
                min_self_delegation: Amount::new(1),
            },
            0,
        )
        .unwrap();

        let delegator = operator(2);
        let issued = s.delegate(delegator, op, Amount::new(50)).unwrap();
        assert_eq!(issued, Decimal::from(Amount::new(50)));
        assert_eq!(s.validator(op).unwrap().tokens, Amount::new(150));
    }

    #[test]
    fn undelegate_queues_unbonding_entry() {
        let mut s = staking();
        let op = operator(3);
        s.create_validator(
            CreateValidator {
                operator: op,
                consensus_key: op,
                amount: Amount::new(100),
                commission_rate: Decimal::zero(),
                commission_max_rate: Decimal::one(),
                commission_max_change_rate: Decimal::one(),
                min_self_delegation: Amount::new(1),
            },
            0,
        )
        .unwrap();

        let (returned, remaining, jailed) = s
            .undelegate(op, op, Decimal::from(Amount::new(40)), 1, 1_000, 100_000, 7)
            .unwrap();
        assert_eq!(returned, Amount::new(40));
        assert_eq!(remaining, Decimal::from(Amount::new(60)));
        assert!(!jailed);
        assert_eq!(s.pending_unbonding_count(op, op).unwrap(), 1);
    }

    #[test]
    fn slash_reduces_validator_tokens() {
        let mut s = staking();
        let op = operator(4);
        s.create_validator(
            CreateValidator {
                operator: op,
                consensus_key: op,
                amount: Amount::new(200_000_000),
                commission_rate: Decimal::zero(),
                commission_max_rate: Decimal::one(),
                commission_max_change_rate: Decimal::one(),
                min_self_delegation: Amount::new(1),
            },
            0,
        )
        .unwrap();

        let power = s.validator(op).unwrap().potential_power();
        assert_eq!(power, 200);
        let slashed = s.slash(op, 0, power, Decimal::from_ratio(1, 10).unwrap()).unwrap();
        assert_eq!(slashed, Amount::new(20_000_000));
        assert_eq!(s.validator(op).unwrap().tokens, Amount::new(180_000_000));
    }

    #[test]
    fn slash_burns_redelegated_stake_at_destination() {
        let mut s = staking();
        let src = operator(5);
        let dst = operator(6);
        for (op, key) in [(src, 5u8), (dst, 6u8)] {
            s.create_validator(
                CreateValidator {
                    operator: op,
                    consensus_key: Address::from_pubkey([key; 33]),
                    amount: Amount::new(100_000_000),
                    commission_rate: Decimal::zero(),
                    commission_max_rate: Decimal::one(),
                    commission_max_change_rate: Decimal::one(),
                    min_self_delegation: Amount::new(1),
                },
                0,
            )
            .unwrap();
        }

        let delegator = operator(7);
        s.delegate(delegator, src, Amount::new(50_000_000)).unwrap();
        s.begin_redelegation(delegator, src, dst, Decimal::from(Amount::new(50_000_000)), 1, 0, 1_000, 7)
            .unwrap();

        let dst_tokens_before = s.validator(dst).unwrap().tokens;
        let src_power = s.validator(src).unwrap().potential_power();
        s.slash(src, 0, src_power, Decimal::from_ratio(1, 10).unwrap()).unwrap();

        let dst_tokens_after = s.validator(dst).unwrap().tokens;
        assert!(dst_tokens_after < dst_tokens_before);
    }
}
