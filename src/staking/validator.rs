//! A validator operator's state: bonded tokens, delegator shares, and
//! commission terms.

use crate::coins::{Address, Amount, Decimal};
use crate::collections::Map;
use crate::error::Error;
use crate::state::{Attacher, Flusher, Loader, State};
use crate::store::Store;
use crate::Result;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Status {
    #[default]
    Unbonded,
    Unbonding,
    Bonded,
}

impl State for Status {
    fn attach(&mut self, _store: Store) -> Result<()> {
        Ok(())
    }
    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        let tag: u8 = match self {
            Status::Unbonded => 0,
            Status::Unbonding => 1,
            Status::Bonded => 2,
        };
        tag.flush(out)
    }
    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        Ok(match u8::load(store, bytes)? {
            0 => Status::Unbonded,
            1 => Status::Unbonding,
            2 => Status::Bonded,
            _ => return Err(Error::Coins("invalid validator status tag".into())),
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Commission {
    pub rate: Decimal,
    pub max_rate: Decimal,
    pub max_change_rate: Decimal,
    pub update_time: i64,
}

impl Default for Commission {
    fn default() -> Self {
        Commission {
            rate: Decimal::zero(),
            max_rate: Decimal::one(),
            max_change_rate: Decimal::one(),
            update_time: 0,
        }
    }
}

impl State for Commission {
    fn attach(&mut self, _store: Store) -> Result<()> {
        Ok(())
    }
    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.rate)?
            .flush_child(self.max_rate)?
            .flush_child(self.max_change_rate)?
            .flush_child(self.update_time)?;
        Ok(())
    }
    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(Commission {
            rate: loader.load_child()?,
            max_rate: loader.load_child()?,
            max_change_rate: loader.load_child()?,
            update_time: loader.load_child()?,
        })
    }
}

impl Commission {
    /// Rejects a commission-rate edit that exceeds `max_rate` or changes
    /// by more than `max_change_rate` within a single day, and enforces
    /// the one-edit-per-day cooldown Cosmos-SDK chains use to stop a
    /// validator whipsawing delegators' expected yield.
    pub fn validate_update(&self, new_rate: Decimal, now: i64) -> Result<()> {
        if now - self.update_time < 24 * 60 * 60 {
            return Err(Error::Coins("commission rate changed too recently".into()));
        }
        if new_rate > self.max_rate {
            return Err(Error::Coins("commission rate exceeds maximum".into()));
        }
        let delta = if new_rate > self.rate {
            new_rate.checked_sub(self.rate)?
        } else {
            self.rate.checked_sub(new_rate)?
        };
        if delta > self.max_change_rate {
            return Err(Error::Coins("commission rate change too large".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Delegation {
    pub shares: Decimal,
}

impl State for Delegation {
    fn attach(&mut self, _store: Store) -> Result<()> {
        Ok(())
    }
    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        self.shares.flush(out)
    }
    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        Ok(Delegation {
            shares: Decimal::load(store, bytes)?,
        })
    }
}

pub struct Validator {
    pub operator: Address,
    pub consensus_key: Address,
    pub status: Status,
    pub tokens: Amount,
    pub delegator_shares: Decimal,
    pub commission: Commission,
    pub min_self_delegation: Amount,
    pub jailed: bool,
    pub unbonding_height: u64,
    pub unbonding_completion_time: i64,
    pub delegations: Map<Address, Delegation>,
}

impl Default for Validator {
    fn default() -> Self {
        Validator {
            operator: Address::NULL,
            consensus_key: Address::NULL,
            status: Status::Unbonded,
            tokens: Amount::zero(),
            delegator_shares: Decimal::zero(),
            commission: Commission::default(),
            min_self_delegation: Amount::zero(),
            jailed: false,
            unbonding_height: 0,
            unbonding_completion_time: 0,
            delegations: Map::default(),
        }
    }
}

impl State for Validator {
    fn attach(&mut self, store: Store) -> Result<()> {
        Attacher::new(store)
            .attach_child(&mut self.operator)?
            .attach_child(&mut self.consensus_key)?
            .attach_child(&mut self.status)?
            .attach_child(&mut self.tokens)?
            .attach_child(&mut self.delegator_shares)?
            .attach_child(&mut self.commission)?
            .attach_child(&mut self.min_self_delegation)?
            .attach_child(&mut self.jailed)?
            .attach_child(&mut self.unbonding_height)?
            .attach_child(&mut self.unbonding_completion_time)?
            .attach_child(&mut self.delegations)?;
        Ok(())
    }

    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.operator)?
            .flush_child(self.consensus_key)?
            .flush_child(self.status)?
            .flush_child(self.tokens)?
            .flush_child(self.delegator_shares)?
            .flush_child(self.commission)?
            .flush_child(self.min_self_delegation)?
            .flush_child(self.jailed)?
            .flush_child(self.unbonding_height)?
            .flush_child(self.unbonding_completion_time)?
            .flush_child(self.delegations)?;
        Ok(())
    }

    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(Validator {
            operator: loader.load_child()?,
            consensus_key: loader.load_child()?,
            status: loader.load_child()?,
            tokens: loader.load_child()?,
            delegator_shares: loader.load_child()?,
            commission: loader.load_child()?,
            min_self_delegation: loader.load_child()?,
            jailed: loader.load_child()?,
            unbonding_height: loader.load_child()?,
            unbonding_completion_time: loader.load_child()?,
            delegations: loader.load_child()?,
        })
    }
}

impl Validator {
    pub fn invalid_exchange_rate(&self) -> bool {
        self.tokens.is_zero() && !self.delegator_shares.is_zero()
    }

    /// spec.md 4.1.1: issuing shares for a bond of `amount` integer tokens.
    pub fn add_tokens(&mut self, amount: Amount) -> Result<Decimal> {
        let issued = if self.delegator_shares.is_zero() {
            Decimal::from(amount)
        } else {
            Decimal::from(amount) * self.delegator_shares / Decimal::from(self.tokens)
        };
        self.tokens = self.tokens.checked_add(amount)?;
        self.delegator_shares = self.delegator_shares.checked_add(issued)?;
        Ok(issued)
    }

    /// spec.md 4.1.1: the reverse direction, truncating the returned token
    /// amount toward zero; the remainder stays on the validator.
    pub fn remove_shares(&mut self, shares: Decimal) -> Result<Amount> {
        if shares > self.delegator_shares {
            return Err(Error::Coins("not enough delegator shares".into()));
        }
        let tokens = (shares * Decimal::from(self.tokens) / self.delegator_shares).to_amount_floor()?;
        self.delegator_shares = self.delegator_shares.checked_sub(shares)?;
        self.tokens = self.tokens.checked_sub(tokens)?;
        Ok(tokens)
    }

    pub fn tokens_for_shares(&self, shares: Decimal) -> Result<Amount> {
        if self.delegator_shares.is_zero() {
            return Ok(Amount::zero());
        }
        (shares * Decimal::from(self.tokens) / self.delegator_shares).to_amount_floor()
    }

    pub fn self_delegation(&self) -> Result<Amount> {
        let shares = self
            .delegations
            .get(self.operator)?
            .map(|d| d.shares)
            .unwrap_or_default();
        self.tokens_for_shares(shares)
    }

    pub fn below_min_self_delegation(&self) -> Result<bool> {
        Ok(self.self_delegation()? < self.min_self_delegation)
    }

    pub fn potential_power(&self) -> u64 {
        (self.tokens.value() / POWER_REDUCTION).min(u64::MAX as u128) as u64
    }
}

/// Consensus power is tokens divided by this ratio — the same convention
/// Cosmos-SDK chains use so voting power stays a manageable `int64` even
/// on chains with large token supplies. Note this means small worked
/// examples (a handful of whole tokens) round down to power 0.
pub const POWER_REDUCTION: u128 = 1_000_000;

/// Inverse of [`Validator::potential_power`]: the token amount backing a
/// given consensus power, at the same reduction ratio.
pub fn power_to_tokens(power: u64) -> Amount {
    Amount::from(power as u128 * POWER_REDUCTION)
}
