//! Liveness tracking and the double-sign/downtime penalties that hang off
//! it. Slashing reads validator state through the same narrow
//! [`crate::distribution::StakingView`]-shaped capability staking grants
//! every subscriber, and calls back into staking only to execute a slash
//! or jail — never by reaching into staking's store layout directly.

use crate::coins::{Address, Decimal};
use crate::collections::Map;
use crate::error::Error;
use crate::state::{Attacher, Flusher, Loader, State};
use crate::store::Store;
use crate::Result;

/// A rolling bit-array over the most recent `signed_blocks_window` blocks,
/// `true` meaning the validator missed that block, plus the counter
/// spec.md keeps as the array's popcount so downtime checks don't rescan
/// the window every block.
#[derive(Clone, Debug, Default)]
pub struct SigningInfo {
    pub start_height: u64,
    pub index_offset: u64,
    pub jailed_until: i64,
    pub tombstoned: bool,
    pub missed_blocks_counter: u64,
    missed_window: Map<u64, bool>,
}

impl State for SigningInfo {
    fn attach(&mut self, store: Store) -> Result<()> {
        Attacher::new(store)
            .attach_child(&mut self.start_height)?
            .attach_child(&mut self.index_offset)?
            .attach_child(&mut self.jailed_until)?
            .attach_child(&mut self.tombstoned)?
            .attach_child(&mut self.missed_blocks_counter)?
            .attach_child(&mut self.missed_window)?;
        Ok(())
    }

    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.start_height)?
            .flush_child(self.index_offset)?
            .flush_child(self.jailed_until)?
            .flush_child(self.tombstoned)?
            .flush_child(self.missed_blocks_counter)?
            .flush_child(self.missed_window)?;
        Ok(())
    }

    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(SigningInfo {
            start_height: loader.load_child()?,
            index_offset: loader.load_child()?,
            jailed_until: loader.load_child()?,
            tombstoned: loader.load_child()?,
            missed_blocks_counter: loader.load_child()?,
            missed_window: loader.load_child()?,
        })
    }
}

#[derive(Default)]
pub struct Slashing {
    pub signing_infos: Map<Address, SigningInfo>,
}

impl State for Slashing {
    fn attach(&mut self, store: Store) -> Result<()> {
        Attacher::new(store).attach_child(&mut self.signing_infos)?;
        Ok(())
    }

    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out).flush_child(self.signing_infos)?;
        Ok(())
    }

    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(Slashing {
            signing_infos: loader.load_child()?,
        })
    }
}

/// The narrow capability slashing holds on staking: read voting power,
/// execute a slash, and jail/tombstone an operator.
pub trait StakingHandle {
    fn validator_power(&self, address: Address) -> Result<u64>;
    fn slash(&mut self, address: Address, infraction_height: u64, power: u64, fraction: Decimal) -> Result<()>;
    fn jail(&mut self, address: Address) -> Result<()>;
    fn is_tombstoned_or_unbonded(&self, address: Address) -> Result<bool>;
}

impl SigningInfo {
    /// Clears every recorded bit and restarts the window at
    /// `current_height` — used both when a downtime jailing fires and when
    /// a validator is unjailed, so a stale bit from before the reset can
    /// never again count toward `missed_blocks_counter`.
    fn reset_window(&mut self, current_height: u64) -> Result<()> {
        let keys: Vec<u64> = self.missed_window.iter()?.into_iter().map(|(k, _)| k).collect();
        for key in keys {
            self.missed_window.remove(key)?;
        }
        self.missed_blocks_counter = 0;
        self.index_offset = 0;
        self.start_height = current_height;
        Ok(())
    }
}

impl Slashing {
    fn info_for(&mut self, address: Address, current_height: u64) -> Result<SigningInfo> {
        match self.signing_infos.get(address)? {
            Some(info) => Ok(info),
            None => Ok(SigningInfo {
                start_height: current_height,
                ..Default::default()
            }),
        }
    }

    /// spec.md 4.3.1: called once per validator in the previous block's
    /// precommit set, every block.
    pub fn handle_validator_signature(
        &mut self,
        address: Address,
        power: u64,
        signed: bool,
        current_height: u64,
        params: &crate::params::SlashingParams,
        staking: &mut impl StakingHandle,
    ) -> Result<bool> {
        let mut info = self.info_for(address, current_height)?;

        let index = info.index_offset % params.signed_blocks_window;
        let previously_missed = info.missed_window.get(index)?.unwrap_or(false);
        let missed = !signed;

        if missed && !previously_missed {
            info.missed_blocks_counter += 1;
        } else if !missed && previously_missed {
            info.missed_blocks_counter = info.missed_blocks_counter.saturating_sub(1);
        }
        info.missed_window.insert(index, missed)?;
        info.index_offset += 1;

        let mut jailed = false;
        let min_height = info.start_height + params.signed_blocks_window;
        let min_signed = (Decimal::from(crate::coins::Amount::from(params.signed_blocks_window))
            * params.min_signed_per_window)
            .to_amount_floor()?
            .value() as u64;
        if current_height >= min_height
            && !info.tombstoned
            && info.missed_blocks_counter > params.signed_blocks_window - min_signed
        {
            if !staking.is_tombstoned_or_unbonded(address)? {
                let distribution_height = current_height.saturating_sub(1);
                staking.slash(address, distribution_height, power, params.slash_fraction_downtime)?;
                staking.jail(address)?;
                info.jailed_until = current_height as i64 + params.downtime_jail_duration_seconds;
                info.reset_window(current_height)?;
                jailed = true;
            }
        }

        self.signing_infos.insert(address, info)?;
        Ok(jailed)
    }

    /// spec.md 4.3.2: two distinct votes at the same height by the same
    /// validator.
    pub fn handle_double_sign(
        &mut self,
        address: Address,
        infraction_height: u64,
        infraction_age_seconds: i64,
        power: u64,
        current_height: u64,
        params: &crate::params::SlashingParams,
        staking: &mut impl StakingHandle,
    ) -> Result<()> {
        if infraction_age_seconds > params.max_evidence_age_seconds {
            return Err(Error::Coins("evidence too old".into()));
        }
        if staking.is_tombstoned_or_unbonded(address)? {
            return Err(Error::Coins("validator unbonded or already tombstoned".into()));
        }

        let distribution_height = infraction_height.saturating_sub(params.validator_update_delay);
        staking.slash(address, distribution_height, power, params.slash_fraction_double_sign)?;

        let mut info = self.info_for(address, current_height)?;
        info.jailed_until = i64::MAX;
        info.tombstoned = true;
        self.signing_infos.insert(address, info)?;
        staking.jail(address)?;
        Ok(())
    }

    /// spec.md 4.3.4: restarts the signing window at the current height so
    /// downtime tracked before the jail can't immediately re-trigger it.
    pub fn unjail(&mut self, address: Address, now: i64, current_height: u64) -> Result<()> {
        let mut info = self
            .signing_infos
            .get(address)?
            .ok_or_else(|| Error::Coins("no signing info for validator".into()))?;
        if info.tombstoned {
            return Err(Error::Coins("validator is tombstoned".into()));
        }
        if now < info.jailed_until {
            return Err(Error::Coins("validator still in jail period".into()));
        }
        info.reset_window(current_height)?;
        self.signing_infos.insert(address, info)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MapStore;

    struct MockStaking {
        slashed: Vec<(Address, u64, u64, Decimal)>,
        jailed: Vec<Address>,
    }

    impl StakingHandle for MockStaking {
        fn validator_power(&self, _address: Address) -> Result<u64> {
            Ok(100)
        }
        fn slash(&mut self, address: Address, h: u64, power: u64, fraction: Decimal) -> Result<()> {
            self.slashed.push((address, h, power, fraction));
            Ok(())
        }
        fn jail(&mut self, address: Address) -> Result<()> {
            self.jailed.push(address);
            Ok(())
        }
        fn is_tombstoned_or_unbonded(&self, _address: Address) -> Result<bool> {
            Ok(false)
        }
    }

    fn slashing() -> Slashing {
        let mut s = Slashing::default();
        s.attach(Store::new(MapStore::new())).unwrap();
        s
    }

    #[test]
    fn downtime_triggers_after_window() {
        let mut slashing = slashing();
        let mut staking = MockStaking { slashed: vec![], jailed: vec![] };
        let params = crate::params::SlashingParams {
            signed_blocks_window: 100,
            ..Default::default()
        };
        let validator = Address::from_pubkey([5; 33]);

        let mut jailed_at = None;
        for height in 0..101u64 {
            let signed = height >= 51;
            let jailed = slashing
                .handle_validator_signature(validator, 100, signed, height, &params, &mut staking)
                .unwrap();
            if jailed {
                jailed_at = Some(height);
            }
        }
        assert!(jailed_at.is_some());
        assert_eq!(staking.jailed.len(), 1);
    }
}
