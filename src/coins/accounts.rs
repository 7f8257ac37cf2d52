//! Account balances and the withdraw-address override bank holds on
//! distribution's behalf.
//!
//! Staking holds delegated tokens itself (as `Validator::tokens` /
//! `Pool::{bonded,not_bonded}_tokens`) rather than through this module —
//! `Accounts` only tracks *liquid* balances: what `MsgSend` moves, what
//! unbonding queue maturation releases back to a delegator, and what
//! distribution pays out on a reward or commission withdrawal.

use crate::coins::{Address, Amount};
use crate::collections::Map;
use crate::context::GetContext;
use crate::encoding::{Decode, Encode};
use crate::error::Error;
use crate::plugins::Signer;
use crate::state::{Attacher, Flusher, Loader, State};
use crate::store::Store;
use crate::Result;

#[derive(Default)]
pub struct Accounts {
    balances: Map<Address, Amount>,
    withdraw_addresses: Map<Address, Address>,
}

impl State for Accounts {
    fn attach(&mut self, store: Store) -> Result<()> {
        Attacher::new(store)
            .attach_child(&mut self.balances)?
            .attach_child(&mut self.withdraw_addresses)?;
        Ok(())
    }

    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.balances)?
            .flush_child(self.withdraw_addresses)?;
        Ok(())
    }

    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(Accounts {
            balances: loader.load_child()?,
            withdraw_addresses: loader.load_child()?,
        })
    }
}

#[derive(Encode, Decode)]
pub struct MsgSend {
    pub to: Address,
    pub amount: Amount,
}

impl Accounts {
    pub fn balance(&self, address: Address) -> Result<Amount> {
        Ok(self.balances.get(address)?.unwrap_or_default())
    }

    /// Credits `amount` to `address`, e.g. unbonding-queue maturation or a
    /// reward/commission withdrawal payout.
    pub fn deposit(&mut self, address: Address, amount: Amount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let mut entry = self.balances.entry(address)?;
        let balance = entry.or_default();
        *balance = balance.checked_add(amount)?;
        Ok(())
    }

    /// Debits `amount` from `address`, e.g. a delegation hold.
    pub fn withdraw(&mut self, address: Address, amount: Amount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let balance = self.balance(address)?;
        let remaining = balance
            .checked_sub(amount)
            .map_err(|_| Error::Coins("insufficient account balance".into()))?;
        if remaining.is_zero() {
            self.balances.remove(address)?;
        } else {
            self.balances.insert(address, remaining)?;
        }
        Ok(())
    }

    pub fn transfer(&mut self, from: Address, to: Address, amount: Amount) -> Result<()> {
        self.withdraw(from, amount)?;
        self.deposit(to, amount)
    }

    pub fn send(&mut self, msg: MsgSend) -> Result<()> {
        let signer: Signer = self
            .context()
            .ok_or_else(|| Error::App("no signer in context".into()))?;
        if msg.amount.is_zero() {
            return Err(Error::Coins("cannot send zero".into()));
        }
        self.transfer(signer.address, msg.to, msg.amount)
    }

    /// `distribution`/`MsgSetWithdrawAddress` call this to redirect where a
    /// delegator's or operator's withdrawal-owed coins land. Defaults to
    /// the account itself.
    pub fn set_withdraw_address(&mut self, owner: Address, withdraw: Address) -> Result<()> {
        if withdraw == owner {
            self.withdraw_addresses.remove(owner)?;
        } else {
            self.withdraw_addresses.insert(owner, withdraw)?;
        }
        Ok(())
    }

    pub fn withdraw_address(&self, owner: Address) -> Result<Address> {
        Ok(self.withdraw_addresses.get(owner)?.unwrap_or(owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MapStore;

    fn accounts() -> Accounts {
        let mut accounts = Accounts::default();
        accounts.attach(Store::new(MapStore::new())).unwrap();
        accounts
    }

    #[test]
    fn deposit_and_withdraw() {
        let mut accounts = accounts();
        let addr = Address::from_pubkey([1; 33]);
        accounts.deposit(addr, 100u64.into()).unwrap();
        assert_eq!(accounts.balance(addr).unwrap(), 100u64.into());
        accounts.withdraw(addr, 40u64.into()).unwrap();
        assert_eq!(accounts.balance(addr).unwrap(), 60u64.into());
    }

    #[test]
    fn withdraw_more_than_balance_fails() {
        let mut accounts = accounts();
        let addr = Address::from_pubkey([2; 33]);
        accounts.deposit(addr, 10u64.into()).unwrap();
        assert!(accounts.withdraw(addr, 11u64.into()).is_err());
    }

    #[test]
    fn withdraw_address_defaults_to_self() {
        let mut accounts = accounts();
        let addr = Address::from_pubkey([3; 33]);
        assert_eq!(accounts.withdraw_address(addr).unwrap(), addr);
        let other = Address::from_pubkey([4; 33]);
        accounts.set_withdraw_address(addr, other).unwrap();
        assert_eq!(accounts.withdraw_address(addr).unwrap(), other);
    }
}
