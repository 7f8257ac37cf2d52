//! Exact integer token amounts.
//!
//! Every balance and every coin movement in this crate is an `Amount` —
//! wall-clock floats never enter the state machine, and all arithmetic
//! is checked so overflow or a negative balance surfaces as an error at
//! the call site that caused it rather than silently wrapping.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::Deserialize;

use crate::encoding::{Decode, Encode, Terminated};
use crate::error::Error;
use crate::state::State;
use crate::store::Store;
use crate::Result;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode)]
pub struct Amount(u128);

impl Terminated for Amount {}

impl Amount {
    pub const fn new(value: u128) -> Self {
        Amount(value)
    }

    pub const fn zero() -> Self {
        Amount(0)
    }

    pub fn value(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Result<Amount> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or_else(|| Error::Coins("amount overflow".into()))
    }

    pub fn checked_sub(self, other: Amount) -> Result<Amount> {
        self.0
            .checked_sub(other.0)
            .map(Amount)
            .ok_or_else(|| Error::Coins("insufficient balance".into()))
    }

    /// Multiplies by a rational `num/denom`, truncating toward zero. Used
    /// throughout distribution and slashing math, which define rounding
    /// direction explicitly rather than leaving it to float semantics.
    pub fn mul_ratio(self, num: u128, denom: u128) -> Result<Amount> {
        if denom == 0 {
            return Err(Error::Coins("division by zero".into()));
        }
        self.0
            .checked_mul(num)
            .map(|v| Amount(v / denom))
            .ok_or_else(|| Error::Coins("amount overflow".into()))
    }

    pub fn min(self, other: Amount) -> Amount {
        std::cmp::min(self, other)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Amount(value as u128)
    }
}

impl From<u128> for Amount {
    fn from(value: u128) -> Self {
        Amount(value)
    }
}

impl Add for Amount {
    type Output = Amount;
    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 += rhs.0;
    }
}

impl Sub for Amount {
    type Output = Amount;
    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0 - rhs.0)
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Amount) {
        self.0 -= rhs.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::zero(), |a, b| a + b)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Genesis files carry amounts as quoted strings, the Cosmos-SDK
/// convention for values that can exceed a JSON number's safe range.
impl serde::Serialize for Amount {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.0.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Amount {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse::<u128>().map(Amount).map_err(serde::de::Error::custom)
    }
}

impl State for Amount {
    fn attach(&mut self, _store: Store) -> Result<()> {
        Ok(())
    }

    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        out.write_all(&Encode::encode(&self)?)?;
        Ok(())
    }

    fn load(_store: Store, bytes: &mut &[u8]) -> Result<Self> {
        Ok(Decode::decode(bytes)?)
    }
}
