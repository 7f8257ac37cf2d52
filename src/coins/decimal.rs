//! Fixed-point ratios.
//!
//! F1 distribution's cumulative reward ratios and slashing's fraction
//! constants need more precision than an integer amount but must still be
//! exact and deterministic across nodes — `rust_decimal` gives base-10
//! fixed-point arithmetic with no rounding surprises from binary floats.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal as Inner;
use serde::Deserialize;

use crate::encoding::{Decode, Encode, Result as EdResult, Terminated};
use crate::error::Error;
use crate::state::State;
use crate::store::Store;
use crate::Result;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Decimal(Inner);

impl Terminated for Decimal {}

impl Decimal {
    pub fn zero() -> Self {
        Decimal(Inner::ZERO)
    }

    pub fn one() -> Self {
        Decimal(Inner::ONE)
    }

    pub fn from_ratio(num: impl Into<i64>, denom: impl Into<i64>) -> Result<Self> {
        let denom = denom.into();
        if denom == 0 {
            return Err(Error::Coins("division by zero".into()));
        }
        Ok(Decimal(Inner::from(num.into()) / Inner::from(denom)))
    }

    pub fn inner(self) -> Inner {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == Inner::ZERO
    }

    pub fn checked_add(self, other: Decimal) -> Result<Decimal> {
        self.0
            .checked_add(other.0)
            .map(Decimal)
            .ok_or_else(|| Error::Coins("decimal overflow".into()))
    }

    pub fn checked_sub(self, other: Decimal) -> Result<Decimal> {
        self.0
            .checked_sub(other.0)
            .map(Decimal)
            .ok_or_else(|| Error::Coins("decimal underflow".into()))
    }

    pub fn checked_mul(self, other: Decimal) -> Result<Decimal> {
        self.0
            .checked_mul(other.0)
            .map(Decimal)
            .ok_or_else(|| Error::Coins("decimal overflow".into()))
    }

    /// Truncates toward zero to the integer part, per this crate's
    /// round-down convention for rewards and slash amounts.
    pub fn to_amount_floor(self) -> Result<crate::coins::amount::Amount> {
        let truncated = self.0.trunc();
        let value: i128 = truncated
            .try_into()
            .map_err(|_| Error::Coins("decimal out of amount range".into()))?;
        if value < 0 {
            return Err(Error::Coins("negative decimal has no amount".into()));
        }
        Ok(crate::coins::amount::Amount::new(value as u128))
    }
}

impl From<crate::coins::amount::Amount> for Decimal {
    fn from(amount: crate::coins::amount::Amount) -> Self {
        Decimal(Inner::from(amount.value()))
    }
}

impl std::ops::Add for Decimal {
    type Output = Decimal;
    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;
    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Decimal {
    type Output = Decimal;
    fn mul(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 * rhs.0)
    }
}

impl std::ops::Div for Decimal {
    type Output = Decimal;
    fn div(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 / rhs.0)
    }
}

impl State for Decimal {
    fn attach(&mut self, _store: Store) -> Result<()> {
        Ok(())
    }

    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        out.write_all(&self.0.serialize())?;
        Ok(())
    }

    fn load(_store: Store, bytes: &mut &[u8]) -> Result<Self> {
        if bytes.len() < 16 {
            return Err(Error::Coins("truncated decimal".into()));
        }
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&bytes[..16]);
        *bytes = &bytes[16..];
        Ok(Decimal(Inner::deserialize(buf)))
    }
}

/// Same 16-byte layout `State` uses, so a `Decimal` embedded in a wire
/// message round-trips identically to one embedded in the store.
impl Encode for Decimal {
    fn encode_into<W: std::io::Write>(&self, dest: &mut W) -> EdResult<()> {
        dest.write_all(&self.0.serialize())?;
        Ok(())
    }

    fn encoding_length(&self) -> EdResult<usize> {
        Ok(16)
    }
}

impl Decode for Decimal {
    fn decode<R: std::io::Read>(mut input: R) -> EdResult<Self> {
        let mut buf = [0u8; 16];
        input.read_exact(&mut buf)?;
        Ok(Decimal(Inner::deserialize(buf)))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Decimal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Inner::from_str(s)
            .map(Decimal)
            .map_err(|_| Error::Coins(format!("invalid decimal {:?}", s)))
    }
}

impl serde::Serialize for Decimal {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.0.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Decimal {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Decimal::from_str(&s).map_err(serde::de::Error::custom)
    }
}
