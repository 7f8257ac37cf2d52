//! Addresses and the single-denomination token primitives.
//!
//! The reference framework's `coins` module is generic over an arbitrary
//! number of `Symbol`-tagged denominations (`Coin<S>`, `Give`/`Take` traits
//! for moving value between typed pools, a `multishare` ledger per asset).
//! This chain has exactly one stake/fee denomination throughout, so that
//! generality is collapsed down to [`amount::Amount`] (integer) and
//! [`decimal::Decimal`] (fixed-point) — see `DESIGN.md` for the rationale.

pub mod accounts;
pub mod amount;
pub mod decimal;

pub use amount::Amount;
pub use decimal::Decimal;

use std::fmt::Display;
use std::str::FromStr;

use bech32::{encode_to_fmt, FromBase32, ToBase32, Variant};
use ripemd::{Digest as _, Ripemd160};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::encoding::{Decode, Encode, Terminated};
use crate::state::State;
use crate::store::Store;
use crate::Result;

/// A 20-byte hash identifying an account, a validator operator, or a
/// validator's consensus key — the bech32 human-readable prefix on the
/// wire distinguishes which kind a given string names (see §6 of the
/// design notes); on-chain the three are all just `Address`.
#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Address {
    bytes: [u8; Address::LENGTH],
}

impl Terminated for Address {}

impl State for Address {
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

impl Address {
    pub const LENGTH: usize = 20;
    pub const NULL: Self = Address {
        bytes: [0; Self::LENGTH],
    };

    /// Derives an account address the way Cosmos-SDK chains derive one from
    /// a compressed secp256k1 public key: SHA-256 then RIPEMD-160.
    pub fn from_pubkey(bytes: [u8; 33]) -> Self {
        let mut sha = Sha256::new();
        sha.update(bytes);
        let hash = sha.finalize();

        let mut ripemd = Ripemd160::new();
        ripemd.update(hash);
        let hash = ripemd.finalize();

        let mut bytes = [0; Address::LENGTH];
        bytes.copy_from_slice(hash.as_slice());

        Self { bytes }
    }

    pub fn bytes(&self) -> [u8; Address::LENGTH] {
        self.bytes
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        encode_to_fmt(f, "nomic", self.bytes.to_base32(), Variant::Bech32).unwrap()
    }
}

impl FromStr for Address {
    type Err = bech32::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (hrp, data, variant) = bech32::decode(s)?;
        if hrp != "nomic" {
            return Err(bech32::Error::MissingSeparator);
        }
        if variant != Variant::Bech32 {
            return Err(bech32::Error::InvalidData(0));
        }
        let data: Vec<u8> = FromBase32::from_base32(&data)?;

        if data.len() != Address::LENGTH {
            return Err(bech32::Error::InvalidData(1));
        }
        let mut bytes = [0u8; Address::LENGTH];
        bytes.copy_from_slice(&data);

        Ok(Address { bytes })
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct AddressVisitor;

        impl<'de> serde::de::Visitor<'de> for AddressVisitor {
            type Value = Address;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a bech32-encoded string")
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                value.parse().map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_str(AddressVisitor)
    }
}

impl From<[u8; Address::LENGTH]> for Address {
    fn from(bytes: [u8; Address::LENGTH]) -> Self {
        Address { bytes }
    }
}

impl From<Address> for [u8; Address::LENGTH] {
    fn from(addr: Address) -> Self {
        addr.bytes()
    }
}
