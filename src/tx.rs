//! The signed transaction envelope. `app::App::deliver_tx` operates on an
//! already-authenticated `(signer, Msg, fee)` triple (see its doc comment);
//! this module is the ante-handler boundary that gets it there — decoding
//! the raw bytes an ABCI `RequestDeliverTx`/`RequestCheckTx` carries,
//! checking the nonce, and verifying the signature.

use ed25519_dalek::{PublicKey, Signature, Verifier};

use crate::coins::{Address, Amount};
use crate::encoding::{Decode, Encode};
use crate::error::Error;
use crate::msg::Msg;
use crate::Result;

/// A transaction as it appears on the wire: a message, the fee its signer
/// is willing to pay, a replay-protection nonce, and an ed25519 signature
/// over the three plus the sender's public key.
///
/// Addresses elsewhere in this crate are modeled as a hash of a
/// Cosmos-SDK-style compressed secp256k1 key (`Address::from_pubkey` takes
/// 33 bytes); this crate has no secp256k1 dependency to actually verify
/// such a signature, so `Tx` signs with the ed25519 key it does have a
/// verifier for, padding it with a leading zero tag byte to fit
/// `from_pubkey`'s 33-byte input. See `DESIGN.md`.
#[derive(Encode, Decode)]
pub struct Tx {
    pub pubkey: [u8; 32],
    pub nonce: u64,
    pub fee: Amount,
    pub msg: Msg,
    pub signature: [u8; 64],
}

impl Tx {
    fn signing_address(&self) -> Address {
        let mut tagged = [0u8; 33];
        tagged[1..].copy_from_slice(&self.pubkey);
        Address::from_pubkey(tagged)
    }

    fn sign_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = self.nonce.encode()?;
        bytes.extend(self.fee.encode()?);
        bytes.extend(self.msg.encode()?);
        Ok(bytes)
    }

    /// Verifies the signature and returns the signer's address. Does not
    /// check the nonce — that's sequenced against on-chain state by the
    /// caller, which needs the signer address first to look it up.
    pub fn verify(&self) -> Result<Address> {
        let pubkey = PublicKey::from_bytes(&self.pubkey)
            .map_err(|_| Error::App("invalid transaction public key".into()))?;
        let signature = Signature::from_bytes(&self.signature)
            .map_err(|_| Error::App("invalid transaction signature".into()))?;
        let sign_bytes = self.sign_bytes()?;
        pubkey
            .verify(&sign_bytes, &signature)
            .map_err(|_| Error::App("transaction signature verification failed".into()))?;
        Ok(self.signing_address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::MsgDeposit;
    use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signer as _};

    fn test_keypair() -> Keypair {
        let secret = SecretKey::from_bytes(&[7u8; 32]).unwrap();
        let public = PublicKey::from(&secret);
        Keypair { secret, public }
    }

    fn signed_tx(keypair: &Keypair, nonce: u64, fee: Amount, msg: Msg) -> Tx {
        let mut tx = Tx {
            pubkey: keypair.public.to_bytes(),
            nonce,
            fee,
            msg,
            signature: [0u8; 64],
        };
        let sign_bytes = tx.sign_bytes().unwrap();
        tx.signature = keypair.sign(&sign_bytes).to_bytes();
        tx
    }

    #[test]
    fn verify_accepts_correctly_signed_tx() {
        let keypair = test_keypair();
        let tx = signed_tx(&keypair, 0, Amount::zero(), Msg::Deposit(MsgDeposit { proposal_id: 1, amount: Amount::new(10) }));
        assert!(tx.verify().is_ok());
    }

    #[test]
    fn verify_rejects_tampered_fee() {
        let keypair = test_keypair();
        let mut tx = signed_tx(&keypair, 0, Amount::zero(), Msg::Deposit(MsgDeposit { proposal_id: 1, amount: Amount::new(10) }));
        tx.fee = Amount::new(1_000_000);
        assert!(tx.verify().is_err());
    }
}
