//! The wire-level transaction messages this chain accepts, and the
//! genesis payload `InitChain` consumes.
//!
//! One message per state-changing operation spec.md names; `app.rs`
//! matches on [`Msg`] by hand rather than deriving a dispatch table (see
//! `call.rs` and `DESIGN.md`) since each arm needs a different mix of
//! module calls and context installation, not a uniform one.

use serde::{Deserialize, Serialize};

use crate::coins::{Address, Amount, Decimal};
use crate::encoding::{Decode, Encode};
use crate::governance::VoteOption;

#[derive(Encode, Decode)]
pub struct MsgCreateValidator {
    pub operator: Address,
    pub consensus_key: Address,
    pub amount: Amount,
    pub commission_rate: Decimal,
    pub commission_max_rate: Decimal,
    pub commission_max_change_rate: Decimal,
    pub min_self_delegation: Amount,
}

#[derive(Encode, Decode)]
pub struct MsgEditValidator {
    pub operator: Address,
    pub commission_rate: Option<Decimal>,
}

#[derive(Encode, Decode)]
pub struct MsgDelegate {
    pub validator: Address,
    pub amount: Amount,
}

#[derive(Encode, Decode)]
pub struct MsgUndelegate {
    pub validator: Address,
    pub shares: Decimal,
}

#[derive(Encode, Decode)]
pub struct MsgBeginRedelegate {
    pub src_validator: Address,
    pub dst_validator: Address,
    pub shares: Decimal,
}

#[derive(Encode, Decode)]
pub struct MsgUnjail {
    pub operator: Address,
}

#[derive(Encode, Decode)]
pub struct MsgWithdrawDelegatorReward {
    pub validator: Address,
}

#[derive(Encode, Decode)]
pub struct MsgWithdrawValidatorCommission {
    pub operator: Address,
}

#[derive(Encode, Decode)]
pub struct MsgSetWithdrawAddress {
    pub withdraw_address: Address,
}

#[derive(Encode, Decode)]
pub struct MsgSubmitProposal {
    pub title: Vec<u8>,
    pub description: Vec<u8>,
    pub initial_deposit: Amount,
}

#[derive(Encode, Decode)]
pub struct MsgDeposit {
    pub proposal_id: u64,
    pub amount: Amount,
}

#[derive(Encode, Decode)]
pub struct MsgVote {
    pub proposal_id: u64,
    pub option: VoteOption,
}

/// Every transaction carries exactly one of these; the signer is supplied
/// out of band by whatever verified the transaction's signature (see
/// `plugins::Signer` and `context.rs`), not as a message field. The
/// `ed` encoding is this chain's wire format: a transaction's raw bytes
/// are a tag byte followed by the variant's own `Encode`d fields, the
/// same canonical representation the store uses internally.
#[derive(Encode, Decode)]
pub enum Msg {
    Send(crate::coins::accounts::MsgSend),
    CreateValidator(MsgCreateValidator),
    EditValidator(MsgEditValidator),
    Delegate(MsgDelegate),
    Undelegate(MsgUndelegate),
    BeginRedelegate(MsgBeginRedelegate),
    Unjail(MsgUnjail),
    WithdrawDelegatorReward(MsgWithdrawDelegatorReward),
    WithdrawValidatorCommission(MsgWithdrawValidatorCommission),
    SetWithdrawAddress(MsgSetWithdrawAddress),
    SubmitProposal(MsgSubmitProposal),
    Deposit(MsgDeposit),
    Vote(MsgVote),
}

/// A validator entry in the genesis file `InitChain` hands to `App`.
/// Unlike `Msg`, genesis is read once from a JSON file alongside
/// Tendermint's own `genesis.json`, so it derives `serde` rather than
/// the wire `Encode`/`Decode`.
#[derive(Serialize, Deserialize)]
pub struct GenesisValidator {
    pub operator: Address,
    pub consensus_key: Address,
    pub amount: Amount,
    pub commission_rate: Decimal,
}

#[derive(Default, Serialize, Deserialize)]
pub struct Genesis {
    pub validators: Vec<GenesisValidator>,
    pub balances: Vec<(Address, Amount)>,
}
