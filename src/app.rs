//! The top-level state machine: wires `coins`, `staking`, `distribution`,
//! `slashing`, and `governance` together and drives them through the
//! ABCI block lifecycle.
//!
//! `Params` is deliberately not one of `App`'s `State` children (see
//! `params/mod.rs`) — it is built once from genesis and held alongside
//! the persisted tree, not inside it. Everything else here is plain
//! orchestration: `app.rs` is where the fixed call ordering spec.md's
//! design notes require (distribution settles a delegation's pending
//! reward before its share count changes; distribution runs before
//! slashing on every hook both subsystems share) actually lives, since
//! no single module is allowed to call another module directly.

use crate::coins::{Accounts, Address, Amount, Decimal};
use crate::collections::Map;
use crate::context::with_context;
use crate::distribution::Distribution;
use crate::encoding::Decode;
use crate::error::Error;
use crate::governance::{Governance, ProposalStatus};
use crate::msg::{Genesis, Msg};
use crate::params::Params;
use crate::plugins::{Height, Signer, Time, ValidatorVote, Validators};
use crate::slashing::Slashing;
use crate::staking::{CreateValidator, DelegationKey, PowerUpdate, SlashAdapter, Staking};
use crate::state::{Attacher, Flusher, Loader, State};
use crate::store::Store;
use crate::tx::Tx;
use crate::Result;

/// Reserved account that transaction fees are deposited to at `DeliverTx`
/// and drained from at the following `BeginBlock`, mirroring the
/// Cosmos-SDK `fee_collector` module account. Never reachable as an
/// ordinary signer's address since it isn't derived from any public key.
fn fee_collector() -> Address {
    Address::from([0xff; Address::LENGTH])
}

/// Double-sign evidence as handed down from the consensus engine at
/// `BeginBlock`; `time`/`now` let `App` compute the evidence's age against
/// `SlashingParams::max_evidence_age_seconds`.
pub struct Evidence {
    pub address: Address,
    pub height: u64,
    pub time: i64,
    pub power: u64,
}

pub struct App {
    pub accounts: Accounts,
    pub staking: Staking,
    pub distribution: Distribution,
    pub slashing: Slashing,
    pub governance: Governance,
    /// Tracks, per `(delegator, validator)`, the completion time of the
    /// most recent redelegation landing in `validator` — a new
    /// redelegation can't move shares that arrived this way until that
    /// time passes, which is how this chain blocks the transitive
    /// redelegation hops spec.md's staking module calls out as rejected
    /// at this layer rather than inside `staking` itself.
    pub redelegation_locks: Map<DelegationKey, i64>,
    /// The next nonce each address must sign to prevent replay. `Tx`
    /// decoding and signature verification happen here rather than in a
    /// dedicated ante-handler module, since this is the only place a
    /// verified signer address gets installed as ambient context anyway.
    pub nonces: Map<Address, u64>,
    pub params: Params,
}

impl App {
    /// Builds a fresh `App` over `store`'s module subtrees. `params` is
    /// supplied by the caller (decoded from genesis at `InitChain`, or
    /// recovered from whatever durable config the node keeps across
    /// restarts) rather than loaded through this tree.
    pub fn new(store: Store, params: Params) -> Result<Self> {
        let mut app = App {
            accounts: Accounts::default(),
            staking: Staking::default(),
            distribution: Distribution::default(),
            slashing: Slashing::default(),
            governance: Governance::default(),
            redelegation_locks: Map::default(),
            nonces: Map::default(),
            params,
        };
        app.attach(store)?;
        Ok(app)
    }

    fn attach(&mut self, store: Store) -> Result<()> {
        Attacher::new(store)
            .attach_child(&mut self.accounts)?
            .attach_child(&mut self.staking)?
            .attach_child(&mut self.distribution)?
            .attach_child(&mut self.slashing)?
            .attach_child(&mut self.governance)?
            .attach_child(&mut self.redelegation_locks)?
            .attach_child(&mut self.nonces)?;
        Ok(())
    }

    /// Flushes every persisted child to `out`, in the same order
    /// `load_from` expects them back. `params` is not written here.
    pub fn flush_into<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.accounts)?
            .flush_child(self.staking)?
            .flush_child(self.distribution)?
            .flush_child(self.slashing)?
            .flush_child(self.governance)?
            .flush_child(self.redelegation_locks)?
            .flush_child(self.nonces)?;
        Ok(())
    }

    pub fn load_from(store: Store, bytes: &mut &[u8], params: Params) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(App {
            accounts: loader.load_child()?,
            staking: loader.load_child()?,
            distribution: loader.load_child()?,
            slashing: loader.load_child()?,
            governance: loader.load_child()?,
            redelegation_locks: loader.load_child()?,
            nonces: loader.load_child()?,
            params,
        })
    }

    /// spec.md 4.5.1: seeds genesis validators and balances. Each genesis
    /// validator self-delegates its starting amount exactly like a
    /// `MsgCreateValidator` would.
    pub fn init_chain(&mut self, genesis: Genesis, now: i64) -> Result<()> {
        for (address, amount) in genesis.balances {
            self.accounts.deposit(address, amount)?;
        }
        for validator in genesis.validators {
            self.staking.create_validator(
                CreateValidator {
                    operator: validator.operator,
                    consensus_key: validator.consensus_key,
                    amount: validator.amount,
                    commission_rate: validator.commission_rate,
                    commission_max_rate: Decimal::one(),
                    commission_max_change_rate: Decimal::one(),
                    min_self_delegation: Amount::new(1),
                },
                now,
            )?;
            let issued = self
                .staking
                .validator(validator.operator)?
                .delegations
                .get(validator.operator)?
                .unwrap_or_default()
                .shares;
            self.distribution
                .set_delegator_starting_info(validator.operator, validator.operator, 1, issued, 0)?;
        }
        self.staking.end_block_step(self.params.staking.max_validators)?;
        Ok(())
    }

    /// spec.md 4.5.2: allocates the previous block's collected fees,
    /// updates liveness tracking for every validator in the last
    /// commit, and processes double-sign evidence — in that order, so a
    /// validator tombstoned by evidence this block still earned its
    /// share of the fees it helped finalize.
    pub fn begin_block(
        &mut self,
        height: u64,
        now: i64,
        votes: Validators,
        byzantine: Vec<Evidence>,
    ) -> Result<()> {
        with_context(Height(height), || -> Result<()> {
            with_context(Time::from_seconds(now), || -> Result<()> {
                let collected = self.accounts.balance(fee_collector())?;
                self.accounts.withdraw(fee_collector(), collected)?;
                self.distribution.allocate_fees(
                    Decimal::from(collected),
                    &votes,
                    &self.params.distribution,
                    &self.staking,
                )?;

                for vote in &votes.votes {
                    self.handle_validator_vote(*vote, height)?;
                }

                for evidence in byzantine {
                    self.handle_evidence(evidence, height, now)?;
                }

                Ok(())
            })
        })
    }

    fn handle_validator_vote(&mut self, vote: ValidatorVote, height: u64) -> Result<()> {
        let mut adapter = SlashAdapter {
            staking: &mut self.staking,
            distribution: &mut self.distribution,
        };
        self.slashing
            .handle_validator_signature(vote.address, vote.power, vote.signed, height, &self.params.slashing, &mut adapter)?;
        Ok(())
    }

    fn handle_evidence(&mut self, evidence: Evidence, height: u64, now: i64) -> Result<()> {
        let mut adapter = SlashAdapter {
            staking: &mut self.staking,
            distribution: &mut self.distribution,
        };
        self.slashing.handle_double_sign(
            evidence.address,
            evidence.height,
            now - evidence.time,
            evidence.power,
            height,
            &self.params.slashing,
            &mut adapter,
        )
    }

    /// spec.md 4.5.4: matures unbonding/redelegation entries, closes any
    /// governance voting period ending this block, and recomputes the
    /// power-ranked validator set, returning the deltas the consensus
    /// engine needs to hear about.
    pub fn end_block(&mut self, now: i64) -> Result<Vec<PowerUpdate>> {
        self.staking.process_maturities(now, &mut self.accounts)?;

        let closing: Vec<u64> = self
            .governance
            .proposals
            .iter()?
            .into_iter()
            .filter(|(_, proposal)| proposal.status == ProposalStatus::VotingPeriod && now >= proposal.voting_end_time)
            .map(|(id, _)| id)
            .collect();
        for id in closing {
            self.governance
                .end_voting_period(id, now, &self.params.governance, &self.staking, &mut self.accounts)?;
        }

        self.staking.end_block_step(self.params.staking.max_validators)
    }

    /// spec.md 4.5.3: verifies the message's fee can be paid, installs
    /// the ambient `Signer`/`Height`/`Time` context, and dispatches.
    /// Signature verification itself happens at the ante-handler boundary
    /// upstream of this call (see `plugins::Signer`'s doc comment); by
    /// the time a `Msg` reaches here, `signer` is already authenticated.
    pub fn deliver_tx(&mut self, signer: Address, msg: Msg, fee: Amount, height: u64, now: i64) -> Result<()> {
        self.accounts.transfer(signer, fee_collector(), fee)?;
        with_context(Signer { address: signer }, || {
            with_context(Height(height), || {
                with_context(Time::from_seconds(now), || self.handle_msg(signer, msg, height, now))
            })
        })
    }

    /// The ante-handler boundary `deliver_tx`'s doc comment refers to:
    /// decodes a raw `RequestDeliverTx.tx` payload into a [`Tx`], verifies
    /// its signature and nonce, advances the nonce, and dispatches.
    pub fn deliver_tx_bytes(&mut self, tx_bytes: &[u8], height: u64, now: i64) -> Result<()> {
        let tx = Tx::decode(tx_bytes)?;
        let signer = self.check_and_advance_nonce(&tx)?;
        self.deliver_tx(signer, tx.msg, tx.fee, height, now)
    }

    /// `RequestCheckTx`'s validity check: verifies the signature and that
    /// the nonce is at least the next expected one, without mutating
    /// state. A full mempool implementation would run this against a
    /// separate check-state cache so a sequence of pending transactions
    /// validates correctly before any of them commit; this crate's single
    /// always-committed `App` doesn't model that cache layer.
    pub fn check_tx_bytes(&self, tx_bytes: &[u8]) -> Result<()> {
        let tx = Tx::decode(tx_bytes)?;
        let signer = tx.verify()?;
        let expected = self.nonces.get(signer)?.unwrap_or_default();
        if tx.nonce < expected {
            return Err(Error::App("transaction nonce already used".into()));
        }
        Ok(())
    }

    fn check_and_advance_nonce(&mut self, tx: &Tx) -> Result<Address> {
        let signer = tx.verify()?;
        let expected = self.nonces.get(signer)?.unwrap_or_default();
        if tx.nonce != expected {
            return Err(Error::App("transaction nonce does not match expected sequence".into()));
        }
        self.nonces.insert(signer, expected + 1)?;
        Ok(signer)
    }

    fn handle_msg(&mut self, signer: Address, msg: Msg, height: u64, now: i64) -> Result<()> {
        match msg {
            Msg::Send(m) => self.accounts.send(m),
            Msg::CreateValidator(m) => self.create_validator(signer, m, now),
            Msg::EditValidator(m) => {
                if m.operator != signer {
                    return Err(Error::App("only a validator's own operator can edit it".into()));
                }
                self.staking.edit_validator(m.operator, m.commission_rate, now)
            }
            Msg::Delegate(m) => self.delegate(signer, m.validator, m.amount, height),
            Msg::Undelegate(m) => self.undelegate(signer, m.validator, m.shares, height, now),
            Msg::BeginRedelegate(m) => self.begin_redelegate(signer, m.src_validator, m.dst_validator, m.shares, height, now),
            Msg::Unjail(m) => self.unjail(signer, m.operator, now, height),
            Msg::WithdrawDelegatorReward(m) => self
                .distribution
                .withdraw_delegation_reward(
                    m.validator,
                    signer,
                    self.staking.validator(m.validator)?.delegations.get(signer)?.unwrap_or_default().shares,
                    height,
                    &mut self.accounts,
                    &self.staking,
                )
                .map(|_| ()),
            Msg::WithdrawValidatorCommission(m) => {
                if m.operator != signer {
                    return Err(Error::App("only a validator's operator can withdraw its commission".into()));
                }
                self.distribution.withdraw_validator_commission(m.operator, &mut self.accounts).map(|_| ())
            }
            Msg::SetWithdrawAddress(m) => self.accounts.set_withdraw_address(signer, m.withdraw_address),
            Msg::SubmitProposal(m) => self
                .governance
                .submit_proposal(m.title, m.description, signer, m.initial_deposit, now, &self.params.governance, &mut self.accounts)
                .map(|_| ()),
            Msg::Deposit(m) => self
                .governance
                .deposit(m.proposal_id, signer, m.amount, now, &self.params.governance, &mut self.accounts),
            Msg::Vote(m) => self.governance.vote(m.proposal_id, signer, m.option, now),
        }
    }

    fn create_validator(&mut self, signer: Address, m: crate::msg::MsgCreateValidator, now: i64) -> Result<()> {
        if m.operator != signer {
            return Err(Error::App("validator operator must match the transaction signer".into()));
        }
        self.staking.create_validator(
            CreateValidator {
                operator: m.operator,
                consensus_key: m.consensus_key,
                amount: m.amount,
                commission_rate: m.commission_rate,
                commission_max_rate: m.commission_max_rate,
                commission_max_change_rate: m.commission_max_change_rate,
                min_self_delegation: m.min_self_delegation,
            },
            now,
        )?;
        self.accounts.withdraw(signer, m.amount)?;
        let issued = self
            .staking
            .validator(m.operator)?
            .delegations
            .get(m.operator)?
            .unwrap_or_default()
            .shares;
        self.distribution.set_delegator_starting_info(m.operator, m.operator, 1, issued, 0)
    }

    fn delegate(&mut self, delegator: Address, validator: Address, amount: Amount, height: u64) -> Result<()> {
        self.settle_delegation(validator, delegator, height)?;
        self.staking.delegate(delegator, validator, amount)?;
        self.accounts.withdraw(delegator, amount)?;
        self.record_delegation(validator, delegator, height)
    }

    fn undelegate(&mut self, delegator: Address, validator: Address, shares: Decimal, height: u64, now: i64) -> Result<()> {
        self.settle_delegation(validator, delegator, height)?;
        self.staking.undelegate(
            delegator,
            validator,
            shares,
            height,
            now,
            self.params.staking.unbonding_period_seconds,
            self.params.staking.max_entries,
        )?;
        self.record_delegation(validator, delegator, height)
    }

    fn begin_redelegate(
        &mut self,
        delegator: Address,
        src: Address,
        dst: Address,
        shares: Decimal,
        height: u64,
        now: i64,
    ) -> Result<()> {
        if let Some(locked_until) = self.redelegation_locks.get(DelegationKey { delegator, validator: src })? {
            if now < locked_until {
                return Err(Error::App(
                    "cannot redelegate shares that themselves arrived via an in-flight redelegation".into(),
                ));
            }
        }

        self.settle_delegation(src, delegator, height)?;
        self.settle_delegation(dst, delegator, height)?;
        self.staking.begin_redelegation(
            delegator,
            src,
            dst,
            shares,
            height,
            now,
            self.params.staking.redelegation_period_seconds,
            self.params.staking.max_entries,
        )?;
        self.record_delegation(src, delegator, height)?;
        self.record_delegation(dst, delegator, height)?;

        let completion_time = now + self.params.staking.redelegation_period_seconds;
        self.redelegation_locks.insert(DelegationKey { delegator, validator: dst }, completion_time)
    }

    fn unjail(&mut self, signer: Address, operator: Address, now: i64, height: u64) -> Result<()> {
        if signer != operator {
            return Err(Error::App("only a validator's own operator can unjail it".into()));
        }
        self.slashing.unjail(operator, now, height)?;
        self.staking.unjail(operator)
    }

    /// Ends the validator's current reward period against its
    /// pre-mutation token count and pays out the delegator's pending
    /// reward, without re-establishing a starting-info record — the
    /// Cosmos-SDK `BeforeDelegationSharesModified` half of the pair.
    fn settle_delegation(&mut self, validator: Address, delegator: Address, height: u64) -> Result<()> {
        if !self.staking.validator_exists(validator)? {
            return Ok(());
        }
        self.distribution
            .withdraw_delegation_reward(validator, delegator, Decimal::zero(), height, &mut self.accounts, &self.staking)
            .map(|_| ())
    }

    /// Re-establishes the delegator's starting-info record against its
    /// post-mutation share count at the period `settle_delegation` just
    /// opened — the `AfterDelegationModified` half of the pair.
    fn record_delegation(&mut self, validator: Address, delegator: Address, height: u64) -> Result<()> {
        let shares = self
            .staking
            .validator(validator)?
            .delegations
            .get(delegator)?
            .unwrap_or_default()
            .shares;
        let period = self
            .distribution
            .validators
            .get(validator)?
            .map(|info| info.current_rewards.period)
            .unwrap_or(1);
        self.distribution.set_delegator_starting_info(validator, delegator, period, shares, height)
    }
}

impl crate::call::Call for App {
    type Call = (Address, Msg, Amount, u64, i64);

    fn call(&mut self, call: Self::Call) -> Result<()> {
        let (signer, msg, fee, height, now) = call;
        self.deliver_tx(signer, msg, fee, height, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{GenesisValidator, MsgDelegate};
    use crate::store::MapStore;

    fn app() -> App {
        App::new(Store::new(MapStore::new()), Params::default()).unwrap()
    }

    fn addr(byte: u8) -> Address {
        Address::from_pubkey([byte; 33])
    }

    #[test]
    fn init_chain_seeds_validator_and_balances() {
        let mut app = app();
        let operator = addr(1);
        let delegator = addr(2);
        app.init_chain(
            Genesis {
                validators: vec![GenesisValidator {
                    operator,
                    consensus_key: operator,
                    amount: Amount::new(1_000_000),
                    commission_rate: Decimal::zero(),
                }],
                balances: vec![(delegator, Amount::new(500))],
            },
            0,
        )
        .unwrap();

        assert_eq!(app.staking.validator(operator).unwrap().tokens, Amount::new(1_000_000));
        assert_eq!(app.accounts.balance(delegator).unwrap(), Amount::new(500));
    }

    #[test]
    fn deliver_tx_delegate_moves_balance_and_records_starting_info() {
        let mut app = app();
        let operator = addr(3);
        app.init_chain(
            Genesis {
                validators: vec![GenesisValidator {
                    operator,
                    consensus_key: operator,
                    amount: Amount::new(1_000_000),
                    commission_rate: Decimal::zero(),
                }],
                balances: vec![],
            },
            0,
        )
        .unwrap();

        let delegator = addr(4);
        app.accounts.deposit(delegator, Amount::new(1_000)).unwrap();
        app.deliver_tx(
            delegator,
            Msg::Delegate(MsgDelegate { validator: operator, amount: Amount::new(500) }),
            Amount::zero(),
            1,
            10,
        )
        .unwrap();

        assert_eq!(app.accounts.balance(delegator).unwrap(), Amount::new(500));
        assert!(app
            .distribution
            .delegator_starting_info
            .get(crate::distribution::DelegationKey { delegator, validator: operator })
            .unwrap()
            .is_some());
    }

    #[test]
    fn redelegation_lock_blocks_transitive_hop() {
        let mut app = app();
        let a = addr(5);
        let b = addr(6);
        let c = addr(7);
        app.init_chain(
            Genesis {
                validators: vec![
                    GenesisValidator { operator: a, consensus_key: a, amount: Amount::new(1_000_000), commission_rate: Decimal::zero() },
                    GenesisValidator { operator: b, consensus_key: b, amount: Amount::new(1_000_000), commission_rate: Decimal::zero() },
                    GenesisValidator { operator: c, consensus_key: c, amount: Amount::new(1_000_000), commission_rate: Decimal::zero() },
                ],
                balances: vec![],
            },
            0,
        )
        .unwrap();

        let delegator = addr(8);
        app.accounts.deposit(delegator, Amount::new(1_000)).unwrap();
        app.deliver_tx(delegator, Msg::Delegate(MsgDelegate { validator: a, amount: Amount::new(1_000) }), Amount::zero(), 1, 0)
            .unwrap();

        app.begin_redelegate(delegator, a, b, Decimal::from(Amount::new(1_000)), 1, 0).unwrap();
        let err = app.begin_redelegate(delegator, b, c, Decimal::from(Amount::new(1_000)), 1, 1).unwrap_err();
        assert!(matches!(err, Error::App(_)));
    }
}
