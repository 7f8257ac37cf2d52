//! Text proposals, deposits, stake-weighted voting, and tallying.
//!
//! Governance reads voting power from staking through the same "narrow
//! capability" pattern distribution and slashing use — [`VotingPowerSource`]
//! — rather than holding a reference to `Staking` itself.

use crate::coins::{Accounts, Address, Amount, Decimal};
use crate::collections::Map;
use crate::error::Error;
use crate::params::GovernanceParams;
use crate::state::{Attacher, Flusher, Loader, State};
use crate::store::Store;
use crate::Result;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ProposalStatus {
    #[default]
    DepositPeriod,
    VotingPeriod,
    Passed,
    Rejected,
    Vetoed,
    Failed,
}

impl State for ProposalStatus {
    fn attach(&mut self, _store: Store) -> Result<()> {
        Ok(())
    }
    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        let tag: u8 = match self {
            ProposalStatus::DepositPeriod => 0,
            ProposalStatus::VotingPeriod => 1,
            ProposalStatus::Passed => 2,
            ProposalStatus::Rejected => 3,
            ProposalStatus::Vetoed => 4,
            ProposalStatus::Failed => 5,
        };
        tag.flush(out)
    }
    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        Ok(match u8::load(store, bytes)? {
            0 => ProposalStatus::DepositPeriod,
            1 => ProposalStatus::VotingPeriod,
            2 => ProposalStatus::Passed,
            3 => ProposalStatus::Rejected,
            4 => ProposalStatus::Vetoed,
            5 => ProposalStatus::Failed,
            _ => return Err(Error::Governance("invalid proposal status tag".into())),
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VoteOption {
    Yes,
    Abstain,
    No,
    NoWithVeto,
}

impl crate::encoding::Encode for VoteOption {
    fn encode_into<W: std::io::Write>(&self, dest: &mut W) -> crate::encoding::Result<()> {
        let tag: u8 = match self {
            VoteOption::Yes => 0,
            VoteOption::Abstain => 1,
            VoteOption::No => 2,
            VoteOption::NoWithVeto => 3,
        };
        dest.write_all(&[tag])?;
        Ok(())
    }

    fn encoding_length(&self) -> crate::encoding::Result<usize> {
        Ok(1)
    }
}

impl crate::encoding::Decode for VoteOption {
    fn decode<R: std::io::Read>(mut input: R) -> crate::encoding::Result<Self> {
        let mut tag = [0u8; 1];
        input.read_exact(&mut tag)?;
        Ok(match tag[0] {
            0 => VoteOption::Yes,
            1 => VoteOption::Abstain,
            2 => VoteOption::No,
            3 => VoteOption::NoWithVeto,
            _ => {
                return Err(
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid vote option tag").into(),
                )
            }
        })
    }
}

impl State for VoteOption {
    fn attach(&mut self, _store: Store) -> Result<()> {
        Ok(())
    }
    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        let tag: u8 = match self {
            VoteOption::Yes => 0,
            VoteOption::Abstain => 1,
            VoteOption::No => 2,
            VoteOption::NoWithVeto => 3,
        };
        tag.flush(out)
    }
    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        Ok(match u8::load(store, bytes)? {
            0 => VoteOption::Yes,
            1 => VoteOption::Abstain,
            2 => VoteOption::No,
            3 => VoteOption::NoWithVeto,
            _ => return Err(Error::Governance("invalid vote option tag".into())),
        })
    }
}

pub struct Proposal {
    pub id: u64,
    pub title: Vec<u8>,
    pub description: Vec<u8>,
    pub submitter: Address,
    pub status: ProposalStatus,
    pub total_deposit: Amount,
    pub submit_time: i64,
    pub deposit_end_time: i64,
    pub voting_start_time: i64,
    pub voting_end_time: i64,
}

impl Default for Proposal {
    fn default() -> Self {
        Proposal {
            id: 0,
            title: vec![],
            description: vec![],
            submitter: Address::NULL,
            status: ProposalStatus::DepositPeriod,
            total_deposit: Amount::zero(),
            submit_time: 0,
            deposit_end_time: 0,
            voting_start_time: 0,
            voting_end_time: 0,
        }
    }
}

impl State for Proposal {
    fn attach(&mut self, store: Store) -> Result<()> {
        Attacher::new(store)
            .attach_child(&mut self.id)?
            .attach_child(&mut self.title)?
            .attach_child(&mut self.description)?
            .attach_child(&mut self.submitter)?
            .attach_child(&mut self.status)?
            .attach_child(&mut self.total_deposit)?
            .attach_child(&mut self.submit_time)?
            .attach_child(&mut self.deposit_end_time)?
            .attach_child(&mut self.voting_start_time)?
            .attach_child(&mut self.voting_end_time)?;
        Ok(())
    }

    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.id)?
            .flush_child(self.title)?
            .flush_child(self.description)?
            .flush_child(self.submitter)?
            .flush_child(self.status)?
            .flush_child(self.total_deposit)?
            .flush_child(self.submit_time)?
            .flush_child(self.deposit_end_time)?
            .flush_child(self.voting_start_time)?
            .flush_child(self.voting_end_time)?;
        Ok(())
    }

    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(Proposal {
            id: loader.load_child()?,
            title: loader.load_child()?,
            description: loader.load_child()?,
            submitter: loader.load_child()?,
            status: loader.load_child()?,
            total_deposit: loader.load_child()?,
            submit_time: loader.load_child()?,
            deposit_end_time: loader.load_child()?,
            voting_start_time: loader.load_child()?,
            voting_end_time: loader.load_child()?,
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TallyResult {
    pub yes: Amount,
    pub abstain: Amount,
    pub no: Amount,
    pub no_with_veto: Amount,
}

/// What governance needs from staking to weigh a vote: a delegator's total
/// bonded stake across every validator, and the chain's total bonded
/// tokens for the quorum check.
pub trait VotingPowerSource {
    fn voting_power(&self, delegator: Address) -> Result<Amount>;
    fn total_bonded_tokens(&self) -> Result<Amount>;
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, ed::Encode, ed::Decode)]
pub struct ProposalKey {
    pub proposal: u64,
    pub address: Address,
}

#[derive(Default)]
pub struct Governance {
    pub proposals: Map<u64, Proposal>,
    pub deposits: Map<ProposalKey, Amount>,
    pub votes: Map<ProposalKey, VoteOption>,
    pub next_proposal_id: u64,
}

impl State for Governance {
    fn attach(&mut self, store: Store) -> Result<()> {
        Attacher::new(store)
            .attach_child(&mut self.proposals)?
            .attach_child(&mut self.deposits)?
            .attach_child(&mut self.votes)?
            .attach_child(&mut self.next_proposal_id)?;
        Ok(())
    }

    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.proposals)?
            .flush_child(self.deposits)?
            .flush_child(self.votes)?
            .flush_child(self.next_proposal_id)?;
        Ok(())
    }

    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        Ok(Governance {
            proposals: loader.load_child()?,
            deposits: loader.load_child()?,
            votes: loader.load_child()?,
            next_proposal_id: loader.load_child()?,
        })
    }
}

impl Governance {
    /// spec.md 4.4: opens the deposit period; a proposal only enters
    /// voting once its deposit total reaches `params.min_deposit`.
    pub fn submit_proposal(
        &mut self,
        title: Vec<u8>,
        description: Vec<u8>,
        submitter: Address,
        initial_deposit: Amount,
        now: i64,
        params: &GovernanceParams,
        accounts: &mut Accounts,
    ) -> Result<u64> {
        let id = self.next_proposal_id;
        self.next_proposal_id += 1;

        accounts.withdraw(submitter, initial_deposit)?;

        let mut proposal = Proposal {
            id,
            title,
            description,
            submitter,
            status: ProposalStatus::DepositPeriod,
            total_deposit: initial_deposit,
            submit_time: now,
            deposit_end_time: now + params.max_deposit_period_seconds,
            ..Default::default()
        };
        if !initial_deposit.is_zero() {
            self.deposits.insert(ProposalKey { proposal: id, address: submitter }, initial_deposit)?;
        }
        if proposal.total_deposit >= params.min_deposit {
            proposal.status = ProposalStatus::VotingPeriod;
            proposal.voting_start_time = now;
            proposal.voting_end_time = now + params.voting_period_seconds;
        }
        self.proposals.insert(id, proposal)?;
        Ok(id)
    }

    pub fn deposit(
        &mut self,
        proposal_id: u64,
        depositor: Address,
        amount: Amount,
        now: i64,
        params: &GovernanceParams,
        accounts: &mut Accounts,
    ) -> Result<()> {
        let mut proposal = self
            .proposals
            .get_mut(proposal_id)?
            .ok_or_else(|| Error::Governance("proposal does not exist".into()))?;
        if proposal.status != ProposalStatus::DepositPeriod {
            return Err(Error::Governance("proposal not in deposit period".into()));
        }
        if now > proposal.deposit_end_time {
            return Err(Error::Governance("deposit period has ended".into()));
        }

        accounts.withdraw(depositor, amount)?;
        proposal.total_deposit = proposal.total_deposit.checked_add(amount)?;
        let key = ProposalKey { proposal: proposal_id, address: depositor };
        let existing = self.deposits.get(key)?.unwrap_or_default();
        self.deposits.insert(key, existing.checked_add(amount)?)?;

        if proposal.total_deposit >= params.min_deposit {
            proposal.status = ProposalStatus::VotingPeriod;
            proposal.voting_start_time = now;
            proposal.voting_end_time = now + params.voting_period_seconds;
        }
        Ok(())
    }

    pub fn vote(&mut self, proposal_id: u64, voter: Address, option: VoteOption, now: i64) -> Result<()> {
        let proposal = self
            .proposals
            .get(proposal_id)?
            .ok_or_else(|| Error::Governance("proposal does not exist".into()))?;
        if proposal.status != ProposalStatus::VotingPeriod {
            return Err(Error::Governance("proposal not in voting period".into()));
        }
        if now > proposal.voting_end_time {
            return Err(Error::Governance("voting period has ended".into()));
        }
        self.votes.insert(ProposalKey { proposal: proposal_id, address: voter }, option)
    }

    fn tally(&self, proposal_id: u64, staking: &impl VotingPowerSource) -> Result<TallyResult> {
        let mut result = TallyResult::default();
        for (key, option) in self.votes.iter()? {
            if key.proposal != proposal_id {
                continue;
            }
            let power = staking.voting_power(key.address)?;
            match option {
                VoteOption::Yes => result.yes = result.yes.checked_add(power)?,
                VoteOption::Abstain => result.abstain = result.abstain.checked_add(power)?,
                VoteOption::No => result.no = result.no.checked_add(power)?,
                VoteOption::NoWithVeto => result.no_with_veto = result.no_with_veto.checked_add(power)?,
            }
        }
        Ok(result)
    }

    /// spec.md 4.4: runs at EndBlock for every proposal whose voting
    /// period has just closed. Quorum is checked against total bonded
    /// stake; if it passes quorum, the outcome is vetoed if
    /// `no_with_veto / total_votes` clears `veto_threshold`, otherwise
    /// passed if `yes / (total_votes - abstain)` clears `threshold`.
    pub fn end_voting_period(
        &mut self,
        proposal_id: u64,
        now: i64,
        params: &GovernanceParams,
        staking: &impl VotingPowerSource,
        accounts: &mut Accounts,
    ) -> Result<ProposalStatus> {
        let mut proposal = self
            .proposals
            .get_mut(proposal_id)?
            .ok_or_else(|| Error::Governance("proposal does not exist".into()))?;
        if proposal.status != ProposalStatus::VotingPeriod || now < proposal.voting_end_time {
            return Ok(proposal.status);
        }

        let tally = self.tally(proposal_id, staking)?;
        let total_voted = tally.yes.checked_add(tally.abstain)?.checked_add(tally.no)?.checked_add(tally.no_with_veto)?;
        let total_bonded = staking.total_bonded_tokens()?;

        let status = if total_bonded.is_zero() {
            ProposalStatus::Failed
        } else {
            let participation = Decimal::from_ratio(total_voted.value().min(i64::MAX as u128) as i64, total_bonded.value().min(i64::MAX as u128) as i64)?;
            if participation < params.quorum {
                ProposalStatus::Rejected
            } else if !tally.no_with_veto.is_zero()
                && Decimal::from(tally.no_with_veto) / Decimal::from(total_voted) >= params.veto_threshold
            {
                ProposalStatus::Vetoed
            } else {
                let non_abstaining = total_voted.checked_sub(tally.abstain)?;
                if non_abstaining.is_zero() {
                    ProposalStatus::Rejected
                } else if Decimal::from(tally.yes) / Decimal::from(non_abstaining) > params.threshold {
                    ProposalStatus::Passed
                } else {
                    ProposalStatus::Rejected
                }
            }
        };
        proposal.status = status;
        drop(proposal);

        // A vetoed proposal burns its deposits; every other terminal
        // outcome (passed, plain rejection, failed-for-lack-of-bonded-
        // stake) refunds them.
        if status == ProposalStatus::Vetoed {
            self.burn_deposits(proposal_id)?;
        } else {
            self.refund_deposits(proposal_id, accounts)?;
        }

        Ok(status)
    }

    fn refund_deposits(&mut self, proposal_id: u64, accounts: &mut Accounts) -> Result<()> {
        let entries: Vec<(ProposalKey, Amount)> = self
            .deposits
            .iter()?
            .into_iter()
            .filter(|(key, _)| key.proposal == proposal_id)
            .collect();
        for (key, amount) in entries {
            accounts.deposit(key.address, amount)?;
            self.deposits.remove(key)?;
        }
        Ok(())
    }

    fn burn_deposits(&mut self, proposal_id: u64) -> Result<()> {
        let entries: Vec<ProposalKey> = self
            .deposits
            .iter()?
            .into_iter()
            .map(|(k, _)| k)
            .filter(|key| key.proposal == proposal_id)
            .collect();
        for key in entries {
            self.deposits.remove(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MapStore;

    struct FixedVotingPower {
        power: std::collections::BTreeMap<Address, Amount>,
        total_bonded: Amount,
    }

    impl VotingPowerSource for FixedVotingPower {
        fn voting_power(&self, delegator: Address) -> Result<Amount> {
            Ok(self.power.get(&delegator).copied().unwrap_or_default())
        }
        fn total_bonded_tokens(&self) -> Result<Amount> {
            Ok(self.total_bonded)
        }
    }

    fn governance() -> Governance {
        let mut g = Governance::default();
        g.attach(Store::new(MapStore::new())).unwrap();
        g
    }

    #[test]
    fn deposit_period_transitions_to_voting() {
        let mut gov = governance();
        let mut accounts = Accounts::default();
        accounts.attach(Store::new(MapStore::new())).unwrap();
        let submitter = Address::from_pubkey([1; 33]);
        accounts.deposit(submitter, Amount::new(10_000_000)).unwrap();

        let params = GovernanceParams::default();
        let id = gov
            .submit_proposal(b"t".to_vec(), b"d".to_vec(), submitter, Amount::new(10_000_000), 0, &params, &mut accounts)
            .unwrap();
        let proposal = gov.proposals.get(id).unwrap().unwrap();
        assert_eq!(proposal.status, ProposalStatus::VotingPeriod);
    }

    #[test]
    fn proposal_passes_with_majority_yes() {
        let mut gov = governance();
        let mut accounts = Accounts::default();
        accounts.attach(Store::new(MapStore::new())).unwrap();
        let submitter = Address::from_pubkey([2; 33]);
        accounts.deposit(submitter, Amount::new(10_000_000)).unwrap();
        let params = GovernanceParams::default();
        let id = gov
            .submit_proposal(b"t".to_vec(), b"d".to_vec(), submitter, Amount::new(10_000_000), 0, &params, &mut accounts)
            .unwrap();

        let voter = Address::from_pubkey([3; 33]);
        gov.vote(id, voter, VoteOption::Yes, 0).unwrap();

        let mut power = std::collections::BTreeMap::new();
        power.insert(voter, Amount::new(1_000));
        let staking = FixedVotingPower { power, total_bonded: Amount::new(1_000) };

        let status = gov
            .end_voting_period(id, params.voting_period_seconds + 1, &params, &staking, &mut accounts)
            .unwrap();
        assert_eq!(status, ProposalStatus::Passed);
    }
}
