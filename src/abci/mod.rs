//! ABCI wiring: translates the Tendermint consensus engine's
//! request/response protocol into calls against [`app::App`], over a
//! `merk`-backed Merkle tree so `query` can answer with a proof.
//!
//! Gated behind the `abci` feature (see `Cargo.toml`) — everything else in
//! this crate is usable as a plain library (e.g. for simulation or testing)
//! without pulling in `abci2`, `tendermint-proto`, or `merk`.

mod merk_store;
pub mod node;

use std::cell::RefCell;

use tendermint_proto::abci::{
    Evidence as ProtoEvidence, RequestBeginBlock, RequestCheckTx, RequestDeliverTx, RequestEndBlock,
    RequestInfo, RequestInitChain, RequestQuery, ResponseBeginBlock, ResponseCheckTx, ResponseCommit,
    ResponseDeliverTx, ResponseEndBlock, ResponseInfo, ResponseInitChain, ResponseQuery, ValidatorUpdate,
};
use tendermint_proto::crypto::{public_key::Sum, PublicKey as ProtoPublicKey};

use crate::app::{App, Evidence};
use crate::coins::Address;
use crate::msg::Genesis;
use crate::params::Params;
use crate::plugins::{ValidatorVote, Validators};
use crate::store::{Read, Store};
use crate::Result;

pub use merk_store::MerkBackend;

/// Translates a block height/time pair and ABCI's last-commit/evidence
/// shapes into the plain types `app::App`'s own methods take, so `app.rs`
/// stays free of any protobuf dependency.
fn votes_from_last_commit(info: &tendermint_proto::abci::LastCommitInfo) -> Validators {
    let votes = info
        .votes
        .iter()
        .filter_map(|vote| {
            let validator = vote.validator.as_ref()?;
            let address = address_from_bytes(&validator.address);
            Some(ValidatorVote {
                address,
                power: validator.power as u64,
                signed: vote.signed_last_block,
            })
        })
        .collect();
    Validators { votes, proposer: None }
}

fn address_from_bytes(bytes: &[u8]) -> Address {
    let mut padded = [0u8; Address::LENGTH];
    let len = bytes.len().min(Address::LENGTH);
    padded[..len].copy_from_slice(&bytes[..len]);
    Address::from(padded)
}

fn evidence_from_proto(evidence: &[ProtoEvidence]) -> Vec<Evidence> {
    evidence
        .iter()
        .filter_map(|e| {
            let validator = e.validator.as_ref()?;
            let time = e.time.as_ref()?;
            Some(Evidence {
                address: address_from_bytes(&validator.address),
                height: e.height as u64,
                time: time.seconds,
                power: validator.power as u64,
            })
        })
        .collect()
}

/// Pads the 20-byte operator address this crate tracks consensus
/// validators by into the 32 bytes Tendermint's `PubKey::Ed25519` wants.
/// A real deployment would carry each validator's actual consensus public
/// key through `MsgCreateValidator`/genesis and report that instead; this
/// crate's domain model treats `Address` as the one on-chain identifier
/// for everything (see `coins::Address`'s doc comment) and never retains
/// the raw key, so this is a placeholder, not a working consensus key —
/// see `DESIGN.md`.
fn validator_update(operator: Address, power: u64) -> ValidatorUpdate {
    let mut padded = [0u8; 32];
    padded[..Address::LENGTH].copy_from_slice(&operator.bytes());
    ValidatorUpdate {
        pub_key: Some(ProtoPublicKey { sum: Some(Sum::Ed25519(padded.to_vec())) }),
        power: power as i64,
    }
}

/// Owns the running chain's state and the `merk` tree it's persisted
/// against. `abci2`'s `Application` methods take `&self`, so mutation
/// goes through the `RefCell` the way `context.rs`'s thread-local does for
/// ambient values — there's only ever one consensus connection driving
/// this at a time.
pub struct NodeApp {
    app: RefCell<App>,
    store: Store,
    last_height: RefCell<u64>,
    block_time: RefCell<i64>,
}

impl NodeApp {
    /// Opens the `merk` tree at `path` and builds an `App` over it. The
    /// same `Store` handle is kept on `NodeApp` so `commit`/`info`/`query`
    /// can reach the tree's root hash and proofs without `App` needing to
    /// expose its own store back out.
    pub fn open<P: AsRef<std::path::Path>>(path: P, params: Params) -> Result<Self> {
        let merk = MerkBackend::open(path)?;
        let store = Store::new_dyn(Box::new(merk));
        let app = App::new(store.clone(), params)?;
        Ok(NodeApp {
            app: RefCell::new(app),
            store,
            last_height: RefCell::new(0),
            block_time: RefCell::new(0),
        })
    }
}

impl abci2::Application for NodeApp {
    fn info(&self, _req: RequestInfo) -> std::result::Result<ResponseInfo, abci2::Error> {
        Ok(ResponseInfo {
            data: "chainkit".to_string(),
            version: "0.1.0".to_string(),
            app_version: 1,
            last_block_height: *self.last_height.borrow() as i64,
            last_block_app_hash: self.store.root_hash().unwrap_or_default().to_vec(),
        })
    }

    fn init_chain(&self, req: RequestInitChain) -> std::result::Result<ResponseInitChain, abci2::Error> {
        let genesis: Genesis = serde_json::from_slice(&req.app_state_bytes)
            .map_err(|e| abci2::Error::Other(e.to_string()))?;
        let now = req.time.map(|t| t.seconds).unwrap_or_default();
        self.app
            .borrow_mut()
            .init_chain(genesis, now)
            .map_err(|e| abci2::Error::Other(e.to_string()))?;
        Ok(ResponseInitChain::default())
    }

    fn begin_block(&self, req: RequestBeginBlock) -> std::result::Result<ResponseBeginBlock, abci2::Error> {
        let header = req.header.unwrap_or_default();
        let height = header.height as u64;
        let now = header.time.map(|t| t.seconds).unwrap_or_default();
        let votes = req.last_commit_info.as_ref().map(votes_from_last_commit).unwrap_or(Validators {
            votes: vec![],
            proposer: None,
        });
        let byzantine = evidence_from_proto(&req.byzantine_validators);
        self.app
            .borrow_mut()
            .begin_block(height, now, votes, byzantine)
            .map_err(|e| abci2::Error::Other(e.to_string()))?;
        *self.last_height.borrow_mut() = height;
        *self.block_time.borrow_mut() = now;
        Ok(ResponseBeginBlock::default())
    }

    fn deliver_tx(&self, req: RequestDeliverTx) -> std::result::Result<ResponseDeliverTx, abci2::Error> {
        let height = *self.last_height.borrow();
        let now = *self.block_time.borrow();
        match self.app.borrow_mut().deliver_tx_bytes(&req.tx, height, now) {
            Ok(()) => Ok(ResponseDeliverTx::default()),
            Err(e) => Ok(ResponseDeliverTx { code: 1, log: e.to_string(), ..Default::default() }),
        }
    }

    fn check_tx(&self, req: RequestCheckTx) -> std::result::Result<ResponseCheckTx, abci2::Error> {
        match self.app.borrow().check_tx_bytes(&req.tx) {
            Ok(()) => Ok(ResponseCheckTx::default()),
            Err(e) => Ok(ResponseCheckTx { code: 1, log: e.to_string(), ..Default::default() }),
        }
    }

    fn end_block(&self, req: RequestEndBlock) -> std::result::Result<ResponseEndBlock, abci2::Error> {
        let now = *self.block_time.borrow();
        let updates = self
            .app
            .borrow_mut()
            .end_block(now)
            .map_err(|e| abci2::Error::Other(e.to_string()))?;
        let _ = req.height;
        Ok(ResponseEndBlock {
            validator_updates: updates.into_iter().map(|u| validator_update(u.operator, u.power)).collect(),
            ..Default::default()
        })
    }

    fn commit(&self, _req: tendermint_proto::abci::RequestCommit) -> std::result::Result<ResponseCommit, abci2::Error> {
        self.store.commit().map_err(|e| abci2::Error::Other(e.to_string()))?;
        let hash = self.store.root_hash().unwrap_or_default();
        Ok(ResponseCommit { data: hash.to_vec(), retain_height: 0 })
    }

    fn query(&self, req: RequestQuery) -> std::result::Result<ResponseQuery, abci2::Error> {
        // Queries in this crate are read-only store lookups keyed by the
        // same canonical encoding `Map` uses for on-chain keys; the client
        // is expected to supply that raw key directly in `req.data` (see
        // `client` module), rather than a structured query language.
        let value = self.store.get(&req.data).map_err(|e| abci2::Error::Other(e.to_string()))?;
        let proof = self
            .store
            .prove(vec![req.data.clone()])
            .ok()
            .flatten()
            .unwrap_or_default();
        Ok(ResponseQuery {
            code: 0,
            height: *self.last_height.borrow() as i64,
            value: proof,
            key: req.data,
            index: value.is_some() as i64,
            ..Default::default()
        })
    }
}
