//! Process lifecycle for running this chain as a standalone node: lays out
//! a home directory, spawns `tendermint` as a subprocess wired up to
//! [`NodeApp`](super::NodeApp) over ABCI, and exposes the handful of
//! builder knobs (`p2p_port`/`rpc_port`/`abci_port`) operators actually
//! need to change between a local devnet and a real deployment.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::params::Params;
use crate::Result;

use super::NodeApp;

/// Thin wrapper over the `tendermint` binary on `$PATH`. Everything here
/// is a subprocess call — this crate has no Go dependency and doesn't
/// reimplement Tendermint itself, it only drives the external binary the
/// way `cosmovisor`/`gaiad` style nodes do.
struct Tendermint {
    home: PathBuf,
    stdout: Stdio,
    stderr: Stdio,
}

impl Tendermint {
    fn new(home: impl AsRef<Path>) -> Self {
        Tendermint {
            home: home.as_ref().into(),
            stdout: Stdio::inherit(),
            stderr: Stdio::inherit(),
        }
    }

    fn stdout(mut self, stdio: Stdio) -> Self {
        self.stdout = stdio;
        self
    }

    fn stderr(mut self, stdio: Stdio) -> Self {
        self.stderr = stdio;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("tendermint");
        cmd.arg("--home").arg(&self.home);
        cmd
    }

    fn init(&self) {
        let _ = self.command().arg("init").status();
    }

    fn unsafe_reset_all(&self) {
        let _ = self.command().arg("unsafe_reset_all").status();
    }

    /// Runs `tendermint node` with the given p2p/rpc listen addresses,
    /// pointed at the ABCI server this process also runs, and blocks for
    /// as long as the subprocess is alive.
    fn start(self, p2p_laddr: &str, rpc_laddr: &str, abci_proxy: &str) {
        let status = self
            .command()
            .arg("node")
            .arg("--p2p.laddr")
            .arg(p2p_laddr)
            .arg("--rpc.laddr")
            .arg(rpc_laddr)
            .arg("--proxy_app")
            .arg(abci_proxy)
            .stdout(self.stdout)
            .stderr(self.stderr)
            .status();
        if let Err(e) = status {
            log::error!("tendermint exited: {}", e);
        }
    }
}

/// A configured, not-yet-running node: home directory plus the three port
/// numbers a single-node devnet or a production deployment might need to
/// change to avoid colliding with something else on the host.
pub struct Node {
    home: PathBuf,
    merk_home: PathBuf,
    tm_home: PathBuf,
    params: Params,
    p2p_port: u16,
    rpc_port: u16,
    abci_port: u16,
}

impl Node {
    /// Creates the home directory layout (`<home>/merk`, `<home>/tendermint`)
    /// if it doesn't exist yet, and runs `tendermint init` so a fresh node
    /// has a validator key and genesis template to work from.
    pub fn new<P: AsRef<Path>>(home: P, params: Params) -> Self {
        let home: PathBuf = home.as_ref().into();
        let merk_home = home.join("merk");
        let tm_home = home.join("tendermint");
        if !home.exists() {
            std::fs::create_dir_all(&home).expect("failed to create node home directory");
        }
        Tendermint::new(&tm_home)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .init();

        Node {
            home,
            merk_home,
            tm_home,
            params,
            p2p_port: 26656,
            rpc_port: 26657,
            abci_port: 26658,
        }
    }

    pub fn p2p_port(mut self, port: u16) -> Self {
        self.p2p_port = port;
        self
    }

    pub fn rpc_port(mut self, port: u16) -> Self {
        self.rpc_port = port;
        self
    }

    pub fn abci_port(mut self, port: u16) -> Self {
        self.abci_port = port;
        self
    }

    /// Deletes the Merk tree and resets Tendermint's own chain state, but
    /// leaves node keys and config in place — the same "start over with
    /// the same identity" operation `unsafe_reset_all` gives Cosmos-SDK
    /// nodes.
    pub fn reset(self) -> Self {
        if self.merk_home.exists() {
            std::fs::remove_dir_all(&self.merk_home).expect("failed to clear merk data");
        }
        Tendermint::new(&self.tm_home)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .unsafe_reset_all();
        self
    }

    /// Opens the Merk-backed `NodeApp` and blocks running the ABCI server
    /// and the Tendermint subprocess. Returns only on ABCI server failure;
    /// the Tendermint subprocess runs on its own thread and is not joined.
    pub fn run(self) -> Result<()> {
        let app = NodeApp::open(&self.merk_home, self.params)?;

        let tm_home = self.tm_home.clone();
        let p2p_laddr = format!("tcp://0.0.0.0:{}", self.p2p_port);
        let rpc_laddr = format!("tcp://0.0.0.0:{}", self.rpc_port);
        let abci_proxy = format!("tcp://127.0.0.1:{}", self.abci_port);
        std::thread::spawn(move || {
            Tendermint::new(&tm_home).start(&p2p_laddr, &rpc_laddr, &abci_proxy);
        });

        log::info!("starting ABCI server on 127.0.0.1:{}", self.abci_port);
        abci2::ABCIStateMachine::new(app)
            .listen(format!("127.0.0.1:{}", self.abci_port))
            .map_err(|e| crate::error::Error::Store(e.to_string()))?;
        Ok(())
    }

    pub fn home(&self) -> &Path {
        &self.home
    }
}
