// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

pub mod broker;
pub mod client;
pub mod conf;
pub mod discovery;
pub mod heartbeat;
pub mod network;
pub mod peers;

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use node_data::encoding::CodecError;
use node_data::keys::{KeyError, KeyId, KeyPair};
use node_data::ledger::{Block, Ledger, LedgerError};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::conf::Config;
use crate::peers::PeerTable;

/// How long `leave` waits for services to observe the stop signal before
/// giving up on them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("already a member of ledger {0}")]
    AlreadyMember(KeyId),
    #[error("not a member of any ledger")]
    NotMember,
    #[error("could not bind {1}: {0}")]
    BindFailure(#[source] io::Error, SocketAddr),
    #[error("join refused by peer")]
    JoinRefused,
    #[error("peer presented key {actual}, expected {expected}")]
    IdentityMismatch { expected: KeyId, actual: KeyId },
    #[error("received ledger is invalid: {0}")]
    LedgerInvalid(#[source] LedgerError),
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(#[from] io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// The slice of node state the listeners consume: the ledger, the peer
/// table and the resolved configuration. Services never see the private
/// key or each other.
pub struct SessionState {
    ledger: RwLock<Ledger>,
    ledger_id: KeyId,
    peers: PeerTable,
    conf: Config,
    bound: SocketAddr,
}

impl SessionState {
    fn new(ledger: Ledger, conf: Config, bound: SocketAddr) -> Arc<Self> {
        let ledger_id = ledger.id().clone();
        Arc::new(Self {
            ledger: RwLock::new(ledger),
            ledger_id,
            peers: PeerTable::default(),
            conf,
            bound,
        })
    }

    /// The ledger identity. Fixed for the lifetime of the session.
    pub fn ledger_id(&self) -> &KeyId {
        &self.ledger_id
    }

    /// Runs `f` under the ledger read lock. The lock is released before
    /// control returns, so it can never be held across I/O.
    pub async fn with_ledger<R>(&self, f: impl FnOnce(&Ledger) -> R) -> R {
        f(&*self.ledger.read().await)
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn conf(&self) -> &Config {
        &self.conf
    }

    /// The local endpoint both channels are bound to.
    pub fn bound(&self) -> SocketAddr {
        self.bound
    }
}

/// A service that runs for as long as the node is Active: the TCP request
/// broker, the UDP discovery/heartbeat listener and the heartbeat emitter.
///
/// `execute` must observe `shutdown` within one poll interval and return.
#[async_trait]
pub trait LongLivedService: Send {
    async fn execute(
        &mut self,
        state: Arc<SessionState>,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<usize>;

    /// Returns service name.
    fn name(&self) -> &'static str;
}

/// Point-in-time view of an Active node, for status queries.
#[derive(Debug, Clone)]
pub struct Status {
    pub ledger_id: KeyId,
    pub endpoint: SocketAddr,
    pub blocks: usize,
    pub peers: Vec<(SocketAddr, Duration)>,
    pub holds_root_key: bool,
}

struct Session {
    state: Arc<SessionState>,
    keypair: Option<KeyPair>,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<anyhow::Result<usize>>,
}

/// The node controller. Starts Idle; `found` or `join` take it Active and
/// spawn the services, `leave` takes it back. At most one transition runs
/// at a time.
pub struct Node {
    conf: Config,
    session: RwLock<Option<Session>>,
}

impl Node {
    pub fn new(conf: Config) -> Self {
        Self {
            conf,
            session: RwLock::new(None),
        }
    }

    pub fn conf(&self) -> &Config {
        &self.conf
    }

    /// Founds a new ledger rooted at `keypair` and goes Active. The private
    /// key stays in memory for the lifetime of the session.
    pub async fn found(&self, keypair: KeyPair) -> Result<KeyId, NodeError> {
        let mut guard = self.session.write().await;
        if let Some(session) = guard.as_ref() {
            return Err(NodeError::AlreadyMember(
                session.state.ledger_id().clone(),
            ));
        }

        let ledger = Ledger::new(Block::root(&keypair)?)?;
        let id = ledger.id().clone();

        let session = self.start(ledger, Some(keypair)).await?;
        info!(
            "founded ledger {} on {}",
            node_data::to_str(id.as_str()),
            session.state.bound()
        );
        *guard = Some(session);
        Ok(id)
    }

    /// Joins the ledger named `expected` through `seed` and goes Active.
    /// On any protocol failure the node stays Idle.
    pub async fn join(
        &self,
        expected: &KeyId,
        seed: SocketAddr,
    ) -> Result<KeyId, NodeError> {
        let mut guard = self.session.write().await;
        if let Some(session) = guard.as_ref() {
            return Err(NodeError::AlreadyMember(
                session.state.ledger_id().clone(),
            ));
        }

        let (ledger, peers) = client::join(seed, expected, &self.conf).await?;
        let id = ledger.id().clone();

        let session = self.start(ledger, None).await?;
        // The seed answered the handshake, so it counts as alive; the rest
        // of the endpoints stay pending until their first heartbeat.
        session.state.peers().upsert(seed);
        session.state.peers().merge(peers);

        info!(
            "joined ledger {} via {}",
            node_data::to_str(id.as_str()),
            seed
        );
        *guard = Some(session);
        Ok(id)
    }

    /// Stops the services and clears the session. A no-op when Idle.
    pub async fn leave(&self) -> Result<(), NodeError> {
        let mut guard = self.session.write().await;
        let Some(mut session) = guard.take() else {
            debug!("leave called while idle");
            return Ok(());
        };

        let id = session.state.ledger_id().clone();
        let _ = session.shutdown.send(true);

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(res) = session.tasks.join_next().await {
                match res {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!("service terminated with err {e}"),
                    Err(e) => warn!("service panicked: {e}"),
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("services did not stop within {:?}", SHUTDOWN_GRACE);
            session.tasks.abort_all();
        }

        info!("left ledger {}", node_data::to_str(id.as_str()));
        Ok(())
    }

    /// Broadcasts a discovery query and collects the ledgers answering
    /// within the configured window. Works from any state.
    pub async fn discover(
        &self,
        target: Option<IpAddr>,
    ) -> Result<client::Discovered, NodeError> {
        client::discover(target, &self.conf).await
    }

    pub async fn status(&self) -> Result<Status, NodeError> {
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(NodeError::NotMember)?;

        let blocks = session.state.with_ledger(Ledger::len).await;
        let peers = session
            .state
            .peers()
            .snapshot()
            .into_iter()
            .map(|(addr, last_beat)| (addr, last_beat.elapsed()))
            .collect();

        Ok(Status {
            ledger_id: session.state.ledger_id().clone(),
            endpoint: session.state.bound(),
            blocks,
            peers,
            holds_root_key: session.keypair.is_some(),
        })
    }

    /// The full chain, root first.
    pub async fn ledger(&self) -> Result<Vec<Block>, NodeError> {
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(NodeError::NotMember)?;
        Ok(session.state.with_ledger(|l| l.blocks().to_vec()).await)
    }

    async fn start(
        &self,
        ledger: Ledger,
        keypair: Option<KeyPair>,
    ) -> Result<Session, NodeError> {
        let (tcp, udp) = bind_channels(&self.conf).await?;
        let bound = tcp.local_addr().map_err(NodeError::Network)?;
        let udp = Arc::new(udp);

        let state = SessionState::new(ledger, self.conf.clone(), bound);
        let (shutdown, shutdown_rx) = watch::channel(false);

        // The emitter shares the listener's socket so heartbeats originate
        // from the port peers have on record for us.
        let services: Vec<Box<dyn LongLivedService>> = vec![
            Box::new(broker::BrokerSrv::new(tcp)),
            Box::new(discovery::DiscoverySrv::new(udp.clone())),
            Box::new(heartbeat::HeartbeatSrv::new(udp)),
        ];

        let mut tasks = JoinSet::new();
        for mut service in services {
            let state = state.clone();
            let shutdown = shutdown_rx.clone();
            info!("starting service {}", service.name());
            tasks.spawn(async move { service.execute(state, shutdown).await });
        }

        Ok(Session {
            state,
            keypair,
            shutdown,
            tasks,
        })
    }
}

/// Binds the TCP and UDP channels to one shared `(ip, port)`, both with
/// address-reuse. With `bind_port = 0` the UDP bind picks the port and TCP
/// follows it, retrying a few times if that number is taken.
async fn bind_channels(
    conf: &Config,
) -> Result<(TcpListener, UdpSocket), NodeError> {
    let addr = SocketAddr::new(conf.bind_ip, conf.bind_port);

    let mut attempts = if conf.bind_port == 0 { 5 } else { 1 };
    loop {
        attempts -= 1;

        let udp = bind_udp(addr)?;
        let port = udp.local_addr().map_err(NodeError::Network)?.port();

        match bind_tcp(SocketAddr::new(conf.bind_ip, port)) {
            Ok(tcp) => return Ok((tcp, udp)),
            Err(e) if attempts > 0 => {
                debug!("tcp port {port} unavailable ({e}), retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

fn bind_udp(addr: SocketAddr) -> Result<UdpSocket, NodeError> {
    use socket2::{Domain, Protocol, Socket, Type};

    let bind = |addr: SocketAddr| -> io::Result<UdpSocket> {
        let socket = Socket::new(
            Domain::for_address(addr),
            Type::DGRAM,
            Some(Protocol::UDP),
        )?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        UdpSocket::from_std(socket.into())
    };

    bind(addr).map_err(|e| NodeError::BindFailure(e, addr))
}

fn bind_tcp(addr: SocketAddr) -> Result<TcpListener, NodeError> {
    use tokio::net::TcpSocket;

    let bind = |addr: SocketAddr| -> io::Result<TcpListener> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        socket.listen(64)
    };

    bind(addr).map_err(|e| NodeError::BindFailure(e, addr))
}
