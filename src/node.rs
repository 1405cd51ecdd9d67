//! Mesh node: public surface and task orchestration.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{broadcast, mpsc};

use crate::config::{MeshConfig, MESSAGE_BUFFER};
use crate::discovery;
use crate::error::{MeshError, MeshResult};
use crate::handshake;
use crate::outbound::{self, AckWaiters};
use crate::protocol::{Command, Envelope};
use crate::registry::PeerRegistry;
use crate::router;
use crate::sequence::SequenceTables;
use crate::session::SessionCommand;
use crate::topology::{MeshMap, Topology};

/// A message delivered to this node's host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Name of the originating node.
    pub source: String,
    /// Names the message traversed, origin first, this node last.
    pub route: Vec<String>,
    /// Application payload.
    pub body: Vec<u8>,
}

/// State shared by every task of one node.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: MeshConfig,
    /// Target minimum number of direct peers; mutable via `set_degree`.
    degree: AtomicUsize,
    /// Known topology and derived routes.
    pub(crate) topology: Mutex<Topology>,
    /// Live neighbor sessions.
    pub(crate) registry: PeerRegistry,
    /// Per-origin set and broadcast sequence tables.
    pub(crate) sequences: Mutex<SequenceTables>,
    /// Ack waiters for in-flight `set` calls.
    pub(crate) waiters: AckWaiters,
    /// Intake channel feeding the router.
    pub(crate) intake_tx: mpsc::Sender<Envelope>,
    /// Receive stream toward the host.
    pub(crate) receive_tx: mpsc::Sender<Delivery>,
    /// Asynchronous error stream toward the host. Unbounded so an
    /// unconsumed stream never stalls a session or the router.
    error_tx: mpsc::UnboundedSender<MeshError>,
    /// Solicitation-in-progress flag.
    pub(crate) soliciting: AtomicBool,
    /// Node-wide shutdown signal.
    shutdown: broadcast::Sender<()>,
}

impl Shared {
    /// This node's name.
    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    /// Current degree target.
    pub(crate) fn degree(&self) -> usize {
        self.degree.load(Ordering::Relaxed)
    }

    /// Emit an error on the host's error stream.
    pub(crate) fn report(&self, err: MeshError) {
        tracing::error!(error = %err, "mesh error");
        let _ = self.error_tx.send(err);
    }

    /// Subscribe to the shutdown signal.
    pub(crate) fn shutdown_rx(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }
}

/// Handle to a running mesh node.
///
/// Dropping the handle does not stop the node; call
/// [`shutdown`](MeshNode::shutdown) to terminate its tasks.
#[derive(Debug)]
pub struct MeshNode {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    discovery_addr: SocketAddr,
}

impl MeshNode {
    /// Start a node: bind its TCP and UDP listeners, spawn the router,
    /// acceptor, beacon listener, and (for a non-zero degree) the
    /// solicitation loop.
    ///
    /// Returns the node handle, the receive stream of delivered
    /// application messages, and the asynchronous error stream.
    pub async fn start(
        config: MeshConfig,
    ) -> MeshResult<(
        Self,
        mpsc::Receiver<Delivery>,
        mpsc::UnboundedReceiver<MeshError>,
    )> {
        if config.name.is_empty() || config.name.contains(':') {
            return Err(MeshError::InvalidName(config.name));
        }

        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let udp = UdpSocket::bind(config.discovery_bind).await?;
        let discovery_addr = udp.local_addr()?;

        let (intake_tx, intake_rx) = mpsc::channel(MESSAGE_BUFFER);
        let (receive_tx, receive_rx) = mpsc::channel(MESSAGE_BUFFER);
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = broadcast::channel(1);

        let shared = Arc::new(Shared {
            degree: AtomicUsize::new(config.degree),
            topology: Mutex::new(Topology::new()),
            registry: PeerRegistry::new(),
            sequences: Mutex::new(SequenceTables::new(&config.name)),
            waiters: AckWaiters::new(),
            intake_tx,
            receive_tx,
            error_tx,
            soliciting: AtomicBool::new(false),
            shutdown,
            config,
        });

        tracing::info!(
            name = shared.name(),
            tcp = %local_addr,
            udp = %discovery_addr,
            "mesh node listening"
        );

        tokio::spawn(router::run(shared.clone(), intake_rx));
        tokio::spawn(acceptor(shared.clone(), listener));
        tokio::spawn(discovery::listen(shared.clone(), udp));
        discovery::maintain_degree(&shared);

        let node = Self {
            shared,
            local_addr,
            discovery_addr,
        };
        Ok((node, receive_rx, error_rx))
    }

    /// This node's name.
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// Actual address of the TCP session listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Actual address of the UDP beacon listener.
    pub fn discovery_addr(&self) -> SocketAddr {
        self.discovery_addr
    }

    /// Connect to another node, regardless of degree.
    ///
    /// `host` is a host name or `host:port`; without a port the configured
    /// peer port is used.
    pub async fn dial(&self, host: &str) -> MeshResult<()> {
        handshake::dial(&self.shared, host, false).await
    }

    /// Disconnect from a connected peer and announce the break to the
    /// topology.
    pub fn hangup(&self, peer: &str) -> MeshResult<()> {
        let handle = self
            .shared
            .registry
            .get(peer)
            .ok_or_else(|| MeshError::PeerNotFound(peer.to_string()))?;
        handle.send(SessionCommand::Hangup)
    }

    /// Send a payload to a list of named recipients.
    ///
    /// Blocks until every recipient has acknowledged, failed, or the ack
    /// timeout expires; any failure yields a composite error naming the
    /// recipients that did not deliver.
    pub async fn set(&self, recipients: Vec<String>, body: Vec<u8>) -> MeshResult<()> {
        let id = self
            .shared
            .sequences
            .lock()
            .unwrap()
            .next_set_id(self.shared.name());
        let envelope = Envelope::set(
            self.shared.name(),
            recipients.clone(),
            id,
            Command::Payload(body),
        );
        tracing::debug!(message = %envelope, "set send");

        let ack_rx = self.shared.waiters.register(id);
        outbound::forward_set(&self.shared, envelope);
        outbound::await_acks(&self.shared, id, ack_rx, recipients).await
    }

    /// Send a payload to all reachable nodes. Does not block; send
    /// failures surface on the error stream.
    pub fn broadcast(&self, body: Vec<u8>) {
        outbound::originate_broadcast(&self.shared, Command::Payload(body));
    }

    /// Set the degree target. Raising it above the current number of
    /// peers re-engages solicitation; zero stops soliciting.
    pub fn set_degree(&self, degree: usize) {
        self.shared.degree.store(degree, Ordering::Relaxed);
        discovery::maintain_degree(&self.shared);
    }

    /// Current degree target.
    pub fn degree(&self) -> usize {
        self.shared.degree()
    }

    /// A copy of the known topology. Modifying the copy does not affect
    /// the node.
    pub fn mesh(&self) -> MeshMap {
        self.shared.topology.lock().unwrap().snapshot()
    }

    /// Names of the directly connected peers.
    pub fn peer_names(&self) -> Vec<String> {
        self.shared.registry.names()
    }

    /// Stop all of the node's tasks and close its sessions.
    pub fn shutdown(&self) {
        tracing::info!(name = self.shared.name(), "mesh node shutting down");
        let _ = self.shared.shutdown.send(());
    }
}

/// Accept inbound connections and hand each to a handshake task.
async fn acceptor(shared: Arc<Shared>, listener: TcpListener) {
    let mut shutdown_rx = shared.shutdown_rx();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    tracing::debug!(%addr, "got conn");
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::warn!(error = %e, "failed to set TCP_NODELAY");
                    }
                    let shared = shared.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handshake::accept(&shared, stream).await {
                            shared.report(e);
                        }
                    });
                }
                Err(e) => shared.report(e.into()),
            },
        }
    }
    tracing::debug!("acceptor stopped");
}
