//! Node configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Network magic bytes identifying the meshage protocol.
pub const NETWORK_MAGIC: [u8; 4] = [0x4D, 0x45, 0x53, 0x48]; // "MESH"

/// Maximum framed message size in bytes (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Well-known port for both TCP sessions and UDP discovery.
pub const MESH_PORT: u16 = 8966;

/// Capacity of the intake and receive channels.
pub const MESSAGE_BUFFER: usize = 1024;

/// Prefix of discovery beacon datagrams.
pub const BEACON_PREFIX: &str = "meshage";

/// Default timeout waiting for set-message acknowledgements.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for completing a session handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for establishing outbound connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Cap on the solicitation backoff exponent; the longest sleep drawn is
/// `2^DEFAULT_MAX_BACKOFF_EXP` seconds (~128 s).
pub const DEFAULT_MAX_BACKOFF_EXP: u32 = 7;

/// Configuration for a mesh node.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Node name. Must be unique on the mesh and must not contain `:`.
    /// Peers discovered over UDP are dialed by name, so on a real
    /// deployment the name doubles as a resolvable host name.
    pub name: String,

    /// Target minimum number of direct peers. A node below its degree
    /// solicits connections over UDP; zero disables solicitation.
    pub degree: usize,

    /// Address to bind the TCP session listener to.
    pub bind_addr: SocketAddr,

    /// Address to bind the UDP beacon listener to.
    pub discovery_bind: SocketAddr,

    /// Address solicitation beacons are sent to. Defaults to the limited
    /// broadcast address on the well-known port.
    pub beacon_target: SocketAddr,

    /// Port appended when dialing a host given without one (discovery
    /// beacons carry only the peer's name).
    pub peer_port: u16,

    /// How long a `set` call waits for all acknowledgements before the
    /// outstanding recipients are reported as failed.
    pub ack_timeout: Duration,

    /// Timeout for completing the session handshake.
    pub handshake_timeout: Duration,

    /// Timeout for establishing outbound TCP connections.
    pub connect_timeout: Duration,

    /// Cap on the solicitation backoff exponent.
    pub max_backoff_exp: u32,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            degree: 0,
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), MESH_PORT),
            discovery_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), MESH_PORT),
            beacon_target: SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), MESH_PORT),
            peer_port: MESH_PORT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_backoff_exp: DEFAULT_MAX_BACKOFF_EXP,
        }
    }
}

impl MeshConfig {
    /// Create a configuration with the given node name and degree.
    pub fn new(name: impl Into<String>, degree: usize) -> Self {
        Self {
            name: name.into(),
            degree,
            ..Default::default()
        }
    }

    /// Set the TCP session listener address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the UDP beacon listener address.
    pub fn with_discovery_bind(mut self, addr: SocketAddr) -> Self {
        self.discovery_bind = addr;
        self
    }

    /// Set the address solicitation beacons are sent to.
    pub fn with_beacon_target(mut self, addr: SocketAddr) -> Self {
        self.beacon_target = addr;
        self
    }

    /// Set the port used when dialing hosts given without one.
    pub fn with_peer_port(mut self, port: u16) -> Self {
        self.peer_port = port;
        self
    }

    /// Set the acknowledgement timeout for `set` calls.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the outbound connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the solicitation backoff cap.
    pub fn with_max_backoff_exp(mut self, exp: u32) -> Self {
        self.max_backoff_exp = exp;
        self
    }
}
