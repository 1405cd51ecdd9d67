//! Fully decentralized, mesh-based message passing.
//!
//! Every node in a meshage network is a peer: any node can originate
//! messages to a set of named nodes or broadcast to the whole mesh, and
//! every node participates in maintaining the shared topology. Nodes
//! discover each other over UDP on the local broadcast domain, keep a
//! configurable minimum number of direct peers, route messages along
//! computed next-hops, and repair the topology when links fail.
//!
//! # Architecture
//!
//! The node uses a task-per-session architecture where each connected peer
//! runs in its own tokio task. Communication between components is handled
//! via channels.
//!
//! ```text
//! MeshNode::start()
//! ├── Acceptor Task (accept incoming, handshake)
//! ├── Session Task 1 (read/write loop)
//! ├── Session Task 2 (read/write loop)
//! ├── Router Task (dedup, dispatch, forward)
//! ├── Beacon Listener Task (UDP solicitations)
//! └── Solicitation Task (while below degree)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use meshage::{MeshConfig, MeshNode};
//!
//! let config = MeshConfig::new("alpha", 2);
//! let (node, mut receive, mut errors) = MeshNode::start(config).await?;
//!
//! node.dial("beta").await?;
//! node.set(vec!["beta".into()], b"hello".to_vec()).await?;
//! node.broadcast(b"to everyone".to_vec());
//!
//! while let Some(delivery) = receive.recv().await {
//!     println!("{} said {:?}", delivery.source, delivery.body);
//! }
//! ```

pub mod config;
pub mod error;

pub mod protocol;

pub mod discovery;
pub mod handshake;
pub mod node;
pub mod outbound;
pub mod registry;
pub mod router;
pub mod sequence;
pub mod session;
pub mod topology;

// Re-export main types
pub use config::{MeshConfig, MESH_PORT, MAX_MESSAGE_SIZE, NETWORK_MAGIC};
pub use error::{MeshError, MeshResult};
pub use node::{Delivery, MeshNode};
pub use protocol::{AckRecord, Command, Envelope, MessageClass};
pub use topology::MeshMap;
