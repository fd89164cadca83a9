//! pl-node: the peerlink control-plane daemon
//!
//! One node runs per machine. It listens on a loopback control socket
//! for session lifecycle requests (create, teardown, status, attach),
//! holds the table correlating pool ids to live sessions, accepts
//! session-open preambles from remote peers, and relays session bytes
//! between local endpoints and the peer transport.

pub mod daemon;
pub mod dispatch;
pub mod error;
pub mod pidfile;
pub mod pipe;
pub mod sender;
pub mod session;
pub mod state;
pub mod transport;
pub mod trust;
pub mod variant;

pub use error::NodeError;
pub use sender::Sender;
pub use state::NodeState;
