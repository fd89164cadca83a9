//! Control-plane dispatch: the loopback listener, the per-request
//! handlers, and the peer-stream acceptor.

pub mod handler;
pub mod listener;
pub mod peer;

pub use listener::ControlListener;
pub use peer::run_peer_acceptor;
