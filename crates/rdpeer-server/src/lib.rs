#![cfg_attr(doc, doc = include_str!("../README.md"))]

mod framed;
mod handler;
mod peer;
mod server;

pub use rdpeer_acceptor as acceptor;
pub use rdpeer_pdu as pdu;
pub use rdpeer_svc as svc;

pub use self::framed::Framed;
pub use self::handler::{LicenseCallbackResult, NoopPeerHandler, PeerHandler};
pub use self::peer::{accept_begin, accept_finalize, BeginResult, PduSecurity, Peer, PeerHandle, RunState};
pub use self::server::{PeerHandlerFactory, RdpServer};
