use std::net::SocketAddr;

use anyhow::Result;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error};

use rdpeer_acceptor::ServerSettings;
use rdpeer_pdu::rdp::capability_sets::CapabilitySet;

use crate::handler::PeerHandler;
use crate::peer::Peer;

/// Builds one handler per accepted connection.
pub trait PeerHandlerFactory: Send {
    fn build(&mut self) -> Box<dyn PeerHandler>;
}

impl<F> PeerHandlerFactory for F
where
    F: FnMut() -> Box<dyn PeerHandler> + Send,
{
    fn build(&mut self) -> Box<dyn PeerHandler> {
        self()
    }
}

/// A minimal listener loop: accepts TCP connections and runs one [`Peer`]
/// per client, sequentially.
///
/// This is the library's outermost convenience; applications that multiplex
/// many peers spawn their own tasks around [`Peer::run`].
pub struct RdpServer {
    addr: SocketAddr,
    settings: ServerSettings,
    capabilities: Vec<CapabilitySet>,
    factory: Box<dyn PeerHandlerFactory>,
}

impl RdpServer {
    pub fn new(
        addr: SocketAddr,
        settings: ServerSettings,
        capabilities: Vec<CapabilitySet>,
        factory: Box<dyn PeerHandlerFactory>,
    ) -> Self {
        Self {
            addr,
            settings,
            capabilities,
            factory,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        debug!(addr = %listener.local_addr()?, "Listening for connections");

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            debug!(%peer_addr, "Received connection");

            if let Err(error) = self.run_connection(stream).await {
                error!(%error, "Connection error");
            }
        }
    }

    async fn run_connection(&mut self, stream: TcpStream) -> Result<()> {
        // best-effort: harmless to fail on exotic transports
        let _ = stream.set_nodelay(true);

        let peer = Peer::new(
            stream,
            self.settings.clone(),
            self.capabilities.clone(),
            self.factory.build(),
        );

        peer.run().await
    }
}
