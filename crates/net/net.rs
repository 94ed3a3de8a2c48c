//! Entry points for running this crate's protocol stack: dialing a known
//! peer and accepting inbound connections. Peer discovery (finding *which*
//! addresses to dial) is out of scope here -- callers supply bootnodes and
//! addresses learned elsewhere.

use ethereum_types::H512;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub mod config;
pub mod discv5;
pub mod dispatcher;
pub mod enr;
pub mod peer;
pub mod requests;
pub mod rlpx;

use config::NodeIdentity;
use dispatcher::SubProtocol;
use peer::Peer;
use rlpx::{connection::RLPxConnection, error::RLPxError};

/// Dials `addr`, expecting the node identified by `remote_node_id`, and
/// drives the connection through the ECIES and `hello` handshakes.
pub async fn connect_to_peer(
    identity: &NodeIdentity,
    remote_node_id: H512,
    addr: SocketAddr,
    local_protocols: Vec<SubProtocol>,
) -> Result<Peer<TcpStream>, RLPxError> {
    info!("Dialing peer {remote_node_id:#x} at {addr}");
    let stream = TcpStream::connect(addr).await?;
    let connection =
        RLPxConnection::initiator(identity.signing_key().clone(), remote_node_id, stream).await;
    Peer::establish(connection, local_protocols).await
}

/// Accepts inbound RLPx connections on `listen_addr` until the listener
/// errors, handing each established [`Peer`] to `established_peers`. A
/// connection that fails its handshake is logged and dropped; it never
/// reaches the channel.
pub async fn accept_peers(
    listen_addr: SocketAddr,
    identity: NodeIdentity,
    local_protocols: Vec<SubProtocol>,
    established_peers: mpsc::Sender<Peer<TcpStream>>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!("Listening for RLPx connections at {listen_addr}");

    loop {
        let (stream, from) = listener.accept().await?;
        info!("Accepted RLPx connection from {from}");

        let signing_key = identity.signing_key().clone();
        let local_protocols = local_protocols.clone();
        let established_peers = established_peers.clone();

        tokio::spawn(async move {
            let connection = RLPxConnection::receiver(signing_key, stream);
            match Peer::establish(connection, local_protocols).await {
                Ok(peer) => {
                    if established_peers.send(peer).await.is_err() {
                        warn!("Peer {from} established after receiver shut down, dropping");
                    }
                }
                Err(err) => warn!("Handshake with {from} failed: {err}"),
            }
        });
    }
}
