use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use p2p_net::config::{BootNode, NodeConfig, NodeIdentity};
use p2p_net::{accept_peers, dispatcher::SubProtocol};
use tracing::{info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;

#[tokio::main]
async fn main() {
    let matches = cli::cli().get_matches();

    let log_level = matches
        .get_one::<String>("log-level")
        .expect("log-level has a default value");
    let log_filter = EnvFilter::builder()
        .with_default_directive(
            Directive::from_str(log_level).expect("not a supported log level"),
        )
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder().with_env_filter(log_filter).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let p2p_addr = matches.get_one::<String>("p2p.addr").expect("has a default value");
    let p2p_port = matches.get_one::<String>("p2p.port").expect("has a default value");
    let discovery_addr = matches
        .get_one::<String>("discovery.addr")
        .expect("has a default value");
    let discovery_port = matches
        .get_one::<String>("discovery.port")
        .expect("has a default value");

    let rlpx_listen_addr =
        parse_socket_addr(p2p_addr, p2p_port).expect("failed to parse p2p address and port");
    let discovery_listen_addr = parse_socket_addr(discovery_addr, discovery_port)
        .expect("failed to parse discovery address and port");

    let identity = match matches.get_one::<String>("node-key") {
        Some(path) => {
            let hex_key = std::fs::read_to_string(path).expect("failed to read node key file");
            NodeIdentity::from_hex(hex_key.trim()).expect("malformed node key")
        }
        None => {
            let identity = NodeIdentity::random();
            warn!("No --node-key provided, generated a random node identity for this run");
            identity
        }
    };
    info!("Node id: {:#x}", identity.node_id());

    let bootnodes: Vec<BootNode> = matches
        .get_many::<String>("bootnodes")
        .map(|values| {
            values
                .map(|v| BootNode::from_str(v).expect("malformed bootnode enode URL"))
                .collect()
        })
        .unwrap_or_default();
    if bootnodes.is_empty() {
        warn!("No bootnodes specified. This node will not dial out on startup.");
    }

    let config = NodeConfig::new(identity, rlpx_listen_addr, discovery_listen_addr, bootnodes);

    // No application sub-protocol is registered in this binary; it serves
    // as a bare devp2p base-protocol node (hello/disconnect/ping/pong).
    let local_protocols: Vec<SubProtocol> = Vec::new();

    let (established_peers_tx, mut established_peers_rx) = tokio::sync::mpsc::channel(32);
    let listen_addr = config.rlpx_listen_addr;
    let identity = config.identity;

    let acceptor = tokio::spawn(accept_peers(
        listen_addr,
        identity,
        local_protocols,
        established_peers_tx,
    ));

    let peer_loop = tokio::spawn(async move {
        while let Some(mut peer) = established_peers_rx.recv().await {
            tokio::spawn(async move {
                loop {
                    match peer.dispatch_next().await {
                        Ok(Some((protocol_index, local_id, _body))) => {
                            info!("Message {local_id:#04x} for protocol index {protocol_index}");
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!("Peer connection ended: {err}");
                            break;
                        }
                    }
                }
            });
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
        result = acceptor => {
            if let Ok(Err(err)) = result {
                warn!("RLPx listener stopped: {err}");
            }
        }
        _ = peer_loop => {}
    }
}

fn parse_socket_addr(addr: &str, port: &str) -> std::io::Result<SocketAddr> {
    format!("{addr}:{port}")
        .to_socket_addrs()?
        .next()
        .ok_or(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "failed to parse socket address",
        ))
}
