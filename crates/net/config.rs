//! Node configuration: the long-term identity key and listening addresses a
//! node is constructed from, plus the bootnode list it dials on startup.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use ethereum_types::H512;
use k256::ecdsa::SigningKey;
use thiserror::Error;

use crate::rlpx::utils::pubkey2id;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed enode URL: {0}")]
    MalformedEnode(String),
    #[error("invalid node id in enode URL")]
    InvalidNodeId,
    #[error("invalid socket address in enode URL: {0}")]
    InvalidSocketAddr(#[from] std::net::AddrParseError),
    #[error("invalid signing key: {0}")]
    InvalidSigningKey(String),
}

/// A peer announced out of band, dialed at startup to join the network.
/// Parsed from `enode://<node-id-hex>@<ip>:<port>` URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootNode {
    pub node_id: H512,
    pub socket_address: SocketAddr,
}

impl FromStr for BootNode {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let rest = input
            .strip_prefix("enode://")
            .ok_or_else(|| ConfigError::MalformedEnode(input.to_string()))?;
        let (node_id_hex, address) = rest
            .split_once('@')
            .ok_or_else(|| ConfigError::MalformedEnode(input.to_string()))?;

        let node_id = H512::from_str(node_id_hex).map_err(|_| ConfigError::InvalidNodeId)?;
        let socket_address = SocketAddr::from_str(address)?;

        Ok(Self {
            node_id,
            socket_address,
        })
    }
}

/// The node's long-term identity, used for the RLPx ECIES handshake, the
/// devp2p Hello message's node id, and discv5 session authentication.
pub struct NodeIdentity {
    signing_key: SigningKey,
}

impl NodeIdentity {
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Parses a 32-byte hex-encoded secret key, as read from a static node
    /// key file.
    pub fn from_hex(hex_key: &str) -> Result<Self, ConfigError> {
        let bytes = hex::decode(hex_key.trim_start_matches("0x"))
            .map_err(|e| ConfigError::InvalidSigningKey(e.to_string()))?;
        let signing_key =
            SigningKey::from_slice(&bytes).map_err(|e| ConfigError::InvalidSigningKey(e.to_string()))?;
        Ok(Self { signing_key })
    }

    pub fn random() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// The 64-byte uncompressed public key used as this node's id on the
    /// wire (devp2p Hello, enode URLs, discv5 node records).
    pub fn node_id(&self) -> H512 {
        let encoded = self.signing_key.verifying_key().to_encoded_point(false);
        let public_key = k256::PublicKey::from_sec1_bytes(encoded.as_bytes())
            .expect("a signing key's verifying key is always a valid point");
        pubkey2id(&public_key)
    }
}

/// Everything a node needs to bind its listeners and start dialing peers.
pub struct NodeConfig {
    pub identity: NodeIdentity,
    pub rlpx_listen_addr: SocketAddr,
    pub discovery_listen_addr: SocketAddr,
    pub bootnodes: Vec<BootNode>,
    pub handshake_timeout: Duration,
    pub enable_snappy: bool,
}

impl NodeConfig {
    pub fn new(
        identity: NodeIdentity,
        rlpx_listen_addr: SocketAddr,
        discovery_listen_addr: SocketAddr,
        bootnodes: Vec<BootNode>,
    ) -> Self {
        Self {
            identity,
            rlpx_listen_addr,
            discovery_listen_addr,
            bootnodes,
            handshake_timeout: Duration::from_secs(10),
            enable_snappy: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bootnode_enode_url() {
        let input = "enode://d860a01f9722d78051619d1e2351aba3f43f943f6f00718d1b9baa4101932a1f5011f16bb2b1bb35db20d6fe28fa0bf09636d26a87d31de9ec6203eeedb1f666@18.138.108.67:30303";
        let bootnode = BootNode::from_str(input).unwrap();
        assert_eq!(
            bootnode.socket_address,
            SocketAddr::from_str("18.138.108.67:30303").unwrap()
        );
    }

    #[test]
    fn rejects_enode_url_missing_scheme() {
        let err = BootNode::from_str("d860a01f@18.138.108.67:30303").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedEnode(_)));
    }

    #[test]
    fn node_identity_round_trips_from_hex() {
        let identity = NodeIdentity::random();
        let hex_key = hex::encode(identity.signing_key().to_bytes());
        let reloaded = NodeIdentity::from_hex(&hex_key).unwrap();
        assert_eq!(identity.node_id(), reloaded.node_id());
    }
}
