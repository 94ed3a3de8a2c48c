use p2p_rlp::error::{RLPDecodeError, RLPEncodeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RLPxError {
    #[error("{0}")]
    HandshakeError(String),
    #[error("Invalid connection state for this operation")]
    InvalidState(),
    #[error("Decode error: {0}")]
    DecodeError(#[from] RLPDecodeError),
    #[error("Encode error: {0}")]
    EncodeError(#[from] RLPEncodeError),
    #[error("Invalid peer id")]
    InvalidPeerId(),
    #[error("Invalid message length")]
    InvalidMessageLength(),
    #[error("Invalid ECDSA recovery id")]
    InvalidRecoveryId(),
    #[error("Cryptography error: {0}")]
    CryptographyError(String),
    #[error("Connection error: {0}")]
    ConnectionError(String),
    #[error("Message not handled: {0}")]
    MessageNotHandled(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Unexpected message with id {0:#04x}")]
    UnexpectedMessage(u8),
    #[error("Breach of protocol: {0}")]
    BreachOfProtocol(String),
    #[error("No matching sub-protocols were negotiated with the peer")]
    UselessPeer,
    #[error("Handshake did not complete within the configured timeout")]
    HandshakeTimeout,
    #[error("Peer disconnected: {0:?}")]
    PeerDisconnected(crate::rlpx::p2p::DisconnectReason),
}

impl From<k256::ecdsa::Error> for RLPxError {
    fn from(value: k256::ecdsa::Error) -> Self {
        RLPxError::CryptographyError(value.to_string())
    }
}

impl From<k256::elliptic_curve::Error> for RLPxError {
    fn from(value: k256::elliptic_curve::Error) -> Self {
        RLPxError::CryptographyError(value.to_string())
    }
}

impl From<ctr::cipher::StreamCipherError> for RLPxError {
    fn from(value: ctr::cipher::StreamCipherError) -> Self {
        RLPxError::CryptographyError(value.to_string())
    }
}

impl From<ctr::cipher::InvalidLength> for RLPxError {
    fn from(value: ctr::cipher::InvalidLength) -> Self {
        RLPxError::CryptographyError(value.to_string())
    }
}

impl From<std::io::Error> for RLPxError {
    fn from(value: std::io::Error) -> Self {
        RLPxError::ConnectionError(value.to_string())
    }
}
