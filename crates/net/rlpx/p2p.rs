use bytes::BufMut;
use ethereum_types::H512;
use k256::PublicKey;
use p2p_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::{RLPDecodeError, RLPEncodeError},
    structs::{Decoder, Encoder},
};

use super::{
    message::RLPxMessage,
    utils::{id2pubkey, pubkey2id, snappy_compress, snappy_decompress},
};

/// A negotiated sub-protocol name and version, e.g. `("eth", 68)`. The base
/// devp2p protocol is never listed here -- only sub-protocols layered on
/// top of it (§4.6).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Capability {
    pub name: String,
    pub version: u64,
}

impl Capability {
    pub fn new(name: impl Into<String>, version: u64) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl RLPEncode for Capability {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.name)
            .encode_field(&self.version)
            .finish()
    }
}

impl RLPDecode for Capability {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (name, decoder) = decoder.decode_field("name")?;
        let (version, decoder) = decoder.decode_field("version")?;
        let rest = decoder.finish_unchecked();
        Ok((Self { name, version }, rest))
    }
}

/// devp2p disconnect reasons (`DisconnectionReason` in the wire spec). The
/// numeric values are part of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    DisconnectRequested = 0x00,
    TcpSubsystemError = 0x01,
    ProtocolBreach = 0x02,
    UselessPeer = 0x03,
    TooManyPeers = 0x04,
    AlreadyConnected = 0x05,
    IncompatibleVersion = 0x06,
    InvalidIdentity = 0x07,
    ClientQuitting = 0x08,
    UnexpectedIdentity = 0x09,
    SelfConnect = 0x0a,
    HandshakeTimeout = 0x0b,
    SubprotocolError = 0x10,
    Other(u8),
}

impl DisconnectReason {
    pub fn to_byte(self) -> u8 {
        match self {
            Self::DisconnectRequested => 0x00,
            Self::TcpSubsystemError => 0x01,
            Self::ProtocolBreach => 0x02,
            Self::UselessPeer => 0x03,
            Self::TooManyPeers => 0x04,
            Self::AlreadyConnected => 0x05,
            Self::IncompatibleVersion => 0x06,
            Self::InvalidIdentity => 0x07,
            Self::ClientQuitting => 0x08,
            Self::UnexpectedIdentity => 0x09,
            Self::SelfConnect => 0x0a,
            Self::HandshakeTimeout => 0x0b,
            Self::SubprotocolError => 0x10,
            Self::Other(b) => b,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        match b {
            0x00 => Self::DisconnectRequested,
            0x01 => Self::TcpSubsystemError,
            0x02 => Self::ProtocolBreach,
            0x03 => Self::UselessPeer,
            0x04 => Self::TooManyPeers,
            0x05 => Self::AlreadyConnected,
            0x06 => Self::IncompatibleVersion,
            0x07 => Self::InvalidIdentity,
            0x08 => Self::ClientQuitting,
            0x09 => Self::UnexpectedIdentity,
            0x0a => Self::SelfConnect,
            0x0b => Self::HandshakeTimeout,
            0x10 => Self::SubprotocolError,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug)]
pub struct HelloMessage {
    pub capabilities: Vec<Capability>,
    pub node_id: PublicKey,
}

impl HelloMessage {
    pub fn new(capabilities: Vec<Capability>, node_id: PublicKey) -> Self {
        Self {
            capabilities,
            node_id,
        }
    }
}

impl RLPxMessage for HelloMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        Encoder::new(buf)
            .encode_field(&5_u8) // protocolVersion
            .encode_field(&"p2p-net/1.0.0") // clientId
            .encode_field(&self.capabilities)
            .encode_field(&0u8) // listenPort, ignored by the decoder
            .encode_field(&pubkey2id(&self.node_id))
            .finish();
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decoder = Decoder::new(msg_data)?;
        let (_protocol_version, decoder): (u64, _) = decoder.decode_field("protocolVersion")?;
        let (_client_id, decoder): (String, _) = decoder.decode_field("clientId")?;
        let (capabilities, decoder): (Vec<Capability>, _) = decoder.decode_field("capabilities")?;
        let (_listen_port, decoder): (u16, _) = decoder.decode_field("listenPort")?;
        let (node_id, decoder): (H512, _) = decoder.decode_field("nodeId")?;
        let _padding = decoder.finish_unchecked();

        Ok(Self::new(
            capabilities,
            id2pubkey(node_id).ok_or(RLPDecodeError::MalformedData)?,
        ))
    }
}

#[derive(Debug)]
pub struct DisconnectMessage {
    pub reason: Option<DisconnectReason>,
}

impl DisconnectMessage {
    pub fn new(reason: Option<DisconnectReason>) -> Self {
        Self { reason }
    }
}

impl RLPxMessage for DisconnectMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        match self.reason {
            Some(reason) => Encoder::new(&mut encoded_data)
                .encode_field(&reason.to_byte())
                .finish(),
            None => Vec::<u8>::new().encode(&mut encoded_data),
        }
        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        // Divergent implementations encode the reason as a single byte, as
        // an RLP list of one byte, or omit it entirely.
        let reason = match decompressed_data.len() {
            0 => None,
            1 => Some(DisconnectReason::from_byte(decompressed_data[0])),
            _ => {
                let decoder = Decoder::new(&decompressed_data)?;
                let (reason, _): (Option<u8>, _) = decoder.decode_optional_field();
                reason.map(DisconnectReason::from_byte)
            }
        };
        Ok(Self::new(reason))
    }
}

#[derive(Debug, Default)]
pub struct PingMessage {}

impl RLPxMessage for PingMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Vec::<u8>::new().encode(&mut encoded_data);
        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        let rest = decoder.finish_unchecked();
        if !rest.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(Self::default())
    }
}

#[derive(Debug, Default)]
pub struct PongMessage {}

impl RLPxMessage for PongMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Vec::<u8>::new().encode(&mut encoded_data);
        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        let rest = decoder.finish_unchecked();
        if !rest.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trip() {
        let sk = k256::SecretKey::random(&mut rand::thread_rng());
        let hello = HelloMessage::new(
            vec![Capability::new("eth", 68), Capability::new("snap", 1)],
            sk.public_key(),
        );
        let mut buf = Vec::new();
        hello.encode(&mut buf).unwrap();
        let decoded = HelloMessage::decode(&buf).unwrap();
        assert_eq!(decoded.capabilities, hello.capabilities);
        assert_eq!(decoded.node_id, hello.node_id);
    }

    #[test]
    fn disconnect_round_trip_with_reason() {
        let msg = DisconnectMessage::new(Some(DisconnectReason::ProtocolBreach));
        let mut buf = Vec::new();
        msg.encode(&mut buf).unwrap();
        let decoded = DisconnectMessage::decode(&buf).unwrap();
        assert_eq!(decoded.reason, Some(DisconnectReason::ProtocolBreach));
    }

    #[test]
    fn disconnect_accepts_bare_byte_for_compatibility() {
        let compressed = snappy_compress(vec![0x02]).unwrap();
        let decoded = DisconnectMessage::decode(&compressed).unwrap();
        assert_eq!(decoded.reason, Some(DisconnectReason::ProtocolBreach));
    }

    #[test]
    fn ping_pong_round_trip() {
        let mut buf = Vec::new();
        PingMessage::default().encode(&mut buf).unwrap();
        PingMessage::decode(&buf).unwrap();

        let mut buf = Vec::new();
        PongMessage::default().encode(&mut buf).unwrap();
        PongMessage::decode(&buf).unwrap();
    }
}
