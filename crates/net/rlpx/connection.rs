//! The ECIES Auth/Ack handshake and the post-handshake encrypted frame
//! stream ("Established" state). This module owns the secrets and the raw
//! send/receive primitives; message routing lives in [`crate::dispatcher`]
//! and [`crate::peer`].

use aes::cipher::KeyIvInit;
use ethereum_types::{H256, H512};
use k256::{ecdsa::SigningKey, PublicKey, SecretKey};
use p2p_rlp::{decode::RLPDecode, encode::RLPEncode};
use sha3::{Digest, Keccak256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;

use super::{
    error::RLPxError,
    frame,
    handshake::{decode_ack_message, decode_auth_message, encode_ack_message, encode_auth_message},
    p2p::Capability,
    utils::{ecdh_xchng, id2pubkey, pubkey2id},
};

/// Maximum size of a legacy (pre-EIP-8) or EIP-8 handshake packet.
const MAX_HANDSHAKE_PACKET_SIZE: usize = 1024;

pub(crate) type Aes256Ctr64BE = ctr::Ctr64BE<aes::Aes256>;

/// A connection mid-handshake or established, generic over its transport so
/// tests can drive it over an in-memory duplex stream.
pub(crate) struct RLPxConnection<S> {
    signer: SigningKey,
    state: RLPxConnectionState,
    stream: S,
}

impl<S: AsyncWrite + AsyncRead + std::marker::Unpin> RLPxConnection<S> {
    fn new(signer: SigningKey, stream: S, state: RLPxConnectionState) -> Self {
        Self {
            signer,
            state,
            stream,
        }
    }

    pub fn receiver(signer: SigningKey, stream: S) -> Self {
        let mut rng = rand::thread_rng();
        Self::new(
            signer,
            stream,
            RLPxConnectionState::Receiver(Receiver::new(
                H256::random_using(&mut rng),
                SecretKey::random(&mut rng),
            )),
        )
    }

    /// `msg` is the raw Auth packet bytes already read off the wire, used to
    /// recover the initiator's static public key before a reply can be sent.
    pub async fn initiator(signer: SigningKey, remote_node_id: H512, stream: S) -> Self {
        let mut rng = rand::thread_rng();
        let state = RLPxConnectionState::Initiator(Initiator::new(
            H256::random_using(&mut rng),
            SecretKey::random(&mut rng),
            remote_node_id,
        ));
        Self::new(signer, stream, state)
    }

    pub async fn handshake(
        &mut self,
        local_capabilities: &[Capability],
    ) -> Result<Vec<Capability>, RLPxError> {
        match &self.state {
            RLPxConnectionState::Initiator(_) => {
                self.send_auth().await?;
                self.receive_ack().await?;
            }
            RLPxConnectionState::Receiver(_) => {
                self.receive_auth().await?;
                self.send_ack().await?;
            }
            _ => {
                return Err(RLPxError::InvalidState());
            }
        }
        info!("RLPx ECIES handshake complete");
        self.exchange_hello_messages(local_capabilities).await
    }

    async fn exchange_hello_messages(
        &mut self,
        local_capabilities: &[Capability],
    ) -> Result<Vec<Capability>, RLPxError> {
        use super::message::RLPxMessage;
        use super::p2p::HelloMessage;

        let local_node_id = PublicKey::from(self.signer.verifying_key());
        let hello = HelloMessage::new(local_capabilities.to_vec(), local_node_id);
        let mut body = Vec::new();
        hello.encode(&mut body)?;
        self.send_message(0x00, &body).await?;

        let (msg_id, body) = self.receive_message().await?;
        if msg_id != 0x00 {
            return Err(RLPxError::UnexpectedMessage(msg_id));
        }
        let hello = <HelloMessage as super::message::RLPxMessage>::decode(&body)?;

        let remote_node_id = pubkey2id(&hello.node_id);
        if self.remote_node_id()? != remote_node_id {
            return Err(RLPxError::HandshakeError(
                "node id announced in hello does not match the handshake identity".to_string(),
            ));
        }
        Ok(hello.capabilities)
    }

    pub fn remote_node_id(&self) -> Result<H512, RLPxError> {
        match &self.state {
            RLPxConnectionState::Established(state) => Ok(state.remote_node_id),
            _ => Err(RLPxError::InvalidState()),
        }
    }

    async fn send_auth(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::Initiator(initiator_state) => {
                let secret_key: SecretKey = self.signer.clone().into();
                let peer_pk =
                    id2pubkey(initiator_state.remote_node_id).ok_or(RLPxError::InvalidPeerId())?;
                let previous_state = initiator_state.clone();

                let msg = encode_auth_message(
                    &secret_key,
                    previous_state.nonce,
                    &peer_pk,
                    &previous_state.ephemeral_key,
                )?;
                self.send_handshake_msg(&msg).await?;
                self.state =
                    RLPxConnectionState::InitiatedAuth(InitiatedAuth::new(previous_state, msg));
                Ok(())
            }
            _ => Err(RLPxError::InvalidState()),
        }
    }

    async fn send_ack(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::ReceivedAuth(received_auth_state) => {
                let peer_pk = id2pubkey(received_auth_state.remote_node_id)
                    .ok_or(RLPxError::InvalidPeerId())?;
                let previous_state = received_auth_state.clone();

                let msg = encode_ack_message(
                    &previous_state.local_ephemeral_key,
                    previous_state.local_nonce,
                    &peer_pk,
                )?;
                self.send_handshake_msg(&msg).await?;
                self.state = RLPxConnectionState::Established(Box::new(Established::for_receiver(
                    previous_state,
                    msg,
                )));
                Ok(())
            }
            _ => Err(RLPxError::InvalidState()),
        }
    }

    /// Reads the Auth message. Per §4.4, a decoder reporting "incomplete"
    /// means a legacy non-EIP-8 peer: retry with the extra bytes the length
    /// prefix actually announced.
    async fn receive_auth(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::Receiver(receiver_state) => {
                let secret_key: SecretKey = self.signer.clone().into();
                let previous_state = receiver_state.clone();
                let msg_bytes = self.receive_handshake_msg().await?;
                let size_data = msg_bytes.get(..2).ok_or(RLPxError::InvalidMessageLength())?;
                let msg = msg_bytes.get(2..).ok_or(RLPxError::InvalidMessageLength())?;
                let (auth, _remote_ephemeral_key) = decode_auth_message(&secret_key, msg, size_data)?;

                self.state = RLPxConnectionState::ReceivedAuth(ReceivedAuth::new(
                    previous_state,
                    auth.node_id,
                    msg_bytes.to_owned(),
                    auth.nonce,
                    id2pubkey(auth.node_id).ok_or(RLPxError::InvalidPeerId())?,
                ));
                Ok(())
            }
            _ => Err(RLPxError::InvalidState()),
        }
    }

    async fn receive_ack(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::InitiatedAuth(initiated_auth_state) => {
                let secret_key: SecretKey = self.signer.clone().into();
                let previous_state = initiated_auth_state.clone();
                let msg_bytes = self.receive_handshake_msg().await?;
                let size_data = msg_bytes.get(..2).ok_or(RLPxError::InvalidMessageLength())?;
                let msg = msg_bytes.get(2..).ok_or(RLPxError::InvalidMessageLength())?;
                let ack = decode_ack_message(&secret_key, msg, size_data)?;
                let remote_ephemeral_key = ack
                    .get_ephemeral_pubkey()
                    .ok_or_else(|| RLPxError::NotFound("remote ephemeral key".to_string()))?;

                self.state =
                    RLPxConnectionState::Established(Box::new(Established::for_initiator(
                        previous_state,
                        msg_bytes.to_owned(),
                        ack.nonce,
                        remote_ephemeral_key,
                    )));
                Ok(())
            }
            _ => Err(RLPxError::InvalidState()),
        }
    }

    async fn send_handshake_msg(&mut self, msg: &[u8]) -> Result<(), RLPxError> {
        self.stream.write_all(msg).await?;
        Ok(())
    }

    async fn receive_handshake_msg(&mut self) -> Result<Vec<u8>, RLPxError> {
        let mut buf = vec![0; MAX_HANDSHAKE_PACKET_SIZE];

        self.stream.read_exact(&mut buf[..2]).await?;
        let msg_size = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        if msg_size + 2 > buf.len() {
            buf.resize(msg_size + 2, 0);
        }

        self.stream.read_exact(&mut buf[2..msg_size + 2]).await?;
        Ok(buf[..msg_size + 2].to_vec())
    }

    pub async fn send_message(&mut self, msg_id: u8, body: &[u8]) -> Result<(), RLPxError> {
        match &mut self.state {
            RLPxConnectionState::Established(state) => {
                let mut frame_buffer = vec![];
                msg_id.encode(&mut frame_buffer);
                frame_buffer.extend_from_slice(body);
                frame::write(frame_buffer, state, &mut self.stream).await
            }
            _ => Err(RLPxError::InvalidState()),
        }
    }

    pub async fn receive_message(&mut self) -> Result<(u8, Vec<u8>), RLPxError> {
        match &mut self.state {
            RLPxConnectionState::Established(state) => {
                let frame_data = frame::read(state, &mut self.stream).await?;
                let (msg_id, msg_data): (u8, &[u8]) = RLPDecode::decode_unfinished(&frame_data)?;
                Ok((msg_id, msg_data.to_vec()))
            }
            _ => Err(RLPxError::InvalidState()),
        }
    }
}

enum RLPxConnectionState {
    Initiator(Initiator),
    Receiver(Receiver),
    ReceivedAuth(ReceivedAuth),
    InitiatedAuth(InitiatedAuth),
    Established(Box<Established>),
}

#[derive(Clone)]
struct Receiver {
    nonce: H256,
    ephemeral_key: SecretKey,
}

impl Receiver {
    fn new(nonce: H256, ephemeral_key: SecretKey) -> Self {
        Self {
            nonce,
            ephemeral_key,
        }
    }
}

#[derive(Clone)]
struct Initiator {
    nonce: H256,
    ephemeral_key: SecretKey,
    remote_node_id: H512,
}

impl Initiator {
    fn new(nonce: H256, ephemeral_key: SecretKey, remote_node_id: H512) -> Self {
        Self {
            nonce,
            ephemeral_key,
            remote_node_id,
        }
    }
}

#[derive(Clone)]
struct ReceivedAuth {
    local_nonce: H256,
    local_ephemeral_key: SecretKey,
    remote_node_id: H512,
    remote_nonce: H256,
    remote_ephemeral_key: PublicKey,
    remote_init_message: Vec<u8>,
}

impl ReceivedAuth {
    fn new(
        previous_state: Receiver,
        remote_node_id: H512,
        remote_init_message: Vec<u8>,
        remote_nonce: H256,
        remote_ephemeral_key: PublicKey,
    ) -> Self {
        Self {
            local_nonce: previous_state.nonce,
            local_ephemeral_key: previous_state.ephemeral_key,
            remote_node_id,
            remote_nonce,
            remote_ephemeral_key,
            remote_init_message,
        }
    }
}

#[derive(Clone)]
struct InitiatedAuth {
    remote_node_id: H512,
    local_nonce: H256,
    local_ephemeral_key: SecretKey,
    local_init_message: Vec<u8>,
}

impl InitiatedAuth {
    fn new(previous_state: Initiator, local_init_message: Vec<u8>) -> Self {
        Self {
            remote_node_id: previous_state.remote_node_id,
            local_nonce: previous_state.nonce,
            local_ephemeral_key: previous_state.ephemeral_key,
            local_init_message,
        }
    }
}

/// The four-way symmetric state maintained for the life of an established
/// RLPx session: two AES-256-CTR streams and two Keccak-256 MAC states.
pub struct Established {
    pub remote_node_id: H512,
    pub(crate) mac_key: H256,
    pub ingress_mac: Keccak256,
    pub egress_mac: Keccak256,
    pub ingress_aes: Aes256Ctr64BE,
    pub egress_aes: Aes256Ctr64BE,
}

impl Established {
    fn for_receiver(previous_state: ReceivedAuth, init_message: Vec<u8>) -> Self {
        // keccak256(nonce || initiator-nonce); remote is the initiator.
        let hashed_nonces = Keccak256::digest(
            [previous_state.local_nonce.0, previous_state.remote_nonce.0].concat(),
        )
        .into();

        Self::new(
            previous_state.remote_node_id,
            init_message,
            previous_state.local_nonce,
            previous_state.local_ephemeral_key,
            hashed_nonces,
            previous_state.remote_init_message,
            previous_state.remote_nonce,
            previous_state.remote_ephemeral_key,
        )
    }

    fn for_initiator(
        previous_state: InitiatedAuth,
        remote_init_message: Vec<u8>,
        remote_nonce: H256,
        remote_ephemeral_key: PublicKey,
    ) -> Self {
        // keccak256(nonce || initiator-nonce); local is the initiator.
        let hashed_nonces =
            Keccak256::digest([remote_nonce.0, previous_state.local_nonce.0].concat()).into();

        Self::new(
            previous_state.remote_node_id,
            previous_state.local_init_message,
            previous_state.local_nonce,
            previous_state.local_ephemeral_key,
            hashed_nonces,
            remote_init_message,
            remote_nonce,
            remote_ephemeral_key,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        remote_node_id: H512,
        local_init_message: Vec<u8>,
        local_nonce: H256,
        local_ephemeral_key: SecretKey,
        hashed_nonces: [u8; 32],
        remote_init_message: Vec<u8>,
        remote_nonce: H256,
        remote_ephemeral_key: PublicKey,
    ) -> Self {
        let ephemeral_key_secret = ecdh_xchng(&local_ephemeral_key, &remote_ephemeral_key);

        // shared-secret = keccak256(ephemeral-key || keccak256(nonce || initiator-nonce))
        let shared_secret =
            Keccak256::digest([ephemeral_key_secret, hashed_nonces].concat()).into();
        // aes-secret = keccak256(ephemeral-key || shared-secret)
        let aes_key =
            H256(Keccak256::digest([ephemeral_key_secret, shared_secret].concat()).into());
        // mac-secret = keccak256(ephemeral-key || aes-secret)
        let mac_key = H256(Keccak256::digest([ephemeral_key_secret, aes_key.0].concat()).into());

        // egress-mac = keccak256.init((mac-secret ^ remote-nonce) || auth)
        let egress_mac = Keccak256::default()
            .chain_update(xor_h256(mac_key, remote_nonce))
            .chain_update(&local_init_message);

        // ingress-mac = keccak256.init((mac-secret ^ local-nonce) || ack)
        let ingress_mac = Keccak256::default()
            .chain_update(xor_h256(mac_key, local_nonce))
            .chain_update(&remote_init_message);

        let ingress_aes = <Aes256Ctr64BE as KeyIvInit>::new(&aes_key.0.into(), &[0; 16].into());
        let egress_aes = ingress_aes.clone();
        Self {
            remote_node_id,
            mac_key,
            ingress_mac,
            egress_mac,
            ingress_aes,
            egress_aes,
        }
    }

    /// Builds a pair of mirrored `Established` states sharing one key
    /// schedule, as if a handshake had just completed between two peers.
    /// Used by frame-layer tests that need working secrets without running
    /// a live handshake.
    #[cfg(test)]
    pub(crate) fn test_pair() -> (Self, Self) {
        use rand::rngs::OsRng;

        let local_nonce = H256::random_using(&mut OsRng);
        let remote_nonce = H256::random_using(&mut OsRng);
        let local_eph = SecretKey::random(&mut OsRng);
        let remote_eph = SecretKey::random(&mut OsRng);
        let local_id = pubkey2id(&SecretKey::random(&mut OsRng).public_key());
        let remote_id = pubkey2id(&SecretKey::random(&mut OsRng).public_key());

        let initiator_side = Self::for_initiator(
            InitiatedAuth::new(
                Initiator::new(local_nonce, local_eph.clone(), remote_id),
                b"auth".to_vec(),
            ),
            b"ack".to_vec(),
            remote_nonce,
            remote_eph.public_key(),
        );
        let receiver_side = Self::for_receiver(
            ReceivedAuth::new(
                Receiver::new(remote_nonce, remote_eph),
                local_id,
                b"auth".to_vec(),
                local_nonce,
                local_eph.public_key(),
            ),
            b"ack".to_vec(),
        );
        (initiator_side, receiver_side)
    }
}

fn xor_h256(a: H256, b: H256) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a.0[i] ^ b.0[i];
    }
    out
}
