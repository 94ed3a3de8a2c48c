//! Ties the stateless packet framing in [`super::packet`] to the session
//! and challenge tables in [`super::session`], implementing the four
//! operations named in §4.3: encode message, encode WHOAREYOU, encode
//! handshake, decode.

use k256::{ecdsa::SigningKey, PublicKey, SecretKey};
use rand::RngCore;

use super::error::Discv5Error;
use super::packet::{self, PacketFlag};
use super::session::{self, Challenge, PeerKey, SessionKeys, SessionTable};
use crate::enr::Enr;

/// A fully decoded inbound packet, at the level detail callers need.
pub enum Packet {
    Ordinary {
        src_id: [u8; 32],
        message: Option<Vec<u8>>,
    },
    WhoAreYou {
        id_nonce: [u8; 16],
        enr_seq: u64,
        /// Echoed back as associated data when building the handshake
        /// reply; callers that received this packet as an initiator pass
        /// it straight into [`Discv5Codec::encode_handshake_packet`].
        challenge_data: Vec<u8>,
    },
    Handshake {
        src_id: [u8; 32],
        message: Vec<u8>,
    },
}

pub struct Discv5Codec {
    local_node_id: [u8; 32],
    signing_key: SigningKey,
    local_enr_seq: u64,
    sessions: SessionTable,
}

impl Discv5Codec {
    pub fn new(local_node_id: [u8; 32], signing_key: SigningKey, local_enr_seq: u64) -> Self {
        Self {
            local_node_id,
            signing_key,
            local_enr_seq,
            sessions: SessionTable::new(),
        }
    }

    /// Encodes a message packet toward `peer`. Uses an existing session if
    /// one is cached; otherwise emits a random "keyless" body that should
    /// provoke a WHOAREYOU from the recipient.
    pub fn encode_message_packet(
        &self,
        recipient_node_id: &[u8; 32],
        peer: &PeerKey,
        message: &[u8],
        rng: &mut impl RngCore,
    ) -> Result<Vec<u8>, Discv5Error> {
        let mut iv = [0u8; packet::IV_SIZE];
        rng.fill_bytes(&mut iv);
        let mut nonce = [0u8; 12];
        rng.fill_bytes(&mut nonce);
        let mut random_body = [0u8; 16];
        rng.fill_bytes(&mut random_body);

        let write_key = self.sessions.session(peer).map(|keys| keys.write_key);
        packet::encode_ordinary(
            recipient_node_id,
            &self.local_node_id,
            iv,
            nonce,
            write_key.as_ref(),
            message,
            &random_body,
        )
    }

    /// Encodes a WHOAREYOU challenge and records it so a subsequent
    /// handshake packet from `peer` can be matched against it.
    pub fn encode_whoareyou(
        &mut self,
        recipient_node_id: &[u8; 32],
        peer: PeerKey,
        remote_pubkey: Option<PublicKey>,
        remote_enr_seq: u64,
        rng: &mut impl RngCore,
    ) -> Vec<u8> {
        let mut iv = [0u8; packet::IV_SIZE];
        rng.fill_bytes(&mut iv);
        let mut nonce = [0u8; 12];
        rng.fill_bytes(&mut nonce);
        let mut id_nonce = [0u8; 16];
        rng.fill_bytes(&mut id_nonce);

        let (wire_packet, challenge_data) =
            packet::encode_whoareyou(recipient_node_id, iv, nonce, id_nonce, remote_enr_seq);

        self.sessions.insert_challenge(
            peer,
            Challenge {
                challenge_data,
                remote_pubkey,
            },
        );
        wire_packet
    }

    /// Encodes a handshake packet replying to a prior inbound WHOAREYOU.
    /// `challenge_data` is the value carried on [`Packet::WhoAreYou`];
    /// `remote_static_pubkey` is the recipient's long-term identity key,
    /// known from a cached ENR or an earlier encounter. The local ENR is
    /// attached only if the remote's `record_seq` is strictly older than
    /// ours (§9 open question: the inequality is strict, so equal sequence
    /// numbers send no ENR).
    pub fn encode_handshake_packet(
        &mut self,
        recipient_node_id: &[u8; 32],
        peer: &PeerKey,
        challenge_data: &[u8],
        remote_static_pubkey: &PublicKey,
        remote_record_seq: u64,
        local_enr: Option<&Enr>,
        message: &[u8],
        rng: &mut impl RngCore,
    ) -> Result<Vec<u8>, Discv5Error> {
        let ephemeral_secret = SecretKey::random(rng);
        let ephemeral_public = ephemeral_secret.public_key();

        let signature = session::sign_identity_proof(
            &self.signing_key,
            challenge_data,
            &ephemeral_public,
            recipient_node_id,
        );

        let keys = session::derive_session_keys(
            challenge_data,
            &ephemeral_secret,
            remote_static_pubkey,
            &self.local_node_id,
            recipient_node_id,
            true,
        )?;

        let mut iv = [0u8; packet::IV_SIZE];
        rng.fill_bytes(&mut iv);
        let mut nonce = [0u8; 12];
        rng.fill_bytes(&mut nonce);

        let enr_bytes = if remote_record_seq < self.local_enr_seq {
            local_enr.map(|enr| enr.encode_to_vec())
        } else {
            None
        };

        let ephemeral_pubkey_bytes: [u8; 33] = ephemeral_public
            .to_encoded_point(true)
            .as_bytes()
            .try_into()
            .expect("compressed secp256k1 point is 33 bytes");

        let packet = packet::encode_handshake(
            recipient_node_id,
            &self.local_node_id,
            iv,
            nonce,
            &signature,
            &ephemeral_pubkey_bytes,
            enr_bytes.as_deref(),
            &keys.write_key,
            message,
        )?;

        self.sessions.insert_session(peer.clone(), keys);
        Ok(packet)
    }

    /// Decodes an inbound packet, branching on its flag. Ordinary-message
    /// AEAD failure drops the cached session and reports a keyless packet
    /// rather than erroring (§4.3); handshake AEAD failure is fatal.
    pub fn decode(&mut self, wire_packet: &[u8], peer: &PeerKey) -> Result<Packet, Discv5Error> {
        let (header, body) = packet::parse_header(wire_packet, &self.local_node_id)?;

        match header.flag {
            PacketFlag::OrdinaryMessage => {
                let src_id: [u8; 32] = header
                    .authdata
                    .as_slice()
                    .try_into()
                    .map_err(|_| Discv5Error::MalformedAuthData)?;

                let message = match self.sessions.session(peer) {
                    Some(keys) => match packet::aead_decrypt(&keys.read_key, &header.nonce, &header.challenge_data, body) {
                        Ok(plaintext) => Some(plaintext),
                        Err(_) => {
                            self.sessions.drop_session(peer);
                            None
                        }
                    },
                    None => None,
                };

                Ok(Packet::Ordinary { src_id, message })
            }
            PacketFlag::WhoAreYou => {
                if header.authdata.len() != packet::WHOAREYOU_AUTHDATA_SIZE {
                    return Err(Discv5Error::MalformedAuthData);
                }
                let id_nonce: [u8; 16] = header.authdata[..16].try_into().unwrap();
                let enr_seq = u64::from_be_bytes(header.authdata[16..24].try_into().unwrap());
                Ok(Packet::WhoAreYou {
                    id_nonce,
                    enr_seq,
                    challenge_data: header.challenge_data,
                })
            }
            PacketFlag::HandshakeMessage => {
                if header.authdata.len() < 32 + 1 + 1 + 64 + 33 {
                    return Err(Discv5Error::MalformedAuthData);
                }
                let src_id: [u8; 32] = header.authdata[..32].try_into().unwrap();
                let sig_size = header.authdata[32] as usize;
                let ephkey_size = header.authdata[33] as usize;
                if sig_size != 64 || ephkey_size != 33 {
                    return Err(Discv5Error::MalformedAuthData);
                }
                let signature: [u8; 64] = header.authdata[34..98].try_into().unwrap();
                let ephemeral_pubkey_bytes: [u8; 33] = header.authdata[98..131].try_into().unwrap();
                let enr_bytes = &header.authdata[131..];
                let enr = if enr_bytes.is_empty() {
                    None
                } else {
                    let (enr, _): (Enr, _) = p2p_rlp::decode::RLPDecode::decode_unfinished(enr_bytes)?;
                    Some(enr)
                };

                let challenge = self
                    .sessions
                    .take_challenge(peer)
                    .ok_or(Discv5Error::NoChallenge)?;

                let remote_public_key =
                    session::resolve_identity_public_key(enr.as_ref(), &challenge)?;
                let ephemeral_public = PublicKey::from_sec1_bytes(&ephemeral_pubkey_bytes)
                    .map_err(|e| Discv5Error::CryptographyError(e.to_string()))?;

                let verifying_key = k256::ecdsa::VerifyingKey::from_sec1_bytes(
                    remote_public_key.to_encoded_point(true).as_bytes(),
                )
                .map_err(|e| Discv5Error::CryptographyError(e.to_string()))?;
                session::verify_identity_proof(
                    &verifying_key,
                    &signature,
                    &challenge.challenge_data,
                    &ephemeral_public,
                    &self.local_node_id,
                )?;

                let static_secret = SecretKey::from_slice(&self.signing_key.to_bytes())
                    .map_err(|e| Discv5Error::CryptographyError(e.to_string()))?;
                let keys: SessionKeys = session::derive_session_keys(
                    &challenge.challenge_data,
                    &static_secret,
                    &ephemeral_public,
                    &src_id,
                    &self.local_node_id,
                    false,
                )?;
                let plaintext = packet::aead_decrypt(&keys.read_key, &header.nonce, &header.challenge_data, body)?;

                self.sessions.insert_session(peer.clone(), keys);
                Ok(Packet::Handshake {
                    src_id,
                    message: plaintext,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;
    use rand::thread_rng;

    fn static_pubkey(signing_key: &SigningKey) -> PublicKey {
        let encoded = signing_key.verifying_key().to_encoded_point(true);
        PublicKey::from_sec1_bytes(encoded.as_bytes()).unwrap()
    }

    #[test]
    fn full_handshake_then_session_message_round_trips() {
        let mut rng = thread_rng();
        let initiator_signing = SigningKey::random(&mut rng);
        let responder_signing = SigningKey::random(&mut rng);
        let initiator_id = [0x01u8; 32];
        let responder_id = [0x02u8; 32];
        let initiator_static_pubkey = static_pubkey(&initiator_signing);
        let responder_static_pubkey = static_pubkey(&responder_signing);

        let mut initiator = Discv5Codec::new(initiator_id, initiator_signing, 0);
        let mut responder = Discv5Codec::new(responder_id, responder_signing, 0);

        let peer_as_seen_by_initiator: PeerKey = (responder_id, "127.0.0.1:9000".to_string());
        let peer_as_seen_by_responder: PeerKey = (initiator_id, "127.0.0.1:9001".to_string());

        let first_message = initiator
            .encode_message_packet(&responder_id, &peer_as_seen_by_initiator, b"hello", &mut rng)
            .unwrap();
        let decoded = responder.decode(&first_message, &peer_as_seen_by_responder).unwrap();
        match decoded {
            Packet::Ordinary { src_id, message } => {
                assert_eq!(src_id, initiator_id);
                assert!(message.is_none());
            }
            _ => panic!("expected an ordinary packet"),
        }

        let whoareyou = responder.encode_whoareyou(
            &initiator_id,
            peer_as_seen_by_responder.clone(),
            Some(initiator_static_pubkey),
            0,
            &mut rng,
        );
        let decoded = initiator.decode(&whoareyou, &peer_as_seen_by_initiator).unwrap();
        let (enr_seq, challenge_data) = match decoded {
            Packet::WhoAreYou { enr_seq, challenge_data, .. } => (enr_seq, challenge_data),
            _ => panic!("expected a whoareyou packet"),
        };

        let handshake = initiator
            .encode_handshake_packet(
                &responder_id,
                &peer_as_seen_by_initiator,
                &challenge_data,
                &responder_static_pubkey,
                enr_seq,
                None,
                b"hello handshake",
                &mut rng,
            )
            .unwrap();
        let decoded = responder.decode(&handshake, &peer_as_seen_by_responder).unwrap();
        match decoded {
            Packet::Handshake { src_id, message } => {
                assert_eq!(src_id, initiator_id);
                assert_eq!(message, b"hello handshake");
            }
            _ => panic!("expected a handshake packet"),
        }

        let reply = responder
            .encode_message_packet(&initiator_id, &peer_as_seen_by_responder, b"pong", &mut rng)
            .unwrap();
        let decoded = initiator.decode(&reply, &peer_as_seen_by_initiator).unwrap();
        match decoded {
            Packet::Ordinary { src_id, message } => {
                assert_eq!(src_id, responder_id);
                assert_eq!(message, Some(b"pong".to_vec()));
            }
            _ => panic!("expected an ordinary packet carrying the reply"),
        }
    }
}
