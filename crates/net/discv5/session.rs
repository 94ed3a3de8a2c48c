//! Session and challenge tables plus key derivation for the discv5
//! handshake (§4.3). Both tables are cache-like: entries may be evicted,
//! and a miss is a trigger for re-handshake, not an error (§5).

use std::collections::HashMap;

use hkdf::Hkdf;
use k256::{
    ecdsa::{signature::Verifier, Signature, SigningKey, VerifyingKey},
    PublicKey, SecretKey,
};
use sha2::Sha256;

use super::error::Discv5Error;
use super::packet;
use crate::enr::Enr;
use crate::rlpx::utils::ecdh_xchng;

const IDENTITY_PROOF_PREAMBLE: &[u8] = b"discovery v5 identity proof";
const KEY_AGREEMENT_INFO: &[u8] = b"discovery v5 key agreement";

/// The peer address a session/challenge is keyed by: discv5 sessions are
/// per (node-id, socket address), since a node can change address.
pub type PeerKey = ([u8; 32], String);

#[derive(Debug, Clone, Copy)]
pub struct SessionKeys {
    pub write_key: [u8; 16],
    pub read_key: [u8; 16],
}

/// A WHOAREYOU challenge awaiting its handshake reply.
pub struct Challenge {
    pub challenge_data: Vec<u8>,
    pub remote_pubkey: Option<PublicKey>,
}

/// The per-node session and in-flight challenge tables. Owned by a single
/// task, per the single-writer discipline in §5.
#[derive(Default)]
pub struct SessionTable {
    sessions: HashMap<PeerKey, SessionKeys>,
    challenges: HashMap<PeerKey, Challenge>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, peer: &PeerKey) -> Option<&SessionKeys> {
        self.sessions.get(peer)
    }

    pub fn insert_session(&mut self, peer: PeerKey, keys: SessionKeys) {
        self.sessions.insert(peer, keys);
    }

    /// AEAD failure on an ordinary message may indicate the remote rotated
    /// its session; dropping our half forces a fresh handshake next time.
    pub fn drop_session(&mut self, peer: &PeerKey) {
        self.sessions.remove(peer);
    }

    pub fn insert_challenge(&mut self, peer: PeerKey, challenge: Challenge) {
        self.challenges.insert(peer, challenge);
    }

    pub fn take_challenge(&mut self, peer: &PeerKey) -> Option<Challenge> {
        self.challenges.remove(peer)
    }
}

/// Derives `writeKey ∥ readKey` via `HKDF-SHA-256`, then returns them in the
/// orientation the caller's role expects: an initiator's write key is the
/// responder's read key, and vice versa.
pub fn derive_session_keys(
    challenge_data: &[u8],
    ephemeral_secret: &SecretKey,
    remote_ephemeral_public: &PublicKey,
    initiator_id: &[u8; 32],
    recipient_id: &[u8; 32],
    is_initiator: bool,
) -> Result<SessionKeys, Discv5Error> {
    let shared_secret = ecdh_xchng(ephemeral_secret, remote_ephemeral_public);

    let mut info = Vec::with_capacity(KEY_AGREEMENT_INFO.len() + 64);
    info.extend_from_slice(KEY_AGREEMENT_INFO);
    info.extend_from_slice(initiator_id);
    info.extend_from_slice(recipient_id);

    let hk = Hkdf::<Sha256>::new(Some(challenge_data), &shared_secret);
    let mut okm = [0u8; 32];
    hk.expand(&info, &mut okm)
        .map_err(|e| Discv5Error::CryptographyError(e.to_string()))?;

    let (initiator_write, initiator_read) = okm.split_at(16);
    let (write_key, read_key) = if is_initiator {
        (initiator_write, initiator_read)
    } else {
        (initiator_read, initiator_write)
    };

    Ok(SessionKeys {
        write_key: write_key.try_into().unwrap(),
        read_key: read_key.try_into().unwrap(),
    })
}

/// `sha256("discovery v5 identity proof" ∥ challengeData ∥ ephPubKey ∥ recipientNodeId)`,
/// signed by the long-term key to prove control of it over the ephemeral
/// one used for this handshake.
pub fn sign_identity_proof(
    signing_key: &SigningKey,
    challenge_data: &[u8],
    ephemeral_public: &PublicKey,
    recipient_id: &[u8; 32],
) -> [u8; 64] {
    use k256::ecdsa::signature::Signer;
    use sha2::Digest;

    let mut preimage = Vec::with_capacity(IDENTITY_PROOF_PREAMBLE.len() + challenge_data.len() + 33 + 32);
    preimage.extend_from_slice(IDENTITY_PROOF_PREAMBLE);
    preimage.extend_from_slice(challenge_data);
    preimage.extend_from_slice(ephemeral_public.to_encoded_point(true).as_bytes());
    preimage.extend_from_slice(recipient_id);
    let digest = sha2::Sha256::digest(&preimage);

    let signature: Signature = signing_key.sign(digest.as_slice());
    signature.to_bytes().into()
}

pub fn verify_identity_proof(
    verifying_key: &VerifyingKey,
    signature_bytes: &[u8; 64],
    challenge_data: &[u8],
    ephemeral_public: &PublicKey,
    recipient_id: &[u8; 32],
) -> Result<(), Discv5Error> {
    use sha2::Digest;

    let mut preimage = Vec::with_capacity(IDENTITY_PROOF_PREAMBLE.len() + challenge_data.len() + 33 + 32);
    preimage.extend_from_slice(IDENTITY_PROOF_PREAMBLE);
    preimage.extend_from_slice(challenge_data);
    preimage.extend_from_slice(ephemeral_public.to_encoded_point(true).as_bytes());
    preimage.extend_from_slice(recipient_id);
    let digest = sha2::Sha256::digest(&preimage);

    let signature = Signature::from_slice(signature_bytes)
        .map_err(|e| Discv5Error::CryptographyError(e.to_string()))?;
    verifying_key
        .verify(digest.as_slice(), &signature)
        .map_err(|_| Discv5Error::BadIdentityProof)
}

/// Resolves the public key to check a handshake's identity proof against:
/// the ENR carried on the handshake packet if present, otherwise the one
/// recorded on the outbound `Challenge` from a prior encounter.
pub fn resolve_identity_public_key(
    enr: Option<&Enr>,
    challenge: &Challenge,
) -> Result<PublicKey, Discv5Error> {
    if let Some(enr) = enr {
        return enr.public_key().ok_or(Discv5Error::MissingEnrForVerification);
    }
    challenge
        .remote_pubkey
        .clone()
        .ok_or(Discv5Error::MissingEnrForVerification)
}

pub use packet::{aead_decrypt, aead_encrypt};

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;

    #[test]
    fn handshake_key_derivation_matches_across_roles() {
        let initiator_eph = SecretKey::random(&mut thread_rng());
        let responder_eph = SecretKey::random(&mut thread_rng());
        let challenge_data = b"some challenge data".to_vec();
        let initiator_id = [0x11u8; 32];
        let recipient_id = [0x22u8; 32];

        let initiator_keys = derive_session_keys(
            &challenge_data,
            &initiator_eph,
            &responder_eph.public_key(),
            &initiator_id,
            &recipient_id,
            true,
        )
        .unwrap();
        let responder_keys = derive_session_keys(
            &challenge_data,
            &responder_eph,
            &initiator_eph.public_key(),
            &initiator_id,
            &recipient_id,
            false,
        )
        .unwrap();

        assert_eq!(initiator_keys.write_key, responder_keys.read_key);
        assert_eq!(initiator_keys.read_key, responder_keys.write_key);
    }

    #[test]
    fn identity_proof_round_trips() {
        let signing_key = SigningKey::random(&mut thread_rng());
        let verifying_key = *signing_key.verifying_key();
        let ephemeral = SecretKey::random(&mut thread_rng()).public_key();
        let challenge_data = b"challenge".to_vec();
        let recipient_id = [0x55u8; 32];

        let sig = sign_identity_proof(&signing_key, &challenge_data, &ephemeral, &recipient_id);
        verify_identity_proof(&verifying_key, &sig, &challenge_data, &ephemeral, &recipient_id).unwrap();
    }
}
