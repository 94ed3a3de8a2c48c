//! A minimal Ethereum Node Record, sufficient to carry `seq` and a public
//! key through the discv5 handshake (§4.3) and identity-proof verification.
//! Only the `v4` (secp256k1) signature scheme is implemented, matching the
//! rest of this crate's fixed ciphersuite -- full support for arbitrary ENR
//! identity schemes is out of scope (spec.md §1).

use bytes::Bytes;
use k256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, VerifyingKey,
};
use p2p_rlp::{decode::RLPDecode, encode::RLPEncode, error::RLPDecodeError};
use sha3::{Digest, Keccak256};

use crate::discv5::error::Discv5Error;

const ID_SCHEME_KEY: &str = "id";
const ID_SCHEME_V4: &[u8] = b"v4";
const SECP256K1_KEY: &str = "secp256k1";

/// An ENR's content: its sequence number and its sorted key/value pairs,
/// excluding the signature. This is what gets signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enr {
    pub signature: Bytes,
    pub seq: u64,
    pairs: Vec<(String, Bytes)>,
}

impl Enr {
    /// Builds and signs a record with the given key/value pairs (which must
    /// not include `id` or `secp256k1`; both are added automatically).
    pub fn new(
        signing_key: &k256::ecdsa::SigningKey,
        seq: u64,
        mut pairs: Vec<(String, Bytes)>,
    ) -> Self {
        let public_key = signing_key.verifying_key();
        pairs.push((ID_SCHEME_KEY.to_string(), Bytes::from_static(ID_SCHEME_V4)));
        pairs.push((
            SECP256K1_KEY.to_string(),
            Bytes::copy_from_slice(public_key.to_encoded_point(true).as_bytes()),
        ));
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        let content = Self::signing_content(seq, &pairs);
        let signature: Signature = signing_key.sign(&content);

        Self {
            signature: Bytes::copy_from_slice(&signature.to_bytes()),
            seq,
            pairs,
        }
    }

    fn signing_content(seq: u64, pairs: &[(String, Bytes)]) -> Vec<u8> {
        let mut buf = Vec::new();
        seq.encode(&mut buf);
        for (k, v) in pairs {
            k.encode(&mut buf);
            v.encode(&mut buf);
        }
        buf
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_ref())
    }

    /// The `secp256k1` entry, parsed as a compressed public key, if present.
    pub fn public_key(&self) -> Option<k256::PublicKey> {
        k256::PublicKey::from_sec1_bytes(self.get(SECP256K1_KEY)?).ok()
    }

    pub fn node_id(&self) -> Option<[u8; 32]> {
        let public_key = self.public_key()?;
        let uncompressed = public_key.to_encoded_point(false);
        let hash = Keccak256::digest(&uncompressed.as_bytes()[1..]);
        Some(hash.into())
    }

    /// Verifies the `v4` signature over this record's content.
    pub fn verify(&self) -> Result<(), Discv5Error> {
        if self.get(ID_SCHEME_KEY) != Some(ID_SCHEME_V4) {
            return Err(Discv5Error::CryptographyError(
                "only the v4 identity scheme is supported".into(),
            ));
        }
        let public_key_bytes = self
            .get(SECP256K1_KEY)
            .ok_or(Discv5Error::MissingEnrForVerification)?;
        let verifying_key = VerifyingKey::from_sec1_bytes(public_key_bytes)
            .map_err(|e| Discv5Error::CryptographyError(e.to_string()))?;
        let signature = Signature::from_slice(&self.signature)
            .map_err(|e| Discv5Error::CryptographyError(e.to_string()))?;
        let content = Self::signing_content(self.seq, &self.pairs);
        verifying_key
            .verify(&content, &signature)
            .map_err(|_| Discv5Error::BadIdentityProof)
    }
}

impl RLPEncode for Enr {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        let mut payload = Vec::new();
        self.signature.encode(&mut payload);
        self.seq.encode(&mut payload);
        for (k, v) in &self.pairs {
            k.encode(&mut payload);
            v.encode(&mut payload);
        }
        p2p_rlp::encode::encode_length(payload.len(), buf);
        buf.put_slice(&payload);
    }
}

impl RLPDecode for Enr {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (payload, rest) = p2p_rlp::decode::decode_list_payload(rlp)?;

        let (signature, list_rest): (Bytes, &[u8]) = RLPDecode::decode_unfinished(payload)?;
        let (seq, mut list_rest): (u64, &[u8]) = RLPDecode::decode_unfinished(list_rest)?;

        let mut pairs = Vec::new();
        while !list_rest.is_empty() {
            let (key, after_key): (String, &[u8]) = RLPDecode::decode_unfinished(list_rest)?;
            let (value, after_value): (Bytes, &[u8]) = RLPDecode::decode_unfinished(after_key)?;
            pairs.push((key, value));
            list_rest = after_value;
        }

        Ok((
            Self {
                signature,
                seq,
                pairs,
            },
            rest,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_verifies() {
        let signing_key = k256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        let enr = Enr::new(
            &signing_key,
            1,
            vec![("ip".to_string(), Bytes::from_static(&[127, 0, 0, 1]))],
        );
        enr.verify().unwrap();
        assert_eq!(enr.get("ip"), Some(&[127, 0, 0, 1][..]));
        assert!(enr.node_id().is_some());
    }

    #[test]
    fn encode_decode_round_trip() {
        let signing_key = k256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        let enr = Enr::new(
            &signing_key,
            7,
            vec![("udp".to_string(), Bytes::from_static(&[0x1f, 0x90]))],
        );
        let mut buf = Vec::new();
        enr.encode(&mut buf);
        let (decoded, rest): (Enr, _) = RLPDecode::decode_unfinished(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, enr);
        decoded.verify().unwrap();
    }
}
