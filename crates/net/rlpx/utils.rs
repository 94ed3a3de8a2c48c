use ethereum_types::H512;
use k256::{
    elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint},
    EncodedPoint, PublicKey, SecretKey,
};
use p2p_rlp::error::{RLPDecodeError, RLPEncodeError};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    use k256::sha2::Digest;
    k256::sha2::Sha256::digest(data).into()
}

pub fn sha256_hmac(key: &[u8], inputs: &[&[u8]], auth_data: &[u8]) -> [u8; 32] {
    use hmac::Mac;
    use k256::sha2::Sha256;

    let mut hasher = hmac::Hmac::<Sha256>::new_from_slice(key).unwrap();
    for input in inputs {
        hasher.update(input);
    }
    hasher.update(auth_data);
    hasher.finalize().into_bytes().into()
}

pub fn ecdh_xchng(secret_key: &SecretKey, public_key: &PublicKey) -> [u8; 32] {
    k256::ecdh::diffie_hellman(secret_key.to_nonzero_scalar(), public_key.as_affine())
        .raw_secret_bytes()[..32]
        .try_into()
        .unwrap()
}

/// ECIES key derivation function for the Auth/Ack handshake. The discv5
/// session key derivation in `crate::discv5::session` uses HKDF instead --
/// this KDF is specific to RLPx's ECIES framing.
pub fn kdf(secret: &[u8], output: &mut [u8]) {
    concat_kdf::derive_key_into::<k256::sha2::Sha256>(secret, &[], output).unwrap();
}

/// Computes a node id (the devp2p wire encoding of a public key) from it.
pub fn pubkey2id(pk: &PublicKey) -> H512 {
    let encoded = pk.to_encoded_point(false);
    let bytes = encoded.as_bytes();
    debug_assert_eq!(bytes[0], 4);
    H512::from_slice(&bytes[1..])
}

/// The inverse of [`pubkey2id`]: the node ID is the uncompressed public key
/// with the leading `0x04` tag byte omitted.
pub fn id2pubkey(id: H512) -> Option<PublicKey> {
    let point = EncodedPoint::from_untagged_bytes(id.as_fixed_bytes().into());
    PublicKey::from_encoded_point(&point).into_option()
}

pub fn snappy_compress(data: Vec<u8>) -> Result<Vec<u8>, RLPEncodeError> {
    let mut encoder = snap::raw::Encoder::new();
    encoder
        .compress_vec(&data)
        .map_err(|_| RLPEncodeError::InvalidCompression)
}

pub fn snappy_decompress(data: &[u8]) -> Result<Vec<u8>, RLPDecodeError> {
    let mut decoder = snap::raw::Decoder::new();
    decoder
        .decompress_vec(data)
        .map_err(|_| RLPDecodeError::MalformedData)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdh_xchng_smoke_test() {
        use rand::rngs::OsRng;

        let a_sk = SecretKey::random(&mut OsRng);
        let b_sk = SecretKey::random(&mut OsRng);

        let a_sk_b_pk = ecdh_xchng(&a_sk, &b_sk.public_key());
        let b_sk_a_pk = ecdh_xchng(&b_sk, &a_sk.public_key());

        assert_eq!(a_sk_b_pk, b_sk_a_pk);
    }

    #[test]
    fn id2pubkey_pubkey2id_smoke_test() {
        use rand::rngs::OsRng;

        let sk = SecretKey::random(&mut OsRng);
        let pk = sk.public_key();
        let id = pubkey2id(&pk);
        let pk2 = id2pubkey(id).unwrap();
        assert_eq!(pk, pk2);
    }

    #[test]
    fn snappy_round_trip() {
        let data = b"some message data to compress".to_vec();
        let compressed = snappy_compress(data.clone()).unwrap();
        let decompressed = snappy_decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }
}
