//! Static header framing and AES-128-CTR header masking for discv5 packets
//! (§4.3). Stateless by design: session-key lookup, challenge bookkeeping,
//! and key derivation live in [`super::session`].

use aes::cipher::{KeyIvInit, StreamCipher};
use aes_gcm::{
    aead::{Aead, Payload},
    Aes128Gcm, KeyInit as AeadKeyInit, Nonce,
};

use super::error::Discv5Error;

pub const PROTOCOL_ID: &[u8; 6] = b"discv5";
pub const VERSION: u16 = 1;
pub const IV_SIZE: usize = 16;
pub const STATIC_HEADER_SIZE: usize = 6 + 2 + 1 + 12 + 2;
pub const WHOAREYOU_AUTHDATA_SIZE: usize = 16 + 8;
pub const ORDINARY_AUTHDATA_SIZE: usize = 32;
pub const MIN_PACKET_SIZE: usize = IV_SIZE + STATIC_HEADER_SIZE + WHOAREYOU_AUTHDATA_SIZE;

type Aes128Ctr = ctr::Ctr64BE<aes::Aes128>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFlag {
    OrdinaryMessage = 0,
    WhoAreYou = 1,
    HandshakeMessage = 2,
}

impl PacketFlag {
    fn from_byte(b: u8) -> Result<Self, Discv5Error> {
        match b {
            0 => Ok(Self::OrdinaryMessage),
            1 => Ok(Self::WhoAreYou),
            2 => Ok(Self::HandshakeMessage),
            other => Err(Discv5Error::BadFlag(other)),
        }
    }
}

fn mask_key_for(recipient_node_id: &[u8; 32]) -> [u8; 16] {
    recipient_node_id[16..32].try_into().expect("slice is 16 bytes")
}

/// CTR is its own inverse given the same key/IV; one function masks and
/// unmasks.
fn apply_mask(recipient_node_id: &[u8; 32], iv: &[u8; IV_SIZE], header: &mut [u8]) {
    let key = mask_key_for(recipient_node_id);
    let mut cipher = Aes128Ctr::new((&key).into(), iv.into());
    cipher.apply_keystream(header);
}

fn build_static_header(flag: PacketFlag, nonce: &[u8; 12], authdata_len: u16) -> [u8; STATIC_HEADER_SIZE] {
    let mut header = [0u8; STATIC_HEADER_SIZE];
    header[0..6].copy_from_slice(PROTOCOL_ID);
    header[6..8].copy_from_slice(&VERSION.to_be_bytes());
    header[8] = flag as u8;
    header[9..21].copy_from_slice(nonce);
    header[21..23].copy_from_slice(&authdata_len.to_be_bytes());
    header
}

/// A decoded static header plus whatever authdata followed it, still in
/// plaintext (already unmasked).
pub struct ParsedHeader {
    pub flag: PacketFlag,
    pub nonce: [u8; 12],
    pub authdata: Vec<u8>,
    /// `iv ∥ static_header ∥ authdata`, used as AEAD associated data and as
    /// the signed payload in the handshake identity proof.
    pub challenge_data: Vec<u8>,
}

/// Builds the masked `iv ∥ header` prefix shared by every packet kind.
fn encode_masked_header(
    recipient_node_id: &[u8; 32],
    iv: [u8; IV_SIZE],
    flag: PacketFlag,
    nonce: &[u8; 12],
    authdata: &[u8],
) -> (Vec<u8>, Vec<u8>) {
    let static_header = build_static_header(flag, nonce, authdata.len() as u16);
    let mut header_plaintext = Vec::with_capacity(STATIC_HEADER_SIZE + authdata.len());
    header_plaintext.extend_from_slice(&static_header);
    header_plaintext.extend_from_slice(authdata);

    let mut challenge_data = Vec::with_capacity(IV_SIZE + header_plaintext.len());
    challenge_data.extend_from_slice(&iv);
    challenge_data.extend_from_slice(&header_plaintext);

    let mut masked_header = header_plaintext;
    apply_mask(recipient_node_id, &iv, &mut masked_header);

    let mut packet_prefix = Vec::with_capacity(IV_SIZE + masked_header.len());
    packet_prefix.extend_from_slice(&iv);
    packet_prefix.extend_from_slice(&masked_header);

    (packet_prefix, challenge_data)
}

pub fn encode_ordinary(
    recipient_node_id: &[u8; 32],
    src_node_id: &[u8; 32],
    iv: [u8; IV_SIZE],
    nonce: [u8; 12],
    write_key: Option<&[u8; 16]>,
    message: &[u8],
    random_body: &[u8; 16],
) -> Result<Vec<u8>, Discv5Error> {
    let (mut packet, challenge_data) =
        encode_masked_header(recipient_node_id, iv, PacketFlag::OrdinaryMessage, &nonce, src_node_id);

    let body = match write_key {
        Some(key) => aead_encrypt(key, &nonce, &challenge_data, message)?,
        None => random_body.to_vec(),
    };
    packet.extend_from_slice(&body);
    Ok(packet)
}

pub fn encode_whoareyou(
    recipient_node_id: &[u8; 32],
    iv: [u8; IV_SIZE],
    nonce: [u8; 12],
    id_nonce: [u8; 16],
    enr_seq: u64,
) -> (Vec<u8>, Vec<u8>) {
    let mut authdata = Vec::with_capacity(WHOAREYOU_AUTHDATA_SIZE);
    authdata.extend_from_slice(&id_nonce);
    authdata.extend_from_slice(&enr_seq.to_be_bytes());

    let (packet, challenge_data) =
        encode_masked_header(recipient_node_id, iv, PacketFlag::WhoAreYou, &nonce, &authdata);
    (packet, challenge_data)
}

pub fn encode_handshake(
    recipient_node_id: &[u8; 32],
    src_node_id: &[u8; 32],
    iv: [u8; IV_SIZE],
    nonce: [u8; 12],
    signature: &[u8; 64],
    ephemeral_pubkey: &[u8; 33],
    enr: Option<&[u8]>,
    write_key: &[u8; 16],
    message: &[u8],
) -> Result<Vec<u8>, Discv5Error> {
    let mut authdata = Vec::with_capacity(32 + 1 + 1 + 64 + 33 + enr.map_or(0, <[u8]>::len));
    authdata.extend_from_slice(src_node_id);
    authdata.push(64);
    authdata.push(33);
    authdata.extend_from_slice(signature);
    authdata.extend_from_slice(ephemeral_pubkey);
    if let Some(enr) = enr {
        authdata.extend_from_slice(enr);
    }

    let (mut packet, challenge_data) =
        encode_masked_header(recipient_node_id, iv, PacketFlag::HandshakeMessage, &nonce, &authdata);
    let body = aead_encrypt(write_key, &nonce, &challenge_data, message)?;
    packet.extend_from_slice(&body);
    Ok(packet)
}

/// Unmasks and parses a packet's header. Does not touch the body; callers
/// branch on `flag` to decide how to interpret and decrypt it.
pub fn parse_header(packet: &[u8], local_node_id: &[u8; 32]) -> Result<(ParsedHeader, &[u8]), Discv5Error> {
    if packet.len() < MIN_PACKET_SIZE {
        return Err(Discv5Error::PacketTooShort(packet.len()));
    }
    let iv: [u8; IV_SIZE] = packet[..IV_SIZE].try_into().unwrap();
    let key = mask_key_for(local_node_id);
    let mut cipher = Aes128Ctr::new((&key).into(), (&iv).into());

    // Static header and authdata share one keystream, the same way
    // `encode_masked_header` masks them as a single contiguous buffer; we
    // unmask the static header first to learn `authdata_len`, then continue
    // the same cipher over the authdata bytes that follow it.
    let mut static_header: [u8; STATIC_HEADER_SIZE] = packet[IV_SIZE..IV_SIZE + STATIC_HEADER_SIZE]
        .try_into()
        .unwrap();
    cipher.apply_keystream(&mut static_header);

    if &static_header[0..6] != PROTOCOL_ID {
        return Err(Discv5Error::BadProtocolId);
    }
    let version = u16::from_be_bytes([static_header[6], static_header[7]]);
    if version != VERSION {
        return Err(Discv5Error::UnsupportedVersion(version));
    }
    let flag = PacketFlag::from_byte(static_header[8])?;
    let nonce: [u8; 12] = static_header[9..21].try_into().unwrap();
    let authdata_len = u16::from_be_bytes([static_header[21], static_header[22]]) as usize;

    let authdata_start = IV_SIZE + STATIC_HEADER_SIZE;
    if packet.len() < authdata_start + authdata_len {
        return Err(Discv5Error::MalformedAuthData);
    }
    let mut authdata = packet[authdata_start..authdata_start + authdata_len].to_vec();
    cipher.apply_keystream(&mut authdata);

    let mut challenge_data = Vec::with_capacity(authdata_start + authdata_len);
    challenge_data.extend_from_slice(&iv);
    challenge_data.extend_from_slice(&static_header);
    challenge_data.extend_from_slice(&authdata);

    let body = &packet[authdata_start + authdata_len..];
    Ok((
        ParsedHeader {
            flag,
            nonce,
            authdata,
            challenge_data,
        },
        body,
    ))
}

pub fn aead_encrypt(key: &[u8; 16], nonce: &[u8; 12], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Discv5Error> {
    let cipher = Aes128Gcm::new(key.into());
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| Discv5Error::EncryptionFailed)
}

pub fn aead_decrypt(key: &[u8; 16], nonce: &[u8; 12], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Discv5Error> {
    let cipher = Aes128Gcm::new(key.into());
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| Discv5Error::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whoareyou_round_trips_id_nonce_and_seq() {
        let recipient = [0x11u8; 32];
        let iv = [0x22u8; 16];
        let nonce = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c];
        let id_nonce: [u8; 16] = (0x10..0x20).collect::<Vec<u8>>().try_into().unwrap();

        let (packet, challenge_data) = encode_whoareyou(&recipient, iv, nonce, id_nonce, 0);
        let (parsed, body) = parse_header(&packet, &recipient).unwrap();

        assert_eq!(parsed.flag, PacketFlag::WhoAreYou);
        assert!(body.is_empty());
        assert_eq!(&parsed.authdata[..16], &id_nonce);
        assert_eq!(u64::from_be_bytes(parsed.authdata[16..24].try_into().unwrap()), 0);
        assert_eq!(parsed.challenge_data, challenge_data);
        assert_eq!(challenge_data.len(), IV_SIZE + STATIC_HEADER_SIZE + WHOAREYOU_AUTHDATA_SIZE);
    }

    #[test]
    fn ordinary_without_session_emits_random_body() {
        let recipient = [0x33u8; 32];
        let src = [0x44u8; 32];
        let iv = [0x55u8; 16];
        let nonce = [0u8; 12];
        let random_body = [0xab; 16];

        let packet =
            encode_ordinary(&recipient, &src, iv, nonce, None, b"unused", &random_body).unwrap();
        let (parsed, body) = parse_header(&packet, &recipient).unwrap();

        assert_eq!(parsed.flag, PacketFlag::OrdinaryMessage);
        assert_eq!(parsed.authdata, src);
        assert_eq!(body, random_body);
    }

    #[test]
    fn ordinary_with_session_round_trips_message() {
        let recipient = [0x66u8; 32];
        let src = [0x77u8; 32];
        let iv = [0x88u8; 16];
        let nonce = [0x09u8; 12];
        let key = [0x01u8; 16];

        let packet = encode_ordinary(&recipient, &src, iv, nonce, Some(&key), b"hello", &[0; 16]).unwrap();
        let (parsed, body) = parse_header(&packet, &recipient).unwrap();
        let plaintext = aead_decrypt(&key, &nonce, &parsed.challenge_data, body).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn rejects_short_packets() {
        let err = parse_header(&[0u8; 10], &[0u8; 32]).unwrap_err();
        assert!(matches!(err, Discv5Error::PacketTooShort(10)));
    }
}
