use thiserror::Error;

#[derive(Debug, Error)]
pub enum Discv5Error {
    #[error("packet too short: got {0} bytes")]
    PacketTooShort(usize),
    #[error("unrecognized protocol id")]
    BadProtocolId,
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),
    #[error("unrecognized packet flag {0}")]
    BadFlag(u8),
    #[error("malformed authdata")]
    MalformedAuthData,
    #[error("no session keys for this peer; packet reported as keyless")]
    NoSession,
    #[error("AEAD encryption failed")]
    EncryptionFailed,
    #[error("AEAD decryption failed")]
    DecryptionFailed,
    #[error("no outstanding WHOAREYOU challenge for this peer")]
    NoChallenge,
    #[error("identity proof signature did not verify")]
    BadIdentityProof,
    #[error("ENR is required to verify the identity proof but none was supplied")]
    MissingEnrForVerification,
    #[error("cryptography error: {0}")]
    CryptographyError(String),
    #[error(transparent)]
    Rlp(#[from] p2p_rlp::error::RLPDecodeError),
}
