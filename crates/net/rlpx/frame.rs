use aes::{
    cipher::{BlockEncrypt as _, KeyInit as _, StreamCipher as _},
    Aes256Enc,
};
use ethereum_types::H128;
use p2p_rlp::{
    decode::RLPDecode as _,
    encode::RLPEncode as _,
};
use sha3::Digest as _;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::connection::Established;
use super::error::RLPxError;

/// Frame bodies above this size (before compression) abort the connection.
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

pub(crate) async fn write<S: AsyncWrite + std::marker::Unpin>(
    mut frame_data: Vec<u8>,
    state: &mut Established,
    stream: &mut S,
) -> Result<(), RLPxError> {
    if frame_data.len() > MAX_FRAME_SIZE {
        return Err(RLPxError::BreachOfProtocol(format!(
            "frame of {} bytes exceeds the {}-byte limit",
            frame_data.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mac_aes_cipher = Aes256Enc::new_from_slice(&state.mac_key.0)
        .map_err(|e| RLPxError::CryptographyError(e.to_string()))?;

    // header = frame-size || header-data || header-padding
    let mut header = Vec::with_capacity(32);
    let frame_size = frame_data.len().to_be_bytes();
    header.extend_from_slice(&frame_size[5..8]);

    // header-data = (capability-id, context-id, total-size); all zero in
    // non-chunked mode.
    let header_data = (0_u8, 0_u8, 0_u8);
    header_data.encode(&mut header);

    header.resize(16, 0);
    state.egress_aes.apply_keystream(&mut header[..16]);

    let header_mac_seed = {
        let mac_digest: [u8; 16] = state.egress_mac.clone().finalize()[..16]
            .try_into()
            .unwrap();
        let mut seed = mac_digest.into();
        mac_aes_cipher.encrypt_block(&mut seed);
        H128(seed.into()) ^ H128(header[..16].try_into().unwrap())
    };
    state.egress_mac.update(header_mac_seed);
    let header_mac = state.egress_mac.clone().finalize();
    header.extend_from_slice(&header_mac[..16]);

    stream.write_all(&header).await?;

    frame_data.resize(frame_data.len().next_multiple_of(16), 0);
    state.egress_aes.apply_keystream(&mut frame_data);
    let frame_ciphertext = frame_data;

    stream.write_all(&frame_ciphertext).await?;

    state.egress_mac.update(&frame_ciphertext);
    let frame_mac_seed = {
        let mac_digest: [u8; 16] = state.egress_mac.clone().finalize()[..16]
            .try_into()
            .unwrap();
        let mut seed = mac_digest.into();
        mac_aes_cipher.encrypt_block(&mut seed);
        (H128(seed.into()) ^ H128(mac_digest)).0
    };
    state.egress_mac.update(frame_mac_seed);
    let frame_mac = state.egress_mac.clone().finalize();

    stream.write_all(&frame_mac[..16]).await?;
    Ok(())
}

pub(crate) async fn read<S: AsyncRead + std::marker::Unpin>(
    state: &mut Established,
    stream: &mut S,
) -> Result<Vec<u8>, RLPxError> {
    let mac_aes_cipher = Aes256Enc::new_from_slice(&state.mac_key.0)
        .map_err(|e| RLPxError::CryptographyError(e.to_string()))?;

    let mut frame_header = [0; 32];
    stream.read_exact(&mut frame_header).await?;
    let (header_ciphertext, header_mac) = frame_header.split_at_mut(16);

    let header_mac_seed = {
        let mac_digest: [u8; 16] = state.ingress_mac.clone().finalize()[..16]
            .try_into()
            .unwrap();
        let mut seed = mac_digest.into();
        mac_aes_cipher.encrypt_block(&mut seed);
        (H128(seed.into()) ^ H128(header_ciphertext.try_into().unwrap())).0
    };
    state.ingress_mac.update(header_mac_seed);

    let expected_header_mac = H128(
        state.ingress_mac.clone().finalize()[..16]
            .try_into()
            .unwrap(),
    );
    if header_mac != expected_header_mac.0 {
        return Err(RLPxError::BreachOfProtocol("invalid header MAC".into()));
    }

    let header_text = header_ciphertext;
    state.ingress_aes.apply_keystream(header_text);

    let ((capability_id, context_id, total_size), _): ((u8, u8, u8), &[u8]) =
        RLPDecode::decode_unfinished(&header_text[3..]).map_err(RLPxError::DecodeError)?;
    if (capability_id, context_id, total_size) != (0, 0, 0) {
        #[cfg(not(feature = "chunked-frames"))]
        return Err(RLPxError::BreachOfProtocol(
            "non-zero chunked header-data outside the chunked-frames feature".into(),
        ));
    }

    let frame_size: usize = u32::from_be_bytes([0, header_text[0], header_text[1], header_text[2]])
        as usize;
    if frame_size > MAX_FRAME_SIZE {
        return Err(RLPxError::BreachOfProtocol(format!(
            "frame of {frame_size} bytes exceeds the {MAX_FRAME_SIZE}-byte limit"
        )));
    }

    let padded_size = frame_size.next_multiple_of(16);
    let mut frame_data = vec![0; padded_size + 16];
    stream.read_exact(&mut frame_data).await?;
    let (frame_ciphertext, frame_mac) = frame_data.split_at_mut(padded_size);

    state.ingress_mac.update(&frame_ciphertext);
    let frame_mac_seed = {
        let mac_digest: [u8; 16] = state.ingress_mac.clone().finalize()[..16]
            .try_into()
            .unwrap();
        let mut seed = mac_digest.into();
        mac_aes_cipher.encrypt_block(&mut seed);
        (H128(seed.into()) ^ H128(mac_digest)).0
    };
    state.ingress_mac.update(frame_mac_seed);
    let expected_frame_mac: [u8; 16] = state.ingress_mac.clone().finalize()[..16]
        .try_into()
        .unwrap();

    if frame_mac != expected_frame_mac {
        return Err(RLPxError::BreachOfProtocol("invalid frame MAC".into()));
    }

    state.ingress_aes.apply_keystream(frame_ciphertext);

    let (frame_data, _padding) = frame_ciphertext.split_at(frame_size);
    Ok(frame_data.to_vec())
}

#[cfg(test)]
mod tests {
    use super::super::connection::Established;
    use super::*;

    #[tokio::test]
    async fn frame_round_trip_at_listed_sizes() {
        for size in [1usize, 15, 16, 17, 1024, 10 * 1024 * 1024 - 1] {
            let (mut a, mut b) = Established::test_pair();
            let mut pipe = tokio::io::duplex(size + 256);

            let payload = vec![0xabu8; size];
            write(payload.clone(), &mut a, &mut pipe.0).await.unwrap();
            let received = read(&mut b, &mut pipe.1).await.unwrap();
            assert_eq!(received, payload);
        }
    }

    #[tokio::test]
    async fn rejects_oversize_frame() {
        let (mut a, _b) = Established::test_pair();
        let err = write(vec![0u8; MAX_FRAME_SIZE + 1], &mut a, &mut tokio::io::sink())
            .await
            .unwrap_err();
        assert!(matches!(err, RLPxError::BreachOfProtocol(_)));
    }
}
