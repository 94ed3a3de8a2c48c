use bytes::Bytes;
use ethereum_types::U256;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::constants::{RLP_EMPTY_LIST, RLP_NULL, THRESHOLD_LEN};
use super::error::RLPDecodeError;

/// Decodes a whole buffer as a single value, failing if trailing bytes remain.
pub fn decode<T: RLPDecode>(buf: &[u8]) -> Result<T, RLPDecodeError> {
    let (value, rest) = T::decode_unfinished(buf)?;
    if !rest.is_empty() {
        return Err(RLPDecodeError::MalformedData);
    }
    Ok(value)
}

pub trait RLPDecode: Sized {
    /// Decodes the value from the front of `rlp`, returning the value and
    /// whatever bytes were left over.
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError>;

    fn decode(rlp: &[u8]) -> Result<Self, RLPDecodeError> {
        let (value, rest) = Self::decode_unfinished(rlp)?;
        if !rest.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(value)
    }
}

impl RLPDecode for bool {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first = *rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
        let value = match first {
            RLP_NULL => false,
            0x01 => true,
            _ => return Err(RLPDecodeError::MalformedBoolean),
        };
        Ok((value, &rlp[1..]))
    }
}

impl RLPDecode for () {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first = *rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
        if first != RLP_NULL {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(((), &rlp[1..]))
    }
}

/// Strips leading zero bytes, returning an error if any were found -- RLP
/// integers must be encoded with the minimal number of bytes.
fn check_no_leading_zeros(bytes: &[u8]) -> Result<(), RLPDecodeError> {
    if bytes.len() > 1 && bytes[0] == 0 {
        return Err(RLPDecodeError::MalformedData);
    }
    Ok(())
}

macro_rules! impl_decode_for_uint {
    ($t:ty) => {
        impl RLPDecode for $t {
            fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
                let (bytes, rest) = decode_bytes(rlp)?;
                check_no_leading_zeros(bytes)?;
                if bytes.len() > std::mem::size_of::<$t>() {
                    return Err(RLPDecodeError::InvalidLength);
                }
                let mut padded = [0u8; std::mem::size_of::<$t>()];
                padded[std::mem::size_of::<$t>() - bytes.len()..].copy_from_slice(bytes);
                Ok((<$t>::from_be_bytes(padded), rest))
            }
        }
    };
}

impl_decode_for_uint!(u8);
impl_decode_for_uint!(u16);
impl_decode_for_uint!(u32);
impl_decode_for_uint!(u64);
impl_decode_for_uint!(usize);
impl_decode_for_uint!(u128);

/// Reinterprets a decoded `u64`'s bit pattern back into an `f64`. Pairs with
/// [`crate::encode::encode_f64_bits`].
pub fn decode_f64_bits(rlp: &[u8]) -> Result<(f64, &[u8]), RLPDecodeError> {
    let (bits, rest) = u64::decode_unfinished(rlp)?;
    Ok((f64::from_bits(bits), rest))
}

/// The length of the length-of-length prefix that *should* have been used to
/// encode `len`, used to detect non-minimal long-form prefixes.
fn minimal_length_of_length(len: usize) -> usize {
    let bytes = len.to_be_bytes();
    let start = bytes.iter().position(|&x| x != 0).unwrap_or(bytes.len() - 1);
    (bytes.len() - start).max(1)
}

/// Splits the next RLP item off the front of `rlp`, returning its raw
/// (non-header) payload bytes and whether it was encoded as a list.
pub(crate) fn decode_rlp_item(rlp: &[u8]) -> Result<(bool, &[u8], &[u8]), RLPDecodeError> {
    let first = *rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
    match first {
        0..=0x7f => Ok((false, &rlp[..1], &rlp[1..])),
        0x80..=0xb7 => {
            let len = (first - RLP_NULL) as usize;
            if rlp.len() < 1 + len {
                return Err(RLPDecodeError::InvalidLength);
            }
            // A single byte below 0x80 must be encoded as itself, never as a
            // one-byte blob.
            if len == 1 && rlp[1] < RLP_NULL {
                return Err(RLPDecodeError::NonCanonicalSize);
            }
            Ok((false, &rlp[1..1 + len], &rlp[1 + len..]))
        }
        0xb8..=0xbf => {
            let len_of_len = (first - 0xb7) as usize;
            if rlp.len() < 1 + len_of_len {
                return Err(RLPDecodeError::InvalidLength);
            }
            let len_bytes = &rlp[1..1 + len_of_len];
            check_no_leading_zeros(len_bytes)?;
            let len = be_bytes_to_usize(len_bytes)?;
            if len < THRESHOLD_LEN {
                // Should have used the short form.
                return Err(RLPDecodeError::NonCanonicalSize);
            }
            if minimal_length_of_length(len) != len_of_len {
                return Err(RLPDecodeError::NonCanonicalSize);
            }
            let start = 1 + len_of_len;
            if rlp.len() < start + len {
                return Err(RLPDecodeError::InvalidLength);
            }
            Ok((false, &rlp[start..start + len], &rlp[start + len..]))
        }
        0xc0..=0xf7 => {
            let len = (first - RLP_EMPTY_LIST) as usize;
            if rlp.len() < 1 + len {
                return Err(RLPDecodeError::InvalidLength);
            }
            Ok((true, &rlp[1..1 + len], &rlp[1 + len..]))
        }
        0xf8..=0xff => {
            let len_of_len = (first - 0xf7) as usize;
            if rlp.len() < 1 + len_of_len {
                return Err(RLPDecodeError::InvalidLength);
            }
            let len_bytes = &rlp[1..1 + len_of_len];
            check_no_leading_zeros(len_bytes)?;
            let len = be_bytes_to_usize(len_bytes)?;
            if len < THRESHOLD_LEN {
                return Err(RLPDecodeError::NonCanonicalSize);
            }
            if minimal_length_of_length(len) != len_of_len {
                return Err(RLPDecodeError::NonCanonicalSize);
            }
            let start = 1 + len_of_len;
            if rlp.len() < start + len {
                return Err(RLPDecodeError::InvalidLength);
            }
            Ok((true, &rlp[start..start + len], &rlp[start + len..]))
        }
    }
}

fn be_bytes_to_usize(bytes: &[u8]) -> Result<usize, RLPDecodeError> {
    if bytes.len() > std::mem::size_of::<usize>() {
        return Err(RLPDecodeError::InvalidLength);
    }
    let mut padded = [0u8; std::mem::size_of::<usize>()];
    padded[std::mem::size_of::<usize>() - bytes.len()..].copy_from_slice(bytes);
    Ok(usize::from_be_bytes(padded))
}

/// Decodes a single blob item, returning its payload and the remaining
/// buffer. Errors if the item is a list.
pub fn decode_bytes(rlp: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    let (is_list, payload, rest) = decode_rlp_item(rlp)?;
    if is_list {
        return Err(RLPDecodeError::UnexpectedList);
    }
    Ok((payload, rest))
}

/// Decodes a single list item, returning its raw (still-encoded) payload
/// bytes and the remaining buffer. Errors if the item is a blob.
pub fn decode_list_payload(rlp: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    let (is_list, payload, rest) = decode_rlp_item(rlp)?;
    if !is_list {
        return Err(RLPDecodeError::UnexpectedString);
    }
    Ok((payload, rest))
}

/// Left-pads `data` with zeros up to `len`, erroring if `data` is already
/// longer than that.
pub fn static_left_pad<const N: usize>(data: &[u8]) -> Result<[u8; N], RLPDecodeError> {
    if data.len() > N {
        return Err(RLPDecodeError::InvalidLength);
    }
    let mut output = [0u8; N];
    output[N - data.len()..].copy_from_slice(data);
    Ok(output)
}

impl RLPDecode for String {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let value = String::from_utf8(bytes.to_vec()).map_err(|_| RLPDecodeError::MalformedData)?;
        Ok((value, rest))
    }
}

impl RLPDecode for U256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        check_no_leading_zeros(bytes)?;
        if bytes.len() > 32 {
            return Err(RLPDecodeError::InvalidLength);
        }
        Ok((U256::from_big_endian(bytes), rest))
    }
}

impl<const N: usize> RLPDecode for [u8; N] {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        if bytes.len() != N {
            return Err(RLPDecodeError::InvalidLength);
        }
        let mut array = [0u8; N];
        array.copy_from_slice(bytes);
        Ok((array, rest))
    }
}

impl<T: RLPDecode> RLPDecode for Vec<T> {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        if rlp.first() == Some(&RLP_EMPTY_LIST) {
            return Ok((Vec::new(), &rlp[1..]));
        }
        let (mut payload, rest) = decode_list_payload(rlp)?;
        let mut result = Vec::new();
        while !payload.is_empty() {
            let (value, new_payload) = T::decode_unfinished(payload)?;
            result.push(value);
            payload = new_payload;
        }
        Ok((result, rest))
    }
}

impl<T: RLPDecode> RLPDecode for Option<T> {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        if rlp.first() == Some(&RLP_EMPTY_LIST) {
            return Ok((None, &rlp[1..]));
        }
        let (value, rest) = T::decode_unfinished(rlp)?;
        Ok((Some(value), rest))
    }
}

macro_rules! impl_decode_for_tuple {
    ($($name:ident),+) => {
        impl<$($name: RLPDecode),+> RLPDecode for ($($name,)+) {
            fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
                let (mut payload, rest) = decode_list_payload(rlp)?;
                $(
                    let ($name, new_payload) = $name::decode_unfinished(payload)?;
                    payload = new_payload;
                )+
                if !payload.is_empty() {
                    return Err(RLPDecodeError::MalformedData);
                }
                Ok((($($name,)+), rest))
            }
        }
    };
}

impl_decode_for_tuple!(A, B);
impl_decode_for_tuple!(A, B, C);
impl_decode_for_tuple!(A, B, C, D);
impl_decode_for_tuple!(A, B, C, D, E);

impl RLPDecode for Ipv4Addr {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let octets: [u8; 4] = bytes.try_into().map_err(|_| RLPDecodeError::InvalidLength)?;
        Ok((Ipv4Addr::from(octets), rest))
    }
}

impl RLPDecode for Ipv6Addr {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let octets: [u8; 16] = bytes.try_into().map_err(|_| RLPDecodeError::InvalidLength)?;
        Ok((Ipv6Addr::from(octets), rest))
    }
}

impl RLPDecode for IpAddr {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        match bytes.len() {
            4 => {
                let octets: [u8; 4] = bytes.try_into().unwrap();
                Ok((IpAddr::V4(Ipv4Addr::from(octets)), rest))
            }
            16 => {
                let octets: [u8; 16] = bytes.try_into().unwrap();
                Ok((IpAddr::V6(Ipv6Addr::from(octets)), rest))
            }
            _ => Err(RLPDecodeError::InvalidLength),
        }
    }
}

impl RLPDecode for Bytes {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        Ok((Bytes::copy_from_slice(bytes), rest))
    }
}

macro_rules! impl_decode_for_ethereum_hash {
    ($t:ty, $n:expr) => {
        impl RLPDecode for ethereum_types::$t {
            fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
                let (bytes, rest) = decode_bytes(rlp)?;
                if bytes.len() != $n {
                    return Err(RLPDecodeError::InvalidLength);
                }
                Ok((ethereum_types::$t::from_slice(bytes), rest))
            }
        }
    };
}

impl_decode_for_ethereum_hash!(H32, 4);
impl_decode_for_ethereum_hash!(H64, 8);
impl_decode_for_ethereum_hash!(H128, 16);
impl_decode_for_ethereum_hash!(Address, 20);
impl_decode_for_ethereum_hash!(H256, 32);
impl_decode_for_ethereum_hash!(H264, 33);
impl_decode_for_ethereum_hash!(H512, 64);
impl_decode_for_ethereum_hash!(Signature, 65);

impl RLPDecode for ethereum_types::Bloom {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        if bytes.len() != 256 {
            return Err(RLPDecodeError::InvalidLength);
        }
        Ok((ethereum_types::Bloom::from_slice(bytes), rest))
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use ethereum_types::{Address, U256};
    use hex_literal::hex;

    use crate::error::RLPDecodeError;

    use super::RLPDecode;

    #[test]
    fn can_decode_booleans() {
        assert_eq!(bool::decode(&[0x01]).unwrap(), true);
        assert_eq!(bool::decode(&[0x80]).unwrap(), false);
        assert!(bool::decode(&[0x02]).is_err());
    }

    #[test]
    fn can_decode_integers() {
        assert_eq!(u64::decode(&[0x80]).unwrap(), 0);
        assert_eq!(u64::decode(&[0x0f]).unwrap(), 15);
        assert_eq!(u64::decode(&[0x82, 0x04, 0x00]).unwrap(), 1024);
    }

    #[test]
    fn rejects_leading_zeros() {
        let err = u64::decode(&[0x82, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, RLPDecodeError::MalformedData));
    }

    #[test]
    fn rejects_short_lengths_encoded_in_long_form() {
        // 10 bytes of payload, but encoded with a long-form (0xb8) prefix
        // even though the short form would have sufficed.
        let mut bad = vec![0xb8, 10];
        bad.extend(vec![0x11u8; 10]);
        let err = <[u8; 10]>::decode(&bad).unwrap_err();
        assert!(matches!(err, RLPDecodeError::NonCanonicalSize));
    }

    #[test]
    fn rejects_single_byte_encoded_as_blob() {
        let err = <[u8; 1]>::decode(&[0x81, 0x00]).unwrap_err();
        assert!(matches!(err, RLPDecodeError::NonCanonicalSize));
    }

    #[test]
    fn rejects_truncated_input() {
        let err = <[u8; 4]>::decode(&[0x84, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, RLPDecodeError::InvalidLength));
    }

    #[test]
    fn can_decode_strings() {
        assert_eq!(String::decode(&[0x80]).unwrap(), "");
        let mut encoded = vec![0x83];
        encoded.extend(b"dog");
        assert_eq!(String::decode(&encoded).unwrap(), "dog");
    }

    #[test]
    fn can_decode_lists() {
        let encoded = [0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g'];
        let decoded: Vec<String> = Vec::decode(&encoded).unwrap();
        assert_eq!(decoded, vec!["cat".to_string(), "dog".to_string()]);
    }

    #[test]
    fn can_decode_ip() {
        let encoded = [0x84, 192, 168, 0, 1];
        let ip: IpAddr = IpAddr::decode(&encoded).unwrap();
        assert_eq!(ip, "192.168.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn can_decode_address() {
        let encoded = hex!("94ef2d6d194084c2de36e0dabfce45d046b37d1106");
        let address = Address::decode(&encoded).unwrap();
        assert_eq!(address, Address::from(hex!("ef2d6d194084c2de36e0dabfce45d046b37d1106")));
    }

    #[test]
    fn can_decode_u256() {
        assert_eq!(U256::decode(&[1]).unwrap(), U256::from(1));
        let mut expected: Vec<u8> = vec![0xff; 32];
        expected.insert(0, 0x80 + 32);
        assert_eq!(U256::decode(&expected).unwrap(), U256::max_value());
    }

    #[test]
    fn rejects_trailing_bytes() {
        let err = u64::decode(&[0x0f, 0x0f]).unwrap_err();
        assert!(matches!(err, RLPDecodeError::MalformedData));
    }
}
