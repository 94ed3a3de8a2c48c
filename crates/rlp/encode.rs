use bytes::{BufMut, Bytes};
use ethereum_types::U256;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tinyvec::ArrayVec;

use super::constants::{RLP_EMPTY_LIST, RLP_NULL, THRESHOLD_LEN};

/// Encodes a value to a freshly allocated buffer.
/// For encoding into an existing buffer, use [`RLPEncode::encode`] directly.
pub fn encode<T: RLPEncode>(value: T) -> Vec<u8> {
    let mut buf = Vec::new();
    value.encode(&mut buf);
    buf
}

pub trait RLPEncode {
    fn encode(&self, buf: &mut dyn BufMut);

    fn length(&self) -> usize {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf.len()
    }

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

impl RLPEncode for bool {
    #[inline(always)]
    fn encode(&self, buf: &mut dyn BufMut) {
        if *self {
            buf.put_u8(0x01);
        } else {
            buf.put_u8(RLP_NULL);
        }
    }

    #[inline(always)]
    fn length(&self) -> usize {
        1
    }
}

impl RLPEncode for () {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u8(RLP_NULL);
    }
}

/// Encodes an unsigned integer as its minimal big-endian blob: `0` becomes
/// the empty blob (`RLP_NULL`), `1..=0x7f` is its own single byte, anything
/// else is length-prefixed with leading zero bytes stripped.
macro_rules! impl_encode_for_uint {
    ($t:ty, $n:expr) => {
        impl RLPEncode for $t {
            fn encode(&self, buf: &mut dyn BufMut) {
                match *self {
                    0 => buf.put_u8(RLP_NULL),
                    n @ 1..=0x7f => buf.put_u8(n as u8),
                    n => {
                        let mut bytes = ArrayVec::<[u8; $n]>::new();
                        bytes.extend_from_slice(&n.to_be_bytes());
                        let start = bytes.iter().position(|&x| x != 0).unwrap();
                        let len = bytes.len() - start;
                        buf.put_u8(RLP_NULL + len as u8);
                        buf.put_slice(&bytes[start..]);
                    }
                }
            }
        }
    };
}

impl_encode_for_uint!(u8, 8);
impl_encode_for_uint!(u16, 8);
impl_encode_for_uint!(u32, 8);
impl_encode_for_uint!(u64, 8);
impl_encode_for_uint!(usize, 8);
impl_encode_for_uint!(u128, 16);

/// Encodes an `f64` by reinterpreting its IEEE-754 bit pattern as a `u64`
/// and RLP-encoding that integer. Non-standard, but matches the reference
/// implementation's behavior; kept behind a named method instead of
/// overloading `append`/`encode` so callers opt in explicitly.
pub fn encode_f64_bits(value: f64, buf: &mut dyn BufMut) {
    value.to_bits().encode(buf)
}

impl RLPEncode for [u8] {
    #[inline(always)]
    fn encode(&self, buf: &mut dyn BufMut) {
        if self.len() == 1 && self[0] < RLP_NULL {
            buf.put_u8(self[0]);
        } else {
            encode_blob_prefix(self.len(), buf);
            buf.put_slice(self);
        }
    }
}

fn encode_blob_prefix(len: usize, buf: &mut dyn BufMut) {
    if len < THRESHOLD_LEN {
        buf.put_u8(RLP_NULL + len as u8);
    } else {
        let mut bytes = ArrayVec::<[u8; 8]>::new();
        bytes.extend_from_slice(&len.to_be_bytes());
        let start = bytes.iter().position(|&x| x != 0).unwrap();
        let len_of_len = bytes.len() - start;
        buf.put_u8(0xb7 + len_of_len as u8);
        buf.put_slice(&bytes[start..]);
    }
}

impl<const N: usize> RLPEncode for [u8; N] {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_ref().encode(buf)
    }
}

impl RLPEncode for str {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for &str {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for String {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for U256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        let leading_zeros_in_bytes: usize = (self.leading_zeros() / 8) as usize;
        let mut bytes: [u8; 32] = [0; 32];
        self.to_big_endian(&mut bytes);
        bytes[leading_zeros_in_bytes..].encode(buf)
    }
}

impl<T: RLPEncode> RLPEncode for Vec<T> {
    fn encode(&self, buf: &mut dyn BufMut) {
        if self.is_empty() {
            buf.put_u8(RLP_EMPTY_LIST);
        } else {
            let total_len = self.iter().map(RLPEncode::length).sum();
            encode_length(total_len, buf);
            for item in self {
                item.encode(buf);
            }
        }
    }
}

impl<T: RLPEncode> RLPEncode for Option<T> {
    fn encode(&self, buf: &mut dyn BufMut) {
        match self {
            Some(value) => value.encode(buf),
            None => buf.put_u8(RLP_EMPTY_LIST),
        }
    }
}

/// Writes a list length prefix for a payload of `total_len` bytes. Exposed
/// for callers building a list whose item count isn't known up front (e.g.
/// a variable-length record like an ENR), who assemble the payload into a
/// scratch buffer first and then prepend this.
pub fn encode_length(total_len: usize, buf: &mut dyn BufMut) {
    if total_len < THRESHOLD_LEN {
        buf.put_u8(RLP_EMPTY_LIST + total_len as u8);
    } else {
        let mut bytes = ArrayVec::<[u8; 8]>::new();
        bytes.extend_from_slice(&total_len.to_be_bytes());
        let start = bytes.iter().position(|&x| x != 0).unwrap();
        let len = bytes.len() - start;
        buf.put_u8(0xf7 + len as u8);
        buf.put_slice(&bytes[start..]);
    }
}

macro_rules! impl_encode_for_tuple {
    ($($name:ident . $idx:tt),+) => {
        impl<$($name: RLPEncode),+> RLPEncode for ($($name,)+) {
            fn encode(&self, buf: &mut dyn BufMut) {
                let total_len = 0 $(+ self.$idx.length())+;
                encode_length(total_len, buf);
                $(self.$idx.encode(buf);)+
            }
        }
    };
}

impl_encode_for_tuple!(A.0, B.1);
impl_encode_for_tuple!(A.0, B.1, C.2);
impl_encode_for_tuple!(A.0, B.1, C.2, D.3);
impl_encode_for_tuple!(A.0, B.1, C.2, D.3, E.4);

impl RLPEncode for Ipv4Addr {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.octets().encode(buf)
    }
}

impl RLPEncode for Ipv6Addr {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.octets().encode(buf)
    }
}

impl RLPEncode for IpAddr {
    fn encode(&self, buf: &mut dyn BufMut) {
        match self {
            IpAddr::V4(ip) => ip.encode(buf),
            IpAddr::V6(ip) => ip.encode(buf),
        }
    }
}

impl RLPEncode for Bytes {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_ref().encode(buf)
    }
}

// Encoding for the fixed-size Ethereum hash/address newtypes. These are all
// byte blobs on the wire.
macro_rules! impl_encode_for_ethereum_hash {
    ($t:ty) => {
        impl RLPEncode for ethereum_types::$t {
            fn encode(&self, buf: &mut dyn BufMut) {
                self.as_bytes().encode(buf)
            }
        }
    };
}

impl_encode_for_ethereum_hash!(H32);
impl_encode_for_ethereum_hash!(H64);
impl_encode_for_ethereum_hash!(H128);
impl_encode_for_ethereum_hash!(Address);
impl_encode_for_ethereum_hash!(H256);
impl_encode_for_ethereum_hash!(H264);
impl_encode_for_ethereum_hash!(H512);
impl_encode_for_ethereum_hash!(Signature);

impl RLPEncode for ethereum_types::Bloom {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.0.encode(buf)
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use ethereum_types::{Address, U256};
    use hex_literal::hex;

    use crate::constants::{RLP_EMPTY_LIST, RLP_NULL};

    use super::RLPEncode;

    #[test]
    fn can_encode_booleans() {
        let mut encoded = Vec::new();
        true.encode(&mut encoded);
        assert_eq!(encoded, vec![0x01]);

        let mut encoded = Vec::new();
        false.encode(&mut encoded);
        assert_eq!(encoded, vec![RLP_NULL]);
    }

    #[test]
    fn can_encode_integers() {
        for (value, expected) in [
            (0u64, vec![RLP_NULL]),
            (15u64, vec![0x0f]),
            (1024u64, vec![0x82, 0x04, 0x00]),
            (0x7fu64, vec![0x7f]),
            (0x80u64, vec![RLP_NULL + 1, 0x80]),
        ] {
            let mut encoded = Vec::new();
            value.encode(&mut encoded);
            assert_eq!(encoded, expected);
        }
    }

    #[test]
    fn can_encode_bytes() {
        let message: [u8; 1] = [0x00];
        let mut encoded = vec![];
        message.encode(&mut encoded);
        assert_eq!(encoded, vec![0x00]);

        let message: [u8; 2] = [0x04, 0x00];
        let mut encoded = vec![];
        message.encode(&mut encoded);
        assert_eq!(encoded, vec![RLP_NULL + 2, 0x04, 0x00]);
    }

    #[test]
    fn can_encode_strings() {
        let mut encoded = vec![];
        "dog".encode(&mut encoded);
        assert_eq!(encoded, vec![RLP_NULL + 3, b'd', b'o', b'g']);

        let mut encoded = vec![];
        "".encode(&mut encoded);
        assert_eq!(encoded, vec![RLP_NULL]);
    }

    #[test]
    fn can_encode_lists_of_str() {
        let message = vec!["cat", "dog"];
        let mut encoded = vec![];
        message.encode(&mut encoded);
        assert_eq!(
            encoded,
            vec![0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']
        );

        let message: Vec<&str> = vec![];
        let mut encoded = vec![];
        message.encode(&mut encoded);
        assert_eq!(encoded, vec![RLP_EMPTY_LIST]);
    }

    #[test]
    fn can_encode_long_blob() {
        let data = vec![0x11u8; 56];
        let mut encoded = vec![];
        data.as_slice().encode(&mut encoded);
        assert_eq!(&encoded[..2], &[0xb8, 56]);
        assert_eq!(&encoded[2..], data.as_slice());
    }

    #[test]
    fn can_encode_ip() {
        let ip: IpAddr = "192.168.0.1".parse().unwrap();
        let mut encoded = vec![];
        ip.encode(&mut encoded);
        assert_eq!(encoded, vec![RLP_NULL + 4, 192, 168, 0, 1]);
    }

    #[test]
    fn can_encode_addresses() {
        let address = Address::from(hex!("ef2d6d194084c2de36e0dabfce45d046b37d1106"));
        let mut encoded = vec![];
        address.encode(&mut encoded);
        assert_eq!(encoded, hex!("94ef2d6d194084c2de36e0dabfce45d046b37d1106"));
    }

    #[test]
    fn can_encode_u256() {
        let mut encoded = Vec::new();
        U256::from(1).encode(&mut encoded);
        assert_eq!(encoded, vec![1]);

        let mut encoded = Vec::new();
        U256::max_value().encode(&mut encoded);
        let mut expected: Vec<u8> = vec![0xff; 32];
        expected.insert(0, 0x80 + 32);
        assert_eq!(encoded, expected);
    }

    #[test]
    fn can_encode_tuple() {
        let tuple: (u8, u8) = (0x01, 0x02);
        let mut encoded = Vec::new();
        tuple.encode(&mut encoded);
        assert_eq!(encoded, vec![0xc0 + 2, 0x01, 0x02]);
    }
}
