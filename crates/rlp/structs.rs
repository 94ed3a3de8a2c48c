use bytes::BufMut;

use crate::decode::{decode_list_payload, RLPDecode};
use crate::encode::{encode_length, RLPEncode};
use crate::error::RLPDecodeError;

/// Incrementally decodes the fields of an RLP record type (i.e. a
/// fixed-shape list, like a struct), consuming one field at a time from the
/// list's payload.
pub struct Decoder<'a> {
    payload: &'a [u8],
    rest: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(rlp: &'a [u8]) -> Result<Self, RLPDecodeError> {
        let (payload, rest) = decode_list_payload(rlp)?;
        Ok(Self { payload, rest })
    }

    /// Decodes the next field in the record.
    pub fn decode_field<T: RLPDecode>(self, name: &str) -> Result<(T, Self), RLPDecodeError> {
        let (value, payload) = T::decode_unfinished(self.payload).map_err(|err| {
            if let RLPDecodeError::Custom(_) = err {
                err
            } else {
                RLPDecodeError::Custom(format!("failed to decode field '{name}': {err}"))
            }
        })?;
        Ok((
            value,
            Self {
                payload,
                rest: self.rest,
            },
        ))
    }

    /// Decodes the next field if there is payload left, otherwise returns
    /// `None` without consuming anything. Used for fields added in later
    /// protocol versions.
    pub fn decode_optional_field<T: RLPDecode>(self) -> (Option<T>, Self) {
        if self.payload.is_empty() {
            return (None, self);
        }
        match T::decode_unfinished(self.payload) {
            Ok((value, payload)) => (
                Some(value),
                Self {
                    payload,
                    rest: self.rest,
                },
            ),
            Err(_) => (None, self),
        }
    }

    /// Returns the still-encoded bytes of the next field, without decoding
    /// it, alongside the decoder positioned after it.
    pub fn get_encoded_item(self) -> Result<(Vec<u8>, Self), RLPDecodeError> {
        let (_, _, rest) = crate::decode::decode_rlp_item(self.payload)?;
        let consumed_len = self.payload.len() - rest.len();
        let consumed = self.payload[..consumed_len].to_vec();
        Ok((
            consumed,
            Self {
                payload: rest,
                rest: self.rest,
            },
        ))
    }

    /// Asserts that every byte of the record's payload has been consumed,
    /// returning the bytes left after the whole record.
    pub fn finish(self) -> Result<&'a [u8], RLPDecodeError> {
        if !self.payload.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(self.rest)
    }

    /// Like [`Decoder::finish`], but tolerates unread trailing fields --
    /// useful when decoding a record that may carry fields from a newer
    /// protocol version this build doesn't know about.
    pub fn finish_unchecked(self) -> &'a [u8] {
        self.rest
    }
}

/// Builds an RLP record type (a list with a fixed field order) one field at
/// a time.
#[derive(Default)]
pub struct Encoder<'a> {
    buf: &'a mut dyn BufMut,
    temp_buf: Vec<u8>,
}

impl<'a> Encoder<'a> {
    pub fn new(buf: &'a mut dyn BufMut) -> Self {
        Self {
            buf,
            temp_buf: Vec::new(),
        }
    }

    pub fn encode_field<T: RLPEncode>(mut self, value: &T) -> Self {
        value.encode(&mut self.temp_buf);
        self
    }

    pub fn encode_optional_field<T: RLPEncode>(mut self, value: &Option<T>) -> Self {
        if let Some(value) = value {
            value.encode(&mut self.temp_buf);
        }
        self
    }

    pub fn finish(self) {
        encode_length(self.temp_buf.len(), self.buf);
        self.buf.put_slice(&self.temp_buf);
    }
}

/// Encodes a list of `(key, value)` pairs as an RLP list of two-element
/// lists, used by devp2p's Hello message capability negotiation and similar
/// key/value wire structures.
pub fn encode_key_value_list<K: RLPEncode, V: RLPEncode>(buf: &mut dyn BufMut, pairs: &[(K, V)]) {
    let mut pair_bufs: Vec<Vec<u8>> = Vec::with_capacity(pairs.len());
    for (k, v) in pairs {
        let mut pair_payload = Vec::new();
        k.encode(&mut pair_payload);
        v.encode(&mut pair_payload);
        let mut pair_buf = Vec::new();
        encode_length(pair_payload.len(), &mut pair_buf);
        pair_buf.extend_from_slice(&pair_payload);
        pair_bufs.push(pair_buf);
    }
    let total_len: usize = pair_bufs.iter().map(Vec::len).sum();
    encode_length(total_len, buf);
    for pair_buf in pair_bufs {
        buf.put_slice(&pair_buf);
    }
}

#[cfg(test)]
mod tests {
    use super::{Decoder, Encoder};

    #[test]
    fn can_encode_and_decode_a_record() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf)
            .encode_field(&1u64)
            .encode_field(&"hello".to_string())
            .finish();

        let decoder = Decoder::new(&buf).unwrap();
        let (a, decoder) = decoder.decode_field::<u64>("a").unwrap();
        let (b, decoder) = decoder.decode_field::<String>("b").unwrap();
        decoder.finish().unwrap();

        assert_eq!(a, 1);
        assert_eq!(b, "hello");
    }

    #[test]
    fn optional_field_defaults_to_none_when_missing() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf).encode_field(&1u64).finish();

        let decoder = Decoder::new(&buf).unwrap();
        let (a, decoder) = decoder.decode_field::<u64>("a").unwrap();
        let (b, decoder) = decoder.decode_optional_field::<u64>();
        decoder.finish().unwrap();

        assert_eq!(a, 1);
        assert_eq!(b, None);
    }
}
