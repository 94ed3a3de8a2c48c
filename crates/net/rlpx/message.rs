use bytes::BufMut;
use p2p_rlp::error::{RLPDecodeError, RLPEncodeError};

/// Implemented by every devp2p/sub-protocol message body. Distinct from
/// `p2p_rlp::{RLPEncode, RLPDecode}` because a handful of messages (everyone
/// but `hello`) are snappy-compressed on the wire above protocol v5, which
/// is folded into these methods rather than exposed separately.
pub trait RLPxMessage: Sized {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError>;

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError>;
}
