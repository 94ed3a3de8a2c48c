/// A single byte below this value is its own RLP encoding.
pub const RLP_EMPTY_STRING: u8 = 0x80;
/// Same constant under the name used by the encoder for blob prefixes.
pub const RLP_NULL: u8 = RLP_EMPTY_STRING;
/// Base prefix byte for lists with a payload shorter than 56 bytes.
pub const RLP_EMPTY_LIST: u8 = 0xc0;
/// Length (in bytes) at which a blob or list payload switches from the
/// short form (length embedded in the prefix byte) to the long form
/// (length-of-length prefix followed by the big-endian length).
pub const THRESHOLD_LEN: usize = 56;
