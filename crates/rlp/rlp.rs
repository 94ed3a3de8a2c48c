//! Recursive Length Prefix (RLP) encoding and decoding.
//!
//! RLP is a self-delimiting binary encoding for nested byte strings used as
//! the wire format for the devp2p/RLPx and discv5 protocols implemented in
//! `p2p-net`. See [`RLPEncode`]/[`RLPDecode`] for the item-at-a-time trait
//! pair, and [`structs::Encoder`]/[`structs::Decoder`] for building and
//! reading fixed-shape record types (structs).

pub mod constants;
pub mod decode;
pub mod encode;
pub mod error;
pub mod structs;

pub use decode::{decode, RLPDecode};
pub use encode::{encode, RLPEncode};
pub use error::{RLPDecodeError, RLPEncodeError};
