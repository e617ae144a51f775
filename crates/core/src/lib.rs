//! wire format and integrity primitives for Lossline

pub mod frame;
pub mod hash;
pub mod types;

pub use frame::{decode_ack, decode_frame, encode_ack, encode_frame, AckVote, CodecError, DataFrame};
pub use types::{Sequence, MAX_PAYLOAD};
