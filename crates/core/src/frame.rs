//! Data and acknowledgment frame codec.
//!
//! Data frame: `payload || sequence (u32 LE) || digest(payload || sequence)`.
//! Ack frame: the encoded sequence repeated `ACK_REPLICAS` times, no digest.

use thiserror::Error;

use crate::hash;
use crate::types::{
    decode_sequence, encode_sequence, Sequence, ACK_FRAME_SIZE, ACK_QUORUM, ACK_REPLICAS,
    DIGEST_LEN, MAX_PAYLOAD, MIN_FRAME_SIZE, SEQUENCE_WIDTH,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("frame of {0} bytes is shorter than the {min}-byte minimum", min = MIN_FRAME_SIZE)]
    TooShort(usize),

    #[error("frame digest mismatch")]
    DigestMismatch,

    #[error("ack of {0} bytes, expected {expected}", expected = ACK_FRAME_SIZE)]
    WrongAckLength(usize),

    #[error("no ack replica reached quorum (best agreement {0}/{replicas})", replicas = ACK_REPLICAS)]
    NoQuorum(usize),
}

/// A data frame borrowed from a received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFrame<'a> {
    pub sequence: Sequence,
    pub payload: &'a [u8],
}

/// Outcome of a majority vote over the replicas of an ack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckVote {
    pub sequence: Sequence,
    /// Replicas that agreed with the winning value, between `ACK_QUORUM` and `ACK_REPLICAS`.
    pub votes: usize,
}

impl AckVote {
    /// True when some replicas were damaged but the quorum still held.
    pub fn is_partial(&self) -> bool {
        self.votes < ACK_REPLICAS
    }
}

pub fn encode_frame(sequence: Sequence, payload: &[u8]) -> Vec<u8> {
    assert!(
        payload.len() <= MAX_PAYLOAD,
        "payload of {} bytes exceeds MAX_PAYLOAD",
        payload.len()
    );

    let seq = encode_sequence(sequence);
    let digest = hash::digest_parts(&[payload, &seq]);

    let mut frame = Vec::with_capacity(payload.len() + MIN_FRAME_SIZE);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&seq);
    frame.extend_from_slice(&digest);
    frame
}

pub fn decode_frame(raw: &[u8]) -> Result<DataFrame<'_>, CodecError> {
    if raw.len() < MIN_FRAME_SIZE {
        return Err(CodecError::TooShort(raw.len()));
    }

    let (checked, digest) = raw.split_at(raw.len() - DIGEST_LEN);
    if !hash::verify(checked, digest) {
        return Err(CodecError::DigestMismatch);
    }

    let (payload, seq) = checked.split_at(checked.len() - SEQUENCE_WIDTH);
    let mut field = [0u8; SEQUENCE_WIDTH];
    field.copy_from_slice(seq);

    Ok(DataFrame {
        sequence: decode_sequence(field),
        payload,
    })
}

pub fn encode_ack(sequence: Sequence) -> [u8; ACK_FRAME_SIZE] {
    let seq = encode_sequence(sequence);
    let mut ack = [0u8; ACK_FRAME_SIZE];
    for replica in ack.chunks_exact_mut(SEQUENCE_WIDTH) {
        replica.copy_from_slice(&seq);
    }
    ack
}

pub fn decode_ack(raw: &[u8]) -> Result<AckVote, CodecError> {
    if raw.len() != ACK_FRAME_SIZE {
        return Err(CodecError::WrongAckLength(raw.len()));
    }

    let mut tally: Vec<(Sequence, usize)> = Vec::with_capacity(ACK_REPLICAS);
    for replica in raw.chunks_exact(SEQUENCE_WIDTH) {
        let mut field = [0u8; SEQUENCE_WIDTH];
        field.copy_from_slice(replica);
        let value = decode_sequence(field);
        match tally.iter_mut().find(|(v, _)| *v == value) {
            Some((_, count)) => *count += 1,
            None => tally.push((value, 1)),
        }
    }

    let (sequence, votes) = tally
        .into_iter()
        .max_by_key(|&(_, count)| count)
        .unwrap_or((0, 0));

    if votes < ACK_QUORUM {
        return Err(CodecError::NoQuorum(votes));
    }

    Ok(AckVote { sequence, votes })
}
