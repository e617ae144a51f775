pub type Sequence = u32;
pub type Digest = [u8; DIGEST_LEN];

pub const SEQUENCE_WIDTH: usize = std::mem::size_of::<Sequence>();
pub const DIGEST_LEN: usize = 16;

/// Largest payload carried by one data frame. A full frame is 1024 bytes.
pub const MAX_PAYLOAD: usize = 1004;
pub const MAX_FRAME_SIZE: usize = MAX_PAYLOAD + SEQUENCE_WIDTH + DIGEST_LEN;
pub const MIN_FRAME_SIZE: usize = SEQUENCE_WIDTH + DIGEST_LEN;

pub const ACK_REPLICAS: usize = 5;
pub const ACK_QUORUM: usize = 3;
pub const ACK_FRAME_SIZE: usize = ACK_REPLICAS * SEQUENCE_WIDTH;

pub fn encode_sequence(sequence: Sequence) -> [u8; SEQUENCE_WIDTH] {
    sequence.to_le_bytes()
}

pub fn decode_sequence(bytes: [u8; SEQUENCE_WIDTH]) -> Sequence {
    Sequence::from_le_bytes(bytes)
}

/// Number of frames needed to carry `len` payload bytes.
pub fn frame_count(len: usize) -> usize {
    len.div_ceil(MAX_PAYLOAD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        assert_eq!(MAX_FRAME_SIZE, 1024);
        assert_eq!(MIN_FRAME_SIZE, 20);
        assert_eq!(ACK_FRAME_SIZE, 20);
    }

    #[test]
    fn test_frame_count() {
        assert_eq!(frame_count(0), 0);
        assert_eq!(frame_count(1), 1);
        assert_eq!(frame_count(MAX_PAYLOAD), 1);
        assert_eq!(frame_count(2 * MAX_PAYLOAD + 1), 3);
    }

    #[test]
    fn test_sequence_is_little_endian() {
        assert_eq!(encode_sequence(1), [1, 0, 0, 0]);
        assert_eq!(decode_sequence([0x02, 0x01, 0, 0]), 0x0102);
    }
}
