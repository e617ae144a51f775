use crate::types::{Digest, DIGEST_LEN};

/// Computes the BLAKE3 hash of `bytes` truncated to a 16-byte frame digest
pub fn digest(bytes: &[u8]) -> Digest {
    let full = blake3::hash(bytes);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&full.as_bytes()[..DIGEST_LEN]);
    out
}

/// Hashes several byte slices as if they were concatenated
pub fn digest_parts(parts: &[&[u8]]) -> Digest {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&hasher.finalize().as_bytes()[..DIGEST_LEN]);
    out
}

pub fn verify(bytes: &[u8], expected: &[u8]) -> bool {
    expected.len() == DIGEST_LEN && digest(bytes)[..] == *expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_truncated_vector() {
        // first 16 bytes of blake3("")
        let expected: [u8; 16] = [
            0xaf, 0x13, 0x49, 0xb9, 0xf5, 0xf9, 0xa1, 0xa6, 0xa0, 0x40, 0x4d, 0xea, 0x36, 0xdc,
            0xc9, 0x49,
        ];
        assert_eq!(digest(b""), expected);
    }

    #[test]
    fn test_parts_match_concatenation() {
        assert_eq!(digest_parts(&[b"hello ", b"world"]), digest(b"hello world"));
        assert_eq!(digest_parts(&[]), digest(b""));
    }

    #[test]
    fn test_verify() {
        let d = digest(b"payload");
        assert!(verify(b"payload", &d));
        assert!(!verify(b"payloaD", &d));
        assert!(!verify(b"payload", &d[..15]));
    }
}
