//! The chain's default hash: 32-byte BLAKE2b personalized with
//! `ckb-default-hash`.

use blake2b_simd::Params;

use crate::types::Hash256;

const PERSONALIZATION: &[u8; 16] = b"ckb-default-hash";

/// Hash of empty input.
pub const BLANK_HASH: Hash256 = Hash256([
    0x44, 0xf4, 0xc6, 0x97, 0x44, 0xd5, 0xf8, 0xc5, 0x5d, 0x64, 0x20, 0x62, 0x94, 0x9d, 0xca, 0xe4,
    0x9b, 0xc4, 0xe7, 0xef, 0x43, 0xd3, 0x88, 0xc5, 0xa1, 0x2f, 0x42, 0xb5, 0x63, 0x3d, 0x16, 0x3e,
]);

pub fn ckb_hash(data: &[u8]) -> Hash256 {
    let digest = Params::new()
        .hash_length(32)
        .personal(PERSONALIZATION)
        .hash(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_bytes());
    Hash256(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_matches_blank_hash() {
        assert_eq!(ckb_hash(&[]), BLANK_HASH);
        assert_eq!(
            BLANK_HASH.to_string(),
            "0x44f4c69744d5f8c55d642062949dcae49bc4e7ef43d388c5a12f42b5633d163e"
        );
    }

    #[test]
    fn personalization_changes_digest() {
        let plain = blake2b_simd::Params::new().hash_length(32).hash(&[]);
        assert_ne!(plain.as_bytes(), BLANK_HASH.as_bytes());
    }
}
