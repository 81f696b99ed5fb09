//! LZ4 block compression for chunk record bodies.
//!
//! Uses the raw LZ4 block format: token byte with literal/match length
//! nibbles, two-byte little-endian match offsets, minimum match of four,
//! extended lengths as runs of 255 plus a remainder. The uncompressed
//! length is not stored in the block; record headers carry it.

use super::{CodecError, CodecResult};

pub fn compress_block(input: &[u8]) -> Vec<u8> {
    lz4_flex::block::compress(input)
}

pub fn decompress_block(input: &[u8], uncompressed_len: usize) -> CodecResult<Vec<u8>> {
    lz4_flex::block::decompress(input, uncompressed_len)
        .map_err(|_| CodecError::Corrupted("undecodable lz4 body"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn round_trips_arbitrary_bytes() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x7e55a);
        for len in [0usize, 1, 7, 64, 1024, 65536] {
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let compressed = compress_block(&data);
            let restored = decompress_block(&compressed, data.len()).unwrap();
            assert_eq!(restored, data);
        }
    }

    #[test]
    fn round_trips_repetitive_bytes() {
        let data = vec![42u8; 32 * 32 * 32 * 2];
        let compressed = compress_block(&data);
        assert!(compressed.len() < data.len() / 10);
        assert_eq!(decompress_block(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decompress_block(&[0xff, 0xff, 0x00], 1024).is_err());
    }
}
