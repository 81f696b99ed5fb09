//! Sparse voxel edit records (`.tvxm` files).
//!
//! The body is an ordered sequence of (linear index, material) pairs.
//! Duplicate indices are legal on the wire; readers fold them into a
//! mapping where the latest entry wins.

use std::collections::HashMap;

use bitflags::bitflags;

use super::wire::{put_i32, put_u16, put_u32, Reader};
use super::{lz4, CodecError, CodecResult};
use crate::world::{ChunkCoord, ChunkMeta, DeltaEntry, MaterialId, MetaFlags, SaveMode};

/// "TVXM" little-endian.
pub const DELTA_MAGIC: u32 = 0x5456_584D;
pub const DELTA_VERSION: u16 = 3;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeltaFlags: u16 {
        const COMPRESSED = 1;
        const COMPRESSION_LZ4 = 2;
        const MATERIALS_16 = 4;
    }
}

const ENTRY_BYTES: usize = 6;

pub fn encode_delta(
    coord: ChunkCoord,
    chunk_size: usize,
    entries: &[DeltaEntry],
    meta: &ChunkMeta,
    compress: bool,
) -> Vec<u8> {
    let mut raw = Vec::with_capacity(entries.len() * ENTRY_BYTES);
    for &(index, material) in entries {
        raw.extend_from_slice(&index.to_le_bytes());
        raw.extend_from_slice(&material.to_le_bytes());
    }
    let crc = crc32fast::hash(&raw);

    let mut flags = DeltaFlags::MATERIALS_16;
    let raw_len = raw.len();
    let body = if compress {
        flags |= DeltaFlags::COMPRESSED | DeltaFlags::COMPRESSION_LZ4;
        lz4::compress_block(&raw)
    } else {
        raw
    };

    let mut out = Vec::with_capacity(54 + body.len());
    put_u32(&mut out, DELTA_MAGIC);
    put_u16(&mut out, DELTA_VERSION);
    put_u16(&mut out, flags.bits());
    put_i32(&mut out, chunk_size as i32);
    put_i32(&mut out, coord.x());
    put_i32(&mut out, coord.y());
    put_i32(&mut out, coord.z());
    out.push(meta.save_mode as u8);
    out.push(meta.flags.bits());
    put_i32(&mut out, meta.generator_version);
    put_i32(&mut out, meta.last_sim_tick);
    put_i32(&mut out, meta.delta_count);
    put_i32(&mut out, entries.len() as i32);
    put_i32(&mut out, raw_len as i32);
    put_i32(&mut out, body.len() as i32);
    put_u32(&mut out, crc);
    out.extend_from_slice(&body);
    out
}

/// Parses a delta record into the effective index → material mapping.
/// Versions 1 and 2 read with shorter headers: v1 has no metadata block
/// and only v3 carries the CRC.
pub fn decode_delta(
    bytes: &[u8],
    current_chunk_size: usize,
) -> CodecResult<(ChunkCoord, HashMap<i32, MaterialId>, ChunkMeta)> {
    let mut r = Reader::new(bytes);

    if r.u32()? != DELTA_MAGIC {
        return Err(CodecError::Corrupted("bad delta magic"));
    }
    let version = r.u16()?;
    if version == 0 || version > DELTA_VERSION {
        return Err(CodecError::Corrupted("unsupported delta version"));
    }
    let flags = DeltaFlags::from_bits_truncate(r.u16()?);

    let chunk_size = r.i32()?;
    let coord = ChunkCoord::new(r.i32()?, r.i32()?, r.i32()?);
    if chunk_size <= 0 || chunk_size as usize != current_chunk_size {
        return Err(CodecError::SizeMismatch {
            stored: chunk_size,
            current: current_chunk_size as i32,
        });
    }

    let meta = if version >= 2 {
        let save_mode =
            SaveMode::from_u8(r.u8()?).ok_or(CodecError::Corrupted("bad save mode"))?;
        let meta_flags = MetaFlags::from_bits_truncate(r.u8()?);
        ChunkMeta {
            save_mode,
            generator_version: r.i32()?,
            last_sim_tick: r.i32()?,
            delta_count: r.i32()?,
            flags: meta_flags,
        }
    } else {
        ChunkMeta::generated(0)
    };

    let entry_count = r.i32()?;
    let raw_len = r.i32()?;
    let body_len = r.i32()?;
    let crc = if version >= 3 { Some(r.u32()?) } else { None };

    if entry_count < 0 || raw_len < 0 || body_len < 0 {
        return Err(CodecError::Corrupted("negative delta length"));
    }
    if raw_len as usize != entry_count as usize * ENTRY_BYTES {
        return Err(CodecError::Corrupted("entry count disagrees with length"));
    }
    if version >= 3 && !flags.contains(DeltaFlags::MATERIALS_16) {
        return Err(CodecError::Corrupted("unsupported material width"));
    }

    let body = r.bytes(body_len as usize)?;
    let raw = if flags.contains(DeltaFlags::COMPRESSED) {
        lz4::decompress_block(body, raw_len as usize)?
    } else {
        body.to_vec()
    };
    if raw.len() != raw_len as usize {
        return Err(CodecError::Corrupted("delta body length mismatch"));
    }
    if let Some(expected) = crc {
        if crc32fast::hash(&raw) != expected {
            return Err(CodecError::Corrupted("delta crc mismatch"));
        }
    }

    let mut entries = HashMap::with_capacity(entry_count as usize);
    for chunk in raw.chunks_exact(ENTRY_BYTES) {
        let index = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let material = u16::from_le_bytes([chunk[4], chunk[5]]);
        entries.insert(index, material);
    }

    Ok((coord, entries, meta))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta(delta_count: i32) -> ChunkMeta {
        ChunkMeta {
            save_mode: SaveMode::DeltaBacked,
            generator_version: 1,
            last_sim_tick: 9,
            delta_count,
            flags: MetaFlags::empty(),
        }
    }

    #[test]
    fn round_trips_as_mapping() {
        for compress in [true, false] {
            let entries = vec![(5, 7), (5, 9), (2, 3)];
            let meta = sample_meta(3);
            let bytes = encode_delta(ChunkCoord::new(0, 1, 2), 32, &entries, &meta, compress);

            let (coord, mapping, meta2) = decode_delta(&bytes, 32).unwrap();
            assert_eq!(coord, ChunkCoord::new(0, 1, 2));
            assert_eq!(meta2, meta);
            // Wire keeps all three entries; the mapping keeps last-write-wins.
            assert_eq!(meta2.delta_count, 3);
            assert_eq!(mapping.len(), 2);
            assert_eq!(mapping[&5], 9);
            assert_eq!(mapping[&2], 3);
        }
    }

    #[test]
    fn empty_delta_round_trips() {
        let bytes = encode_delta(ChunkCoord::ZERO, 16, &[], &sample_meta(0), true);
        let (_, mapping, _) = decode_delta(&bytes, 16).unwrap();
        assert!(mapping.is_empty());
    }

    #[test]
    fn rejects_size_mismatch() {
        let bytes = encode_delta(ChunkCoord::ZERO, 16, &[(1, 2)], &sample_meta(1), false);
        assert!(matches!(
            decode_delta(&bytes, 32),
            Err(CodecError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_corrupt_body() {
        let bytes = encode_delta(ChunkCoord::ZERO, 16, &[(1, 2), (3, 4)], &sample_meta(2), false);
        let mut broken = bytes.clone();
        let last = broken.len() - 1;
        broken[last] ^= 0x40;
        assert!(matches!(
            decode_delta(&broken, 16),
            Err(CodecError::Corrupted(_))
        ));
    }

    #[test]
    fn accepts_version_2_without_crc() {
        let entries = vec![(11, 8)];
        let meta = sample_meta(1);
        let v3 = encode_delta(ChunkCoord::new(4, 0, 4), 16, &entries, &meta, false);

        // v2 layout: v3 minus the CRC word at offset 50.
        let mut v2 = Vec::new();
        v2.extend_from_slice(&v3[..4]);
        v2.extend_from_slice(&2u16.to_le_bytes());
        v2.extend_from_slice(&v3[6..50]);
        v2.extend_from_slice(&v3[54..]);

        let (coord, mapping, meta2) = decode_delta(&v2, 16).unwrap();
        assert_eq!(coord, ChunkCoord::new(4, 0, 4));
        assert_eq!(mapping[&11], 8);
        assert_eq!(meta2, meta);
    }
}
