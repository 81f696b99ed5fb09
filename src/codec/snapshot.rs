//! Full chunk snapshot records (`.tvx` files).

use bitflags::bitflags;

use super::wire::{put_i32, put_u16, put_u32, Reader};
use super::{lz4, CodecError, CodecResult};
use crate::world::{ChunkCoord, ChunkMeta, MetaFlags, SaveMode, VoxelBuffer};

/// "TVXC" little-endian.
pub const SNAPSHOT_MAGIC: u32 = 0x5456_5843;
pub const SNAPSHOT_VERSION: u16 = 4;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SnapshotFlags: u16 {
        const COMPRESSED = 1;
        const HAS_DENSITY = 2;
        const COMPRESSION_LZ4 = 4;
        const MATERIALS_16 = 8;
    }
}

/// Serializes a chunk buffer plus its metadata into a snapshot record.
pub fn encode_snapshot(
    coord: ChunkCoord,
    buffer: &VoxelBuffer,
    meta: &ChunkMeta,
    compress: bool,
) -> Vec<u8> {
    let materials = buffer.materials();
    let density = buffer.density();

    let materials_len = materials.len() * 2;
    let density_len = density.map_or(0, |d| d.len() * 4);

    let mut raw = Vec::with_capacity(materials_len + density_len);
    for &m in materials {
        raw.extend_from_slice(&m.to_le_bytes());
    }
    if let Some(density) = density {
        for &d in density {
            raw.extend_from_slice(&d.to_le_bytes());
        }
    }
    let crc = crc32fast::hash(&raw);

    let mut flags = SnapshotFlags::MATERIALS_16;
    if density.is_some() {
        flags |= SnapshotFlags::HAS_DENSITY;
    }
    let body = if compress {
        flags |= SnapshotFlags::COMPRESSED | SnapshotFlags::COMPRESSION_LZ4;
        lz4::compress_block(&raw)
    } else {
        raw
    };

    let mut out = Vec::with_capacity(54 + body.len());
    put_u32(&mut out, SNAPSHOT_MAGIC);
    put_u16(&mut out, SNAPSHOT_VERSION);
    put_u16(&mut out, flags.bits());
    put_i32(&mut out, buffer.size() as i32);
    put_i32(&mut out, coord.x());
    put_i32(&mut out, coord.y());
    put_i32(&mut out, coord.z());
    out.push(meta.save_mode as u8);
    out.push(meta.flags.bits());
    put_i32(&mut out, meta.generator_version);
    put_i32(&mut out, meta.last_sim_tick);
    put_i32(&mut out, meta.delta_count);
    put_i32(&mut out, materials_len as i32);
    put_i32(&mut out, density_len as i32);
    put_i32(&mut out, body.len() as i32);
    put_u32(&mut out, crc);
    out.extend_from_slice(&body);
    out
}

/// Parses a snapshot record. Versions 1 through 3 are accepted with their
/// shorter headers: v1 has no metadata block, v1 and v2 have no density
/// length, and only v4 carries the CRC and the 16-bit material guarantee.
pub fn decode_snapshot(
    bytes: &[u8],
    current_chunk_size: usize,
) -> CodecResult<(ChunkCoord, VoxelBuffer, ChunkMeta)> {
    let mut r = Reader::new(bytes);

    if r.u32()? != SNAPSHOT_MAGIC {
        return Err(CodecError::Corrupted("bad snapshot magic"));
    }
    let version = r.u16()?;
    if version == 0 || version > SNAPSHOT_VERSION {
        return Err(CodecError::Corrupted("unsupported snapshot version"));
    }
    let flags = SnapshotFlags::from_bits_truncate(r.u16()?);

    let chunk_size = r.i32()?;
    let coord = ChunkCoord::new(r.i32()?, r.i32()?, r.i32()?);
    if chunk_size <= 0 || chunk_size as usize != current_chunk_size {
        return Err(CodecError::SizeMismatch {
            stored: chunk_size,
            current: current_chunk_size as i32,
        });
    }
    let n = chunk_size as usize;
    let volume = n * n * n;

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

    let materials_len = r.i32()?;
    let density_len = if version >= 3 { r.i32()? } else { 0 };
    let body_len = r.i32()?;
    let crc = if version >= 4 { Some(r.u32()?) } else { None };

    if materials_len as usize != volume * 2 {
        return Err(CodecError::Corrupted("materials length mismatch"));
    }
    if version >= 4 && !flags.contains(SnapshotFlags::MATERIALS_16) {
        return Err(CodecError::Corrupted("unsupported material width"));
    }
    if flags.contains(SnapshotFlags::HAS_DENSITY) != (density_len > 0) {
        return Err(CodecError::Corrupted("density flag disagrees with length"));
    }
    if density_len != 0 && density_len as usize != volume * 4 {
        return Err(CodecError::Corrupted("density length mismatch"));
    }
    if body_len < 0 {
        return Err(CodecError::Corrupted("negative body length"));
    }

    let body = r.bytes(body_len as usize)?;
    let raw_len = materials_len as usize + density_len as usize;
    let raw = if flags.contains(SnapshotFlags::COMPRESSED) {
        lz4::decompress_block(body, raw_len)?
    } else {
        body.to_vec()
    };
    if raw.len() != raw_len {
        return Err(CodecError::Corrupted("body length mismatch"));
    }
    if let Some(expected) = crc {
        if crc32fast::hash(&raw) != expected {
            return Err(CodecError::Corrupted("snapshot crc mismatch"));
        }
    }

    let mut materials = Vec::with_capacity(volume);
    for pair in raw[..materials_len as usize].chunks_exact(2) {
        materials.push(u16::from_le_bytes([pair[0], pair[1]]));
    }
    let density = if density_len > 0 {
        let mut density = Vec::with_capacity(volume);
        for quad in raw[materials_len as usize..].chunks_exact(4) {
            density.push(f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]));
        }
        Some(density)
    } else {
        None
    };

    Ok((coord, VoxelBuffer::from_parts(n, materials, density), meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn sample_buffer(n: usize, with_density: bool, seed: u64) -> VoxelBuffer {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let volume = n * n * n;
        let materials: Vec<u16> = (0..volume).map(|_| rng.gen_range(0..8)).collect();
        let density = with_density.then(|| (0..volume).map(|_| rng.gen::<f32>()).collect());
        VoxelBuffer::from_parts(n, materials, density)
    }

    fn sample_meta() -> ChunkMeta {
        ChunkMeta {
            save_mode: SaveMode::SnapshotBacked,
            generator_version: 3,
            last_sim_tick: 77,
            delta_count: 5,
            flags: MetaFlags::HAS_SIMULATED_DATA,
        }
    }

    #[test]
    fn round_trips_compressed_and_raw() {
        for compress in [true, false] {
            for with_density in [true, false] {
                let coord = ChunkCoord::new(-3, 1, 12);
                let buffer = sample_buffer(8, with_density, 99);
                let meta = sample_meta();

                let bytes = encode_snapshot(coord, &buffer, &meta, compress);
                let (coord2, buffer2, meta2) = decode_snapshot(&bytes, 8).unwrap();
                assert_eq!(coord2, coord);
                assert_eq!(buffer2, buffer);
                assert_eq!(meta2, meta);
            }
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = encode_snapshot(ChunkCoord::ZERO, &sample_buffer(4, false, 1), &sample_meta(), true);
        let mut broken = bytes.clone();
        broken[0] ^= 0xff;
        assert!(matches!(
            decode_snapshot(&broken, 4),
            Err(CodecError::Corrupted(_))
        ));
    }

    #[test]
    fn rejects_crc_mismatch() {
        let bytes = encode_snapshot(ChunkCoord::ZERO, &sample_buffer(4, false, 2), &sample_meta(), false);
        let mut broken = bytes.clone();
        let last = broken.len() - 1;
        broken[last] ^= 0x01;
        assert!(matches!(
            decode_snapshot(&broken, 4),
            Err(CodecError::Corrupted(_))
        ));
    }

    #[test]
    fn rejects_truncation() {
        let bytes = encode_snapshot(ChunkCoord::ZERO, &sample_buffer(4, false, 3), &sample_meta(), true);
        assert!(matches!(
            decode_snapshot(&bytes[..bytes.len() / 2], 4),
            Err(CodecError::Corrupted(_))
        ));
    }

    #[test]
    fn reports_size_mismatch() {
        let bytes = encode_snapshot(ChunkCoord::ZERO, &sample_buffer(4, false, 4), &sample_meta(), true);
        assert!(matches!(
            decode_snapshot(&bytes, 8),
            Err(CodecError::SizeMismatch { stored: 4, current: 8 })
        ));
    }

    #[test]
    fn accepts_version_3_without_crc() {
        // A v3 record is the v4 layout minus the CRC word.
        let coord = ChunkCoord::new(2, 0, -1);
        let buffer = sample_buffer(4, false, 5);
        let meta = sample_meta();
        let v4 = encode_snapshot(coord, &buffer, &meta, false);

        let mut v3 = Vec::new();
        v3.extend_from_slice(&v4[..4]);
        v3.extend_from_slice(&3u16.to_le_bytes());
        v3.extend_from_slice(&v4[6..50]); // flags through body length
        v3.extend_from_slice(&v4[54..]); // body, skipping the CRC word

        let (coord2, buffer2, meta2) = decode_snapshot(&v3, 4).unwrap();
        assert_eq!(coord2, coord);
        assert_eq!(buffer2, buffer);
        assert_eq!(meta2, meta);
    }

    #[test]
    fn crc_matches_reference_polynomial() {
        // ISO-HDLC polynomial check value for "123456789".
        assert_eq!(crc32fast::hash(b"123456789"), 0xCBF4_3926);
    }
}
