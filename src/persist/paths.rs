//! On-disk layout of a world.
//!
//! ```text
//! <root>/<world_id>/chunks/r.<rx>.<rz>/c.<cx>.<cy>.<cz>.tvx
//! <root>/<world_id>/mods/  r.<rx>.<rz>/m.<cx>.<cy>.<cz>.tvxm
//! ```

use std::path::{Path, PathBuf};

use crate::world::ChunkCoord;

pub const SNAPSHOT_EXT: &str = "tvx";
pub const DELTA_EXT: &str = "tvxm";

/// Produces a directory-safe world id from a user override, or
/// `seed_<n>` when no override is given. Anything outside
/// `[A-Za-z0-9_.-]` becomes an underscore, and an override that
/// sanitizes to nothing falls back to the seed form.
pub fn sanitize_world_id(override_id: Option<&str>, seed: u32) -> String {
    if let Some(raw) = override_id {
        let cleaned: String = raw
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let cleaned = cleaned.trim_matches('.').to_string();
        if !cleaned.is_empty() && cleaned.chars().any(|c| c != '_') {
            return cleaned;
        }
    }
    format!("seed_{seed}")
}

/// Resolves chunk coordinates to snapshot and delta file paths.
#[derive(Debug, Clone)]
pub struct WorldPaths {
    world_root: PathBuf,
    region_size: i32,
}

impl WorldPaths {
    pub fn new(root: &Path, world_id: &str, region_size: i32) -> Self {
        Self {
            world_root: root.join(world_id),
            region_size: region_size.max(1),
        }
    }

    pub fn world_root(&self) -> &Path {
        &self.world_root
    }

    fn region_dir(&self, kind: &str, coord: ChunkCoord) -> PathBuf {
        let (rx, rz) = coord.region(self.region_size);
        self.world_root.join(kind).join(format!("r.{rx}.{rz}"))
    }

    pub fn snapshot_path(&self, coord: ChunkCoord) -> PathBuf {
        self.region_dir("chunks", coord).join(format!(
            "c.{}.{}.{}.{}",
            coord.x(),
            coord.y(),
            coord.z(),
            SNAPSHOT_EXT
        ))
    }

    pub fn delta_path(&self, coord: ChunkCoord) -> PathBuf {
        self.region_dir("mods", coord).join(format!(
            "m.{}.{}.{}.{}",
            coord.x(),
            coord.y(),
            coord.z(),
            DELTA_EXT
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_path_separators() {
        assert_eq!(sanitize_world_id(Some("my/world\\..name"), 7), "my_world_..name");
        assert_eq!(sanitize_world_id(Some("Alpha-2_ok"), 7), "Alpha-2_ok");
    }

    #[test]
    fn sanitize_falls_back_to_seed() {
        assert_eq!(sanitize_world_id(None, 42), "seed_42");
        assert_eq!(sanitize_world_id(Some("///"), 42), "seed_42");
        assert_eq!(sanitize_world_id(Some("   "), 42), "seed_42");
    }

    #[test]
    fn paths_bucket_by_region() {
        let paths = WorldPaths::new(Path::new("saves"), "seed_1", 32);
        let p = paths.snapshot_path(ChunkCoord::new(-1, 2, 33));
        assert_eq!(
            p,
            PathBuf::from("saves/seed_1/chunks/r.-1.1/c.-1.2.33.tvx")
        );
        let d = paths.delta_path(ChunkCoord::new(0, 0, 0));
        assert_eq!(d, PathBuf::from("saves/seed_1/mods/r.0.0/m.0.0.0.tvxm"));
    }
}
