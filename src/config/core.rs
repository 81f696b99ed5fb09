use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use super::{CacheConfig, LodConfig, PersistenceConfig, StreamingConfig, WorldGenConfig};
use crate::stream::lod::validate_levels;

/// Top-level engine configuration, TOML round-trippable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Chunk edge size in voxels; must be a power of two.
    pub chunk_size: usize,
    pub voxel_size: f32,
    /// Largest texture-array layer a material id may select.
    pub max_material_index: u16,
    /// Layer used for material ids past `max_material_index`.
    pub fallback_material_index: u16,
    /// Worker threads for generation and meshing jobs; 0 picks a value
    /// from the machine's parallelism.
    pub worker_threads: usize,

    pub streaming: StreamingConfig,
    pub worldgen: WorldGenConfig,
    pub lod: LodConfig,
    pub persistence: PersistenceConfig,
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl EngineConfig {
    pub fn standard() -> Self {
        Self {
            chunk_size: 32,
            voxel_size: 1.0,
            max_material_index: 255,
            fallback_material_index: 0,
            worker_threads: 0,
            streaming: StreamingConfig::default(),
            worldgen: WorldGenConfig::default(),
            lod: LodConfig::default(),
            persistence: PersistenceConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: EngineConfig =
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).context("serializing config")?;
        std::fs::write(path, text).with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }

    /// Rejects configurations the scheduler cannot run with; tuning
    /// mistakes that merely degrade behavior only warn.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < 2 || !self.chunk_size.is_power_of_two() {
            bail!("chunk_size must be a power of two of at least 2");
        }
        if self.voxel_size <= 0.0 {
            bail!("voxel_size must be positive");
        }
        if self.streaming.load_radius < 0 || self.streaming.column_chunks <= 0 {
            bail!("streaming radii must be non-negative and column_chunks positive");
        }
        if self.streaming.unload_radius < self.streaming.load_radius {
            bail!("unload_radius must not be smaller than load_radius");
        }
        if self.streaming.preload_enabled
            && self.streaming.preload_radius < self.streaming.load_radius
        {
            bail!("preload_radius must not be smaller than load_radius");
        }
        if !(0.0..=1.0).contains(&self.persistence.delta_promote_threshold) {
            bail!("delta_promote_threshold must be within [0, 1]");
        }
        if self.worldgen.layers.iter().any(|l| l.weight < 0.0) {
            bail!("height layer weights must be non-negative");
        }

        for warning in validate_levels(&self.lod.levels) {
            log::warn!("lod table: {warning}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_validates() {
        EngineConfig::standard().validate().unwrap();
    }

    #[test]
    fn toml_round_trip_preserves_everything() {
        let config = EngineConfig::standard();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn rejects_non_power_of_two_chunk_size() {
        let mut config = EngineConfig::standard();
        config.chunk_size = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_radii() {
        let mut config = EngineConfig::standard();
        config.streaming.load_radius = 9;
        config.streaming.unload_radius = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_save_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let config = EngineConfig::standard();
        config.save_to(&path).unwrap();
        assert_eq!(EngineConfig::load_from(&path).unwrap(), config);
    }
}
