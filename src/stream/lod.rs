//! Distance-to-LOD resolution with per-level hysteresis.

use serde::{Deserialize, Serialize};

/// How a chunk at this level is represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LodMode {
    /// Full-resolution greedy mesh.
    Mesh,
    /// Greedy mesh over downsampled voxels (`lod_step` > 1).
    SteppedMesh,
    /// Mesh synthesized from the sparse voxel octree.
    Svo,
    /// Single-quad impostor.
    Billboard,
    /// Not rendered at all.
    None,
}

impl LodMode {
    /// Coarseness weight: Mesh < Billboard < Svo < None.
    fn weight(&self) -> u32 {
        match self {
            LodMode::Mesh | LodMode::SteppedMesh => 0,
            LodMode::Billboard => 1,
            LodMode::Svo => 2,
            LodMode::None => 3,
        }
    }
}

/// One entry of the LOD table. Distances are in world units from the
/// viewer to the chunk center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LodLevel {
    pub min_dist: f32,
    pub max_dist: f32,
    pub lod_step: u32,
    /// Per-level hysteresis override; the resolver default applies when
    /// absent.
    pub hysteresis: Option<f32>,
    pub mode: LodMode,
}

impl LodLevel {
    pub const DEFAULT: LodLevel = LodLevel {
        min_dist: 0.0,
        max_dist: f32::INFINITY,
        lod_step: 1,
        hysteresis: None,
        mode: LodMode::Mesh,
    };

    /// Rank used to order levels by coarseness; larger is coarser.
    pub fn detail_rank(&self) -> u32 {
        self.lod_step.max(1) * (self.mode.weight() + 1)
    }

    fn contains(&self, dist: f32) -> bool {
        dist >= self.min_dist && dist <= self.max_dist
    }
}

pub const MAX_HYSTERESIS: f32 = 64.0;

/// Maps view distance to a LOD level. Transitions are sticky: moving to a
/// coarser level waits out the full hysteresis band, moving back to finer
/// detail only half of it so detail reappears faster.
pub struct LodResolver {
    levels: Vec<LodLevel>,
    default_hysteresis: f32,
}

impl LodResolver {
    pub fn new(mut levels: Vec<LodLevel>, default_hysteresis: f32) -> Self {
        for warning in validate_levels(&levels) {
            log::warn!("lod table: {warning}");
        }
        levels.sort_by(|a, b| a.min_dist.total_cmp(&b.min_dist));
        Self {
            levels,
            default_hysteresis,
        }
    }

    pub fn levels(&self) -> &[LodLevel] {
        &self.levels
    }

    /// The level whose range contains `dist`, else the level with the
    /// largest `max_dist` below it (ties to the coarser rank), else the
    /// built-in default.
    pub fn target_for(&self, dist: f32) -> LodLevel {
        if let Some(level) = self.levels.iter().find(|l| l.contains(dist)) {
            return *level;
        }

        let mut best: Option<&LodLevel> = None;
        for level in &self.levels {
            if level.max_dist >= dist {
                continue;
            }
            best = match best {
                None => Some(level),
                Some(current) => {
                    if level.max_dist > current.max_dist
                        || (level.max_dist == current.max_dist
                            && level.detail_rank() > current.detail_rank())
                    {
                        Some(level)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        best.copied().unwrap_or(LodLevel::DEFAULT)
    }

    /// Resolves the level for `dist`, holding on to `current` within its
    /// hysteresis band.
    pub fn resolve(&self, dist: f32, current: Option<&LodLevel>) -> LodLevel {
        let target = self.target_for(dist);
        let current = match current {
            Some(c) => c,
            None => return target,
        };
        if *current == target {
            return target;
        }

        let h = current
            .hysteresis
            .unwrap_or(self.default_hysteresis)
            .clamp(0.0, MAX_HYSTERESIS);

        if target.detail_rank() > current.detail_rank() {
            // Toward coarser detail: hold the finer level a while longer.
            if dist <= current.max_dist + h {
                return *current;
            }
        } else if target.detail_rank() < current.detail_rank() {
            // Toward finer detail: half the band, detail comes back faster.
            if dist >= current.min_dist - h * 0.5 {
                return *current;
            }
        }
        target
    }
}

/// Checks a LOD table for the mistakes the world editor flags: overlapping
/// ranges, gaps, duplicate ranges, and oversized hysteresis. The resolver
/// tolerates all of these; the warnings exist so the table gets fixed.
pub fn validate_levels(levels: &[LodLevel]) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut sorted: Vec<&LodLevel> = levels.iter().collect();
    sorted.sort_by(|a, b| a.min_dist.total_cmp(&b.min_dist));

    for level in &sorted {
        if level.min_dist > level.max_dist {
            warnings.push(format!(
                "inverted range [{}, {}]",
                level.min_dist, level.max_dist
            ));
        }
        if let Some(h) = level.hysteresis {
            if h > MAX_HYSTERESIS {
                warnings.push(format!("hysteresis {h} exceeds the {MAX_HYSTERESIS} cap"));
            }
            if h < 0.0 {
                warnings.push(format!("negative hysteresis {h}"));
            }
        }
        if level.lod_step == 0 {
            warnings.push("lod_step of 0 treated as 1".to_string());
        }
    }

    for pair in sorted.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a.min_dist == b.min_dist && a.max_dist == b.max_dist {
            warnings.push(format!("duplicate range [{}, {}]", a.min_dist, a.max_dist));
        } else if b.min_dist <= a.max_dist {
            warnings.push(format!(
                "ranges [{}, {}] and [{}, {}] overlap",
                a.min_dist, a.max_dist, b.min_dist, b.max_dist
            ));
        } else if b.min_dist > a.max_dist + 1.0 {
            warnings.push(format!(
                "gap between {} and {}",
                a.max_dist, b.min_dist
            ));
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<LodLevel> {
        vec![
            LodLevel {
                min_dist: 0.0,
                max_dist: 4.0,
                lod_step: 1,
                hysteresis: Some(2.0),
                mode: LodMode::Mesh,
            },
            LodLevel {
                min_dist: 5.0,
                max_dist: 12.0,
                lod_step: 2,
                hysteresis: Some(2.0),
                mode: LodMode::SteppedMesh,
            },
            LodLevel {
                min_dist: 13.0,
                max_dist: f32::INFINITY,
                lod_step: 1,
                hysteresis: Some(2.0),
                mode: LodMode::Svo,
            },
        ]
    }

    #[test]
    fn hysteresis_holds_fine_level_moving_out() {
        let resolver = LodResolver::new(table(), 1.0);
        let fine = resolver.resolve(3.0, None);
        assert_eq!(fine.lod_step, 1);

        // Still inside max_dist + hysteresis.
        let held = resolver.resolve(6.0, Some(&fine));
        assert_eq!(held.lod_step, 1);

        // One past the band: switch.
        let coarse = resolver.resolve(7.0, Some(&fine));
        assert_eq!(coarse.lod_step, 2);
    }

    #[test]
    fn half_hysteresis_coming_back_in() {
        let resolver = LodResolver::new(table(), 1.0);
        let coarse = resolver.resolve(8.0, None);
        assert_eq!(coarse.lod_step, 2);

        // dist 5 ≥ min_dist − h/2 = 4: hold the coarse level.
        let held = resolver.resolve(5.0, Some(&coarse));
        assert_eq!(held.lod_step, 2);

        // dist 3 < 4: detail comes back.
        let fine = resolver.resolve(3.0, Some(&coarse));
        assert_eq!(fine.lod_step, 1);
        assert_eq!(fine.mode, LodMode::Mesh);
    }

    #[test]
    fn svo_band_ranks_coarser_than_stepped_mesh() {
        let resolver = LodResolver::new(table(), 1.0);
        let svo = resolver.target_for(20.0);
        assert_eq!(svo.mode, LodMode::Svo);
        let stepped = resolver.target_for(8.0);
        assert!(svo.detail_rank() > stepped.detail_rank());
    }

    #[test]
    fn empty_table_falls_back_to_default() {
        let resolver = LodResolver::new(Vec::new(), 1.0);
        assert_eq!(resolver.resolve(100.0, None), LodLevel::DEFAULT);
    }

    #[test]
    fn validation_flags_overlap_gap_and_duplicates() {
        let levels = vec![
            LodLevel {
                min_dist: 0.0,
                max_dist: 10.0,
                lod_step: 1,
                hysteresis: Some(100.0),
                mode: LodMode::Mesh,
            },
            LodLevel {
                min_dist: 8.0,
                max_dist: 20.0,
                lod_step: 2,
                hysteresis: None,
                mode: LodMode::Mesh,
            },
            LodLevel {
                min_dist: 30.0,
                max_dist: 40.0,
                lod_step: 4,
                hysteresis: None,
                mode: LodMode::Svo,
            },
        ];
        let warnings = validate_levels(&levels);
        assert!(warnings.iter().any(|w| w.contains("overlap")));
        assert!(warnings.iter().any(|w| w.contains("gap")));
        assert!(warnings.iter().any(|w| w.contains("cap")));
    }
}
