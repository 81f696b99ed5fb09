//! The per-frame streaming state machine.
//!
//! One `StreamingScheduler` owns the active chunk set, every queue, the
//! caches and the persistence pipeline. `tick` runs once per frame on the
//! control thread and never blocks on worker results; generator and mesher
//! jobs complete into bins that the next tick drains. Sub-phases run in a
//! fixed order and each one respects its own cap plus the global frame
//! budget; work that does not fit stays queued.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use glam::Vec3;

use crate::cache::{compute_key, DataCache, MeshCache};
use crate::config::EngineConfig;
use crate::host::{
    Clock, ColliderBackend, Filesystem, MemoryProbe, MeshAllocator, RendererBackend,
};
use crate::mesh::{
    billboard_quad, boundary_slab, downsample, MeshData, MesherParams, NeighborSlabs, SvoCache,
};
use crate::persist::{
    sanitize_world_id, DeltaStore, ModTracker, PersistenceManager, SnapshotStore, WorldPaths,
};
use crate::stream::jobs::{GenContext, JobPool, MeshJobInput, MeshJobResult};
use crate::stream::lod::{LodLevel, LodMode, LodResolver};
use crate::stream::priority::{in_view_cone, PriorityParams, ViewConeQueue};
use crate::stream::queues::CoordQueue;
use crate::world::{
    Chunk, ChunkCoord, ChunkGenerator, ChunkMeta, HeightSampler, LayeredHeightSampler, SaveMode,
    VoxelBuffer,
};

// ========================
// Host backends
// ========================

/// Everything the host supplies to the scheduler.
pub struct HostBackends {
    pub meshes: Box<dyn MeshAllocator>,
    pub colliders: Box<dyn ColliderBackend>,
    pub renderer: Box<dyn RendererBackend>,
    pub clock: Box<dyn Clock>,
    pub fs: Arc<dyn Filesystem>,
    pub memory: Box<dyn MemoryProbe>,
}

// ========================
// Frame accounting
// ========================

/// What one tick did; the HUD and the tests both read this.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub frame: u64,
    pub epoch: u64,
    pub epoch_dropped: bool,
    /// Chunk loads started out of the pending queue this frame.
    pub spawn_starts: usize,
    /// Chunk loads started out of the preload ring this frame.
    pub preload_starts: usize,
    /// Chunks that entered the active set this frame.
    pub spawned: usize,
    pub mesh_jobs_started: usize,
    pub mesh_cache_hits: usize,
    pub integrations: usize,
    pub removals: usize,
    pub removal_ms: f64,
    pub remesh_scheduled: usize,
    pub budget_exhausted: bool,
}

/// Scheduler state snapshot for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct StreamingStats {
    pub frame: u64,
    pub epoch: u64,
    pub active_chunks: usize,
    pub pending: usize,
    pub preload: usize,
    pub gen_jobs_in_flight: usize,
    pub mesh_jobs_in_flight: usize,
    pub integration_backlog: usize,
    pub remesh_queued: usize,
    pub removals_queued: usize,
    pub mesh_cache_entries: usize,
    pub data_cache_entries: usize,
    pub snapshot_queue_depth: usize,
    pub last_gen_ms: f64,
    pub last_mesh_ms: f64,
    pub last_integration_ms: f64,
    pub gen_jobs_cap: usize,
    pub mesh_jobs_cap: usize,
    pub integrations_cap: usize,
    pub preloads_cap: usize,
    pub player_frozen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Caps {
    gen_jobs: usize,
    mesh_jobs: usize,
    integrations: usize,
    preloads: usize,
}

#[derive(Debug)]
struct AdaptiveLimits {
    base: Caps,
    current: Caps,
    adaptive_until: f64,
}

impl AdaptiveLimits {
    fn new(base: Caps) -> Self {
        Self {
            base,
            current: base,
            adaptive_until: 0.0,
        }
    }
}

#[derive(Debug, Default)]
struct PhaseTimings {
    last_gen_ms: f64,
    last_mesh_ms: f64,
    last_integration_ms: f64,
}

// ========================
// Queue plumbing
// ========================

enum PendingQueue {
    Fifo(CoordQueue),
    Cone(ViewConeQueue),
}

impl PendingQueue {
    fn len(&self) -> usize {
        match self {
            PendingQueue::Fifo(q) => q.len(),
            PendingQueue::Cone(q) => q.len(),
        }
    }

    fn contains(&self, coord: ChunkCoord) -> bool {
        match self {
            PendingQueue::Fifo(q) => q.contains(coord),
            PendingQueue::Cone(q) => q.contains(coord),
        }
    }

    fn push(&mut self, coord: ChunkCoord, center_ws: Vec3, view: Vec3, cap: usize) -> bool {
        match self {
            PendingQueue::Fifo(q) => q.push(coord),
            PendingQueue::Cone(q) => {
                if q.contains(coord) {
                    return false;
                }
                if q.len() >= cap {
                    q.try_remove_lowest_priority();
                }
                q.enqueue(coord, center_ws, view);
                true
            }
        }
    }

    fn pop(&mut self) -> Option<ChunkCoord> {
        match self {
            PendingQueue::Fifo(q) => q.pop(),
            PendingQueue::Cone(q) => q.try_dequeue(),
        }
    }

    fn clear(&mut self) {
        match self {
            PendingQueue::Fifo(q) => q.clear(),
            PendingQueue::Cone(q) => q.clear(),
        }
    }
}

enum PendingIntegration {
    Built(MeshJobResult),
    Cached {
        coord: ChunkCoord,
        key: u64,
        epoch: u64,
        level: LodLevel,
    },
}

impl PendingIntegration {
    fn coord(&self) -> ChunkCoord {
        match self {
            PendingIntegration::Built(r) => r.coord,
            PendingIntegration::Cached { coord, .. } => *coord,
        }
    }

    fn epoch(&self) -> u64 {
        match self {
            PendingIntegration::Built(r) => r.epoch,
            PendingIntegration::Cached { epoch, .. } => *epoch,
        }
    }
}

struct SafeSpawnState {
    anchor: ChunkCoord,
    spawn_world: Vec3,
    started_at: f64,
    frozen: bool,
    revalidate: bool,
}

// ========================
// Scheduler
// ========================

pub struct StreamingScheduler {
    config: EngineConfig,
    chunk_world_size: f32,

    meshes: Box<dyn MeshAllocator>,
    colliders: Box<dyn ColliderBackend>,
    renderer: Box<dyn RendererBackend>,
    clock: Box<dyn Clock>,
    memory: Box<dyn MemoryProbe>,

    active: HashMap<ChunkCoord, Chunk>,

    pending: PendingQueue,
    preload: CoordQueue,
    remesh: CoordQueue,
    removals: CoordQueue,
    integration: VecDeque<PendingIntegration>,
    integration_set: HashSet<ChunkCoord>,
    gen_jobs: HashSet<ChunkCoord>,
    mesh_jobs: HashSet<ChunkCoord>,
    remesh_staged: Vec<ChunkCoord>,

    jobs: JobPool,
    gen_ctx: Arc<GenContext>,
    persist: PersistenceManager,
    mesh_cache: MeshCache,
    data_cache: DataCache,
    svo_cache: SvoCache,
    resolver: LodResolver,

    epoch: u64,
    prev_center: ChunkCoord,
    prev_view: Vec3,
    last_drop_time: f64,
    last_player_pos: Vec3,
    move_dir: Vec3,

    limits: AdaptiveLimits,
    timings: PhaseTimings,
    memory_pressure: bool,

    center: ChunkCoord,
    view_forward: Vec3,
    last_rebuild_center: ChunkCoord,
    ring_offsets: Vec<(i32, i32)>,

    scan_buf: Vec<ChunkCoord>,
    occlusion_cursor: usize,
    physics_cursor: usize,
    lod_cursor: usize,

    paused: bool,
    safe_spawn: Option<SafeSpawnState>,
    cache_ops_this_frame: usize,
    report: FrameReport,
}

impl StreamingScheduler {
    pub fn new(config: EngineConfig, backends: HostBackends) -> anyhow::Result<Self> {
        let sampler: Arc<dyn HeightSampler> =
            Arc::new(LayeredHeightSampler::from_config(&config.worldgen));
        Self::with_sampler(config, backends, sampler)
    }

    pub fn with_sampler(
        config: EngineConfig,
        backends: HostBackends,
        sampler: Arc<dyn HeightSampler>,
    ) -> anyhow::Result<Self> {
        config.validate().context("streaming config")?;

        let chunk_world_size = config.chunk_size as f32 * config.voxel_size;
        let world_id = sanitize_world_id(
            config.persistence.world_id.as_deref(),
            config.worldgen.seed,
        );
        let paths = WorldPaths::new(
            &config.persistence.root,
            &world_id,
            config.persistence.region_size,
        );

        let snapshots = SnapshotStore::new(
            backends.fs.clone(),
            paths.clone(),
            config.chunk_size,
            config.persistence.compress,
        )?;
        let mods = ModTracker::new(DeltaStore::new(
            backends.fs.clone(),
            paths.clone(),
            config.chunk_size,
            config.persistence.compress,
        )?);
        let persist = PersistenceManager::new(
            snapshots,
            mods,
            config.persistence.always_snapshot,
            config.persistence.delta_promote_threshold,
            config.worldgen.generator_version,
        );

        let generator = ChunkGenerator::new(
            sampler,
            config.worldgen.default_material,
            config.voxel_size,
        );
        let gen_ctx = Arc::new(GenContext {
            fs: backends.fs.clone(),
            paths,
            chunk_size: config.chunk_size,
            generator,
            generator_version: config.worldgen.generator_version,
        });

        let jobs = JobPool::new(config.worker_threads)?;

        let priority = PriorityParams {
            distance_weight: config.streaming.priority.distance_weight,
            dot_weight: config.streaming.priority.dot_weight,
            cone_cos: config
                .streaming
                .priority
                .cone_half_angle_deg
                .to_radians()
                .cos(),
            surface_band_y: config.worldgen.base_height / config.chunk_size as f32,
            surface_bias: config.streaming.priority.surface_bias,
            above_bias: config.streaming.priority.above_bias,
            below_penalty: config.streaming.priority.below_penalty,
            chunk_world_size,
        };
        let pending = if config.streaming.use_view_cone_priority {
            PendingQueue::Cone(ViewConeQueue::new(priority))
        } else {
            PendingQueue::Fifo(CoordQueue::new())
        };

        let caps = Caps {
            gen_jobs: config.streaming.max_gen_jobs_in_flight.max(1),
            mesh_jobs: config.streaming.max_mesh_jobs_in_flight.max(1),
            integrations: config.streaming.max_integrations_per_frame.max(1),
            preloads: config.streaming.max_preloads_per_frame,
        };

        let resolver = LodResolver::new(
            config.lod.levels.clone(),
            config.lod.default_hysteresis,
        );

        let mut ring_offsets: Vec<(i32, i32)> = Vec::new();
        let r = config.streaming.load_radius.max(
            if config.streaming.preload_enabled {
                config.streaming.preload_radius
            } else {
                config.streaming.load_radius
            },
        );
        for dx in -r..=r {
            for dz in -r..=r {
                ring_offsets.push((dx, dz));
            }
        }
        ring_offsets.sort_by_key(|&(dx, dz)| dx.abs().max(dz.abs()));

        Ok(Self {
            mesh_cache: MeshCache::new(),
            data_cache: DataCache::new(config.cache.max_cached_chunks),
            svo_cache: SvoCache::new(config.cache.svo_cache_capacity),
            resolver,
            limits: AdaptiveLimits::new(caps),
            timings: PhaseTimings::default(),
            memory_pressure: false,
            chunk_world_size,
            active: HashMap::new(),
            pending,
            preload: CoordQueue::new(),
            remesh: CoordQueue::new(),
            removals: CoordQueue::new(),
            integration: VecDeque::new(),
            integration_set: HashSet::new(),
            gen_jobs: HashSet::new(),
            mesh_jobs: HashSet::new(),
            remesh_staged: Vec::new(),
            jobs,
            gen_ctx,
            persist,
            epoch: 0,
            prev_center: ChunkCoord::ZERO,
            prev_view: Vec3::X,
            last_drop_time: f64::NEG_INFINITY,
            last_player_pos: Vec3::ZERO,
            move_dir: Vec3::ZERO,
            center: ChunkCoord::ZERO,
            view_forward: Vec3::X,
            last_rebuild_center: ChunkCoord::ZERO,
            ring_offsets,
            scan_buf: Vec::new(),
            occlusion_cursor: 0,
            physics_cursor: 0,
            lod_cursor: 0,
            paused: false,
            safe_spawn: None,
            cache_ops_this_frame: 0,
            meshes: backends.meshes,
            colliders: backends.colliders,
            renderer: backends.renderer,
            clock: backends.clock,
            memory: backends.memory,
            config,
            report: FrameReport::default(),
        })
    }

    // ========================
    // Frame tick
    // ========================

    pub fn tick(&mut self, player_pos: Vec3, view_forward: Vec3) -> FrameReport {
        let frame_start = Instant::now();
        self.clock.advance_frame();
        self.cache_ops_this_frame = 0;
        self.report = FrameReport {
            frame: self.clock.frame(),
            epoch: self.epoch,
            ..FrameReport::default()
        };

        let view_forward = view_forward.normalize_or_zero();
        let view_forward = if view_forward == Vec3::ZERO {
            self.view_forward
        } else {
            view_forward
        };
        let moved = player_pos - self.last_player_pos;
        if moved.length_squared() > 1e-6 {
            self.move_dir = moved.normalize();
        }
        self.last_player_pos = player_pos;
        self.view_forward = view_forward;
        self.center = ChunkCoord::new(
            (player_pos.x / self.chunk_world_size).floor() as i32,
            0,
            (player_pos.z / self.chunk_world_size).floor() as i32,
        );

        self.adapt_limits();
        self.maybe_drop_work();

        self.drain_gen_jobs();
        self.drain_mesh_jobs();
        self.integrate_meshes();

        if !self.over_budget(frame_start) {
            if !self.paused {
                self.maintain_radius(player_pos);
            }
        }
        if !self.over_budget(frame_start) {
            self.process_pending();
        }
        if !self.over_budget(frame_start) {
            self.process_preload();
        }
        if !self.over_budget(frame_start) {
            self.process_removals();
        }
        if !self.over_budget(frame_start) {
            self.process_remesh();
        }
        if !self.over_budget(frame_start) {
            self.lod_transitions();
        }
        if !self.over_budget(frame_start) {
            self.occlusion_tick(player_pos);
        }
        if !self.over_budget(frame_start) {
            self.physics_tick();
        }
        self.evict_caches();
        self.safe_spawn_tick();

        self.report.epoch = self.epoch;
        self.report.clone()
    }

    fn over_budget(&mut self, frame_start: Instant) -> bool {
        let over = frame_start.elapsed().as_secs_f64() * 1000.0
            > self.config.streaming.streaming_budget_ms;
        if over {
            self.report.budget_exhausted = true;
        }
        over
    }

    // ========================
    // Adaptive limits
    // ========================

    fn adapt_limits(&mut self) {
        let now = self.clock.seconds();
        let cfg = &self.config.streaming;
        let process_mb = self.memory.process_mb();
        let graphics_mb = self.memory.graphics_mb();
        self.memory_pressure = process_mb > cfg.memory_pressure_threshold_mb;

        let caps = &mut self.limits.current;
        let mut throttled = false;

        if self.timings.last_gen_ms > cfg.gen_slow_ms {
            caps.gen_jobs = (caps.gen_jobs / 2).max(1);
            throttled = true;
        }
        if self.timings.last_mesh_ms > cfg.mesh_slow_ms {
            caps.mesh_jobs = (caps.mesh_jobs / 2).max(1);
            throttled = true;
        }
        if self.timings.last_integration_ms > cfg.integration_slow_ms {
            caps.integrations = (caps.integrations / 2).max(1);
            caps.preloads = 0;
            throttled = true;
        }
        if self.memory_pressure {
            caps.gen_jobs = (caps.gen_jobs / 2).max(1);
            caps.mesh_jobs = (caps.mesh_jobs / 2).max(1);
            caps.integrations = (caps.integrations / 2).max(1);
            caps.preloads /= 2;
            throttled = true;
        }
        if graphics_mb > cfg.graphics_memory_threshold_mb {
            caps.mesh_jobs = (caps.mesh_jobs / 2).max(1);
            caps.integrations = (caps.integrations / 2).max(1);
            throttled = true;
        }

        if throttled {
            log::debug!(
                "throttled caps: gen={} mesh={} int={} preload={}",
                caps.gen_jobs,
                caps.mesh_jobs,
                caps.integrations,
                caps.preloads
            );
            self.limits.adaptive_until = now + cfg.adaptive_cooldown;
        } else if now >= self.limits.adaptive_until && self.limits.current != self.limits.base {
            self.limits.current = self.limits.base;
        }
    }

    // ========================
    // Epoch work dropping
    // ========================

    fn maybe_drop_work(&mut self) {
        let now = self.clock.seconds();
        let cfg = &self.config.streaming;

        // Triggers compare against the previous frame: a teleport or a
        // mouse flick shows up as a single-frame jump.
        let center_moved =
            self.center.horizontal_chebyshev(self.prev_center) > cfg.work_drop_distance;
        let view_turn = self
            .prev_view
            .normalize_or_zero()
            .dot(self.view_forward)
            .clamp(-1.0, 1.0)
            .acos()
            .to_degrees();
        let view_turned = view_turn >= cfg.work_drop_angle_deg;
        let move_diverges = self.move_dir != Vec3::ZERO
            && self
                .move_dir
                .dot(self.view_forward)
                .clamp(-1.0, 1.0)
                .acos()
                .to_degrees()
                >= cfg.work_drop_move_angle_deg;

        let cooled_down = now - self.last_drop_time >= cfg.work_drop_cooldown;
        self.prev_center = self.center;
        self.prev_view = self.view_forward;

        if !(center_moved || view_turned || move_diverges) || !cooled_down {
            return;
        }

        self.epoch += 1;
        self.report.epoch_dropped = true;
        self.last_drop_time = now;

        self.pending.clear();
        self.preload.clear();
        self.removals.clear();

        // Dispose queued integrations; their meshes were never applied.
        let stale: Vec<PendingIntegration> = self.integration.drain(..).collect();
        self.integration_set.clear();
        for entry in stale {
            if let PendingIntegration::Cached { key, .. } = entry {
                self.mesh_cache.release(key);
            }
        }

        // Remesh entries survive if still in range; in-flight jobs are
        // left alone and reconciled when they complete.
        let keep = self.config.streaming.keep_radius();
        let center = self.center;
        self.remesh
            .retain(|c| c.horizontal_chebyshev(center) <= keep);

        log::debug!("work drop: epoch {} center {}", self.epoch, self.center);
    }

    // ========================
    // Job draining
    // ========================

    fn drain_gen_jobs(&mut self) {
        self.timings.last_gen_ms = 0.0;
        let results = self.jobs.drain_gen();
        for result in results {
            self.timings.last_gen_ms = self.timings.last_gen_ms.max(result.elapsed_ms);
            let coord = result.coord;

            if !self.gen_jobs.contains(&coord) {
                // Orphaned by removal or work drop.
                continue;
            }
            let keep = self.config.streaming.keep_radius();
            if result.epoch != self.epoch && coord.horizontal_chebyshev(self.center) > keep {
                self.gen_jobs.remove(&coord);
                continue;
            }

            if !result.is_final_slice() {
                let next = result.slice_index + 1;
                self.jobs.spawn_gen(
                    self.gen_ctx.clone(),
                    coord,
                    result.epoch,
                    next,
                    result.slice_count,
                    result.buffer,
                );
                continue;
            }

            self.gen_jobs.remove(&coord);
            self.spawn_chunk(coord, result.buffer, result.meta, result.from_snapshot);
        }
    }

    fn drain_mesh_jobs(&mut self) {
        self.timings.last_mesh_ms = 0.0;
        for result in self.jobs.drain_mesh() {
            self.timings.last_mesh_ms = self.timings.last_mesh_ms.max(result.elapsed_ms);
            let coord = result.coord;
            if !self.mesh_jobs.remove(&coord) {
                continue;
            }
            if self.integration_set.insert(coord) {
                self.integration.push_back(PendingIntegration::Built(result));
            }
        }
    }

    // ========================
    // Integration
    // ========================

    fn integrate_meshes(&mut self) {
        let start = Instant::now();
        let base_cap = self.limits.current.integrations;
        let cap = if self.integration.len() > base_cap / 2 {
            (base_cap * 3).max(base_cap)
        } else {
            base_cap
        };

        let keep = self.config.streaming.keep_radius();
        for _ in 0..cap {
            let Some(entry) = self.integration.pop_front() else {
                break;
            };
            let coord = entry.coord();
            self.integration_set.remove(&coord);
            self.report.integrations += 1;

            if entry.epoch() != self.epoch && coord.horizontal_chebyshev(self.center) > keep {
                if let PendingIntegration::Cached { key, .. } = entry {
                    self.mesh_cache.release(key);
                }
                if self.active.contains_key(&coord) {
                    self.schedule_removal(coord);
                }
                continue;
            }

            match entry {
                PendingIntegration::Built(result) => self.apply_built_mesh(result),
                PendingIntegration::Cached { coord, key, level, .. } => {
                    self.apply_cached_mesh(coord, key, level)
                }
            }
        }

        // Neighbor remeshes triggered by first-time integrations are
        // merged only after the whole phase so they never interleave with
        // the integration that caused them.
        let staged = std::mem::take(&mut self.remesh_staged);
        for coord in staged {
            if self.active.contains_key(&coord) && self.remesh.push(coord) {
                self.report.remesh_scheduled += 1;
            }
        }

        self.timings.last_integration_ms = start.elapsed().as_secs_f64() * 1000.0;
    }

    fn apply_built_mesh(&mut self, result: MeshJobResult) {
        let now = self.clock.seconds();
        let frame = self.clock.frame();
        let Some(chunk) = self.active.get_mut(&result.coord) else {
            return;
        };

        if result.mesh.is_empty() {
            Self::release_chunk_mesh(self.meshes.as_mut(), &mut self.mesh_cache, chunk);
            Self::detach_collider(self.colliders.as_mut(), chunk);
            Self::set_lod_applied(chunk, result.lod_step, result.mode, now);
            Self::mark_integrated(chunk, &mut self.remesh_staged);
            return;
        }

        // Reuse the existing handle when the chunk owns it outright.
        let handle = match (chunk.mesh, chunk.mesh_cache_key) {
            (Some(handle), None) => handle,
            _ => {
                Self::release_chunk_mesh(self.meshes.as_mut(), &mut self.mesh_cache, chunk);
                self.meshes.create()
            }
        };
        self.meshes.upload(handle, &result.mesh);
        chunk.mesh = Some(handle);
        chunk.mesh_cache_key = None;

        if self.config.cache.mesh_cache_enabled {
            if let Some(key) = result.cache_key {
                if self
                    .mesh_cache
                    .insert(key, handle, result.mesh.vertex_count(), frame)
                {
                    chunk.mesh_cache_key = Some(key);
                }
            }
        }

        Self::set_lod_applied(chunk, result.lod_step, result.mode, now);
        Self::attach_collider_if_near(
            self.colliders.as_mut(),
            chunk,
            self.center,
            self.config.streaming.physics_radius,
        );
        Self::mark_integrated(chunk, &mut self.remesh_staged);
    }

    fn apply_cached_mesh(&mut self, coord: ChunkCoord, key: u64, level: LodLevel) {
        if !self.active.contains_key(&coord) {
            self.mesh_cache.release(key);
            return;
        }

        // Re-verify right before applying: the neighborhood must still be
        // complete and hash to the same key, otherwise the cached geometry
        // is stale and the chunk goes back through a real mesh job.
        let recomputed = self.neighbors_complete(coord).then(|| {
            let raw_slabs = self.gather_slabs(coord, 1);
            let chunk = &self.active[&coord];
            compute_key(
                chunk.buffer.materials(),
                &raw_slabs,
                level.lod_step.max(1),
                chunk.buffer.density(),
            )
        });
        if recomputed != Some(key) {
            self.mesh_cache.release(key);
            if self.remesh.push(coord) {
                self.report.remesh_scheduled += 1;
            }
            return;
        }

        let Some(entry_mesh) = self.mesh_cache.entry(key).map(|e| e.mesh) else {
            if self.remesh.push(coord) {
                self.report.remesh_scheduled += 1;
            }
            return;
        };

        let now = self.clock.seconds();
        let Some(chunk) = self.active.get_mut(&coord) else {
            self.mesh_cache.release(key);
            return;
        };
        Self::release_chunk_mesh(self.meshes.as_mut(), &mut self.mesh_cache, chunk);
        chunk.mesh = Some(entry_mesh);
        chunk.mesh_cache_key = Some(key);
        Self::set_lod_applied(chunk, level.lod_step, level.mode, now);
        Self::attach_collider_if_near(
            self.colliders.as_mut(),
            chunk,
            self.center,
            self.config.streaming.physics_radius,
        );
        Self::mark_integrated(chunk, &mut self.remesh_staged);
    }

    fn set_lod_applied(chunk: &mut Chunk, lod_step: u32, mode: LodMode, now: f64) {
        chunk.lod_step = lod_step.max(1);
        chunk.uses_svo = mode == LodMode::Svo;
        chunk.is_low_lod = chunk.lod_step > 1 || chunk.uses_svo;
        chunk.lod_start_time = now;
    }

    fn mark_integrated(chunk: &mut Chunk, staged: &mut Vec<ChunkCoord>) {
        if !chunk.integrated_once {
            chunk.integrated_once = true;
            staged.extend(chunk.coord.neighbors());
        }
    }

    // ========================
    // Radius maintenance
    // ========================

    fn maintain_radius(&mut self, player_pos: Vec3) {
        let cfg = &self.config.streaming;
        let center = self.center;

        // Pending rebuild: the queue went stale (player moved) or overgrew.
        if self.pending.len() > cfg.pending_queue_cap
            || center.horizontal_chebyshev(self.last_rebuild_center) > cfg.pending_reset_distance
        {
            self.pending.clear();
            self.last_rebuild_center = center;
        }

        let load_r = cfg.load_radius;
        let preload_r = cfg.preload_radius;
        let preload_on = cfg.preload_enabled;
        let columns = cfg.column_chunks;
        let cap = cfg.pending_queue_cap;
        let keep = cfg.keep_radius();
        let view = self.view_forward;

        for i in 0..self.ring_offsets.len() {
            let (dx, dz) = self.ring_offsets[i];
            let ring = dx.abs().max(dz.abs());
            if ring > load_r && !(preload_on && ring <= preload_r) {
                continue;
            }
            for dy in 0..columns {
                let coord = ChunkCoord::new(center.x() + dx, dy, center.z() + dz);
                if self.active.contains_key(&coord)
                    || self.gen_jobs.contains(&coord)
                    || self.removals.contains(coord)
                {
                    continue;
                }
                if ring <= load_r {
                    if !self.pending.contains(coord) {
                        self.pending.push(coord, player_pos, view, cap);
                    }
                } else if !self.preload.contains(coord) {
                    self.preload.push(coord);
                }
            }
        }

        // Evict out-of-range chunks, farthest first.
        let to_remove: Vec<ChunkCoord> = self
            .active
            .keys()
            .filter(|c| c.horizontal_chebyshev(center) > keep)
            .copied()
            .collect();
        for coord in to_remove {
            self.schedule_removal(coord);
        }
        self.removals
            .sort_descending_by_key(|c| c.distance_squared(center));
    }

    fn schedule_removal(&mut self, coord: ChunkCoord) {
        if !self.removals.push(coord) {
            return;
        }
        // A dying chunk's in-flight work is orphaned now so the removal
        // and job-tracking sets never overlap.
        self.gen_jobs.remove(&coord);
        self.mesh_jobs.remove(&coord);
        self.remesh.remove(coord);
        if self.integration_set.remove(&coord) {
            let mut kept = VecDeque::with_capacity(self.integration.len());
            for entry in self.integration.drain(..) {
                if entry.coord() == coord {
                    if let PendingIntegration::Cached { key, .. } = entry {
                        self.mesh_cache.release(key);
                    }
                } else {
                    kept.push_back(entry);
                }
            }
            self.integration = kept;
        }
    }

    // ========================
    // Pending / preload
    // ========================

    fn process_pending(&mut self) {
        let max_spawns = self.config.streaming.max_spawns_per_frame;
        let load_r = self.config.streaming.load_radius;

        while self.report.spawn_starts < max_spawns
            && self.gen_jobs.len() < self.limits.current.gen_jobs
        {
            let Some(coord) = self.pending.pop() else {
                break;
            };
            if self.active.contains_key(&coord) || self.gen_jobs.contains(&coord) {
                continue;
            }
            if coord.horizontal_chebyshev(self.center) > load_r {
                continue;
            }
            self.report.spawn_starts += 1;
            self.start_chunk_load(coord);
        }
    }

    fn process_preload(&mut self) {
        let cap = self.limits.current.preloads;
        let mut started = 0;
        while started < cap && self.gen_jobs.len() < self.limits.current.gen_jobs {
            let Some(coord) = self.preload.pop() else {
                break;
            };
            if self.active.contains_key(&coord) || self.gen_jobs.contains(&coord) {
                continue;
            }
            let keep = self.config.streaming.keep_radius();
            if coord.horizontal_chebyshev(self.center) > keep {
                continue;
            }
            self.report.preload_starts += 1;
            self.start_chunk_load(coord);
            started += 1;
        }
    }

    fn start_chunk_load(&mut self, coord: ChunkCoord) {
        // Data cache first; persisted deltas outrank a parked buffer.
        if self.data_cache.contains(coord) {
            if self.persist.mods.has_deltas(coord) {
                self.data_cache.invalidate(coord);
            } else if let Some(cached) = self.data_cache.take(coord) {
                self.spawn_chunk(coord, cached.buffer, cached.meta, false);
                return;
            }
        }

        let buffer = VoxelBuffer::new(self.config.chunk_size);
        let slices = self.config.streaming.gen_slices.max(1);
        self.gen_jobs.insert(coord);
        self.jobs
            .spawn_gen(self.gen_ctx.clone(), coord, self.epoch, 0, slices, buffer);
    }

    fn spawn_chunk(
        &mut self,
        coord: ChunkCoord,
        mut buffer: VoxelBuffer,
        mut meta: ChunkMeta,
        from_snapshot: bool,
    ) {
        if self.active.contains_key(&coord) {
            return;
        }

        let replayed = self.persist.mods.replay_onto(coord, &mut buffer);
        if replayed > 0 || self.persist.mods.delta_count(coord) > 0 {
            if meta.save_mode == SaveMode::GeneratedOnly {
                meta.save_mode = SaveMode::DeltaBacked;
            }
            meta.delta_count = self.persist.mods.delta_count(coord) as i32;
        }
        if !from_snapshot {
            meta.generator_version = self.config.worldgen.generator_version;
        }

        let mut chunk = Chunk::new(coord, buffer, meta);

        if let Some(spawn) = &self.safe_spawn {
            if spawn.anchor == coord {
                let changed = Self::apply_spawn_platform(
                    &mut chunk,
                    spawn.spawn_world,
                    self.chunk_world_size,
                    self.config.worldgen.default_material,
                );
                if changed > 0 {
                    log::debug!("spawn platform patched {changed} voxels in {coord}");
                }
            }
        }

        self.renderer.set_chunk_visible(coord, true);
        self.active.insert(coord, chunk);
        self.report.spawned += 1;

        if coord.horizontal_chebyshev(self.center) <= self.config.streaming.load_radius {
            self.schedule_mesh(coord);
        }
    }

    // ========================
    // Meshing
    // ========================

    fn neighbors_complete(&self, coord: ChunkCoord) -> bool {
        coord
            .neighbors()
            .iter()
            .all(|n| self.active.contains_key(n) && !self.gen_jobs.contains(n))
    }

    fn gather_slabs(&self, coord: ChunkCoord, step: usize) -> NeighborSlabs {
        let mut slabs: NeighborSlabs = [None, None, None, None, None, None];
        for (i, neighbor) in coord.neighbors().iter().enumerate() {
            if let Some(chunk) = self.active.get(neighbor) {
                let face = crate::mesh::Face::ALL[i];
                slabs[i] = Some(boundary_slab(&chunk.buffer, face, step));
            }
        }
        slabs
    }

    /// Schedules greedy meshing for an active chunk, preferring a cached
    /// identical mesh when the whole neighborhood is settled.
    fn schedule_mesh(&mut self, coord: ChunkCoord) {
        if self.mesh_jobs.contains(&coord)
            || self.integration_set.contains(&coord)
            || self.removals.contains(coord)
        {
            return;
        }
        let Some(chunk) = self.active.get(&coord) else {
            return;
        };

        let dist = coord.horizontal_chebyshev(self.center) as f32;
        let level = chunk
            .lod
            .unwrap_or_else(|| self.resolver.resolve(dist, None));
        match level.mode {
            LodMode::Mesh | LodMode::SteppedMesh => {}
            // Impostor modes are refreshed by the LOD phase, not remesh.
            _ => return,
        }
        let lod_step = level.lod_step.max(1) as usize;

        let complete = self.neighbors_complete(coord);
        let cache_key = if self.config.cache.mesh_cache_enabled && complete {
            let raw_slabs = self.gather_slabs(coord, 1);
            let chunk = &self.active[&coord];
            Some(compute_key(
                chunk.buffer.materials(),
                &raw_slabs,
                lod_step as u32,
                chunk.buffer.density(),
            ))
        } else {
            None
        };

        if let Some(key) = cache_key {
            let frame = self.clock.frame();
            if self.mesh_cache.acquire(key, frame).is_some() {
                self.report.mesh_cache_hits += 1;
                if self.integration_set.insert(coord) {
                    self.integration.push_back(PendingIntegration::Cached {
                        coord,
                        key,
                        epoch: self.epoch,
                        level,
                    });
                } else {
                    self.mesh_cache.release(key);
                }
                return;
            }
        }

        if self.mesh_jobs.len() >= self.limits.current.mesh_jobs {
            // No slot this frame; the remesh queue will try again.
            self.remesh.push(coord);
            return;
        }

        let chunk = &self.active[&coord];
        let size = self.config.chunk_size / lod_step;
        let materials = if lod_step > 1 {
            downsample(chunk.buffer.materials(), self.config.chunk_size, lod_step)
        } else {
            chunk.buffer.materials().to_vec()
        };
        let neighbors = self.gather_slabs(coord, lod_step);

        let params = MesherParams {
            voxel_size: self.config.voxel_size,
            lod_step: lod_step as u32,
            max_material_index: self.config.max_material_index,
            fallback_material_index: self.config.fallback_material_index,
        };
        self.mesh_jobs.insert(coord);
        self.jobs.spawn_mesh(MeshJobInput {
            coord,
            epoch: self.epoch,
            materials,
            size,
            neighbors,
            params,
            mode: level.mode,
            cache_key,
        });
        self.report.mesh_jobs_started += 1;
    }

    fn process_remesh(&mut self) {
        let cap = self.config.streaming.max_remesh_per_frame;
        let mut processed = 0;
        while processed < cap && self.mesh_jobs.len() < self.limits.current.mesh_jobs {
            let Some(coord) = self.remesh.pop() else {
                break;
            };
            if !self.active.contains_key(&coord) {
                continue;
            }
            self.schedule_mesh(coord);
            processed += 1;
        }
    }

    // ========================
    // Removal
    // ========================

    fn process_removals(&mut self) {
        let cap = self.config.streaming.max_removals_per_frame;
        let budget_ms = self.config.streaming.removal_budget_ms;
        let start = Instant::now();

        let mut removed = 0;
        while removed < cap {
            if start.elapsed().as_secs_f64() * 1000.0 > budget_ms {
                break;
            }
            let Some(coord) = self.removals.pop() else {
                break;
            };
            self.remove_chunk(coord);
            removed += 1;
        }
        self.report.removals = removed;
        self.report.removal_ms = start.elapsed().as_secs_f64() * 1000.0;
    }

    fn remove_chunk(&mut self, coord: ChunkCoord) {
        let Some(mut chunk) = self.active.remove(&coord) else {
            return;
        };

        let final_meta = self
            .persist
            .on_unload(coord, &chunk.buffer, &chunk.meta);

        // Park the buffer for a cheap return trip, bounded per frame and
        // halved under memory pressure.
        let cache_cap = if self.memory_pressure {
            self.config.cache.max_cache_ops_per_frame / 2
        } else {
            self.config.cache.max_cache_ops_per_frame
        };
        if self.cache_ops_this_frame < cache_cap {
            self.cache_ops_this_frame += 1;
            let buffer = std::mem::replace(&mut chunk.buffer, VoxelBuffer::new(1));
            self.data_cache.insert(coord, buffer, final_meta);
        }

        Self::release_chunk_mesh(self.meshes.as_mut(), &mut self.mesh_cache, &mut chunk);
        Self::detach_collider(self.colliders.as_mut(), &mut chunk);
        self.renderer.set_chunk_visible(coord, false);
        self.svo_cache.invalidate(coord);
        self.remesh.remove(coord);
    }

    // ========================
    // LOD transitions
    // ========================

    fn lod_transitions(&mut self) {
        let checks = self.config.streaming.lod_checks_per_frame;
        if checks == 0 || self.active.is_empty() {
            return;
        }
        if self.lod_cursor >= self.scan_buf.len() {
            self.scan_buf.clear();
            self.scan_buf.extend(self.active.keys().copied());
            self.lod_cursor = 0;
        }

        let end = (self.lod_cursor + checks).min(self.scan_buf.len());
        let coords: Vec<ChunkCoord> = self.scan_buf[self.lod_cursor..end].to_vec();
        self.lod_cursor = end;

        for coord in coords {
            self.lod_transition_for(coord);
        }
    }

    fn lod_transition_for(&mut self, coord: ChunkCoord) {
        let center = self.center;
        let load_r = self.config.streaming.load_radius;
        let now = self.clock.seconds();

        let Some(chunk) = self.active.get_mut(&coord) else {
            return;
        };
        let dist = coord.horizontal_chebyshev(center) as f32;
        let target = self.resolver.resolve(dist, chunk.lod.as_ref());

        if chunk.lod == Some(target) {
            // Steady state; preloaded chunks entering the load radius
            // still need their first mesh.
            let wants_geometry =
                matches!(target.mode, LodMode::Mesh | LodMode::SteppedMesh);
            if wants_geometry
                && chunk.mesh.is_none()
                && dist as i32 <= load_r
                && !self.mesh_jobs.contains(&coord)
                && !self.integration_set.contains(&coord)
            {
                if self.remesh.push(coord) {
                    self.report.remesh_scheduled += 1;
                }
            }
            return;
        }

        chunk.lod = Some(target);
        chunk.lod_start_time = now;

        match target.mode {
            LodMode::Mesh | LodMode::SteppedMesh => {
                if self.remesh.push(coord) {
                    self.report.remesh_scheduled += 1;
                }
            }
            LodMode::Svo => {
                let tree = self.svo_cache.get_or_build(coord, &chunk.buffer);
                let mesh = tree.synthesize_mesh(
                    self.config.chunk_size,
                    self.config.lod.svo_depth,
                    self.config.voxel_size,
                );
                Self::apply_direct_mesh(
                    self.meshes.as_mut(),
                    &mut self.mesh_cache,
                    self.colliders.as_mut(),
                    chunk,
                    mesh,
                    target,
                    now,
                );
            }
            LodMode::Billboard => {
                let mesh = billboard_quad(&chunk.buffer, self.config.voxel_size);
                Self::apply_direct_mesh(
                    self.meshes.as_mut(),
                    &mut self.mesh_cache,
                    self.colliders.as_mut(),
                    chunk,
                    mesh,
                    target,
                    now,
                );
            }
            LodMode::None => {
                Self::release_chunk_mesh(self.meshes.as_mut(), &mut self.mesh_cache, chunk);
                Self::detach_collider(self.colliders.as_mut(), chunk);
                chunk.visible = false;
                self.renderer.set_chunk_visible(coord, false);
                Self::set_lod_applied(chunk, target.lod_step, target.mode, now);
            }
        }
    }

    /// Uploads impostor geometry built on the control thread (SVO and
    /// billboard modes skip the job pool; they are tiny).
    fn apply_direct_mesh(
        meshes: &mut dyn MeshAllocator,
        cache: &mut MeshCache,
        colliders: &mut dyn ColliderBackend,
        chunk: &mut Chunk,
        mesh: MeshData,
        level: LodLevel,
        now: f64,
    ) {
        if mesh.is_empty() {
            Self::release_chunk_mesh(meshes, cache, chunk);
            Self::detach_collider(colliders, chunk);
            Self::set_lod_applied(chunk, level.lod_step, level.mode, now);
            return;
        }
        let handle = match (chunk.mesh, chunk.mesh_cache_key) {
            (Some(handle), None) => handle,
            _ => {
                Self::release_chunk_mesh(meshes, cache, chunk);
                meshes.create()
            }
        };
        meshes.upload(handle, &mesh);
        chunk.mesh = Some(handle);
        chunk.mesh_cache_key = None;
        // Impostors never carry physics.
        Self::detach_collider(colliders, chunk);
        Self::set_lod_applied(chunk, level.lod_step, level.mode, now);
    }

    // ========================
    // Occlusion and physics rotation
    // ========================

    fn occlusion_tick(&mut self, player_pos: Vec3) {
        let checks = self.config.streaming.occlusion_checks_per_frame;
        if checks == 0 || self.active.is_empty() {
            return;
        }
        let min_dist = self.config.streaming.occlusion_min_distance;
        let cone_cos = self
            .config
            .streaming
            .priority
            .cone_half_angle_deg
            .to_radians()
            .cos();
        let chunk_ws = self.chunk_world_size;
        let center = self.center;
        let view = self.view_forward;

        let coords: Vec<ChunkCoord> = self.active.keys().copied().collect();
        for i in 0..checks.min(coords.len()) {
            let idx = (self.occlusion_cursor + i) % coords.len();
            let coord = coords[idx];
            let Some(chunk) = self.active.get_mut(&coord) else {
                continue;
            };
            if chunk.mesh.is_none() || matches!(chunk.lod.map(|l| l.mode), Some(LodMode::None)) {
                continue;
            }
            let near = coord.horizontal_chebyshev(center) <= min_dist;
            let visible = near || in_view_cone(coord, player_pos, view, cone_cos, chunk_ws);
            if chunk.visible != visible {
                chunk.visible = visible;
                self.renderer.set_chunk_visible(coord, visible);
            }
        }
        self.occlusion_cursor = self
            .occlusion_cursor
            .wrapping_add(checks)
            % coords.len().max(1);
    }

    fn physics_tick(&mut self) {
        let checks = self.config.streaming.physics_checks_per_frame;
        if checks == 0 || self.active.is_empty() {
            return;
        }
        let radius = self.config.streaming.physics_radius;
        let center = self.center;

        let coords: Vec<ChunkCoord> = self.active.keys().copied().collect();
        for i in 0..checks.min(coords.len()) {
            let idx = (self.physics_cursor + i) % coords.len();
            let coord = coords[idx];
            let Some(chunk) = self.active.get_mut(&coord) else {
                continue;
            };
            let want = coord.horizontal_chebyshev(center) <= radius
                && chunk.mesh.is_some()
                && !chunk.uses_svo;

            match (chunk.collider, want, chunk.mesh) {
                (None, true, Some(mesh)) => {
                    chunk.collider = Some(self.colliders.attach(coord, mesh));
                    chunk.physics_enabled = true;
                }
                (Some(collider), _, _) if chunk.physics_enabled != want => {
                    self.colliders.set_enabled(collider, want);
                    chunk.physics_enabled = want;
                }
                _ => {}
            }
        }
        self.physics_cursor = self
            .physics_cursor
            .wrapping_add(checks)
            % coords.len().max(1);
    }

    // ========================
    // Cache upkeep
    // ========================

    fn evict_caches(&mut self) {
        let mut budget = self.config.cache.mesh_cache_evict_per_frame;
        if self.memory_pressure {
            budget *= 2;
        }
        if budget > 0 {
            self.mesh_cache.evict(budget, self.meshes.as_mut());
        }
    }

    // ========================
    // Safe spawn
    // ========================

    /// Freezes the player until the anchor chunk under `world_pos` has
    /// integrated a mesh (or the timeout passes).
    pub fn begin_safe_spawn(&mut self, world_pos: Vec3) {
        let anchor = ChunkCoord::from_world_pos(world_pos, self.chunk_world_size);
        let now = self.clock.seconds();
        self.safe_spawn = Some(SafeSpawnState {
            anchor,
            spawn_world: world_pos,
            started_at: now,
            frozen: true,
            revalidate: true,
        });

        if let Some(chunk) = self.active.get_mut(&anchor) {
            let changed = Self::apply_spawn_platform(
                chunk,
                world_pos,
                self.chunk_world_size,
                self.config.worldgen.default_material,
            );
            if changed > 0 {
                self.remesh.push(anchor);
            }
        }
    }

    pub fn is_player_frozen(&self) -> bool {
        self.safe_spawn.as_ref().map_or(false, |s| s.frozen)
    }

    fn safe_spawn_tick(&mut self) {
        let now = self.clock.seconds();
        let timeout = self.config.streaming.safe_spawn_timeout_seconds;
        let Some(state) = &mut self.safe_spawn else {
            return;
        };

        if state.frozen && now - state.started_at > timeout {
            log::warn!("safe spawn timed out after {timeout}s, unfreezing player");
            state.frozen = false;
        }

        let anchor = state.anchor;
        let anchor_meshed = self
            .active
            .get(&anchor)
            .map_or(false, |c| c.mesh.is_some() || c.integrated_once);
        if !anchor_meshed {
            return;
        }

        if state.frozen {
            state.frozen = false;
        }
        if state.revalidate {
            let spawn_world = state.spawn_world;
            let material = self.config.worldgen.default_material;
            let chunk_ws = self.chunk_world_size;
            let changed = self
                .active
                .get_mut(&anchor)
                .map_or(0, |chunk| {
                    Self::apply_spawn_platform(chunk, spawn_world, chunk_ws, material)
                });
            if changed > 0 {
                self.remesh.push(anchor);
            } else {
                // Second pass changed nothing: the platform is stable and
                // the revalidate loop must not run again.
                state.revalidate = false;
            }
        }
    }

    /// Ensures a solid 3×3 platform one voxel below the spawn position.
    /// Returns the number of voxels changed; zero on a repeat application.
    fn apply_spawn_platform(
        chunk: &mut Chunk,
        world_pos: Vec3,
        chunk_world_size: f32,
        material: u16,
    ) -> usize {
        let n = chunk.buffer.size() as i32;
        let min = chunk.coord.world_min(chunk_world_size);
        let voxel = chunk_world_size / n as f32;
        let lx = ((world_pos.x - min.x) / voxel).floor() as i32;
        let ly = ((world_pos.y - min.y) / voxel).floor() as i32;
        let lz = ((world_pos.z - min.z) / voxel).floor() as i32;
        let platform_y = (ly - 1).clamp(0, n - 1);

        let mut changed = 0;
        for dz in -1..=1 {
            for dx in -1..=1 {
                let x = lx + dx;
                let z = lz + dz;
                if x < 0 || x >= n || z < 0 || z >= n {
                    continue;
                }
                if chunk
                    .set_material(x as usize, platform_y as usize, z as usize, material)
                {
                    changed += 1;
                }
            }
        }
        changed
    }

    // ========================
    // Edits
    // ========================

    /// Applies a player edit to the active chunk containing `world_pos`.
    /// Returns false when that chunk is not resident.
    pub fn set_voxel(&mut self, world_pos: Vec3, material: u16) -> bool {
        let coord = ChunkCoord::from_world_pos(world_pos, self.chunk_world_size);
        let Some(chunk) = self.active.get_mut(&coord) else {
            return false;
        };

        let n = self.config.chunk_size as i32;
        let min = coord.world_min(self.chunk_world_size);
        let voxel = self.config.voxel_size;
        let x = ((world_pos.x - min.x) / voxel).floor() as i32;
        let y = ((world_pos.y - min.y) / voxel).floor() as i32;
        let z = ((world_pos.z - min.z) / voxel).floor() as i32;
        if x < 0 || y < 0 || z < 0 || x >= n || y >= n || z >= n {
            return false;
        }

        if !chunk.set_material(x as usize, y as usize, z as usize, material) {
            return true; // already that material
        }

        let index = chunk.buffer.index(x as usize, y as usize, z as usize) as i32;
        let count = self.persist.mods.record_edit(coord, index, material);
        chunk.meta.delta_count = count as i32;
        if chunk.meta.save_mode == SaveMode::GeneratedOnly {
            chunk.meta.save_mode = SaveMode::DeltaBacked;
        }

        self.svo_cache.invalidate(coord);
        self.remesh.push(coord);

        // Faces on a boundary change the neighbor's culling too.
        let neighbors = coord.neighbors();
        let mut touch = |idx: usize| {
            let n_coord = neighbors[idx];
            if self.active.contains_key(&n_coord) {
                self.remesh.push(n_coord);
            }
        };
        if x == 0 {
            touch(0);
        }
        if x == n - 1 {
            touch(1);
        }
        if y == 0 {
            touch(2);
        }
        if y == n - 1 {
            touch(3);
        }
        if z == 0 {
            touch(4);
        }
        if z == n - 1 {
            touch(5);
        }
        true
    }

    /// Queues a chunk for remeshing, optionally rippling to its
    /// neighbors. The ripple is bounded by the configured depth so a
    /// burst of requests cannot cascade across the whole active set.
    pub fn request_remesh(&mut self, coord: ChunkCoord, include_neighbors: bool) {
        let depth = if include_neighbors {
            self.config.streaming.remesh_neighbor_depth
        } else {
            0
        };
        self.request_remesh_depth(coord, depth);
    }

    fn request_remesh_depth(&mut self, coord: ChunkCoord, depth: u32) {
        if !self.active.contains_key(&coord) {
            return;
        }
        self.remesh.push(coord);
        if depth == 0 {
            return;
        }
        for neighbor in coord.neighbors() {
            self.request_remesh_depth(neighbor, depth - 1);
        }
    }

    // ========================
    // Control and inspection
    // ========================

    pub fn set_streaming_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_active(&self, coord: ChunkCoord) -> bool {
        self.active.contains_key(&coord)
    }

    pub fn chunk(&self, coord: ChunkCoord) -> Option<&Chunk> {
        self.active.get(&coord)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn material_at_world(&self, world_pos: Vec3) -> Option<u16> {
        let coord = ChunkCoord::from_world_pos(world_pos, self.chunk_world_size);
        let chunk = self.active.get(&coord)?;
        let n = self.config.chunk_size as i32;
        let min = coord.world_min(self.chunk_world_size);
        let x = ((world_pos.x - min.x) / self.config.voxel_size).floor() as i32;
        let y = ((world_pos.y - min.y) / self.config.voxel_size).floor() as i32;
        let z = ((world_pos.z - min.z) / self.config.voxel_size).floor() as i32;
        if x < 0 || y < 0 || z < 0 || x >= n || y >= n || z >= n {
            return None;
        }
        Some(chunk.material_at(x as usize, y as usize, z as usize))
    }

    pub fn stats(&self) -> StreamingStats {
        StreamingStats {
            frame: self.clock.frame(),
            epoch: self.epoch,
            active_chunks: self.active.len(),
            pending: self.pending.len(),
            preload: self.preload.len(),
            gen_jobs_in_flight: self.gen_jobs.len(),
            mesh_jobs_in_flight: self.mesh_jobs.len(),
            integration_backlog: self.integration.len(),
            remesh_queued: self.remesh.len(),
            removals_queued: self.removals.len(),
            mesh_cache_entries: self.mesh_cache.len(),
            data_cache_entries: self.data_cache.len(),
            snapshot_queue_depth: self.persist.snapshots.queue_depth(),
            last_gen_ms: self.timings.last_gen_ms,
            last_mesh_ms: self.timings.last_mesh_ms,
            last_integration_ms: self.timings.last_integration_ms,
            gen_jobs_cap: self.limits.current.gen_jobs,
            mesh_jobs_cap: self.limits.current.mesh_jobs,
            integrations_cap: self.limits.current.integrations,
            preloads_cap: self.limits.current.preloads,
            player_frozen: self.is_player_frozen(),
        }
    }

    /// Persists every active chunk and stops the writer threads. The
    /// scheduler is inert afterwards.
    pub fn shutdown(&mut self) {
        let coords: Vec<ChunkCoord> = self.active.keys().copied().collect();
        for coord in coords {
            if let Some(mut chunk) = self.active.remove(&coord) {
                self.persist.on_unload(coord, &chunk.buffer, &chunk.meta);
                Self::release_chunk_mesh(self.meshes.as_mut(), &mut self.mesh_cache, &mut chunk);
                Self::detach_collider(self.colliders.as_mut(), &mut chunk);
            }
        }
        self.mesh_cache.drain_all(self.meshes.as_mut());
        self.persist
            .shutdown(self.config.persistence.worker_join_timeout_ms);
    }

    // ========================
    // Shared helpers
    // ========================

    fn release_chunk_mesh(
        meshes: &mut dyn MeshAllocator,
        cache: &mut MeshCache,
        chunk: &mut Chunk,
    ) {
        if let Some(key) = chunk.mesh_cache_key.take() {
            cache.release(key);
        } else if let Some(handle) = chunk.mesh.take() {
            meshes.destroy(handle);
        }
        chunk.mesh = None;
    }

    fn detach_collider(colliders: &mut dyn ColliderBackend, chunk: &mut Chunk) {
        if let Some(collider) = chunk.collider.take() {
            colliders.detach(collider);
        }
        chunk.physics_enabled = false;
    }

    fn attach_collider_if_near(
        colliders: &mut dyn ColliderBackend,
        chunk: &mut Chunk,
        center: ChunkCoord,
        physics_radius: i32,
    ) {
        Self::detach_collider(colliders, chunk);
        if chunk.coord.horizontal_chebyshev(center) <= physics_radius {
            if let Some(mesh) = chunk.mesh {
                chunk.collider = Some(colliders.attach(chunk.coord, mesh));
                chunk.physics_enabled = true;
            }
        }
    }
}
