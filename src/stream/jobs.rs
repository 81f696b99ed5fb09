//! Background generation and meshing jobs.
//!
//! Jobs run on a shared rayon pool. Every job owns deep copies of its
//! inputs and writes only its own outputs, so mutating the live world
//! never races a worker. Generation results come back over a channel;
//! mesh results land in a mutex-guarded bin because completion polling
//! and queue drainage both happen scheduler-side.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::host::Filesystem;
use crate::mesh::{mesh_chunk, MeshData, MesherParams, NeighborSlabs};
use crate::persist::WorldPaths;
use crate::stream::lod::LodMode;
use crate::world::{ChunkCoord, ChunkGenerator, ChunkMeta, GenSlice, VoxelBuffer};

/// Immutable inputs shared by all generation jobs.
pub struct GenContext {
    pub fs: Arc<dyn Filesystem>,
    pub paths: WorldPaths,
    pub chunk_size: usize,
    pub generator: ChunkGenerator,
    pub generator_version: i32,
}

pub struct GenJobResult {
    pub coord: ChunkCoord,
    pub epoch: u64,
    /// Slice that just completed, within `0..slice_count`.
    pub slice_index: usize,
    pub slice_count: usize,
    pub buffer: VoxelBuffer,
    pub meta: ChunkMeta,
    pub from_snapshot: bool,
    pub elapsed_ms: f64,
}

impl GenJobResult {
    pub fn is_final_slice(&self) -> bool {
        self.slice_index + 1 >= self.slice_count
    }
}

pub struct MeshJobInput {
    pub coord: ChunkCoord,
    pub epoch: u64,
    /// Materials already downsampled to `size³`.
    pub materials: Vec<u16>,
    pub size: usize,
    pub neighbors: NeighborSlabs,
    pub params: MesherParams,
    pub mode: LodMode,
    /// Content key when all six neighbors were present at schedule time;
    /// the finished mesh is published to the cache under it.
    pub cache_key: Option<u64>,
}

pub struct MeshJobResult {
    pub coord: ChunkCoord,
    pub epoch: u64,
    pub lod_step: u32,
    pub mode: LodMode,
    pub cache_key: Option<u64>,
    pub mesh: MeshData,
    pub elapsed_ms: f64,
}

/// Shared worker pool plus the two completion paths.
pub struct JobPool {
    pool: ThreadPool,
    gen_tx: Sender<GenJobResult>,
    gen_rx: Receiver<GenJobResult>,
    mesh_done: Arc<Mutex<Vec<MeshJobResult>>>,
}

impl JobPool {
    pub fn new(worker_threads: usize) -> anyhow::Result<Self> {
        let threads = if worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1).max(1))
                .unwrap_or(2)
        } else {
            worker_threads
        };
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("terravox-worker-{i}"))
            .panic_handler(|payload| {
                let msg = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("unknown panic");
                log::error!("worker job panicked: {msg}");
            })
            .build()
            .map_err(|e| anyhow::anyhow!("worker pool: {e}"))?;

        let (gen_tx, gen_rx) = unbounded();
        Ok(Self {
            pool,
            gen_tx,
            gen_rx,
            mesh_done: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Starts one generation slice. The first slice of a chunk consults
    /// the snapshot store before generating; a snapshot hit returns the
    /// whole buffer at once.
    pub fn spawn_gen(
        &self,
        ctx: Arc<GenContext>,
        coord: ChunkCoord,
        epoch: u64,
        slice_index: usize,
        slice_count: usize,
        buffer: VoxelBuffer,
    ) {
        let tx = self.gen_tx.clone();
        self.pool.spawn(move || {
            let start = Instant::now();
            let mut buffer = buffer;
            let volume = buffer.volume();
            let slice_count = slice_count.clamp(1, volume);

            let mut from_snapshot = false;
            let mut meta = ChunkMeta::generated(ctx.generator_version);
            let mut slice_index = slice_index;

            if slice_index == 0 {
                if let Some((loaded, loaded_meta)) = try_load_snapshot(&ctx, coord) {
                    buffer = loaded;
                    meta = loaded_meta;
                    from_snapshot = true;
                    slice_index = slice_count - 1;
                }
            }

            if !from_snapshot {
                let per_slice = volume.div_ceil(slice_count);
                let start_idx = slice_index * per_slice;
                let count = per_slice.min(volume.saturating_sub(start_idx));
                ctx.generator.generate_slice(
                    &mut buffer,
                    coord,
                    GenSlice {
                        start: start_idx,
                        count,
                    },
                );
            }

            let result = GenJobResult {
                coord,
                epoch,
                slice_index,
                slice_count,
                buffer,
                meta,
                from_snapshot,
                elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            };
            // The receiver only disappears at shutdown.
            let _ = tx.send(result);
        });
    }

    pub fn spawn_mesh(&self, input: MeshJobInput) {
        let done = self.mesh_done.clone();
        self.pool.spawn(move || {
            let start = Instant::now();
            let mesh = mesh_chunk(&input.materials, input.size, &input.neighbors, &input.params);
            let result = MeshJobResult {
                coord: input.coord,
                epoch: input.epoch,
                lod_step: input.params.lod_step,
                mode: input.mode,
                cache_key: input.cache_key,
                mesh,
                elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            };
            done.lock().push(result);
        });
    }

    /// Non-blocking drain of completed generation slices.
    pub fn drain_gen(&self) -> Vec<GenJobResult> {
        self.gen_rx.try_iter().collect()
    }

    /// Non-blocking drain of completed mesh jobs.
    pub fn drain_mesh(&self) -> Vec<MeshJobResult> {
        std::mem::take(&mut *self.mesh_done.lock())
    }
}

fn try_load_snapshot(ctx: &GenContext, coord: ChunkCoord) -> Option<(VoxelBuffer, ChunkMeta)> {
    let path = ctx.paths.snapshot_path(coord);
    if !ctx.fs.exists(&path) {
        return None;
    }
    let bytes = match ctx.fs.read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::error!("snapshot read {} failed: {e}", path.display());
            return None;
        }
    };
    match crate::codec::decode_snapshot(&bytes, ctx.chunk_size) {
        Ok((_, buffer, meta)) => Some((buffer, meta)),
        Err(crate::codec::CodecError::SizeMismatch { .. }) => None,
        Err(e) => {
            log::error!("snapshot {} unreadable: {e}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryFilesystem;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx(fs: Arc<MemoryFilesystem>) -> Arc<GenContext> {
        let sampler: Arc<dyn crate::world::HeightSampler> = Arc::new(|_: f32, _: f32| 0.6);
        Arc::new(GenContext {
            fs,
            paths: WorldPaths::new(Path::new("saves"), "w", 32),
            chunk_size: 2,
            generator: ChunkGenerator::new(sampler, 1, 1.0),
            generator_version: 1,
        })
    }

    fn wait_gen(pool: &JobPool) -> Vec<GenJobResult> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let results = pool.drain_gen();
            if !results.is_empty() {
                return results;
            }
            assert!(Instant::now() < deadline, "gen job never completed");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn gen_job_fills_from_height_sampler() {
        let pool = JobPool::new(2).unwrap();
        let fs = Arc::new(MemoryFilesystem::new());
        pool.spawn_gen(ctx(fs), ChunkCoord::ZERO, 0, 0, 1, VoxelBuffer::new(2));

        let mut results = wait_gen(&pool);
        let result = results.remove(0);
        assert!(result.is_final_slice());
        assert!(!result.from_snapshot);
        // floor(0.6) = 0: the y=0 layer is solid, y=1 air.
        assert_eq!(result.buffer.solid_count(), 4);
    }

    #[test]
    fn gen_job_prefers_snapshot_when_present() {
        let fs = Arc::new(MemoryFilesystem::new());
        let ctx = ctx(fs.clone());

        let mut stored = VoxelBuffer::new(2);
        stored.set(0, 0, 0, 9);
        let bytes = crate::codec::encode_snapshot(
            ChunkCoord::ZERO,
            &stored,
            &ChunkMeta::generated(1),
            true,
        );
        fs.write_atomic(&ctx.paths.snapshot_path(ChunkCoord::ZERO), &bytes)
            .unwrap();

        let pool = JobPool::new(2).unwrap();
        pool.spawn_gen(ctx, ChunkCoord::ZERO, 0, 0, 4, VoxelBuffer::new(2));

        let mut results = wait_gen(&pool);
        let result = results.remove(0);
        assert!(result.from_snapshot);
        assert!(result.is_final_slice());
        assert_eq!(result.buffer.get(0, 0, 0), 9);
    }

    #[test]
    fn mesh_job_returns_through_mutex_bin() {
        let pool = JobPool::new(2).unwrap();
        pool.spawn_mesh(MeshJobInput {
            coord: ChunkCoord::ZERO,
            epoch: 3,
            materials: vec![1; 8],
            size: 2,
            neighbors: [None, None, None, None, None, None],
            params: MesherParams::default(),
            mode: LodMode::Mesh,
            cache_key: Some(42),
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let results = pool.drain_mesh();
            if let Some(result) = results.into_iter().next() {
                assert_eq!(result.epoch, 3);
                assert_eq!(result.cache_key, Some(42));
                assert_eq!(result.mesh.vertex_count(), 24);
                break;
            }
            assert!(Instant::now() < deadline, "mesh job never completed");
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}
