//! Asynchronous single-writer persistence stores.
//!
//! Each store owns one writer thread fed by an MPSC channel. The control
//! thread enqueues serialized records and never blocks; write failures are
//! logged and the chunk simply regenerates next session. Shutdown signals
//! the worker, joins it with a timeout, then flushes whatever is still
//! queued on the calling thread.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::codec::{decode_delta, decode_snapshot, encode_delta, encode_snapshot, CodecError};
use crate::host::Filesystem;
use crate::persist::paths::WorldPaths;
use crate::world::{ChunkCoord, ChunkMeta, DeltaEntry, MaterialId, VoxelBuffer};

enum WriteCommand {
    Write { path: PathBuf, bytes: Vec<u8> },
    Delete { path: PathBuf },
}

struct AsyncWriter {
    name: &'static str,
    tx: Sender<WriteCommand>,
    rx: Receiver<WriteCommand>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    fs: Arc<dyn Filesystem>,
}

impl AsyncWriter {
    fn spawn(name: &'static str, fs: Arc<dyn Filesystem>) -> anyhow::Result<Self> {
        let (tx, rx) = unbounded::<WriteCommand>();
        let stop = Arc::new(AtomicBool::new(false));

        let worker_rx = rx.clone();
        let worker_fs = fs.clone();
        let worker_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name(format!("terravox-{name}-writer"))
            .spawn(move || {
                while !worker_stop.load(Ordering::Relaxed) {
                    match worker_rx.recv_timeout(Duration::from_millis(50)) {
                        Ok(cmd) => execute(name, worker_fs.as_ref(), cmd),
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .with_context(|| format!("spawning {name} writer thread"))?;

        Ok(Self {
            name,
            tx,
            rx,
            stop,
            handle: Some(handle),
            fs,
        })
    }

    fn enqueue(&self, cmd: WriteCommand) {
        // Unbounded channel: never blocks the control thread. The only
        // failure is a disconnected worker after shutdown, where inline
        // execution keeps persistence correct.
        if self.tx.send(cmd).is_err() {
            log::warn!("{} store enqueued after shutdown", self.name);
        }
    }

    fn queue_depth(&self) -> usize {
        self.tx.len()
    }

    /// Stops the worker, joining up to `join_timeout_ms`; whatever is left
    /// in the queue is written inline by the caller.
    fn shutdown(&mut self, join_timeout_ms: u64) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let deadline = Instant::now() + Duration::from_millis(join_timeout_ms);
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                log::warn!(
                    "{} writer did not stop within {}ms, abandoning thread",
                    self.name,
                    join_timeout_ms
                );
            }
        }

        for cmd in self.rx.try_iter() {
            execute(self.name, self.fs.as_ref(), cmd);
        }
    }
}

impl Drop for AsyncWriter {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown(1000);
        }
    }
}

fn execute(name: &str, fs: &dyn Filesystem, cmd: WriteCommand) {
    match cmd {
        WriteCommand::Write { path, bytes } => {
            if let Some(parent) = path.parent() {
                if let Err(e) = fs.create_dir_all(parent) {
                    log::error!("{name} store: create {} failed: {e}", parent.display());
                    return;
                }
            }
            if let Err(e) = fs.write_atomic(&path, &bytes) {
                log::error!("{name} store: write {} failed: {e}", path.display());
            }
        }
        WriteCommand::Delete { path } => {
            if fs.exists(&path) {
                if let Err(e) = fs.delete(&path) {
                    log::error!("{name} store: delete {} failed: {e}", path.display());
                }
            }
        }
    }
}

/// What a snapshot load produced. Corrupted and size-mismatched records
/// read as absent so the chunk regenerates.
pub enum LoadOutcome<T> {
    Loaded(T),
    Absent,
}

/// Full chunk buffers on disk.
pub struct SnapshotStore {
    writer: AsyncWriter,
    paths: WorldPaths,
    chunk_size: usize,
    compress: bool,
}

impl SnapshotStore {
    pub fn new(
        fs: Arc<dyn Filesystem>,
        paths: WorldPaths,
        chunk_size: usize,
        compress: bool,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            writer: AsyncWriter::spawn("snapshot", fs)?,
            paths,
            chunk_size,
            compress,
        })
    }

    pub fn queue_depth(&self) -> usize {
        self.writer.queue_depth()
    }

    pub fn save(&self, coord: ChunkCoord, buffer: &VoxelBuffer, meta: &ChunkMeta) {
        let bytes = encode_snapshot(coord, buffer, meta, self.compress);
        self.writer.enqueue(WriteCommand::Write {
            path: self.paths.snapshot_path(coord),
            bytes,
        });
    }

    pub fn delete(&self, coord: ChunkCoord) {
        self.writer.enqueue(WriteCommand::Delete {
            path: self.paths.snapshot_path(coord),
        });
    }

    pub fn exists(&self, coord: ChunkCoord) -> bool {
        self.writer.fs.exists(&self.paths.snapshot_path(coord))
    }

    /// Reads and decodes the snapshot for a coord. Every failure mode maps
    /// to `Absent` after logging; the caller regenerates.
    pub fn load(&self, coord: ChunkCoord) -> LoadOutcome<(VoxelBuffer, ChunkMeta)> {
        let path = self.paths.snapshot_path(coord);
        if !self.writer.fs.exists(&path) {
            return LoadOutcome::Absent;
        }
        let bytes = match self.writer.fs.read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("snapshot read {} failed: {e}", path.display());
                return LoadOutcome::Absent;
            }
        };
        match decode_snapshot(&bytes, self.chunk_size) {
            Ok((stored_coord, buffer, meta)) => {
                if stored_coord != coord {
                    log::warn!("snapshot {} names coord {stored_coord}", path.display());
                }
                LoadOutcome::Loaded((buffer, meta))
            }
            Err(CodecError::SizeMismatch { stored, current }) => {
                log::debug!(
                    "snapshot {} has chunk size {stored}, current {current}; regenerating",
                    path.display()
                );
                LoadOutcome::Absent
            }
            Err(e) => {
                log::error!("snapshot {} unreadable: {e}", path.display());
                LoadOutcome::Absent
            }
        }
    }

    pub fn shutdown(&mut self, join_timeout_ms: u64) {
        self.writer.shutdown(join_timeout_ms);
    }
}

/// Sparse edit records on disk.
pub struct DeltaStore {
    writer: AsyncWriter,
    paths: WorldPaths,
    chunk_size: usize,
    compress: bool,
}

impl DeltaStore {
    pub fn new(
        fs: Arc<dyn Filesystem>,
        paths: WorldPaths,
        chunk_size: usize,
        compress: bool,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            writer: AsyncWriter::spawn("delta", fs)?,
            paths,
            chunk_size,
            compress,
        })
    }

    pub fn queue_depth(&self) -> usize {
        self.writer.queue_depth()
    }

    pub fn save(&self, coord: ChunkCoord, entries: &[DeltaEntry], meta: &ChunkMeta) {
        let bytes = encode_delta(coord, self.chunk_size, entries, meta, self.compress);
        self.writer.enqueue(WriteCommand::Write {
            path: self.paths.delta_path(coord),
            bytes,
        });
    }

    pub fn delete(&self, coord: ChunkCoord) {
        self.writer.enqueue(WriteCommand::Delete {
            path: self.paths.delta_path(coord),
        });
    }

    pub fn exists(&self, coord: ChunkCoord) -> bool {
        self.writer.fs.exists(&self.paths.delta_path(coord))
    }

    pub fn load(&self, coord: ChunkCoord) -> LoadOutcome<(HashMap<i32, MaterialId>, ChunkMeta)> {
        let path = self.paths.delta_path(coord);
        if !self.writer.fs.exists(&path) {
            return LoadOutcome::Absent;
        }
        let bytes = match self.writer.fs.read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("delta read {} failed: {e}", path.display());
                return LoadOutcome::Absent;
            }
        };
        match decode_delta(&bytes, self.chunk_size) {
            Ok((_, mapping, meta)) => LoadOutcome::Loaded((mapping, meta)),
            Err(CodecError::SizeMismatch { .. }) => LoadOutcome::Absent,
            Err(e) => {
                log::error!("delta {} unreadable: {e}", path.display());
                LoadOutcome::Absent
            }
        }
    }

    pub fn shutdown(&mut self, join_timeout_ms: u64) {
        self.writer.shutdown(join_timeout_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryFilesystem;
    use crate::world::SaveMode;
    use std::path::Path;

    fn paths() -> WorldPaths {
        WorldPaths::new(Path::new("saves"), "seed_9", 32)
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(cond(), "condition not reached in time");
    }

    #[test]
    fn snapshot_save_load_round_trip() {
        let fs = Arc::new(MemoryFilesystem::new());
        let mut store = SnapshotStore::new(fs.clone(), paths(), 4, true).unwrap();

        let coord = ChunkCoord::new(3, 0, -2);
        let mut buffer = VoxelBuffer::new(4);
        buffer.set(1, 1, 1, 6);
        let meta = ChunkMeta::generated(2);

        store.save(coord, &buffer, &meta);
        wait_for(|| store.exists(coord));

        match store.load(coord) {
            LoadOutcome::Loaded((loaded, loaded_meta)) => {
                assert_eq!(loaded, buffer);
                assert_eq!(loaded_meta, meta);
            }
            LoadOutcome::Absent => panic!("snapshot missing"),
        }
        store.shutdown(500);
    }

    #[test]
    fn corrupted_snapshot_reads_as_absent() {
        let fs = Arc::new(MemoryFilesystem::new());
        let mut store = SnapshotStore::new(fs.clone(), paths(), 4, false).unwrap();
        let coord = ChunkCoord::new(0, 0, 0);

        let path = paths().snapshot_path(coord);
        fs.write_atomic(&path, b"not a snapshot").unwrap();
        assert!(matches!(store.load(coord), LoadOutcome::Absent));
        store.shutdown(500);
    }

    #[test]
    fn shutdown_flushes_queued_writes() {
        let fs = Arc::new(MemoryFilesystem::new());
        let mut store = DeltaStore::new(fs.clone(), paths(), 4, false).unwrap();
        let meta = ChunkMeta {
            save_mode: SaveMode::DeltaBacked,
            generator_version: 1,
            last_sim_tick: 0,
            delta_count: 1,
            flags: Default::default(),
        };

        for i in 0..32 {
            store.save(ChunkCoord::new(i, 0, 0), &[(i, 5)], &meta);
        }
        store.shutdown(2000);

        for i in 0..32 {
            assert!(store.exists(ChunkCoord::new(i, 0, 0)));
        }
    }

    #[test]
    fn delete_removes_the_record() {
        let fs = Arc::new(MemoryFilesystem::new());
        let mut store = DeltaStore::new(fs.clone(), paths(), 4, false).unwrap();
        let meta = ChunkMeta::generated(1);
        let coord = ChunkCoord::new(1, 0, 1);

        store.save(coord, &[(0, 2)], &meta);
        wait_for(|| store.exists(coord));
        store.delete(coord);
        wait_for(|| !store.exists(coord));
        store.shutdown(500);
    }
}
