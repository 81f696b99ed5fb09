//! Adapter traits for everything the streaming core consumes from its
//! host: mesh allocation, collider and renderer toggles, clock, filesystem
//! and memory probes. Default std-backed implementations let the core run
//! headless, which is how the tests drive it.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::mesh::MeshData;
use crate::world::ChunkCoord;

/// Opaque handle to a mesh owned by the rendering backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub u64);

/// Opaque handle to a physics collider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColliderId(pub u64);

/// Allocates and fills mesh objects. Handles may be shared between many
/// chunks (the mesh cache hands the same handle to identical chunks);
/// `destroy` is called exactly once per handle, by whichever owner
/// releases it last.
pub trait MeshAllocator: Send {
    fn create(&mut self) -> MeshHandle;
    /// Replaces the vertex/index/normal/color streams of the mesh.
    fn upload(&mut self, handle: MeshHandle, data: &MeshData);
    fn destroy(&mut self, handle: MeshHandle);
}

/// Physics collider backend.
pub trait ColliderBackend: Send {
    fn attach(&mut self, coord: ChunkCoord, mesh: MeshHandle) -> ColliderId;
    fn detach(&mut self, collider: ColliderId);
    fn set_enabled(&mut self, collider: ColliderId, enabled: bool);
}

/// Renderer visibility backend, keyed by chunk coordinate.
pub trait RendererBackend: Send {
    fn set_chunk_visible(&mut self, coord: ChunkCoord, visible: bool);
}

/// Monotonic time plus the frame counter the scheduler advances once per
/// tick.
pub trait Clock: Send {
    fn seconds(&self) -> f64;
    fn frame(&self) -> u64;
    fn advance_frame(&mut self);
}

/// Filesystem access used by persistence. `write_atomic` must leave either
/// the old or the new file contents on disk, never a partial write.
pub trait Filesystem: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
    fn delete(&self, path: &Path) -> io::Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// Process and graphics memory probes driving adaptive throttling.
pub trait MemoryProbe: Send {
    fn process_mb(&mut self) -> f64;
    fn graphics_mb(&mut self) -> f64;
}

// ========================
// Std implementations
// ========================

/// Clock backed by `Instant`.
pub struct SystemClock {
    start: Instant,
    frame: u64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            frame: 0,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn frame(&self) -> u64 {
        self.frame
    }

    fn advance_frame(&mut self) {
        self.frame += 1;
    }
}

/// Real filesystem with temp-file-then-rename atomic writes.
pub struct StdFilesystem;

impl Filesystem for StdFilesystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);

        std::fs::write(&tmp, bytes)?;
        match std::fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(e) if cfg!(windows) && path.exists() => {
                // Windows rename does not replace; retry after removing the
                // destination.
                let _ = e;
                std::fs::remove_file(path)?;
                std::fs::rename(&tmp, path)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&tmp);
                Err(e)
            }
        }
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }
}

/// Process memory via `sysinfo`; graphics memory is reported as zero
/// because no portable probe exists (hosts with renderer insight supply
/// their own implementation).
pub struct SysinfoProbe {
    system: sysinfo::System,
    pid: sysinfo::Pid,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        use sysinfo::{PidExt, SystemExt};
        Self {
            system: sysinfo::System::new(),
            pid: sysinfo::Pid::from_u32(std::process::id()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn process_mb(&mut self) -> f64 {
        use sysinfo::{ProcessExt, ProcessRefreshKind, SystemExt};
        self.system
            .refresh_process_specifics(self.pid, ProcessRefreshKind::new());
        self.system
            .process(self.pid)
            .map(|p| p.memory() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0)
    }

    fn graphics_mb(&mut self) -> f64 {
        0.0
    }
}

// ========================
// Headless implementations
// ========================

/// Counts handles without uploading anywhere; lets the scheduler run
/// headless and gives tests visibility into alloc/destroy balance.
#[derive(Default)]
pub struct NullMeshAllocator {
    next: u64,
    pub live: std::collections::HashSet<u64>,
    pub uploads: u64,
}

impl MeshAllocator for NullMeshAllocator {
    fn create(&mut self) -> MeshHandle {
        self.next += 1;
        self.live.insert(self.next);
        MeshHandle(self.next)
    }

    fn upload(&mut self, _handle: MeshHandle, _data: &MeshData) {
        self.uploads += 1;
    }

    fn destroy(&mut self, handle: MeshHandle) {
        self.live.remove(&handle.0);
    }
}

#[derive(Default)]
pub struct NullColliderBackend {
    next: u64,
    pub enabled: std::collections::HashMap<u64, bool>,
}

impl ColliderBackend for NullColliderBackend {
    fn attach(&mut self, _coord: ChunkCoord, _mesh: MeshHandle) -> ColliderId {
        self.next += 1;
        self.enabled.insert(self.next, true);
        ColliderId(self.next)
    }

    fn detach(&mut self, collider: ColliderId) {
        self.enabled.remove(&collider.0);
    }

    fn set_enabled(&mut self, collider: ColliderId, enabled: bool) {
        if let Some(slot) = self.enabled.get_mut(&collider.0) {
            *slot = enabled;
        }
    }
}

#[derive(Default)]
pub struct NullRendererBackend {
    pub hidden: std::collections::HashSet<ChunkCoord>,
}

impl RendererBackend for NullRendererBackend {
    fn set_chunk_visible(&mut self, coord: ChunkCoord, visible: bool) {
        if visible {
            self.hidden.remove(&coord);
        } else {
            self.hidden.insert(coord);
        }
    }
}

/// Manually driven clock for tests.
pub struct ManualClock {
    pub now: f64,
    pub frame: u64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { now: 0.0, frame: 0 }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn seconds(&self) -> f64 {
        self.now
    }

    fn frame(&self) -> u64 {
        self.frame
    }

    fn advance_frame(&mut self) {
        self.frame += 1;
    }
}

/// In-memory filesystem for persistence tests and headless runs.
#[derive(Default)]
pub struct MemoryFilesystem {
    files: Mutex<std::collections::HashMap<std::path::PathBuf, Vec<u8>>>,
    writes: AtomicU64,
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }
}

impl Filesystem for MemoryFilesystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        self.files.lock().insert(path.to_path_buf(), bytes.to_vec());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        self.files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    fn create_dir_all(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// Fixed-value probe for tests.
pub struct FixedMemoryProbe {
    pub process_mb: f64,
    pub graphics_mb: f64,
}

impl MemoryProbe for FixedMemoryProbe {
    fn process_mb(&mut self) -> f64 {
        self.process_mb
    }

    fn graphics_mb(&mut self) -> f64 {
        self.graphics_mb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_filesystem_round_trips() {
        let fs = MemoryFilesystem::new();
        let path = Path::new("worlds/test/a.tvx");
        assert!(!fs.exists(path));
        fs.write_atomic(path, b"abc").unwrap();
        assert!(fs.exists(path));
        assert_eq!(fs.read(path).unwrap(), b"abc");
        fs.delete(path).unwrap();
        assert!(!fs.exists(path));
    }

    #[test]
    fn std_filesystem_atomic_write_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk.tvx");
        let fs = StdFilesystem;
        fs.write_atomic(&path, b"one").unwrap();
        fs.write_atomic(&path, b"two").unwrap();
        assert_eq!(fs.read(&path).unwrap(), b"two");
        // The temp file must not linger.
        assert!(!path.with_extension("tvx.tmp").exists());
    }

    #[test]
    fn null_allocator_balances_handles() {
        let mut alloc = NullMeshAllocator::default();
        let h = alloc.create();
        assert_eq!(alloc.live.len(), 1);
        alloc.destroy(h);
        assert!(alloc.live.is_empty());
    }
}
