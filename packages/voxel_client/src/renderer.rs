//! Interface to whatever displays chunk meshes.

use chunk_data::ChunkCoord;
use protocol::LevelMesh;
use std::collections::{
    HashMap,
    HashSet,
};


/// Displays chunk meshes.
///
/// The world hands finished level meshes over and keeps whatever handle the renderer returns
/// for them in the chunk, giving it back when the mesh is superseded or the chunk is evicted.
pub trait ChunkRenderer {
    /// Handle to an uploaded level mesh.
    type Level;

    /// Take ownership of a finished mesh for one level of a chunk.
    fn upload_level(&mut self, cc: ChunkCoord, mesh: LevelMesh) -> Self::Level;

    /// Release a level mesh which has been superseded or whose chunk was evicted.
    fn dispose_level(&mut self, cc: ChunkCoord, level: u32, handle: Self::Level);

    /// Start displaying a newly loaded chunk.
    fn add_chunk(&mut self, cc: ChunkCoord);

    /// Stop displaying an evicted chunk.
    fn dispose_chunk(&mut self, cc: ChunkCoord);
}

/// Renderer which discards everything.
#[derive(Debug, Default, Copy, Clone)]
pub struct NullRenderer;

impl ChunkRenderer for NullRenderer {
    type Level = ();

    fn upload_level(&mut self, _: ChunkCoord, _: LevelMesh) {}

    fn dispose_level(&mut self, _: ChunkCoord, _: u32, (): ()) {}

    fn add_chunk(&mut self, _: ChunkCoord) {}

    fn dispose_chunk(&mut self, _: ChunkCoord) {}
}


/// Size of an uploaded level mesh.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct LevelStats {
    /// Upload number, unique per renderer.
    pub upload: u64,
    pub geometries: usize,
    pub vertices: usize,
}

/// Renderer which only keeps track of what it's displaying, for headless clients.
#[derive(Debug, Default)]
pub struct CountingRenderer {
    /// Chunks being displayed.
    pub chunks: HashSet<ChunkCoord>,
    /// Level meshes uploaded and not yet disposed.
    pub levels: HashMap<(ChunkCoord, u32), LevelStats>,
    /// Total level meshes ever uploaded.
    pub uploads: u64,
    /// Total level meshes ever disposed.
    pub disposals: u64,
}

impl CountingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total vertices across all level meshes being displayed.
    pub fn vertex_count(&self) -> usize {
        self.levels.values().map(|stats| stats.vertices).sum()
    }
}

impl ChunkRenderer for CountingRenderer {
    type Level = LevelStats;

    fn upload_level(&mut self, cc: ChunkCoord, mesh: LevelMesh) -> LevelStats {
        self.uploads += 1;
        let stats = LevelStats {
            upload: self.uploads,
            geometries: mesh.geometries.len(),
            vertices: mesh.geometries.iter().map(|g| g.num_vertices()).sum(),
        };
        self.levels.insert((cc, mesh.level), stats);
        stats
    }

    fn dispose_level(&mut self, cc: ChunkCoord, level: u32, handle: LevelStats) {
        // a replacement may already have been uploaded
        if self.levels.get(&(cc, level)) == Some(&handle) {
            self.levels.remove(&(cc, level));
        }
        self.disposals += 1;
    }

    fn add_chunk(&mut self, cc: ChunkCoord) {
        self.chunks.insert(cc);
    }

    fn dispose_chunk(&mut self, cc: ChunkCoord) {
        self.chunks.remove(&cc);
    }
}
