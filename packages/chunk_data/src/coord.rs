//! Chunk and voxel coordinate conversion.

use vek::*;


/// Chunk coordinate. The chunk column at `cc` spans voxel x in
/// `cc.x * size..(cc.x + 1) * size` and likewise for z, and the whole world height in y.
pub type ChunkCoord = Vec2<i32>;

/// Separator between x and z in a chunk's name.
pub const NAME_SEPARATOR: char = '|';


/// Dimensions shared by all chunks of a world.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ChunkShape {
    /// Width of a chunk along x and z, in voxels.
    pub size: u32,
    /// Height of a chunk along y, in voxels.
    pub max_height: u32,
    /// Number of vertical levels a chunk is split into for meshing.
    pub sub_chunks: u32,
}

impl ChunkShape {
    /// Number of voxels in one chunk.
    pub fn volume(self) -> usize {
        self.size as usize * self.max_height as usize * self.size as usize
    }

    /// Height of a single mesh level, in voxels.
    pub fn level_height(self) -> u32 {
        (self.max_height / self.sub_chunks.max(1)).max(1)
    }

    /// Mesh level containing the given voxel y, or `None` if outside the world's height.
    pub fn level_of(self, vy: i32) -> Option<u32> {
        if vy < 0 || vy as u32 >= self.max_height {
            return None;
        }
        Some((vy as u32 / self.level_height()).min(self.sub_chunks.saturating_sub(1)))
    }

    /// Voxel y range covered by the given mesh level.
    pub fn level_range(self, level: u32) -> std::ops::Range<u32> {
        let lo = level * self.level_height();
        let hi =
            if level + 1 >= self.sub_chunks { self.max_height }
            else { lo + self.level_height() };
        lo..hi
    }

    /// Array index of a local coordinate, in `[x][y][z]` order. Panics if out of range.
    pub fn ltc_to_index(self, ltc: Vec3<u32>) -> usize {
        assert!(ltc.x < self.size, "local x out of range");
        assert!(ltc.y < self.max_height, "local y out of range");
        assert!(ltc.z < self.size, "local z out of range");
        (ltc.x as usize * self.max_height as usize + ltc.y as usize) * self.size as usize
            + ltc.z as usize
    }
}

impl Default for ChunkShape {
    fn default() -> Self {
        ChunkShape {
            size: 16,
            max_height: 256,
            sub_chunks: 8,
        }
    }
}


/// Chunk containing the given voxel x/z.
pub fn voxel_to_chunk(vx: i32, vz: i32, size: u32) -> ChunkCoord {
    let size = size as i32;
    Vec2::new(vx.div_euclid(size), vz.div_euclid(size))
}

/// Voxel coordinate relative to the chunk that contains it. Returns `None` if `vy` is outside
/// the world's height.
pub fn voxel_to_local(gtc: Vec3<i32>, shape: ChunkShape) -> Option<Vec3<u32>> {
    if gtc.y < 0 || gtc.y as u32 >= shape.max_height {
        return None;
    }
    let size = shape.size as i32;
    Some(Vec3 {
        x: gtc.x.rem_euclid(size) as u32,
        y: gtc.y as u32,
        z: gtc.z.rem_euclid(size) as u32,
    })
}

/// Voxel coordinate of the minimum corner of a chunk.
pub fn chunk_origin(cc: ChunkCoord, size: u32) -> Vec2<i32> {
    cc * size as i32
}

/// Human-readable chunk name, `"cx|cz"`.
pub fn chunk_name(cc: ChunkCoord) -> String {
    format!("{}{}{}", cc.x, NAME_SEPARATOR, cc.y)
}

/// Parse a chunk name produced by `chunk_name`.
pub fn parse_chunk_name(name: &str) -> Option<ChunkCoord> {
    let (x, z) = name.split_once(NAME_SEPARATOR)?;
    Some(Vec2::new(x.parse().ok()?, z.parse().ok()?))
}

/// Squared euclidean distance between two chunk coordinates.
pub fn dist_sq(a: ChunkCoord, b: ChunkCoord) -> i64 {
    let dx = a.x as i64 - b.x as i64;
    let dz = a.y as i64 - b.y as i64;
    dx * dx + dz * dz
}


#[test]
fn test_voxel_to_chunk() {
    for vx in -40..40 {
        for vz in -40..40 {
            let cc = voxel_to_chunk(vx, vz, 16);
            let origin = chunk_origin(cc, 16);
            assert!(origin.x <= vx && vx < origin.x + 16);
            assert!(origin.y <= vz && vz < origin.y + 16);
        }
    }
    assert_eq!(voxel_to_chunk(-1, 0, 16), Vec2::new(-1, 0));
    assert_eq!(voxel_to_chunk(15, 16, 16), Vec2::new(0, 1));
}

#[test]
fn test_voxel_to_local() {
    let shape = ChunkShape::default();
    assert_eq!(voxel_to_local(Vec3::new(-1, 3, 17), shape), Some(Vec3::new(15, 3, 1)));
    assert_eq!(voxel_to_local(Vec3::new(0, -1, 0), shape), None);
    assert_eq!(voxel_to_local(Vec3::new(0, 256, 0), shape), None);
}

#[test]
fn test_chunk_name() {
    for x in -3..3 {
        for z in -3..3 {
            let cc = Vec2::new(x, z);
            assert_eq!(parse_chunk_name(&chunk_name(cc)), Some(cc));
        }
    }
    assert_eq!(chunk_name(Vec2::new(-2, 7)), "-2|7");
    assert_eq!(parse_chunk_name("1,2"), None);
}

#[test]
fn test_index_layout() {
    let shape = ChunkShape {
        size: 4,
        max_height: 8,
        sub_chunks: 2,
    };
    let mut seen = vec![false; shape.volume()];
    for x in 0..4 {
        for y in 0..8 {
            for z in 0..4 {
                let i = shape.ltc_to_index(Vec3::new(x, y, z));
                assert_eq!(i, (x * 8 * 4 + y * 4 + z) as usize);
                assert!(!seen[i]);
                seen[i] = true;
            }
        }
    }
    assert!(seen.into_iter().all(|b| b));
}

#[test]
fn test_levels() {
    let shape = ChunkShape {
        size: 16,
        max_height: 64,
        sub_chunks: 4,
    };
    assert_eq!(shape.level_of(0), Some(0));
    assert_eq!(shape.level_of(15), Some(0));
    assert_eq!(shape.level_of(16), Some(1));
    assert_eq!(shape.level_of(63), Some(3));
    assert_eq!(shape.level_of(64), None);
    assert_eq!(shape.level_of(-1), None);
    for level in 0..4 {
        for vy in shape.level_range(level) {
            assert_eq!(shape.level_of(vy as i32), Some(level));
        }
    }
}
