//! The chunk object: voxel and light arrays for one column, plus per-level mesh slots.

use crate::{
    coord::{
        ChunkCoord,
        ChunkShape,
        voxel_to_chunk,
        voxel_to_local,
        chunk_name,
    },
    owned_buf::OwnedBuf,
    voxel::{
        extract_id,
        extract_rotation,
        extract_stage,
        BlockRotation,
    },
    light::{
        extract_sunlight,
        LightColor,
    },
};
use std::fmt::{self, Formatter, Display};
use vek::*;


/// Per-level storage, one slot for each vertical mesh level of a chunk.
#[derive(Debug, Clone)]
pub struct PerLevel<M>(Vec<Option<M>>);

impl<M> PerLevel<M> {
    pub fn new(levels: u32) -> Self {
        PerLevel((0..levels).map(|_| None).collect())
    }

    pub fn get(&self, level: u32) -> Option<&M> {
        self.0.get(level as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, level: u32) -> Option<&mut M> {
        self.0.get_mut(level as usize).and_then(Option::as_mut)
    }

    /// Put a value in a level's slot, returning the previous one. Out of range levels are
    /// handed back.
    pub fn set(&mut self, level: u32, val: M) -> Option<M> {
        match self.0.get_mut(level as usize) {
            Some(slot) => slot.replace(val),
            None => Some(val),
        }
    }

    pub fn take(&mut self, level: u32) -> Option<M> {
        self.0.get_mut(level as usize).and_then(Option::take)
    }

    pub fn num_levels(&self) -> u32 {
        self.0.len() as u32
    }

    /// Iterate through occupied levels.
    pub fn iter(&self) -> impl Iterator<Item=(u32, &M)> + '_ {
        self.0.iter().enumerate().filter_map(|(i, m)| m.as_ref().map(|m| (i as u32, m)))
    }

    /// Remove and iterate through all occupied levels.
    pub fn drain(&mut self) -> impl Iterator<Item=(u32, M)> + '_ {
        self.0.iter_mut().enumerate().filter_map(|(i, m)| m.take().map(|m| (i as u32, m)))
    }
}


/// Error for a voxel or light array whose length doesn't match the chunk's volume.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SizeMismatch {
    pub what: &'static str,
    pub expected: usize,
    pub actual: usize,
}

impl Display for SizeMismatch {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "chunk {} array has length {}, expected {}",
            self.what, self.actual, self.expected,
        )
    }
}

impl std::error::Error for SizeMismatch {}


/// A loaded chunk column.
///
/// Voxel accessors take global voxel coordinates. Reads outside this chunk return 0, and writes
/// outside this chunk are ignored and return false.
#[derive(Debug)]
pub struct Chunk<M> {
    /// Server-assigned id.
    pub id: String,
    pub cc: ChunkCoord,
    pub shape: ChunkShape,
    voxels: OwnedBuf<u32>,
    lights: OwnedBuf<u32>,
    /// Displayed mesh per level.
    pub meshes: PerLevel<M>,
}

impl<M> Chunk<M> {
    /// Construct with all voxels and lights zero.
    pub fn new(id: String, cc: ChunkCoord, shape: ChunkShape) -> Self {
        Chunk {
            id,
            cc,
            shape,
            voxels: OwnedBuf::zeroed(shape.volume()),
            lights: OwnedBuf::zeroed(shape.volume()),
            meshes: PerLevel::new(shape.sub_chunks),
        }
    }

    /// Name used in logs, `"cx|cz"`.
    pub fn name(&self) -> String {
        chunk_name(self.cc)
    }

    /// Replace voxel and/or light arrays by moving the given buffers in.
    ///
    /// Checks both lengths before touching either array.
    pub fn set_data(
        &mut self,
        voxels: Option<OwnedBuf<u32>>,
        lights: Option<OwnedBuf<u32>>,
    ) -> Result<(), SizeMismatch> {
        let expected = self.shape.volume();
        for (what, buf) in [("voxel", &voxels), ("light", &lights)] {
            if let Some(buf) = buf {
                if buf.len() != expected {
                    return Err(SizeMismatch { what, expected, actual: buf.len() });
                }
            }
        }
        if let Some(voxels) = voxels {
            self.voxels = voxels;
        }
        if let Some(lights) = lights {
            self.lights = lights;
        }
        Ok(())
    }

    pub fn voxels(&self) -> &[u32] {
        &self.voxels
    }

    pub fn lights(&self) -> &[u32] {
        &self.lights
    }

    /// Array index for a global voxel coordinate, if it's in this chunk.
    pub fn index_of(&self, gtc: Vec3<i32>) -> Option<usize> {
        if voxel_to_chunk(gtc.x, gtc.z, self.shape.size) != self.cc {
            return None;
        }
        voxel_to_local(gtc, self.shape).map(|ltc| self.shape.ltc_to_index(ltc))
    }

    /// Whether the global voxel coordinate is in this chunk.
    pub fn contains(&self, gtc: Vec3<i32>) -> bool {
        self.index_of(gtc).is_some()
    }

    /// Raw voxel word, 0 if outside.
    pub fn raw_value(&self, gtc: Vec3<i32>) -> u32 {
        self.index_of(gtc).map(|i| self.voxels[i]).unwrap_or(0)
    }

    /// Overwrite raw voxel word. Returns false if outside.
    pub fn set_raw_value(&mut self, gtc: Vec3<i32>, voxel: u32) -> bool {
        match self.index_of(gtc) {
            Some(i) => {
                self.voxels[i] = voxel;
                true
            }
            None => false,
        }
    }

    /// Raw light word, 0 if outside.
    pub fn raw_light(&self, gtc: Vec3<i32>) -> u32 {
        self.index_of(gtc).map(|i| self.lights[i]).unwrap_or(0)
    }

    /// Overwrite raw light word. Returns false if outside.
    pub fn set_raw_light(&mut self, gtc: Vec3<i32>, light: u32) -> bool {
        match self.index_of(gtc) {
            Some(i) => {
                self.lights[i] = light;
                true
            }
            None => false,
        }
    }

    pub fn voxel_id(&self, gtc: Vec3<i32>) -> u32 {
        extract_id(self.raw_value(gtc))
    }

    pub fn voxel_rotation(&self, gtc: Vec3<i32>) -> BlockRotation {
        extract_rotation(self.raw_value(gtc))
    }

    pub fn voxel_stage(&self, gtc: Vec3<i32>) -> u32 {
        extract_stage(self.raw_value(gtc))
    }

    pub fn sunlight(&self, gtc: Vec3<i32>) -> u32 {
        extract_sunlight(self.raw_light(gtc))
    }

    pub fn torch_light(&self, gtc: Vec3<i32>, color: LightColor) -> u32 {
        color.extract(self.raw_light(gtc))
    }

    /// Mesh level containing voxel y.
    pub fn level_of(&self, vy: i32) -> Option<u32> {
        self.shape.level_of(vy)
    }
}


#[cfg(test)]
fn test_shape() -> ChunkShape {
    ChunkShape {
        size: 4,
        max_height: 8,
        sub_chunks: 2,
    }
}

#[test]
fn test_chunk_read_write() {
    let mut chunk = Chunk::<()>::new("a".into(), Vec2::new(-1, 2), test_shape());
    let inside = Vec3::new(-3, 5, 9);
    assert!(chunk.set_raw_value(inside, 0x00050007));
    assert_eq!(chunk.voxel_id(inside), 7);
    assert_eq!(chunk.voxel_rotation(inside), BlockRotation::new(5, 0));
    assert!(chunk.set_raw_light(inside, 0xf300));
    assert_eq!(chunk.sunlight(inside), 15);
    assert_eq!(chunk.torch_light(inside, LightColor::Red), 3);

    // neighboring chunk, and out of height
    let outside = Vec3::new(1, 5, 9);
    assert!(!chunk.set_raw_value(outside, 1));
    assert_eq!(chunk.raw_value(outside), 0);
    assert!(!chunk.set_raw_light(Vec3::new(-3, 8, 9), 1));
    assert_eq!(chunk.raw_light(Vec3::new(-3, -1, 9)), 0);
}

#[test]
fn test_set_data_checks_sizes() {
    let mut chunk = Chunk::<()>::new("a".into(), Vec2::new(0, 0), test_shape());
    let good = OwnedBuf::from_vec(vec![5u32; 128]);
    let bad = OwnedBuf::from_vec(vec![1u32; 3]);
    assert_eq!(
        chunk.set_data(Some(good.duplicate()), Some(bad)),
        Err(SizeMismatch { what: "light", expected: 128, actual: 3 }),
    );
    // failed call changes nothing
    assert!(chunk.voxels().iter().all(|&v| v == 0));
    assert_eq!(chunk.set_data(Some(good), None), Ok(()));
    assert_eq!(chunk.voxel_id(Vec3::new(1, 1, 1)), 5);
    assert!(chunk.lights().iter().all(|&l| l == 0));
}

#[test]
fn test_per_level() {
    let mut levels = PerLevel::new(3);
    assert_eq!(levels.set(1, 'a'), None);
    assert_eq!(levels.set(1, 'b'), Some('a'));
    assert_eq!(levels.set(5, 'c'), Some('c'));
    assert_eq!(levels.iter().collect::<Vec<_>>(), vec![(1, &'b')]);
    assert_eq!(levels.drain().collect::<Vec<_>>(), vec![(1, 'b')]);
    assert_eq!(levels.get(1), None);
}
