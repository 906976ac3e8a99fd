//! Building meshes for chunk levels on a worker pool.
//!
//! Every solid voxel face that isn't hidden by an opaque neighbor becomes a quad. Quads are
//! grouped into one geometry per (block id, face direction), split further if a geometry would
//! overflow 16-bit indices. Voxels outside the chunk are treated as air, so faces on chunk
//! borders are always meshed.

use crate::{
    worker_pool::Worker,
    mesh_pipeline::MeshKey,
};
use chunk_data::{
    Chunk,
    ChunkShape,
    OwnedBuf,
    chunk_origin,
    extract_id,
    insert_ao,
    MAX_AO,
};
use protocol::{
    LevelMesh,
    Geometry,
};
use std::{
    collections::{
        BTreeMap,
        HashSet,
    },
    ops::Range,
};
use vek::*;
use anyhow::{
    Result,
    ensure,
};


/// Configuration broadcast to mesh workers.
#[derive(Debug, Clone, Default)]
pub struct MesherConfig {
    /// Block ids which don't hide the faces of their neighbors, such as glass or leaves.
    pub see_through: Vec<u32>,
}


/// Direction a voxel face points.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Face {
    PosX,
    NegX,
    PosY,
    NegY,
    PosZ,
    NegZ,
}

/// All faces.
pub const FACES: [Face; 6] = [
    Face::PosX,
    Face::NegX,
    Face::PosY,
    Face::NegY,
    Face::PosZ,
    Face::NegZ,
];

impl Face {
    pub fn to_vec(self) -> Vec3<i32> {
        match self {
            Face::PosX => Vec3::new(1, 0, 0),
            Face::NegX => Vec3::new(-1, 0, 0),
            Face::PosY => Vec3::new(0, 1, 0),
            Face::NegY => Vec3::new(0, -1, 0),
            Face::PosZ => Vec3::new(0, 0, 1),
            Face::NegZ => Vec3::new(0, 0, -1),
        }
    }

    /// Name put in the geometry's `face_name`.
    pub fn name(self) -> &'static str {
        match self {
            Face::PosX => "px",
            Face::NegX => "nx",
            Face::PosY => "py",
            Face::NegY => "ny",
            Face::PosZ => "pz",
            Face::NegZ => "nz",
        }
    }

    /// Quad corners relative to the voxel's minimum corner, counter-clockwise when viewed from
    /// outside.
    pub fn corners(self) -> [Vec3<i32>; 4] {
        let c = |x, y, z| Vec3::new(x, y, z);
        match self {
            Face::PosX => [c(1, 0, 0), c(1, 1, 0), c(1, 1, 1), c(1, 0, 1)],
            Face::NegX => [c(0, 0, 1), c(0, 1, 1), c(0, 1, 0), c(0, 0, 0)],
            Face::PosY => [c(0, 1, 0), c(0, 1, 1), c(1, 1, 1), c(1, 1, 0)],
            Face::NegY => [c(0, 0, 0), c(1, 0, 0), c(1, 0, 1), c(0, 0, 1)],
            Face::PosZ => [c(1, 0, 1), c(1, 1, 1), c(0, 1, 1), c(0, 0, 1)],
            Face::NegZ => [c(0, 0, 0), c(0, 1, 0), c(1, 1, 0), c(1, 0, 0)],
        }
    }
}

const CORNER_UVS: [[f32; 2]; 4] = [[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0]];

const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

// most vertices one geometry can index with u16 indices
const MAX_GEOMETRY_VERTICES: usize = u16::MAX as usize + 1;


/// Voxels and lights of one chunk level, plus one voxel of margin above and below so that faces
/// on the level's boundary can be culled.
#[derive(Debug)]
pub struct MeshInput {
    pub key: MeshKey,
    pub generation: u64,
    pub shape: ChunkShape,
    /// Voxel y range to mesh.
    pub level_range: Range<u32>,
    /// Voxel y of the first layer of the copied slab.
    pub slab_y: u32,
    /// Height of the copied slab.
    pub slab_height: u32,
    /// `[x][y - slab_y][z]` order.
    pub voxels: OwnedBuf<u32>,
    /// `[x][y - slab_y][z]` order.
    pub lights: OwnedBuf<u32>,
}

impl MeshInput {
    /// Copy the part of a chunk needed to mesh one of its levels.
    pub fn from_chunk<M>(chunk: &Chunk<M>, key: MeshKey, generation: u64) -> Self {
        let shape = chunk.shape;
        let level_range = shape.level_range(key.level);
        let slab_y = level_range.start.saturating_sub(1);
        let slab_end = (level_range.end + 1).min(shape.max_height);
        let slab_height = slab_end.saturating_sub(slab_y);

        let slab_volume = shape.size as usize * slab_height as usize * shape.size as usize;
        let mut voxels = Vec::with_capacity(slab_volume);
        let mut lights = Vec::with_capacity(slab_volume);
        for x in 0..shape.size {
            let start = shape.ltc_to_index(Vec3::new(x, slab_y, 0));
            let end = start + slab_height as usize * shape.size as usize;
            voxels.extend_from_slice(&chunk.voxels()[start..end]);
            lights.extend_from_slice(&chunk.lights()[start..end]);
        }

        MeshInput {
            key,
            generation,
            shape,
            level_range,
            slab_y,
            slab_height,
            voxels: voxels.into(),
            lights: lights.into(),
        }
    }

    // array index of a chunk-local coordinate, if it's in the slab
    fn index(&self, ltc: Vec3<i32>) -> Option<usize> {
        let size = self.shape.size as i32;
        let y = ltc.y - self.slab_y as i32;
        if ltc.x < 0 || ltc.x >= size
            || ltc.z < 0 || ltc.z >= size
            || y < 0 || y >= self.slab_height as i32
        {
            return None;
        }
        Some((ltc.x as usize * self.slab_height as usize + y as usize) * size as usize
            + ltc.z as usize)
    }

    fn voxel(&self, ltc: Vec3<i32>) -> u32 {
        self.index(ltc).map(|i| self.voxels[i]).unwrap_or(0)
    }

    fn light(&self, ltc: Vec3<i32>) -> Option<u32> {
        self.index(ltc).map(|i| self.lights[i])
    }
}

/// Built mesh for one chunk level.
#[derive(Debug)]
pub struct MeshOutput {
    pub key: MeshKey,
    pub generation: u64,
    pub mesh: LevelMesh,
}


/// Worker which meshes chunk levels.
#[derive(Debug, Default)]
pub struct MeshWorker {
    see_through: HashSet<u32>,
}

impl MeshWorker {
    pub fn new(config: MesherConfig) -> Self {
        let mut worker = MeshWorker::default();
        worker.configure(config);
        worker
    }

    // whether the block id hides faces behind it
    fn is_opaque(&self, id: u32) -> bool {
        id != 0 && !self.see_through.contains(&id)
    }

    // whether a face of a block with id1 is visible against a neighbor with id2
    fn face_visible(&self, id1: u32, id2: u32) -> bool {
        !self.is_opaque(id2) && id1 != id2
    }

    /// Mesh a chunk level.
    pub fn mesh(&self, input: &MeshInput) -> LevelMesh {
        let origin = chunk_origin(input.key.cc, input.shape.size);
        let mut builders: BTreeMap<(u32, Face), Vec<GeometryBuilder>> = BTreeMap::new();

        for x in 0..input.shape.size as i32 {
            for y in input.level_range.clone() {
                for z in 0..input.shape.size as i32 {
                    let ltc1 = Vec3::new(x, y as i32, z);
                    let id1 = extract_id(input.voxel(ltc1));
                    if id1 == 0 {
                        continue;
                    }

                    for face in FACES {
                        // skip if hidden
                        let ltc2 = ltc1 + face.to_vec();
                        let id2 = extract_id(input.voxel(ltc2));
                        if !self.face_visible(id1, id2) {
                            continue;
                        }

                        // light comes from the voxel the face is facing into
                        let light = input.light(ltc2)
                            .or_else(|| input.light(ltc1))
                            .unwrap_or(0);
                        let mut vert_lights = [0; 4];
                        for (i, corner) in face.corners().into_iter().enumerate() {
                            let ao = MAX_AO - self.occlusion(input, ltc2, face, corner);
                            vert_lights[i] = insert_ao(light, ao);
                        }

                        let geometries = builders.entry((id1, face)).or_default();
                        match geometries.last_mut() {
                            Some(builder) if builder.has_room() => {
                                builder.push_quad(origin, ltc1, face, vert_lights);
                            }
                            _ => {
                                let mut builder = GeometryBuilder::new(id1, face);
                                builder.push_quad(origin, ltc1, face, vert_lights);
                                geometries.push(builder);
                            }
                        }
                    }
                }
            }
        }

        LevelMesh {
            level: input.key.level,
            geometries: builders
                .into_values()
                .flatten()
                .map(GeometryBuilder::finish)
                .collect(),
        }
    }

    // occlusion level of a face corner from 0 through 3, given the voxel the face faces into
    fn occlusion(&self, input: &MeshInput, ltc2: Vec3<i32>, face: Face, corner: Vec3<i32>) -> u32 {
        let normal = face.to_vec().into_array();
        let corner = corner.into_array();
        // the two directions along the face towards this corner
        let mut sides = [[0; 3]; 2];
        let mut n = 0;
        for axis in 0..3 {
            if normal[axis] == 0 {
                sides[n][axis] = if corner[axis] == 1 { 1 } else { -1 };
                n += 1;
            }
        }
        let [side_a, side_b] = sides.map(|[x, y, z]| Vec3::new(x, y, z));
        let opaque = |ltc: Vec3<i32>| self.is_opaque(extract_id(input.voxel(ltc))) as u32;
        let a = opaque(ltc2 + side_a);
        let b = opaque(ltc2 + side_b);
        let c = opaque(ltc2 + side_a + side_b);
        let ab = a * b;
        3 * ab + (a + b + c) * (1 - ab)
    }
}

// geometry under construction
struct GeometryBuilder {
    voxel: u32,
    face: Face,
    positions: Vec<f32>,
    uvs: Vec<f32>,
    indices: Vec<u16>,
    lights: Vec<i32>,
}

impl GeometryBuilder {
    fn new(voxel: u32, face: Face) -> Self {
        GeometryBuilder {
            voxel,
            face,
            positions: Vec::new(),
            uvs: Vec::new(),
            indices: Vec::new(),
            lights: Vec::new(),
        }
    }

    fn num_vertices(&self) -> usize {
        self.positions.len() / 3
    }

    fn has_room(&self) -> bool {
        self.num_vertices() + 4 <= MAX_GEOMETRY_VERTICES
    }

    fn push_quad(&mut self, origin: Vec2<i32>, ltc: Vec3<i32>, face: Face, lights: [u32; 4]) {
        let base = self.num_vertices() as u16;
        for ((corner, uv), light) in face.corners().into_iter().zip(CORNER_UVS).zip(lights) {
            let pos = ltc + corner;
            self.positions.extend([
                (origin.x + pos.x) as f32,
                pos.y as f32,
                (origin.y + pos.z) as f32,
            ]);
            self.uvs.extend(uv);
            self.lights.push(light as i32);
        }
        self.indices.extend(QUAD_INDICES.map(|i| base + i));
    }

    fn finish(self) -> Geometry {
        Geometry {
            voxel: self.voxel,
            face_name: Some(self.face.name().to_owned()),
            positions: self.positions.into(),
            uvs: self.uvs.into(),
            indices: self.indices.into(),
            lights: self.lights.into(),
        }
    }
}

impl Worker for MeshWorker {
    type Msg = MeshInput;
    type Out = MeshOutput;
    type Config = MesherConfig;

    fn handle(&mut self, input: MeshInput) -> Result<MeshOutput> {
        let size = input.shape.size as usize;
        let expected = size * input.slab_height as usize * size;
        ensure!(
            input.voxels.len() == expected && input.lights.len() == expected,
            "mesh input for {} has wrong slab size",
            input.key,
        );
        Ok(MeshOutput {
            key: input.key,
            generation: input.generation,
            mesh: self.mesh(&input),
        })
    }

    fn configure(&mut self, config: MesherConfig) {
        self.see_through = config.see_through.into_iter().collect();
    }
}


#[cfg(test)]
fn test_chunk(voxels: &[(i32, i32, i32, u32)]) -> Chunk<()> {
    let shape = ChunkShape {
        size: 4,
        max_height: 8,
        sub_chunks: 2,
    };
    let mut chunk = Chunk::new("test".into(), Vec2::new(1, 0), shape);
    for &(x, y, z, voxel) in voxels {
        assert!(chunk.set_raw_value(Vec3::new(4 + x, y, z), voxel));
    }
    chunk
}

#[cfg(test)]
fn mesh_level(chunk: &Chunk<()>, level: u32, config: MesherConfig) -> LevelMesh {
    let input = MeshInput::from_chunk(chunk, MeshKey::new(chunk.cc, level), 1);
    MeshWorker::new(config).handle(input).unwrap().mesh
}

#[cfg(test)]
fn face_count(mesh: &LevelMesh) -> usize {
    mesh.geometries.iter().map(|g| g.num_vertices() / 4).sum()
}

#[test]
fn test_lone_voxel() {
    let chunk = test_chunk(&[(1, 1, 1, 5)]);
    let mesh = mesh_level(&chunk, 0, MesherConfig::default());
    assert_eq!(mesh.level, 0);
    assert_eq!(mesh.geometries.len(), 6);
    for geometry in &mesh.geometries {
        assert_eq!(geometry.voxel, 5);
        assert_eq!(geometry.num_vertices(), 4);
        assert_eq!(geometry.uvs.len(), 8);
        assert_eq!(geometry.indices.as_slice(), &QUAD_INDICES);
        assert_eq!(geometry.lights.len(), 4);
    }
    let names: Vec<&str> = mesh.geometries
        .iter()
        .filter_map(|g| g.face_name.as_deref())
        .collect();
    assert_eq!(names, ["px", "nx", "py", "ny", "pz", "nz"]);

    // positions are in world space
    let px = &mesh.geometries[0];
    assert_eq!(&px.positions[..3], &[6.0, 1.0, 1.0]);

    // nothing touches it, so nothing is occluded
    for geometry in &mesh.geometries {
        for &light in geometry.lights.iter() {
            assert_eq!(chunk_data::extract_ao(light as u32), MAX_AO);
        }
    }

    assert!(mesh_level(&chunk, 1, MesherConfig::default()).geometries.is_empty());
}

#[test]
fn test_hidden_faces_culled() {
    let chunk = test_chunk(&[(1, 1, 1, 5), (2, 1, 1, 5)]);
    let mesh = mesh_level(&chunk, 0, MesherConfig::default());
    assert_eq!(face_count(&mesh), 10);

    let chunk = test_chunk(&[(1, 1, 1, 5), (2, 1, 1, 6)]);
    let mesh = mesh_level(&chunk, 0, MesherConfig::default());
    assert_eq!(face_count(&mesh), 10);
    let mesh = mesh_level(&chunk, 0, MesherConfig { see_through: vec![6] });
    assert_eq!(face_count(&mesh), 11);
}

#[test]
fn test_level_boundary_culled() {
    // level 0 is y 0..4, level 1 is y 4..8
    let chunk = test_chunk(&[(1, 3, 1, 5), (1, 4, 1, 5)]);
    let lower = mesh_level(&chunk, 0, MesherConfig::default());
    let upper = mesh_level(&chunk, 1, MesherConfig::default());
    assert_eq!(face_count(&lower), 5);
    assert_eq!(face_count(&upper), 5);
    assert!(lower.geometries.iter().all(|g| g.face_name.as_deref() != Some("py")));
    assert!(upper.geometries.iter().all(|g| g.face_name.as_deref() != Some("ny")));
}

#[test]
fn test_chunk_border_meshed() {
    let chunk = test_chunk(&[(0, 0, 0, 7)]);
    let mesh = mesh_level(&chunk, 0, MesherConfig::default());
    assert_eq!(face_count(&mesh), 6);
}

#[test]
fn test_corner_occlusion() {
    // a block on top of the voxel next to it darkens two corners of its top face
    let chunk = test_chunk(&[(1, 1, 1, 5), (2, 2, 1, 5)]);
    let mesh = mesh_level(&chunk, 0, MesherConfig::default());
    let top = mesh.geometries
        .iter()
        .find(|g| g.voxel == 5 && g.face_name.as_deref() == Some("py"))
        .unwrap();
    assert_eq!(top.num_vertices(), 8);
    let aos: Vec<u32> = top.lights.iter().map(|&l| chunk_data::extract_ao(l as u32)).collect();
    assert_eq!(aos.iter().filter(|&&ao| ao < MAX_AO).count(), 2);
}
