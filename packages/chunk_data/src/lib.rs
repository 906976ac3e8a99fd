//! Data structures and bit-packing for client-side chunk storage.
//!
//! ## voxel words
//!
//! Each voxel is a `u32` packing a block id, a rotation, and a stage. See the `voxel` module.
//!
//! ## light words
//!
//! Each voxel has a parallel `u32` light word packing sunlight, three torch light channels, and
//! some flags only the renderer cares about. See the `light` module.
//!
//! ## chunks, chunk coordinates
//!
//! Voxels are grouped into _chunks_, which are columns of `size` by `size` voxels that span the
//! whole `max_height` of the world. A chunk is globally identified by a _chunk coordinate_ (cc),
//! a 2-vec of signed integers along x and z. Chunks are also named `"cx|cz"` for logging.
//!
//! ## local coordinates, indices
//!
//! Relative to its chunk, a voxel has a _local coordinate_ (ltc) between <0,0,0> (inclusive) and
//! <size,max_height,size> (exclusive). Per-voxel arrays are laid out in `[x][y][z]` order, so
//! the index of an ltc is `x * max_height * size + y * size + z`.
//!
//! ## levels
//!
//! For meshing, a chunk is split vertically into `sub_chunks` _levels_ of equal height, each of
//! which is meshed independently.
//!
//! Basic example:
//!
//! ```
//! use chunk_data::*;
//! use vek::*;
//!
//! let shape = ChunkShape { size: 16, max_height: 64, sub_chunks: 4 };
//! let cc = voxel_to_chunk(-5, 20, shape.size);
//! assert_eq!(cc, Vec2::new(-1, 1));
//!
//! let mut chunk = Chunk::<()>::new("some-id".into(), cc, shape);
//! let voxel = insert_all(3, Some(BlockRotation::new(PX, 4)), Some(2));
//! assert!(chunk.set_raw_value(Vec3::new(-5, 40, 20), voxel));
//! assert_eq!(chunk.voxel_id(Vec3::new(-5, 40, 20)), 3);
//! assert_eq!(chunk.level_of(40), Some(2));
//! ```

pub mod voxel;
pub mod light;
pub mod coord;
pub mod owned_buf;
pub mod chunk;

pub use crate::{
    voxel::*,
    light::*,
    coord::*,
    owned_buf::OwnedBuf,
    chunk::{
        Chunk,
        PerLevel,
        SizeMismatch,
    },
};
