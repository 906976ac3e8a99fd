//! Client-side core of a streamed voxel world.
//!
//! Chunks are requested from a server around a moving center, arrive as binary frames which are
//! decoded on a worker pool, pass through the `ChunkPipeline` stages until they're loaded, and
//! have their meshes rebuilt on another worker pool whenever their voxels change. `World::tick`
//! drives all of it, one bounded step per frame.

#[macro_use]
extern crate tracing;

pub mod logging;
pub mod settings;
pub mod util_must_drain;
pub mod util_net;
pub mod worker_pool;
pub mod decode;
pub mod chunk_pipeline;
pub mod mesh_pipeline;
pub mod mesher;
pub mod renderer;
pub mod world;
pub mod transport;
pub mod network;
pub mod client;

pub use crate::{
    settings::{
        Settings,
        WorldSettings,
        NetworkSettings,
    },
    world::{
        World,
        WorldParams,
    },
    renderer::{
        ChunkRenderer,
        NullRenderer,
    },
    network::Network,
    client::Client,
};
