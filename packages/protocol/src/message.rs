//! Messages sent between client and server.
//!
//! On the wire, a message is a frame which may be wrapped whole in zlib or LZ4 compression.
//! Inside, it starts with a type tag followed by that type's fields. Unsigned ints are
//! var-len encoded, signed ints are var-len zig-zag-ish encoded (see `var_len`), strings and
//! byte buffers are a var-len length followed by that many bytes, options are a 0 or 1 byte
//! followed by the value if 1, and lists are a var-len length followed by that many elements.
//!
//! Voxel, light, and mesh geometry buffers inside chunk payloads may each be compressed
//! independently, and are materialized into typed arrays while decoding.

use chunk_data::{
    ChunkCoord,
    OwnedBuf,
};
use serde_json::Value;
use vek::*;


/// Message sent from server to client.
#[derive(Debug)]
pub enum DownMsg {
    /// First message after connecting. JSON describes world parameters.
    Init(Value),
    /// Server-side error text.
    Error(String),
    /// Periodic server statistics JSON.
    Stats(Value),
    /// Chunks the client requested.
    Load(Vec<ChunkPayload>),
    /// Voxel changes, plus any chunks which changed wholesale.
    Update(DownMsgUpdate),
    /// Chat text. Not interpreted by the client core.
    Chat(String),
    /// Peer metadata. Not interpreted by the client core.
    Peer(Vec<PeerInfo>),
    /// Entity metadata. Not interpreted by the client core.
    Entity(Vec<EntityInfo>),
    /// Custom server events. Not interpreted by the client core.
    Event(Vec<EventInfo>),
}

/// Type tag of a `DownMsg`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum DownMsgKind {
    Init = 0,
    Error = 1,
    Stats = 2,
    Load = 3,
    Update = 4,
    Chat = 5,
    Peer = 6,
    Entity = 7,
    Event = 8,
}

impl DownMsgKind {
    pub const NUM_VARIANTS: usize = 9;

    pub const ALL: [DownMsgKind; Self::NUM_VARIANTS] = [
        DownMsgKind::Init,
        DownMsgKind::Error,
        DownMsgKind::Stats,
        DownMsgKind::Load,
        DownMsgKind::Update,
        DownMsgKind::Chat,
        DownMsgKind::Peer,
        DownMsgKind::Entity,
        DownMsgKind::Event,
    ];
}

impl DownMsg {
    pub fn kind(&self) -> DownMsgKind {
        match self {
            &DownMsg::Init(_) => DownMsgKind::Init,
            &DownMsg::Error(_) => DownMsgKind::Error,
            &DownMsg::Stats(_) => DownMsgKind::Stats,
            &DownMsg::Load(_) => DownMsgKind::Load,
            &DownMsg::Update(_) => DownMsgKind::Update,
            &DownMsg::Chat(_) => DownMsgKind::Chat,
            &DownMsg::Peer(_) => DownMsgKind::Peer,
            &DownMsg::Entity(_) => DownMsgKind::Entity,
            &DownMsg::Event(_) => DownMsgKind::Event,
        }
    }
}

/// Voxel changes, plus any chunks which changed wholesale.
#[derive(Debug, Default)]
pub struct DownMsgUpdate {
    pub updates: Vec<VoxelUpdate>,
    pub chunks: Vec<ChunkPayload>,
}

/// Single voxel write.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct VoxelUpdate {
    pub vx: i32,
    pub vy: i32,
    pub vz: i32,
    /// Packed voxel word.
    pub voxel: u32,
    /// Packed light word. Updates sent by the client leave this to the server.
    pub light: Option<u32>,
}

impl VoxelUpdate {
    pub fn gtc(&self) -> Vec3<i32> {
        Vec3::new(self.vx, self.vy, self.vz)
    }
}

/// Data for one chunk.
#[derive(Debug, Default)]
pub struct ChunkPayload {
    pub x: i32,
    pub z: i32,
    /// Server-assigned id.
    pub id: String,
    pub voxels: Option<OwnedBuf<u32>>,
    pub lights: Option<OwnedBuf<u32>>,
    /// Pre-built meshes, for whichever levels the server chose to send.
    pub meshes: Vec<LevelMesh>,
}

impl ChunkPayload {
    pub fn cc(&self) -> ChunkCoord {
        Vec2::new(self.x, self.z)
    }

    /// Merge a newer payload for the same chunk into this one.
    ///
    /// Voxel and light arrays present in the newer payload overwrite these. The mesh list is
    /// replaced only if the newer one is non-empty.
    pub fn merge(&mut self, newer: ChunkPayload) {
        debug_assert_eq!(self.cc(), newer.cc(), "merging payloads of different chunks");
        if !newer.id.is_empty() {
            self.id = newer.id;
        }
        if newer.voxels.is_some() {
            self.voxels = newer.voxels;
        }
        if newer.lights.is_some() {
            self.lights = newer.lights;
        }
        if !newer.meshes.is_empty() {
            self.meshes = newer.meshes;
        }
    }
}

/// Mesh for one vertical level of a chunk.
#[derive(Debug, Default)]
pub struct LevelMesh {
    pub level: u32,
    pub geometries: Vec<Geometry>,
}

/// Renderable geometry for one kind of voxel face.
#[derive(Debug, Default)]
pub struct Geometry {
    /// Id of the block this geometry is for.
    pub voxel: u32,
    /// Name of the face, for blocks that texture faces independently.
    pub face_name: Option<String>,
    /// Three floats per vertex.
    pub positions: OwnedBuf<f32>,
    /// Two floats per vertex.
    pub uvs: OwnedBuf<f32>,
    /// Triangle list.
    pub indices: OwnedBuf<u16>,
    /// One packed light word per vertex, including flag bits.
    pub lights: OwnedBuf<i32>,
}

impl Geometry {
    pub fn num_vertices(&self) -> usize {
        self.positions.len() / 3
    }
}

#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub id: String,
    pub username: String,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct EntityInfo {
    pub id: String,
    pub kind: String,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct EventInfo {
    pub name: String,
    pub payload: Value,
}


/// Message sent from client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum UpMsg {
    /// Request chunks, closest first.
    Load(UpMsgLoad),
    /// Tell the server chunks are no longer wanted.
    Unload(Vec<ChunkCoord>),
    /// Local voxel edits.
    Update(Vec<VoxelUpdate>),
}

/// Type tag of an `UpMsg`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum UpMsgKind {
    Load = 0,
    Unload = 1,
    Update = 2,
}

impl UpMsgKind {
    pub const NUM_VARIANTS: usize = 3;

    pub const ALL: [UpMsgKind; Self::NUM_VARIANTS] = [
        UpMsgKind::Load,
        UpMsgKind::Unload,
        UpMsgKind::Update,
    ];
}

impl UpMsg {
    pub fn kind(&self) -> UpMsgKind {
        match self {
            &UpMsg::Load(_) => UpMsgKind::Load,
            &UpMsg::Unload(_) => UpMsgKind::Unload,
            &UpMsg::Update(_) => UpMsgKind::Update,
        }
    }
}

/// Request chunks, closest first.
#[derive(Debug, Clone, PartialEq)]
pub struct UpMsgLoad {
    /// Chunk the client is centered on, for server-side prioritization.
    pub center: Option<ChunkCoord>,
    pub chunks: Vec<ChunkCoord>,
}

impl From<UpMsgLoad> for UpMsg {
    fn from(msg: UpMsgLoad) -> Self {
        UpMsg::Load(msg)
    }
}


#[test]
fn test_merge() {
    let mut a = ChunkPayload {
        x: 1,
        z: 2,
        id: "a".into(),
        voxels: Some(vec![1].into()),
        lights: Some(vec![1].into()),
        meshes: vec![LevelMesh { level: 0, geometries: Vec::new() }],
    };
    a.merge(ChunkPayload {
        x: 1,
        z: 2,
        id: "a".into(),
        voxels: Some(vec![2].into()),
        lights: None,
        meshes: Vec::new(),
    });
    assert_eq!(a.voxels.as_deref(), Some(&[2][..]));
    assert_eq!(a.lights.as_deref(), Some(&[1][..]));
    assert_eq!(a.meshes.len(), 1);

    a.merge(ChunkPayload {
        x: 1,
        z: 2,
        meshes: vec![
            LevelMesh { level: 3, geometries: Vec::new() },
            LevelMesh { level: 4, geometries: Vec::new() },
        ],
        ..Default::default()
    });
    assert_eq!(a.meshes.iter().map(|m| m.level).collect::<Vec<_>>(), vec![3, 4]);
    assert_eq!(a.voxels.as_deref(), Some(&[2][..]));
}

#[test]
fn test_kind_tags_are_dense() {
    for (i, kind) in DownMsgKind::ALL.into_iter().enumerate() {
        assert_eq!(kind as usize, i);
    }
    for (i, kind) in UpMsgKind::ALL.into_iter().enumerate() {
        assert_eq!(kind as usize, i);
    }
}
