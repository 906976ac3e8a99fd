//! Glue between the network connection and the world.

use crate::{
    network::Network,
    world::World,
    renderer::ChunkRenderer,
    settings::Settings,
    transport::Transport,
    worker_pool::PoolContext,
    util_must_drain::MustDrain,
};
use chunk_data::ChunkCoord;
use anyhow::Result;


/// A connected client world. Each tick feeds received messages to the world, ticks it, and sends
/// what it wants sent.
pub struct Client<R: ChunkRenderer> {
    pub network: Network,
    pub world: World<R>,
}

impl<R: ChunkRenderer> Client<R> {
    /// Construct, spawning worker threads.
    pub fn new(settings: &Settings, transport: Transport, renderer: R) -> Result<Self> {
        Self::with_context(settings, transport, renderer, PoolContext::new())
    }

    /// Construct, counting busy worker threads of both pools in the given context.
    pub fn with_context(
        settings: &Settings,
        transport: Transport,
        renderer: R,
        ctx: PoolContext,
    ) -> Result<Self> {
        Ok(Client {
            network: Network::with_context(transport, &settings.network, ctx.clone())?,
            world: World::with_context(settings.world.clone(), renderer, ctx)?,
        })
    }

    /// Do one frame of work around the given center chunk.
    pub fn tick(&mut self, center: ChunkCoord) {
        for msg in self.network.tick() {
            self.world.on_message(msg);
        }
        let MustDrain = self.world.tick(center);
        for msg in self.world.drain_packets() {
            self.network.send(msg);
        }
    }

    /// Whether the connection has closed and every received message has been handled.
    pub fn is_finished(&self) -> bool {
        self.network.is_finished()
    }
}


#[cfg(test)]
fn tick_until<R, F>(client: &mut Client<R>, center: ChunkCoord, mut done: F)
where
    R: ChunkRenderer,
    F: FnMut(&Client<R>) -> bool,
{
    let start = std::time::Instant::now();
    while !done(client) {
        assert!(start.elapsed() < std::time::Duration::from_secs(10), "client timed out");
        client.tick(center);
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
}

#[cfg(test)]
fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.world.default_render_radius = 0;
    settings.world.default_delete_radius = Some(2);
    settings.world.mesh_workers = 1;
    settings.network.decode_workers = 1;
    settings
}

#[test]
fn test_client_end_to_end() {
    use crate::{
        transport::in_mem_pair,
        renderer::CountingRenderer,
        chunk_pipeline::StageKind,
        mesh_pipeline::MeshKey,
    };
    use chunk_data::{
        ChunkShape,
        OwnedBuf,
    };
    use protocol::{
        DownMsg,
        DownMsgUpdate,
        ChunkPayload,
        LevelMesh,
        VoxelUpdate,
        UpMsg,
        EncodeOptions,
        Compression,
    };
    use vek::*;

    let (conn, server) = in_mem_pair();
    let mut client = Client::new(&test_settings(), conn.into(), CountingRenderer::new()).unwrap();
    let center = Vec2::new(0, 0);
    let shape = ChunkShape { size: 4, max_height: 8, sub_chunks: 2 };
    let options = EncodeOptions {
        frame: Compression::Zlib,
        buffers: Compression::Lz4,
    };

    // world params
    let init = serde_json::json!({
        "options": { "chunkSize": 4, "maxHeight": 8, "subChunks": 2 },
        "blocks": {},
    });
    server.send_msg(&DownMsg::Init(init), options).unwrap();
    tick_until(&mut client, center, |c| c.world.params().shape() == shape);

    // the center chunk gets requested
    tick_until(&mut client, center, |c| c.world.chunks().stage(center).is_some());
    assert_eq!(client.world.chunks().stage(center), Some(StageKind::Requested));
    let requested = server
        .recv_all()
        .unwrap()
        .into_iter()
        .any(|msg| matches!(msg, UpMsg::Load(load) if load.chunks.contains(&center)));
    assert!(requested);

    // the server answers with data and a mesh per level
    let mut voxels = vec![0; shape.volume()];
    voxels[shape.ltc_to_index(Vec3::new(1, 1, 1))] = 5;
    let payload = ChunkPayload {
        x: 0,
        z: 0,
        id: "abc".to_owned(),
        voxels: Some(OwnedBuf::from(voxels)),
        lights: Some(OwnedBuf::zeroed(shape.volume())),
        meshes: vec![
            LevelMesh { level: 0, geometries: Vec::new() },
            LevelMesh { level: 1, geometries: Vec::new() },
        ],
    };
    server.send_msg(&DownMsg::Load(vec![payload]), options).unwrap();
    tick_until(&mut client, center, |c| c.world.renderer().chunks.contains(&center));
    assert!(client.world.is_chunk_ready(center));
    assert_eq!(client.world.block_id_at(1, 1, 1), 5);
    assert_eq!(client.world.renderer().uploads, 2);
    assert_eq!(client.world.mesh_jobs_in_flight(), 0);

    // a server-side edit gets remeshed locally
    let update = DownMsgUpdate {
        updates: vec![VoxelUpdate { vx: 1, vy: 1, vz: 1, voxel: 7, light: None }],
        chunks: Vec::new(),
    };
    server.send_msg(&DownMsg::Update(update), options).unwrap();
    let key = MeshKey::new(center, 0);
    tick_until(&mut client, center, |c| c
        .world
        .meshes()
        .state(key)
        .map(|state| state.displayed_generation == 1)
        .unwrap_or(false));
    assert_eq!(client.world.block_id_at(1, 1, 1), 7);
    let renderer = client.world.renderer();
    assert_eq!(renderer.uploads, 3);
    assert_eq!(renderer.disposals, 1);
    assert_eq!(renderer.levels[&(center, 0)].geometries, 6);
    assert_eq!(renderer.levels[&(center, 0)].vertices, 24);
    assert_eq!(client.world.meshes().state(MeshKey::new(center, 1)).unwrap().generation, 0);

    // a local edit gets sent to the server
    assert!(client.world.update_voxel(2, 1, 1, 7));
    assert!(!client.world.update_voxel(100, 1, 1, 7));
    client.tick(center);
    let updates: Vec<VoxelUpdate> = server
        .recv_all()
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            UpMsg::Update(updates) => Some(updates),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(updates, [VoxelUpdate { vx: 2, vy: 1, vz: 1, voxel: 7, light: None }]);

    // moving away evicts the chunk
    let far = Vec2::new(10, 0);
    client.tick(far);
    assert_eq!(client.world.chunks().stage(center), None);
    assert!(client.world.renderer().chunks.is_empty());
    assert!(!client.world.renderer().levels.contains_key(&(center, 0)));
    let unloaded = server
        .recv_all()
        .unwrap()
        .into_iter()
        .any(|msg| matches!(msg, UpMsg::Unload(ccs) if ccs == [center]));
    assert!(unloaded);

    // closing
    server.close(Some("bye".to_owned()));
    tick_until(&mut client, far, |c| c.is_finished());
    assert!(client.network.close_reason().unwrap().contains("bye"));
}
