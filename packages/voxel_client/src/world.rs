//! The per-frame orchestrator of the client-side world.
//!
//! Each tick, in order:
//!
//! 1. Chunks within the render radius which the client doesn't have are requested, closest
//!    first, a bounded number per tick. Requests which go unanswered for too many ticks are
//!    made again.
//! 2. Received chunks are processed into loaded chunks, closest first, a bounded number per
//!    tick.
//! 3. Chunks beyond the delete radius are evicted, and the server is told. This includes chunks
//!    still requested or processing, so the server can drop a request it hasn't answered yet.
//! 4. Finished mesh jobs are displayed if they're still the newest, and new mesh jobs are
//!    started for levels whose voxels changed, at most one level per chunk per tick.
//! 5. Local voxel edits are sent to the server, a bounded number per tick.
//! 6. Newly loaded chunks are handed to the renderer, a bounded number per tick.
//!
//! Messages for the server are queued rather than sent, see `drain_packets`.

use crate::{
    settings::{
        WorldSettings,
        derive_delete_radius,
    },
    chunk_pipeline::{
        ChunkPipeline,
        ProcessSource,
        StageKind,
        TakenProcessing,
    },
    mesh_pipeline::{
        MeshPipeline,
        MeshKey,
    },
    mesher::{
        MeshWorker,
        MeshInput,
        MeshOutput,
        MesherConfig,
    },
    worker_pool::{
        WorkerPool,
        PoolContext,
        JobHandle,
        JobStatus,
    },
    renderer::ChunkRenderer,
    util_must_drain::MustDrain,
};
use chunk_data::{
    Chunk,
    ChunkCoord,
    ChunkShape,
    voxel_to_chunk,
    dist_sq,
    chunk_name,
    extract_id,
};
use protocol::{
    DownMsg,
    DownMsgUpdate,
    ChunkPayload,
    VoxelUpdate,
    UpMsg,
    UpMsgLoad,
};
use std::collections::{
    HashMap,
    HashSet,
    VecDeque,
};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use vek::*;
use anyhow::Result;


/// World parameters decided by the server, sent in the `INIT` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorldParams {
    /// Width of a chunk in voxels.
    pub chunk_size: u32,
    /// Height of a chunk in voxels.
    pub max_height: u32,
    /// Number of vertical mesh levels per chunk.
    pub sub_chunks: u32,
    /// Minimum chunk coordinate, inclusive.
    pub min_chunk: [i32; 2],
    /// Maximum chunk coordinate, inclusive.
    pub max_chunk: [i32; 2],
}

impl Default for WorldParams {
    fn default() -> Self {
        let shape = ChunkShape::default();
        WorldParams {
            chunk_size: shape.size,
            max_height: shape.max_height,
            sub_chunks: shape.sub_chunks,
            min_chunk: [i32::MIN, i32::MIN],
            max_chunk: [i32::MAX, i32::MAX],
        }
    }
}

impl WorldParams {
    pub fn shape(&self) -> ChunkShape {
        ChunkShape {
            size: self.chunk_size.max(1),
            max_height: self.max_height.max(1),
            sub_chunks: self.sub_chunks.max(1),
        }
    }

    /// Whether the chunk is within the world's bounds.
    pub fn contains(&self, cc: ChunkCoord) -> bool {
        cc.x >= self.min_chunk[0] && cc.x <= self.max_chunk[0]
            && cc.y >= self.min_chunk[1] && cc.y <= self.max_chunk[1]
    }
}

// shape of the INIT message's json
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InitJson {
    options: WorldParams,
    blocks: HashMap<String, InitBlock>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct InitBlock {
    id: u32,
    is_see_through: bool,
}


/// Chunks waiting to be requested.
#[derive(Debug, Default)]
pub struct RequestQueue {
    queue: Vec<ChunkCoord>,
    queued: HashSet<ChunkCoord>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a chunk unless it's already queued. Returns whether it was added.
    pub fn push(&mut self, cc: ChunkCoord) -> bool {
        let added = self.queued.insert(cc);
        if added {
            self.queue.push(cc);
        }
        added
    }

    /// Sort by distance to center, closest first and otherwise in queue order, then take up to
    /// `max` from the front.
    pub fn take_batch(&mut self, center: ChunkCoord, max: usize) -> Vec<ChunkCoord> {
        self.queue.sort_by_key(|&cc| dist_sq(cc, center));
        let rest = self.queue.split_off(max.min(self.queue.len()));
        let batch = std::mem::replace(&mut self.queue, rest);
        for cc in &batch {
            self.queued.remove(cc);
        }
        batch
    }

    /// Keep only chunks for which the predicate is true.
    pub fn retain<F: FnMut(ChunkCoord) -> bool>(&mut self, mut f: F) {
        let queued = &mut self.queued;
        self.queue.retain(|&cc| {
            let keep = f(cc);
            if !keep {
                queued.remove(&cc);
            }
            keep
        });
    }

    pub fn contains(&self, cc: ChunkCoord) -> bool {
        self.queued.contains(&cc)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}


/// The client-side world. See module docs.
pub struct World<R: ChunkRenderer> {
    settings: WorldSettings,
    params: WorldParams,
    renderer: R,
    chunks: ChunkPipeline<R::Level>,
    meshes: MeshPipeline,
    mesh_pool: WorkerPool<MeshWorker>,
    // jobs not yet completed, at most one per key
    mesh_jobs: Vec<(MeshKey, JobHandle<MeshOutput>)>,
    to_request: RequestQueue,
    // local edits not yet sent
    pending_updates: VecDeque<VoxelUpdate>,
    // loaded chunks not yet handed to the renderer
    to_add: VecDeque<ChunkCoord>,
    // chunks handed to the renderer
    in_renderer: HashSet<ChunkCoord>,
    render_radius: u32,
    delete_radius: u32,
    ticks: u64,
    // messages for the server
    packets: VecDeque<UpMsg>,
}

impl<R: ChunkRenderer> World<R> {
    /// Construct, spawning mesh worker threads.
    pub fn new(settings: WorldSettings, renderer: R) -> Result<Self> {
        Self::with_context(settings, renderer, PoolContext::new())
    }

    /// Construct, counting busy mesh worker threads in the given context.
    pub fn with_context(settings: WorldSettings, renderer: R, ctx: PoolContext) -> Result<Self> {
        let mesh_pool = WorkerPool::with_context(
            "mesh",
            settings.mesh_worker_count(),
            ctx,
            |_| MeshWorker::default(),
        )?;
        let render_radius = settings.default_render_radius;
        let delete_radius = settings.default_delete_radius
            .unwrap_or_else(|| derive_delete_radius(render_radius))
            .max(render_radius);
        Ok(World {
            settings,
            params: WorldParams::default(),
            renderer,
            chunks: ChunkPipeline::new(),
            meshes: MeshPipeline::new(),
            mesh_pool,
            mesh_jobs: Vec::new(),
            to_request: RequestQueue::new(),
            pending_updates: VecDeque::new(),
            to_add: VecDeque::new(),
            in_renderer: HashSet::new(),
            render_radius,
            delete_radius,
            ticks: 0,
            packets: VecDeque::new(),
        })
    }

    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    pub fn params(&self) -> &WorldParams {
        &self.params
    }

    /// Replace the world parameters, as if received from the server.
    pub fn set_params(&mut self, params: WorldParams) {
        if params.shape() != self.params.shape() && self.chunks.total_count() > 0 {
            warn!("chunk shape changed with chunks present");
        }
        self.params = params;
    }

    /// Replace the configuration of the mesh workers.
    pub fn configure_mesher(&mut self, config: MesherConfig) {
        self.mesh_pool.post_all(config);
    }

    pub fn chunks(&self) -> &ChunkPipeline<R::Level> {
        &self.chunks
    }

    pub fn meshes(&self) -> &MeshPipeline {
        &self.meshes
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn render_radius(&self) -> u32 {
        self.render_radius
    }

    pub fn delete_radius(&self) -> u32 {
        self.delete_radius
    }

    /// Set the render radius, deriving the delete radius from it.
    pub fn set_render_radius(&mut self, radius: u32) {
        self.render_radius = radius;
        self.delete_radius = derive_delete_radius(radius);
    }

    /// Number of ticks done.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Number of chunks waiting to be requested.
    pub fn queued_requests(&self) -> usize {
        self.to_request.len()
    }

    /// Number of mesh jobs not yet completed.
    pub fn mesh_jobs_in_flight(&self) -> usize {
        self.mesh_jobs.len()
    }

    /// Whether any mesh work is dirty or in flight.
    pub fn is_meshing(&self) -> bool {
        !self.mesh_jobs.is_empty() || self.meshes.has_dirty()
    }

    /// Take the messages queued for the server.
    pub fn drain_packets(&mut self) -> impl Iterator<Item=UpMsg> + '_ {
        self.packets.drain(..)
    }

    /// Handle a message from the server.
    pub fn on_message(&mut self, msg: DownMsg) {
        match msg {
            DownMsg::Init(json) => self.on_init(json),
            DownMsg::Load(chunks) => {
                for payload in chunks {
                    let cc = payload.cc();
                    self.chunks.mark_processing(cc, ProcessSource::Load, payload);
                }
            }
            DownMsg::Update(update) => self.on_update(update),
            DownMsg::Error(text) => warn!(%text, "server error"),
            msg => trace!(kind = ?msg.kind(), "ignoring message"),
        }
    }

    fn on_init(&mut self, json: Value) {
        let init = match serde_json::from_value::<InitJson>(json) {
            Ok(init) => init,
            Err(e) => {
                warn!(%e, "invalid INIT json (keeping defaults)");
                return;
            }
        };
        debug!(params = ?init.options, "received world params");
        self.set_params(init.options);
        let mut see_through: Vec<u32> = init.blocks
            .values()
            .filter(|block| block.is_see_through)
            .map(|block| block.id)
            .collect();
        see_through.sort();
        self.configure_mesher(MesherConfig { see_through });
    }

    fn on_update(&mut self, update: DownMsgUpdate) {
        let DownMsgUpdate { updates, chunks } = update;
        let size = self.params.shape().size;
        for update in updates {
            let gtc = update.gtc();
            let cc = voxel_to_chunk(gtc.x, gtc.z, size);
            let chunk = match self.chunks.resident_chunk_mut(cc) {
                Some(chunk) => chunk,
                None => continue,
            };
            if !chunk.contains(gtc) {
                continue;
            }
            let light = update.light.unwrap_or_else(|| chunk.raw_light(gtc));
            if chunk.raw_value(gtc) == update.voxel && chunk.raw_light(gtc) == light {
                continue;
            }
            chunk.set_raw_value(gtc, update.voxel);
            chunk.set_raw_light(gtc, light);
            self.on_voxel_change(cc, gtc.y);
        }
        for payload in chunks {
            let cc = payload.cc();
            self.chunks.mark_processing(cc, ProcessSource::Update, payload);
        }
    }

    // bump the generation of the level containing vy, and of the adjacent level if vy is on
    // its boundary
    fn on_voxel_change(&mut self, cc: ChunkCoord, vy: i32) {
        let shape = self.params.shape();
        let level = match shape.level_of(vy) {
            Some(level) => level,
            None => return,
        };
        self.meshes.on_voxel_change(MeshKey::new(cc, level));
        let range = shape.level_range(level);
        if level > 0 && vy as u32 == range.start {
            self.meshes.on_voxel_change(MeshKey::new(cc, level - 1));
        }
        if level + 1 < shape.sub_chunks && vy as u32 + 1 == range.end {
            self.meshes.on_voxel_change(MeshKey::new(cc, level + 1));
        }
    }

    /// Edit a voxel locally and queue the edit to be sent to the server. Returns false if the
    /// voxel isn't in a resident chunk.
    pub fn update_voxel(&mut self, vx: i32, vy: i32, vz: i32, voxel: u32) -> bool {
        let gtc = Vec3::new(vx, vy, vz);
        let cc = voxel_to_chunk(vx, vz, self.params.shape().size);
        let chunk = match self.chunks.resident_chunk_mut(cc) {
            Some(chunk) => chunk,
            None => return false,
        };
        if !chunk.set_raw_value(gtc, voxel) {
            return false;
        }
        self.on_voxel_change(cc, vy);
        self.pending_updates.push_back(VoxelUpdate {
            vx,
            vy,
            vz,
            voxel,
            light: None,
        });
        true
    }

    /// Raw voxel word, 0 if not in a resident chunk.
    pub fn voxel_at(&self, vx: i32, vy: i32, vz: i32) -> u32 {
        let cc = voxel_to_chunk(vx, vz, self.params.shape().size);
        self.chunks
            .resident_chunk(cc)
            .map(|chunk| chunk.raw_value(Vec3::new(vx, vy, vz)))
            .unwrap_or(0)
    }

    /// Raw light word, 0 if not in a resident chunk.
    pub fn light_at(&self, vx: i32, vy: i32, vz: i32) -> u32 {
        let cc = voxel_to_chunk(vx, vz, self.params.shape().size);
        self.chunks
            .resident_chunk(cc)
            .map(|chunk| chunk.raw_light(Vec3::new(vx, vy, vz)))
            .unwrap_or(0)
    }

    /// Block id, 0 if not in a resident chunk.
    pub fn block_id_at(&self, vx: i32, vy: i32, vz: i32) -> u32 {
        extract_id(self.voxel_at(vx, vy, vz))
    }

    /// Whether the chunk is loaded.
    pub fn is_chunk_ready(&self, cc: ChunkCoord) -> bool {
        self.chunks.is_in_stage(cc, StageKind::Loaded)
    }

    /// Do one tick's worth of work around the given center chunk. Must be followed by draining
    /// packets.
    pub fn tick(&mut self, center: ChunkCoord) -> MustDrain {
        self.request_chunks(center);
        self.process_chunks(center);
        self.maintain_chunks(center);
        self.poll_mesh_jobs();
        self.start_mesh_jobs(center);
        self.flush_updates();
        self.add_chunks();
        self.ticks += 1;
        MustDrain
    }

    fn request_chunks(&mut self, center: ChunkCoord) {
        let r = self.render_radius as i32;
        for ox in -r..=r {
            for oz in -r..=r {
                if ox * ox + oz * oz > r * r {
                    continue;
                }
                let cc = match (center.x.checked_add(ox), center.y.checked_add(oz)) {
                    (Some(x), Some(z)) => Vec2::new(x, z),
                    _ => continue,
                };
                if !self.params.contains(cc) {
                    continue;
                }
                let was_requested = self.chunks.is_in_stage(cc, StageKind::Requested);
                if self.chunks.should_request(cc, self.settings.rerequest_ticks) {
                    if was_requested {
                        debug!(chunk = %chunk_name(cc), "re-requesting chunk");
                    }
                    self.to_request.push(cc);
                }
            }
        }

        let batch = self.to_request.take_batch(center, self.settings.max_requests_per_tick);
        if batch.is_empty() {
            return;
        }
        for &cc in &batch {
            self.chunks.mark_requested(cc, self.ticks);
        }
        self.packets.push_back(UpMsgLoad {
            center: Some(center),
            chunks: batch,
        }.into());
    }

    fn process_chunks(&mut self, center: ChunkCoord) {
        let mut backlog: Vec<ChunkCoord> = self.chunks
            .coords_in_stage(StageKind::Processing)
            .iter()
            .copied()
            .collect();
        backlog.sort_by_key(|&cc| (dist_sq(cc, center), cc.x, cc.y));
        backlog.truncate(self.settings.max_processes_per_tick);
        for cc in backlog {
            if let Some(taken) = self.chunks.take_processing(cc) {
                self.process_chunk(cc, taken);
            }
        }
    }

    // turn a received payload into a loaded chunk
    fn process_chunk(&mut self, cc: ChunkCoord, taken: TakenProcessing<R::Level>) {
        let TakenProcessing { data, existing, .. } = taken;
        let ChunkPayload { id, voxels, lights, meshes, .. } = data;
        let shape = self.params.shape();

        let mut chunk = existing.unwrap_or_else(|| Chunk::new(id.clone(), cc, shape));
        if !id.is_empty() {
            chunk.id = id;
        }
        let has_data = voxels.is_some() || lights.is_some();
        if let Err(e) = chunk.set_data(voxels, lights) {
            error!(%e, chunk = %chunk.name(), "chunk payload doesn't fit chunk");
        }

        let mut fresh = HashSet::new();
        for mesh in meshes {
            let level = mesh.level;
            if level >= chunk.meshes.num_levels() {
                warn!(chunk = %chunk.name(), level, "server sent mesh for nonexistent level");
                continue;
            }
            let key = MeshKey::new(cc, level);
            // a local job still running for this level was built from older voxels
            self.mesh_jobs.retain(|&(k, _)| k != key);
            self.meshes.mark_fresh_from_server(key);
            let handle = self.renderer.upload_level(cc, mesh);
            if let Some(old) = chunk.meshes.set(level, handle) {
                self.renderer.dispose_level(cc, level, old);
            }
            fresh.insert(level);
        }
        if has_data {
            for level in 0..chunk.meshes.num_levels() {
                if !fresh.contains(&level) {
                    self.meshes.on_voxel_change(MeshKey::new(cc, level));
                }
            }
        }

        self.chunks.mark_loaded(cc, chunk);
        if !self.in_renderer.contains(&cc) && !self.to_add.contains(&cc) {
            self.to_add.push_back(cc);
        }
    }

    fn maintain_chunks(&mut self, center: ChunkCoord) {
        let delete_radius = self.delete_radius as i64;
        let far = |cc: ChunkCoord| dist_sq(cc, center) > delete_radius * delete_radius;

        let mut deleted: Vec<ChunkCoord> = self.chunks
            .iter()
            .map(|(&cc, _)| cc)
            .filter(|&cc| far(cc))
            .collect();
        deleted.sort_by_key(|&cc| (cc.x, cc.y));
        for &cc in &deleted {
            if let Some(chunk) = self.chunks.remove(cc) {
                self.dispose_chunk(chunk);
            }
            if self.in_renderer.remove(&cc) {
                self.renderer.dispose_chunk(cc);
            }
            self.meshes.remove(cc);
            // dropping the handles discards results of jobs still running
            self.mesh_jobs.retain(|&(key, _)| key.cc != cc);
            trace!(chunk = %chunk_name(cc), "evicted chunk");
        }

        self.to_request.retain(|cc| !far(cc));
        self.to_add.retain(|&cc| !far(cc));

        if !deleted.is_empty() {
            self.packets.push_back(UpMsg::Unload(deleted));
        }
    }

    // release the renderer resources of a chunk's levels
    fn dispose_chunk(&mut self, mut chunk: Chunk<R::Level>) {
        let cc = chunk.cc;
        for (level, handle) in chunk.meshes.drain() {
            self.renderer.dispose_level(cc, level, handle);
        }
    }

    fn poll_mesh_jobs(&mut self) {
        self.mesh_pool.poll();
        let mut i = 0;
        while i < self.mesh_jobs.len() {
            match self.mesh_jobs[i].1.poll() {
                JobStatus::Pending => i += 1,
                JobStatus::Resolved(output) => {
                    self.mesh_jobs.swap_remove(i);
                    self.on_mesh_output(output);
                }
                JobStatus::Rejected(e) => {
                    let (key, _) = self.mesh_jobs.swap_remove(i);
                    warn!(%key, ?e, "mesh job failed");
                    self.meshes.abort_job(key);
                }
            }
        }
    }

    fn on_mesh_output(&mut self, output: MeshOutput) {
        let MeshOutput { key, generation, mesh } = output;
        let status = self.meshes.complete_job_status(key, generation);
        if !status.accepted {
            trace!(%key, generation, "discarding stale mesh");
            return;
        }
        let chunk = match self.chunks.resident_chunk_mut(key.cc) {
            Some(chunk) => chunk,
            None => return,
        };
        let handle = self.renderer.upload_level(key.cc, mesh);
        if let Some(old) = chunk.meshes.set(key.level, handle) {
            self.renderer.dispose_level(key.cc, key.level, old);
        }
    }

    fn start_mesh_jobs(&mut self, center: ChunkCoord) {
        if !self.settings.generate_meshes {
            return;
        }
        let (mut keys, _) = self.meshes.dirty_keys(usize::MAX);
        keys.sort_by_key(|key| (dist_sq(key.cc, center), key.cc.x, key.cc.y, key.level));

        let mut started_chunks = HashSet::new();
        for key in keys {
            if started_chunks.len() >= self.settings.max_mesh_jobs_per_tick {
                break;
            }
            if started_chunks.contains(&key.cc) {
                continue;
            }
            let chunk = match self.chunks.resident_chunk(key.cc) {
                Some(chunk) => chunk,
                None => continue,
            };
            let generation = match self.meshes.start_job(key) {
                Some(generation) => generation,
                None => continue,
            };
            let input = MeshInput::from_chunk(chunk, key, generation);
            self.mesh_jobs.push((key, self.mesh_pool.add_job(input)));
            started_chunks.insert(key.cc);
        }
    }

    fn flush_updates(&mut self) {
        let n = self.pending_updates.len().min(self.settings.max_updates_per_tick);
        if n == 0 {
            return;
        }
        let updates = self.pending_updates.drain(..n).collect();
        self.packets.push_back(UpMsg::Update(updates));
    }

    fn add_chunks(&mut self) {
        let mut added = 0;
        while added < self.settings.max_adds_per_tick {
            let cc = match self.to_add.pop_front() {
                Some(cc) => cc,
                None => break,
            };
            if !self.chunks.is_in_stage(cc, StageKind::Loaded) || self.in_renderer.contains(&cc) {
                continue;
            }
            self.renderer.add_chunk(cc);
            self.in_renderer.insert(cc);
            added += 1;
        }
    }
}


#[test]
fn test_request_queue_distance_order() {
    let mut queue = RequestQueue::new();
    let center = Vec2::new(0, 0);
    // squared distances 9, 1, 4
    assert!(queue.push(Vec2::new(3, 0)));
    assert!(queue.push(Vec2::new(1, 0)));
    assert!(queue.push(Vec2::new(0, 2)));
    assert!(!queue.push(Vec2::new(1, 0)));

    let batch = queue.take_batch(center, 2);
    assert_eq!(batch, [Vec2::new(1, 0), Vec2::new(0, 2)]);
    assert_eq!(queue.len(), 1);
    assert!(queue.contains(Vec2::new(3, 0)));
    assert!(!queue.contains(Vec2::new(1, 0)));
}

#[test]
fn test_request_queue_ties_keep_order() {
    let mut queue = RequestQueue::new();
    let center = Vec2::new(0, 0);
    for cc in [Vec2::new(0, 1), Vec2::new(-1, 0), Vec2::new(1, 0), Vec2::new(0, -1)] {
        queue.push(cc);
    }
    queue.push(Vec2::new(0, 0));
    let batch = queue.take_batch(center, 10);
    assert_eq!(batch, [
        Vec2::new(0, 0),
        Vec2::new(0, 1),
        Vec2::new(-1, 0),
        Vec2::new(1, 0),
        Vec2::new(0, -1),
    ]);
    assert!(queue.is_empty());
}

#[test]
fn test_request_queue_retain() {
    let mut queue = RequestQueue::new();
    queue.push(Vec2::new(0, 0));
    queue.push(Vec2::new(5, 5));
    queue.retain(|cc| cc.x < 3);
    assert_eq!(queue.len(), 1);
    assert!(queue.push(Vec2::new(5, 5)));
}

#[test]
fn test_world_params_from_init() {
    let json = serde_json::json!({
        "options": {
            "chunkSize": 4,
            "maxHeight": 8,
            "subChunks": 2,
            "minChunk": [-2, -2],
            "maxChunk": [2, 2],
            "gravity": [0, -9.8, 0]
        },
        "blocks": {
            "Glass": { "id": 3, "isSeeThrough": true, "faces": [] },
            "Stone": { "id": 1 }
        }
    });
    let init: InitJson = serde_json::from_value(json).unwrap();
    assert_eq!(init.options.shape(), ChunkShape { size: 4, max_height: 8, sub_chunks: 2 });
    assert!(init.options.contains(Vec2::new(2, -2)));
    assert!(!init.options.contains(Vec2::new(3, 0)));
    assert!(init.blocks["Glass"].is_see_through);
    assert!(!init.blocks["Stone"].is_see_through);
}

#[cfg(test)]
fn test_world(
    configure: impl FnOnce(&mut WorldSettings),
) -> World<crate::renderer::CountingRenderer> {
    let mut settings = WorldSettings::default();
    settings.default_render_radius = 0;
    settings.default_delete_radius = Some(1);
    settings.mesh_workers = 1;
    configure(&mut settings);
    World::new(settings, crate::renderer::CountingRenderer::new()).unwrap()
}

#[cfg(test)]
fn test_payload<R: ChunkRenderer>(world: &World<R>, cc: ChunkCoord, voxel: u32) -> ChunkPayload {
    let shape = world.params().shape();
    let mut voxels = vec![0; shape.volume()];
    voxels[0] = voxel;
    ChunkPayload {
        x: cc.x,
        z: cc.y,
        id: chunk_name(cc),
        voxels: Some(voxels.into()),
        ..Default::default()
    }
}

#[test]
fn test_world_chunk_lifecycle() {
    let mut world = test_world(|_| ());
    let cc = Vec2::new(0, 0);

    let MustDrain = world.tick(cc);
    let packets: Vec<UpMsg> = world.drain_packets().collect();
    assert_eq!(packets, [UpMsg::Load(UpMsgLoad { center: Some(cc), chunks: vec![cc] })]);
    assert_eq!(world.chunks().stage(cc), Some(StageKind::Requested));

    let payload = test_payload(&world, cc, 0x00000005);
    world.on_message(DownMsg::Load(vec![payload]));
    assert_eq!(world.chunks().stage(cc), Some(StageKind::Processing));

    let MustDrain = world.tick(cc);
    assert_eq!(world.drain_packets().count(), 0);
    assert_eq!(world.chunks().stage(cc), Some(StageKind::Loaded));
    assert_eq!(world.block_id_at(0, 0, 0), 5);
    assert!(world.renderer().chunks.contains(&cc));
    // no server meshes, so levels get meshed locally, one per tick
    assert_eq!(world.mesh_jobs_in_flight(), 1);
    assert!(world.is_meshing());

    let far = Vec2::new(5, 0);
    let MustDrain = world.tick(far);
    let packets: Vec<UpMsg> = world.drain_packets().collect();
    assert!(packets.contains(&UpMsg::Unload(vec![cc])));
    assert_eq!(world.chunks().stage(cc), None);
    assert_eq!(world.chunks().stage(far), Some(StageKind::Requested));
    assert_eq!(world.mesh_jobs_in_flight(), 0);
    assert!(world.renderer().chunks.is_empty());
    assert_eq!(world.voxel_at(0, 0, 0), 0);
}

#[test]
fn test_world_update_bumps_levels() {
    let mut world = test_world(|settings| settings.generate_meshes = false);
    let cc = Vec2::new(0, 0);
    let payload = test_payload(&world, cc, 1);
    world.on_message(DownMsg::Load(vec![payload]));
    let MustDrain = world.tick(cc);
    world.drain_packets().for_each(drop);
    assert!(world.is_chunk_ready(cc));

    let generation = |world: &World<_>, level| world
        .meshes()
        .state(MeshKey::new(cc, level))
        .map(|state| state.generation)
        .unwrap_or(0);
    let level_height = world.params().shape().level_height() as i32;
    let before = [generation(&world, 0), generation(&world, 1), generation(&world, 2)];

    let update = |vy, voxel| DownMsg::Update(DownMsgUpdate {
        updates: vec![VoxelUpdate { vx: 3, vy, vz: 3, voxel, light: None }],
        chunks: Vec::new(),
    });

    // inside level 0
    world.on_message(update(5, 2));
    assert_eq!(generation(&world, 0), before[0] + 1);
    assert_eq!(generation(&world, 1), before[1]);

    // unchanged write is skipped
    world.on_message(update(5, 2));
    assert_eq!(generation(&world, 0), before[0] + 1);

    // bottom of level 1 also affects level 0
    world.on_message(update(level_height, 2));
    assert_eq!(generation(&world, 0), before[0] + 2);
    assert_eq!(generation(&world, 1), before[1] + 1);
    assert_eq!(generation(&world, 2), before[2]);
    assert_eq!(world.block_id_at(3, level_height, 3), 2);

    // outside any resident chunk is ignored
    world.on_message(DownMsg::Update(DownMsgUpdate {
        updates: vec![VoxelUpdate { vx: 100, vy: 1, vz: 0, voxel: 2, light: None }],
        chunks: Vec::new(),
    }));
    assert_eq!(world.block_id_at(100, 1, 0), 0);
}

#[test]
fn test_world_local_edits_flush_in_batches() {
    let mut world = test_world(|settings| {
        settings.generate_meshes = false;
        settings.max_updates_per_tick = 2;
    });
    let cc = Vec2::new(0, 0);
    let payload = test_payload(&world, cc, 0);
    world.on_message(DownMsg::Load(vec![payload]));
    let MustDrain = world.tick(cc);
    world.drain_packets().for_each(drop);

    for vx in 0..3 {
        assert!(world.update_voxel(vx, 0, 0, 9));
    }
    let MustDrain = world.tick(cc);
    let first: Vec<UpMsg> = world.drain_packets().collect();
    let MustDrain = world.tick(cc);
    let second: Vec<UpMsg> = world.drain_packets().collect();
    let lens = |packets: &[UpMsg]| packets
        .iter()
        .filter_map(|msg| match msg {
            &UpMsg::Update(ref updates) => Some(updates.len()),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(lens(&first), [2]);
    assert_eq!(lens(&second), [1]);
    assert_eq!(world.block_id_at(2, 0, 0), 9);
}

#[test]
fn test_world_server_mesh_supersedes_local_job() {
    use protocol::LevelMesh;

    let mut world = test_world(|_| ());
    let cc = Vec2::new(0, 0);
    let key = MeshKey::new(cc, 0);
    world.on_message(DownMsg::Load(vec![test_payload(&world, cc, 1)]));
    let MustDrain = world.tick(cc);
    world.drain_packets().for_each(drop);
    assert_eq!(world.mesh_jobs_in_flight(), 1);
    assert!(world.meshes().has_in_flight_job(key));

    // the server sends meshes for every level while the local job is still running
    let levels = world.params().shape().sub_chunks;
    let mut payload = test_payload(&world, cc, 1);
    payload.meshes = (0..levels)
        .map(|level| LevelMesh { level, geometries: Vec::new() })
        .collect();
    world.on_message(DownMsg::Load(vec![payload]));
    let MustDrain = world.tick(cc);
    world.drain_packets().for_each(drop);
    assert_eq!(world.mesh_jobs_in_flight(), 0);
    assert!(!world.meshes().has_any_in_flight());
    assert!(!world.is_meshing());
    let uploads = world.renderer().uploads;
    assert_eq!(uploads, levels as u64);
    let displayed = world.meshes().state(key).unwrap().displayed_generation;

    // the local result never replaces the server's mesh
    for _ in 0..10 {
        std::thread::sleep(std::time::Duration::from_millis(5));
        let MustDrain = world.tick(cc);
        world.drain_packets().for_each(drop);
    }
    assert_eq!(world.renderer().uploads, uploads);
    assert_eq!(world.mesh_jobs_in_flight(), 0);
    assert_eq!(world.meshes().state(key).unwrap().displayed_generation, displayed);
}

#[test]
fn test_world_evicts_unfinished_chunks() {
    let mut world = test_world(|settings| settings.max_processes_per_tick = 0);
    let requested = Vec2::new(5, 0);
    let processing = Vec2::new(3, 0);

    let MustDrain = world.tick(requested);
    world.drain_packets().for_each(drop);
    assert_eq!(world.chunks().stage(requested), Some(StageKind::Requested));
    world.on_message(DownMsg::Load(vec![test_payload(&world, processing, 1)]));
    assert_eq!(world.chunks().stage(processing), Some(StageKind::Processing));

    let MustDrain = world.tick(Vec2::new(0, 0));
    let packets: Vec<UpMsg> = world.drain_packets().collect();
    assert!(packets.contains(&UpMsg::Unload(vec![processing, requested])));
    assert_eq!(world.chunks().stage(requested), None);
    assert_eq!(world.chunks().stage(processing), None);
}
