//! Lifecycle state of each chunk the client knows about.
//!
//! Every known chunk is in exactly one stage:
//!
//! - `Requested`: asked for from the server, waiting for a payload.
//! - `Processing`: payload received, waiting to be turned into a loaded chunk. If the chunk was
//!   already loaded when the payload arrived (an update), the loaded chunk is carried along so
//!   that it stays queryable and its renderer resources aren't lost.
//! - `Loaded`: resident and renderable.
//!
//! The stage of each chunk is also indexed by stage, so stage membership and counts never
//! require scanning all chunks.

use chunk_data::{
    Chunk,
    ChunkCoord,
    chunk_name,
};
use protocol::ChunkPayload;
use std::collections::{
    HashMap,
    HashSet,
    hash_map,
};


/// Which message a processing payload came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProcessSource {
    Load,
    Update,
}

/// Stage of a chunk, without the stage's data.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StageKind {
    Requested,
    Processing,
    Loaded,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [
        StageKind::Requested,
        StageKind::Processing,
        StageKind::Loaded,
    ];

    fn idx(self) -> usize {
        self as usize
    }
}

/// Stage of a chunk, with the stage's data.
#[derive(Debug)]
pub enum ChunkStage<M> {
    Requested {
        /// Times `should_request` has passed over this request.
        retry_count: u32,
        /// Tick the request was made on.
        requested_at: u64,
    },
    Processing {
        source: ProcessSource,
        data: ChunkPayload,
        /// The chunk, if it was loaded before this payload arrived.
        existing: Option<Chunk<M>>,
    },
    Loaded {
        chunk: Chunk<M>,
    },
}

impl<M> ChunkStage<M> {
    pub fn kind(&self) -> StageKind {
        match self {
            &ChunkStage::Requested { .. } => StageKind::Requested,
            &ChunkStage::Processing { .. } => StageKind::Processing,
            &ChunkStage::Loaded { .. } => StageKind::Loaded,
        }
    }
}

/// Payload taken out of the processing stage.
#[derive(Debug)]
pub struct TakenProcessing<M> {
    pub source: ProcessSource,
    pub data: ChunkPayload,
    pub existing: Option<Chunk<M>>,
}


/// Lifecycle state of each chunk the client knows about. See module docs.
#[derive(Debug)]
pub struct ChunkPipeline<M> {
    states: HashMap<ChunkCoord, ChunkStage<M>>,
    // coords in each stage, indexed by `StageKind::idx`
    indices: [HashSet<ChunkCoord>; 3],
}

impl<M> Default for ChunkPipeline<M> {
    fn default() -> Self {
        ChunkPipeline {
            states: HashMap::new(),
            indices: Default::default(),
        }
    }
}

impl<M> ChunkPipeline<M> {
    pub fn new() -> Self {
        Self::default()
    }

    // set the stage of a chunk, moving it between indices
    fn set_stage(&mut self, cc: ChunkCoord, stage: ChunkStage<M>) -> Option<ChunkStage<M>> {
        let new_kind = stage.kind();
        let old = self.states.insert(cc, stage);
        if let Some(ref old) = old {
            self.indices[old.kind().idx()].remove(&cc);
        }
        self.indices[new_kind.idx()].insert(cc);
        self.debug_check(cc);
        old
    }

    // remove a chunk from both the map and its index
    fn remove_stage(&mut self, cc: ChunkCoord) -> Option<ChunkStage<M>> {
        let old = self.states.remove(&cc)?;
        self.indices[old.kind().idx()].remove(&cc);
        self.debug_check(cc);
        Some(old)
    }

    // assert that the chunk is indexed in exactly the stage it's in
    fn debug_check(&self, cc: ChunkCoord) {
        if cfg!(debug_assertions) {
            let member_of = StageKind::ALL
                .iter()
                .filter(|kind| self.indices[kind.idx()].contains(&cc))
                .count();
            match self.states.get(&cc) {
                Some(stage) => {
                    assert_eq!(member_of, 1, "chunk {} indexed in {} stages", chunk_name(cc), member_of);
                    assert!(
                        self.indices[stage.kind().idx()].contains(&cc),
                        "chunk {} indexed in wrong stage",
                        chunk_name(cc),
                    );
                }
                None => assert_eq!(member_of, 0, "absent chunk {} is indexed", chunk_name(cc)),
            }
        }
    }

    /// Stage the chunk is in, if any.
    pub fn stage(&self, cc: ChunkCoord) -> Option<StageKind> {
        self.states.get(&cc).map(ChunkStage::kind)
    }

    /// Stage the chunk is in, with its data.
    pub fn get(&self, cc: ChunkCoord) -> Option<&ChunkStage<M>> {
        self.states.get(&cc)
    }

    pub fn is_in_stage(&self, cc: ChunkCoord, kind: StageKind) -> bool {
        self.indices[kind.idx()].contains(&cc)
    }

    /// All chunks in the given stage.
    pub fn coords_in_stage(&self, kind: StageKind) -> &HashSet<ChunkCoord> {
        &self.indices[kind.idx()]
    }

    /// Number of chunks in the given stage.
    pub fn count(&self, kind: StageKind) -> usize {
        self.indices[kind.idx()].len()
    }

    /// Number of chunks in any stage.
    pub fn total_count(&self) -> usize {
        self.states.len()
    }

    /// Put the chunk in the requested stage with a fresh retry count, overwriting any prior
    /// stage.
    pub fn mark_requested(&mut self, cc: ChunkCoord, now: u64) {
        self.set_stage(cc, ChunkStage::Requested {
            retry_count: 0,
            requested_at: now,
        });
    }

    /// Increment and return the retry count, or return 0 if not requested.
    pub fn increment_retry(&mut self, cc: ChunkCoord) -> u32 {
        match self.states.get_mut(&cc) {
            Some(&mut ChunkStage::Requested { ref mut retry_count, .. }) => {
                *retry_count = retry_count.saturating_add(1);
                *retry_count
            }
            _ => 0,
        }
    }

    /// Reset the retry count if requested.
    pub fn reset_retry(&mut self, cc: ChunkCoord) {
        if let Some(&mut ChunkStage::Requested { ref mut retry_count, .. }) =
            self.states.get_mut(&cc)
        {
            *retry_count = 0;
        }
    }

    /// Retry count if requested, otherwise 0.
    pub fn retry_count(&self, cc: ChunkCoord) -> u32 {
        match self.states.get(&cc) {
            Some(&ChunkStage::Requested { retry_count, .. }) => retry_count,
            _ => 0,
        }
    }

    /// Whether the chunk should be (re-)requested.
    ///
    /// True if the chunk is unknown. False if it's processing or loaded. If it's requested,
    /// counts a retry, and once the count exceeds `rerequest_limit` forgets the request and
    /// returns true.
    pub fn should_request(&mut self, cc: ChunkCoord, rerequest_limit: u32) -> bool {
        match self.states.get_mut(&cc) {
            None => true,
            Some(&mut ChunkStage::Requested { ref mut retry_count, .. }) => {
                *retry_count = retry_count.saturating_add(1);
                if *retry_count > rerequest_limit {
                    self.remove_stage(cc);
                    true
                } else {
                    false
                }
            }
            Some(_) => false,
        }
    }

    /// Put a received payload in the processing stage.
    ///
    /// If already processing, merges the payload into the pending one. If loaded, the loaded
    /// chunk is carried along with the payload.
    pub fn mark_processing(&mut self, cc: ChunkCoord, source: ProcessSource, data: ChunkPayload) {
        debug_assert_eq!(data.cc(), cc, "payload marked processing under wrong coord");
        if let Some(&mut ChunkStage::Processing {
            source: ref mut old_source,
            data: ref mut old_data,
            ..
        }) = self.states.get_mut(&cc) {
            old_data.merge(data);
            *old_source = source;
            return;
        }
        let existing = match self.remove_stage(cc) {
            Some(ChunkStage::Loaded { chunk }) => Some(chunk),
            _ => None,
        };
        self.set_stage(cc, ChunkStage::Processing { source, data, existing });
    }

    /// Put the chunk in the loaded stage.
    pub fn mark_loaded(&mut self, cc: ChunkCoord, chunk: Chunk<M>) {
        debug_assert_eq!(chunk.cc, cc, "chunk marked loaded under wrong coord");
        self.set_stage(cc, ChunkStage::Loaded { chunk });
    }

    /// Forget the chunk, whatever stage it's in. Returns the chunk object if there was one,
    /// which the caller is responsible for releasing the renderer resources of.
    pub fn remove(&mut self, cc: ChunkCoord) -> Option<Chunk<M>> {
        match self.remove_stage(cc)? {
            ChunkStage::Loaded { chunk } => Some(chunk),
            ChunkStage::Processing { existing, .. } => existing,
            ChunkStage::Requested { .. } => None,
        }
    }

    /// Take a payload out of the processing stage, leaving the chunk absent until it's marked
    /// loaded.
    pub fn take_processing(&mut self, cc: ChunkCoord) -> Option<TakenProcessing<M>> {
        if !self.is_in_stage(cc, StageKind::Processing) {
            return None;
        }
        match self.remove_stage(cc) {
            Some(ChunkStage::Processing { source, data, existing }) => {
                Some(TakenProcessing { source, data, existing })
            }
            _ => None,
        }
    }

    /// Pending payload, if processing.
    pub fn processing_data(&self, cc: ChunkCoord) -> Option<(ProcessSource, &ChunkPayload)> {
        match self.states.get(&cc) {
            Some(&ChunkStage::Processing { source, ref data, .. }) => Some((source, data)),
            _ => None,
        }
    }

    /// The chunk, if loaded.
    pub fn loaded_chunk(&self, cc: ChunkCoord) -> Option<&Chunk<M>> {
        match self.states.get(&cc) {
            Some(&ChunkStage::Loaded { ref chunk }) => Some(chunk),
            _ => None,
        }
    }

    /// The chunk, if loaded.
    pub fn loaded_chunk_mut(&mut self, cc: ChunkCoord) -> Option<&mut Chunk<M>> {
        match self.states.get_mut(&cc) {
            Some(&mut ChunkStage::Loaded { ref mut chunk }) => Some(chunk),
            _ => None,
        }
    }

    /// The chunk object if there is one, whether loaded or carried through processing.
    pub fn resident_chunk(&self, cc: ChunkCoord) -> Option<&Chunk<M>> {
        match self.states.get(&cc) {
            Some(&ChunkStage::Loaded { ref chunk }) => Some(chunk),
            Some(&ChunkStage::Processing { existing: Some(ref chunk), .. }) => Some(chunk),
            _ => None,
        }
    }

    /// The chunk object if there is one, whether loaded or carried through processing.
    pub fn resident_chunk_mut(&mut self, cc: ChunkCoord) -> Option<&mut Chunk<M>> {
        match self.states.get_mut(&cc) {
            Some(&mut ChunkStage::Loaded { ref mut chunk }) => Some(chunk),
            Some(&mut ChunkStage::Processing { existing: Some(ref mut chunk), .. }) => Some(chunk),
            _ => None,
        }
    }

    /// Requested chunks, with their retry counts and request ticks.
    pub fn requested_entries(&self) -> impl Iterator<Item=(ChunkCoord, u32, u64)> + '_ {
        self.indices[StageKind::Requested.idx()]
            .iter()
            .filter_map(move |&cc| match self.states.get(&cc) {
                Some(&ChunkStage::Requested { retry_count, requested_at }) => {
                    Some((cc, retry_count, requested_at))
                }
                _ => None,
            })
    }

    /// Processing chunks, with their pending payloads.
    pub fn processing_entries(&self) -> impl Iterator<Item=(ChunkCoord, &ChunkPayload)> + '_ {
        self.indices[StageKind::Processing.idx()]
            .iter()
            .filter_map(move |&cc| match self.states.get(&cc) {
                Some(&ChunkStage::Processing { ref data, .. }) => Some((cc, data)),
                _ => None,
            })
    }

    /// Loaded chunks.
    pub fn loaded_entries(&self) -> impl Iterator<Item=(ChunkCoord, &Chunk<M>)> + '_ {
        self.indices[StageKind::Loaded.idx()]
            .iter()
            .filter_map(move |&cc| match self.states.get(&cc) {
                Some(&ChunkStage::Loaded { ref chunk }) => Some((cc, chunk)),
                _ => None,
            })
    }

    /// Iterate through all chunks and their stages.
    pub fn iter(&self) -> hash_map::Iter<'_, ChunkCoord, ChunkStage<M>> {
        self.states.iter()
    }
}


#[cfg(test)]
fn cc(x: i32, z: i32) -> ChunkCoord {
    vek::Vec2::new(x, z)
}

#[cfg(test)]
fn payload(x: i32, z: i32, voxels: Option<Vec<u32>>) -> ChunkPayload {
    ChunkPayload {
        x,
        z,
        id: format!("{},{}", x, z),
        voxels: voxels.map(Into::into),
        ..Default::default()
    }
}

#[cfg(test)]
fn test_chunk(x: i32, z: i32) -> Chunk<()> {
    Chunk::new(String::new(), cc(x, z), chunk_data::ChunkShape {
        size: 2,
        max_height: 4,
        sub_chunks: 2,
    })
}

#[test]
fn test_stage_exclusivity() {
    let mut pipeline = ChunkPipeline::<()>::new();
    let a = cc(1, -2);
    let check = |pipeline: &ChunkPipeline<()>, expected: Option<StageKind>| {
        assert_eq!(pipeline.stage(a), expected);
        for kind in StageKind::ALL {
            assert_eq!(pipeline.is_in_stage(a, kind), Some(kind) == expected);
        }
        let total: usize = StageKind::ALL.iter().map(|&kind| pipeline.count(kind)).sum();
        assert_eq!(total, pipeline.total_count());
    };

    check(&pipeline, None);
    pipeline.mark_requested(a, 0);
    check(&pipeline, Some(StageKind::Requested));
    pipeline.mark_processing(a, ProcessSource::Load, payload(1, -2, None));
    check(&pipeline, Some(StageKind::Processing));
    pipeline.mark_loaded(a, test_chunk(1, -2));
    check(&pipeline, Some(StageKind::Loaded));
    pipeline.mark_requested(a, 5);
    check(&pipeline, Some(StageKind::Requested));
    pipeline.mark_loaded(a, test_chunk(1, -2));
    pipeline.mark_processing(a, ProcessSource::Update, payload(1, -2, None));
    check(&pipeline, Some(StageKind::Processing));
    assert!(pipeline.remove(a).is_some());
    check(&pipeline, None);
    assert!(pipeline.remove(a).is_none());
}

#[test]
fn test_retry_counts() {
    let mut pipeline = ChunkPipeline::<()>::new();
    let a = cc(0, 0);
    assert_eq!(pipeline.increment_retry(a), 0);
    pipeline.mark_requested(a, 0);
    assert_eq!(pipeline.increment_retry(a), 1);
    assert_eq!(pipeline.increment_retry(a), 2);
    pipeline.reset_retry(a);
    assert_eq!(pipeline.retry_count(a), 0);

    pipeline.mark_processing(a, ProcessSource::Load, payload(0, 0, None));
    assert_eq!(pipeline.increment_retry(a), 0);
    pipeline.reset_retry(a);
    assert_eq!(pipeline.retry_count(a), 0);
}

#[test]
fn test_should_request() {
    let mut pipeline = ChunkPipeline::<()>::new();
    let a = cc(3, 3);
    assert!(pipeline.should_request(a, 2));
    pipeline.mark_requested(a, 0);
    assert!(!pipeline.should_request(a, 2));
    assert!(!pipeline.should_request(a, 2));
    assert_eq!(pipeline.retry_count(a), 2);
    // third pass exceeds the limit and forgets the request
    assert!(pipeline.should_request(a, 2));
    assert_eq!(pipeline.stage(a), None);

    pipeline.mark_processing(a, ProcessSource::Load, payload(3, 3, None));
    assert!(!pipeline.should_request(a, 0));
    pipeline.mark_loaded(a, test_chunk(3, 3));
    assert!(!pipeline.should_request(a, 0));
}

#[test]
fn test_processing_merges() {
    let mut pipeline = ChunkPipeline::<()>::new();
    let a = cc(0, 1);
    pipeline.mark_processing(a, ProcessSource::Load, payload(0, 1, Some(vec![1; 16])));
    let mut newer = payload(0, 1, Some(vec![2; 16]));
    newer.lights = Some(vec![7; 16].into());
    pipeline.mark_processing(a, ProcessSource::Update, newer);
    pipeline.mark_processing(a, ProcessSource::Update, payload(0, 1, None));

    assert_eq!(pipeline.count(StageKind::Processing), 1);
    let (source, data) = pipeline.processing_data(a).unwrap();
    assert_eq!(source, ProcessSource::Update);
    assert_eq!(data.voxels.as_deref(), Some(&[2; 16][..]));
    assert_eq!(data.lights.as_deref(), Some(&[7; 16][..]));
}

#[test]
fn test_loaded_chunk_carried_through_processing() {
    let mut pipeline = ChunkPipeline::<()>::new();
    let a = cc(-1, 0);
    let mut chunk = test_chunk(-1, 0);
    chunk.id = "kept".into();
    pipeline.mark_loaded(a, chunk);
    pipeline.mark_processing(a, ProcessSource::Update, payload(-1, 0, None));

    assert!(pipeline.loaded_chunk(a).is_none());
    assert_eq!(pipeline.resident_chunk(a).map(|c| c.id.as_str()), Some("kept"));
    let taken = pipeline.take_processing(a).unwrap();
    assert_eq!(taken.source, ProcessSource::Update);
    assert_eq!(taken.existing.map(|c| c.id), Some("kept".to_owned()));
    assert_eq!(pipeline.stage(a), None);
    assert!(pipeline.take_processing(a).is_none());
}

#[test]
fn test_entries() {
    let mut pipeline = ChunkPipeline::<()>::new();
    pipeline.mark_requested(cc(0, 0), 7);
    pipeline.increment_retry(cc(0, 0));
    pipeline.mark_processing(cc(1, 0), ProcessSource::Load, payload(1, 0, None));
    pipeline.mark_loaded(cc(2, 0), test_chunk(2, 0));
    pipeline.mark_loaded(cc(3, 0), test_chunk(3, 0));

    assert_eq!(pipeline.requested_entries().collect::<Vec<_>>(), [(cc(0, 0), 1, 7)]);
    assert_eq!(pipeline.processing_entries().map(|(cc, _)| cc).collect::<Vec<_>>(), [cc(1, 0)]);
    let mut loaded: Vec<_> = pipeline.loaded_entries().map(|(cc, _)| cc.x).collect();
    loaded.sort();
    assert_eq!(loaded, [2, 3]);
    assert_eq!(pipeline.total_count(), 4);
    assert!(pipeline.remove(cc(0, 0)).is_none());
    assert!(pipeline.remove(cc(2, 0)).is_some());
    assert_eq!(pipeline.count(StageKind::Loaded), 1);
}
