//! Tracking which chunk levels need their meshes rebuilt.
//!
//! Each (chunk, level) key has a generation counter, which is bumped on every voxel change
//! affecting that level. A rebuild job captures the generation at the time it starts, and when it
//! completes its result is displayed unless a job for a newer generation has already been
//! displayed. At most one job is in flight per key. Edits which land while a job is in flight
//! leave the key dirty, so a follow-up job is started once the in-flight one completes.

use chunk_data::{
    ChunkCoord,
    chunk_name,
};
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    fmt::{self, Formatter, Display},
};


/// Key of a separately meshed vertical level of a chunk.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MeshKey {
    pub cc: ChunkCoord,
    pub level: u32,
}

impl MeshKey {
    pub fn new(cc: ChunkCoord, level: u32) -> Self {
        MeshKey { cc, level }
    }
}

impl Display for MeshKey {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}:{}", chunk_name(self.cc), self.level)
    }
}

/// Mesh generation state of a key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct MeshState {
    /// Bumped on every voxel change.
    pub generation: u64,
    /// Generation of the job in flight, if any.
    pub in_flight_generation: Option<u64>,
    /// Generation of the mesh being displayed.
    pub displayed_generation: u64,
}

impl MeshState {
    fn is_stale(&self) -> bool {
        self.generation != self.displayed_generation
    }
}

/// Outcome of completing a job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct JobCompletion {
    /// Whether the job's result should be displayed.
    pub accepted: bool,
    /// Whether the key's generation has moved past what's displayed, so another job is needed.
    pub needs_remesh: bool,
}


/// Mesh generation state of every (chunk, level) key. See module docs.
#[derive(Debug, Default)]
pub struct MeshPipeline {
    states: HashMap<MeshKey, MeshState>,
    // keys which may need a job. may contain keys which turn out not to on inspection, which are
    // cleaned up lazily.
    dirty: HashSet<MeshKey>,
    // levels with state, per chunk
    keys_by_chunk: HashMap<ChunkCoord, HashSet<u32>>,
    in_flight_count: usize,
}

impl MeshPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&mut self, key: MeshKey) -> &mut MeshState {
        let keys_by_chunk = &mut self.keys_by_chunk;
        self.states
            .entry(key)
            .or_insert_with(|| {
                keys_by_chunk.entry(key.cc).or_default().insert(key.level);
                MeshState::default()
            })
    }

    /// State of a key, if it has any.
    pub fn state(&self, key: MeshKey) -> Option<&MeshState> {
        self.states.get(&key)
    }

    /// Register a voxel change affecting the key, bumping its generation.
    pub fn on_voxel_change(&mut self, key: MeshKey) {
        self.get_or_create(key).generation += 1;
        self.dirty.insert(key);
    }

    /// Whether a job may start for the key now.
    pub fn should_start_job(&self, key: MeshKey) -> bool {
        self.states
            .get(&key)
            .map(|state| state.in_flight_generation.is_none() && state.is_stale())
            .unwrap_or(false)
    }

    /// Start a job for the key if one may start now, returning the generation it's for.
    pub fn start_job(&mut self, key: MeshKey) -> Option<u64> {
        let state = self.states.get_mut(&key)?;
        if state.in_flight_generation.is_some() || !state.is_stale() {
            return None;
        }
        state.in_flight_generation = Some(state.generation);
        self.in_flight_count += 1;
        self.dirty.remove(&key);
        Some(state.generation)
    }

    /// Forget the in-flight job for the key without displaying anything, because it failed.
    /// Returns whether the key needs another job.
    pub fn abort_job(&mut self, key: MeshKey) -> bool {
        let state = match self.states.get_mut(&key) {
            Some(state) => state,
            None => return false,
        };
        if state.in_flight_generation.take().is_some() {
            self.in_flight_count -= 1;
        }
        let needs_remesh = state.generation > state.displayed_generation;
        if needs_remesh {
            self.dirty.insert(key);
        }
        needs_remesh
    }

    /// Complete the in-flight job for the key, returning whether its result should be
    /// displayed.
    pub fn on_job_complete(&mut self, key: MeshKey, job_generation: u64) -> bool {
        self.complete_job_status(key, job_generation).accepted
    }

    /// Complete the in-flight job for the key.
    ///
    /// The result is accepted unless a newer generation has already been displayed. Completing
    /// a job for an unknown key accepts nothing. Completing a job other than the one in flight
    /// leaves the in-flight one in place.
    pub fn complete_job_status(&mut self, key: MeshKey, job_generation: u64) -> JobCompletion {
        let state = match self.states.get_mut(&key) {
            Some(state) => state,
            None => return JobCompletion::default(),
        };
        // a superseded job must not release the slot of the job started after it
        if state.in_flight_generation == Some(job_generation) {
            state.in_flight_generation = None;
            self.in_flight_count -= 1;
        }
        if job_generation < state.displayed_generation {
            return JobCompletion {
                accepted: false,
                needs_remesh: state.generation > state.displayed_generation,
            };
        }
        state.displayed_generation = job_generation;
        JobCompletion {
            accepted: true,
            needs_remesh: state.generation > state.displayed_generation,
        }
    }

    /// Whether the key's generation has moved past what's displayed.
    pub fn needs_remesh(&self, key: MeshKey) -> bool {
        self.states
            .get(&key)
            .map(|state| state.generation > state.displayed_generation)
            .unwrap_or(false)
    }

    /// Mark the key as displaying its current generation, because a mesh for it arrived from the
    /// server. Forgets any job in flight for it.
    pub fn mark_fresh_from_server(&mut self, key: MeshKey) {
        let state = self.get_or_create(key);
        let had_in_flight = state.in_flight_generation.take().is_some();
        state.displayed_generation = state.generation;
        if had_in_flight {
            self.in_flight_count -= 1;
        }
        self.dirty.remove(&key);
    }

    /// Up to `max` keys which a job may start for now, and whether there are more beyond that.
    pub fn dirty_keys(&mut self, max: usize) -> (Vec<MeshKey>, bool) {
        let mut keys = Vec::new();
        let mut has_more = false;
        if max == 0 {
            return (keys, has_more);
        }
        let states = &self.states;
        self.dirty.retain(|key| match states.get(key) {
            None => false,
            Some(state) if state.in_flight_generation.is_some() => true,
            Some(state) if !state.is_stale() => false,
            Some(_) => {
                if keys.len() < max {
                    keys.push(*key);
                } else {
                    has_more = true;
                }
                true
            }
        });
        (keys, has_more)
    }

    /// Whether there is any key which a job may start for now.
    pub fn has_dirty(&self) -> bool {
        self.dirty
            .iter()
            .any(|&key| self.should_start_job(key))
    }

    /// Whether there's a job in flight for the key.
    pub fn has_in_flight_job(&self, key: MeshKey) -> bool {
        self.states
            .get(&key)
            .map(|state| state.in_flight_generation.is_some())
            .unwrap_or(false)
    }

    /// Whether there's a job in flight for any key.
    pub fn has_any_in_flight(&self) -> bool {
        self.in_flight_count > 0
    }

    /// Number of jobs in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight_count
    }

    /// Forget all levels of a chunk.
    pub fn remove(&mut self, cc: ChunkCoord) {
        let levels = match self.keys_by_chunk.remove(&cc) {
            Some(levels) => levels,
            None => return,
        };
        for level in levels {
            let key = MeshKey::new(cc, level);
            if let Some(state) = self.states.remove(&key) {
                if state.in_flight_generation.is_some() {
                    self.in_flight_count -= 1;
                }
            }
            self.dirty.remove(&key);
        }
    }
}


#[cfg(test)]
fn key(x: i32, z: i32, level: u32) -> MeshKey {
    MeshKey::new(vek::Vec2::new(x, z), level)
}

#[test]
fn test_single_job() {
    let mut pipeline = MeshPipeline::new();
    let k = key(0, 0, 1);
    assert!(!pipeline.should_start_job(k));
    assert_eq!(pipeline.start_job(k), None);

    pipeline.on_voxel_change(k);
    assert!(pipeline.should_start_job(k));
    assert!(pipeline.has_dirty());
    assert_eq!(pipeline.start_job(k), Some(1));
    assert!(pipeline.has_in_flight_job(k));
    assert!(pipeline.has_any_in_flight());
    assert!(!pipeline.has_dirty());
    assert_eq!(pipeline.start_job(k), None);

    assert!(pipeline.on_job_complete(k, 1));
    assert!(!pipeline.has_in_flight_job(k));
    assert!(!pipeline.has_any_in_flight());
    assert_eq!(pipeline.state(k).unwrap().displayed_generation, 1);
    assert_eq!(pipeline.start_job(k), None);
}

#[test]
fn test_edit_during_job() {
    let mut pipeline = MeshPipeline::new();
    let k = key(2, -1, 0);
    pipeline.on_voxel_change(k);
    assert_eq!(pipeline.start_job(k), Some(1));
    pipeline.on_voxel_change(k);
    // in flight blocks a second job
    assert!(!pipeline.should_start_job(k));
    assert_eq!(pipeline.dirty_keys(10), (vec![], false));

    let status = pipeline.complete_job_status(k, 1);
    assert_eq!(status, JobCompletion { accepted: true, needs_remesh: true });
    assert_eq!(pipeline.dirty_keys(10), (vec![k], false));
    assert_eq!(pipeline.start_job(k), Some(2));
    assert!(pipeline.on_job_complete(k, 2));
    assert!(!pipeline.needs_remesh(k));
}

#[test]
fn test_stale_completion_discarded() {
    let mut pipeline = MeshPipeline::new();
    let k = key(0, 0, 0);
    pipeline.on_voxel_change(k);
    pipeline.on_voxel_change(k);
    assert_eq!(pipeline.start_job(k), Some(2));
    assert!(pipeline.on_job_complete(k, 2));

    // a job for generation 1 completing after generation 2 was displayed
    assert!(!pipeline.on_job_complete(k, 1));
    assert_eq!(pipeline.state(k).unwrap().displayed_generation, 2);
}

#[test]
fn test_at_most_one_in_flight() {
    let mut pipeline = MeshPipeline::new();
    let k = key(5, 5, 3);
    let mut in_flight = None;
    for step in 0..50u32 {
        match step % 3 {
            0 => pipeline.on_voxel_change(k),
            1 => {
                let started = pipeline.start_job(k);
                if started.is_some() {
                    assert!(in_flight.is_none(), "second job started while one in flight");
                    in_flight = started;
                }
            }
            _ => {
                if step % 5 == 0 {
                    if let Some(generation) = in_flight.take() {
                        pipeline.on_job_complete(k, generation);
                    }
                }
            }
        }
        assert_eq!(pipeline.has_in_flight_job(k), in_flight.is_some());
    }
}

#[test]
fn test_abort_job() {
    let mut pipeline = MeshPipeline::new();
    let k = key(0, 1, 0);
    pipeline.on_voxel_change(k);
    pipeline.start_job(k);
    assert!(pipeline.abort_job(k));
    assert!(!pipeline.has_any_in_flight());
    assert_eq!(pipeline.dirty_keys(1), (vec![k], false));
    assert!(!pipeline.abort_job(key(9, 9, 9)));
}

#[test]
fn test_fresh_from_server() {
    let mut pipeline = MeshPipeline::new();
    let k = key(1, 1, 2);
    pipeline.on_voxel_change(k);
    pipeline.start_job(k);
    pipeline.on_voxel_change(k);
    pipeline.mark_fresh_from_server(k);
    assert!(!pipeline.has_any_in_flight());
    assert!(!pipeline.should_start_job(k));
    assert!(!pipeline.has_dirty());
    assert_eq!(pipeline.state(k).unwrap().displayed_generation, 2);

    // fresh for a key never seen before
    let k2 = key(1, 1, 3);
    pipeline.mark_fresh_from_server(k2);
    assert_eq!(pipeline.state(k2), Some(&MeshState::default()));
}

#[test]
fn test_superseded_job_keeps_newer_in_flight() {
    let mut pipeline = MeshPipeline::new();
    let k = key(0, 2, 0);
    pipeline.on_voxel_change(k);
    assert_eq!(pipeline.start_job(k), Some(1));
    pipeline.on_voxel_change(k);
    pipeline.mark_fresh_from_server(k);
    pipeline.on_voxel_change(k);
    assert_eq!(pipeline.start_job(k), Some(3));

    // the generation 1 job finishing late
    assert!(!pipeline.on_job_complete(k, 1));
    assert!(pipeline.has_in_flight_job(k));
    assert_eq!(pipeline.in_flight_count(), 1);
    assert_eq!(pipeline.start_job(k), None);
    assert_eq!(pipeline.state(k).unwrap().displayed_generation, 2);

    assert!(pipeline.on_job_complete(k, 3));
    assert!(!pipeline.has_any_in_flight());
}

#[test]
fn test_dirty_keys_limit() {
    let mut pipeline = MeshPipeline::new();
    for level in 0..5 {
        pipeline.on_voxel_change(key(0, 0, level));
    }
    let (keys, has_more) = pipeline.dirty_keys(3);
    assert_eq!(keys.len(), 3);
    assert!(has_more);
    let (keys, has_more) = pipeline.dirty_keys(5);
    assert_eq!(keys.len(), 5);
    assert!(!has_more);
    assert_eq!(pipeline.dirty_keys(0), (vec![], false));
}

#[test]
fn test_remove_chunk() {
    let mut pipeline = MeshPipeline::new();
    pipeline.on_voxel_change(key(0, 0, 0));
    pipeline.on_voxel_change(key(0, 0, 1));
    pipeline.on_voxel_change(key(1, 0, 0));
    pipeline.start_job(key(0, 0, 0));
    pipeline.remove(vek::Vec2::new(0, 0));

    assert!(!pipeline.has_any_in_flight());
    assert_eq!(pipeline.state(key(0, 0, 1)), None);
    assert_eq!(pipeline.dirty_keys(10), (vec![key(1, 0, 0)], false));
    // completion after removal is tolerated and accepts nothing
    assert_eq!(pipeline.complete_job_status(key(0, 0, 0), 1), JobCompletion::default());
}
