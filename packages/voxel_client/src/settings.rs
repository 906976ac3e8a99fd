//! Client-side tunables, loaded from a JSON file.

use crate::worker_pool::normalize_worker_count;
use std::{
    path::Path,
    fs::File,
    io::{
        BufReader,
        BufWriter,
    },
};
use serde::{Serialize, Deserialize};
use anyhow::*;


pub const SETTINGS_FILE_NAME: &'static str = "settings.json";


/// Client settings. Missing fields take their default values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub world: WorldSettings,
    pub network: NetworkSettings,
}

impl Settings {
    pub fn read(path: impl AsRef<Path>) -> Self {
        Self::try_read(path).unwrap_or_default()
    }

    pub fn try_read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("opening settings file {}", path.display()))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), self)?;
        Ok(())
    }
}


/// Per-tick work budgets and radii for the world tick loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSettings {
    /// Most chunks asked for in one `LOAD` message.
    pub max_requests_per_tick: usize,
    /// Most received chunks turned into loaded chunks per tick.
    pub max_processes_per_tick: usize,
    /// Most local voxel edits sent per tick.
    pub max_updates_per_tick: usize,
    /// Most newly loaded chunks handed to the renderer per tick.
    pub max_adds_per_tick: usize,
    /// Most mesh jobs started per tick.
    pub max_mesh_jobs_per_tick: usize,
    /// Ticks a request may go unanswered before the chunk is asked for again.
    pub rerequest_ticks: u32,
    /// Radius, in chunks, within which chunks are requested.
    pub default_render_radius: u32,
    /// Radius, in chunks, beyond which chunks are evicted. Derived from the render radius if
    /// absent.
    pub default_delete_radius: Option<u32>,
    /// Whether to build meshes locally.
    pub generate_meshes: bool,
    /// Mesh worker threads. 0 means the number of CPUs.
    pub mesh_workers: usize,
}

impl Default for WorldSettings {
    fn default() -> Self {
        WorldSettings {
            max_requests_per_tick: 4,
            max_processes_per_tick: 8,
            max_updates_per_tick: 1000,
            max_adds_per_tick: 2,
            max_mesh_jobs_per_tick: 8,
            rerequest_ticks: 1_000_000,
            default_render_radius: 8,
            default_delete_radius: Some(12),
            generate_meshes: true,
            mesh_workers: 0,
        }
    }
}

impl WorldSettings {
    /// Number of mesh worker threads to actually spawn.
    pub fn mesh_worker_count(&self) -> usize {
        cpu_worker_count(self.mesh_workers)
    }
}


/// Network connection and decoding settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Server websocket url.
    pub url: String,
    /// Most frames submitted in one decode batch.
    pub max_packets_per_tick: usize,
    /// Decode worker threads. 0 means the number of CPUs.
    pub decode_workers: usize,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        NetworkSettings {
            url: "ws://127.0.0.1:4000/".to_owned(),
            max_packets_per_tick: 16,
            decode_workers: 0,
        }
    }
}

impl NetworkSettings {
    /// Number of decode worker threads to actually spawn.
    pub fn decode_worker_count(&self) -> usize {
        cpu_worker_count(self.decode_workers)
    }
}

// 0 means one per cpu
fn cpu_worker_count(count: usize) -> usize {
    if count == 0 {
        normalize_worker_count(num_cpus::get())
    } else {
        normalize_worker_count(count)
    }
}

/// Delete radius to use for a render radius when none is configured.
pub fn derive_delete_radius(render_radius: u32) -> u32 {
    render_radius + (render_radius / 2).max(1)
}


#[test]
fn test_partial_settings_json() {
    let settings: Settings = serde_json::from_str(r#"{
        "world": { "max_requests_per_tick": 2, "generate_meshes": false },
        "network": { "url": "ws://example.com:9000/" }
    }"#).unwrap();
    assert_eq!(settings.world.max_requests_per_tick, 2);
    assert!(!settings.world.generate_meshes);
    assert_eq!(settings.world.max_processes_per_tick, 8);
    assert_eq!(settings.network.url, "ws://example.com:9000/");
    assert_eq!(settings.network.max_packets_per_tick, 16);
}

#[test]
fn test_worker_counts() {
    let mut world = WorldSettings::default();
    assert!(world.mesh_worker_count() >= 1);
    world.mesh_workers = 10_000;
    assert_eq!(world.mesh_worker_count(), 256);
    world.mesh_workers = 3;
    assert_eq!(world.mesh_worker_count(), 3);
}

#[test]
fn test_settings_file_round_trip() {
    let path = std::env::temp_dir()
        .join(format!("voxel_client_settings_test_{}.json", std::process::id()));
    let mut settings = Settings::default();
    settings.world.default_render_radius = 3;
    settings.world.default_delete_radius = None;
    settings.write(&path).unwrap();
    let read = Settings::try_read(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert_eq!(read.world, settings.world);
    assert_eq!(read.network, settings.network);
    assert!(Settings::try_read(&path).is_err());
    assert_eq!(Settings::read(&path).world, WorldSettings::default());
}

#[test]
fn test_derive_delete_radius() {
    assert_eq!(derive_delete_radius(8), 12);
    assert_eq!(derive_delete_radius(1), 2);
    assert_eq!(derive_delete_radius(0), 1);
}
