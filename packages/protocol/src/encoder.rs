//! Encoding of messages into frames.

use crate::{
    error::{
        Result,
        Error,
    },
    var_len::{
        write_var_len_uint,
        write_var_len_sint,
        write_tag,
    },
    compression::{
        Compression,
        compress,
    },
    typed::{
        Element,
        to_le_bytes,
    },
    message::*,
};
use chunk_data::ChunkCoord;
use serde_json::Value;


/// How to compress an encoded frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Compression applied to the whole frame.
    pub frame: Compression,
    /// Compression applied to each voxel, light, and geometry buffer.
    pub buffers: Compression,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            frame: Compression::None,
            buffers: Compression::None,
        }
    }
}


/// Encode a message as the server would send it.
pub fn encode_down(msg: &DownMsg, options: EncodeOptions) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new(options.buffers);
    encoder.write_down_msg(msg)?;
    compress(&encoder.into_bytes(), options.frame)
}

/// Encode a message to send to the server.
pub fn encode_up(msg: &UpMsg) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new(Compression::None);
    encoder.write_up_msg(msg)?;
    Ok(encoder.into_bytes())
}


/// Writes primitive values into a frame body.
pub struct Encoder {
    buf: Vec<u8>,
    buffers: Compression,
}

impl Encoder {
    pub fn new(buffers: Compression) -> Self {
        Encoder {
            buf: Vec::new(),
            buffers,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u64(&mut self, n: u64) -> Result<()> {
        write_var_len_uint(&mut self.buf, n)
    }

    pub fn write_u32(&mut self, n: u32) -> Result<()> {
        self.write_u64(n as u64)
    }

    pub fn write_i32(&mut self, n: i32) -> Result<()> {
        write_var_len_sint(&mut self.buf, n as i64)
    }

    pub fn write_bool(&mut self, b: bool) -> Result<()> {
        self.buf.push(b as u8);
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_u64(bytes.len() as u64)?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_str(&mut self, s: &str) -> Result<()> {
        self.write_bytes(s.as_bytes())
    }

    /// Write a JSON-text field.
    pub fn write_json(&mut self, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value).map_err(Error::other)?;
        self.write_str(&text)
    }

    pub fn write_option<T, F>(&mut self, option: Option<&T>, mut f: F) -> Result<()>
    where
        T: ?Sized,
        F: FnMut(&mut Self, &T) -> Result<()>,
    {
        self.write_bool(option.is_some())?;
        if let Some(val) = option {
            f(self, val)?;
        }
        Ok(())
    }

    pub fn write_list<T, F>(&mut self, list: &[T], mut f: F) -> Result<()>
    where
        F: FnMut(&mut Self, &T) -> Result<()>,
    {
        self.write_u64(list.len() as u64)?;
        for elem in list {
            f(self, elem)?;
        }
        Ok(())
    }

    /// Write a typed array as bytes, compressed with the configured buffer compression.
    pub fn write_typed<T: Element>(&mut self, elems: &[T]) -> Result<()> {
        let bytes = compress(&to_le_bytes(elems), self.buffers)?;
        self.write_bytes(&bytes)
    }

    pub fn write_chunk_coord(&mut self, cc: &ChunkCoord) -> Result<()> {
        self.write_i32(cc.x)?;
        self.write_i32(cc.y)
    }

    pub fn write_voxel_update(&mut self, update: &VoxelUpdate) -> Result<()> {
        self.write_i32(update.vx)?;
        self.write_i32(update.vy)?;
        self.write_i32(update.vz)?;
        self.write_u32(update.voxel)?;
        self.write_option(update.light.as_ref(), |e, &light| e.write_u32(light))
    }

    pub fn write_geometry(&mut self, geometry: &Geometry) -> Result<()> {
        self.write_u32(geometry.voxel)?;
        self.write_option(geometry.face_name.as_deref(), Self::write_str)?;
        self.write_typed(&geometry.positions)?;
        self.write_typed(&geometry.uvs)?;
        self.write_typed(&geometry.indices)?;
        self.write_typed(&geometry.lights)
    }

    pub fn write_level_mesh(&mut self, mesh: &LevelMesh) -> Result<()> {
        self.write_u32(mesh.level)?;
        self.write_list(&mesh.geometries, Self::write_geometry)
    }

    pub fn write_chunk_payload(&mut self, chunk: &ChunkPayload) -> Result<()> {
        self.write_i32(chunk.x)?;
        self.write_i32(chunk.z)?;
        self.write_str(&chunk.id)?;
        self.write_option(chunk.voxels.as_deref(), Self::write_typed)?;
        self.write_option(chunk.lights.as_deref(), Self::write_typed)?;
        self.write_list(&chunk.meshes, Self::write_level_mesh)
    }

    pub fn write_down_msg(&mut self, msg: &DownMsg) -> Result<()> {
        write_tag(&mut self.buf, msg.kind() as usize, DownMsgKind::NUM_VARIANTS)?;
        match msg {
            &DownMsg::Init(ref json) => self.write_json(json),
            &DownMsg::Error(ref text) => self.write_str(text),
            &DownMsg::Stats(ref json) => self.write_json(json),
            &DownMsg::Load(ref chunks) => self.write_list(chunks, Self::write_chunk_payload),
            &DownMsg::Update(ref update) => {
                self.write_list(&update.updates, Self::write_voxel_update)?;
                self.write_list(&update.chunks, Self::write_chunk_payload)
            }
            &DownMsg::Chat(ref text) => self.write_str(text),
            &DownMsg::Peer(ref peers) => self.write_list(peers, |e, peer| {
                e.write_str(&peer.id)?;
                e.write_str(&peer.username)?;
                e.write_json(&peer.metadata)
            }),
            &DownMsg::Entity(ref entities) => self.write_list(entities, |e, entity| {
                e.write_str(&entity.id)?;
                e.write_str(&entity.kind)?;
                e.write_json(&entity.metadata)
            }),
            &DownMsg::Event(ref events) => self.write_list(events, |e, event| {
                e.write_str(&event.name)?;
                e.write_json(&event.payload)
            }),
        }
    }

    pub fn write_up_msg(&mut self, msg: &UpMsg) -> Result<()> {
        write_tag(&mut self.buf, msg.kind() as usize, UpMsgKind::NUM_VARIANTS)?;
        match msg {
            &UpMsg::Load(ref load) => {
                self.write_option(load.center.as_ref(), Self::write_chunk_coord)?;
                self.write_list(&load.chunks, Self::write_chunk_coord)
            }
            &UpMsg::Unload(ref chunks) => self.write_list(chunks, Self::write_chunk_coord),
            &UpMsg::Update(ref updates) => self.write_list(updates, Self::write_voxel_update),
        }
    }
}
