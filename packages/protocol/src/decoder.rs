//! Decoding of frames into messages.

use crate::{
    error::{
        Result,
        error,
        ensure,
    },
    var_len::{
        read_var_len_uint,
        read_var_len_sint,
        read_tag,
    },
    compression::decompress,
    typed::{
        Element,
        from_le_bytes,
    },
    json::parse_opportunistic,
    message::*,
};
use chunk_data::{
    ChunkCoord,
    OwnedBuf,
};
use serde_json::Value;
use vek::*;


/// Decode a frame received from the server.
pub fn decode_down(frame: &[u8]) -> Result<DownMsg> {
    let body = decompress(frame)?;
    let mut decoder = Decoder::new(&body);
    let msg = decoder.read_down_msg()?;
    decoder.finish()?;
    Ok(msg)
}

/// Decode a frame sent by a client.
pub fn decode_up(frame: &[u8]) -> Result<UpMsg> {
    let body = decompress(frame)?;
    let mut decoder = Decoder::new(&body);
    let msg = decoder.read_up_msg()?;
    decoder.finish()?;
    Ok(msg)
}


/// Reads primitive values from a decompressed frame body.
pub struct Decoder<'a> {
    read: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(read: &'a [u8]) -> Self {
        Decoder { read }
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.read.len()
    }

    /// Error if there are unread bytes.
    pub fn finish(self) -> Result<()> {
        ensure!(
            self.read.is_empty(),
            MalformedData,
            "{} extra bytes at end of frame",
            self.read.len(),
        );
        Ok(())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        read_var_len_uint(&mut self.read)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let n = self.read_u64()?;
        u32::try_from(n).map_err(|_| error!(MalformedData, "{} out of range for a u32", n))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let n = read_var_len_sint(&mut self.read)?;
        i32::try_from(n).map_err(|_| error!(MalformedData, "{} out of range for an i32", n))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        let mut buf = [0];
        std::io::Read::read_exact(&mut self.read, &mut buf)?;
        match buf {
            [0] => Ok(false),
            [1] => Ok(true),
            [b] => Err(error!(MalformedData, "invalid bool byte {}", b)),
        }
    }

    /// Read a length prefix, and validate that at least that many bytes remain. Every element
    /// that follows a length prefix takes at least one byte, so this bounds allocations by the
    /// frame size.
    pub fn read_len(&mut self) -> Result<usize> {
        let n = self.read_u64()?;
        let len = usize::try_from(n)
            .map_err(|_| error!(PlatformLimits, "length {} does not fit in usize", n))?;
        ensure!(
            len <= self.read.len(),
            MalformedData,
            "length {} exceeds remaining {} bytes",
            len,
            self.read.len(),
        );
        Ok(len)
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_len()?;
        let (bytes, rest) = self.read.split_at(len);
        self.read = rest;
        Ok(bytes)
    }

    pub fn read_str(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        let s = std::str::from_utf8(bytes)
            .map_err(|e| error!(MalformedData, "invalid utf8 in string: {}", e))?;
        Ok(s.to_owned())
    }

    /// Read a JSON-text field, parsing it opportunistically.
    pub fn read_json(&mut self) -> Result<Value> {
        Ok(parse_opportunistic(self.read_str()?))
    }

    pub fn read_option<T, F>(&mut self, mut f: F) -> Result<Option<T>>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        Ok(if self.read_bool()? {
            Some(f(self)?)
        } else {
            None
        })
    }

    pub fn read_list<T, F>(&mut self, mut f: F) -> Result<Vec<T>>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        let len = self.read_len()?;
        let mut vec = Vec::with_capacity(len);
        for _ in 0..len {
            vec.push(f(self)?);
        }
        Ok(vec)
    }

    /// Read a byte buffer, decompress it if compressed, and materialize it as a typed array.
    pub fn read_typed<T: Element>(&mut self) -> Result<OwnedBuf<T>> {
        let bytes = self.read_bytes()?;
        from_le_bytes(&decompress(bytes)?)
    }

    pub fn read_chunk_coord(&mut self) -> Result<ChunkCoord> {
        Ok(Vec2::new(self.read_i32()?, self.read_i32()?))
    }

    pub fn read_voxel_update(&mut self) -> Result<VoxelUpdate> {
        Ok(VoxelUpdate {
            vx: self.read_i32()?,
            vy: self.read_i32()?,
            vz: self.read_i32()?,
            voxel: self.read_u32()?,
            light: self.read_option(Self::read_u32)?,
        })
    }

    pub fn read_geometry(&mut self) -> Result<Geometry> {
        Ok(Geometry {
            voxel: self.read_u32()?,
            face_name: self.read_option(Self::read_str)?,
            positions: self.read_typed()?,
            uvs: self.read_typed()?,
            indices: self.read_typed()?,
            lights: self.read_typed()?,
        })
    }

    pub fn read_level_mesh(&mut self) -> Result<LevelMesh> {
        Ok(LevelMesh {
            level: self.read_u32()?,
            geometries: self.read_list(Self::read_geometry)?,
        })
    }

    pub fn read_chunk_payload(&mut self) -> Result<ChunkPayload> {
        Ok(ChunkPayload {
            x: self.read_i32()?,
            z: self.read_i32()?,
            id: self.read_str()?,
            voxels: self.read_option(Self::read_typed)?,
            lights: self.read_option(Self::read_typed)?,
            meshes: self.read_list(Self::read_level_mesh)?,
        })
    }

    pub fn read_down_msg(&mut self) -> Result<DownMsg> {
        let kind = DownMsgKind::ALL[read_tag(&mut self.read, DownMsgKind::NUM_VARIANTS)?];
        Ok(match kind {
            DownMsgKind::Init => DownMsg::Init(self.read_json()?),
            DownMsgKind::Error => DownMsg::Error(self.read_str()?),
            DownMsgKind::Stats => DownMsg::Stats(self.read_json()?),
            DownMsgKind::Load => DownMsg::Load(self.read_list(Self::read_chunk_payload)?),
            DownMsgKind::Update => DownMsg::Update(DownMsgUpdate {
                updates: self.read_list(Self::read_voxel_update)?,
                chunks: self.read_list(Self::read_chunk_payload)?,
            }),
            DownMsgKind::Chat => DownMsg::Chat(self.read_str()?),
            DownMsgKind::Peer => DownMsg::Peer(self.read_list(|d| Ok(PeerInfo {
                id: d.read_str()?,
                username: d.read_str()?,
                metadata: d.read_json()?,
            }))?),
            DownMsgKind::Entity => DownMsg::Entity(self.read_list(|d| Ok(EntityInfo {
                id: d.read_str()?,
                kind: d.read_str()?,
                metadata: d.read_json()?,
            }))?),
            DownMsgKind::Event => DownMsg::Event(self.read_list(|d| Ok(EventInfo {
                name: d.read_str()?,
                payload: d.read_json()?,
            }))?),
        })
    }

    pub fn read_up_msg(&mut self) -> Result<UpMsg> {
        let kind = UpMsgKind::ALL[read_tag(&mut self.read, UpMsgKind::NUM_VARIANTS)?];
        Ok(match kind {
            UpMsgKind::Load => UpMsg::Load(UpMsgLoad {
                center: self.read_option(Self::read_chunk_coord)?,
                chunks: self.read_list(Self::read_chunk_coord)?,
            }),
            UpMsgKind::Unload => UpMsg::Unload(self.read_list(Self::read_chunk_coord)?),
            UpMsgKind::Update => UpMsg::Update(self.read_list(Self::read_voxel_update)?),
        })
    }
}
