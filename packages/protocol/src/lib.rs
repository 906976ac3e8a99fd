//! Wire protocol between the voxel client and server.
//!
//! See the `message` module for the frame format. Decoding never trusts the frame: lengths are
//! validated against the remaining bytes before allocating, tags are validated before any
//! variant-specific field is read, and trailing bytes are an error.

#[macro_use]
extern crate tracing;

pub mod error;
pub mod var_len;
pub mod compression;
pub mod typed;
pub mod json;
pub mod message;
pub mod decoder;
pub mod encoder;

pub use crate::{
    error::{
        Error,
        ErrorKind,
        Result,
    },
    compression::Compression,
    message::*,
    decoder::{
        decode_down,
        decode_up,
    },
    encoder::{
        encode_down,
        encode_up,
        EncodeOptions,
    },
};


#[cfg(test)]
fn test_chunk() -> ChunkPayload {
    ChunkPayload {
        x: -3,
        z: 7,
        id: "chunk-a".into(),
        voxels: Some(vec![5, 0x0f2a0001, 0].into()),
        lights: Some(vec![0xf000; 3].into()),
        meshes: vec![LevelMesh {
            level: 2,
            geometries: vec![Geometry {
                voxel: 5,
                face_name: Some("top".into()),
                positions: vec![0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0].into(),
                uvs: vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0].into(),
                indices: vec![0, 1, 2].into(),
                lights: vec![0xf000, 0xf000 | (3 << 16), -1].into(),
            }],
        }],
    }
}

#[test]
fn test_chunk_payload_through_all_compressions() {
    let all = [Compression::None, Compression::Zlib, Compression::Lz4];
    for frame in all {
        for buffers in all {
            let bytes = encode_down(
                &DownMsg::Load(vec![test_chunk()]),
                EncodeOptions { frame, buffers },
            ).unwrap();
            assert_eq!(Compression::detect(&bytes), frame);
            let chunks = match decode_down(&bytes).unwrap() {
                DownMsg::Load(chunks) => chunks,
                msg => panic!("wrong msg kind {:?}", msg.kind()),
            };
            assert_eq!(chunks.len(), 1);
            let chunk = &chunks[0];
            assert_eq!(chunk.cc(), vek::Vec2::new(-3, 7));
            assert_eq!(chunk.id, "chunk-a");
            assert_eq!(chunk.voxels.as_deref(), Some(&[5, 0x0f2a0001, 0][..]));
            assert_eq!(chunk.lights.as_deref(), Some(&[0xf000; 3][..]));
            let geometry = &chunk.meshes[0].geometries[0];
            assert_eq!(chunk.meshes[0].level, 2);
            assert_eq!(geometry.face_name.as_deref(), Some("top"));
            assert_eq!(geometry.num_vertices(), 3);
            assert_eq!(geometry.indices.as_slice(), &[0, 1, 2]);
            assert_eq!(geometry.lights.as_slice(), &[0xf000, 0xf000 | (3 << 16), -1]);
        }
    }
}

#[test]
fn test_uncompressed_buffers_starting_like_zlib() {
    for first in [0x0178, 0xda78, 0x5e78] {
        let mut chunk = test_chunk();
        chunk.voxels = Some(vec![first, 1, 2].into());
        chunk.lights = Some(vec![first, 0, 0].into());
        let bytes = encode_down(
            &DownMsg::Load(vec![chunk]),
            EncodeOptions { frame: Compression::None, buffers: Compression::None },
        ).unwrap();
        let chunks = match decode_down(&bytes).unwrap() {
            DownMsg::Load(chunks) => chunks,
            msg => panic!("wrong msg kind {:?}", msg.kind()),
        };
        assert_eq!(chunks[0].voxels.as_deref(), Some(&[first, 1, 2][..]));
        assert_eq!(chunks[0].lights.as_deref(), Some(&[first, 0, 0][..]));
    }
}

#[test]
fn test_json_fields() {
    let bytes = encode_down(
        &DownMsg::Init(serde_json::json!({ "chunkSize": 16, "maxHeight": 64 })),
        EncodeOptions::default(),
    ).unwrap();
    match decode_down(&bytes).unwrap() {
        DownMsg::Init(json) => assert_eq!(json["maxHeight"], 64),
        msg => panic!("wrong msg kind {:?}", msg.kind()),
    }

    let bytes = encode_down(
        &DownMsg::Event(vec![EventInfo {
            name: "explode".into(),
            payload: serde_json::Value::String("plain text".into()),
        }]),
        EncodeOptions::default(),
    ).unwrap();
    match decode_down(&bytes).unwrap() {
        DownMsg::Event(events) => assert_eq!(events[0].payload, "plain text"),
        msg => panic!("wrong msg kind {:?}", msg.kind()),
    }
}

#[test]
fn test_up_msgs() {
    let msgs = [
        UpMsg::Load(UpMsgLoad {
            center: Some(vek::Vec2::new(1, -1)),
            chunks: vec![vek::Vec2::new(1, -1), vek::Vec2::new(0, 0)],
        }),
        UpMsg::Unload(vec![vek::Vec2::new(40, 2)]),
        UpMsg::Update(vec![VoxelUpdate { vx: -1, vy: 3, vz: 9, voxel: 7, light: None }]),
    ];
    for msg in msgs {
        assert_eq!(decode_up(&encode_up(&msg).unwrap()).unwrap(), msg);
    }
}

#[test]
fn test_malformed_frames() {
    let good = encode_down(&DownMsg::Chat("hi".into()), EncodeOptions::default()).unwrap();
    assert!(decode_down(&good).is_ok());

    // trailing bytes
    let mut extra = good.clone();
    extra.push(0);
    assert_eq!(decode_down(&extra).unwrap_err().kind(), ErrorKind::MalformedData);

    // truncated
    let truncated = &good[..good.len() - 1];
    assert_eq!(decode_down(truncated).unwrap_err().kind(), ErrorKind::MalformedData);

    // unknown tag
    assert_eq!(decode_down(&[200]).unwrap_err().kind(), ErrorKind::MalformedData);

    // length prefix claiming more than the frame holds
    let huge = [DownMsgKind::Load as u8, 0xff, 0xff, 0xff, 0x0f];
    assert_eq!(decode_down(&huge).unwrap_err().kind(), ErrorKind::MalformedData);

    // voxel buffer not a multiple of 4 bytes
    let mut enc = encoder::Encoder::new(Compression::None);
    enc.write_u64(DownMsgKind::Load as u64).unwrap();
    enc.write_u64(1).unwrap();
    enc.write_i32(0).unwrap();
    enc.write_i32(0).unwrap();
    enc.write_str("x").unwrap();
    enc.write_bool(true).unwrap();
    enc.write_bytes(&[1, 2, 3]).unwrap();
    enc.write_bool(false).unwrap();
    enc.write_u64(0).unwrap();
    assert_eq!(decode_down(&enc.into_bytes()).unwrap_err().kind(), ErrorKind::MalformedData);
}
