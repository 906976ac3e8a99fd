//! Voxel word bit-fiddling.
//!
//! A voxel is stored as a single `u32` word:
//!
//! ```text
//! 0000 ssss yyyy rrrr iiii iiii iiii iiii
//! ```
//!
//! - `i`: block id, bits `0..16`
//! - `r`: rotation axis, bits `16..20` (only the 6 axis values are meaningful)
//! - `y`: y-rotation segment, bits `20..24` (16 discrete steps)
//! - `s`: stage, bits `24..28` (growth / interaction stage, 0 through 15)
//!
//! Every `insert_*` function only touches its own field. Values too wide for their field are
//! masked to the field's bit width, with the exception of `try_insert_stage`, which rejects
//! out-of-range stages instead.

use std::fmt::{self, Formatter, Display};


/// Mask of the block id field.
pub const ID_MASK: u32 = 0x0000ffff;
/// Mask of the rotation axis field.
pub const ROTATION_MASK: u32 = 0x000f0000;
/// Mask of the y-rotation field.
pub const Y_ROTATION_MASK: u32 = 0x00f00000;
/// Mask of the stage field.
pub const STAGE_MASK: u32 = 0x0f000000;

const ROTATION_SHIFT: u32 = 16;
const Y_ROTATION_SHIFT: u32 = 20;
const STAGE_SHIFT: u32 = 24;
const NIBBLE: u32 = 0xf;

/// Rotation axis: facing positive y. The default orientation.
pub const PY: u32 = 0;
/// Rotation axis: facing negative y.
pub const NY: u32 = 1;
/// Rotation axis: facing positive x.
pub const PX: u32 = 2;
/// Rotation axis: facing negative x.
pub const NX: u32 = 3;
/// Rotation axis: facing positive z.
pub const PZ: u32 = 4;
/// Rotation axis: facing negative z.
pub const NZ: u32 = 5;

/// Number of valid rotation axis values.
pub const NUM_AXES: u32 = 6;

/// Number of discrete y-rotation steps. Valid y-rotations are `0..Y_ROTATION_SEGMENTS`.
pub const Y_ROTATION_SEGMENTS: u32 = 16;

/// Highest valid stage.
pub const MAX_STAGE: u32 = 15;


/// Extract the block id.
pub fn extract_id(voxel: u32) -> u32 {
    voxel & ID_MASK
}

/// Insert a block id, masked to 16 bits.
pub fn insert_id(voxel: u32, id: u32) -> u32 {
    (voxel & !ID_MASK) | (id & ID_MASK)
}

/// Extract the rotation axis.
pub fn extract_rotation_axis(voxel: u32) -> u32 {
    (voxel >> ROTATION_SHIFT) & NIBBLE
}

/// Insert a rotation axis, masked to 4 bits.
pub fn insert_rotation_axis(voxel: u32, axis: u32) -> u32 {
    (voxel & !ROTATION_MASK) | ((axis & NIBBLE) << ROTATION_SHIFT)
}

/// Extract the y-rotation segment.
pub fn extract_y_rotation(voxel: u32) -> u32 {
    (voxel >> Y_ROTATION_SHIFT) & NIBBLE
}

/// Insert a y-rotation segment, masked to 4 bits.
pub fn insert_y_rotation(voxel: u32, y_rotation: u32) -> u32 {
    (voxel & !Y_ROTATION_MASK) | ((y_rotation & NIBBLE) << Y_ROTATION_SHIFT)
}

/// Extract the stage.
pub fn extract_stage(voxel: u32) -> u32 {
    (voxel >> STAGE_SHIFT) & NIBBLE
}

/// Insert a stage, masked to 4 bits.
///
/// Prefer `try_insert_stage` when the stage comes from anywhere other than a constant.
pub fn insert_stage(voxel: u32, stage: u32) -> u32 {
    (voxel & !STAGE_MASK) | ((stage & NIBBLE) << STAGE_SHIFT)
}

/// Insert a stage, erroring rather than truncating if it is above `MAX_STAGE`.
pub fn try_insert_stage(voxel: u32, stage: u32) -> Result<u32, StageOutOfRange> {
    if stage > MAX_STAGE {
        return Err(StageOutOfRange(stage));
    }
    Ok(insert_stage(voxel, stage))
}

/// Extract the rotation axis and y-rotation together.
pub fn extract_rotation(voxel: u32) -> BlockRotation {
    BlockRotation {
        axis: extract_rotation_axis(voxel),
        y_rotation: extract_y_rotation(voxel),
    }
}

/// Insert the rotation axis and y-rotation together.
pub fn insert_rotation(voxel: u32, rotation: BlockRotation) -> u32 {
    insert_y_rotation(insert_rotation_axis(voxel, rotation.axis), rotation.y_rotation)
}

/// Build a voxel word from scratch.
pub fn insert_all(id: u32, rotation: Option<BlockRotation>, stage: Option<u32>) -> u32 {
    let mut voxel = insert_id(0, id);
    if let Some(rotation) = rotation {
        voxel = insert_rotation(voxel, rotation);
    }
    if let Some(stage) = stage {
        voxel = insert_stage(voxel, stage);
    }
    voxel
}


/// Orientation of a block: which axis it faces, and how far it's spun around y.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct BlockRotation {
    /// One of `PY`, `NY`, `PX`, `NX`, `PZ`, `NZ`.
    pub axis: u32,
    /// Y-rotation segment in `0..Y_ROTATION_SEGMENTS`.
    pub y_rotation: u32,
}

impl BlockRotation {
    pub fn new(axis: u32, y_rotation: u32) -> Self {
        BlockRotation { axis, y_rotation }
    }

    /// Whether the axis is one of the 6 defined axes and the y-rotation is in range.
    pub fn is_valid(self) -> bool {
        self.axis < NUM_AXES && self.y_rotation < Y_ROTATION_SEGMENTS
    }

    /// Y-rotation in radians.
    pub fn y_radians(self) -> f32 {
        self.y_rotation as f32 * std::f32::consts::TAU / Y_ROTATION_SEGMENTS as f32
    }
}


/// Error for a stage that does not fit in the stage field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StageOutOfRange(pub u32);

impl Display for StageOutOfRange {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "voxel stage {} out of range 0..={}", self.0, MAX_STAGE)
    }
}

impl std::error::Error for StageOutOfRange {}


#[test]
fn test_id_round_trip() {
    for id in 0..=0xffff {
        assert_eq!(extract_id(insert_id(0, id)), id);
        assert_eq!(extract_id(insert_id(!0, id)), id);
    }
}

#[test]
fn test_small_field_round_trips() {
    for axis in 0..NUM_AXES {
        assert_eq!(extract_rotation_axis(insert_rotation_axis(0, axis)), axis);
    }
    for y_rotation in 0..Y_ROTATION_SEGMENTS {
        assert_eq!(extract_y_rotation(insert_y_rotation(0, y_rotation)), y_rotation);
    }
    for stage in 0..=MAX_STAGE {
        assert_eq!(extract_stage(insert_stage(0, stage)), stage);
        assert_eq!(try_insert_stage(0, stage).map(extract_stage), Ok(stage));
    }
}

#[test]
fn test_fields_are_independent() {
    let voxel = insert_all(0xbeef, Some(BlockRotation::new(NZ, 11)), Some(7));

    let voxel2 = insert_id(voxel, 42);
    assert_eq!(extract_rotation(voxel2), BlockRotation::new(NZ, 11));
    assert_eq!(extract_stage(voxel2), 7);

    let voxel3 = insert_rotation_axis(voxel, PX);
    assert_eq!(extract_id(voxel3), 0xbeef);
    assert_eq!(extract_y_rotation(voxel3), 11);
    assert_eq!(extract_stage(voxel3), 7);

    let voxel4 = insert_y_rotation(voxel, 3);
    assert_eq!(extract_rotation_axis(voxel4), NZ);
    assert_eq!(extract_stage(voxel4), 7);

    let voxel5 = insert_stage(voxel, 0);
    assert_eq!(extract_id(voxel5), 0xbeef);
    assert_eq!(extract_rotation(voxel5), BlockRotation::new(NZ, 11));
}

#[test]
fn test_insert_masks_to_field_width() {
    assert_eq!(insert_id(0, 0x1_0005), 5);
    assert_eq!(insert_rotation_axis(0, 0x12), 2 << 16);
    assert_eq!(insert_stage(0, 0x1f), 0xf << 24);
    // nothing above bit 28 is ever written
    assert_eq!(insert_stage(0, !0) & 0xf0000000, 0);
}

#[test]
fn test_try_insert_stage_rejects_out_of_range() {
    assert_eq!(try_insert_stage(5, 16), Err(StageOutOfRange(16)));
    assert_eq!(try_insert_stage(5, 15), Ok(5 | (15 << 24)));
}

#[test]
fn test_plain_id_is_default_rotation() {
    let voxel = 0x00000005;
    assert_eq!(extract_id(voxel), 5);
    assert_eq!(extract_rotation_axis(voxel), PY);
    assert_eq!(extract_stage(voxel), 0);
}
