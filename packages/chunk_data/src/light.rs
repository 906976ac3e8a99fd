//! Light word bit-fiddling.
//!
//! A light value is stored as a single `u32` word. The low 16 bits hold four 4-bit channels:
//!
//! ```text
//! ssss rrrr gggg bbbb
//! ```
//!
//! Above that sit flag bits which only the renderer reads: a 2-bit ambient occlusion index,
//! then single bits marking fluid, greedy-merged, and waving faces.

use std::fmt::{self, Formatter, Display};


const NIBBLE: u32 = 0xf;

const BLUE_SHIFT: u32 = 0;
const GREEN_SHIFT: u32 = 4;
const RED_SHIFT: u32 = 8;
const SUNLIGHT_SHIFT: u32 = 12;

const AO_SHIFT: u32 = 16;
const AO_MASK: u32 = 0b11 << AO_SHIFT;

/// Mask of all four light channels.
pub const CHANNELS_MASK: u32 = 0xffff;
/// Set on geometry belonging to a fluid.
pub const FLUID_BIT: u32 = 1 << 18;
/// Set on geometry produced by greedy merging.
pub const GREEDY_BIT: u32 = 1 << 19;
/// Set on vertices that should wave (foliage, fluid surfaces).
pub const WAVE_BIT: u32 = 1 << 20;

/// Highest level of any light channel.
pub const MAX_LIGHT_LEVEL: u32 = 15;
/// Highest ambient occlusion index.
pub const MAX_AO: u32 = 3;


fn extract_channel(light: u32, shift: u32) -> u32 {
    (light >> shift) & NIBBLE
}

fn insert_channel(light: u32, shift: u32, level: u32) -> u32 {
    (light & !(NIBBLE << shift)) | ((level & NIBBLE) << shift)
}

/// Extract the sunlight level.
pub fn extract_sunlight(light: u32) -> u32 {
    extract_channel(light, SUNLIGHT_SHIFT)
}

/// Insert a sunlight level, masked to 4 bits.
pub fn insert_sunlight(light: u32, level: u32) -> u32 {
    insert_channel(light, SUNLIGHT_SHIFT, level)
}

/// Extract the red torch light level.
pub fn extract_red_light(light: u32) -> u32 {
    extract_channel(light, RED_SHIFT)
}

/// Insert a red torch light level, masked to 4 bits.
pub fn insert_red_light(light: u32, level: u32) -> u32 {
    insert_channel(light, RED_SHIFT, level)
}

/// Extract the green torch light level.
pub fn extract_green_light(light: u32) -> u32 {
    extract_channel(light, GREEN_SHIFT)
}

/// Insert a green torch light level, masked to 4 bits.
pub fn insert_green_light(light: u32, level: u32) -> u32 {
    insert_channel(light, GREEN_SHIFT, level)
}

/// Extract the blue torch light level.
pub fn extract_blue_light(light: u32) -> u32 {
    extract_channel(light, BLUE_SHIFT)
}

/// Insert a blue torch light level, masked to 4 bits.
pub fn insert_blue_light(light: u32, level: u32) -> u32 {
    insert_channel(light, BLUE_SHIFT, level)
}

/// Extract the ambient occlusion index.
pub fn extract_ao(light: u32) -> u32 {
    (light & AO_MASK) >> AO_SHIFT
}

/// Insert an ambient occlusion index, masked to 2 bits.
pub fn insert_ao(light: u32, ao: u32) -> u32 {
    (light & !AO_MASK) | ((ao & MAX_AO) << AO_SHIFT)
}

/// Set or clear one of the single-bit flags (`FLUID_BIT`, `GREEDY_BIT`, `WAVE_BIT`).
pub fn with_flag(light: u32, flag: u32, set: bool) -> u32 {
    if set {
        light | flag
    } else {
        light & !flag
    }
}

/// Whether the given single-bit flag is set.
pub fn has_flag(light: u32, flag: u32) -> bool {
    light & flag != 0
}


/// One of the three torch light channels.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LightColor {
    Red,
    Green,
    Blue,
}

impl LightColor {
    pub const ALL: [LightColor; 3] = [LightColor::Red, LightColor::Green, LightColor::Blue];

    /// Extract this channel's level.
    pub fn extract(self, light: u32) -> u32 {
        match self {
            LightColor::Red => extract_red_light(light),
            LightColor::Green => extract_green_light(light),
            LightColor::Blue => extract_blue_light(light),
        }
    }

    /// Insert this channel's level, masked to 4 bits.
    pub fn insert(self, light: u32, level: u32) -> u32 {
        match self {
            LightColor::Red => insert_red_light(light, level),
            LightColor::Green => insert_green_light(light, level),
            LightColor::Blue => insert_blue_light(light, level),
        }
    }
}

impl Display for LightColor {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match *self {
            LightColor::Red => "red",
            LightColor::Green => "green",
            LightColor::Blue => "blue",
        })
    }
}


#[test]
fn test_channel_round_trips() {
    for level in 0..=MAX_LIGHT_LEVEL {
        assert_eq!(extract_sunlight(insert_sunlight(0, level)), level);
        for color in LightColor::ALL {
            assert_eq!(color.extract(color.insert(0, level)), level);
        }
    }
}

#[test]
fn test_channels_are_independent() {
    let mut light = 0;
    light = insert_sunlight(light, 15);
    light = insert_red_light(light, 9);
    light = insert_green_light(light, 4);
    light = insert_blue_light(light, 1);
    assert_eq!(light, 0xf941);

    let light2 = insert_red_light(light, 0);
    assert_eq!(extract_sunlight(light2), 15);
    assert_eq!(extract_green_light(light2), 4);
    assert_eq!(extract_blue_light(light2), 1);

    let light3 = insert_sunlight(light, 2);
    assert_eq!(extract_red_light(light3), 9);
    assert_eq!(extract_green_light(light3), 4);
    assert_eq!(extract_blue_light(light3), 1);
}

#[test]
fn test_flags_leave_channels_alone() {
    let light = 0xf941;
    let flagged = with_flag(with_flag(insert_ao(light, 3), FLUID_BIT, true), WAVE_BIT, true);
    assert_eq!(flagged & CHANNELS_MASK, light);
    assert_eq!(extract_ao(flagged), 3);
    assert!(has_flag(flagged, FLUID_BIT));
    assert!(!has_flag(flagged, GREEDY_BIT));
    assert!(has_flag(flagged, WAVE_BIT));
    assert_eq!(with_flag(flagged, FLUID_BIT, false) & FLUID_BIT, 0);
}

#[test]
fn test_channel_insert_masks() {
    assert_eq!(insert_blue_light(0, 0x1f), 0xf);
    assert_eq!(insert_sunlight(0, 0x10), 0);
}
