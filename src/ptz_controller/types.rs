//! PTZ type definitions

use serde::{Deserialize, Serialize};

/// User preset table size
pub const USER_PRESET_SLOTS: usize = 12;

/// Ranch tour preset table size
pub const RANCH_PRESET_SLOTS: usize = 32;

/// Size of the opaque position payload the head reports
pub const POSITION_BYTES: usize = 10;

/// Movement direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
    ZoomIn,
    ZoomOut,
}

impl Direction {
    /// Opcode byte in the move frame payload
    pub fn opcode(&self) -> u8 {
        match self {
            Direction::Left => 0x40,
            Direction::Right => 0x80,
            Direction::Up => 0x10,
            Direction::Down => 0x20,
            Direction::ZoomIn => 0x04,
            Direction::ZoomOut => 0x08,
        }
    }

    /// Zero padding between the opcode and the speed byte
    pub(crate) fn padding(&self) -> usize {
        match self {
            Direction::Left | Direction::Right => 0,
            Direction::Up | Direction::Down => 1,
            Direction::ZoomIn | Direction::ZoomOut => 2,
        }
    }
}

/// One stored head position
#[derive(Debug, Clone, Copy, Default)]
pub struct PtzPreset {
    /// Opaque 10-byte position blob from the head
    pub data: [u8; POSITION_BYTES],
    /// Whether this slot has been captured
    pub set: bool,
}
