//! PTZ wire frames
//!
//! Every frame starts with the 0x96 sync byte and ends with a checksum over
//! all preceding bytes. Byte strings for the menu/calibration commands come
//! from the head vendor and are sent verbatim.

use super::types::{Direction, POSITION_BYTES};

/// Sync byte opening every frame
pub const SYNC: u8 = 0x96;

/// "Read current position" request; the head answers with 17 bytes
pub const READ_POSITION_FRAME: [u8; 7] = [0x96, 0x00, 0x06, 0x01, 0x01, 0x01, 0x9F];

/// Length of the acknowledgement the head sends for commands that expect one
pub const ACK_LEN: usize = 7;

/// Length of the position response
pub const POSITION_REPLY_LEN: usize = 17;

/// Recall speed byte for manual operation
pub const RECALL_SPEED_MANUAL: u8 = 0x40;

/// Recall speed byte for the auto-tour (slower)
pub const RECALL_SPEED_AUTO: u8 = 0x20;

/// Sum of all bytes mod 256
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// 11-byte move frame.
///
/// Speed 0 encodes "stop": the payload is all zeros and the command byte
/// flips to the variant that requests an acknowledgement.
pub fn move_frame(direction: Direction, speed: u8) -> [u8; 11] {
    let mut frame = [0u8; 11];
    frame[0] = SYNC;
    frame[1] = 0x00; // head address
    frame[2] = 0x00;
    frame[3] = if speed > 0 { 0x41 } else { 0x01 };
    frame[4] = 0x05; // payload length

    if speed > 0 {
        frame[5] = direction.opcode();
        frame[5 + 1 + direction.padding()] = speed;
    }

    frame[10] = checksum(&frame[..10]);
    frame
}

/// 17-byte "go to position" frame
pub fn recall_frame(position: &[u8; POSITION_BYTES], auto: bool) -> [u8; 17] {
    let mut frame = [0u8; 17];
    frame[0] = SYNC;
    frame[1] = 0x00;
    frame[2] = 0x01;
    frame[3] = 0x01;
    frame[4] = 0x0F;
    frame[5..5 + POSITION_BYTES].copy_from_slice(position);
    frame[15] = if auto {
        RECALL_SPEED_AUTO
    } else {
        RECALL_SPEED_MANUAL
    };
    frame[16] = checksum(&frame[..16]);
    frame
}

/// Vendor menu-navigation and calibration frames, keyed by the pipe command.
///
/// `ir_init` is a two-frame sequence with a dwell between the frames and is
/// handled by the controller, not here.
pub fn menu_frame(command: &str) -> Option<&'static [u8]> {
    const UP: [u8; 12] = [0x96, 0x00, 0x14, 0x01, 0x06, 0x81, 0x01, 0x04, 0x16, 0x01, 0xFF, 0x4D];
    const DOWN: [u8; 12] = [0x96, 0x00, 0x14, 0x01, 0x06, 0x81, 0x01, 0x04, 0x16, 0x02, 0xFF, 0x4E];
    const LEFT: [u8; 12] = [0x96, 0x00, 0x14, 0x01, 0x06, 0x81, 0x01, 0x04, 0x16, 0x04, 0xFF, 0x50];
    const RIGHT: [u8; 12] = [0x96, 0x00, 0x14, 0x01, 0x06, 0x81, 0x01, 0x04, 0x16, 0x08, 0xFF, 0x54];
    const ENTER: [u8; 12] = [0x96, 0x00, 0x14, 0x01, 0x06, 0x81, 0x01, 0x04, 0x16, 0x10, 0xFF, 0x5C];
    const ZOOM_INIT: [u8; 12] =
        [0x96, 0x00, 0x14, 0x01, 0x06, 0x81, 0x01, 0x04, 0x19, 0x01, 0xFF, 0x50];

    match command {
        "up" => Some(&UP),
        "down" => Some(&DOWN),
        "left" => Some(&LEFT),
        "right" => Some(&RIGHT),
        "enter" => Some(&ENTER),
        "zoom_init" => Some(&ZOOM_INIT),
        _ => None,
    }
}

/// First IR calibration frame
pub const IR_INIT_FRAME_1: [u8; 27] = [
    0x96, 0x00, 0x22, 0x05, 0x15, 0x01, 0x01, 0x01, 0x20, 0x30, 0x40, 0x60, 0x7F, 0x7F, 0x7F,
    0x7F, 0x7F, 0x7F, 0x7F, 0x7F, 0x7F, 0x7F, 0x7F, 0x7F, 0x7F, 0x7F, 0xB7,
];

/// Second IR calibration frame, sent after a 1.5 s dwell
pub const IR_INIT_FRAME_2: [u8; 27] = [
    0x96, 0x00, 0x22, 0x05, 0x15, 0x00, 0x7F, 0x7F, 0x7F, 0x7F, 0x7F, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x5C,
];
