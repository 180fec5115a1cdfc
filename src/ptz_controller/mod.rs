//! PtzController - pan/tilt/zoom head control
//!
//! ## Responsibilities
//!
//! - Frame and send move/stop commands over the serial link
//! - Capture and recall preset positions (12 user slots, 32 ranch tour slots)
//! - Run the scripted auto-tour worker
//! - Vendor menu-navigation and calibration frames for the command pipe
//!
//! Wire protocol: 11-byte move frames, 7-byte acknowledgements, 17-byte
//! position frames, checksum = sum of all preceding bytes mod 256.

mod frames;
mod service;
mod types;

pub use frames::{checksum, menu_frame, move_frame, recall_frame, READ_POSITION_FRAME};
pub use service::PtzController;
pub use types::{Direction, PtzPreset, RANCH_PRESET_SLOTS, USER_PRESET_SLOTS};
