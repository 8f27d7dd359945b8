//! Wire protocol layer for the realtime core
//!
//! This module provides:
//! - Binary frame envelope encoding/decoding with streaming reassembly
//! - Positional payload sub-encodings carried inside frames

pub mod frame;
pub mod messages;

// Re-export commonly used types
pub use frame::{
    Frame, FrameCodec, Opcode, DEFAULT_MAX_PAYLOAD_SIZE, FRAME_HEADER_SIZE, MAGIC,
    PROTOCOL_VERSION,
};
pub use messages::*;
