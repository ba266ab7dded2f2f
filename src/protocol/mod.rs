//! Protocol module - wire framing and the capability handshake.
//!
//! Everything that touches raw bytes lives here:
//! - 8-byte big-endian length-prefixed frame codec
//! - Newline-terminated handshake line reader/writer
//!
//! Every transport and verification path calls through this module rather
//! than reimplementing the byte-shifting logic.

pub mod framing;
pub mod handshake;

pub use framing::{
    read_frame, read_frame_len, read_payload, write_frame, LENGTH_PREFIX_SIZE, MAX_FRAME_LEN,
};
pub use handshake::{
    is_framing_capable, read_handshake_line, write_greeting, FRAMING_TOKEN, HANDSHAKE_GREETING,
};
