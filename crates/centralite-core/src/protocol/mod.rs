//! Serial Protocol Communication
//!
//! Implements the Centralite ASCII protocol: CR-terminated command lines
//! going out, and replies, push events and bulk bitmaps coming back on the
//! same stream.

pub mod channel;
pub mod classify;
pub mod codec;
pub mod commands;
mod error;
pub mod frame;
pub mod serial;
mod stream;

pub use channel::{ChannelStats, CommandChannel, ReplySlot};
pub use classify::{classify, Frame};
pub use codec::{decode_loads, decode_switches, encode_loads, encode_switches, DeviceStates};
pub use commands::{Command, SceneDirection, MAX_DEVICE_ID};
pub use error::ProtocolError;
pub use frame::{FrameReader, ReadOutcome};
pub use serial::open_port;
pub use stream::{SerialLink, TcpLink, Transport};

/// Baud rate used by every panel
pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Default per-read transport timeout in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;

/// Default wait for a command reply in milliseconds
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 2000;

/// Longest line accepted before a frame is forcibly cut
pub const MAX_LINE_LENGTH: usize = 100;
