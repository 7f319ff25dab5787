//! In-memory message representation for both wire framings.
//!
//! Both framings carry the same logical fields: payload size, a millisecond
//! timestamp, and a one-byte mode. Header integers use the host's native byte
//! layout; these messages only ever travel between processes on one machine.

mod buffer;
mod fixed;
mod variable;

use std::fmt;
use std::str::FromStr;

use crate::error::Result;

pub use buffer::{PayloadBuffer, SHRINK_THRESHOLD};
pub use fixed::{FIXED_HEADER_LENGTH, FIXED_PAYLOAD_CAPACITY, FixedMessage};
pub use variable::{VARIABLE_HEADER_LENGTH, VariableMessage};

/// Interaction mode carried in the last header byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Mode {
    /// Unrecognized; rejected by clients, not dispatched by servers
    Unknown = 0,
    /// No reply expected
    FireAndForget = 1,
    /// Exactly one reply expected
    #[default]
    Rpc = 2,
}

impl From<u8> for Mode {
    fn from(byte: u8) -> Self {
        match byte {
            1 => Mode::FireAndForget,
            2 => Mode::Rpc,
            _ => Mode::Unknown,
        }
    }
}

impl From<Mode> for u8 {
    fn from(mode: Mode) -> Self {
        mode as u8
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Unknown => write!(f, "unknown"),
            Mode::FireAndForget => write!(f, "fire-and-forget"),
            Mode::Rpc => write!(f, "rpc"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rpc" => Ok(Mode::Rpc),
            "fire-and-forget" | "fireandforget" | "faf" => Ok(Mode::FireAndForget),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Codec contract shared by both framings.
///
/// Receiving goes: fill `header_buffer()`, `commit_header()`, `decode()`,
/// then fill `payload_buffer()`. Sending writes `header()` then `payload()`.
pub trait Message: Clone + fmt::Debug + Send + Sync + 'static {
    /// Bytes occupied by the header on the wire.
    const HEADER_LENGTH: usize;

    /// Build a message from a payload, stamping the current time.
    fn new(payload: &[u8], mode: Mode) -> Self;

    /// Fresh zero-length `Rpc` message, typically a receive target.
    fn empty() -> Self {
        Self::new(&[], Mode::Rpc)
    }

    /// Encoded header bytes.
    fn header(&self) -> &[u8];

    /// Header bytes for I/O to fill in place.
    ///
    /// Handing the buffer out marks the header as not yet populated until
    /// `commit_header()` is called.
    fn header_buffer(&mut self) -> &mut [u8];

    /// Mark the header as fully populated by I/O.
    fn commit_header(&mut self);

    /// Parse the header. Fails with `MalformedHeader` when the header was not
    /// committed or declares a size the framing cannot hold.
    fn decode(&mut self) -> Result<()>;

    /// Payload bytes, `payload_length()` long.
    fn payload(&self) -> &[u8];

    /// Payload bytes for I/O to fill in place.
    fn payload_buffer(&mut self) -> &mut [u8];

    fn payload_length(&self) -> usize;

    fn mode(&self) -> Mode;

    /// Milliseconds since the epoch, stamped by `encode`.
    fn timestamp(&self) -> u64;

    /// Overwrite header and payload, stamping the current time.
    fn encode(&mut self, payload: &[u8], mode: Mode);
}
