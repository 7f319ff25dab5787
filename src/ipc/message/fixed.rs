//! Fixed small-buffer framing.
//!
//! Layout, host byte order:
//! - 4 bytes: payload size (u32)
//! - 8 bytes: timestamp in ms (u64)
//! - 1 byte: mode
//! - up to 1400 bytes: payload
//!
//! Header and payload share one inline buffer, so once the header bytes are
//! filled the payload length can be read straight out of it.

use std::fmt;
use std::ops::Range;

use crate::error::{IpcError, Result};
use crate::id::now_ms;
use crate::logging::Logger;

use super::{Message, Mode};

pub const FIXED_HEADER_LENGTH: usize = 13;
pub const FIXED_PAYLOAD_CAPACITY: usize = 1400;

const SIZE: Range<usize> = 0..4;
const TIMESTAMP: Range<usize> = 4..12;
const MODE: usize = 12;
const CAPACITY: usize = FIXED_HEADER_LENGTH + FIXED_PAYLOAD_CAPACITY;

/// Message whose header and payload live in one inline buffer.
///
/// Payloads longer than `FIXED_PAYLOAD_CAPACITY` are truncated at construction,
/// with a warning under the `ipclane::message` target.
#[derive(Clone)]
pub struct FixedMessage {
    buffer: [u8; CAPACITY],
    header_ready: bool,
}

impl FixedMessage {
    fn declared_size(&self) -> usize {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.buffer[SIZE]);
        u32::from_ne_bytes(raw) as usize
    }

    fn payload_range(&self) -> Range<usize> {
        FIXED_HEADER_LENGTH..FIXED_HEADER_LENGTH + self.payload_length()
    }
}

impl Message for FixedMessage {
    const HEADER_LENGTH: usize = FIXED_HEADER_LENGTH;

    fn new(payload: &[u8], mode: Mode) -> Self {
        let mut message = Self {
            buffer: [0u8; CAPACITY],
            header_ready: false,
        };
        message.encode(payload, mode);
        message
    }

    fn header(&self) -> &[u8] {
        &self.buffer[..FIXED_HEADER_LENGTH]
    }

    fn header_buffer(&mut self) -> &mut [u8] {
        self.header_ready = false;
        &mut self.buffer[..FIXED_HEADER_LENGTH]
    }

    fn commit_header(&mut self) {
        self.header_ready = true;
    }

    fn decode(&mut self) -> Result<()> {
        if !self.header_ready {
            return Err(IpcError::MalformedHeader);
        }
        if self.declared_size() > FIXED_PAYLOAD_CAPACITY {
            return Err(IpcError::MalformedHeader);
        }
        Ok(())
    }

    fn payload(&self) -> &[u8] {
        &self.buffer[self.payload_range()]
    }

    fn payload_buffer(&mut self) -> &mut [u8] {
        let range = self.payload_range();
        &mut self.buffer[range]
    }

    fn payload_length(&self) -> usize {
        self.declared_size().min(FIXED_PAYLOAD_CAPACITY)
    }

    fn mode(&self) -> Mode {
        Mode::from(self.buffer[MODE])
    }

    fn timestamp(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.buffer[TIMESTAMP]);
        u64::from_ne_bytes(raw)
    }

    fn encode(&mut self, payload: &[u8], mode: Mode) {
        let len = if payload.len() > FIXED_PAYLOAD_CAPACITY {
            Logger::message().warn(format_args!(
                "payload of {} bytes truncated to {} bytes",
                payload.len(),
                FIXED_PAYLOAD_CAPACITY
            ));
            FIXED_PAYLOAD_CAPACITY
        } else {
            payload.len()
        };

        self.buffer[SIZE].copy_from_slice(&(len as u32).to_ne_bytes());
        self.buffer[TIMESTAMP].copy_from_slice(&now_ms().to_ne_bytes());
        self.buffer[MODE] = mode.into();
        self.buffer[FIXED_HEADER_LENGTH..FIXED_HEADER_LENGTH + len].copy_from_slice(&payload[..len]);
        self.header_ready = true;
    }
}

impl fmt::Debug for FixedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedMessage")
            .field("payload_length", &self.payload_length())
            .field("timestamp", &self.timestamp())
            .field("mode", &self.mode())
            .finish()
    }
}

impl Default for FixedMessage {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sets_header_fields() {
        let message = FixedMessage::new(b"hello", Mode::FireAndForget);
        assert_eq!(message.payload_length(), 5);
        assert_eq!(message.payload(), b"hello");
        assert_eq!(message.mode(), Mode::FireAndForget);
        assert!(message.timestamp() > 0);
    }

    #[test]
    fn test_oversized_payload_truncated() {
        let source: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        let message = FixedMessage::new(&source, Mode::Rpc);
        assert_eq!(message.payload_length(), 1400);
        assert_eq!(message.payload(), &source[..1400]);
    }

    #[test]
    fn test_truncation_is_logged_under_message_target() {
        crate::logging::capture::install();
        let _ = FixedMessage::new(&[0u8; 1777], Mode::Rpc);
        assert!(crate::logging::capture::contains(
            "ipclane::message",
            "payload of 1777 bytes truncated to 1400 bytes"
        ));
    }

    #[test]
    fn test_header_is_native_endian() {
        let message = FixedMessage::new(&[7u8; 300], Mode::Rpc);
        let header = message.header();
        assert_eq!(header.len(), FIXED_HEADER_LENGTH);
        assert_eq!(&header[0..4], &300u32.to_ne_bytes());
        assert_eq!(&header[4..12], &message.timestamp().to_ne_bytes());
        assert_eq!(header[12], 2);
    }

    #[test]
    fn test_filled_header_drives_payload_length() {
        let source = FixedMessage::new(b"abcdef", Mode::Rpc);

        let mut target = FixedMessage::empty();
        target.header_buffer().copy_from_slice(source.header());
        target.commit_header();
        // Header lives in the same buffer as the payload: length is known immediately
        assert_eq!(target.payload_length(), 6);
        target.decode().unwrap();
        target.payload_buffer().copy_from_slice(source.payload());

        assert_eq!(target.payload(), b"abcdef");
        assert_eq!(target.timestamp(), source.timestamp());
    }

    #[test]
    fn test_decode_before_header_filled() {
        let mut message = FixedMessage::empty();
        let _ = message.header_buffer();
        assert!(matches!(message.decode(), Err(IpcError::MalformedHeader)));
    }

    #[test]
    fn test_decode_rejects_oversized_declaration() {
        let mut message = FixedMessage::empty();
        message.header_buffer()[0..4].copy_from_slice(&5000u32.to_ne_bytes());
        message.commit_header();
        assert!(matches!(message.decode(), Err(IpcError::MalformedHeader)));
        // Accessors stay in bounds regardless
        assert_eq!(message.payload_length(), FIXED_PAYLOAD_CAPACITY);
    }

    #[test]
    fn test_encode_overwrites() {
        let mut message = FixedMessage::new(b"first payload", Mode::Rpc);
        message.encode(b"second", Mode::FireAndForget);
        assert_eq!(message.payload(), b"second");
        assert_eq!(message.mode(), Mode::FireAndForget);
    }

    #[test]
    fn test_debug_is_compact() {
        let debug = format!("{:?}", FixedMessage::new(b"x", Mode::Rpc));
        assert!(debug.contains("payload_length: 1"));
        assert!(debug.contains("Rpc"));
    }
}
