//! Resizable variable-length framing.
//!
//! Layout, host byte order:
//! - 8 bytes: payload size (u64)
//! - 8 bytes: timestamp in ms (u64)
//! - 1 byte: mode
//! - payload_size bytes: payload
//!
//! The header sits in its own fixed array and the payload in a separately
//! allocated buffer, so `decode()` must size the payload before it is read.

use std::fmt;
use std::ops::Range;

use crate::error::{IpcError, Result};
use crate::id::now_ms;

use super::buffer::PayloadBuffer;
use super::{Message, Mode};

pub const VARIABLE_HEADER_LENGTH: usize = 17;

const SIZE: Range<usize> = 0..8;
const TIMESTAMP: Range<usize> = 8..16;
const MODE: usize = 16;

/// Message with a separate header array and resizable payload storage.
#[derive(Clone)]
pub struct VariableMessage {
    header: [u8; VARIABLE_HEADER_LENGTH],
    payload: PayloadBuffer,
    header_ready: bool,
}

impl VariableMessage {
    fn read_u64(&self, range: Range<usize>) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.header[range]);
        u64::from_ne_bytes(raw)
    }

    /// Resize payload storage, following the shrink hysteresis policy.
    pub fn resize(&mut self, len: usize) {
        self.payload.resize(len);
    }

    /// Backing payload storage, for inspecting capacity.
    pub fn storage(&self) -> &PayloadBuffer {
        &self.payload
    }
}

impl Message for VariableMessage {
    const HEADER_LENGTH: usize = VARIABLE_HEADER_LENGTH;

    fn new(payload: &[u8], mode: Mode) -> Self {
        let mut message = Self {
            header: [0u8; VARIABLE_HEADER_LENGTH],
            payload: PayloadBuffer::new(),
            header_ready: false,
        };
        message.encode(payload, mode);
        message
    }

    fn header(&self) -> &[u8] {
        &self.header
    }

    fn header_buffer(&mut self) -> &mut [u8] {
        self.header_ready = false;
        &mut self.header
    }

    fn commit_header(&mut self) {
        self.header_ready = true;
    }

    fn decode(&mut self) -> Result<()> {
        if !self.header_ready {
            return Err(IpcError::MalformedHeader);
        }
        let declared = usize::try_from(self.read_u64(SIZE))
            .ok()
            .filter(|&size| size <= isize::MAX as usize)
            .ok_or(IpcError::MalformedHeader)?;
        self.payload
            .try_resize(declared)
            .map_err(|_| IpcError::MalformedHeader)
    }

    fn payload(&self) -> &[u8] {
        self.payload.as_slice()
    }

    fn payload_buffer(&mut self) -> &mut [u8] {
        self.payload.as_mut_slice()
    }

    fn payload_length(&self) -> usize {
        self.payload.len()
    }

    fn mode(&self) -> Mode {
        Mode::from(self.header[MODE])
    }

    fn timestamp(&self) -> u64 {
        self.read_u64(TIMESTAMP)
    }

    fn encode(&mut self, payload: &[u8], mode: Mode) {
        self.header[SIZE].copy_from_slice(&(payload.len() as u64).to_ne_bytes());
        self.header[TIMESTAMP].copy_from_slice(&now_ms().to_ne_bytes());
        self.header[MODE] = mode.into();
        self.payload.resize(payload.len());
        self.payload.as_mut_slice().copy_from_slice(payload);
        self.header_ready = true;
    }
}

impl fmt::Debug for VariableMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableMessage")
            .field("payload_length", &self.payload_length())
            .field("capacity", &self.payload.capacity())
            .field("timestamp", &self.timestamp())
            .field("mode", &self.mode())
            .finish()
    }
}

impl Default for VariableMessage {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::message::FIXED_PAYLOAD_CAPACITY;

    #[test]
    fn test_large_payload_not_truncated() {
        let source = vec![9u8; 10 * FIXED_PAYLOAD_CAPACITY];
        let message = VariableMessage::new(&source, Mode::Rpc);
        assert_eq!(message.payload_length(), source.len());
        assert_eq!(message.payload(), source.as_slice());
    }

    #[test]
    fn test_header_layout() {
        let message = VariableMessage::new(b"payload", Mode::FireAndForget);
        let header = message.header();
        assert_eq!(header.len(), VARIABLE_HEADER_LENGTH);
        assert_eq!(&header[0..8], &7u64.to_ne_bytes());
        assert_eq!(&header[8..16], &message.timestamp().to_ne_bytes());
        assert_eq!(header[16], 1);
    }

    #[test]
    fn test_decode_resizes_payload() {
        let source = VariableMessage::new(&[3u8; 4096], Mode::Rpc);

        let mut target = VariableMessage::empty();
        target.header_buffer().copy_from_slice(source.header());
        target.commit_header();
        // Separate header storage: nothing is known until decode runs
        assert_eq!(target.payload_length(), 0);

        target.decode().unwrap();
        assert_eq!(target.payload_length(), 4096);
        target.payload_buffer().copy_from_slice(source.payload());
        assert_eq!(target.payload(), source.payload());
        assert_eq!(target.timestamp(), source.timestamp());
        assert_eq!(target.mode(), Mode::Rpc);
    }

    #[test]
    fn test_decode_before_header_filled() {
        let mut message = VariableMessage::empty();
        let _ = message.header_buffer();
        assert!(matches!(message.decode(), Err(IpcError::MalformedHeader)));
    }

    #[test]
    fn test_decode_rejects_unallocatable_size() {
        let mut message = VariableMessage::new(b"previous", Mode::Rpc);
        message.header_buffer()[0..8].copy_from_slice(&u64::MAX.to_ne_bytes());
        message.commit_header();

        assert!(matches!(message.decode(), Err(IpcError::MalformedHeader)));
        // Storage is left as it was
        assert_eq!(message.payload(), b"previous");
    }

    #[test]
    fn test_resize_hysteresis() {
        let mut message = VariableMessage::new(&[0u8; 2048], Mode::Rpc);
        let original = message.storage().as_ptr();

        message.resize(2040);
        assert_eq!(message.storage().as_ptr(), original);
        assert_eq!(message.payload_length(), 2040);

        message.resize(900);
        assert_eq!(message.storage().capacity(), 900);
        assert_eq!(message.payload_length(), 900);
    }

    #[test]
    fn test_encode_reuses_storage_for_similar_sizes() {
        let mut message = VariableMessage::new(&[1u8; 2048], Mode::Rpc);
        let original = message.storage().as_ptr();
        message.encode(&[2u8; 2000], Mode::Rpc);
        assert_eq!(message.storage().as_ptr(), original);
        assert_eq!(message.payload(), &[2u8; 2000][..]);
    }
}
