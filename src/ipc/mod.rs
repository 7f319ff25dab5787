//! IPC Layer - Unix socket transport for local request/response messaging
//!
//! This module provides:
//! - Fixed and variable framings of the binary message
//! - Header/payload wire I/O
//! - Server endpoint with per-connection sessions
//! - Client endpoint with per-call sessions over shared ordering lanes
//! - The session registry both endpoints use for accounting and shutdown

pub mod client;
pub mod codec;
pub mod message;
pub mod pending;
pub mod registry;
pub mod server;

pub use client::{ClientEndpoint, ClientSession, ClientState};
pub use codec::{read_message, write_message};
pub use message::{
    FIXED_HEADER_LENGTH, FIXED_PAYLOAD_CAPACITY, FixedMessage, Message, Mode, PayloadBuffer, SHRINK_THRESHOLD,
    VARIABLE_HEADER_LENGTH, VariableMessage,
};
pub use pending::{Pending, Promise, promise};
pub use registry::{HandlerRegistry, Session};
pub use server::{EchoHandler, RequestHandler, ServerEndpoint, ServerSession, ServerState};
