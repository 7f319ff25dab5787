//! ipclane - local IPC over Unix domain sockets
//!
//! A client and server exchange length-prefixed binary messages over a local
//! stream socket, either as request/response calls or fire-and-forget
//! notifications, using a fixed small-buffer framing or a resizable
//! variable-length one.

pub mod config;
pub mod error;
pub mod id;
pub mod ipc;
pub mod logging;

pub use config::{Framing, IpcConfig};
pub use error::{IpcError, Result};
pub use ipc::{ClientEndpoint, EchoHandler, FixedMessage, Message, Mode, RequestHandler, ServerEndpoint, VariableMessage};
pub use logging::Logger;
