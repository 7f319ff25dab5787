//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - serve: run an echo server on a local socket
//! - send: send one or more messages and print the replies

use clap::{Parser, Subcommand};
use ipclane::{Framing, Mode};
use std::path::PathBuf;

/// Default socket file name under the configured prefix.
pub const DEFAULT_SOCKET: &str = "ipclane.sock";

/// ipclane - local request/response messaging over Unix sockets
#[derive(Parser, Debug)]
#[command(name = "ipclane")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an echo server until interrupted
    Serve {
        /// Socket file name under the socket prefix
        #[arg(short, long, default_value = DEFAULT_SOCKET)]
        socket: String,

        /// Wire framing (fixed, variable); defaults to the configured one
        #[arg(short, long)]
        framing: Option<Framing>,

        /// Reactor worker threads; defaults to the configured count
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Send a payload and print the reply
    Send {
        /// Payload text
        payload: String,

        /// Socket file name under the socket prefix
        #[arg(short, long, default_value = DEFAULT_SOCKET)]
        socket: String,

        /// Wire framing (fixed, variable); defaults to the configured one
        #[arg(short, long)]
        framing: Option<Framing>,

        /// Interaction mode (rpc, fire-and-forget)
        #[arg(short, long, default_value = "rpc")]
        mode: Mode,

        /// Number of times to send the payload
        #[arg(short, long, default_value_t = 1)]
        repeat: usize,
    },
}
