//! CLI module for ipclane - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running an echo server
//! and sending messages to one.

pub mod commands;

pub use commands::Cli;
