//! Messaging channel transport.
//!
//! The coordinator serves one OS-local endpoint (a Unix domain socket, or a
//! named pipe on Windows); workflow processes connect as clients and exchange
//! newline-delimited JSON envelopes with it.

pub mod client;
pub mod error;
pub mod server;
pub mod transport;

pub use {
    client::{CoordinatorClient, REOPEN_HINT},
    error::{Error, Result},
    server::{ClientHandle, ConnId, IpcServer, ServerEvent, serve_connection},
};
