//! Shared error definitions and the chat-platform data model used across all
//! switchboard crates.

pub mod error;
pub mod types;

pub use error::{Error, FromMessage, Result};
