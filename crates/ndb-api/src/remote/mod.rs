//! Cross-process channel: newline-delimited JSON over any byte stream.

mod client;
pub mod frame;
mod server;

pub use client::RemoteChannel;
pub use server::{serve, serve_tcp};
