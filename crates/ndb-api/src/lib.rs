//! Event channel layer for the network object database.
//!
//! Everything a source of network state has to speak lives here:
//!
//! - **Wire types**: [`Value`], [`Attrs`], [`Kind`], [`Event`], [`Request`].
//!   An event carries the same attribute shape as a store row; a request
//!   names one create/set/delete against a single entity.
//!
//! - **[`Channel`]**: the capability every source implements: `open()` a
//!   live event stream, `dump()` the full current state, issue a
//!   `request()`, and `close()`. The database core never knows which
//!   implementation backs a target.
//!
//! - **[`MemoryChannel`]**: in-process channel over a simulated
//!   [`Namespace`] with kernel-like semantics and errno-coded rejections.
//!
//! - **[`RemoteChannel`]**: cross-process proxy speaking newline-delimited
//!   JSON over any byte stream; [`remote::serve`] exposes any channel on
//!   the other end.

pub mod channel;
pub mod errno;
pub mod error;
pub mod memory;
pub mod message;
pub mod remote;
pub mod value;

pub use channel::{Channel, EventStream};
pub use error::Error;
pub use memory::{MemoryChannel, Namespace};
pub use message::{Event, EventAction, Kind, Request, RequestAction};
pub use remote::RemoteChannel;
pub use value::{Attrs, Value};
