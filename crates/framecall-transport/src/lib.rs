//! Transport adapters for framecall envelopes.
//!
//! A transport is a best-effort, unordered, fire-and-forget message channel
//! between an embedded context and its host. Adapters provided here:
//! - [`MemoryTransport`]: a connected in-process pair
//! - [`StreamTransport`]: framed envelopes over a Unix domain socket (Linux/macOS)
//!
//! Everything above this layer talks to the [`Transport`] trait only.

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use memory::MemoryTransport;
pub use traits::Transport;

#[cfg(unix)]
pub use uds::{StreamTransport, UnixDomainSocket};
