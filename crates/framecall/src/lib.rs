//! Correlated, authenticated remote calls between embedded apps and their host.
//!
//! An embedded app talks to its host over a bare message channel. framecall adds
//! call ids, a handshake that trades a signed request for a session token, and
//! per-call handles that settle when the matching reply arrives.
//!
//! # Crate Structure
//!
//! - [`frame`]: envelope model and length-prefixed JSON framing
//! - [`transport`]: transport trait plus in-memory and Unix socket adapters
//! - [`client`]: RPC client, handshake, signed requests, host responder (behind `client` feature)

/// Re-export frame types.
pub mod frame {
    pub use framecall_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use framecall_transport::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use framecall_client::*;
}
