//! Correlated, authenticated remote calls from an embedded context to its host.
//!
//! The underlying [`Transport`](framecall_transport::Transport) is a plain
//! message channel with no request/response pairing. [`RpcClient`] layers on top:
//! - a per-instance [`CallId`](framecall_frame::CallId) sequence and a registry of
//!   pending calls, so replies settle the right [`CallHandle`] in any order
//! - the handshake that exchanges a signed request for a session token
//! - settlement through handles (pollable or awaitable) or continuations
//!
//! [`HostEndpoint`] is the other side, used by demo hosts and tests.

pub mod call;
pub mod client;
pub mod error;
pub mod handshake;
pub mod host;
pub mod methods;
pub mod registry;
pub mod signed_request;

pub use call::{CallContext, CallHandle, CallOptions, CallOutcome, Continuation, Settlement};
pub use client::{ClientConfig, DiscardReason, Routed, RpcClient};
pub use error::{ClientError, Result};
pub use handshake::{
    AuthStrategy, HandshakeFailure, HandshakeState, HandshakeWaiter, HANDSHAKE_METHOD,
    SIGNED_REQUEST_KEY,
};
pub use host::{HostEndpoint, Served};
pub use methods::{AJAX_METHOD, GET_LOGGED_IN_USER_METHOD};
pub use registry::CallRegistry;
pub use signed_request::{Params, SignatureError};
