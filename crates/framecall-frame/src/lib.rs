//! Envelope model and wire framing for framecall.
//!
//! Every envelope travels as one frame:
//! - A 2-byte magic number ("FC") for stream synchronization
//! - A 4-byte little-endian payload length
//! - The envelope encoded as a JSON object
//!
//! Message-oriented transports (in-memory channels) skip the header and carry the
//! JSON payload directly.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_envelope, decode_frame, encode_envelope, encode_frame, FrameConfig,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use envelope::{CallId, Envelope, RemoteError};
pub use error::{FrameError, Result};
pub use reader::EnvelopeReader;
pub use writer::EnvelopeWriter;
