use std::time::Duration;

use framecall_frame::Envelope;

use crate::error::Result;

/// Bidirectional, fire-and-forget envelope channel.
///
/// `send` gives no delivery confirmation. Inbound envelopes are returned in the
/// order the underlying channel delivers them; no other ordering is implied.
/// Inbound payloads that cannot be decoded are logged and skipped by adapters.
pub trait Transport {
    /// Serialize and dispatch an envelope to the other side.
    fn send(&mut self, envelope: &Envelope) -> Result<()>;

    /// Next inbound envelope if one is already waiting. Never blocks.
    fn try_recv(&mut self) -> Result<Option<Envelope>>;

    /// Wait up to `timeout` for the next inbound envelope.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Envelope>>;

    /// Stop listening and release the channel.
    ///
    /// Closing twice is a no-op. Sends after close fail with
    /// [`TransportError::Shutdown`](crate::TransportError::Shutdown).
    fn close(&mut self) -> Result<()>;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, envelope: &Envelope) -> Result<()> {
        (**self).send(envelope)
    }

    fn try_recv(&mut self) -> Result<Option<Envelope>> {
        (**self).try_recv()
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Envelope>> {
        (**self).recv_timeout(timeout)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn transport_name(&self) -> &'static str {
        (**self).transport_name()
    }
}
