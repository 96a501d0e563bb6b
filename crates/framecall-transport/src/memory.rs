use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};

use framecall_frame::Envelope;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// One end of a connected in-process transport pair.
///
/// Envelopes are encoded to JSON on send and decoded on receive, so both ends
/// see exactly what a serialized channel would carry.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Option<Sender<Vec<u8>>>,
    rx: Receiver<Vec<u8>>,
    closed: bool,
}

impl MemoryTransport {
    /// Create two connected endpoints.
    pub fn pair() -> (Self, Self) {
        let (left_tx, right_rx) = mpsc::channel();
        let (right_tx, left_rx) = mpsc::channel();
        (
            Self {
                tx: Some(left_tx),
                rx: left_rx,
                closed: false,
            },
            Self {
                tx: Some(right_tx),
                rx: right_rx,
                closed: false,
            },
        )
    }

    /// Dispatch an already-encoded payload.
    pub fn send_raw(&mut self, payload: Vec<u8>) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(TransportError::Shutdown)?;
        tx.send(payload).map_err(|_| TransportError::Disconnected)
    }

    fn decode(payload: &[u8]) -> Option<Envelope> {
        match Envelope::from_json_slice(payload) {
            Ok(envelope) => Some(envelope),
            Err(err) => {
                warn!(error = %err, size = payload.len(), "discarding undecodable envelope");
                None
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TransportError::Shutdown);
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, envelope: &Envelope) -> Result<()> {
        self.ensure_open()?;
        let payload = envelope.to_json_bytes()?;
        self.send_raw(payload)
    }

    fn try_recv(&mut self) -> Result<Option<Envelope>> {
        self.ensure_open()?;
        loop {
            match self.rx.try_recv() {
                Ok(payload) => {
                    if let Some(envelope) = Self::decode(&payload) {
                        return Ok(Some(envelope));
                    }
                }
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Err(TransportError::Disconnected),
            }
        }
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Envelope>> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(payload) => {
                    if let Some(envelope) = Self::decode(&payload) {
                        return Ok(Some(envelope));
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Disconnected),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            debug!("closing memory transport");
            self.closed = true;
            self.tx = None;
        }
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use framecall_frame::CallId;
    use serde_json::{json, Map};

    use super::*;

    #[test]
    fn envelopes_cross_the_pair() {
        let (mut embedded, mut host) = MemoryTransport::pair();
        let request = Envelope::request("app", "getLoggedInUser", Map::new())
            .with_call_id(CallId::from_sequence(0));

        embedded.send(&request).unwrap();
        assert_eq!(host.try_recv().unwrap(), Some(request));
        assert_eq!(host.try_recv().unwrap(), None);

        host.send(&Envelope::reply(CallId::from_sequence(0), json!("jane")))
            .unwrap();
        let reply = embedded
            .recv_timeout(Duration::from_millis(100))
            .unwrap()
            .unwrap();
        assert_eq!(reply.into_outcome(), Ok(json!("jane")));
    }

    #[test]
    fn undecodable_payload_is_skipped() {
        let (mut embedded, mut host) = MemoryTransport::pair();
        host.send_raw(b"garbage".to_vec()).unwrap();
        host.send(&Envelope::reply(CallId::new("c1"), json!(1))).unwrap();

        let envelope = embedded.try_recv().unwrap().unwrap();
        assert_eq!(envelope.call_id, Some(CallId::new("c1")));
    }

    #[test]
    fn recv_timeout_expires_without_traffic() {
        let (mut embedded, _host) = MemoryTransport::pair();
        let started = Instant::now();
        let result = embedded.recv_timeout(Duration::from_millis(20)).unwrap();
        assert!(result.is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn close_rejects_further_use() {
        let (mut embedded, mut host) = MemoryTransport::pair();
        embedded.close().unwrap();
        embedded.close().unwrap();

        let err = embedded
            .send(&Envelope::request("app", "ajax", Map::new()))
            .unwrap_err();
        assert!(matches!(err, TransportError::Shutdown));
        assert!(matches!(
            embedded.try_recv(),
            Err(TransportError::Shutdown)
        ));
        assert!(matches!(host.try_recv(), Err(TransportError::Disconnected)));
    }
}
