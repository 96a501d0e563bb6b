use std::time::Duration;

use framecall_frame::{Envelope, RemoteError};
use framecall_transport::Transport;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;

/// What [`HostEndpoint::serve_next`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum Served {
    /// Nothing arrived before the timeout.
    Idle,
    /// A request was handled and answered.
    Replied(Envelope),
    /// A fire-and-forget request was handled; nothing was sent back.
    Notified { method: String },
    /// An inbound reply was ignored.
    Ignored,
}

/// Host side of the protocol: receives requests and answers them.
pub struct HostEndpoint<T: Transport> {
    transport: T,
}

impl<T: Transport> HostEndpoint<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Receive one request and answer it with `handler`.
    ///
    /// Requests without a `callId` run the handler but get no reply. Envelopes
    /// that are themselves replies are ignored.
    pub fn serve_next<F>(&mut self, timeout: Duration, handler: F) -> Result<Served>
    where
        F: FnOnce(&Envelope) -> std::result::Result<Value, RemoteError>,
    {
        let Some(request) = self.transport.recv_timeout(timeout)? else {
            return Ok(Served::Idle);
        };
        if request.is_reply() {
            debug!(call_id = ?request.call_id, "host ignoring inbound reply");
            return Ok(Served::Ignored);
        }

        debug!(method = %request.method, call_id = ?request.call_id, "host handling request");
        let outcome = handler(&request);

        if request.call_id.is_none() {
            if let Err(err) = &outcome {
                warn!(method = %request.method, error = %err, "fire-and-forget request failed");
            }
            return Ok(Served::Notified {
                method: request.method,
            });
        }

        let Some(reply) = Self::reply_to(&request, outcome) else {
            return Ok(Served::Ignored);
        };
        self.transport.send(&reply)?;
        Ok(Served::Replied(reply))
    }

    /// Build the reply envelope for `request`, or `None` when it has no call id.
    ///
    /// Successful replies carry `result` and the `{code: 0}` error object.
    pub fn reply_to(
        request: &Envelope,
        outcome: std::result::Result<Value, RemoteError>,
    ) -> Option<Envelope> {
        let call_id = request.call_id.clone()?;
        let reply = match outcome {
            Ok(result) => Envelope::reply(call_id, result),
            Err(error) => Envelope::failure(call_id, error),
        };
        Some(reply.with_app_id(request.app_id.clone()))
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use framecall_frame::CallId;
    use framecall_transport::MemoryTransport;
    use serde_json::{json, Map};

    use super::*;
    use crate::call::CallOptions;
    use crate::client::{ClientConfig, RpcClient};
    use crate::handshake::{AuthStrategy, HandshakeState};

    #[test]
    fn reply_to_echoes_call_id_and_app() {
        let request = Envelope::request("app", "getLoggedInUser", Map::new())
            .with_call_id(CallId::new("c9"));

        let reply = HostEndpoint::<MemoryTransport>::reply_to(&request, Ok(json!("Jane"))).unwrap();
        assert_eq!(reply.call_id, Some(CallId::new("c9")));
        assert_eq!(reply.app_id, "app");
        assert_eq!(reply.error, Some(RemoteError::success()));

        let failure =
            HostEndpoint::<MemoryTransport>::reply_to(&request, Err(RemoteError::new(404, "nope")))
                .unwrap();
        assert_eq!(failure.into_outcome(), Err(RemoteError::new(404, "nope")));

        let notification = Envelope::request("app", "track", Map::new());
        assert!(HostEndpoint::<MemoryTransport>::reply_to(&notification, Ok(Value::Null)).is_none());
    }

    #[test]
    fn serves_handshake_and_calls() {
        let (embedded, host) = MemoryTransport::pair();
        let mut host = HostEndpoint::new(host);
        let config = ClientConfig::new("app")
            .with_auth(AuthStrategy::SignedRequest("user=1&signature=x".to_string()));
        let mut client = RpcClient::new(embedded, config).unwrap();

        let served = host
            .serve_next(Duration::from_millis(100), |request| {
                assert_eq!(request.method, "handshake");
                Ok(json!({"token": "session-1"}))
            })
            .unwrap();
        assert!(matches!(served, Served::Replied(_)));
        client.poll_transport().unwrap();
        assert_eq!(client.handshake_state(), HandshakeState::Authenticated);

        let mut handle = client.call("whoami", Value::Null, CallOptions::expect_result());
        host.serve_next(Duration::from_millis(100), |request| {
            Ok(json!({"token": request.token}))
        })
        .unwrap();
        client.poll_transport().unwrap();
        assert_eq!(
            handle.try_outcome().unwrap().unwrap(),
            json!({"token": "session-1"})
        );
    }

    #[test]
    fn notifications_get_no_reply() {
        let (mut embedded, host) = MemoryTransport::pair();
        let mut host = HostEndpoint::new(host);
        embedded
            .send(&Envelope::request("app", "track", Map::new()))
            .unwrap();

        let served = host
            .serve_next(Duration::from_millis(100), |_| Err(RemoteError::new(500, "boom")))
            .unwrap();
        assert_eq!(
            served,
            Served::Notified {
                method: "track".to_string()
            }
        );
        assert!(embedded.try_recv().unwrap().is_none());
    }

    #[test]
    fn idle_and_ignored() {
        let (mut embedded, host) = MemoryTransport::pair();
        let mut host = HostEndpoint::new(host);
        assert_eq!(
            host.serve_next(Duration::from_millis(5), |_| Ok(Value::Null))
                .unwrap(),
            Served::Idle
        );

        embedded
            .send(&Envelope::reply(CallId::new("c0"), json!(1)))
            .unwrap();
        assert_eq!(
            host.serve_next(Duration::from_millis(100), |_| Ok(Value::Null))
                .unwrap(),
            Served::Ignored
        );
    }
}
