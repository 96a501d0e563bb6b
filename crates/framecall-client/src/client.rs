use std::time::{Duration, Instant};

use framecall_frame::{CallId, Envelope};
use framecall_transport::Transport;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::call::{CallContext, CallHandle, CallOptions, CallOutcome, Settlement, Waiter};
use crate::error::{ClientError, Result};
use crate::handshake::{
    AuthStrategy, Handshake, HandshakeFailure, HandshakeState, HandshakeWaiter, HANDSHAKE_METHOD,
    SIGNED_REQUEST_KEY,
};
use crate::registry::CallRegistry;

/// Longest single transport wait inside the blocking helpers.
const PUMP_SLICE: Duration = Duration::from_millis(50);

const MAX_APP_ID_LEN: usize = 256;

/// Client configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientConfig {
    /// Application id stamped on every outbound envelope.
    pub app_id: String,
    /// Authentication strategy.
    pub auth: AuthStrategy,
    /// Reject calls with no reply after this long. `None` waits forever.
    pub call_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            ..Self::default()
        }
    }

    pub fn with_auth(mut self, auth: AuthStrategy) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Check the configuration before a client uses it.
    pub fn validate(&self) -> Result<()> {
        if self.app_id.is_empty() || self.app_id.len() > MAX_APP_ID_LEN {
            return Err(ClientError::InvalidConfig(format!(
                "invalid app id length: {} (max {MAX_APP_ID_LEN})",
                self.app_id.len()
            )));
        }
        if self.call_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ClientError::InvalidConfig(
                "call timeout must be greater than zero".to_string(),
            ));
        }
        self.auth.validate()
    }
}

/// What [`RpcClient::handle_envelope`] did with an inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// The matching call resolved with the host's result.
    Resolved(CallId),
    /// The matching call was rejected with the host's error.
    Rejected(CallId),
    /// The envelope settled nothing.
    Discarded(DiscardReason),
}

/// Why an inbound envelope was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Addressed to a different application.
    ForeignApp,
    /// No `callId` to correlate on.
    MissingCallId,
    /// Neither `result` nor `error`: a request, not a reply.
    NotAReply,
    /// No pending call with this id, including ids that already settled.
    UnknownCallId,
    /// The client has been shut down.
    Shutdown,
}

/// Correlated, authenticated remote calls over a [`Transport`].
///
/// Each instance owns its transport, call registry, id sequence and handshake.
/// Nothing is shared between instances.
///
/// The client is driven cooperatively: calls are sent immediately, while
/// replies are only routed when the owner feeds them in through
/// [`poll_transport`](Self::poll_transport), [`pump`](Self::pump),
/// [`run_until_settled`](Self::run_until_settled) or
/// [`handle_envelope`](Self::handle_envelope).
///
/// # Example
///
/// ```
/// use framecall_client::{CallOptions, ClientConfig, RpcClient};
/// use framecall_frame::Envelope;
/// use framecall_transport::{MemoryTransport, Transport};
/// use serde_json::json;
///
/// let (embedded, mut host) = MemoryTransport::pair();
/// let mut client = RpcClient::new(embedded, ClientConfig::new("my-app")).unwrap();
///
/// let mut handle = client.call("getLoggedInUser", json!({}), CallOptions::expect_result());
///
/// let request = host.try_recv().unwrap().unwrap();
/// host.send(&Envelope::reply(request.call_id.unwrap(), json!({"name": "Jane"})))
///     .unwrap();
///
/// client.poll_transport().unwrap();
/// assert_eq!(handle.try_outcome().unwrap().unwrap(), json!({"name": "Jane"}));
/// ```
pub struct RpcClient<T: Transport> {
    transport: T,
    config: ClientConfig,
    registry: CallRegistry,
    handshake: Handshake,
    shut_down: bool,
}

impl<T: Transport> RpcClient<T> {
    /// Create a client and, for [`AuthStrategy::SignedRequest`], send the handshake.
    ///
    /// Only an invalid configuration fails construction. A handshake that cannot
    /// be sent leaves the client in [`HandshakeState::Failed`].
    pub fn new(transport: T, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let mut client = Self {
            transport,
            handshake: Handshake::new(config.auth.requires_handshake()),
            config,
            registry: CallRegistry::new(),
            shut_down: false,
        };
        debug!(
            app_id = %client.config.app_id,
            transport = client.transport.transport_name(),
            auth = ?client.config.auth,
            "client created"
        );
        if let AuthStrategy::SignedRequest(credential) = &client.config.auth {
            let credential = credential.clone();
            client.start_handshake(credential);
        }
        Ok(client)
    }

    fn start_handshake(&mut self, credential: String) {
        let mut settings = Map::new();
        settings.insert(SIGNED_REQUEST_KEY.to_string(), Value::String(credential));

        let id = self
            .registry
            .register(None, self.deadline(), Waiter::Detached);
        self.handshake.begin(id.clone());

        // The handshake call carries no token.
        let envelope = Envelope::request(&self.config.app_id, HANDSHAKE_METHOD, settings)
            .with_call_id(id.clone());
        if let Err(err) = self.transport.send(&envelope) {
            self.handshake
                .fail(HandshakeFailure::Transport(err.to_string()));
            self.registry.reject(&id, err.into());
        }
    }

    /// Issue a call.
    ///
    /// `data` must be a JSON object or `null` (sent as `{}`). With
    /// [`CallOptions::expect_result`] the handle settles when the reply is routed;
    /// otherwise the envelope goes out without a `callId` and the handle is
    /// already resolved with `null`.
    pub fn call(&mut self, method: &str, data: Value, options: CallOptions) -> CallHandle {
        let CallOptions {
            context,
            expect_result,
        } = options;

        if self.shut_down {
            return CallHandle::settled(None, context, Err(ClientError::Shutdown));
        }
        let settings = match settings_from(data) {
            Ok(settings) => settings,
            Err(err) => return CallHandle::settled(None, context, Err(err)),
        };

        if !expect_result {
            let envelope = self.outbound(method, settings);
            if let Err(err) = self.transport.send(&envelope) {
                warn!(method, error = %err, "fire-and-forget send failed");
            }
            return CallHandle::settled(None, context, Ok(Value::Null));
        }

        let (tx, rx) = oneshot::channel();
        let id = self.dispatch(method, settings, None, Waiter::Channel(tx));
        CallHandle::pending(id, context, rx)
    }

    /// Issue a call whose settlement is delivered to `continuation`.
    ///
    /// The continuation runs exactly once, with `context`, from whichever method
    /// routes the reply (or immediately when the call cannot be issued). Returns
    /// the call id when the call went out.
    pub fn call_with<F>(
        &mut self,
        method: &str,
        data: Value,
        context: Option<CallContext>,
        continuation: F,
    ) -> Option<CallId>
    where
        F: FnOnce(Settlement) + Send + 'static,
    {
        if self.shut_down {
            continuation(Settlement {
                context,
                outcome: Err(ClientError::Shutdown),
            });
            return None;
        }
        match settings_from(data) {
            Ok(settings) => Some(self.dispatch(
                method,
                settings,
                context,
                Waiter::Continuation(Box::new(continuation)),
            )),
            Err(err) => {
                continuation(Settlement {
                    context,
                    outcome: Err(err),
                });
                None
            }
        }
    }

    /// Fire-and-forget call.
    pub fn notify(&mut self, method: &str, data: Value) -> CallHandle {
        self.call(method, data, CallOptions::notify())
    }

    fn dispatch(
        &mut self,
        method: &str,
        settings: Map<String, Value>,
        context: Option<CallContext>,
        waiter: Waiter,
    ) -> CallId {
        let id = self.registry.register(context, self.deadline(), waiter);
        let envelope = self.outbound(method, settings).with_call_id(id.clone());
        debug!(call_id = %id, method, "sending call");
        if let Err(err) = self.transport.send(&envelope) {
            debug!(call_id = %id, error = %err, "send failed; rejecting call");
            self.registry.reject(&id, err.into());
        }
        id
    }

    fn outbound(&self, method: &str, settings: Map<String, Value>) -> Envelope {
        let mut envelope = Envelope::request(&self.config.app_id, method, settings);
        if self.handshake.required() {
            envelope.token = Some(self.handshake.token().unwrap_or_default().to_string());
        }
        if let Some(secret) = self.config.auth.consumer_secret() {
            envelope.consumer_secret = Some(secret.to_string());
        }
        envelope
    }

    fn deadline(&self) -> Option<Instant> {
        self.config
            .call_timeout
            .map(|timeout| Instant::now() + timeout)
    }

    /// Route one inbound envelope to the call it answers.
    pub fn handle_envelope(&mut self, envelope: Envelope) -> Routed {
        if self.shut_down {
            return Routed::Discarded(DiscardReason::Shutdown);
        }
        if !envelope.app_id.is_empty() && envelope.app_id != self.config.app_id {
            debug!(app_id = %envelope.app_id, "discarding envelope for another app");
            return Routed::Discarded(DiscardReason::ForeignApp);
        }
        let Some(id) = envelope.call_id.clone() else {
            debug!(method = %envelope.method, "discarding envelope without call id");
            return Routed::Discarded(DiscardReason::MissingCallId);
        };
        if !envelope.is_reply() {
            debug!(call_id = %id, "discarding envelope that is not a reply");
            return Routed::Discarded(DiscardReason::NotAReply);
        }
        if !self.registry.contains(&id) {
            debug!(call_id = %id, "discarding reply for unknown call");
            return Routed::Discarded(DiscardReason::UnknownCallId);
        }

        let outcome = envelope.into_outcome();
        if self.handshake.is_handshake_call(&id) {
            self.handshake.complete(&outcome);
        }
        let resolved = outcome.is_ok();
        self.registry.settle(&id, outcome.map_err(ClientError::Remote));
        if resolved {
            Routed::Resolved(id)
        } else {
            Routed::Rejected(id)
        }
    }

    /// Route every envelope already waiting on the transport, then expire
    /// overdue calls. Never blocks. Returns how many envelopes were read.
    pub fn poll_transport(&mut self) -> Result<usize> {
        self.ensure_running()?;
        let mut received = 0;
        while let Some(envelope) = self.transport.try_recv()? {
            received += 1;
            self.handle_envelope(envelope);
        }
        self.expire_overdue();
        Ok(received)
    }

    /// Wait up to `timeout` for one inbound envelope and route it, then expire
    /// overdue calls. Returns whether an envelope arrived.
    pub fn pump(&mut self, timeout: Duration) -> Result<bool> {
        self.ensure_running()?;
        let received = match self.transport.recv_timeout(timeout)? {
            Some(envelope) => {
                self.handle_envelope(envelope);
                true
            }
            None => false,
        };
        self.expire_overdue();
        Ok(received)
    }

    /// Pump the transport until `handle` settles or `timeout` elapses.
    ///
    /// On timeout the call stays pending and the handle can be waited on again.
    pub fn run_until_settled(&mut self, handle: &mut CallHandle, timeout: Duration) -> CallOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            if handle.is_settled() {
                return handle.try_outcome().unwrap_or(Err(ClientError::Shutdown));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ClientError::Timeout(timeout));
            }
            self.pump((deadline - now).min(PUMP_SLICE))?;
        }
    }

    /// Pump the transport until the handshake finishes or `timeout` elapses.
    ///
    /// Returns immediately when the strategy has no handshake.
    pub fn wait_authenticated(&mut self, timeout: Duration) -> Result<()> {
        if !self.handshake.required() {
            return Ok(());
        }
        let deadline = Instant::now() + timeout;
        loop {
            match self.handshake.state() {
                HandshakeState::Authenticated => return Ok(()),
                HandshakeState::Failed(reason) => {
                    return Err(ClientError::HandshakeFailed(reason.to_string()))
                }
                HandshakeState::NotStarted | HandshakeState::InFlight => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ClientError::Timeout(timeout));
            }
            self.pump((deadline - now).min(PUMP_SLICE))?;
        }
    }

    fn expire_overdue(&mut self) {
        for id in self.registry.expire(Instant::now()) {
            if self.handshake.is_handshake_call(&id) {
                self.handshake.fail(HandshakeFailure::TimedOut);
            }
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down {
            return Err(ClientError::Shutdown);
        }
        Ok(())
    }

    /// Tear the client down.
    ///
    /// Rejects every pending call with [`ClientError::Shutdown`], fails a
    /// handshake still in flight and closes the transport. Idempotent.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.handshake.fail(HandshakeFailure::Shutdown);
        let rejected = self.registry.reject_all(|| ClientError::Shutdown);
        info!(
            app_id = %self.config.app_id,
            rejected,
            "client shut down"
        );
        self.transport.close()?;
        Ok(())
    }

    pub fn app_id(&self) -> &str {
        &self.config.app_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Session token, present once the handshake has authenticated.
    pub fn token(&self) -> Option<&str> {
        self.handshake.token()
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.handshake.state()
    }

    /// Observer for the handshake, usable from async code.
    pub fn handshake(&self) -> HandshakeWaiter {
        self.handshake.subscribe()
    }

    pub fn pending_calls(&self) -> usize {
        self.registry.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> Drop for RpcClient<T> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            debug!(error = %err, "error while closing transport on drop");
        }
    }
}

fn settings_from(data: Value) -> Result<Map<String, Value>> {
    match data {
        Value::Null => Ok(Map::new()),
        Value::Object(settings) => Ok(settings),
        other => Err(ClientError::InvalidSettings(format!(
            "call data must be a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::mpsc;

    use framecall_frame::RemoteError;
    use framecall_transport::{MemoryTransport, TransportError};
    use serde_json::json;

    use super::*;

    const APP: &str = "app-under-test";

    fn connected(config: ClientConfig) -> (RpcClient<MemoryTransport>, MemoryTransport) {
        let (embedded, host) = MemoryTransport::pair();
        (RpcClient::new(embedded, config).unwrap(), host)
    }

    fn next_request(host: &mut MemoryTransport) -> Envelope {
        host.try_recv().unwrap().expect("request envelope")
    }

    fn signed(credential: &str) -> ClientConfig {
        ClientConfig::new(APP).with_auth(AuthStrategy::SignedRequest(credential.to_string()))
    }

    #[test]
    fn config_validation() {
        assert!(ClientConfig::new(APP).validate().is_ok());
        assert!(matches!(
            ClientConfig::new("").validate(),
            Err(ClientError::InvalidConfig(_))
        ));
        assert!(matches!(
            ClientConfig::new(APP)
                .with_call_timeout(Duration::ZERO)
                .validate(),
            Err(ClientError::InvalidConfig(_))
        ));
        let (embedded, _host) = MemoryTransport::pair();
        assert!(RpcClient::new(embedded, signed("")).is_err());
    }

    #[test]
    fn call_ids_are_unique() {
        let (mut client, mut host) = connected(ClientConfig::new(APP));
        let _handles: Vec<CallHandle> = (0..200)
            .map(|_| client.call("ping", Value::Null, CallOptions::expect_result()))
            .collect();

        let ids: HashSet<CallId> = (0..200)
            .map(|_| next_request(&mut host).call_id.unwrap())
            .collect();
        assert_eq!(ids.len(), 200);
        assert_eq!(client.pending_calls(), 200);
    }

    #[test]
    fn request_envelope_shape() {
        let (mut client, mut host) = connected(ClientConfig::new(APP));
        client.call(
            "ajax",
            json!({"url": "/users"}),
            CallOptions::expect_result(),
        );

        let request = next_request(&mut host);
        assert_eq!(request.app_id, APP);
        assert_eq!(request.method, "ajax");
        assert_eq!(request.settings.get("url"), Some(&json!("/users")));
        assert_eq!(request.call_id, Some(CallId::new("c0")));
        assert_eq!(request.token, None);
        assert_eq!(request.consumer_secret, None);
        assert!(!request.is_reply());
    }

    #[test]
    fn success_code_resolves_with_result() {
        let (mut client, mut host) = connected(ClientConfig::new(APP));
        let mut handle = client.call("getLoggedInUser", json!({}), CallOptions::expect_result());
        let id = next_request(&mut host).call_id.unwrap();

        host.send(&Envelope::reply(id.clone(), json!({"fullName": "Jane"})))
            .unwrap();
        assert_eq!(client.poll_transport().unwrap(), 1);

        assert_eq!(
            handle.try_outcome().unwrap().unwrap(),
            json!({"fullName": "Jane"})
        );
        assert_eq!(client.pending_calls(), 0);
    }

    #[test]
    fn nonzero_code_rejects_verbatim() {
        let (mut client, mut host) = connected(ClientConfig::new(APP));
        let mut handle = client.call("ajax", json!({}), CallOptions::expect_result());
        let id = next_request(&mut host).call_id.unwrap();

        let routed = client.handle_envelope(Envelope::failure(
            id.clone(),
            RemoteError::new(403, "Forbidden"),
        ));
        assert_eq!(routed, Routed::Rejected(id));

        let err = handle.try_outcome().unwrap().unwrap_err();
        assert_eq!(err.remote(), Some(&RemoteError::new(403, "Forbidden")));
    }

    #[test]
    fn reply_without_error_object_resolves() {
        let (mut client, mut host) = connected(ClientConfig::new(APP));
        let mut handle = client.call("ping", Value::Null, CallOptions::expect_result());
        let id = next_request(&mut host).call_id.unwrap();

        let reply = Envelope {
            call_id: Some(id),
            result: Some(json!("pong")),
            ..Envelope::default()
        };
        assert!(matches!(client.handle_envelope(reply), Routed::Resolved(_)));
        assert_eq!(handle.try_outcome().unwrap().unwrap(), json!("pong"));
    }

    #[test]
    fn duplicate_reply_is_ignored() {
        let (mut client, mut host) = connected(ClientConfig::new(APP));
        let mut handle = client.call("ping", Value::Null, CallOptions::expect_result());
        let id = next_request(&mut host).call_id.unwrap();

        assert_eq!(
            client.handle_envelope(Envelope::reply(id.clone(), json!("first"))),
            Routed::Resolved(id.clone())
        );
        assert_eq!(
            client.handle_envelope(Envelope::failure(id, RemoteError::new(500, "late"))),
            Routed::Discarded(DiscardReason::UnknownCallId)
        );
        assert_eq!(handle.try_outcome().unwrap().unwrap(), json!("first"));
    }

    #[test]
    fn fire_and_forget_settles_immediately() {
        let (mut client, mut host) = connected(ClientConfig::new(APP));
        let mut handle = client.call(
            "trackEvent",
            json!({"name": "opened"}),
            CallOptions::notify().with_context(json!("ctx")),
        );
        assert!(handle.id().is_none());
        assert_eq!(handle.context(), Some(&json!("ctx")));
        assert_eq!(handle.try_outcome().unwrap().unwrap(), Value::Null);
        assert_eq!(client.pending_calls(), 0);

        let request = next_request(&mut host);
        assert_eq!(request.call_id, None);
        assert_eq!(request.method, "trackEvent");
    }

    #[test]
    fn fire_and_forget_ignores_transport_failure() {
        let (mut client, host) = connected(ClientConfig::new(APP));
        drop(host);
        let mut handle = client.notify("trackEvent", Value::Null);
        assert_eq!(handle.try_outcome().unwrap().unwrap(), Value::Null);
    }

    #[test]
    fn send_failure_rejects_the_call() {
        let (mut client, host) = connected(ClientConfig::new(APP));
        drop(host);
        let mut handle = client.call("ping", Value::Null, CallOptions::expect_result());
        assert!(matches!(
            handle.try_outcome(),
            Some(Err(ClientError::Transport(TransportError::Disconnected)))
        ));
        assert_eq!(client.pending_calls(), 0);
    }

    #[test]
    fn out_of_order_replies_correlate_by_id() {
        let (mut client, mut host) = connected(ClientConfig::new(APP));
        let mut first = client.call("a", Value::Null, CallOptions::expect_result());
        let mut second = client.call("b", Value::Null, CallOptions::expect_result());
        let c0 = next_request(&mut host).call_id.unwrap();
        let c1 = next_request(&mut host).call_id.unwrap();

        host.send(&Envelope::reply(c1, json!("second"))).unwrap();
        client.poll_transport().unwrap();
        assert_eq!(second.try_outcome().unwrap().unwrap(), json!("second"));
        assert!(!first.is_settled());

        host.send(&Envelope::reply(c0, json!("first"))).unwrap();
        client.poll_transport().unwrap();
        assert_eq!(first.try_outcome().unwrap().unwrap(), json!("first"));
    }

    #[test]
    fn unknown_reply_is_a_noop() {
        let (mut client, _host) = connected(ClientConfig::new(APP));
        let mut handle = client.call("ping", Value::Null, CallOptions::expect_result());

        let routed = client.handle_envelope(Envelope::reply(
            CallId::new("does-not-exist"),
            json!("stray"),
        ));
        assert_eq!(routed, Routed::Discarded(DiscardReason::UnknownCallId));
        assert_eq!(client.pending_calls(), 1);
        assert!(!handle.is_settled());
    }

    #[test]
    fn foreign_and_malformed_envelopes_are_discarded() {
        let (mut client, mut host) = connected(ClientConfig::new(APP));
        client.call("ping", Value::Null, CallOptions::expect_result());
        let id = next_request(&mut host).call_id.unwrap();

        assert_eq!(
            client.handle_envelope(Envelope::reply(id.clone(), json!(1)).with_app_id("other")),
            Routed::Discarded(DiscardReason::ForeignApp)
        );
        assert_eq!(
            client.handle_envelope(Envelope::request(APP, "echo", Map::new()).with_call_id(id)),
            Routed::Discarded(DiscardReason::NotAReply)
        );
        assert_eq!(
            client.handle_envelope(Envelope {
                result: Some(json!(1)),
                ..Envelope::default()
            }),
            Routed::Discarded(DiscardReason::MissingCallId)
        );
        assert_eq!(client.pending_calls(), 1);
    }

    #[test]
    fn null_result_reply_resolves() {
        let (mut client, mut host) = connected(ClientConfig::new(APP));
        let mut handle = client.call("logout", Value::Null, CallOptions::expect_result());
        let id = next_request(&mut host).call_id.unwrap();

        let raw = format!(r#"{{"callId":"{id}","result":null}}"#);
        let routed = client.handle_envelope(Envelope::from_json_slice(raw.as_bytes()).unwrap());
        assert_eq!(routed, Routed::Resolved(id));
        assert_eq!(client.pending_calls(), 0);
        assert_eq!(handle.try_outcome().unwrap().unwrap(), Value::Null);
    }

    #[test]
    fn error_without_code_rejects_the_call() {
        let (mut client, mut host) = connected(ClientConfig::new(APP));
        let mut handle = client.call("ping", Value::Null, CallOptions::expect_result());
        let id = next_request(&mut host).call_id.unwrap();

        let raw = format!(r#"{{"callId":"{id}","error":{{"message":"boom"}}}}"#);
        host.send_raw(raw.into_bytes()).unwrap();
        assert_eq!(client.poll_transport().unwrap(), 1);
        assert_eq!(client.pending_calls(), 0);

        let Some(Err(err)) = handle.try_outcome() else {
            panic!("expected a rejected call");
        };
        assert_eq!(
            err.remote(),
            Some(&RemoteError::new(RemoteError::UNEXPECTED_REPLY, "boom"))
        );
    }

    #[test]
    fn invalid_settings_never_reach_the_transport() {
        let (mut client, mut host) = connected(ClientConfig::new(APP));
        let mut handle = client.call("ajax", json!([1, 2]), CallOptions::expect_result());
        assert!(matches!(
            handle.try_outcome(),
            Some(Err(ClientError::InvalidSettings(_)))
        ));
        assert!(host.try_recv().unwrap().is_none());
    }

    #[test]
    fn token_is_empty_until_handshake_reply() {
        let (mut client, mut host) = connected(signed("user_id=1&signature=abc"));
        assert_eq!(client.handshake_state(), HandshakeState::InFlight);
        assert_eq!(client.token(), None);

        let handshake = next_request(&mut host);
        assert_eq!(handshake.method, HANDSHAKE_METHOD);
        assert_eq!(handshake.token, None);
        assert_eq!(
            handshake.settings.get(SIGNED_REQUEST_KEY),
            Some(&json!("user_id=1&signature=abc"))
        );

        client.call("ping", Value::Null, CallOptions::expect_result());
        assert_eq!(next_request(&mut host).token.as_deref(), Some(""));

        host.send(&Envelope::reply(
            handshake.call_id.unwrap(),
            json!({"token": "abc"}),
        ))
        .unwrap();
        client.poll_transport().unwrap();

        assert_eq!(client.handshake_state(), HandshakeState::Authenticated);
        assert_eq!(client.token(), Some("abc"));
        client.call("ping", Value::Null, CallOptions::expect_result());
        assert_eq!(next_request(&mut host).token.as_deref(), Some("abc"));
    }

    #[test]
    fn rejected_handshake_is_terminal() {
        let (mut client, mut host) = connected(signed("user_id=1&signature=bad"));
        let handshake = next_request(&mut host);
        host.send(&Envelope::failure(
            handshake.call_id.unwrap(),
            RemoteError::new(401, "invalid signature"),
        ))
        .unwrap();
        client.poll_transport().unwrap();

        assert_eq!(
            client.handshake_state(),
            HandshakeState::Failed(HandshakeFailure::Rejected(RemoteError::new(
                401,
                "invalid signature"
            )))
        );
        assert!(matches!(
            client.wait_authenticated(Duration::from_millis(10)),
            Err(ClientError::HandshakeFailed(_))
        ));
        assert_eq!(client.token(), None);
    }

    #[test]
    fn legacy_secret_rides_on_every_envelope() {
        let config =
            ClientConfig::new(APP).with_auth(AuthStrategy::ConsumerSecret("legacy".to_string()));
        let (mut client, mut host) = connected(config);
        assert_eq!(client.handshake_state(), HandshakeState::NotStarted);
        client.wait_authenticated(Duration::ZERO).unwrap();

        client.call("ping", Value::Null, CallOptions::expect_result());
        client.notify("trackEvent", Value::Null);
        for _ in 0..2 {
            let request = next_request(&mut host);
            assert_eq!(request.consumer_secret.as_deref(), Some("legacy"));
            assert_eq!(request.token, None);
        }
    }

    #[test]
    fn continuation_receives_context() {
        let (mut client, mut host) = connected(ClientConfig::new(APP));
        let (tx, rx) = mpsc::channel();
        let id = client
            .call_with(
                "getLoggedInUser",
                Value::Null,
                Some(json!({"widget": 3})),
                move |settlement| tx.send(settlement).unwrap(),
            )
            .unwrap();
        assert_eq!(next_request(&mut host).call_id, Some(id.clone()));

        client.handle_envelope(Envelope::reply(id, json!("Jane")));
        let settlement = rx.try_recv().unwrap();
        assert_eq!(settlement.context, Some(json!({"widget": 3})));
        assert_eq!(settlement.outcome.unwrap(), json!("Jane"));
    }

    #[test]
    fn configured_timeout_expires_calls() {
        let config = ClientConfig::new(APP).with_call_timeout(Duration::from_millis(10));
        let (mut client, _host) = connected(config);
        let mut handle = client.call("slow", Value::Null, CallOptions::expect_result());

        std::thread::sleep(Duration::from_millis(20));
        client.poll_transport().unwrap();
        assert!(matches!(
            handle.try_outcome(),
            Some(Err(ClientError::Timeout(_)))
        ));
    }

    #[test]
    fn handshake_timeout_fails_the_handshake() {
        let config = signed("user_id=1&signature=abc").with_call_timeout(Duration::from_millis(10));
        let (mut client, _host) = connected(config);
        std::thread::sleep(Duration::from_millis(20));
        client.poll_transport().unwrap();
        assert_eq!(
            client.handshake_state(),
            HandshakeState::Failed(HandshakeFailure::TimedOut)
        );
    }

    #[test]
    fn run_until_settled_gives_up_but_keeps_the_call() {
        let (mut client, mut host) = connected(ClientConfig::new(APP));
        let mut handle = client.call("slow", Value::Null, CallOptions::expect_result());
        assert!(matches!(
            client.run_until_settled(&mut handle, Duration::from_millis(20)),
            Err(ClientError::Timeout(_))
        ));
        assert_eq!(client.pending_calls(), 1);

        let id = next_request(&mut host).call_id.unwrap();
        host.send(&Envelope::reply(id, json!("eventually"))).unwrap();
        assert_eq!(
            client
                .run_until_settled(&mut handle, Duration::from_secs(1))
                .unwrap(),
            json!("eventually")
        );
    }

    #[test]
    fn run_until_settled_with_threaded_host() {
        let (embedded, mut host) = MemoryTransport::pair();
        let responder = std::thread::spawn(move || {
            let request = host
                .recv_timeout(Duration::from_secs(2))
                .unwrap()
                .unwrap();
            host.send(&Envelope::reply(
                request.call_id.unwrap(),
                json!({"echo": request.method}),
            ))
            .unwrap();
            host
        });

        let mut client = RpcClient::new(embedded, ClientConfig::new(APP)).unwrap();
        let mut handle = client.call("hello", Value::Null, CallOptions::expect_result());
        let value = client
            .run_until_settled(&mut handle, Duration::from_secs(2))
            .unwrap();
        assert_eq!(value, json!({"echo": "hello"}));
        let _host = responder.join().unwrap();
    }

    #[test]
    fn shutdown_rejects_pending_and_later_calls() {
        let (mut client, mut host) = connected(signed("user_id=1&signature=abc"));
        let mut waiter = client.handshake();
        let mut pending = client.call("ping", Value::Null, CallOptions::expect_result());

        client.shutdown().unwrap();
        client.shutdown().unwrap();

        assert!(matches!(
            pending.try_outcome(),
            Some(Err(ClientError::Shutdown))
        ));
        assert_eq!(
            waiter.state(),
            HandshakeState::Failed(HandshakeFailure::Shutdown)
        );
        let mut late = client.call("ping", Value::Null, CallOptions::expect_result());
        assert!(matches!(late.try_outcome(), Some(Err(ClientError::Shutdown))));
        assert!(matches!(
            client.poll_transport(),
            Err(ClientError::Shutdown)
        ));

        // Drain what went out before teardown, then observe the closed end.
        while let Ok(Some(_)) = host.try_recv() {}
        assert!(matches!(host.try_recv(), Err(TransportError::Disconnected)));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        assert!(runtime.block_on(waiter.wait()).is_err());
    }

    #[test]
    fn drop_tears_down() {
        let (mut client, mut host) = connected(ClientConfig::new(APP));
        let mut handle = client.call("ping", Value::Null, CallOptions::expect_result());
        drop(client);

        assert!(matches!(
            handle.try_outcome(),
            Some(Err(ClientError::Shutdown))
        ));
        let _ = next_request(&mut host);
        assert!(matches!(host.try_recv(), Err(TransportError::Disconnected)));
    }

    #[test]
    fn instances_are_independent() {
        let (mut first, mut first_host) = connected(ClientConfig::new(APP));
        let (mut second, mut second_host) = connected(ClientConfig::new(APP));
        first.call("a", Value::Null, CallOptions::expect_result());
        second.call("b", Value::Null, CallOptions::expect_result());

        assert_eq!(next_request(&mut first_host).call_id, Some(CallId::new("c0")));
        assert_eq!(next_request(&mut second_host).call_id, Some(CallId::new("c0")));

        second.shutdown().unwrap();
        assert_eq!(first.pending_calls(), 1);
    }

    #[tokio::test]
    async fn awaiting_a_handle() {
        let (mut client, mut host) = connected(ClientConfig::new(APP));
        let handle = client.call("ping", Value::Null, CallOptions::expect_result());
        let id = next_request(&mut host).call_id.unwrap();
        host.send(&Envelope::reply(id, json!("pong"))).unwrap();
        client.poll_transport().unwrap();
        assert_eq!(handle.await.unwrap(), json!("pong"));
    }
}
