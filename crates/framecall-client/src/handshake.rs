use std::fmt;

use framecall_frame::{CallId, RemoteError};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{ClientError, Result};

/// Method name of the authentication call.
pub const HANDSHAKE_METHOD: &str = "handshake";

/// Settings key carrying the signed request in the handshake call.
pub const SIGNED_REQUEST_KEY: &str = "signedRequest";

const MAX_CREDENTIAL_LEN: usize = 4096;

/// How the client authenticates to its host.
///
/// Strategies are selected explicitly and never combined.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum AuthStrategy {
    /// Exchange a signed request for a session token via the `handshake` call.
    SignedRequest(String),
    /// Legacy mode: attach a shared secret to every envelope, no handshake.
    ConsumerSecret(String),
    /// No credentials at all.
    #[default]
    Anonymous,
}

impl AuthStrategy {
    /// Whether this strategy runs the handshake call.
    pub fn requires_handshake(&self) -> bool {
        matches!(self, Self::SignedRequest(_))
    }

    /// The shared secret attached to every envelope in legacy mode.
    pub fn consumer_secret(&self) -> Option<&str> {
        match self {
            Self::ConsumerSecret(secret) => Some(secret),
            _ => None,
        }
    }

    /// Check credential length.
    pub fn validate(&self) -> Result<()> {
        let (label, credential) = match self {
            Self::SignedRequest(credential) => ("signed request", credential),
            Self::ConsumerSecret(credential) => ("consumer secret", credential),
            Self::Anonymous => return Ok(()),
        };
        if credential.is_empty() || credential.len() > MAX_CREDENTIAL_LEN {
            return Err(ClientError::InvalidConfig(format!(
                "invalid {label} length: {} (max {MAX_CREDENTIAL_LEN})",
                credential.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignedRequest(credential) => f
                .debug_tuple("SignedRequest")
                .field(&format_args!("<redacted:{} bytes>", credential.len()))
                .finish(),
            Self::ConsumerSecret(secret) => f
                .debug_tuple("ConsumerSecret")
                .field(&format_args!("<redacted:{} bytes>", secret.len()))
                .finish(),
            Self::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// Why the handshake ended without a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeFailure {
    /// The host answered with a nonzero error code.
    Rejected(RemoteError),
    /// The host answered with success but no usable token.
    MissingToken,
    /// The handshake envelope could not be sent.
    Transport(String),
    /// A configured call timeout expired first.
    TimedOut,
    /// The client was torn down first.
    Shutdown,
}

impl fmt::Display for HandshakeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(err) => write!(f, "rejected by host ({err})"),
            Self::MissingToken => f.write_str("reply carried no token"),
            Self::Transport(msg) => write!(f, "could not send handshake: {msg}"),
            Self::TimedOut => f.write_str("no reply before timeout"),
            Self::Shutdown => f.write_str("client shut down"),
        }
    }
}

/// Authentication progress of one client instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    NotStarted,
    InFlight,
    Authenticated,
    /// Terminal. There is no retry.
    Failed(HandshakeFailure),
}

impl HandshakeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Authenticated | Self::Failed(_))
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => f.write_str("not-started"),
            Self::InFlight => f.write_str("in-flight"),
            Self::Authenticated => f.write_str("authenticated"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Handshake state machine owned by a client.
///
/// Transitions: `NotStarted -> InFlight -> Authenticated | Failed`. Only the
/// reply to the recorded handshake call id can complete it.
pub(crate) struct Handshake {
    state: watch::Sender<HandshakeState>,
    token: Option<String>,
    call_id: Option<CallId>,
    required: bool,
}

impl Handshake {
    pub(crate) fn new(required: bool) -> Self {
        let (state, _) = watch::channel(HandshakeState::NotStarted);
        Self {
            state,
            token: None,
            call_id: None,
            required,
        }
    }

    pub(crate) fn state(&self) -> HandshakeState {
        self.state.borrow().clone()
    }

    pub(crate) fn required(&self) -> bool {
        self.required
    }

    pub(crate) fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub(crate) fn is_handshake_call(&self, id: &CallId) -> bool {
        self.call_id.as_ref() == Some(id)
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        matches!(*self.state.borrow(), HandshakeState::InFlight)
    }

    pub(crate) fn begin(&mut self, call_id: CallId) {
        info!(call_id = %call_id, "handshake started");
        self.call_id = Some(call_id);
        self.state.send_replace(HandshakeState::InFlight);
    }

    /// Drive the machine with the handshake call's reply.
    pub(crate) fn complete(&mut self, outcome: &std::result::Result<Value, RemoteError>) {
        match outcome {
            Ok(result) => match result.get("token").and_then(Value::as_str) {
                Some(token) if !token.is_empty() => self.authenticate(token.to_string()),
                _ => self.fail(HandshakeFailure::MissingToken),
            },
            Err(err) => self.fail(HandshakeFailure::Rejected(err.clone())),
        }
    }

    fn authenticate(&mut self, token: String) {
        if !self.is_in_flight() {
            return;
        }
        info!(token_len = token.len(), "handshake authenticated");
        self.token = Some(token);
        self.state.send_replace(HandshakeState::Authenticated);
    }

    /// Move an in-flight handshake to `Failed`. No-op in any other state.
    pub(crate) fn fail(&mut self, failure: HandshakeFailure) {
        if !self.is_in_flight() {
            return;
        }
        warn!(reason = %failure, "handshake failed");
        self.state.send_replace(HandshakeState::Failed(failure));
    }

    pub(crate) fn subscribe(&self) -> HandshakeWaiter {
        HandshakeWaiter {
            rx: self.state.subscribe(),
            required: self.required,
        }
    }
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Handshake");
        dbg.field("state", &*self.state.borrow())
            .field("call_id", &self.call_id)
            .field("required", &self.required);
        if let Some(token) = &self.token {
            dbg.field("token", &format_args!("<redacted:{} bytes>", token.len()));
        } else {
            dbg.field("token", &Option::<String>::None);
        }
        dbg.finish()
    }
}

/// Observer of a client's handshake.
///
/// Cheap to clone. Outlives the client; once the client is gone a handshake
/// that never finished reports failure.
#[derive(Debug, Clone)]
pub struct HandshakeWaiter {
    rx: watch::Receiver<HandshakeState>,
    required: bool,
}

impl HandshakeWaiter {
    /// Current state snapshot.
    pub fn state(&self) -> HandshakeState {
        self.rx.borrow().clone()
    }

    /// Resolve once the client may make authenticated calls.
    ///
    /// Completes immediately when the strategy has no handshake.
    pub async fn wait(&mut self) -> Result<()> {
        if !self.required {
            return Ok(());
        }
        // An error here means the client is gone; the last state still decides.
        let _ = self.rx.wait_for(HandshakeState::is_terminal).await;
        let state = self.rx.borrow().clone();
        match state {
            HandshakeState::Authenticated => Ok(()),
            HandshakeState::Failed(reason) => Err(ClientError::HandshakeFailed(reason.to_string())),
            _ => Err(ClientError::HandshakeFailed(
                HandshakeFailure::Shutdown.to_string(),
            )),
        }
    }
}
