use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use framecall_frame::CallId;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::ClientError;

/// Caller-supplied value handed back with a call's settlement.
pub type CallContext = Value;

/// How a call ends: the host's result, or the reason it failed.
pub type CallOutcome = Result<Value, ClientError>;

/// Callback invoked exactly once when a call settles.
pub type Continuation = Box<dyn FnOnce(Settlement) + Send + 'static>;

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    /// Context handed back with the settlement.
    pub context: Option<CallContext>,
    /// Wait for a correlated reply. When false the call is fire-and-forget.
    pub expect_result: bool,
}

impl CallOptions {
    /// Options for a call that waits for the host's reply.
    pub fn expect_result() -> Self {
        Self {
            context: None,
            expect_result: true,
        }
    }

    /// Options for a fire-and-forget call.
    pub fn notify() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// A settled call as seen by a continuation.
#[derive(Debug)]
pub struct Settlement {
    pub context: Option<CallContext>,
    pub outcome: CallOutcome,
}

/// Who gets told when a registered call settles.
pub enum Waiter {
    /// Wakes the matching [`CallHandle`].
    Channel(oneshot::Sender<CallOutcome>),
    /// Runs a callback with the stored context.
    Continuation(Continuation),
    /// Nobody listens; the settlement is observed elsewhere (the handshake).
    Detached,
}

impl Waiter {
    pub(crate) fn settle(self, context: Option<CallContext>, outcome: CallOutcome) {
        match self {
            // A dropped handle means nobody is interested any more.
            Self::Channel(tx) => {
                let _ = tx.send(outcome);
            }
            Self::Continuation(callback) => callback(Settlement { context, outcome }),
            Self::Detached => {}
        }
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(_) => f.write_str("Waiter::Channel"),
            Self::Continuation(_) => f.write_str("Waiter::Continuation"),
            Self::Detached => f.write_str("Waiter::Detached"),
        }
    }
}

/// Handle to the eventual outcome of one call.
///
/// Poll it without waiting via [`try_outcome`](Self::try_outcome), or `.await` it.
/// Dropping a handle does not withdraw the call.
pub struct CallHandle {
    id: Option<CallId>,
    context: Option<CallContext>,
    state: HandleState,
}

enum HandleState {
    Pending(oneshot::Receiver<CallOutcome>),
    /// `None` once the outcome has been taken.
    Settled(Option<CallOutcome>),
}

impl CallHandle {
    pub(crate) fn pending(
        id: CallId,
        context: Option<CallContext>,
        rx: oneshot::Receiver<CallOutcome>,
    ) -> Self {
        Self {
            id: Some(id),
            context,
            state: HandleState::Pending(rx),
        }
    }

    pub(crate) fn settled(
        id: Option<CallId>,
        context: Option<CallContext>,
        outcome: CallOutcome,
    ) -> Self {
        Self {
            id,
            context,
            state: HandleState::Settled(Some(outcome)),
        }
    }

    /// Correlation id, absent for fire-and-forget calls and calls refused locally.
    pub fn id(&self) -> Option<&CallId> {
        self.id.as_ref()
    }

    /// The context supplied with the call.
    pub fn context(&self) -> Option<&CallContext> {
        self.context.as_ref()
    }

    /// Whether the call has settled.
    pub fn is_settled(&mut self) -> bool {
        self.refresh();
        matches!(self.state, HandleState::Settled(_))
    }

    /// Take the outcome if the call has settled. Never waits.
    ///
    /// Returns `None` while pending, and after the outcome has been taken.
    pub fn try_outcome(&mut self) -> Option<CallOutcome> {
        self.refresh();
        match &mut self.state {
            HandleState::Settled(outcome) => outcome.take(),
            HandleState::Pending(_) => None,
        }
    }

    fn refresh(&mut self) {
        if let HandleState::Pending(rx) = &mut self.state {
            match rx.try_recv() {
                Ok(outcome) => self.state = HandleState::Settled(Some(outcome)),
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.state = HandleState::Settled(Some(Err(ClientError::Shutdown)))
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
        }
    }
}

impl Future for CallHandle {
    type Output = CallOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            // Polling again after the outcome was taken reports the client as gone.
            HandleState::Settled(outcome) => {
                Poll::Ready(outcome.take().unwrap_or(Err(ClientError::Shutdown)))
            }
            HandleState::Pending(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(outcome)) => {
                    this.state = HandleState::Settled(None);
                    Poll::Ready(outcome)
                }
                Poll::Ready(Err(_)) => {
                    this.state = HandleState::Settled(None);
                    Poll::Ready(Err(ClientError::Shutdown))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            HandleState::Pending(_) => "pending",
            HandleState::Settled(Some(_)) => "settled",
            HandleState::Settled(None) => "taken",
        };
        f.debug_struct("CallHandle")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn settled_handle_yields_outcome_once() {
        let mut handle = CallHandle::settled(None, Some(json!("ctx")), Ok(Value::Null));
        assert!(handle.is_settled());
        assert_eq!(handle.context(), Some(&json!("ctx")));
        assert!(matches!(handle.try_outcome(), Some(Ok(Value::Null))));
        assert!(handle.try_outcome().is_none());
    }

    #[test]
    fn pending_handle_settles_through_waiter() {
        let (tx, rx) = oneshot::channel();
        let mut handle = CallHandle::pending(CallId::new("c0"), None, rx);
        assert!(!handle.is_settled());
        assert!(handle.try_outcome().is_none());

        Waiter::Channel(tx).settle(None, Ok(json!(42)));
        assert!(matches!(handle.try_outcome(), Some(Ok(v)) if v == json!(42)));
    }

    #[test]
    fn dropped_waiter_reports_shutdown() {
        let (tx, rx) = oneshot::channel::<CallOutcome>();
        let mut handle = CallHandle::pending(CallId::new("c1"), None, rx);
        drop(tx);
        assert!(matches!(handle.try_outcome(), Some(Err(ClientError::Shutdown))));
    }

    #[test]
    fn continuation_receives_context() {
        let (tx, rx) = std::sync::mpsc::channel();
        let waiter = Waiter::Continuation(Box::new(move |settlement: Settlement| {
            tx.send(settlement).unwrap();
        }));
        waiter.settle(Some(json!({"view": "timeline"})), Ok(json!("done")));

        let settlement = rx.recv().unwrap();
        assert_eq!(settlement.context, Some(json!({"view": "timeline"})));
        assert!(matches!(settlement.outcome, Ok(v) if v == json!("done")));
    }

    #[tokio::test]
    async fn awaiting_pending_handle() {
        let (tx, rx) = oneshot::channel();
        let handle = CallHandle::pending(CallId::new("c2"), None, rx);
        Waiter::Channel(tx).settle(None, Ok(json!("async")));
        assert_eq!(handle.await.unwrap(), json!("async"));
    }
}
