use std::collections::HashMap;
use std::time::Instant;

use framecall_frame::CallId;
use serde_json::Value;
use tracing::debug;

use crate::call::{CallContext, CallOutcome, Waiter};
use crate::error::ClientError;

/// A call waiting for its reply.
#[derive(Debug)]
struct PendingCall {
    context: Option<CallContext>,
    issued_at: Instant,
    deadline: Option<Instant>,
    waiter: Waiter,
}

/// Outstanding calls keyed by their correlation id.
///
/// Ids come from a per-instance counter and are never reused, so at most one
/// entry exists per id. Settling removes the entry before the waiter runs; a
/// second settlement for the same id finds nothing and is a no-op.
#[derive(Debug, Default)]
pub struct CallRegistry {
    next_seq: u64,
    pending: HashMap<CallId, PendingCall>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id and store the pending call under it.
    pub fn register(
        &mut self,
        context: Option<CallContext>,
        deadline: Option<Instant>,
        waiter: Waiter,
    ) -> CallId {
        let id = CallId::from_sequence(self.next_seq);
        self.next_seq += 1;
        self.pending.insert(
            id.clone(),
            PendingCall {
                context,
                issued_at: Instant::now(),
                deadline,
                waiter,
            },
        );
        id
    }

    /// Settle `id` with a value. Returns `false` if the id is not pending.
    pub fn resolve(&mut self, id: &CallId, value: Value) -> bool {
        self.settle(id, Ok(value))
    }

    /// Settle `id` with an error. Returns `false` if the id is not pending.
    pub fn reject(&mut self, id: &CallId, error: ClientError) -> bool {
        self.settle(id, Err(error))
    }

    /// Remove `id` and hand `outcome` to its waiter.
    pub fn settle(&mut self, id: &CallId, outcome: CallOutcome) -> bool {
        let Some(call) = self.pending.remove(id) else {
            debug!(call_id = %id, "no pending call for id; ignoring settlement");
            return false;
        };
        debug!(
            call_id = %id,
            ok = outcome.is_ok(),
            elapsed_ms = call.issued_at.elapsed().as_millis() as u64,
            "settling call"
        );
        call.waiter.settle(call.context, outcome);
        true
    }

    /// Reject every call whose deadline is at or before `now`.
    ///
    /// Returns the expired ids in issue order.
    pub fn expire(&mut self, now: Instant) -> Vec<CallId> {
        let mut expired: Vec<(Instant, CallId)> = self
            .pending
            .iter()
            .filter(|(_, call)| call.deadline.is_some_and(|deadline| deadline <= now))
            .map(|(id, call)| (call.issued_at, id.clone()))
            .collect();
        expired.sort();

        let mut ids = Vec::with_capacity(expired.len());
        for (_, id) in expired {
            if let Some(call) = self.pending.remove(&id) {
                let waited = call
                    .deadline
                    .unwrap_or(now)
                    .saturating_duration_since(call.issued_at);
                debug!(call_id = %id, waited_ms = waited.as_millis() as u64, "call timed out");
                call.waiter
                    .settle(call.context, Err(ClientError::Timeout(waited)));
                ids.push(id);
            }
        }
        ids
    }

    /// Reject every pending call. Returns how many were rejected.
    pub fn reject_all(&mut self, mut make_error: impl FnMut() -> ClientError) -> usize {
        let drained: Vec<(CallId, PendingCall)> = self.pending.drain().collect();
        let count = drained.len();
        for (id, call) in drained {
            debug!(call_id = %id, "rejecting pending call");
            call.waiter.settle(call.context, Err(make_error()));
        }
        count
    }

    pub fn contains(&self, id: &CallId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// How many ids this registry has handed out.
    #[cfg(test)]
    pub fn issued(&self) -> u64 {
        self.next_seq
    }
}
