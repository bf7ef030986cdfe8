//! Response correlation keyed by topic.
//!
//! Every inbound message lands here through [`Correlator::record`], whether
//! or not anyone is waiting for it. Callers wait on a topic with a deadline
//! and take the reply out of its slot (read-then-clear).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::osc::{OscArg, OscMessage, Payload};
use crate::transport::InboundHandler;

/// The most recent unconsumed reply for one topic.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReply {
    pub topic: String,
    pub payload: Payload,
    pub received_at: Instant,
}

/// Outcome of a bounded wait: a payload, or nothing in time.
///
/// `Timeout` means "unknown". It covers a lost datagram, an unanswered
/// address and an index that does not exist in the session alike.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Reply(Payload),
    Timeout,
}

impl QueryResult {
    pub fn is_timeout(&self) -> bool {
        matches!(self, QueryResult::Timeout)
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            QueryResult::Reply(payload) => Some(payload),
            QueryResult::Timeout => None,
        }
    }

    pub fn into_payload(self) -> Option<Payload> {
        match self {
            QueryResult::Reply(payload) => Some(payload),
            QueryResult::Timeout => None,
        }
    }

    /// Argument at `index`, if a reply arrived and is long enough.
    pub fn arg(&self, index: usize) -> Option<&OscArg> {
        self.payload().and_then(|p| p.get(index))
    }

    /// Arguments after an echoed prefix of `skip` values.
    pub fn tail(&self, skip: usize) -> Option<&[OscArg]> {
        self.payload().map(|p| p.get(skip..).unwrap_or(&[]))
    }
}

impl From<Option<Payload>> for QueryResult {
    fn from(value: Option<Payload>) -> Self {
        match value {
            Some(payload) => QueryResult::Reply(payload),
            None => QueryResult::Timeout,
        }
    }
}

/// Replies serialize as the bare argument array, timeouts as `null`.
impl Serialize for QueryResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            QueryResult::Reply(payload) => payload.serialize(serializer),
            QueryResult::Timeout => serializer.serialize_none(),
        }
    }
}

/// Owned table of topic -> latest reply.
///
/// One instance per session; nothing here is process-global.
#[derive(Debug, Default)]
pub struct Correlator {
    slots: Mutex<HashMap<String, PendingReply>>,
    arrivals: Notify,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `payload` as the latest reply for `topic`, replacing any
    /// unconsumed one, and wake waiters.
    pub fn record(&self, topic: &str, payload: Payload) {
        let reply = PendingReply {
            topic: topic.to_string(),
            payload,
            received_at: Instant::now(),
        };
        let replaced = self.slots().insert(topic.to_string(), reply).is_some();
        if replaced {
            trace!(topic, "overwrote unconsumed reply");
        }
        self.arrivals.notify_waiters();
    }

    /// Wait up to `timeout` for a reply on `topic` and take it.
    pub async fn await_reply(&self, topic: &str, timeout: Duration) -> QueryResult {
        self.await_matching(topic, timeout, |_| true).await
    }

    /// Wait up to `timeout` for a reply on `topic` that satisfies `accept`.
    ///
    /// Replies that arrive but fail `accept` are removed and dropped, so a
    /// straggler answering an earlier request cannot be returned later.
    pub async fn await_matching<F>(&self, topic: &str, timeout: Duration, accept: F) -> QueryResult
    where
        F: Fn(&Payload) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before looking so an arrival between the
            // check and the wait is not missed.
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(reply) = self.take(topic) {
                if accept(&reply.payload) {
                    return QueryResult::Reply(reply.payload);
                }
                debug!(topic, payload = ?reply.payload, "discarding reply for a different request");
                continue;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // A reply may have landed in the same instant the timer fired
                if let Some(reply) = self.take(topic) {
                    if accept(&reply.payload) {
                        return QueryResult::Reply(reply.payload);
                    }
                }
                return QueryResult::Timeout;
            }
        }
    }

    /// Drop any unconsumed reply for `topic`.
    pub fn clear(&self, topic: &str) {
        self.slots().remove(topic);
    }

    /// Look at the unconsumed reply for `topic` without taking it.
    pub fn peek(&self, topic: &str) -> Option<PendingReply> {
        self.slots().get(topic).cloned()
    }

    /// Number of topics holding an unconsumed reply.
    pub fn pending(&self) -> usize {
        self.slots().len()
    }

    fn take(&self, topic: &str) -> Option<PendingReply> {
        self.slots().remove(topic)
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, PendingReply>> {
        // No code path can panic while holding the lock, but stay usable if one does
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl InboundHandler for Correlator {
    fn on_message(&self, message: OscMessage) {
        self.record(&message.address, message.args);
    }
}
