//! Correlates outbound sub-protocol requests with their inbound responses
//! (§4.7), grounded in the request/reply bookkeeping `peer_channels` does
//! by hand for each eth/snap request type -- generalized here into a single
//! reusable table so new sub-protocols don't have to repeat it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tracing::warn;

use crate::rlpx::p2p::DisconnectReason;

/// What a pending request eventually resolves to.
#[derive(Debug)]
pub enum RequestOutcome<T> {
    Response(T),
    TimedOut,
    PeerDisconnected(DisconnectReason),
}

struct ExplicitSlot<T> {
    responder: oneshot::Sender<RequestOutcome<T>>,
}

struct FifoSlot<T> {
    token: u64,
    responder: oneshot::Sender<RequestOutcome<T>>,
}

struct State<T> {
    last_req_id: u64,
    explicit: HashMap<u64, ExplicitSlot<T>>,
    fifo: VecDeque<FifoSlot<T>>,
    next_fifo_token: u64,
}

impl<T> Default for State<T> {
    fn default() -> Self {
        Self {
            last_req_id: 0,
            explicit: HashMap::new(),
            fifo: VecDeque::new(),
            next_fifo_token: 0,
        }
    }
}

/// A table of outstanding requests for one response message type.
///
/// Two correlation styles share the table: requests carrying an explicit
/// `reqId` (LES-style) are looked up by id; requests with none (eth-style)
/// resolve the oldest still-outstanding entry, FIFO.
pub struct PendingRequests<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for PendingRequests<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Default for PendingRequests<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }
}

impl<T: Send + 'static> PendingRequests<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `reqId = ++lastReqId`, registers a slot for it, and arms a
    /// single-shot timeout. Returns the id to embed in the outbound message
    /// body and the receiver the caller awaits.
    pub async fn register_explicit(
        &self,
        timeout: Duration,
    ) -> (u64, oneshot::Receiver<RequestOutcome<T>>) {
        let (tx, rx) = oneshot::channel();
        let req_id = {
            let mut state = self.state.lock().await;
            state.last_req_id += 1;
            let req_id = state.last_req_id;
            state.explicit.insert(req_id, ExplicitSlot { responder: tx });
            req_id
        };

        let table = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            table.time_out_explicit(req_id).await;
        });

        (req_id, rx)
    }

    /// Registers a FIFO-style request (no id on the wire) and arms a
    /// single-shot timeout. Returns the receiver the caller awaits.
    pub async fn register_fifo(&self, timeout: Duration) -> oneshot::Receiver<RequestOutcome<T>> {
        let (tx, rx) = oneshot::channel();
        let token = {
            let mut state = self.state.lock().await;
            let token = state.next_fifo_token;
            state.next_fifo_token += 1;
            state.fifo.push_back(FifoSlot {
                token,
                responder: tx,
            });
            token
        };

        let table = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            table.time_out_fifo(token).await;
        });

        rx
    }

    /// Resolves the explicit-id request matching `req_id`, if still
    /// outstanding. A missing entry for an id beyond any ever allocated is
    /// logged; a missing entry for an older id is assumed already resolved
    /// or timed out and is dropped silently.
    pub async fn resolve_explicit(&self, req_id: u64, value: T) {
        let mut state = self.state.lock().await;
        match state.explicit.remove(&req_id) {
            Some(slot) => {
                let _ = slot.responder.send(RequestOutcome::Response(value));
            }
            None if req_id > state.last_req_id => {
                warn!(req_id, "response referenced a request id that was never allocated");
            }
            None => {}
        }
    }

    /// Resolves the oldest outstanding FIFO request, if any.
    pub async fn resolve_fifo(&self, value: T) -> bool {
        let mut state = self.state.lock().await;
        match state.fifo.pop_front() {
            Some(slot) => {
                let _ = slot.responder.send(RequestOutcome::Response(value));
                true
            }
            None => false,
        }
    }

    /// Cancels every outstanding request (explicit and FIFO) with a
    /// `PeerDisconnected` outcome, called when the owning peer disconnects.
    pub async fn cancel_all(&self, reason: DisconnectReason) {
        let mut state = self.state.lock().await;
        for (_, slot) in state.explicit.drain() {
            let _ = slot.responder.send(RequestOutcome::PeerDisconnected(reason));
        }
        for slot in state.fifo.drain(..) {
            let _ = slot.responder.send(RequestOutcome::PeerDisconnected(reason));
        }
    }

    async fn time_out_explicit(&self, req_id: u64) {
        let mut state = self.state.lock().await;
        if let Some(slot) = state.explicit.remove(&req_id) {
            let _ = slot.responder.send(RequestOutcome::TimedOut);
        }
    }

    async fn time_out_fifo(&self, token: u64) {
        let mut state = self.state.lock().await;
        if let Some(index) = state.fifo.iter().position(|slot| slot.token == token) {
            let slot = state.fifo.remove(index).expect("index just found");
            let _ = slot.responder.send(RequestOutcome::TimedOut);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn explicit_requests_resolve_by_id_out_of_order() {
        let table: PendingRequests<&'static str> = PendingRequests::new();
        let (id_a, rx_a) = table.register_explicit(Duration::from_secs(5)).await;
        let (id_b, rx_b) = table.register_explicit(Duration::from_secs(5)).await;
        assert_ne!(id_a, id_b);

        table.resolve_explicit(id_b, "second").await;
        table.resolve_explicit(id_a, "first").await;

        assert!(matches!(rx_a.await.unwrap(), RequestOutcome::Response("first")));
        assert!(matches!(rx_b.await.unwrap(), RequestOutcome::Response("second")));
    }

    #[tokio::test]
    async fn fifo_requests_resolve_oldest_first() {
        let table: PendingRequests<u32> = PendingRequests::new();
        let rx_a = table.register_fifo(Duration::from_secs(5)).await;
        let rx_b = table.register_fifo(Duration::from_secs(5)).await;

        assert!(table.resolve_fifo(1).await);
        assert!(table.resolve_fifo(2).await);

        assert!(matches!(rx_a.await.unwrap(), RequestOutcome::Response(1)));
        assert!(matches!(rx_b.await.unwrap(), RequestOutcome::Response(2)));
    }

    #[tokio::test]
    async fn resolve_fifo_on_empty_table_returns_false() {
        let table: PendingRequests<u32> = PendingRequests::new();
        assert!(!table.resolve_fifo(1).await);
    }

    #[tokio::test]
    async fn unregistered_timeout_resolves_the_request() {
        let table: PendingRequests<u32> = PendingRequests::new();
        let (_, rx) = table.register_explicit(Duration::from_millis(20)).await;
        assert!(matches!(rx.await.unwrap(), RequestOutcome::TimedOut));
    }

    #[tokio::test]
    async fn cancel_all_resolves_outstanding_requests_with_disconnect_reason() {
        let table: PendingRequests<u32> = PendingRequests::new();
        let (_, rx_explicit) = table.register_explicit(Duration::from_secs(5)).await;
        let rx_fifo = table.register_fifo(Duration::from_secs(5)).await;

        table.cancel_all(DisconnectReason::ClientQuitting).await;

        assert!(matches!(
            rx_explicit.await.unwrap(),
            RequestOutcome::PeerDisconnected(DisconnectReason::ClientQuitting)
        ));
        assert!(matches!(
            rx_fifo.await.unwrap(),
            RequestOutcome::PeerDisconnected(DisconnectReason::ClientQuitting)
        ));
    }
}
