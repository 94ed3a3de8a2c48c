//! The `Peer` state machine (§4.8): wraps one established connection, its
//! dispatcher, and its outstanding requests, and owns the dispatch loop
//! that reads one message at a time off the wire and routes it.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::rlpx::{
    connection::RLPxConnection,
    error::RLPxError,
    message::RLPxMessage,
    p2p::{Capability, DisconnectMessage, DisconnectReason, PingMessage, PongMessage},
};

pub const HELLO_MSG_ID: u8 = 0x00;
pub const DISCONNECT_MSG_ID: u8 = 0x01;
pub const PING_MSG_ID: u8 = 0x02;
pub const PONG_MSG_ID: u8 = 0x03;

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DISCONNECT_GRACE_PERIOD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Invoked with the disconnect reason when a peer is tearing down; handler
/// failures are logged, never propagated (§4.8 step 3).
pub type DisconnectHandler =
    Box<dyn Fn(DisconnectReason) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

pub struct Peer<S> {
    connection: RLPxConnection<S>,
    dispatcher: Dispatcher,
    state: PeerState,
    disconnect_handlers: Vec<DisconnectHandler>,
}

impl<S: AsyncWrite + AsyncRead + std::marker::Unpin> Peer<S> {
    /// Drives the full `Connecting` phase: ECIES handshake plus `hello`
    /// exchange, then builds the dispatcher from the capabilities the
    /// remote announced.
    pub async fn establish(
        mut connection: RLPxConnection<S>,
        local_protocols: Vec<crate::dispatcher::SubProtocol>,
    ) -> Result<Self, RLPxError> {
        let local_capabilities: Vec<Capability> = local_protocols
            .iter()
            .map(|p| p.capability.clone())
            .collect();

        let remote_capabilities = timeout(HANDSHAKE_TIMEOUT, connection.handshake(&local_capabilities))
            .await
            .map_err(|_| RLPxError::HandshakeTimeout)??;

        let dispatcher = Dispatcher::build(local_protocols, &remote_capabilities)?;
        info!(
            capabilities = ?dispatcher.accepted_capabilities(),
            "RLPx session established"
        );

        Ok(Self {
            connection,
            dispatcher,
            state: PeerState::Connected,
            disconnect_handlers: Vec::new(),
        })
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn register_disconnect_handler(&mut self, handler: DisconnectHandler) {
        self.disconnect_handlers.push(handler);
    }

    /// Reads and routes exactly one wire message. Base-protocol messages
    /// (ping/pong/disconnect) are handled inline; everything else is
    /// resolved through the dispatcher and returned to the caller, who owns
    /// the actual sub-protocol handler table.
    pub async fn dispatch_next(&mut self) -> Result<Option<(usize, u8, Vec<u8>)>, RLPxError> {
        if self.state != PeerState::Connected {
            return Err(RLPxError::InvalidState());
        }

        let (msg_id, body) = self.connection.receive_message().await?;
        match msg_id {
            PING_MSG_ID => {
                PingMessage::decode(&body)?;
                let mut reply = Vec::new();
                PongMessage::default().encode(&mut reply)?;
                self.connection.send_message(PONG_MSG_ID, &reply).await?;
                Ok(None)
            }
            PONG_MSG_ID => {
                PongMessage::decode(&body)?;
                Ok(None)
            }
            DISCONNECT_MSG_ID => {
                let msg = DisconnectMessage::decode(&body)?;
                let reason = msg.reason.unwrap_or(DisconnectReason::DisconnectRequested);
                self.disconnect(reason, false).await;
                Ok(None)
            }
            HELLO_MSG_ID => Err(RLPxError::BreachOfProtocol(
                "hello received after the handshake completed".into(),
            )),
            id => {
                let resolved = self.dispatcher.resolve(id)?;
                Ok(Some((resolved.protocol_index, resolved.local_message_id, body)))
            }
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn send_subprotocol_message(
        &mut self,
        protocol_name: &str,
        local_id: u8,
        body: &[u8],
    ) -> Result<(), RLPxError> {
        let wire_id = self.dispatcher.per_peer_msg_id(protocol_name, local_id)?;
        self.connection.send_message(wire_id, body).await
    }

    /// Tears the peer down per §4.8: idempotent, runs every registered
    /// sub-protocol disconnect handler concurrently, optionally notifies
    /// the remote, then marks the peer `Disconnected`.
    pub async fn disconnect(&mut self, reason: DisconnectReason, notify_other: bool) {
        if matches!(self.state, PeerState::Disconnecting | PeerState::Disconnected) {
            return;
        }
        self.state = PeerState::Disconnecting;

        let mut handlers = tokio::task::JoinSet::new();
        for handler in &self.disconnect_handlers {
            let fut = handler(reason);
            handlers.spawn(fut);
        }
        while let Some(result) = handlers.join_next().await {
            match result {
                Ok(Err(err)) => warn!(%err, "sub-protocol disconnect handler failed"),
                Err(join_err) => warn!(%join_err, "sub-protocol disconnect handler panicked"),
                Ok(Ok(())) => {}
            }
        }

        if notify_other {
            let mut body = Vec::new();
            if DisconnectMessage::new(Some(reason)).encode(&mut body).is_ok() {
                let _ = timeout(
                    DISCONNECT_GRACE_PERIOD,
                    self.connection.send_message(DISCONNECT_MSG_ID, &body),
                )
                .await;
            }
        }

        self.state = PeerState::Disconnected;
        info!(?reason, "peer disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rlpx::utils::pubkey2id;
    use k256::ecdsa::SigningKey;
    use tokio::io::DuplexStream;

    fn signing_key(seed: u8) -> SigningKey {
        SigningKey::from_slice(&[seed; 32]).expect("valid scalar")
    }

    /// Drives a real ECIES handshake and `hello` exchange over an in-memory
    /// duplex stream, handing back the local side as an established `Peer`
    /// and the remote side as a bare connection the test can drive by hand.
    async fn established_pair() -> (Peer<DuplexStream>, RLPxConnection<DuplexStream>) {
        let local_key = signing_key(0x11);
        let remote_key = signing_key(0x22);
        let remote_node_id = pubkey2id(&k256::PublicKey::from(remote_key.verifying_key()));

        let (local_stream, remote_stream) = tokio::io::duplex(8192);
        let local_conn = RLPxConnection::initiator(local_key, remote_node_id, local_stream).await;
        let mut remote_conn = RLPxConnection::receiver(remote_key, remote_stream);

        let (local_peer, remote_caps) = tokio::join!(
            Peer::establish(local_conn, Vec::new()),
            remote_conn.handshake(&[]),
        );
        remote_caps.expect("remote side of the handshake should succeed");
        (
            local_peer.expect("local side of the handshake should succeed"),
            remote_conn,
        )
    }

    #[tokio::test]
    async fn replies_to_ping_with_pong() {
        let (mut local_peer, mut remote_conn) = established_pair().await;

        let mut ping_body = Vec::new();
        PingMessage::default().encode(&mut ping_body).unwrap();
        remote_conn
            .send_message(PING_MSG_ID, &ping_body)
            .await
            .unwrap();

        assert!(local_peer.dispatch_next().await.unwrap().is_none());

        let (msg_id, body) = remote_conn.receive_message().await.unwrap();
        assert_eq!(msg_id, PONG_MSG_ID);
        PongMessage::decode(&body).unwrap();
    }

    #[tokio::test]
    async fn unregistered_message_id_is_a_breach_of_protocol() {
        let (mut local_peer, mut remote_conn) = established_pair().await;

        remote_conn.send_message(0xff, &[0x80]).await.unwrap();

        let err = local_peer.dispatch_next().await.unwrap_err();
        assert!(matches!(err, RLPxError::BreachOfProtocol(_)));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (mut local_peer, _remote_conn) = established_pair().await;

        local_peer
            .disconnect(DisconnectReason::DisconnectRequested, false)
            .await;
        assert_eq!(local_peer.state(), PeerState::Disconnected);

        // A second call must not panic or re-run disconnect handlers.
        local_peer
            .disconnect(DisconnectReason::DisconnectRequested, false)
            .await;
        assert_eq!(local_peer.state(), PeerState::Disconnected);
    }
}
