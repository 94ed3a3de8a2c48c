//! Builds a per-connection routing table from the sub-protocols registered
//! locally and the capability list the remote peer announced in its `hello`
//! message (§4.6).

use crate::rlpx::{error::RLPxError, p2p::Capability};

pub const DEVP2P_RESERVED_MESSAGE_IDS: usize = 16;

/// One message a sub-protocol knows how to send or receive, identified by a
/// dense id local to that protocol (`0..k-1`). Handler dispatch itself
/// lives with the caller (see [`crate::peer`]); this only carries enough
/// metadata to route and to print useful errors.
#[derive(Debug, Clone)]
pub struct MessageDescriptor {
    pub name: &'static str,
}

impl MessageDescriptor {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

/// An immutable, process-wide descriptor for a sub-protocol, registered
/// once at startup and shared by every connection.
#[derive(Debug, Clone)]
pub struct SubProtocol {
    pub capability: Capability,
    pub messages: Vec<MessageDescriptor>,
}

impl SubProtocol {
    pub fn new(name: impl Into<String>, version: u64, messages: Vec<MessageDescriptor>) -> Self {
        Self {
            capability: Capability::new(name, version),
            messages,
        }
    }
}

#[derive(Debug, Clone)]
struct AcceptedProtocol {
    protocol_index: usize,
    offset: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedMessage {
    pub protocol_index: usize,
    pub local_message_id: u8,
}

/// Routes inbound wire message ids to the sub-protocol that owns them.
///
/// Built once, at session establishment, from the local protocol registry
/// and the remote's negotiated capabilities; immutable for the life of the
/// connection.
pub struct Dispatcher {
    protocols: Vec<SubProtocol>,
    accepted: Vec<AcceptedProtocol>,
    table_len: usize,
}

impl Dispatcher {
    /// `local_protocols` must be supplied in the same declaration order the
    /// local node always uses; offsets are derived purely from that order
    /// and from which capabilities the remote announced, per §4.6.
    pub fn build(
        local_protocols: Vec<SubProtocol>,
        remote_capabilities: &[Capability],
    ) -> Result<Self, RLPxError> {
        let mut next_user_msg_id: usize = DEVP2P_RESERVED_MESSAGE_IDS;
        let mut accepted = Vec::new();

        for (index, protocol) in local_protocols.iter().enumerate() {
            let remote_supports = remote_capabilities
                .iter()
                .any(|c| *c == protocol.capability);
            if !remote_supports {
                continue;
            }

            let offset = next_user_msg_id;
            if offset + protocol.messages.len() > u8::MAX as usize + 1 {
                return Err(RLPxError::BreachOfProtocol(
                    "negotiated sub-protocols exceed the wire message-id space".into(),
                ));
            }
            accepted.push(AcceptedProtocol {
                protocol_index: index,
                offset: offset as u8,
            });
            next_user_msg_id += protocol.messages.len();
        }

        if accepted.is_empty() && !local_protocols.is_empty() {
            return Err(RLPxError::UselessPeer);
        }

        Ok(Self {
            protocols: local_protocols,
            accepted,
            table_len: next_user_msg_id,
        })
    }

    /// Wire message id that a local sub-protocol message should be sent
    /// under: `subprotocolOffset + localId`.
    pub fn per_peer_msg_id(&self, protocol_name: &str, local_id: u8) -> Result<u8, RLPxError> {
        let accepted = self
            .accepted
            .iter()
            .find(|a| self.protocols[a.protocol_index].capability.name == protocol_name)
            .ok_or_else(|| RLPxError::NotFound(protocol_name.to_string()))?;
        Ok(accepted.offset + local_id)
    }

    /// Resolves an inbound wire message id to the protocol and local id
    /// that should handle it. Ids below 16 belong to the base protocol and
    /// are rejected here; callers handle `hello`/`disconnect`/`ping`/`pong`
    /// before consulting the dispatcher.
    pub fn resolve(&self, msg_id: u8) -> Result<ResolvedMessage, RLPxError> {
        let msg_id = msg_id as usize;
        if msg_id < DEVP2P_RESERVED_MESSAGE_IDS {
            return Err(RLPxError::BreachOfProtocol(format!(
                "message id {msg_id} is reserved for the base protocol"
            )));
        }
        if msg_id >= self.table_len {
            return Err(RLPxError::BreachOfProtocol(format!(
                "message id {msg_id} is out of range of the negotiated sub-protocols"
            )));
        }

        for accepted in &self.accepted {
            let protocol = &self.protocols[accepted.protocol_index];
            let start = accepted.offset as usize;
            let end = start + protocol.messages.len();
            if (start..end).contains(&msg_id) {
                return Ok(ResolvedMessage {
                    protocol_index: accepted.protocol_index,
                    local_message_id: (msg_id - start) as u8,
                });
            }
        }

        Err(RLPxError::BreachOfProtocol(format!(
            "message id {msg_id} falls in a gap between negotiated sub-protocols"
        )))
    }

    pub fn accepted_capabilities(&self) -> Vec<Capability> {
        self.accepted
            .iter()
            .map(|a| self.protocols[a.protocol_index].capability.clone())
            .collect()
    }

    pub fn protocol_name(&self, protocol_index: usize) -> &str {
        &self.protocols[protocol_index].capability.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth_protocol() -> SubProtocol {
        SubProtocol::new(
            "eth",
            68,
            vec![
                MessageDescriptor::new("StatusMessage"),
                MessageDescriptor::new("NewBlockHashes"),
                MessageDescriptor::new("Transactions"),
            ],
        )
    }

    fn snap_protocol() -> SubProtocol {
        SubProtocol::new(
            "snap",
            1,
            vec![
                MessageDescriptor::new("GetAccountRange"),
                MessageDescriptor::new("AccountRange"),
            ],
        )
    }

    #[test]
    fn assigns_contiguous_offsets_starting_at_16() {
        let dispatcher = Dispatcher::build(
            vec![eth_protocol(), snap_protocol()],
            &[Capability::new("eth", 68), Capability::new("snap", 1)],
        )
        .unwrap();

        assert_eq!(dispatcher.per_peer_msg_id("eth", 0).unwrap(), 16);
        assert_eq!(dispatcher.per_peer_msg_id("eth", 2).unwrap(), 18);
        assert_eq!(dispatcher.per_peer_msg_id("snap", 0).unwrap(), 19);
        assert_eq!(dispatcher.per_peer_msg_id("snap", 1).unwrap(), 20);
    }

    #[test]
    fn skips_unsupported_protocols_without_reserving_ids() {
        let dispatcher =
            Dispatcher::build(vec![eth_protocol(), snap_protocol()], &[Capability::new("eth", 68)])
                .unwrap();

        assert_eq!(dispatcher.per_peer_msg_id("eth", 0).unwrap(), 16);
        assert!(dispatcher.per_peer_msg_id("snap", 0).is_err());
    }

    #[test]
    fn resolves_wire_ids_back_to_protocol_and_local_id() {
        let dispatcher = Dispatcher::build(
            vec![eth_protocol(), snap_protocol()],
            &[Capability::new("eth", 68), Capability::new("snap", 1)],
        )
        .unwrap();

        let resolved = dispatcher.resolve(18).unwrap();
        assert_eq!(resolved.protocol_index, 0);
        assert_eq!(resolved.local_message_id, 2);

        let resolved = dispatcher.resolve(19).unwrap();
        assert_eq!(resolved.protocol_index, 1);
        assert_eq!(resolved.local_message_id, 0);
    }

    #[test]
    fn rejects_reserved_and_out_of_range_ids() {
        let dispatcher = Dispatcher::build(vec![eth_protocol()], &[Capability::new("eth", 68)]).unwrap();

        assert!(matches!(
            dispatcher.resolve(5),
            Err(RLPxError::BreachOfProtocol(_))
        ));
        assert!(matches!(
            dispatcher.resolve(200),
            Err(RLPxError::BreachOfProtocol(_))
        ));
    }

    #[test]
    fn no_shared_capability_is_a_useless_peer() {
        let err = Dispatcher::build(vec![eth_protocol()], &[Capability::new("les", 4)]).unwrap_err();
        assert!(matches!(err, RLPxError::UselessPeer));
    }
}
