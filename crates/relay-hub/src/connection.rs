//! One bidirectional channel per participant, grounded on
//! `handlers/v1/websocket.rs`'s `ConnectionState`/outbound-channel pattern,
//! generalized from an unbounded channel to the bounded queue spec §5
//! requires for back-pressure.

use relay_core::id::ParticipantId;
use relay_core::protocol::ServerMessage;
use tokio::sync::mpsc;

/// Connection liveness as tracked by the Hub (§4.3); `TemporarilyDisconnected`
/// participants keep their in-memory state and may reconnect within the
/// configured window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    TemporarilyDisconnected,
    Disconnected,
}

/// The write half of a participant's connection, held by the Hub/session so
/// broadcasts can enqueue frames without touching the socket directly. The
/// socket-reading task owns the `Receiver` and drains it onto the wire.
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    participant_id: ParticipantId,
    sender: mpsc::Sender<ServerMessage>,
}

impl OutboundHandle {
    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    /// Enqueues a frame for delivery. Returns `false` if the queue is full
    /// or the receiver is gone — the caller should mark this connection
    /// temporarily disconnected without blocking the rest of the fan-out
    /// (§5 back-pressure).
    pub fn try_send(&self, message: ServerMessage) -> bool {
        self.sender.try_send(message).is_ok()
    }
}

/// Creates a bounded outbound channel for one freshly connected participant.
pub fn new_outbound(
    participant_id: ParticipantId,
    capacity: usize,
) -> (OutboundHandle, mpsc::Receiver<ServerMessage>) {
    let (sender, receiver) = mpsc::channel(capacity);
    (
        OutboundHandle {
            participant_id,
            sender,
        },
        receiver,
    )
}
