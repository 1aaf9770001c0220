//! Outbound half of a signaling connection

use async_trait::async_trait;
use huddle_proto::ServerMessage;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::types::ConnectionId;

/// Sink for text frames addressed to one client
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send_text(&self, frame: String) -> Result<()>;
}

/// A live signaling connection as seen by a room
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    outbound: Arc<dyn Outbound>,
}

impl Connection {
    pub fn new(outbound: Arc<dyn Outbound>) -> Self {
        Self::with_id(ConnectionId::generate(), outbound)
    }

    pub fn with_id(id: ConnectionId, outbound: Arc<dyn Outbound>) -> Self {
        Self { id, outbound }
    }

    #[must_use]
    pub const fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Encode and write one envelope.
    ///
    /// Writes are not serialized here; room members go through
    /// [`crate::Room::send`] which holds the room's send lock.
    pub async fn send(&self, message: &ServerMessage) -> Result<()> {
        let frame = message.encode()?;
        self.outbound.send_text(frame).await
    }

    pub(crate) async fn send_frame(&self, frame: String) -> Result<()> {
        self.outbound.send_text(frame).await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}
