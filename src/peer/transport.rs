//! Transport capability
//!
//! The coordinator never talks to a peer connection directly. It drives a
//! [`Transport`] built by a [`TransportFactory`] and consumes everything the
//! transport reports asynchronously as [`TransportEvent`]s on one ordered
//! queue. The WebRTC implementation lives in `connection`, the in-memory one
//! in `mock`.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::peer::state::Role;
use crate::peer::types::Description;

/// Errors from the transport capability
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("invalid description: {0}")]
    InvalidDescription(String),
    #[error("transport failed: {0}")]
    Failed(String),
    #[error("channel closed")]
    ChannelClosed,
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvalidDescription(e) => SessionError::Validation(e),
            TransportError::Unavailable(e) | TransportError::Failed(e) => {
                SessionError::Negotiation(e)
            }
            TransportError::ChannelClosed => SessionError::Channel("channel closed".into()),
        }
    }
}

/// Candidate gathering progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringState {
    New,
    Gathering,
    Complete,
}

/// Overall connection progress reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Notification from the transport. Never a request: the transport does not
/// wait for the session to handle it.
pub enum TransportEvent {
    /// The remote side opened a channel (responder only)
    InboundChannel(Arc<dyn DataChannel>),
    GatheringStateChanged(GatheringState),
    ConnectionStateChanged(ConnectionState),
    ChannelOpen,
    ChannelClosed,
    ChannelError(String),
    ChannelMessage(Bytes),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::InboundChannel(dc) => {
                f.debug_tuple("InboundChannel").field(&dc.label()).finish()
            }
            TransportEvent::GatheringStateChanged(s) => {
                f.debug_tuple("GatheringStateChanged").field(s).finish()
            }
            TransportEvent::ConnectionStateChanged(s) => {
                f.debug_tuple("ConnectionStateChanged").field(s).finish()
            }
            TransportEvent::ChannelOpen => f.write_str("ChannelOpen"),
            TransportEvent::ChannelClosed => f.write_str("ChannelClosed"),
            TransportEvent::ChannelError(e) => f.debug_tuple("ChannelError").field(e).finish(),
            TransportEvent::ChannelMessage(data) => f
                .debug_tuple("ChannelMessage")
                .field(&data.len())
                .finish(),
        }
    }
}

/// Bidirectional message channel of an established connection
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    /// Send one text frame
    async fn send_text(&self, text: String) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    async fn close(&self);
}

/// One peer connection
#[async_trait]
pub trait Transport: Send + Sync {
    async fn create_local_offer(&self) -> Result<Description, TransportError>;

    async fn create_local_answer(&self) -> Result<Description, TransportError>;

    async fn set_local_description(&self, desc: Description) -> Result<(), TransportError>;

    async fn set_remote_description(&self, desc: Description) -> Result<(), TransportError>;

    /// Current local description including the candidates gathered so far
    async fn local_description(&self) -> Option<Description>;

    /// Open a channel towards the peer (initiator)
    async fn create_outbound_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, TransportError>;

    /// Report the peer's channel as `TransportEvent::InboundChannel` when it arrives
    fn listen_for_inbound_channel(&self);

    fn gathering_state(&self) -> GatheringState;

    async fn close(&self);
}

/// Builds transports wired to a session's event queue
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        role: Role,
        events: EventSender,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}
