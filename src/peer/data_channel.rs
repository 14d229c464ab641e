use crate::error::{Result, SessionError};
use crate::logger::log;
use crate::peer::transport::{DataChannel, EventSender, TransportError, TransportEvent};
use crate::peer::types::{ChatMessage, WireMessage, CHAT_MESSAGE_TYPE};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use webrtc::data_channel::{data_channel_state::RTCDataChannelState, RTCDataChannel};

/// Chat view of a transport channel: turns chat lines into wire frames and back
pub struct MessageChannel {
    dc: Arc<dyn DataChannel>,
    local_name: String,
}

/// What an inbound frame turned out to be
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    Chat(ChatMessage),
    /// Well-formed frame of a type this client does not render
    Ignored(String),
}

impl MessageChannel {
    pub fn new(dc: Arc<dyn DataChannel>, local_name: &str) -> Self {
        Self {
            dc,
            local_name: local_name.to_string(),
        }
    }

    pub fn label(&self) -> &str {
        self.dc.label()
    }

    pub fn is_open(&self) -> bool {
        self.dc.is_open()
    }

    /// Serialize and transmit one chat line from the local user
    pub async fn send(&self, body: &str) -> Result<ChatMessage> {
        if !self.dc.is_open() {
            return Err(SessionError::Channel("channel is not open".into()));
        }
        let msg = ChatMessage {
            sender: self.local_name.clone(),
            body: body.to_string(),
            sent_at: crate::utils::now_millis(),
        };
        let text = serde_json::to_string(&WireMessage::from(&msg))
            .map_err(|e| SessionError::Channel(format!("cannot encode message: {e}")))?;
        self.dc.send_text(text).await?;
        Ok(msg)
    }

    pub async fn close(&self) {
        self.dc.close().await;
    }
}

/// Parse one inbound frame. Errors are for the caller to log and drop.
pub fn decode_inbound(data: &[u8]) -> Result<Inbound> {
    let wire: WireMessage = serde_json::from_slice(data)
        .map_err(|e| SessionError::Decode(format!("malformed channel message: {e}")))?;
    if wire.r#type != CHAT_MESSAGE_TYPE {
        return Ok(Inbound::Ignored(wire.r#type));
    }
    Ok(Inbound::Chat(wire.into()))
}

/// WebRTC data channel behind the [`DataChannel`] trait
pub struct RtcDataChannel {
    dc: Arc<RTCDataChannel>,
    label: String,
}

impl RtcDataChannel {
    pub fn new(dc: Arc<RTCDataChannel>) -> Self {
        let label = dc.label().to_string();
        Self { dc, label }
    }
}

#[async_trait]
impl DataChannel for RtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_text(&self, text: String) -> std::result::Result<(), TransportError> {
        self.dc
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Failed(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn close(&self) {
        if let Err(e) = self.dc.close().await {
            log(&format!("Closing data channel {} failed: {:?}", self.label, e));
        }
    }
}

/// Forward data-channel callbacks to the session's event queue
pub fn attach_dc(dc: &Arc<RTCDataChannel>, events: &EventSender) {
    log(&format!("attach_dc called for channel '{}'", dc.label()));

    dc.on_open(Box::new({
        let events = events.clone();
        move || {
            log("Data channel opened");
            let _ = events.send(TransportEvent::ChannelOpen);
            Box::pin(async {})
        }
    }));

    dc.on_message(Box::new({
        let events = events.clone();
        move |msg| {
            log(&format!("Received message, length: {}", msg.data.len()));
            let _ = events.send(TransportEvent::ChannelMessage(Bytes::from(msg.data.to_vec())));
            Box::pin(async {})
        }
    }));

    dc.on_close(Box::new({
        let events = events.clone();
        move || {
            log("Data channel closed");
            let _ = events.send(TransportEvent::ChannelClosed);
            Box::pin(async {})
        }
    }));

    dc.on_error(Box::new({
        let events = events.clone();
        move |err| {
            log(&format!("Data channel error: {:?}", err));
            let _ = events.send(TransportEvent::ChannelError(err.to_string()));
            Box::pin(async {})
        }
    }));
}
