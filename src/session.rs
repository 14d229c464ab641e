//! Session coordinator
//!
//! One [`Session`] drives one negotiation, as initiator or responder, and
//! then the chat over the resulting channel. Everything the transport
//! reports arrives on a single ordered queue that only the session reads:
//! during the candidate-gathering wait and in [`Session::next_event`].

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::logger::log;
use crate::peer::connection::RtcTransportFactory;
use crate::peer::data_channel::{decode_inbound, Inbound, MessageChannel};
use crate::peer::ice::{GatheringOutcome, GatheringWait};
use crate::peer::state::{Phase, Role};
use crate::peer::transport::{
    ConnectionState, EventReceiver, GatheringState, Transport, TransportEvent, TransportFactory,
};
use crate::peer::types::{
    ChatEntry, ChatMessage, Description, Direction, NegotiationPayload, PayloadKind,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

/// What the presentation layer gets told about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected { remote_name: String },
    Message(ChatMessage),
    /// Connectivity dropped; the transport may still recover on its own
    ConnectionProblem,
    /// The peer closed the channel
    Disconnected,
    Failed(SessionError),
}

pub struct Session {
    config: SessionConfig,
    factory: Arc<dyn TransportFactory>,
    role: Option<Role>,
    local_name: String,
    remote_name: Option<String>,
    phase: Phase,
    answer_applied: bool,
    transport: Option<Arc<dyn Transport>>,
    channel: Option<MessageChannel>,
    events: Option<EventReceiver>,
    outbox: VecDeque<SessionEvent>,
    transcript: Vec<ChatEntry>,
    last_error: Option<SessionError>,
}

enum GatheringStep {
    Resolved(GatheringOutcome),
    Event(Option<TransportEvent>),
}

async fn recv_event(events: &mut Option<EventReceiver>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn require_name(display_name: &str) -> Result<String> {
    let name = display_name.trim();
    if name.is_empty() {
        return Err(SessionError::Validation("display name is required".into()));
    }
    Ok(name.to_string())
}

fn require_complete(payload: &NegotiationPayload) -> Result<()> {
    if payload.display_name.trim().is_empty() || payload.description.is_empty() {
        return Err(SessionError::Validation(format!(
            "{} payload is incomplete",
            payload.kind
        )));
    }
    Ok(())
}

impl Session {
    pub fn new(factory: Arc<dyn TransportFactory>, config: SessionConfig) -> Self {
        Self {
            config,
            factory,
            role: None,
            local_name: String::new(),
            remote_name: None,
            phase: Phase::Idle,
            answer_applied: false,
            transport: None,
            channel: None,
            events: None,
            outbox: VecDeque::new(),
            transcript: Vec::new(),
            last_error: None,
        }
    }

    /// Session backed by real WebRTC peer connections
    pub fn with_webrtc(config: SessionConfig) -> Self {
        let factory = Arc::new(RtcTransportFactory::new(config.clone()));
        Self::new(factory, config)
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn remote_name(&self) -> Option<&str> {
        self.remote_name.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
            && self.channel.as_ref().is_some_and(MessageChannel::is_open)
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn transcript(&self) -> &[ChatEntry] {
        &self.transcript
    }

    pub fn clear_transcript(&mut self) {
        self.transcript.clear();
    }

    /// One-line status for the UI
    pub fn status_text(&self) -> String {
        match self.phase {
            Phase::Idle => "Enter your name to create or scan an offer".into(),
            Phase::NegotiationStarted => match self.role {
                Some(Role::Responder) => "Processing offer and creating answer...".into(),
                _ => "Creating offer...".into(),
            },
            Phase::LocalDescriptionReady => "Gathering network candidates...".into(),
            Phase::AwaitingAnswer if self.answer_applied => "Connecting...".into(),
            Phase::AwaitingAnswer => "Show this QR code to your peer, then scan their answer".into(),
            Phase::AnswerReady => "Show this QR code to your peer".into(),
            Phase::Connected => format!(
                "Connected to {}",
                self.remote_name.as_deref().unwrap_or("peer")
            ),
            Phase::Closed => "Disconnected".into(),
            Phase::Failed => match &self.last_error {
                Some(err) => format!("Connection failed: {err}"),
                None => "Connection failed".into(),
            },
        }
    }

    // ========== NEGOTIATION ==========

    /// Initiator: build the offer to show as QR code or link
    pub async fn create_offer(&mut self, display_name: &str) -> Result<NegotiationPayload> {
        let name = require_name(display_name)?;
        self.expect_idle("create an offer")?;

        log(&format!("create_offer called for {}", name));
        self.local_name = name;
        self.role = Some(Role::Initiator);
        self.set_phase(Phase::NegotiationStarted);

        let result = self.negotiate_offer().await;
        self.settle(result).await
    }

    async fn negotiate_offer(&mut self) -> Result<NegotiationPayload> {
        let transport = self.start_transport(Role::Initiator).await?;

        let dc = transport
            .create_outbound_channel(&self.config.channel_label)
            .await?;
        self.channel = Some(MessageChannel::new(dc, &self.local_name));

        let offer = transport.create_local_offer().await?;
        transport.set_local_description(offer).await?;
        self.set_phase(Phase::LocalDescriptionReady);

        let description = self.gathered_description().await?;
        self.set_phase(Phase::AwaitingAnswer);
        Ok(NegotiationPayload::new(
            PayloadKind::Offer,
            &self.local_name,
            description,
        ))
    }

    /// Responder: apply a scanned offer and build the answer to show back
    pub async fn accept_offer_produce_answer(
        &mut self,
        payload: &NegotiationPayload,
        display_name: &str,
    ) -> Result<NegotiationPayload> {
        if payload.kind != PayloadKind::Offer {
            return Err(SessionError::Validation(format!(
                "wrong payload kind: expected offer, got {}",
                payload.kind
            )));
        }
        let name = require_name(display_name)?;
        self.expect_idle("accept an offer")?;
        require_complete(payload)?;

        log(&format!(
            "accept_offer_produce_answer called, offer from {}",
            payload.display_name
        ));
        self.local_name = name;
        self.role = Some(Role::Responder);
        self.remote_name = Some(payload.display_name.clone());
        self.set_phase(Phase::NegotiationStarted);

        let result = self.negotiate_answer(payload.description.clone()).await;
        self.settle(result).await
    }

    async fn negotiate_answer(&mut self, remote: Description) -> Result<NegotiationPayload> {
        let transport = self.start_transport(Role::Responder).await?;

        // the initiator owns the channel; we only react to its arrival
        transport.listen_for_inbound_channel();

        transport.set_remote_description(remote).await?;
        let answer = transport.create_local_answer().await?;
        transport.set_local_description(answer).await?;
        self.set_phase(Phase::LocalDescriptionReady);

        let description = self.gathered_description().await?;
        self.set_phase(Phase::AnswerReady);
        Ok(NegotiationPayload::new(
            PayloadKind::Answer,
            &self.local_name,
            description,
        ))
    }

    /// Initiator: apply the scanned answer. `Connected` follows once the
    /// channel reports open, see [`Session::next_event`].
    pub async fn accept_answer(&mut self, payload: &NegotiationPayload) -> Result<()> {
        if self.phase != Phase::AwaitingAnswer {
            return Err(SessionError::Validation(format!(
                "cannot accept an answer while {}",
                self.phase
            )));
        }
        if self.answer_applied {
            return Err(SessionError::Validation("an answer was already accepted".into()));
        }
        if payload.kind != PayloadKind::Answer {
            return Err(SessionError::Validation(format!(
                "wrong payload kind: expected answer, got {}",
                payload.kind
            )));
        }
        require_complete(payload)?;

        log(&format!("accept_answer called, answer from {}", payload.display_name));
        let result = match self.transport.clone() {
            Some(transport) => transport
                .set_remote_description(payload.description.clone())
                .await
                .map_err(SessionError::from),
            None => Err(SessionError::Negotiation("no transport to apply the answer to".into())),
        };
        self.settle(result).await?;

        self.answer_applied = true;
        self.remote_name = Some(payload.display_name.clone());
        Ok(())
    }

    async fn start_transport(&mut self, role: Role) -> Result<Arc<dyn Transport>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = self
            .factory
            .create(role, tx)
            .await
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;
        self.events = Some(rx);
        self.transport = Some(transport.clone());
        Ok(transport)
    }

    /// Local description after the bounded gathering wait
    async fn gathered_description(&mut self) -> Result<Description> {
        let outcome = self.wait_for_gathering().await;
        log(&format!("Candidate gathering finished: {:?}", outcome));

        if self.phase == Phase::Failed {
            return Err(self.last_error.clone().unwrap_or_else(|| {
                SessionError::Negotiation("connection failed during negotiation".into())
            }));
        }
        let transport = self.transport.clone().ok_or_else(|| {
            SessionError::Negotiation("transport released during negotiation".into())
        })?;
        transport
            .local_description()
            .await
            .ok_or_else(|| SessionError::Negotiation("transport has no local description".into()))
    }

    /// Race "gathering complete" against the configured timeout. Other
    /// notifications arriving meanwhile are handled in order.
    async fn wait_for_gathering(&mut self) -> GatheringOutcome {
        let (wait, mut done) = GatheringWait::new();
        let already_complete = self
            .transport
            .as_ref()
            .is_some_and(|t| t.gathering_state() == GatheringState::Complete);
        if already_complete {
            wait.resolve(GatheringOutcome::Complete);
        }
        wait.arm_timeout(self.config.gathering_timeout);

        loop {
            let step = tokio::select! {
                biased;
                outcome = &mut done => {
                    GatheringStep::Resolved(outcome.unwrap_or(GatheringOutcome::TimedOut))
                }
                event = recv_event(&mut self.events) => GatheringStep::Event(event),
            };

            match step {
                GatheringStep::Resolved(outcome) => return outcome,
                GatheringStep::Event(Some(event)) => {
                    if matches!(
                        event,
                        TransportEvent::GatheringStateChanged(GatheringState::Complete)
                    ) {
                        wait.resolve(GatheringOutcome::Complete);
                    }
                    self.handle_transport_event(event).await;
                    if self.phase.is_terminal() {
                        return GatheringOutcome::TimedOut;
                    }
                }
                // nothing more can arrive, stop waiting for it
                GatheringStep::Event(None) => {
                    wait.resolve(GatheringOutcome::TimedOut);
                }
            }
        }
    }

    // ========== CHAT ==========

    /// `false` without side effects unless the channel is open
    pub async fn send_message(&mut self, body: &str) -> bool {
        if self.phase != Phase::Connected {
            log("send_message called without an open channel");
            return false;
        }
        let Some(channel) = self.channel.as_ref() else {
            return false;
        };
        match channel.send(body).await {
            Ok(message) => {
                self.transcript.push(ChatEntry {
                    direction: Direction::Sent,
                    message,
                });
                true
            }
            Err(e) => {
                log(&format!("Send failed: {}", e));
                false
            }
        }
    }

    /// Next user-visible event, handling transport notifications on the way.
    /// `None` once the session is released and nothing is left to report.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if let Some(event) = self.outbox.pop_front() {
                return Some(event);
            }
            let event = self.events.as_mut()?.recv().await;
            match event {
                Some(event) => self.handle_transport_event(event).await,
                None => {
                    self.events = None;
                    return None;
                }
            }
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        log(&format!("Transport event {:?} in phase {}", event, self.phase));
        match event {
            TransportEvent::InboundChannel(dc) => {
                let expected = self.role == Some(Role::Responder)
                    && self.channel.is_none()
                    && !self.phase.is_terminal();
                if expected {
                    self.channel = Some(MessageChannel::new(dc, &self.local_name));
                } else {
                    log(&format!("Unexpected inbound channel '{}', closing it", dc.label()));
                    dc.close().await;
                }
            }

            TransportEvent::GatheringStateChanged(state) => {
                log(&format!("Gathering state: {:?}", state));
            }

            TransportEvent::ConnectionStateChanged(state) => match state {
                ConnectionState::Disconnected if self.phase == Phase::Connected => {
                    self.outbox.push_back(SessionEvent::ConnectionProblem);
                }
                ConnectionState::Failed if !self.phase.is_terminal() => {
                    self.fail_with_event(SessionError::Channel("connection failed".into()))
                        .await;
                }
                _ => {}
            },

            TransportEvent::ChannelOpen => {
                if self.phase.awaits_channel() && self.channel.is_some() {
                    self.set_phase(Phase::Connected);
                    let remote_name = self.remote_name.clone().unwrap_or_default();
                    self.outbox.push_back(SessionEvent::Connected { remote_name });
                } else {
                    log(&format!("Ignoring channel open in phase {}", self.phase));
                }
            }

            TransportEvent::ChannelClosed => match self.phase {
                Phase::Connected => {
                    self.set_phase(Phase::Closed);
                    self.release().await;
                    self.outbox.push_back(SessionEvent::Disconnected);
                }
                phase if !phase.is_terminal() => {
                    self.fail_with_event(SessionError::Channel(
                        "channel closed before the connection was established".into(),
                    ))
                    .await;
                }
                _ => {}
            },

            TransportEvent::ChannelError(e) => {
                if !self.phase.is_terminal() {
                    self.fail_with_event(SessionError::Channel(e)).await;
                }
            }

            TransportEvent::ChannelMessage(data) => {
                if self.phase != Phase::Connected {
                    log(&format!("Dropping message received in phase {}", self.phase));
                    return;
                }
                match decode_inbound(&data) {
                    Ok(Inbound::Chat(message)) => {
                        self.transcript.push(ChatEntry {
                            direction: Direction::Received,
                            message: message.clone(),
                        });
                        self.outbox.push_back(SessionEvent::Message(message));
                    }
                    Ok(Inbound::Ignored(kind)) => {
                        log(&format!("Ignoring channel frame of type '{}'", kind));
                    }
                    // non-fatal: the session stays connected
                    Err(e) => log(&format!("Dropped inbound data: {}", e)),
                }
            }
        }
    }

    // ========== TEARDOWN ==========

    /// Release the channel, then the transport. Safe to call repeatedly.
    pub async fn close(&mut self) {
        log("close called");
        self.release().await;
        self.events = None;
        if !self.phase.is_terminal() {
            self.set_phase(Phase::Closed);
        }
    }

    async fn release(&mut self) {
        if let Some(channel) = self.channel.take() {
            log(&format!("Closing channel '{}'", channel.label()));
            channel.close().await;
        }
        if let Some(transport) = self.transport.take() {
            log("Closing transport");
            transport.close().await;
        }
    }

    async fn fail(&mut self, err: SessionError) {
        log(&format!("Session failed: {}", err));
        self.last_error = Some(err);
        if !self.phase.is_terminal() {
            self.set_phase(Phase::Failed);
        }
        self.release().await;
    }

    async fn fail_with_event(&mut self, err: SessionError) {
        self.fail(err.clone()).await;
        self.outbox.push_back(SessionEvent::Failed(err));
    }

    /// A failed negotiation step leaves the session `Failed`, never halfway
    async fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if self.phase != Phase::Failed {
                self.fail(e.clone()).await;
            }
        }
        result
    }

    fn expect_idle(&self, action: &str) -> Result<()> {
        if self.phase != Phase::Idle {
            return Err(SessionError::Validation(format!(
                "cannot {} while {}",
                action, self.phase
            )));
        }
        Ok(())
    }

    fn set_phase(&mut self, next: Phase) {
        if self.phase == next {
            return;
        }
        if !self.phase.can_transition_to(next) {
            log(&format!(
                "Refusing phase change {} -> {}",
                self.phase, next
            ));
            return;
        }
        log(&format!("Phase {} -> {}", self.phase, next));
        self.phase = next;
    }
}
