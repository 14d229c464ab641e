//! In-memory transport for tests and simulation
//!
//! A [`MockNetwork`] plays the part of the internet: transports register on
//! it and find each other through the endpoint id embedded in the
//! descriptions they produce. Applying an answer on the initiator links the
//! two sides, opens the channel pair and reports the same notifications a
//! browser would.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crate::logger::log;
use crate::peer::state::Role;
use crate::peer::transport::{
    ConnectionState, DataChannel, EventSender, GatheringState, Transport, TransportError,
    TransportEvent, TransportFactory,
};
use crate::peer::types::Description;
use crate::utils::random_id;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Channel
// ============================================================================

/// One end of an in-memory channel pair
pub struct MockDataChannel {
    label: String,
    open: AtomicBool,
    events: Mutex<Option<EventSender>>,
    peer: Mutex<Weak<MockDataChannel>>,
}

impl MockDataChannel {
    fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            open: AtomicBool::new(false),
            events: Mutex::new(None),
            peer: Mutex::new(Weak::new()),
        })
    }

    /// Two linked ends, both still closed
    pub fn pair(label: &str) -> (Arc<Self>, Arc<Self>) {
        let a = Self::new(label);
        let b = Self::new(label);
        Self::link(&a, &b);
        (a, b)
    }

    fn link(a: &Arc<Self>, b: &Arc<Self>) {
        *lock(&a.peer) = Arc::downgrade(b);
        *lock(&b.peer) = Arc::downgrade(a);
    }

    /// Route this end's notifications into a session queue
    pub fn bind(&self, events: EventSender) {
        *lock(&self.events) = Some(events);
    }

    fn notify(&self, event: TransportEvent) {
        if let Some(events) = lock(&self.events).as_ref() {
            let _ = events.send(event);
        }
    }

    /// Mark this end open and report it
    pub fn open(&self) {
        if !self.open.swap(true, Ordering::AcqRel) {
            self.notify(TransportEvent::ChannelOpen);
        }
    }

    fn shut(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.notify(TransportEvent::ChannelClosed);
        }
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::ChannelClosed);
        }
        let peer = lock(&self.peer)
            .upgrade()
            .ok_or(TransportError::ChannelClosed)?;
        peer.notify(TransportEvent::ChannelMessage(Bytes::from(text)));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn close(&self) {
        // closing either end closes both, like a data channel does
        self.shut();
        let peer = lock(&self.peer).upgrade();
        if let Some(peer) = peer {
            peer.shut();
        }
    }
}

// ============================================================================
// Network
// ============================================================================

/// Registry of live mock transports
#[derive(Default)]
pub struct MockNetwork {
    endpoints: Mutex<HashMap<String, Weak<MockTransport>>>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, transport: &Arc<MockTransport>) {
        lock(&self.endpoints).insert(transport.id.clone(), Arc::downgrade(transport));
    }

    fn unregister(&self, id: &str) {
        lock(&self.endpoints).remove(id);
    }

    fn find(&self, id: &str) -> Option<Arc<MockTransport>> {
        lock(&self.endpoints).get(id).and_then(Weak::upgrade)
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Builds [`MockTransport`]s on a shared [`MockNetwork`]
pub struct MockTransportFactory {
    network: Arc<MockNetwork>,
    /// None: gathering never completes
    gathering_delay: Option<Duration>,
    fail_create: bool,
    /// every transport built, kept alive so tests can inspect them after release
    created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockTransportFactory {
    pub fn new(network: Arc<MockNetwork>) -> Self {
        Self {
            network,
            gathering_delay: Some(Duration::from_millis(5)),
            fail_create: false,
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn with_gathering_delay(mut self, delay: Option<Duration>) -> Self {
        self.gathering_delay = delay;
        self
    }

    /// Every `create` fails as if there were no network stack
    pub fn failing(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn created_count(&self) -> usize {
        lock(&self.created).len()
    }

    pub fn last_created(&self) -> Option<Arc<MockTransport>> {
        lock(&self.created).last().cloned()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(
        &self,
        role: Role,
        events: EventSender,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        if self.fail_create {
            return Err(TransportError::Unavailable("no network stack".into()));
        }
        let transport = Arc::new_cyclic(|me| MockTransport {
            id: random_id(),
            role,
            me: me.clone(),
            events,
            network: Arc::downgrade(&self.network),
            local: Mutex::new(None),
            remote_peer: Mutex::new(None),
            outbound: Mutex::new(None),
            listening: AtomicBool::new(false),
            gathering: Mutex::new(GatheringState::New),
            gathering_delay: self.gathering_delay,
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        });
        self.network.register(&transport);
        lock(&self.created).push(transport.clone());
        log(&format!("Mock transport {} created as {:?}", transport.id, role));
        Ok(transport as Arc<dyn Transport>)
    }
}

// ============================================================================
// Transport
// ============================================================================

pub struct MockTransport {
    id: String,
    role: Role,
    me: Weak<MockTransport>,
    events: EventSender,
    network: Weak<MockNetwork>,
    local: Mutex<Option<(String, Description)>>,
    /// endpoint id found in the applied remote description
    remote_peer: Mutex<Option<String>>,
    outbound: Mutex<Option<Arc<MockDataChannel>>>,
    listening: AtomicBool,
    gathering: Mutex<GatheringState>,
    gathering_delay: Option<Duration>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl MockTransport {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Push an arbitrary notification into the owning session's queue
    pub fn inject(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::Acquire)
    }

    fn description(&self, kind: &str) -> Description {
        let sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=ice-ufrag:{}\r\n",
            self.id,
            &random_id()[..8]
        );
        Description(json!({ "type": kind, "sdp": sdp }))
    }

    fn set_gathering(&self, state: GatheringState) {
        *lock(&self.gathering) = state;
        self.inject(TransportEvent::GatheringStateChanged(state));
    }

    fn start_gathering(&self) {
        self.set_gathering(GatheringState::Gathering);
        let Some(delay) = self.gathering_delay else {
            return;
        };
        let me = self.me.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(me) = me.upgrade() {
                if !me.is_closed() {
                    me.set_gathering(GatheringState::Complete);
                }
            }
        });
    }

    /// Link with `responder`, whose answer was just applied
    fn connect_to(&self, responder: &Arc<MockTransport>) -> Result<(), TransportError> {
        let ours = lock(&self.outbound)
            .clone()
            .ok_or_else(|| TransportError::Failed("no outbound channel to connect".into()))?;
        let theirs = MockDataChannel::new(ours.label());
        MockDataChannel::link(&ours, &theirs);
        theirs.bind(responder.events.clone());

        if responder.listening.load(Ordering::Acquire) {
            responder.inject(TransportEvent::InboundChannel(theirs.clone()));
        }
        responder.inject(TransportEvent::ConnectionStateChanged(ConnectionState::Connected));
        self.inject(TransportEvent::ConnectionStateChanged(ConnectionState::Connected));

        if responder.listening.load(Ordering::Acquire) {
            theirs.open();
        }
        ours.open();
        Ok(())
    }
}

/// Pull the endpoint id out of the `o=` line
fn endpoint_of(desc: &Description) -> Result<(String, String), TransportError> {
    let kind = desc.0["type"]
        .as_str()
        .ok_or_else(|| TransportError::InvalidDescription("missing type".into()))?;
    let sdp = desc.0["sdp"]
        .as_str()
        .filter(|sdp| sdp.starts_with("v=0"))
        .ok_or_else(|| TransportError::InvalidDescription("missing or invalid sdp".into()))?;
    let id = sdp
        .lines()
        .find_map(|line| line.strip_prefix("o=- "))
        .and_then(|rest| rest.split_whitespace().next())
        .ok_or_else(|| TransportError::InvalidDescription("missing origin line".into()))?;
    Ok((kind.to_string(), id.to_string()))
}

#[async_trait]
impl Transport for MockTransport {
    async fn create_local_offer(&self) -> Result<Description, TransportError> {
        Ok(self.description("offer"))
    }

    async fn create_local_answer(&self) -> Result<Description, TransportError> {
        if lock(&self.remote_peer).is_none() {
            return Err(TransportError::Failed("no remote offer applied".into()));
        }
        Ok(self.description("answer"))
    }

    async fn set_local_description(&self, desc: Description) -> Result<(), TransportError> {
        let (kind, _) = endpoint_of(&desc)?;
        *lock(&self.local) = Some((kind, desc));
        self.start_gathering();
        Ok(())
    }

    async fn set_remote_description(&self, desc: Description) -> Result<(), TransportError> {
        let (kind, peer_id) = endpoint_of(&desc)?;
        let expected = match self.role {
            Role::Initiator => "answer",
            Role::Responder => "offer",
        };
        if kind != expected {
            return Err(TransportError::InvalidDescription(format!(
                "expected {expected}, got {kind}"
            )));
        }
        *lock(&self.remote_peer) = Some(peer_id.clone());

        if self.role == Role::Initiator {
            let network = self
                .network
                .upgrade()
                .ok_or_else(|| TransportError::Unavailable("network is gone".into()))?;
            match network.find(&peer_id) {
                Some(responder) => {
                    let answered = lock(&responder.remote_peer).clone();
                    if answered.as_deref() != Some(self.id.as_str()) {
                        return Err(TransportError::InvalidDescription(
                            "answer was not produced for this offer".into(),
                        ));
                    }
                    self.connect_to(&responder)?;
                }
                // the peer is unreachable; the connection just never comes up
                None => log(&format!("Mock peer {} not found", peer_id)),
            }
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<Description> {
        let (kind, desc) = lock(&self.local).clone()?;
        if *lock(&self.gathering) != GatheringState::Complete {
            return Some(desc);
        }
        let sdp = desc.0["sdp"].as_str().unwrap_or_default();
        let sdp = format!("{sdp}a=candidate:1 1 udp 2122260223 127.0.0.1 50000 typ host\r\n");
        Some(Description(json!({ "type": kind, "sdp": sdp })))
    }

    async fn create_outbound_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, TransportError> {
        let dc = MockDataChannel::new(label);
        dc.bind(self.events.clone());
        *lock(&self.outbound) = Some(dc.clone());
        Ok(dc as Arc<dyn DataChannel>)
    }

    fn listen_for_inbound_channel(&self) {
        self.listening.store(true, Ordering::Release);
    }

    fn gathering_state(&self) -> GatheringState {
        *lock(&self.gathering)
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::AcqRel);
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(network) = self.network.upgrade() {
            network.unregister(&self.id);
        }
    }
}
