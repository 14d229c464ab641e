use crate::config::{ServerConfig, SessionConfig};
use crate::logger::{dump_candidate, log};
use crate::peer::data_channel::{attach_dc, RtcDataChannel};
use crate::peer::state::Role;
use crate::peer::transport::{
    ConnectionState, DataChannel, EventSender, GatheringState, Transport, TransportError,
    TransportEvent, TransportFactory,
};
use crate::peer::types::Description;
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::{
    api::APIBuilder,
    data_channel::{data_channel_init::RTCDataChannelInit, RTCDataChannel},
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// Builds WebRTC peer connections from a [`SessionConfig`]
pub struct RtcTransportFactory {
    config: SessionConfig,
}

impl RtcTransportFactory {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }
}

impl Default for RtcTransportFactory {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        role: Role,
        events: EventSender,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = new_peer(role, &self.config, events).await?;
        Ok(Arc::new(transport))
    }
}

/// WebRTC peer connection behind the [`Transport`] trait
pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
    events: EventSender,
}

/// Create a peer and wire its callbacks into `events`
pub async fn new_peer(
    role: Role,
    config: &SessionConfig,
    events: EventSender,
) -> Result<RtcTransport, TransportError> {
    log(&format!("new_peer called, role: {:?}", role));
    let api = APIBuilder::new().build();

    let pc = api
        .new_peer_connection(rtc_config(&config.ice_servers))
        .await
        .map(Arc::new)
        .map_err(|e| TransportError::Unavailable(e.to_string()))?;

    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        match cand {
            Some(c) => dump_candidate("LOCAL", &c),
            // None marks the end of gathering
            None => log("ICE candidate gathering completed (null candidate received)"),
        }
        Box::pin(async {})
    }));

    pc.on_ice_gathering_state_change(Box::new({
        let events = events.clone();
        move |state: RTCIceGathererState| {
            log(&format!("ICE gathering state changed to: {:?}", state));
            let mapped = match state {
                RTCIceGathererState::Gathering => Some(GatheringState::Gathering),
                RTCIceGathererState::Complete => Some(GatheringState::Complete),
                RTCIceGathererState::New => Some(GatheringState::New),
                _ => None,
            };
            if let Some(mapped) = mapped {
                let _ = events.send(TransportEvent::GatheringStateChanged(mapped));
            }
            Box::pin(async {})
        }
    }));

    pc.on_peer_connection_state_change(Box::new({
        let events = events.clone();
        move |st: RTCPeerConnectionState| {
            log(&format!("Peer connection state changed to: {:?}", st));
            let mapped = match st {
                RTCPeerConnectionState::New => Some(ConnectionState::New),
                RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
                RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
                RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
                RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
                RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
                _ => None,
            };
            if let Some(mapped) = mapped {
                let _ = events.send(TransportEvent::ConnectionStateChanged(mapped));
            }
            Box::pin(async {})
        }
    }));

    Ok(RtcTransport { pc, events })
}

/// Peer connection configuration
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// Convert configured servers into the webrtc representation
pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn to_description(sdp: &RTCSessionDescription) -> Result<Description, TransportError> {
    serde_json::to_value(sdp)
        .map(Description)
        .map_err(|e| TransportError::Failed(format!("cannot serialize description: {e}")))
}

fn from_description(desc: Description) -> Result<RTCSessionDescription, TransportError> {
    serde_json::from_value(desc.0)
        .map_err(|e| TransportError::InvalidDescription(e.to_string()))
}

#[async_trait]
impl Transport for RtcTransport {
    async fn create_local_offer(&self) -> Result<Description, TransportError> {
        log("Creating offer...");
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))?;
        to_description(&offer)
    }

    async fn create_local_answer(&self) -> Result<Description, TransportError> {
        log("Creating answer...");
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))?;
        to_description(&answer)
    }

    async fn set_local_description(&self, desc: Description) -> Result<(), TransportError> {
        log("Setting local description...");
        let sdp = from_description(desc)?;
        self.pc
            .set_local_description(sdp)
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))
    }

    async fn set_remote_description(&self, desc: Description) -> Result<(), TransportError> {
        log("Setting remote description...");
        let sdp = from_description(desc)?;
        // unparsable remote SDP is rejected here
        self.pc
            .set_remote_description(sdp)
            .await
            .map_err(|e| TransportError::InvalidDescription(e.to_string()))
    }

    async fn local_description(&self) -> Option<Description> {
        let sdp = self.pc.local_description().await?;
        match to_description(&sdp) {
            Ok(desc) => Some(desc),
            Err(e) => {
                log(&format!("Local description unavailable: {}", e));
                None
            }
        }
    }

    async fn create_outbound_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, TransportError> {
        let dc = self
            .pc
            .create_data_channel(label, Some(RTCDataChannelInit::default()))
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))?;
        attach_dc(&dc, &self.events);
        Ok(Arc::new(RtcDataChannel::new(dc)))
    }

    fn listen_for_inbound_channel(&self) {
        let events = self.events.clone();
        self.pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                log(&format!("Inbound data channel '{}'", dc.label()));
                // announce the channel before its open event can fire
                let _ = events.send(TransportEvent::InboundChannel(Arc::new(
                    RtcDataChannel::new(dc.clone()),
                )));
                attach_dc(&dc, &events);
                Box::pin(async {})
            }));
    }

    fn gathering_state(&self) -> GatheringState {
        match self.pc.ice_gathering_state() {
            RTCIceGatheringState::Complete => GatheringState::Complete,
            RTCIceGatheringState::Gathering => GatheringState::Gathering,
            _ => GatheringState::New,
        }
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            log(&format!("Closing peer connection failed: {:?}", e));
        }
    }
}
