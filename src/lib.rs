//! Serverless peer-to-peer chat. Two browsers or apps exchange one offer
//! and one answer out of band (QR code or link) and then talk over a
//! WebRTC data channel.

pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod utils;

pub use config::{ServerConfig, SessionConfig};
pub use error::{Result, SessionError};
pub use peer::{
    from_url, pack, to_url, unpack, ChatEntry, ChatMessage, Direction, NegotiationPayload,
    PayloadKind, Phase, Role, RtcTransportFactory,
};
pub use session::{Session, SessionEvent};
