pub mod codec;
pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod lz;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod state;
pub mod transport;
pub mod types;

pub use codec::{from_url, pack, to_url, unpack};
pub use connection::RtcTransportFactory;
pub use state::{Phase, Role};
pub use transport::{Transport, TransportFactory};
pub use types::{ChatEntry, ChatMessage, Description, Direction, NegotiationPayload, PayloadKind};
