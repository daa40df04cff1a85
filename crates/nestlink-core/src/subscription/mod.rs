//! Subscription transport over GraphQL-over-WebSocket

pub mod manager;
pub mod protocol;
pub mod socket;


pub use manager::{ConnectionState, ReconnectPolicy, SubscriptionManager, SubscriptionStream};
pub use protocol::is_auth_rejection;
pub use socket::{SocketConnection, SocketConnector, SocketEvent, SocketSink, TungsteniteConnector};
