pub mod multiplexer;
pub mod protocol;
pub mod throttle;
pub mod transport;

// Re-export the streaming surface (e.g. `use crate::stream::TickMultiplexer`).
pub use multiplexer::{Backoff, ConnectionState, Subscription, TickMultiplexer};
pub use throttle::Throttle;
pub use transport::{Connector, WsConnector};
