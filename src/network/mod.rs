pub mod api;
pub mod stomp;
pub mod transport;

pub use api::{ChatBackend, RestBackend};
pub use transport::{ConnectionState, StompTransport, Transport, TransportEvent};
