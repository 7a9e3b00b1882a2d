pub mod connection;
pub mod handlers;
pub mod registry;

pub use connection::{ConnectionHandler, ConnectionState};
pub use handlers::{reject_unknown_path, ws_handler, WsParams};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, DeliveryReport};
