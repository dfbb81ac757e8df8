//! WebSocket Gateway
//!
//! Real-time delivery: the connection registry, the fanout consumer, and the
//! per-connection protocol handler.

pub mod dispatcher;
pub mod frames;
pub mod handler;
pub mod registry;

pub use dispatcher::DeliveryDispatcher;
pub use frames::{ClientFrame, ServerFrame};
pub use handler::ws_handler;
pub use registry::{ConnectionHandle, ConnectionRegistry, Delivery};
