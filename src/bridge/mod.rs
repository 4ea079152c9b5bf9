//! Bridge core: client registry, broker fan-out and per-connection sessions
//!
//! - [`registry`] - Connected clients and their subscription sets
//! - [`router`] - Delivers broker messages to matching clients
//! - [`session`] - Handles the requests of one WebSocket connection

pub mod registry;
pub mod router;
pub mod session;

pub use registry::{ClientHandle, ClientId, ClientRegistry, TopicGuard};
pub use router::MessageRouter;
pub use session::{Session, SessionState};
