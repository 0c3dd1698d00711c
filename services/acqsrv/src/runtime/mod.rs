//! Driver runtime
//!
//! One independent session task per device; parallelism across devices is
//! the normal operating mode, operations within a session are sequential.

pub mod manager;
pub mod reconnect;
pub mod session;

pub use manager::SessionManager;
pub use reconnect::{ReconnectHelper, ReconnectPolicy};
pub use session::{SessionState, SessionStatus};
