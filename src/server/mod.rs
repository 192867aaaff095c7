//! Unix-socket transport for the control channel.
//!
//! Each accepted connection is one observer session; its watches are
//! released when the connection ends, whatever the reason.

mod control_client;
mod control_server;
pub use control_client::*;
pub use control_server::*;
