//! Block-granular change tracking for files.
//!
//! Writes to a watched file are recorded as dirty block ranges, separately
//! for every observer and at each observer's own block size. Observers
//! drain their ranges on demand over a control channel, so backup and
//! replication tools can copy only what changed since their last pass.
//!
//! Layers, bottom-up:
//! - [`BlockRangeSet`]: bounded, normalized set of dirty ranges
//! - [`FileTracker`]: all range sets attached to one file
//! - [`WatchRegistry`]: handles, observer sessions, tracker lifetime
//! - [`ControlProtocol`] / [`ControlServer`]: the request channel
//!
//! Unix only.

mod config;
mod errors;
mod interception;
mod protocol;
mod registry;
mod server;
mod tracking;
pub mod constants;

pub use config::*;
pub use errors::*;
pub use interception::*;
pub use protocol::*;
pub use registry::*;
pub use server::*;
pub use tracking::*;
