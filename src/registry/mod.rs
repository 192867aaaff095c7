mod watch_registry;
pub use watch_registry::*;

#[cfg(test)]
mod watch_registry_test;

/// Identity of an observer session
pub type ObserverId = u64;

/// Small non-negative integer naming one watch, unique per observer
pub type WatchHandle = u32;
