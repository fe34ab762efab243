//! mountctl: equatorial mount and RoboFocus controller
//!
//! This library drives a telescope mount over its ATCL serial protocol and a
//! RoboFocus focuser over its checksummed frame protocol, and bridges the
//! mount to Stellarium over TCP. A heartbeat polls both devices while the
//! bridges and the console issue commands through per-device locks.

pub mod console;
pub mod coords;
pub mod core;
pub mod network;
pub mod protocol;
pub mod serial;
pub mod session;
pub mod sink;

// Re-export commonly used items
pub use crate::console::{Console, ConsoleCommand};
pub use crate::core::{Config, Error, Result};
pub use crate::network::{CalibrationBridge, StellariumBridge};
pub use crate::session::{Heartbeat, Observatory};
pub use crate::sink::TracingSink;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
