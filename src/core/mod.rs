//! Core types shared by the mount, focuser and bridge components
//!
//! This module contains the error type, configuration and the small value
//! types passed between workers.

pub mod error;
pub mod types;
pub mod serde;

pub use self::error::{Error, Result};
pub use self::types::{
    AlignmentMode,
    AlignmentSide,
    Config,
    HeartbeatConfig,
    LinkConfig,
    ListenerConfig,
    Position,
};

/// Field value shown when a readout is unavailable
pub const UNAVAILABLE: &str = "N/A";

/// Default port for the Stellarium telescope server
pub const STELLARIUM_PORT: u16 = 10001;

/// Default port for the calibration server
pub const CALIBRATION_PORT: u16 = 10002;
