use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, Result};

/// Pier side used when aligning the mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlignmentSide {
    West,
    East,
}

impl AlignmentSide {
    /// Name of the side as the mount expects it in `ASas`
    pub fn as_str(&self) -> &'static str {
        match self {
            AlignmentSide::West => "West",
            AlignmentSide::East => "East",
        }
    }
}

impl fmt::Display for AlignmentSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlignmentSide {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "West" | "W" | "w" => Ok(AlignmentSide::West),
            "East" | "E" | "e" => Ok(AlignmentSide::East),
            other => Err(Error::command(format!("Not a valid alignment side: {}", other))),
        }
    }
}

/// What the bridges do with the next inbound coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlignmentMode {
    /// Sync the mount on the next coordinate
    #[default]
    Align,
    /// Slew to the next coordinate
    Goto,
}

impl AlignmentMode {
    /// Returns the other mode
    pub fn toggled(self) -> Self {
        match self {
            AlignmentMode::Align => AlignmentMode::Goto,
            AlignmentMode::Goto => AlignmentMode::Align,
        }
    }
}

impl fmt::Display for AlignmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignmentMode::Align => f.write_str("Align on next coordinates"),
            AlignmentMode::Goto => f.write_str("GoTo next coordinates"),
        }
    }
}

/// Current mount pointing as raw protocol angles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Right ascension, full turn over the u32 range
    pub ra_raw: u32,
    /// Declination, 0x40000000 = +90 degrees
    pub dec_raw: i32,
}

/// Serial device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Device path, e.g. /dev/ttyS0
    pub path: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout for a single read
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub timeout: Duration,
    /// Delay between writing a command and reading its reply
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub settle: Duration,
}

impl LinkConfig {
    /// Default settings for the mount controller port
    pub fn mount() -> Self {
        LinkConfig {
            path: "/dev/ttyS0".to_string(),
            baud_rate: 19200,
            timeout: Duration::from_millis(10),
            settle: Duration::from_millis(50),
        }
    }

    /// Default settings for the RoboFocus port
    pub fn focuser() -> Self {
        LinkConfig {
            path: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            timeout: Duration::from_millis(10),
            settle: Duration::from_millis(150),
        }
    }
}

/// TCP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Delay before retrying a failed bind
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub retry_delay: Duration,
}

impl ListenerConfig {
    /// Loopback listener on the given port
    pub fn loopback(port: u16) -> Self {
        ListenerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], port)),
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Heartbeat intervals
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval between mount sweeps
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub mount_interval: Duration,
    /// Interval between focuser polls
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub focuser_interval: Duration,
    /// Try to reopen closed links on each tick
    pub reopen_links: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig {
            mount_interval: Duration::from_secs(2),
            focuser_interval: Duration::from_secs(1),
            reopen_links: false,
        }
    }
}

/// Configuration for the controller process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mount serial link
    pub mount: LinkConfig,
    /// Focuser serial link
    pub focuser: LinkConfig,
    /// Stellarium telescope server
    pub stellarium: ListenerConfig,
    /// Calibration server
    pub calibration: ListenerConfig,
    /// Heartbeat intervals
    pub heartbeat: HeartbeatConfig,
    /// File receiving observation records
    pub observation_log: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mount: LinkConfig::mount(),
            focuser: LinkConfig::focuser(),
            stellarium: ListenerConfig::loopback(super::STELLARIUM_PORT),
            calibration: ListenerConfig::loopback(super::CALIBRATION_PORT),
            heartbeat: HeartbeatConfig::default(),
            observation_log: PathBuf::from("observations.log"),
        }
    }
}

impl Config {
    /// Loads a JSON configuration file; missing sections take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config: Config = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        for (name, link) in [("mount", &self.mount), ("focuser", &self.focuser)] {
            if link.baud_rate == 0 {
                return Err(Error::config(format!("{} baud rate must be non-zero", name)));
            }
            if link.settle > Duration::from_secs(5) {
                return Err(Error::config(format!("{} settle delay too large", name)));
            }
        }

        if self.heartbeat.mount_interval < Duration::from_millis(100)
            || self.heartbeat.focuser_interval < Duration::from_millis(100)
        {
            return Err(Error::config("Heartbeat interval too small"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_alignment_side_parsing() {
        assert_eq!("West".parse::<AlignmentSide>().unwrap(), AlignmentSide::West);
        assert_eq!("e".parse::<AlignmentSide>().unwrap(), AlignmentSide::East);
        assert_eq!("".parse::<AlignmentSide>().unwrap(), AlignmentSide::West);
        assert!("North".parse::<AlignmentSide>().is_err());
    }

    #[test]
    fn test_mode_toggle() {
        assert_eq!(AlignmentMode::default(), AlignmentMode::Align);
        assert_eq!(AlignmentMode::Align.toggled(), AlignmentMode::Goto);
        assert_eq!(AlignmentMode::Goto.toggled(), AlignmentMode::Align);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mount.baud_rate, 19200);
        assert_eq!(config.focuser.baud_rate, 9600);
        assert_eq!(config.stellarium.bind_addr.port(), 10001);
        assert_eq!(config.calibration.bind_addr.port(), 10002);
        assert!(config.stellarium.bind_addr.ip().is_loopback());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_config() {
        let config_json = r#"{
            "mount": {
                "path": "/dev/ttyAMA0",
                "baud_rate": 19200,
                "timeout": 10,
                "settle": 80
            },
            "heartbeat": { "mount_interval": 3000 }
        }"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_json.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.mount.path, "/dev/ttyAMA0");
        assert_eq!(config.mount.baud_rate, 19200);
        assert_eq!(config.mount.settle, Duration::from_millis(80));
        assert_eq!(config.heartbeat.mount_interval, Duration::from_secs(3));
        assert_eq!(config.heartbeat.focuser_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.heartbeat.mount_interval = Duration::from_millis(1);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.focuser.baud_rate = 0;
        assert!(config.validate().is_err());
    }
}
