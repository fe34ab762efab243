use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Observatory;
use crate::core::{Error, HeartbeatConfig};
use crate::protocol::{FocuserFields, MountFields};

/// Periodic poller for both devices
pub struct Heartbeat {
    observatory: Observatory,
    config: HeartbeatConfig,
}

impl Heartbeat {
    /// Creates a new heartbeat over the shared devices
    pub fn new(observatory: Observatory, config: HeartbeatConfig) -> Self {
        Heartbeat { observatory, config }
    }

    /// Polls on the configured intervals until shutdown
    pub async fn run(self, shutdown: CancellationToken) {
        let mut mount_interval = interval(self.config.mount_interval);
        mount_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut focuser_interval = interval(self.config.focuser_interval);
        focuser_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = mount_interval.tick() => self.mount_beat().await,
                _ = focuser_interval.tick() => self.focuser_beat().await,
            }
        }

        debug!("heartbeat stopped");
    }

    /// One mount sweep, published to the display and the planetarium
    pub async fn mount_beat(&self) {
        let reopen = self.config.reopen_links;
        let result = self
            .observatory
            .mount
            .with(move |mount| {
                if reopen && !mount.link().is_open() {
                    if let Err(e) = mount.link().open() {
                        debug!(error = %e, "mount reopen failed");
                    }
                }
                mount.poll()
            })
            .await;

        let fields = match result {
            Ok(fields) => fields,
            Err(e) => {
                log_beat_error("mount", &e);
                MountFields::default()
            }
        };

        for (field, value) in fields.iter() {
            self.observatory.publisher.publish(field.label(), value);
        }

        match fields.position() {
            Some(position) => self.observatory.telemetry.publish(position),
            None => self.observatory.telemetry.clear(),
        }
    }

    /// One focuser read, published to the display
    pub async fn focuser_beat(&self) {
        let reopen = self.config.reopen_links;
        let result = self
            .observatory
            .focuser
            .with(move |focuser| {
                if reopen && !focuser.link().is_open() {
                    if let Err(e) = focuser.link().open() {
                        debug!(error = %e, "focuser reopen failed");
                    }
                }
                focuser.poll()
            })
            .await;

        let fields = match result {
            Ok(fields) => fields,
            Err(e) => {
                log_beat_error("focuser", &e);
                FocuserFields::default()
            }
        };

        for (field, value) in fields.iter() {
            self.observatory.publisher.publish(field.label(), value);
        }
    }
}

fn log_beat_error(device: &str, e: &Error) {
    match e {
        // closed links are expected between reopen attempts
        Error::LinkUnavailable(_) => debug!(device, error = %e, "poll skipped"),
        _ => warn!(device, error = %e, "poll failed"),
    }
}
