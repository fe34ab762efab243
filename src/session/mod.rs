//! Shared device handles and state seen by every worker
//!
//! Each device sits behind its own async mutex. A worker takes the lock for
//! a whole logical operation through [`DeviceHandle::with`], which runs the
//! blocking serial work on the blocking pool and releases the lock when the
//! closure returns or fails.

mod heartbeat;

pub use self::heartbeat::Heartbeat;

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::info;

use crate::core::{AlignmentMode, AlignmentSide, Config, Error, Position, Result};
use crate::protocol::{FocuserProtocol, MountFields, MountProtocol};
use crate::serial::SerialLink;
use crate::sink::{FieldPublisher, MessageSink, ObservationLog};

/// Exclusive access to one serial device
pub struct DeviceHandle<P> {
    inner: Arc<Mutex<P>>,
}

impl<P> Clone for DeviceHandle<P> {
    fn clone(&self) -> Self {
        DeviceHandle {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Send + 'static> DeviceHandle<P> {
    /// Creates a new handle owning `protocol`
    pub fn new(protocol: P) -> Self {
        DeviceHandle {
            inner: Arc::new(Mutex::new(protocol)),
        }
    }

    /// Runs `f` with the device locked for its whole duration
    pub async fn with<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut P) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = self.inner.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || f(&mut *guard))
            .await
            .map_err(|e| Error::task(e.to_string()))?
    }
}

pub type MountHandle = DeviceHandle<MountProtocol>;
pub type FocuserHandle = DeviceHandle<FocuserProtocol>;

/// Observable align/goto mode
#[derive(Clone)]
pub struct AlignmentState {
    tx: Arc<watch::Sender<AlignmentMode>>,
}

impl Default for AlignmentState {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(AlignmentMode::default());
        AlignmentState { tx: Arc::new(tx) }
    }
}

impl AlignmentState {
    /// Returns the current mode
    pub fn get(&self) -> AlignmentMode {
        *self.tx.borrow()
    }

    /// Replaces the mode and notifies subscribers
    pub fn set(&self, mode: AlignmentMode) {
        if self.tx.send_replace(mode) != mode {
            info!(%mode, "alignment mode changed");
        }
    }

    /// Flips the mode and returns the new one
    pub fn toggle(&self) -> AlignmentMode {
        let mut toggled = AlignmentMode::default();
        self.tx.send_modify(|mode| {
            *mode = mode.toggled();
            toggled = *mode;
        });
        info!(mode = %toggled, "alignment mode toggled");
        toggled
    }

    /// Subscribes to mode changes
    pub fn subscribe(&self) -> watch::Receiver<AlignmentMode> {
        self.tx.subscribe()
    }
}

/// Latest decoded mount pointing, for the planetarium
#[derive(Clone)]
pub struct Telemetry {
    tx: Arc<watch::Sender<Option<Position>>>,
}

impl Default for Telemetry {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(None);
        Telemetry { tx: Arc::new(tx) }
    }
}

impl Telemetry {
    /// Publishes a fresh mount position
    pub fn publish(&self, position: Position) {
        self.tx.send_replace(Some(position));
    }

    /// Clears the position, notifying only if one was set
    pub fn clear(&self) {
        self.tx.send_if_modified(|current| current.take().is_some());
    }

    /// Returns the last published position
    pub fn latest(&self) -> Option<Position> {
        *self.tx.borrow()
    }

    /// Subscribes to position changes
    pub fn subscribe(&self) -> watch::Receiver<Option<Position>> {
        self.tx.subscribe()
    }
}

/// Everything the workers share
#[derive(Clone)]
pub struct Observatory {
    pub mount: MountHandle,
    pub focuser: FocuserHandle,
    pub mode: AlignmentState,
    pub telemetry: Telemetry,
    pub sink: Arc<dyn MessageSink>,
    pub publisher: Arc<dyn FieldPublisher>,
    pub observations: ObservationLog,
}

impl Observatory {
    /// Builds the shared state with both links closed
    pub fn new(
        config: &Config,
        sink: Arc<dyn MessageSink>,
        publisher: Arc<dyn FieldPublisher>,
    ) -> Self {
        let mount = MountProtocol::new(SerialLink::new("mount", config.mount.clone()), sink.clone());
        let focuser = FocuserProtocol::new(
            SerialLink::new("focuser", config.focuser.clone()),
            sink.clone(),
        );
        Self::from_parts(
            mount,
            focuser,
            sink,
            publisher,
            ObservationLog::new(config.observation_log.clone()),
        )
    }

    /// Creates a new context from already built protocols
    pub fn from_parts(
        mount: MountProtocol,
        focuser: FocuserProtocol,
        sink: Arc<dyn MessageSink>,
        publisher: Arc<dyn FieldPublisher>,
        observations: ObservationLog,
    ) -> Self {
        Observatory {
            mount: DeviceHandle::new(mount),
            focuser: DeviceHandle::new(focuser),
            mode: AlignmentState::default(),
            telemetry: Telemetry::default(),
            sink,
            publisher,
            observations,
        }
    }

    /// Opens (or reopens) the mount port
    pub async fn open_mount(&self) -> Result<()> {
        let result = self.mount.with(|mount| mount.link().open()).await;
        match &result {
            Ok(()) => self.sink.message("Successfully opened serial port for telescope."),
            Err(e) => self.sink.message(&format!("Opening serial port for telescope failed: {}", e)),
        }
        result
    }

    /// Opens (or reopens) the focuser port and reads its version
    pub async fn open_focuser(&self) -> Result<()> {
        let opened = self.focuser.with(|focuser| focuser.link().open()).await;
        if let Err(e) = opened {
            self.sink.message(&format!("Opening serial port for RoboFocus failed: {}", e));
            return Err(e);
        }

        self.sink.message("Successfully opened serial port for RoboFocus.");
        self.focuser.with(|focuser| focuser.get_version()).await?;
        Ok(())
    }

    /// Picks the pier side and arms alignment on the next coordinate
    pub async fn choose_alignment_side(&self, side: AlignmentSide) -> Result<()> {
        self.mount.with(move |mount| mount.set_alignment_side(side)).await?;
        self.mode.set(AlignmentMode::Align);
        Ok(())
    }

    /// Appends the current mount readout to the observation log
    pub async fn save_observation(&self) -> Result<()> {
        let fields: MountFields = self.mount.with(|mount| Ok(mount.fields().clone())).await?;
        self.observations.append(&fields)?;
        self.sink.message("Telescope readout saved.");
        Ok(())
    }

    /// Closes both links
    pub async fn shutdown(&self) {
        let _ = self
            .mount
            .with(|mount| {
                mount.link().close();
                Ok(())
            })
            .await;
        let _ = self
            .focuser
            .with(|focuser| {
                focuser.link().close();
                Ok(())
            })
            .await;
        info!("serial links closed");
    }
}
