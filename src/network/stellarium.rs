use std::borrow::Cow;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{back_off, bind_until_ready};
use crate::coords;
use crate::core::{AlignmentMode, ListenerConfig, Result};
use crate::protocol::{GotoTelegram, PositionTelegram, TelegramCodec};
use crate::session::Observatory;

const RECV_BUFFER_SIZE: usize = 1024;

/// Stellarium telescope server: one client at a time, kept open until the
/// client leaves
pub struct StellariumBridge {
    observatory: Observatory,
    config: ListenerConfig,
}

impl StellariumBridge {
    /// Creates a new Stellarium bridge over the shared devices
    pub fn new(observatory: Observatory, config: ListenerConfig) -> Self {
        StellariumBridge { observatory, config }
    }

    /// Binds and serves clients until shutdown
    pub async fn run(self, shutdown: CancellationToken) {
        while let Some(listener) =
            bind_until_ready(&self.config, &self.observatory.sink, &shutdown).await
        {
            self.serve_listener(&listener, &shutdown).await;
            if shutdown.is_cancelled() {
                break;
            }
        }
        debug!("stellarium bridge stopped");
    }

    /// Accepts clients one after another. Returns on shutdown or when the
    /// listener itself fails.
    pub async fn serve_listener(&self, listener: &TcpListener, shutdown: &CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => return,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    self.observatory.sink.message(&format!("Socket error ({})", e));
                    back_off(&self.config, shutdown).await;
                    return;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "could not disable nagle");
            }
            self.observatory
                .sink
                .message(&format!("Connection established from {}.", peer));

            match self.serve(stream, shutdown).await {
                Ok(()) => self.observatory.sink.message("Stellarium disconnected."),
                Err(e) => self
                    .observatory
                    .sink
                    .message(&format!("Stellarium connection lost: {}", e)),
            }
        }
    }

    /// Runs one client session until it closes or shutdown
    pub async fn serve<S>(&self, stream: S, shutdown: &CancellationToken) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut telemetry = self.observatory.telemetry.subscribe();
        let mut telemetry_open = true;
        let mut codec = TelegramCodec::new();
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                read = reader.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(());
                    }

                    let mut chunk = BytesMut::from(&buf[..n]);
                    match codec.decode(&mut chunk) {
                        Ok(Some(telegram)) => {
                            if let Err(e) = self.handle_goto(telegram).await {
                                self.observatory.sink.message(&e.to_string());
                            }
                        }
                        Ok(None) => {}
                        Err(e) => self.observatory.sink.message(&format!("{}.", e)),
                    }
                }
                changed = telemetry.changed(), if telemetry_open => {
                    if changed.is_err() {
                        telemetry_open = false;
                    } else {
                        let latest = *telemetry.borrow_and_update();
                        if let Some(position) = latest {
                            let mut out = BytesMut::new();
                            codec.encode(PositionTelegram::now(position), &mut out)?;
                            // a slow or departing client must not stop the session
                            if let Err(e) = writer.write_all(&out).await {
                                debug!(error = %e, "position send failed");
                            }
                        }
                    }
                }
            }
        }
    }

    /// Aligns on or slews to the requested coordinate, depending on mode
    pub async fn handle_goto(&self, telegram: GotoTelegram) -> Result<AlignmentMode> {
        let ra = coords::raw_to_ra(telegram.ra_raw);
        let dec = coords::raw_to_dec(telegram.dec_raw);
        self.observatory
            .sink
            .message(&format!("Received from stellarium: {} {}", ra, dec));

        let dec = match coords::normalize_dec_seconds(&dec) {
            Cow::Owned(normalized) => {
                self.observatory.sink.message("Converted 60->59.");
                normalized
            }
            Cow::Borrowed(_) => dec.clone(),
        };
        let mode = self.observatory.mode.clone();

        let applied = self
            .observatory
            .mount
            .with(move |mount| {
                mount.set_target_ra(&ra)?;
                mount.set_target_dec(&dec)?;
                match mode.get() {
                    AlignmentMode::Align => {
                        mount.align_from_target()?;
                        mode.set(AlignmentMode::Goto);
                        Ok(AlignmentMode::Align)
                    }
                    AlignmentMode::Goto => {
                        mount.go_to_target()?;
                        Ok(AlignmentMode::Goto)
                    }
                }
            })
            .await?;

        info!(mode = ?applied, "stellarium request applied");
        Ok(applied)
    }
}
