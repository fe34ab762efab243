use std::borrow::Cow;
use std::str::FromStr;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{back_off, bind_until_ready};
use crate::coords;
use crate::core::{AlignmentMode, AlignmentSide, Error, ListenerConfig, Result};
use crate::session::Observatory;

/// Longest accepted calibration line
const MAX_LINE_LEN: usize = 2048;

/// One `direction;ra;dec` calibration line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationRequest {
    pub side: AlignmentSide,
    pub ra: String,
    pub dec: String,
}

impl FromStr for CalibrationRequest {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.trim().split(';').map(str::trim).collect();
        match parts.as_slice() {
            [side, ra, dec] if !ra.is_empty() && !dec.is_empty() => Ok(CalibrationRequest {
                side: side.parse()?,
                ra: ra.to_string(),
                dec: dec.to_string(),
            }),
            _ => Err(Error::command(format!(
                "Calibration needs direction;ra;dec, got {:?}",
                line.trim()
            ))),
        }
    }
}

/// Parses one calibration line, surrounding whitespace allowed
pub fn parse_calibration(line: &str) -> Result<CalibrationRequest> {
    line.parse()
}

/// Calibration server: accepts a single connection, serves it to the end,
/// then rebinds
pub struct CalibrationBridge {
    observatory: Observatory,
    config: ListenerConfig,
}

impl CalibrationBridge {
    /// Creates a new calibration bridge over the shared devices
    pub fn new(observatory: Observatory, config: ListenerConfig) -> Self {
        CalibrationBridge { observatory, config }
    }

    /// Serves one calibration connection per bind until shutdown
    pub async fn run(self, shutdown: CancellationToken) {
        while let Some(listener) =
            bind_until_ready(&self.config, &self.observatory.sink, &shutdown).await
        {
            self.serve_once(listener, &shutdown).await;
            if shutdown.is_cancelled() {
                break;
            }
        }
        debug!("calibration bridge stopped");
    }

    /// Accepts one client and serves it; the listener is closed before serving
    pub async fn serve_once(&self, listener: TcpListener, shutdown: &CancellationToken) {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        drop(listener);

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                self.observatory.sink.message(&format!("Socket error ({})", e));
                back_off(&self.config, shutdown).await;
                return;
            }
        };

        self.observatory
            .sink
            .message(&format!("Calibration connection established from {}.", peer));

        match self.serve(stream, shutdown).await {
            Ok(()) => self.observatory.sink.message("Calibration connection closed."),
            Err(e) => self.observatory.sink.message(&e.to_string()),
        }
    }

    /// Applies every newline-delimited calibration line until the client
    /// closes. A final line without a newline is applied at close.
    ///
    /// The first failing line ends the session.
    pub async fn serve<S>(&self, stream: S, shutdown: &CancellationToken) -> Result<()>
    where
        S: AsyncRead + Unpin,
    {
        let mut lines = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                line = lines.next() => line,
            };

            match line {
                None => return Ok(()),
                Some(line) => {
                    let line = line?;
                    if !line.trim().is_empty() {
                        self.calibrate(&line).await?;
                    }
                }
            }
        }
    }

    /// Aligns the mount on the given side and coordinate, then arms goto
    pub async fn calibrate(&self, line: &str) -> Result<()> {
        let request = parse_calibration(line)?;
        let dec = coords::normalize_dec_seconds(&request.dec);
        if matches!(dec, Cow::Owned(_)) {
            self.observatory.sink.message("Converted 60->59.");
        }
        let dec = dec.into_owned();
        let CalibrationRequest { side, ra, .. } = request;
        let mode = self.observatory.mode.clone();

        self.observatory
            .mount
            .with(move |mount| {
                mount.set_alignment_side(side)?;
                mode.set(AlignmentMode::Align);
                mount.set_target_ra(&ra)?;
                mount.set_target_dec(&dec)?;
                mount.align_from_target()?;
                mode.set(AlignmentMode::Goto);
                Ok(())
            })
            .await?;

        self.observatory.sink.message("Alignment complete.");
        Ok(())
    }
}
