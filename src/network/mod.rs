//! TCP bridges between planetarium clients and the mount
//!
//! Both bridges bind through [`bind_listener`] and back off on bind failure
//! instead of giving up, so the rest of the process keeps running.

mod calibration;
mod stellarium;

pub use self::calibration::{parse_calibration, CalibrationBridge, CalibrationRequest};
pub use self::stellarium::StellariumBridge;

use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::{Error, ListenerConfig, Result};
use crate::sink::MessageSink;

/// Listen backlog; each bridge serves one client at a time
const BACKLOG: i32 = 1;

/// Binds a non-blocking listener with address reuse enabled
pub fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let bind = || -> std::io::Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(BACKLOG)?;
        TcpListener::from_std(socket.into())
    };

    bind().map_err(|e| Error::socket_bind(format!("{} ({})", addr, e)))
}

/// Binds, retrying after `retry_delay` until it succeeds or shutdown.
///
/// Returns `None` only when shutdown was requested.
pub(crate) async fn bind_until_ready(
    config: &ListenerConfig,
    sink: &Arc<dyn MessageSink>,
    shutdown: &CancellationToken,
) -> Option<TcpListener> {
    loop {
        match bind_listener(config.bind_addr) {
            Ok(listener) => {
                let port = listener
                    .local_addr()
                    .map(|addr| addr.port())
                    .unwrap_or_else(|_| config.bind_addr.port());
                info!(addr = %config.bind_addr, "listener bound");
                sink.message(&format!("Server waiting for connection on port {}.", port));
                return Some(listener);
            }
            Err(e) => {
                warn!(error = %e, retry_in = ?config.retry_delay, "bind failed");
                sink.message(&e.to_string());
            }
        }

        if !back_off(config, shutdown).await {
            return None;
        }
    }
}

/// Waits `retry_delay` before the next bind or accept attempt.
///
/// Returns `false` if shutdown arrived first.
pub(crate) async fn back_off(config: &ListenerConfig, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(config.retry_delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::recording::RecordingSink;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_socket_error() {
        let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = first.local_addr().unwrap();

        let err = bind_listener(addr).unwrap_err();
        assert!(matches!(err, Error::SocketBind(_)));
        assert!(err.to_string().starts_with("Socket error"));
    }

    #[tokio::test]
    async fn test_bind_retry_stops_on_shutdown() {
        let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ListenerConfig {
            bind_addr: first.local_addr().unwrap(),
            retry_delay: Duration::from_millis(20),
        };
        let recording = Arc::new(RecordingSink::default());
        let sink: Arc<dyn MessageSink> = recording.clone();
        let shutdown = CancellationToken::new();

        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(70)).await;
            canceller.cancel();
        });

        assert!(bind_until_ready(&config, &sink, &shutdown).await.is_none());
        assert!(recording.messages().len() >= 2);
        assert!(recording.has_message("Socket error"));
    }

    #[tokio::test]
    async fn test_back_off_waits_unless_cancelled() {
        let config = ListenerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            retry_delay: Duration::from_millis(40),
        };
        let shutdown = CancellationToken::new();

        let started = std::time::Instant::now();
        assert!(back_off(&config, &shutdown).await);
        assert!(started.elapsed() >= Duration::from_millis(40));

        shutdown.cancel();
        let started = std::time::Instant::now();
        assert!(!back_off(&config, &shutdown).await);
        assert!(started.elapsed() < Duration::from_millis(40));
    }
}
