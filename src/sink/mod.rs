//! Outbound collaborator interfaces
//!
//! The core reports status text through a [`MessageSink`] and field updates
//! through a [`FieldPublisher`]. A display can implement both; the default
//! [`TracingSink`] forwards them to `tracing`.

mod observation;

pub use self::observation::ObservationLog;

use tracing::{debug, info};

/// Receives status and diagnostic messages
pub trait MessageSink: Send + Sync {
    fn message(&self, text: &str);
}

/// Receives field readouts for display
pub trait FieldPublisher: Send + Sync {
    fn publish(&self, name: &str, value: &str);
}

/// Sink that writes everything to the tracing subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MessageSink for TracingSink {
    fn message(&self, text: &str) {
        info!(target: "mountctl::messages", "{}", text.replace('\n', " "));
    }
}

impl FieldPublisher for TracingSink {
    fn publish(&self, name: &str, value: &str) {
        debug!(target: "mountctl::fields", field = name, value, "field updated");
    }
}
