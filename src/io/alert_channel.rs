//! Typed channel for zone alerts
//!
//! Provides a non-blocking way to hand alerts to the notification dispatcher.
//! Uses a bounded mpsc channel to prevent unbounded memory growth.

use crate::domain::alert::ZoneAlert;
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

/// Sender half used by the detection task
#[derive(Clone)]
pub struct AlertSender {
    tx: mpsc::Sender<ZoneAlert>,
    metrics: Arc<Metrics>,
}

impl AlertSender {
    pub fn new(tx: mpsc::Sender<ZoneAlert>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }

    /// Queue an alert without blocking
    ///
    /// Returns false if the alert was dropped (queue full or dispatcher gone).
    pub fn send(&self, alert: ZoneAlert) -> bool {
        // Use try_send to avoid blocking - drop if channel full
        match self.tx.try_send(alert) {
            Ok(()) => true,
            Err(TrySendError::Full(alert)) => {
                self.metrics.record_alert_dropped();
                warn!(aid = %alert.aid, zone_id = %alert.zone, "alert_dropped_queue_full");
                false
            }
            Err(TrySendError::Closed(alert)) => {
                self.metrics.record_alert_dropped();
                warn!(aid = %alert.aid, zone_id = %alert.zone, "alert_dropped_dispatcher_closed");
                false
            }
        }
    }
}

/// Create an alert channel
///
/// Returns the sender (for the detection task) and the receiver (for the dispatcher)
pub fn create_alert_channel(
    buffer_size: usize,
    metrics: Arc<Metrics>,
) -> (AlertSender, mpsc::Receiver<ZoneAlert>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (AlertSender::new(tx, metrics), rx)
}
