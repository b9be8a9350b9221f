//! Notification dispatcher - delivers alerts off the detection path
//!
//! This worker decouples notification delivery from the detection task so that
//! file or network I/O never delays a cycle. The detection task enqueues alerts
//! via an mpsc channel after committing its state; the worker fans each one out
//! to every configured sink. A failed delivery is logged and counted, never retried.

use crate::domain::alert::{epoch_ms, Notification, ZoneAlert};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::alert_channel::{create_alert_channel, AlertSender};
use crate::io::egress::AlertEgress;
use crate::io::http_notify::HttpNotifier;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A destination for notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Always-on sink emitting a structured log line
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, n: &Notification) -> anyhow::Result<()> {
        info!(
            aid = %n.alert.aid,
            zone_id = %n.alert.zone,
            t = %n.alert.t.as_str(),
            risk = %n.alert.risk.map(|r| r.as_str()).unwrap_or("unknown"),
            src = %n.alert.src.as_str(),
            title = %n.title,
            body = %n.body,
            "zone_notification"
        );
        Ok(())
    }
}

/// Worker that delivers alerts to every sink
pub struct NotificationDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
    alert_rx: mpsc::Receiver<ZoneAlert>,
    title: String,
    site_id: String,
    metrics: Arc<Metrics>,
}

impl NotificationDispatcher {
    pub fn new(
        sinks: Vec<Box<dyn NotificationSink>>,
        alert_rx: mpsc::Receiver<ZoneAlert>,
        title: String,
        site_id: String,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { sinks, alert_rx, title, site_id, metrics }
    }

    /// Run the worker, delivering alerts until the channel closes
    pub async fn run(mut self) {
        let sink_names: Vec<&str> = self.sinks.iter().map(|s| s.name()).collect();
        info!(sinks = ?sink_names, "notification_dispatcher_started");

        while let Some(alert) = self.alert_rx.recv().await {
            // Time from transition commit to delivery start
            let queue_delay_ms = epoch_ms().saturating_sub(alert.ts);
            let notification = Notification::new(alert, &self.title, &self.site_id);
            self.dispatch(&notification).await;

            if queue_delay_ms > 1000 {
                warn!(
                    aid = %notification.alert.aid,
                    queue_delay_ms = %queue_delay_ms,
                    "notification_queue_delay_high"
                );
            }
        }

        info!("notification_dispatcher_stopped");
    }

    /// Deliver one notification to every sink
    pub async fn dispatch(&self, notification: &Notification) {
        for sink in &self.sinks {
            let start = Instant::now();
            match sink.deliver(notification).await {
                Ok(()) => {
                    self.metrics.record_notification(true);
                    debug!(
                        aid = %notification.alert.aid,
                        sink = %sink.name(),
                        latency_us = %start.elapsed().as_micros(),
                        "notification_delivered"
                    );
                }
                Err(e) => {
                    self.metrics.record_notification(false);
                    error!(
                        aid = %notification.alert.aid,
                        zone_id = %notification.alert.zone,
                        sink = %sink.name(),
                        error = %format!("{e:#}"),
                        "notification_failed"
                    );
                }
            }
        }
    }
}

/// Sinks selected by the configuration: log always, JSONL always, HTTP if a url is set
pub fn sinks_from_config(config: &Config) -> Vec<Box<dyn NotificationSink>> {
    let mut sinks: Vec<Box<dyn NotificationSink>> = vec![Box::new(LogSink)];
    sinks.push(Box::new(AlertEgress::new(config.egress_file())));

    if let Some(url) = config.notify_url() {
        match HttpNotifier::new(url, config.notify_timeout_ms()) {
            Ok(notifier) => sinks.push(Box::new(notifier)),
            Err(e) => error!(url = %url, error = %format!("{e:#}"), "http_notifier_init_failed"),
        }
    }

    sinks
}

/// Create the alert channel and the dispatcher worker
///
/// Returns the sender (for the detection task) and the worker (to be spawned)
pub fn create_dispatcher(
    config: &Config,
    metrics: Arc<Metrics>,
) -> (AlertSender, NotificationDispatcher) {
    let (alert_tx, alert_rx) = create_alert_channel(config.notify_queue_capacity(), metrics.clone());
    let dispatcher = NotificationDispatcher::new(
        sinks_from_config(config),
        alert_rx,
        config.notify_title().to_string(),
        config.site_id().to_string(),
        metrics,
    );
    (alert_tx, dispatcher)
}
