//! Zone alerts - transition events enriched for notification delivery

use crate::domain::types::{
    Point, RiskLevel, SampleSource, TransitionEvent, TravelMode, Zone, ZoneId,
};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Direction of a zone crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Entered,
    Exited,
}

impl AlertKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Entered => "entered",
            AlertKind::Exited => "exited",
        }
    }

    /// Verb used in the user-facing message
    fn verb(&self) -> &'static str {
        match self {
            AlertKind::Entered => "Entered",
            AlertKind::Exited => "Exited",
        }
    }
}

/// A transition ready for the notification dispatcher
#[derive(Debug, Clone, Serialize)]
pub struct ZoneAlert {
    /// UUIDv7 alert ID
    pub aid: String,
    /// Epoch ms at which the transition was committed
    pub ts: u64,
    pub t: AlertKind,
    pub zone: ZoneId,
    /// Zone classification; None when the zone is unknown to every snapshot seen
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Risk for the configured travel mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
    pub mode: TravelMode,
    pub src: SampleSource,
    pub lat: f64,
    pub lon: f64,
}

impl ZoneAlert {
    /// Build an alert from a tracker event.
    ///
    /// `zone` is the zone record the event refers to, if it is still known.
    pub fn from_transition(
        event: &TransitionEvent,
        zone: Option<&Zone>,
        mode: TravelMode,
        source: SampleSource,
        at: Point,
    ) -> Self {
        let t = match event {
            TransitionEvent::Entered(_) => AlertKind::Entered,
            TransitionEvent::Exited(_) => AlertKind::Exited,
        };
        Self {
            aid: new_uuid_v7(),
            ts: epoch_ms(),
            t,
            zone: event.zone_id().clone(),
            kind: zone.map(|z| z.kind.clone()),
            risk: zone.and_then(|z| z.risk_for(mode)),
            mode,
            src: source,
            lat: at.lat,
            lon: at.lon,
        }
    }

    /// User-facing message body, e.g. "Entered school zone"
    pub fn message(&self) -> String {
        match &self.kind {
            Some(kind) if !kind.is_empty() => format!("{} {} zone", self.t.verb(), kind),
            _ => format!("{} zone {}", self.t.verb(), self.zone),
        }
    }

    /// Serialize to a single JSON line
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Alert wrapped with its user-facing text, as handed to every sink
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub site: String,
    pub title: String,
    pub body: String,
    /// RFC 3339 wall-clock time the notification was built
    pub sent_at: String,
    #[serde(flatten)]
    pub alert: ZoneAlert,
}

impl Notification {
    pub fn new(alert: ZoneAlert, title: &str, site: &str) -> Self {
        Self {
            site: site.to_string(),
            title: title.to_string(),
            body: alert.message(),
            sent_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            alert,
        }
    }

    /// Serialize to a single JSON line
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
