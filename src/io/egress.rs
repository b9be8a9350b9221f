//! Notification egress - appends delivered notifications to file
//!
//! Notifications are written in JSONL format (one JSON object per line)
//! to the file specified in config.

use crate::domain::alert::Notification;
use crate::services::dispatcher::NotificationSink;
use anyhow::Context;
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Egress writer for notifications
pub struct AlertEgress {
    file_path: String,
}

impl AlertEgress {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "egress_initialized");
        Self { file_path: file_path.to_string() }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Append a line to the egress file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "egress_written");

        Ok(())
    }
}

#[async_trait]
impl NotificationSink for AlertEgress {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        self.append_line(&notification.to_json())
            .with_context(|| format!("Failed to append to {}", self.file_path))
    }
}
