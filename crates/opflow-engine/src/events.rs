// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain events published when operations finish or fail.
//!
//! Publishing is fire-and-forget from the orchestrators' point of view: a
//! publish failure is logged and never changes the outcome of the step
//! that emitted the event.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const CLUSTER_TOPIC: &str = "clustertopic";
pub const BACKUP_TOPIC: &str = "backuptopic";

/// Errors from event publishing.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Fields common to every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventHeader {
    pub namespace: String,
    pub username: String,
    pub topics: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl EventHeader {
    pub fn new(namespace: &str, username: &str, topics: &[&str]) -> Self {
        Self {
            namespace: namespace.to_string(),
            username: username.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            timestamp: Utc::now(),
        }
    }
}

/// Events emitted by the orchestrators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Event {
    BackupCompleted {
        header: EventHeader,
        cluster: String,
        backup_type: String,
        unit: String,
    },
    RestoreCompleted {
        header: EventHeader,
        cluster: String,
        workflow_id: Option<String>,
    },
    CloneFailure {
        header: EventHeader,
        source_cluster: String,
        target_cluster: String,
        workflow_id: String,
        error_message: String,
    },
    BenchmarkCompleted {
        header: EventHeader,
        cluster: String,
        workflow_id: Option<String>,
        succeeded: bool,
    },
    DeleteClusterCompleted {
        header: EventHeader,
        cluster: String,
    },
}

impl Event {
    pub fn header(&self) -> &EventHeader {
        match self {
            Self::BackupCompleted { header, .. }
            | Self::RestoreCompleted { header, .. }
            | Self::CloneFailure { header, .. }
            | Self::BenchmarkCompleted { header, .. }
            | Self::DeleteClusterCompleted { header, .. } => header,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::BackupCompleted { .. } => "backup_completed",
            Self::RestoreCompleted { .. } => "restore_completed",
            Self::CloneFailure { .. } => "clone_failure",
            Self::BenchmarkCompleted { .. } => "benchmark_completed",
            Self::DeleteClusterCompleted { .. } => "delete_cluster_completed",
        }
    }
}

/// Sink for domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &Event) -> Result<(), PublishError>;
}

/// Publish `event`, logging instead of failing.
pub async fn publish_or_log(publisher: &dyn EventPublisher, event: Event) {
    if let Err(e) = publisher.publish(&event).await {
        warn!(event_type = event.event_type(), error = %e, "Failed to publish event");
    }
}

/// Writes every event to the log as JSON.
#[derive(Debug, Default)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &Event) -> Result<(), PublishError> {
        let body = serde_json::to_string(event)?;
        info!(
            event_type = event.event_type(),
            namespace = %event.header().namespace,
            topics = ?event.header().topics,
            event = %body,
            "Event published"
        );
        Ok(())
    }
}

/// Keeps published events in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<Event>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Events of one type, oldest first.
    pub async fn events_of(&self, event_type: &str) -> Vec<Event> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &Event) -> Result<(), PublishError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = Event::CloneFailure {
            header: EventHeader::new("ns", "admin", &[CLUSTER_TOPIC]),
            source_cluster: "pg1".to_string(),
            target_cluster: "pg2".to_string(),
            workflow_id: "wf".to_string(),
            error_message: "could not create step 3".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "clone_failure");
        assert_eq!(json["header"]["topics"][0], CLUSTER_TOPIC);
        assert_eq!(json["target_cluster"], "pg2");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_recording_publisher_filters_by_type() {
        let publisher = RecordingPublisher::new();
        let header = EventHeader::new("ns", "admin", &[CLUSTER_TOPIC]);
        publish_or_log(
            &publisher,
            Event::DeleteClusterCompleted {
                header: header.clone(),
                cluster: "pg1".to_string(),
            },
        )
        .await;
        publish_or_log(
            &publisher,
            Event::RestoreCompleted {
                header,
                cluster: "pg1".to_string(),
                workflow_id: None,
            },
        )
        .await;

        assert_eq!(publisher.events().await.len(), 2);
        assert_eq!(publisher.events_of("restore_completed").await.len(), 1);
    }

    #[tokio::test]
    async fn test_log_publisher_accepts_events() {
        LogPublisher
            .publish(&Event::BenchmarkCompleted {
                header: EventHeader::new("ns", "admin", &[CLUSTER_TOPIC]),
                cluster: "pg1".to_string(),
                workflow_id: Some("wf".to_string()),
                succeeded: false,
            })
            .await
            .unwrap();
    }
}
