//! Event and command types for the broadcast hub
//!
//! `HubEvent` flows server to client, `HubCommand` client to server. Both are
//! closed enums serialized with a `type` tag so every consumer matches
//! exhaustively instead of dispatching on strings.

use crate::model::{Alert, ClassificationRecord, StatisticsSnapshot};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known group names
pub const GROUP_CLASSIFICATION: &str = "Classification";
pub const GROUP_DASHBOARD: &str = "Dashboard";
pub const GROUP_HEALTH: &str = "HealthMonitor";

/// Outbound hub events
///
/// Events are routed to groups by [`HubEvent::groups`]; events with no groups
/// are direct replies to the connection that triggered them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HubEvent {
    /// A classification was ingested and persisted
    ClassificationResult {
        record: ClassificationRecord,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An operator corrected a stored classification
    ClassificationOverridden {
        classification_id: i64,
        detection_id: String,
        previous_label: String,
        new_label: String,
        new_disposal_location: String,
        reason: String,
        user_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An item entered the chamber (notification only, nothing persisted)
    ItemDetected {
        detection_id: String,
        source: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An item left the chamber before classification completed
    ItemRemoved {
        detection_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Pipeline stage progress for an in-flight detection
    ProcessingStatus {
        detection_id: String,
        stage: String,
        detail: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Fresh statistics snapshot for dashboards
    StatsUpdate {
        snapshot: StatisticsSnapshot,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A new alert entered the ring
    AlertRaised {
        alert: Alert,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An alert was resolved
    AlertResolved {
        alert_id: Uuid,
        resolved_by: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Producer liveness ping
    Heartbeat {
        source: String,
        status: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Probe result for a single upstream producer
    HealthUpdate {
        service: String,
        healthy: bool,
        detail: Option<String>,
        latency_ms: Option<u64>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Hub-wide status, broadcast periodically and on request
    SystemStatus {
        healthy: bool,
        /// Names of upstreams currently failing their probes
        degraded: Vec<String>,
        connections: usize,
        groups: Vec<String>,
        uptime_seconds: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Log line relayed to the group named after its source
    LogLine {
        source: String,
        level: String,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Direct acknowledgement that a submitted classification was stored
    IngestAccepted {
        classification_id: i64,
        detection_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Direct rejection of a failed command
    CommandRejected {
        command: String,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl HubEvent {
    /// Get event type as string for filtering and logging
    pub fn event_type(&self) -> &str {
        match self {
            HubEvent::ClassificationResult { .. } => "ClassificationResult",
            HubEvent::ClassificationOverridden { .. } => "ClassificationOverridden",
            HubEvent::ItemDetected { .. } => "ItemDetected",
            HubEvent::ItemRemoved { .. } => "ItemRemoved",
            HubEvent::ProcessingStatus { .. } => "ProcessingStatus",
            HubEvent::StatsUpdate { .. } => "StatsUpdate",
            HubEvent::AlertRaised { .. } => "AlertRaised",
            HubEvent::AlertResolved { .. } => "AlertResolved",
            HubEvent::Heartbeat { .. } => "Heartbeat",
            HubEvent::HealthUpdate { .. } => "HealthUpdate",
            HubEvent::SystemStatus { .. } => "SystemStatus",
            HubEvent::LogLine { .. } => "LogLine",
            HubEvent::IngestAccepted { .. } => "IngestAccepted",
            HubEvent::CommandRejected { .. } => "CommandRejected",
        }
    }

    /// Groups this event is routed to
    ///
    /// An empty list means the event is a direct reply, never broadcast.
    pub fn groups(&self) -> Vec<String> {
        match self {
            HubEvent::ClassificationResult { .. } | HubEvent::ClassificationOverridden { .. } => {
                vec![GROUP_CLASSIFICATION.to_string(), GROUP_DASHBOARD.to_string()]
            }
            HubEvent::ItemDetected { .. }
            | HubEvent::ItemRemoved { .. }
            | HubEvent::ProcessingStatus { .. } => vec![GROUP_CLASSIFICATION.to_string()],
            HubEvent::StatsUpdate { .. }
            | HubEvent::AlertRaised { .. }
            | HubEvent::AlertResolved { .. }
            | HubEvent::SystemStatus { .. } => vec![GROUP_DASHBOARD.to_string()],
            HubEvent::Heartbeat { .. } => {
                vec![GROUP_HEALTH.to_string(), GROUP_DASHBOARD.to_string()]
            }
            HubEvent::HealthUpdate { .. } => vec![GROUP_HEALTH.to_string()],
            HubEvent::LogLine { source, .. } => vec![source.clone()],
            HubEvent::IngestAccepted { .. } | HubEvent::CommandRejected { .. } => Vec::new(),
        }
    }
}

/// Inbound hub commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HubCommand {
    JoinGroup {
        group: String,
    },
    LeaveGroup {
        group: String,
    },
    /// Ingest a classification and broadcast the stored result
    SendClassificationResult {
        payload: crate::payload::ClassificationPayload,
    },
    /// Correct a stored classification and broadcast the correction
    ApplyManualOverride {
        classification_id: i64,
        new_classification: String,
        new_disposal_location: Option<String>,
        reason: String,
        user_id: String,
    },
    /// Broadcast-only chamber notification, nothing persisted
    NotifyItemDetection {
        detection_id: String,
        source: Option<String>,
    },
    /// Broadcast-only removal notification, nothing persisted
    NotifyItemRemoved {
        detection_id: String,
    },
    /// Pipeline stage progress for an in-flight detection, broadcast only
    ReportProcessingStatus {
        detection_id: String,
        stage: String,
        detail: Option<String>,
    },
    SendHeartbeat {
        source: String,
        status: Option<String>,
    },
    /// Relay a log line to the group named after `source`
    PublishLog {
        source: String,
        level: String,
        message: String,
    },
    /// Ask for a SystemStatus reply on this connection
    RequestSystemStatus,
}

impl HubCommand {
    /// Get command name as string for logging and rejection frames
    pub fn name(&self) -> &'static str {
        match self {
            HubCommand::JoinGroup { .. } => "JoinGroup",
            HubCommand::LeaveGroup { .. } => "LeaveGroup",
            HubCommand::SendClassificationResult { .. } => "SendClassificationResult",
            HubCommand::ApplyManualOverride { .. } => "ApplyManualOverride",
            HubCommand::NotifyItemDetection { .. } => "NotifyItemDetection",
            HubCommand::NotifyItemRemoved { .. } => "NotifyItemRemoved",
            HubCommand::ReportProcessingStatus { .. } => "ReportProcessingStatus",
            HubCommand::SendHeartbeat { .. } => "SendHeartbeat",
            HubCommand::PublishLog { .. } => "PublishLog",
            HubCommand::RequestSystemStatus => "RequestSystemStatus",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlertSeverity;
    use chrono::Utc;

    #[test]
    fn test_classification_events_route_to_both_streams() {
        let event = HubEvent::ClassificationOverridden {
            classification_id: 7,
            detection_id: "det-7".to_string(),
            previous_label: "plastic".to_string(),
            new_label: "metal".to_string(),
            new_disposal_location: "Metal recycling bin".to_string(),
            reason: "visual misread".to_string(),
            user_id: "operator-1".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.groups(), vec!["Classification", "Dashboard"]);
    }

    #[test]
    fn test_detection_events_route_to_classification_only() {
        let event = HubEvent::ItemDetected {
            detection_id: "det-1".to_string(),
            source: "camera".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.groups(), vec!["Classification"]);
    }

    #[test]
    fn test_heartbeat_routes_to_health_and_dashboard() {
        let event = HubEvent::Heartbeat {
            source: "cnn_service".to_string(),
            status: "alive".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.groups(), vec!["HealthMonitor", "Dashboard"]);
    }

    #[test]
    fn test_log_lines_route_to_their_source_group() {
        let event = HubEvent::LogLine {
            source: "arduino_service".to_string(),
            level: "info".to_string(),
            message: "lid opened".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.groups(), vec!["arduino_service"]);
    }

    #[test]
    fn test_direct_replies_have_no_groups() {
        let ack = HubEvent::IngestAccepted {
            classification_id: 1,
            detection_id: "det-1".to_string(),
            timestamp: Utc::now(),
        };
        assert!(ack.groups().is_empty());

        let rejection = HubEvent::CommandRejected {
            command: "ApplyManualOverride".to_string(),
            error: "reason is required".to_string(),
            timestamp: Utc::now(),
        };
        assert!(rejection.groups().is_empty());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = HubEvent::AlertRaised {
            alert: Alert::new(AlertSeverity::Warning, "ingest", "low confidence"),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"AlertRaised\""));
        assert!(json.contains("\"severity\":\"warning\""));

        let back: HubEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type(), "AlertRaised");
    }

    #[test]
    fn test_command_round_trip() {
        let json = r#"{"type": "JoinGroup", "group": "Dashboard"}"#;
        let command: HubCommand = serde_json::from_str(json).unwrap();
        match &command {
            HubCommand::JoinGroup { group } => assert_eq!(group, "Dashboard"),
            other => panic!("parsed wrong command: {}", other.name()),
        }
        assert_eq!(command.name(), "JoinGroup");

        let unit: HubCommand = serde_json::from_str(r#"{"type": "RequestSystemStatus"}"#).unwrap();
        assert_eq!(unit.name(), "RequestSystemStatus");
    }

    #[test]
    fn test_unknown_command_type_fails_to_parse() {
        let result = serde_json::from_str::<HubCommand>(r#"{"type": "DropAllTables"}"#);
        assert!(result.is_err());
    }
}
