use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("failed to read events file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse events file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("event key {0} is not a number")]
    InvalidKey(String),
    #[error("invalid delay {0}, expected a non-negative number of seconds")]
    InvalidDelay(f64),
    #[error("Invalid resource_type: {0}")]
    InvalidResourceType(String),
    #[error("Invalid resource_status: {0}")]
    InvalidResourceStatus(String),
}

/// Health states a resource can be reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Online,
    Offline,
    Failed,
    Degraded,
    Repairing,
    Repaired,
    Rebalancing,
    Unknown,
    Standby,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Online => "online",
            HealthStatus::Offline => "offline",
            HealthStatus::Failed => "failed",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Repairing => "repairing",
            HealthStatus::Repaired => "repaired",
            HealthStatus::Rebalancing => "rebalancing",
            HealthStatus::Unknown => "unknown",
            HealthStatus::Standby => "standby",
        }
    }
}

impl FromStr for HealthStatus {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(HealthStatus::Online),
            "offline" => Ok(HealthStatus::Offline),
            "failed" => Ok(HealthStatus::Failed),
            "degraded" => Ok(HealthStatus::Degraded),
            "repairing" => Ok(HealthStatus::Repairing),
            "repaired" => Ok(HealthStatus::Repaired),
            "rebalancing" => Ok(HealthStatus::Rebalancing),
            "unknown" => Ok(HealthStatus::Unknown),
            "standby" => Ok(HealthStatus::Standby),
            _ => Err(EventError::InvalidResourceStatus(s.to_string())),
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the events file, as written by the operator.
#[derive(Debug, Clone, Deserialize)]
pub struct EventSpec {
    pub source: String,
    pub node_id: String,
    pub resource_type: String,
    pub resource_id: String,
    // Kept as text so an unknown status is reported by name, not as a parse failure
    pub resource_status: String,
    #[serde(default)]
    pub specific_info: Value,
}

/// Input of a publishing run:
///
/// ```json
/// {"events": {"1": {"source": "monitor", "node_id": "...", ...}}, "delay": 5}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct EventsFile {
    pub events: HashMap<String, EventSpec>,
    #[serde(default)]
    pub delay: Option<f64>,
}

impl EventsFile {
    pub fn load(path: &Path) -> Result<Self, EventError> {
        let contents = fs::read_to_string(path).map_err(|source| EventError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| EventError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Events sorted by their numeric key.
    pub fn ordered(&self) -> Result<Vec<(u64, &EventSpec)>, EventError> {
        let mut events = self
            .events
            .iter()
            .map(|(key, spec)| {
                key.trim()
                    .parse::<u64>()
                    .map(|position| (position, spec))
                    .map_err(|_| EventError::InvalidKey(key.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        events.sort_by_key(|(position, _)| *position);
        Ok(events)
    }

    /// Pause between two published events, if any.
    pub fn delay(&self) -> Result<Option<Duration>, EventError> {
        // Rejects negative, non-finite and out of range values
        self.delay
            .map(|seconds| {
                Duration::try_from_secs_f64(seconds).map_err(|_| EventError::InvalidDelay(seconds))
            })
            .transpose()
    }
}

/// Where in the cluster a health event originates, read from the HA config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub cluster_id: String,
    pub site_id: String,
    pub rack_id: String,
    pub storageset_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthEvent {
    pub event_id: Uuid,
    pub timestamp: i64,
    pub source: String,
    pub cluster_id: String,
    pub site_id: String,
    pub rack_id: String,
    pub storageset_id: String,
    pub node_id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub resource_status: HealthStatus,
    pub specific_info: Value,
}

impl HealthEvent {
    /// Validates `spec` against the known resource types and health statuses
    /// and stamps it with a fresh id and the current time.
    pub fn build(
        spec: &EventSpec,
        location: &Location,
        resource_types: &[String],
    ) -> Result<Self, EventError> {
        if !resource_types.contains(&spec.resource_type) {
            return Err(EventError::InvalidResourceType(spec.resource_type.clone()));
        }
        let resource_status = spec.resource_status.parse()?;

        Ok(Self {
            event_id: Uuid::now_v7(),
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
            source: spec.source.clone(),
            cluster_id: location.cluster_id.clone(),
            site_id: location.site_id.clone(),
            rack_id: location.rack_id.clone(),
            storageset_id: location.storageset_id.clone(),
            node_id: spec.node_id.clone(),
            resource_type: spec.resource_type.clone(),
            resource_id: spec.resource_id.clone(),
            resource_status,
            specific_info: spec.specific_info.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn spec(resource_type: &str, resource_status: &str) -> EventSpec {
        EventSpec {
            source: "monitor".to_string(),
            node_id: "srvnode-1".to_string(),
            resource_type: resource_type.to_string(),
            resource_id: "disk-7".to_string(),
            resource_status: resource_status.to_string(),
            specific_info: json!({"generation_id": "1"}),
        }
    }

    fn location() -> Location {
        Location {
            cluster_id: "c1".to_string(),
            site_id: "1".to_string(),
            rack_id: "1".to_string(),
            storageset_id: "1".to_string(),
        }
    }

    fn resource_types() -> Vec<String> {
        vec!["node".to_string(), "disk".to_string()]
    }

    #[test]
    fn events_are_ordered_numerically() {
        let file: EventsFile = serde_json::from_value(json!({
            "events": {
                "10": {"source": "m", "node_id": "n", "resource_type": "disk", "resource_id": "d10", "resource_status": "online"},
                "2": {"source": "m", "node_id": "n", "resource_type": "disk", "resource_id": "d2", "resource_status": "online"},
                "1": {"source": "m", "node_id": "n", "resource_type": "disk", "resource_id": "d1", "resource_status": "online"},
            }
        }))
        .unwrap();

        let ids: Vec<&str> = file
            .ordered()
            .unwrap()
            .into_iter()
            .map(|(_, spec)| spec.resource_id.as_str())
            .collect();
        assert_eq!(ids, vec!["d1", "d2", "d10"]);
        assert_eq!(file.delay().unwrap(), None);
    }

    #[test]
    fn bad_keys_and_delays_are_rejected() {
        let file: EventsFile = serde_json::from_value(json!({
            "events": {
                "first": {"source": "m", "node_id": "n", "resource_type": "disk", "resource_id": "d", "resource_status": "online"},
            },
            "delay": -1
        }))
        .unwrap();

        assert!(matches!(file.ordered(), Err(EventError::InvalidKey(key)) if key == "first"));
        assert!(matches!(file.delay(), Err(EventError::InvalidDelay(_))));

        let mut file = file;
        for seconds in [1e20, f64::INFINITY, f64::NAN] {
            file.delay = Some(seconds);
            assert!(
                matches!(file.delay(), Err(EventError::InvalidDelay(_))),
                "{} should be rejected",
                seconds
            );
        }

        file.delay = Some(0.5);
        assert_eq!(file.delay().unwrap(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn building_validates_type_and_status() {
        let event = HealthEvent::build(&spec("disk", "failed"), &location(), &resource_types()).unwrap();
        assert_eq!(event.resource_status, HealthStatus::Failed);
        assert_eq!(event.cluster_id, "c1");
        assert_eq!(event.event_id.get_version_num(), 7);

        assert!(matches!(
            HealthEvent::build(&spec("fan", "failed"), &location(), &resource_types()),
            Err(EventError::InvalidResourceType(resource_type)) if resource_type == "fan"
        ));
        assert!(matches!(
            HealthEvent::build(&spec("disk", "on fire"), &location(), &resource_types()),
            Err(EventError::InvalidResourceStatus(status)) if status == "on fire"
        ));
    }

    #[test]
    fn statuses_round_trip_through_their_names() {
        for status in [
            HealthStatus::Online,
            HealthStatus::Offline,
            HealthStatus::Failed,
            HealthStatus::Degraded,
            HealthStatus::Repairing,
            HealthStatus::Repaired,
            HealthStatus::Rebalancing,
            HealthStatus::Unknown,
            HealthStatus::Standby,
        ] {
            assert_eq!(status.as_str().parse::<HealthStatus>().unwrap(), status);
            assert_eq!(serde_json::to_value(status).unwrap(), json!(status.as_str()));
        }
    }
}
