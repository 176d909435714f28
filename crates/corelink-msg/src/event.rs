//! ---
//! cl_section: "02-wire-protocol"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Message schema helpers and protocol codecs."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
//! Event topics pushed by the core and their payload shapes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter};

/// Every topic the core may publish.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumIter,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
#[allow(missing_docs)]
pub enum Topic {
    RuntimePathProgress,
    ChangeRuntimePathProgress,
    InstanceExportProgress,
    UpdateAvailable,
    UpdateNotAvailable,
    DownloadProgress,
    UpdateDownloaded,
    /// Topic this build does not know about. Never published to subscribers.
    #[serde(other)]
    Unknown,
}

/// How the hub treats successive events of one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Only the most recent payload is retained; unread values are replaced.
    LatestValue,
    /// Every notice reaches each live subscriber at least once.
    Edge,
}

impl Topic {
    /// Delivery class of the topic.
    pub fn delivery(self) -> Delivery {
        match self {
            Topic::UpdateAvailable | Topic::UpdateNotAvailable | Topic::UpdateDownloaded => {
                Delivery::Edge
            }
            _ => Delivery::LatestValue,
        }
    }
}

/// Typed payload bound to exactly one topic.
pub trait EventPayload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Topic carrying this payload.
    const TOPIC: Topic;
}

/// Clamp a floating percentage into `0..=100`.
pub fn clamp_percent(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

/// Percentage of `current` out of `total`. A zero total reports zero.
pub fn percent_of(current: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    clamp_percent(current as f64 * 100.0 / total as f64)
}

/// Step-wise progress of copying runtime assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimePathProgress {
    /// Item currently being processed.
    #[serde(default)]
    pub current_name: String,
    /// Completed steps.
    pub current: u64,
    /// Total steps.
    pub total: u64,
}

impl RuntimePathProgress {
    /// Progress as a percentage.
    pub fn percent(&self) -> u8 {
        percent_of(self.current, self.total)
    }
}

impl EventPayload for RuntimePathProgress {
    const TOPIC: Topic = Topic::RuntimePathProgress;
}

/// Overall percentage of a runtime-path change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRuntimePathProgress {
    /// Percentage in `0..=100`.
    pub percentage: f64,
}

impl ChangeRuntimePathProgress {
    /// Progress as a clamped percentage.
    pub fn percent(&self) -> u8 {
        clamp_percent(self.percentage)
    }
}

impl EventPayload for ChangeRuntimePathProgress {
    const TOPIC: Topic = Topic::ChangeRuntimePathProgress;
}

/// Step-wise progress of an instance export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceExportProgress {
    /// File currently being archived.
    #[serde(default)]
    pub current_name: String,
    /// Completed steps.
    pub current: u64,
    /// Total steps.
    pub total: u64,
}

impl EventPayload for InstanceExportProgress {
    const TOPIC: Topic = Topic::InstanceExportProgress;
}

/// A newer release exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAvailable {
    /// Release version, when the core includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl EventPayload for UpdateAvailable {
    const TOPIC: Topic = Topic::UpdateAvailable;
}

/// The release feed has nothing newer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNotAvailable {}

impl EventPayload for UpdateNotAvailable {
    const TOPIC: Topic = Topic::UpdateNotAvailable;
}

/// Download progress of an update package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Percentage in `0..=100`.
    pub percent: f64,
}

impl DownloadProgress {
    /// Progress as a clamped percentage.
    pub fn percent(&self) -> u8 {
        clamp_percent(self.percent)
    }
}

impl EventPayload for DownloadProgress {
    const TOPIC: Topic = Topic::DownloadProgress;
}

/// The update package is fully downloaded and verified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDownloaded {
    /// Release version, when the core includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl EventPayload for UpdateDownloaded {
    const TOPIC: Topic = Topic::UpdateDownloaded;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn edge_topics() {
        assert_eq!(Topic::UpdateAvailable.delivery(), Delivery::Edge);
        assert_eq!(Topic::UpdateDownloaded.delivery(), Delivery::Edge);
        assert_eq!(Topic::RuntimePathProgress.delivery(), Delivery::LatestValue);
        assert_eq!(Topic::DownloadProgress.delivery(), Delivery::LatestValue);
    }

    #[test]
    fn unknown_topics_do_not_fail_decoding() {
        let topic: Topic = serde_json::from_value(json!("somethingNew")).unwrap();
        assert_eq!(topic, Topic::Unknown);
        assert_eq!(Topic::ChangeRuntimePathProgress.as_ref(), "changeRuntimePathProgress");
    }

    #[test]
    fn progress_percentages() {
        let tick: RuntimePathProgress =
            serde_json::from_value(json!({"currentName": "jre-17", "current": 11, "total": 20}))
                .unwrap();
        assert_eq!(tick.percent(), 55);
        assert_eq!(percent_of(3, 0), 0);
        assert_eq!(clamp_percent(140.0), 100);
        assert_eq!(clamp_percent(-2.0), 0);
        assert_eq!(clamp_percent(f64::NAN), 0);
    }

    #[test]
    fn update_available_version_is_optional() {
        let bare: UpdateAvailable = serde_json::from_value(json!({})).unwrap();
        assert!(bare.version.is_none());
        let versioned: UpdateAvailable =
            serde_json::from_value(json!({"version": "2.0.1"})).unwrap();
        assert_eq!(versioned.version.as_deref(), Some("2.0.1"));
    }
}
