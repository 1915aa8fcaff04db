use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Reasons starting with this prefix can never be fixed by retrying.
pub const NOT_CACHED_PREFIX: &str = "not_cached";

/// Lifecycle of a repair entry: `queued -> running -> {fixed | still_broken | not_cached}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RepairStatus {
    Queued,
    Running,
    Fixed,
    StillBroken,
    NotCached,
}

impl RepairStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, RepairStatus::Queued | RepairStatus::Running)
    }
}

/// Durable record of a torrent queued or processed for repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairEntry {
    pub torrent_id: String,
    pub filename: String,
    pub hash: String,
    pub status: RepairStatus,
    pub progress: f64,
    pub reason: String,
    pub updated_at: DateTime<Utc>,
}

impl RepairEntry {
    pub fn queued(
        torrent_id: impl Into<String>,
        filename: impl Into<String>,
        hash: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            torrent_id: torrent_id.into(),
            filename: filename.into(),
            hash: hash.into(),
            status: RepairStatus::Queued,
            progress: 0.0,
            reason: reason.into(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_not_cached(&self) -> bool {
        self.reason.starts_with(NOT_CACHED_PREFIX)
    }
}
