//! Shared wire/row types: daily aggregate snapshots, source metadata, and
//! the notification shape pushed to observers.

use serde::{Deserialize, Serialize};

/// One per-day, per-source aggregate row, joined with optional display
/// metadata. `visible_count` and `total_duration` only ever grow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDayRow {
    pub date: String,
    pub source_name: String,
    pub visible_count: i64,
    /// Accumulated on-screen time in whole seconds.
    pub total_duration: i64,
    pub last_visible_at: Option<String>,
    pub title: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
}

/// Operator-entered display metadata for a named source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub source_name: String,
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub brand: String,
}

/// Push notification fanned out to observers. `initial_data` is sent once
/// when an observer connects; `source_updated` on every visibility
/// transition. Field names match the observer-side wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateNotification {
    InitialData {
        data: Vec<SourceDayRow>,
        #[serde(rename = "activeSources")]
        active_sources: Vec<String>,
        timestamp: String,
    },
    SourceUpdated {
        data: Vec<SourceDayRow>,
        #[serde(rename = "activeSources")]
        active_sources: Vec<String>,
        timestamp: String,
    },
}
