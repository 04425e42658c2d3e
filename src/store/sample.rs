use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One stored position, derived from an accepted fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Sample {
    pub latitude: f64,
    pub longitude: f64,
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Accuracy radius in meters, as reported by the source.
    pub accuracy: f32,
}

impl Sample {
    pub fn new(latitude: f64, longitude: f64, timestamp: i64, accuracy: f32) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            accuracy,
        }
    }

    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    pub fn local_time(&self) -> Option<DateTime<Local>> {
        self.captured_at().map(|t| t.with_timezone(&Local))
    }
}
