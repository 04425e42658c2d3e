use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::CaptureUnavailable;
use crate::config::ConfigError;
use crate::store::Sample;

/// A raw position reading as delivered by a fix source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in meters.
    #[serde(default)]
    pub accuracy: f32,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, accuracy: f32) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
        }
    }

    /// Sources report (0, 0) when they have no position.
    pub fn is_sentinel(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    /// Finite coordinates within range and a finite accuracy.
    pub fn is_valid(&self) -> bool {
        self.accuracy.is_finite()
            && self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn to_sample(self, timestamp: i64) -> Sample {
        Sample::new(self.latitude, self.longitude, timestamp, self.accuracy)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    utoipa::ToSchema,
    strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccuracyClass {
    High,
    Balanced,
}

impl AccuracyClass {
    pub fn from_high_accuracy(high: bool) -> Self {
        if high {
            AccuracyClass::High
        } else {
            AccuracyClass::Balanced
        }
    }
}

/// Settings for one tracking session. Fixed for the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct SessionConfig {
    pub interval_ms: i64,
    pub accuracy: AccuracyClass,
}

impl SessionConfig {
    pub fn new(interval_ms: i64, high_accuracy: bool) -> Result<Self, ConfigError> {
        if interval_ms <= 0 {
            return Err(ConfigError::InvalidInterval(interval_ms));
        }
        Ok(Self {
            interval_ms,
            accuracy: AccuracyClass::from_high_accuracy(high_accuracy),
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1) as u64)
    }

    pub fn request(&self) -> FixRequest {
        FixRequest {
            min_interval: self.interval(),
            accuracy: self.accuracy,
        }
    }
}

/// What a sampler asks of a fix source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixRequest {
    pub min_interval: Duration,
    pub accuracy: AccuracyClass,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FixEvent {
    Fix(Fix),
    Unavailable(CaptureUnavailable),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum SamplerState {
    Stopped,
    Starting,
    Active,
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct SamplerStatus {
    pub state: SamplerState,
    pub session: Option<SessionConfig>,
    pub last_sample: Option<Sample>,
    pub unavailable: Option<CaptureUnavailable>,
    /// Samples stored during the current session.
    pub captured: u64,
}

impl SamplerStatus {
    pub fn stopped() -> Self {
        Self {
            state: SamplerState::Stopped,
            session: None,
            last_sample: None,
            unavailable: None,
            captured: 0,
        }
    }
}

/// Lifecycle notifications for whoever owns the sampler.
#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SamplerEvent {
    Starting { interval_ms: i64 },
    Active,
    Unavailable { reason: CaptureUnavailable },
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_exact_origin_only() {
        assert!(Fix::new(0.0, 0.0, 3.0).is_sentinel());
        assert!(!Fix::new(0.0, 12.0, 3.0).is_sentinel());
        assert!(!Fix::new(-0.0001, 0.0, 3.0).is_sentinel());
    }

    #[test]
    fn validity_check() {
        assert!(Fix::new(90.0, -180.0, 1.0).is_valid());
        assert!(!Fix::new(90.5, 0.0, 1.0).is_valid());
        assert!(!Fix::new(10.0, 181.0, 1.0).is_valid());
        assert!(!Fix::new(f64::NAN, 1.0, 1.0).is_valid());
        assert!(!Fix::new(10.0, 20.0, f32::NAN).is_valid());
        assert!(!Fix::new(10.0, 20.0, f32::INFINITY).is_valid());
    }

    #[test]
    fn session_rejects_non_positive_interval() {
        assert!(matches!(
            SessionConfig::new(0, true),
            Err(ConfigError::InvalidInterval(0))
        ));
        assert!(matches!(
            SessionConfig::new(-5, true),
            Err(ConfigError::InvalidInterval(-5))
        ));
        let session = SessionConfig::new(60_000, false).unwrap();
        assert_eq!(session.interval(), Duration::from_secs(60));
        assert_eq!(session.accuracy, AccuracyClass::Balanced);
    }
}
