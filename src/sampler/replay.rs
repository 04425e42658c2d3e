use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use super::error::CaptureUnavailable;
use super::source::{FixSource, FixSubscription};
use super::types::{Fix, FixEvent, FixRequest};
use crate::config::ConfigError;

/// Replays a recorded list of fixes, one per requested interval.
///
/// The file is a YAML sequence of `{latitude, longitude, accuracy}` maps.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    origin: PathBuf,
    fixes: Arc<Vec<Fix>>,
    repeat: bool,
}

impl ReplaySource {
    pub fn from_file(path: &Path, repeat: bool) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let fixes: Vec<Fix> = serde_yaml::from_str(&content)?;
        info!("Loaded {} fixes from {}", fixes.len(), path.display());
        Ok(Self {
            origin: path.to_path_buf(),
            ..Self::from_fixes(fixes, repeat)
        })
    }

    pub fn from_fixes(fixes: Vec<Fix>, repeat: bool) -> Self {
        Self {
            origin: PathBuf::new(),
            fixes: Arc::new(fixes),
            repeat,
        }
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }
}

impl FixSource for ReplaySource {
    fn request_updates(&self, request: FixRequest) -> Result<FixSubscription, CaptureUnavailable> {
        if self.fixes.is_empty() {
            return Err(CaptureUnavailable::SourceDisabled);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            CaptureUnavailable::Source {
                message: e.to_string(),
            }
        })?;

        let (sender, receiver) = mpsc::channel(1);
        let fixes = self.fixes.clone();
        let repeat = self.repeat;
        let origin = self.origin.clone();

        let task = runtime.spawn(async move {
            let mut ticker = interval(request.min_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                for fix in fixes.iter() {
                    ticker.tick().await;
                    if sender.send(FixEvent::Fix(*fix)).await.is_err() {
                        return;
                    }
                }
                if !repeat {
                    break;
                }
            }
            debug!("Replay of {} finished", origin.display());
        });

        Ok(FixSubscription::new(receiver, move || task.abort()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::AccuracyClass;
    use std::io::Write;
    use std::time::Duration;

    fn request() -> FixRequest {
        FixRequest {
            min_interval: Duration::from_millis(5),
            accuracy: AccuracyClass::High,
        }
    }

    #[test]
    fn loads_yaml_fixes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "- {{latitude: 19.5046, longitude: -99.146, accuracy: 4.5}}\n- {{latitude: 19.5050, longitude: -99.147}}"
        )
        .unwrap();

        let source = ReplaySource::from_file(file.path(), false).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.fixes[0], Fix::new(19.5046, -99.146, 4.5));
        assert_eq!(source.fixes[1].accuracy, 0.0);
    }

    #[tokio::test]
    async fn replays_then_closes() {
        let fixes = vec![Fix::new(1.0, 1.0, 1.0), Fix::new(2.0, 2.0, 2.0)];
        let source = ReplaySource::from_fixes(fixes.clone(), false);
        let mut sub = source.request_updates(request()).unwrap();

        assert_eq!(sub.next().await, Some(FixEvent::Fix(fixes[0])));
        assert_eq!(sub.next().await, Some(FixEvent::Fix(fixes[1])));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn repeat_wraps_around() {
        let source = ReplaySource::from_fixes(vec![Fix::new(3.0, 3.0, 3.0)], true);
        let mut sub = source.request_updates(request()).unwrap();
        for _ in 0..3 {
            assert_eq!(sub.next().await, Some(FixEvent::Fix(Fix::new(3.0, 3.0, 3.0))));
        }
        sub.cancel();
    }

    #[test]
    fn empty_replay_is_unavailable() {
        let source = ReplaySource::from_fixes(Vec::new(), false);
        assert_eq!(
            source.request_updates(request()).err(),
            Some(CaptureUnavailable::SourceDisabled)
        );
    }
}
