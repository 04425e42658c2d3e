use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;

/// Why the sampler cannot currently obtain fixes.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, utoipa::ToSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CaptureUnavailable {
    #[error("location permission not granted")]
    PermissionDenied,
    #[error("location source disabled")]
    SourceDisabled,
    #[error("no fix received within {window_ms} ms")]
    NoFix { window_ms: u64 },
    #[error("location source error: {message}")]
    Source { message: String },
    #[error("location source closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("capture unavailable: {0}")]
    Unavailable(#[from] CaptureUnavailable),
}
