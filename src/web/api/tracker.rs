use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::sampler::{CaptureUnavailable, Fix, PushSource, SamplerStatus};
use crate::store::Sample;
use crate::web::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::web::server::AppState;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct StartRequest {
    /// Capture interval; the configured interval when omitted.
    #[serde(default)]
    pub interval_ms: Option<i64>,
    #[serde(default)]
    pub high_accuracy: Option<bool>,
}

#[utoipa::path(
    post,
    path = "/api/tracker/start",
    request_body(content = StartRequest, description = "Optional, configured values apply when omitted"),
    responses(
        (status = 200, description = "Tracker started or rebound", body = SamplerStatus),
        (status = 400, description = "Invalid interval", body = ErrorResponse),
        (status = 503, description = "Location unavailable", body = ErrorResponse)
    ),
    tag = "tracker"
)]
pub async fn start(
    State(state): State<AppState>,
    request: Option<Json<StartRequest>>,
) -> ApiResult<Json<SamplerStatus>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let tracking = &state.config.tracking;
    let interval_ms = match request.interval_ms {
        Some(ms) => ms,
        None => tracking.session().map_err(|e| ApiError::Validation(e.to_string()))?.interval_ms,
    };
    let high_accuracy = request.high_accuracy.unwrap_or(tracking.high_accuracy);

    let mut sampler = state.sampler.lock().await;
    sampler.start(interval_ms, high_accuracy).await?;
    Ok(Json(sampler.status()))
}

#[utoipa::path(
    post,
    path = "/api/tracker/stop",
    responses(
        (status = 200, description = "Tracker stopped", body = SamplerStatus)
    ),
    tag = "tracker"
)]
pub async fn stop(State(state): State<AppState>) -> ApiResult<Json<SamplerStatus>> {
    let mut sampler = state.sampler.lock().await;
    sampler.stop().await;
    Ok(Json(sampler.status()))
}

#[utoipa::path(
    get,
    path = "/api/tracker/status",
    responses(
        (status = 200, description = "Tracker status", body = SamplerStatus)
    ),
    tag = "tracker"
)]
pub async fn status(State(state): State<AppState>) -> ApiResult<Json<SamplerStatus>> {
    let sampler = state.sampler.lock().await;
    Ok(Json(sampler.status()))
}

#[utoipa::path(
    get,
    path = "/api/tracker/trail",
    responses(
        (status = 200, description = "Live samples, oldest first", body = Vec<Sample>)
    ),
    tag = "tracker"
)]
pub async fn trail(State(state): State<AppState>) -> ApiResult<Json<Vec<Sample>>> {
    Ok(Json(state.trail.snapshot()))
}

#[utoipa::path(
    post,
    path = "/api/fixes",
    request_body = Fix,
    responses(
        (status = 202, description = "Fix accepted for processing"),
        (status = 409, description = "Tracker not running", body = ErrorResponse),
        (status = 429, description = "Fix queue full", body = ErrorResponse),
        (status = 503, description = "Source disabled or not push based", body = ErrorResponse)
    ),
    tag = "source"
)]
pub async fn push_fix(
    State(state): State<AppState>,
    Json(fix): Json<Fix>,
) -> ApiResult<StatusCode> {
    let push = push_source(&state)?;
    push.push(fix)?;
    Ok(StatusCode::ACCEPTED)
}

#[utoipa::path(
    post,
    path = "/api/source/revoke",
    responses(
        (status = 204, description = "Source disabled"),
        (status = 503, description = "Source is not push based", body = ErrorResponse)
    ),
    tag = "source"
)]
pub async fn revoke_source(State(state): State<AppState>) -> ApiResult<StatusCode> {
    push_source(&state)?.revoke(CaptureUnavailable::PermissionDenied);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/source/grant",
    responses(
        (status = 204, description = "Source enabled"),
        (status = 503, description = "Source is not push based", body = ErrorResponse)
    ),
    tag = "source"
)]
pub async fn grant_source(State(state): State<AppState>) -> ApiResult<StatusCode> {
    push_source(&state)?.grant();
    Ok(StatusCode::NO_CONTENT)
}

fn push_source(state: &AppState) -> ApiResult<&PushSource> {
    state
        .push
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("fix source does not accept pushed fixes".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sampler::SamplerState;
    use axum::extract::FromRequest;
    use tempfile::TempDir;

    fn state() -> (TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            "storage:\n  path: {}\ntracking:\n  interval: 60s\n",
            dir.path().join("samples.db").display()
        );
        let state = AppState::new(Config::from_yaml(&yaml).unwrap()).unwrap();
        (dir, state)
    }

    #[tokio::test]
    async fn start_uses_configured_interval_by_default() {
        let (_dir, state) = state();
        let Json(status) = start(State(state.clone()), Some(Json(StartRequest::default())))
            .await
            .ok()
            .unwrap();
        assert_eq!(status.state, SamplerState::Starting);
        assert_eq!(status.session.map(|s| s.interval_ms), Some(60_000));
    }

    #[tokio::test]
    async fn start_without_body_uses_config() {
        let empty = axum::http::Request::builder()
            .method("POST")
            .uri("/api/tracker/start")
            .body(axum::body::Body::empty())
            .unwrap();
        let body = <Option<Json<StartRequest>> as FromRequest<()>>::from_request(empty, &())
            .await
            .ok()
            .unwrap();
        assert!(body.is_none());

        let (_dir, state) = state();
        let Json(status) = start(State(state), None).await.ok().unwrap();
        assert_eq!(status.state, SamplerState::Starting);
        assert_eq!(status.session.map(|s| s.interval_ms), Some(60_000));
    }

    #[tokio::test]
    async fn start_rejects_bad_interval() {
        let (_dir, state) = state();
        let request = StartRequest {
            interval_ms: Some(-1),
            high_accuracy: None,
        };
        let err = start(State(state), Some(Json(request))).await.err().unwrap();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn pushing_without_tracking_conflicts() {
        let (_dir, state) = state();
        let err = push_fix(State(state), Json(Fix::new(1.0, 2.0, 3.0)))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::Conflict("not_tracking")));
    }

    #[tokio::test]
    async fn pushed_fix_reaches_trail_and_status() {
        let (_dir, state) = state();
        start(State(state.clone()), Some(Json(StartRequest::default())))
            .await
            .ok()
            .unwrap();

        let code = push_fix(State(state.clone()), Json(Fix::new(19.5, -99.1, 5.0)))
            .await
            .ok()
            .unwrap();
        assert_eq!(code, StatusCode::ACCEPTED);

        for _ in 0..200 {
            if !state.trail.snapshot().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(
            state.trail.snapshot().last().map(|s| s.latitude),
            Some(19.5)
        );

        let Json(status) = status(State(state.clone())).await.ok().unwrap();
        assert_eq!(status.state, SamplerState::Active);

        let Json(stopped) = stop(State(state)).await.ok().unwrap();
        assert_eq!(stopped.state, SamplerState::Stopped);
    }

    #[tokio::test]
    async fn revoked_source_refuses_start() {
        let (_dir, state) = state();
        revoke_source(State(state.clone())).await.ok().unwrap();

        let err = start(State(state.clone()), Some(Json(StartRequest::default())))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::Unavailable(_)));
        let Json(status) = status(State(state.clone())).await.ok().unwrap();
        assert_eq!(status.state, SamplerState::Starting);

        grant_source(State(state.clone())).await.ok().unwrap();
        assert!(start(State(state), Some(Json(StartRequest::default()))).await.is_ok());
    }
}
