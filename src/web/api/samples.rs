use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::export::{self, ExportFormat};
use crate::store::{PersistenceError, Sample, SampleStore};
use crate::web::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::web::server::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RangeQuery {
    /// Inclusive lower bound, ms since epoch.
    pub start: Option<i64>,
    /// Inclusive upper bound, ms since epoch.
    pub end: Option<i64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: ExportFormat,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteResponse {
    pub deleted: u64,
}

/// Runs a store call off the async workers.
async fn with_store<T, F>(store: &Arc<SampleStore>, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&SampleStore) -> Result<T, PersistenceError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

fn query_samples(store: &SampleStore, range: &RangeQuery) -> Result<Vec<Sample>, PersistenceError> {
    store.flush()?;
    match (range.start, range.end) {
        (None, None) => store.list_all(),
        (start, end) => store.list_by_range(start.unwrap_or(i64::MIN), end.unwrap_or(i64::MAX)),
    }
}

#[utoipa::path(
    get,
    path = "/api/samples",
    params(RangeQuery),
    responses(
        (status = 200, description = "Samples, most recent first", body = Vec<Sample>),
        (status = 500, description = "Storage error", body = ErrorResponse)
    ),
    tag = "samples"
)]
pub async fn list_samples(
    State(state): State<AppState>,
    Query(range): Query<RangeQuery>,
) -> ApiResult<Json<Vec<Sample>>> {
    let samples = with_store(&state.store, move |store| query_samples(store, &range)).await?;
    Ok(Json(samples))
}

#[utoipa::path(
    get,
    path = "/api/samples/count",
    responses(
        (status = 200, description = "Number of stored samples", body = CountResponse),
        (status = 500, description = "Storage error", body = ErrorResponse)
    ),
    tag = "samples"
)]
pub async fn count_samples(State(state): State<AppState>) -> ApiResult<Json<CountResponse>> {
    let count = with_store(&state.store, |store| {
        store.flush()?;
        store.count()
    })
    .await?;
    Ok(Json(CountResponse { count }))
}

#[utoipa::path(
    delete,
    path = "/api/samples",
    responses(
        (status = 200, description = "History cleared", body = DeleteResponse),
        (status = 500, description = "Storage error", body = ErrorResponse)
    ),
    tag = "samples"
)]
pub async fn delete_samples(State(state): State<AppState>) -> ApiResult<Json<DeleteResponse>> {
    let deleted = with_store(&state.store, |store| store.delete_all()).await?;
    state.trail.clear();
    Ok(Json(DeleteResponse { deleted }))
}

#[utoipa::path(
    get,
    path = "/api/samples/export",
    params(ExportQuery),
    responses(
        (status = 200, description = "Rendered history"),
        (status = 404, description = "Nothing to export", body = ErrorResponse),
        (status = 500, description = "Storage error", body = ErrorResponse)
    ),
    tag = "samples"
)]
pub async fn export_samples(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<impl IntoResponse> {
    let samples = with_store(&state.store, |store| {
        store.flush()?;
        store.list_all()
    })
    .await?;
    if samples.is_empty() {
        return Err(ApiError::NotFound("no_samples"));
    }

    let body = export::render(&samples, query.format)?;
    let disposition = format!(
        "attachment; filename=\"rastreo.{}\"",
        query.format.extension()
    );
    Ok((
        [
            (header::CONTENT_TYPE, query.format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    fn state_with(timestamps: &[i64]) -> (TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            "storage:\n  path: {}\n",
            dir.path().join("samples.db").display()
        );
        let state = AppState::new(Config::from_yaml(&yaml).unwrap()).unwrap();
        for ts in timestamps {
            state.store.insert(Sample::new(19.5, -99.1, *ts, 5.0)).unwrap();
        }
        (dir, state)
    }

    fn timestamps(samples: &[Sample]) -> Vec<i64> {
        samples.iter().map(|s| s.timestamp).collect()
    }

    #[tokio::test]
    async fn lists_all_or_by_range() {
        let (_dir, state) = state_with(&[100, 300, 200]);

        let Json(all) = list_samples(State(state.clone()), Query(RangeQuery::default()))
            .await
            .ok()
            .unwrap();
        assert_eq!(timestamps(&all), vec![300, 200, 100]);

        let range = RangeQuery {
            start: Some(150),
            end: Some(250),
        };
        let Json(some) = list_samples(State(state.clone()), Query(range))
            .await
            .ok()
            .unwrap();
        assert_eq!(timestamps(&some), vec![200]);

        let open_ended = RangeQuery {
            start: Some(200),
            end: None,
        };
        let Json(tail) = list_samples(State(state), Query(open_ended))
            .await
            .ok()
            .unwrap();
        assert_eq!(timestamps(&tail), vec![300, 200]);
    }

    #[tokio::test]
    async fn delete_then_count_is_zero() {
        let (_dir, state) = state_with(&[1, 2]);

        let Json(deleted) = delete_samples(State(state.clone())).await.ok().unwrap();
        assert_eq!(deleted.deleted, 2);
        let Json(count) = count_samples(State(state)).await.ok().unwrap();
        assert_eq!(count.count, 0);
    }

    #[tokio::test]
    async fn export_of_empty_history_is_not_found() {
        let (_dir, state) = state_with(&[]);
        let err = export_samples(State(state), Query(ExportQuery::default()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::NotFound("no_samples")));
    }

    #[tokio::test]
    async fn export_renders_requested_format() {
        let (_dir, state) = state_with(&[1_700_000_000_000]);
        let response = export_samples(State(state), Query(ExportQuery::default()))
            .await
            .ok()
            .unwrap()
            .into_response();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
    }
}
