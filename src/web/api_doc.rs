use utoipa::OpenApi;

use super::api::error::ErrorResponse;
use super::api::samples::{CountResponse, DeleteResponse};
use super::api::tracker::StartRequest;

#[derive(OpenApi)]
#[openapi(
    paths(
        super::api::tracker::start,
        super::api::tracker::stop,
        super::api::tracker::status,
        super::api::tracker::trail,
        super::api::tracker::push_fix,
        super::api::tracker::revoke_source,
        super::api::tracker::grant_source,
        super::api::samples::list_samples,
        super::api::samples::count_samples,
        super::api::samples::delete_samples,
        super::api::samples::export_samples,
    ),
    components(
        schemas(
            StartRequest,
            CountResponse,
            DeleteResponse,
            ErrorResponse,
            crate::store::Sample,
            crate::sampler::Fix,
            crate::sampler::SamplerStatus,
            crate::sampler::SamplerState,
            crate::sampler::SessionConfig,
            crate::sampler::AccuracyClass,
            crate::sampler::CaptureUnavailable,
            crate::export::ExportFormat,
        )
    ),
    info(
        title = "Loc-O-Mat Tracking API",
        description = "API for location capture and history",
        version = "0.1.0"
    ),
    tags(
        (name = "tracker", description = "Capture control"),
        (name = "source", description = "Fix ingestion"),
        (name = "samples", description = "Stored history")
    )
)]
pub struct ApiDoc;
