use axum::{routing::delete, routing::get, routing::post, Router};
use log::{info, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{Config, ConfigError};
use crate::sampler::{PushSource, Sampler, SamplerEvent};
use crate::store::{PersistenceError, SampleStore};

use super::api::samples as sample_handlers;
use super::api::tracker as tracker_handlers;
use super::api_doc::ApiDoc;
use super::live::LiveTrail;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(#[from] PersistenceError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<SampleStore>,
    pub sampler: Arc<Mutex<Sampler>>,
    pub push: Option<PushSource>,
    pub trail: Arc<LiveTrail>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, ServeError> {
        let store = Arc::new(SampleStore::open(&config.storage.path)?);
        let (source, push) = config.source.open()?;
        let sampler = Sampler::new(store.clone(), source);
        let trail = Arc::new(LiveTrail::attach(sampler.samples(), config.web.trail_len));

        sampler.events().subscribe(|event: &SamplerEvent| {
            match event {
                SamplerEvent::Starting { interval_ms } => {
                    info!("Tracking starting, every {} s", interval_ms / 1000)
                }
                SamplerEvent::Active => info!("Tracking active"),
                SamplerEvent::Unavailable { reason } => warn!("Tracking unavailable: {}", reason),
                SamplerEvent::Stopped => info!("Tracking stopped"),
            }
            Ok(())
        });

        Ok(Self {
            config: Arc::new(config),
            store,
            sampler: Arc::new(Mutex::new(sampler)),
            push,
            trail,
        })
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Tracker API endpoints
        .route("/api/tracker/start", post(tracker_handlers::start))
        .route("/api/tracker/stop", post(tracker_handlers::stop))
        .route("/api/tracker/status", get(tracker_handlers::status))
        .route("/api/tracker/trail", get(tracker_handlers::trail))
        // Fix ingestion
        .route("/api/fixes", post(tracker_handlers::push_fix))
        .route("/api/source/revoke", post(tracker_handlers::revoke_source))
        .route("/api/source/grant", post(tracker_handlers::grant_source))
        // History API endpoints
        .route("/api/samples", get(sample_handlers::list_samples))
        .route("/api/samples", delete(sample_handlers::delete_samples))
        .route("/api/samples/count", get(sample_handlers::count_samples))
        .route("/api/samples/export", get(sample_handlers::export_samples))
        // OpenAPI / Swagger
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: Config) -> Result<(), ServeError> {
    let bind_addr = config.web.bind.clone();
    let resume = config.tracking.resume;
    let session = config.tracking.session()?;
    let state = AppState::new(config)?;

    if resume {
        let mut sampler = state.sampler.lock().await;
        if let Err(e) = sampler.start_session(session).await {
            warn!("Could not resume tracking: {}", e);
        }
    }

    let app = router(state.clone());

    info!("Starting server on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.sampler.lock().await.stop().await;
    state.store.flush()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
