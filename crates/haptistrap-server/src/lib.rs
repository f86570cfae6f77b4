//! HTTP surface of the Haptistrap service: STL generation and the website
//! contact form.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use haptistrap_contact::{ContactRequest, ContactService, Delivery, DeliveryError};
use haptistrap_gen::{
    ArchiveOutcome, Artifact, ArtifactGenerator, DEFAULT_SPRING_THICKNESS, DEFAULT_STRAP_WIDTH,
    GenerationParams, RateLimiter,
};
use http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

pub mod config;
pub mod error;

use config::Config;
use error::ApiError;

pub struct AppState {
    pub generator: ArtifactGenerator,
    pub rate_limiter: RateLimiter,
    pub contact: ContactService,
    pub allowed_origins: Vec<String>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self, DeliveryError> {
        Ok(Self {
            generator: ArtifactGenerator::new(config.generator.clone()),
            rate_limiter: RateLimiter::new(config.rate_limit_window),
            contact: ContactService::from_config(&config.contact)?,
            allowed_origins: config.allowed_origins.clone(),
        })
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/generate-stl", get(generate_stl))
        .route("/generate-stl/", get(generate_stl))
        .route("/contact", post(contact))
        .fallback(not_found)
        .layer(cors_layer(&state.allowed_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION, CONTENT_TYPE, CONTENT_LENGTH]);

    let origins = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring unparsable CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RootResponse {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GenerateQuery {
    #[serde(rename = "springThickness", default = "default_spring_thickness")]
    spring_thickness: f64,
    #[serde(rename = "strapWidth", default = "default_strap_width")]
    strap_width: f64,
}

fn default_spring_thickness() -> f64 {
    DEFAULT_SPRING_THICKNESS
}

fn default_strap_width() -> f64 {
    DEFAULT_STRAP_WIDTH
}

#[derive(Debug, Serialize, Deserialize)]
struct ContactResponse {
    success: bool,
    message: String,
    timestamp: String,
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Haptistrap API is running".to_string(),
    })
}

async fn not_found() -> ApiError {
    ApiError::not_found()
}

async fn generate_stl(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    query: Result<Query<GenerateQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) =
        query.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let params = GenerationParams::new(query.spring_thickness, query.strap_width)?;

    let client = peer.ip();
    if let Err(err) = state.rate_limiter.check(client) {
        warn!(%client, retry_after_secs = err.retry_after_secs(), "generation rate limited");
        return Err(err.into());
    }

    info!(
        %client,
        spring_thickness = params.spring_thickness(),
        strap_width = params.strap_width(),
        "generating strap"
    );
    let outcome = state.generator.generate(&params).await?;
    if let ArchiveOutcome::Failed(err) = &outcome.archive {
        warn!(
            error = %err,
            filename = %outcome.artifact.filename,
            "serving artifact without archive copy"
        );
    }

    deliver(&outcome.artifact).await
}

/// Sends the artifact bytes unchanged as a downloadable attachment.
async fn deliver(artifact: &Artifact) -> Result<Response, ApiError> {
    let bytes = tokio::fs::read(&artifact.path).await.map_err(|err| {
        error!(path = %artifact.path.display(), error = %err, "could not read artifact");
        ApiError::internal(format!("could not read generated STL file: {err}"))
    })?;

    let disposition =
        HeaderValue::from_str(&format!("attachment; filename={}", artifact.filename))
            .map_err(|_| ApiError::internal("generated filename is not a valid header value"))?;
    let headers: [(HeaderName, HeaderValue); 2] = [
        (CONTENT_TYPE, HeaderValue::from_static(artifact.media_type())),
        (CONTENT_DISPOSITION, disposition),
    ];

    Ok((headers, bytes).into_response())
}

async fn contact(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ContactRequest>, JsonRejection>,
) -> Result<Json<ContactResponse>, ApiError> {
    let Json(request) =
        payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    let receipt = state.contact.submit(request).await.inspect_err(|err| {
        info!(error = %err, "contact submission rejected");
    })?;

    match &receipt.delivery {
        Delivery::Sent => info!("contact submission delivered by email"),
        Delivery::LoggedOnly { smtp_error } => {
            info!(smtp_error = ?smtp_error, "contact submission recorded without email")
        }
    }

    Ok(Json(ContactResponse {
        success: true,
        message: receipt.user_message().to_string(),
        timestamp: receipt.timestamp.to_rfc3339(),
    }))
}
