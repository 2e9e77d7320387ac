use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    config::{ApiProfile, AppConfig},
    error::{ServiceError, Unhandled},
    model::{
        GenerationRequest, GenerationResponse, HealthResponse, ModelRegistry, Sampling,
        StatusResponse, TextResponse,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
}

pub fn build_router(config: Arc<AppConfig>, registry: Arc<ModelRegistry>) -> Router {
    let profile = config.profile;
    let state = AppState { registry, config };

    let router = match profile {
        ApiProfile::Full => Router::new()
            .route("/", get(root))
            .route("/health", get(healthy))
            .route("/generate", post(generate)),
        ApiProfile::Simple => Router::new()
            .route("/health", get(ok))
            .route("/generate", post(generate_text)),
    };

    router
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn root(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running".to_string(),
        model: state.config.model_id.clone(),
    })
}

async fn healthy() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

async fn ok() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<GenerationResponse>, ServiceError> {
    let max_tokens = effective_max_tokens(&state.config, request.max_tokens);
    let temperature = request
        .temperature
        .unwrap_or(state.config.default_temperature);

    let completion = state
        .registry
        .complete(
            request.prompt.clone(),
            max_tokens,
            Sampling::Temperature(temperature),
        )
        .await?;

    info!(
        prompt_tokens = completion.prompt_tokens,
        max_tokens,
        temperature,
        generated_tokens = completion.generated_tokens,
        "generated completion"
    );

    Ok(Json(GenerationResponse {
        generated_text: completion.text,
        prompt: request.prompt,
    }))
}

async fn generate_text(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<TextResponse>, Unhandled> {
    let max_tokens = effective_max_tokens(&state.config, request.max_tokens);

    let completion = state
        .registry
        .complete(request.prompt, max_tokens, Sampling::Greedy)
        .await?;

    info!(
        prompt_tokens = completion.prompt_tokens,
        max_tokens,
        generated_tokens = completion.generated_tokens,
        "generated completion"
    );

    Ok(Json(TextResponse {
        text: completion.text,
    }))
}

fn effective_max_tokens(config: &AppConfig, requested: Option<usize>) -> usize {
    let requested = requested.unwrap_or(config.default_max_tokens);
    if requested > config.max_tokens_limit {
        warn!(
            requested,
            limit = config.max_tokens_limit,
            "clamping max_tokens to the configured limit"
        );
        config.max_tokens_limit
    } else {
        requested
    }
}
