use crate::events::{pump_to_bus, EventBus};
use crate::sse::discussion_stream;
use accord_core::{AccordConfig, DiscussionConfig, DiscussionId, Participant, PartialDiscussionOptions, Role};
use accord_orchestrator::Orchestrator;
use accord_provider::ProviderRegistry;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RestApiConfig {
    pub bind_address: String,
    pub port: u16,
    pub cors_enabled: bool,
}

impl From<&AccordConfig> for RestApiConfig {
    fn from(config: &AccordConfig) -> Self {
        Self {
            bind_address: config.server.bind_address.clone(),
            port: config.server.port,
            cors_enabled: true,
        }
    }
}

/// One running discussion's externally-visible handle: the event bus other
/// tasks subscribe to, and the token that aborts it early.
struct DiscussionHandle {
    bus: Arc<EventBus>,
    cancellation: CancellationToken,
}

#[derive(Clone)]
struct AppState {
    registry: Arc<ProviderRegistry>,
    discussions: Arc<DashMap<DiscussionId, DiscussionHandle>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantInput {
    model_id: String,
    provider_id: String,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartDiscussionRequest {
    prompt: String,
    model_a: ParticipantInput,
    model_b: ParticipantInput,
    options: Option<PartialDiscussionOptions>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartDiscussionResponse {
    discussion_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// The REST + SSE surface for the discussion orchestrator. Holds the shared
/// provider registry and a directory of in-flight discussions; each
/// discussion gets its own `Orchestrator` instance, matching the
/// one-instance-per-run scheduling model.
pub struct DiscussionApi {
    config: RestApiConfig,
    state: AppState,
}

impl DiscussionApi {
    pub fn new(config: RestApiConfig, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            config,
            state: AppState {
                registry,
                discussions: Arc::new(DashMap::new()),
            },
        }
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(%addr, "discussion API listening");
        axum::serve(listener, app).await?;
        Ok(())
    }

    fn router(self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_check))
            .route("/discussions", post(start_discussion))
            .route("/discussions/:id/events", get(stream_discussion))
            .route("/discussions/:id", axum::routing::delete(abort_discussion))
            .with_state(self.state);

        if self.config.cors_enabled {
            router = router.layer(CorsLayer::permissive());
        }
        router
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy", "timestamp": chrono::Utc::now() }))
}

fn build_config(body: StartDiscussionRequest) -> DiscussionConfig {
    DiscussionConfig {
        prompt: body.prompt,
        participant_a: Participant {
            role: Role::A,
            model_id: body.model_a.model_id,
            provider_id: body.model_a.provider_id,
            display_name: body.model_a.display_name,
        },
        participant_b: Participant {
            role: Role::B,
            model_id: body.model_b.model_id,
            provider_id: body.model_b.provider_id,
            display_name: body.model_b.display_name,
        },
        options: body
            .options
            .map(accord_core::DiscussionOptions::merged)
            .unwrap_or_default(),
    }
}

async fn start_discussion(
    State(state): State<AppState>,
    Json(body): Json<StartDiscussionRequest>,
) -> impl IntoResponse {
    let config = build_config(body);
    if let Err(message) = config.validate() {
        return (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: message })).into_response();
    }

    let bus = Arc::new(EventBus::new());
    let cancellation = CancellationToken::new();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(pump_to_bus(rx, Arc::clone(&bus)));

    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&state.registry)));
    let discussion_id = orchestrator.start(config, tx, cancellation.clone());

    state.discussions.insert(
        discussion_id.clone(),
        DiscussionHandle {
            bus,
            cancellation,
        },
    );

    (
        StatusCode::ACCEPTED,
        Json(StartDiscussionResponse {
            discussion_id: discussion_id.to_string(),
        }),
    )
        .into_response()
}

async fn stream_discussion(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let discussion_id = DiscussionId::from(id);
    match state.discussions.get(&discussion_id) {
        Some(handle) => discussion_stream(Arc::clone(&handle.bus), handle.cancellation.clone())
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("no discussion with id {}", discussion_id),
            }),
        )
            .into_response(),
    }
}

async fn abort_discussion(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let discussion_id = DiscussionId::from(id);
    match state.discussions.get(&discussion_id) {
        Some(handle) => {
            handle.cancellation.cancel();
            StatusCode::NO_CONTENT.into_response()
        }
        None => {
            warn!(%discussion_id, "abort requested for unknown discussion");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
