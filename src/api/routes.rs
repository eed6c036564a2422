//! HTTP route handlers.

use std::sync::Arc;

use axum::middleware;
use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::analytics::{AnalyticsStore, ClickHouseAnalytics};
use crate::config::Config;
use crate::identity::{AuthUser, IdentityProvider, SupabaseIdentity};
use crate::investigation::{InvestigationError, InvestigationQueries, Orchestrator};
use crate::llm::{ReasoningClient, TensorZeroClient};
use crate::store::{RelationalStore, SupabaseStore};

use super::auth;
use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub identity: Arc<dyn IdentityProvider>,
    pub orchestrator: Orchestrator,
    pub queries: InvestigationQueries,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn RelationalStore>,
        analytics: Arc<dyn AnalyticsStore>,
        identity: Arc<dyn IdentityProvider>,
        reasoning: Arc<dyn ReasoningClient>,
    ) -> Self {
        let orchestrator = Orchestrator::new(Arc::clone(&store), reasoning, config.poll);
        let queries = InvestigationQueries::new(store, analytics);
        Self {
            config,
            identity,
            orchestrator,
            queries,
        }
    }

    /// Wire the production clients from configuration.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = Arc::new(SupabaseStore::new(
            &config.supabase.url,
            &config.supabase.service_role_key,
        ));
        let analytics = Arc::new(ClickHouseAnalytics::new(&config.clickhouse)?);
        let identity = Arc::new(SupabaseIdentity::new(
            &config.supabase.url,
            &config.supabase.anon_key,
        ));
        let reasoning = Arc::new(TensorZeroClient::new(&config.tensorzero));
        Ok(Self::new(config, store, analytics, identity, reasoning))
    }
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(
        "Using reasoning gateway {} (function {})",
        config.tensorzero.base_url,
        config.tensorzero.function_name
    );
    tracing::info!(
        "Polling agents every {:?} (interactive budget {:?}, background budget {:?})",
        config.poll.interval,
        config.poll.interactive_budget,
        config.poll.background_budget
    );

    let state = Arc::new(AppState::from_config(config)?);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/health", get(health));

    let protected_routes = Router::new()
        .route(
            "/",
            get(list_or_get)
                .post(create_investigation)
                .options(preflight),
        )
        .route(
            "/investigation/:investigation_id",
            get(get_investigation).options(preflight),
        )
        .route(
            "/inference/:inference_id",
            get(get_inference).options(preflight),
        )
        .route(
            "/pending/:investigation_id/wait",
            get(wait_for_agent).options(preflight),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(fallback)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining in-flight requests");
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn fallback(method: Method) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    InvestigationError::NotFound("Not found".to_string()).into_response()
}

/// `GET /`: details when `investigation_id` or `inference_id` is given, else the list.
async fn list_or_get(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<RootQuery>,
) -> Result<Response, InvestigationError> {
    if let Some(investigation_id) = query.investigation_id.as_deref() {
        let details = state.queries.details(&user, investigation_id).await?;
        return Ok(Json(details).into_response());
    }
    if let Some(inference_id) = query.inference_id.as_deref() {
        let detail = state.queries.inference(&user, inference_id).await?;
        return Ok(Json(detail).into_response());
    }

    let params = query.list_params()?;
    let list = state.queries.list(&user, &params).await?;
    Ok(Json(list).into_response())
}

async fn create_investigation(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<CreateInvestigationRequest>, JsonRejection>,
) -> Result<Response, InvestigationError> {
    let Json(body) =
        payload.map_err(|rejection| InvestigationError::BadRequest(rejection.body_text()))?;
    let command = body.into_command(&user)?;

    tracing::info!(
        user_id = %user.id,
        agent_id = %command.agent_id,
        priority = ?command.priority,
        "Creating investigation"
    );
    let outcome = state.orchestrator.create_investigation(&user, command).await?;
    Ok(Json(outcome).into_response())
}

async fn get_investigation(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(investigation_id): Path<String>,
) -> Result<Response, InvestigationError> {
    let details = state.queries.details(&user, &investigation_id).await?;
    Ok(Json(details).into_response())
}

async fn get_inference(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(inference_id): Path<String>,
) -> Result<Response, InvestigationError> {
    let detail = state.queries.inference(&user, &inference_id).await?;
    Ok(Json(detail).into_response())
}

async fn wait_for_agent(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(investigation_id): Path<String>,
) -> Result<Response, InvestigationError> {
    let pending = state
        .orchestrator
        .await_agent_results(&user, &investigation_id)
        .await?;
    Ok(Json(pending).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::InMemoryAnalytics;
    use crate::store::InMemoryStore;
    use crate::testing::{seed_agent, ScriptedReasoning, StaticIdentity};
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const TOKEN: &str = "token-user-1";
    const OTHER_TOKEN: &str = "token-user-2";

    async fn app(reasoning: ScriptedReasoning) -> (Router, InMemoryStore) {
        let store = InMemoryStore::new();
        seed_agent(&store, "agent-1", "user-1", true).await;
        seed_agent(&store, "agent-offline", "user-1", false).await;
        let identity = StaticIdentity::default()
            .with_user(TOKEN, "user-1")
            .with_user(OTHER_TOKEN, "user-2");
        let state = AppState::new(
            Config::new("http://127.0.0.1:9"),
            Arc::new(store.clone()),
            Arc::new(InMemoryAnalytics::new()),
            Arc::new(identity),
            Arc::new(reasoning),
        );
        (router(Arc::new(state)), store)
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn health_is_public() {
        let (app, _) = app(ScriptedReasoning::new()).await;
        let (status, body) = send(&app, get("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn missing_or_invalid_token_is_unauthorized() {
        let (app, _) = app(ScriptedReasoning::new()).await;
        let (status, body) = send(&app, get("/", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "Unauthorized"}));

        let (status, _) = send(&app, get("/", Some("forged"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unreachable_identity_provider_is_a_server_error() {
        struct Unreachable;

        #[async_trait::async_trait]
        impl crate::identity::IdentityProvider for Unreachable {
            async fn current_user(&self, _token: &str) -> anyhow::Result<Option<AuthUser>> {
                anyhow::bail!("connection refused")
            }
        }

        let state = AppState::new(
            Config::new("http://127.0.0.1:9"),
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryAnalytics::new()),
            Arc::new(Unreachable),
            Arc::new(ScriptedReasoning::new()),
        );
        let app = router(Arc::new(state));
        let (status, body) = send(&app, get("/", Some(TOKEN))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert!(body["details"].as_str().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn options_is_answered_without_auth() {
        let (app, _) = app(ScriptedReasoning::new()).await;
        for uri in ["/", "/investigation/INV-1", "/anything"] {
            let req = Request::builder()
                .method("OPTIONS")
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            let (status, body) = send(&app, req).await;
            assert_eq!(status, StatusCode::OK, "{}", uri);
            assert_eq!(body, Value::Null);
        }
    }

    #[tokio::test]
    async fn create_requires_agent_and_issue() {
        let (app, _) = app(ScriptedReasoning::new()).await;
        let (status, body) = send(&app, post(json!({"issue": "disk full"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "agent_id and issue are required"}));

        let (status, _) = send(
            &app,
            post(json!({"agent_id": "agent-1", "issue": "x", "priority": "urgent"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_for_offline_agent_is_unavailable() {
        let (app, _) = app(ScriptedReasoning::new()).await;
        let (status, body) = send(
            &app,
            post(json!({"agent_id": "agent-offline", "issue": "disk full"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "Agent not connected via WebSocket");
        assert!(body["details"].is_string());

        let (status, _) = send(&app, post(json!({"agent_id": "ghost", "issue": "x"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let mut foreign = post(json!({"agent_id": "agent-1", "issue": "disk full"}));
        foreign.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {}", OTHER_TOKEN).parse().unwrap(),
        );
        let (status, body) = send(&app, foreign).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Access denied");
    }

    #[tokio::test]
    async fn create_then_read_back() {
        let (app, _) = app(ScriptedReasoning::new().answer("Clear /var/log.", "ep-1")).await;
        let (status, created) = send(
            &app,
            post(json!({"agent_id": "agent-1", "issue": "disk full", "priority": "high"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["status"], "completed");
        assert_eq!(created["tensorzero_response"], "Clear /var/log.");
        assert_eq!(created["episode_id"], "ep-1");
        let investigation_id = created["investigation_id"].as_str().unwrap().to_string();

        let (status, details) = send(
            &app,
            get(&format!("/?investigation_id={}", investigation_id), Some(TOKEN)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(details["investigation_id"], investigation_id.as_str());
        assert_eq!(details["priority"], "high");
        assert_eq!(details["initiated_by"], "user-1");
        assert_eq!(details["agent"]["id"], "agent-1");
        assert_eq!(details["inferences"], json!([]));

        let (_, again) = send(
            &app,
            get(&format!("/investigation/{}", investigation_id), Some(TOKEN)),
        )
        .await;
        assert_eq!(again, details);

        let (status, _) = send(
            &app,
            get(&format!("/investigation/{}", investigation_id), Some(OTHER_TOKEN)),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, list) = send(&app, get("/?page=1&limit=10", Some(TOKEN))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["investigations"].as_array().unwrap().len(), 1);
        assert_eq!(list["investigations"][0]["inference_count"], 0);
        assert_eq!(
            list["pagination"],
            json!({"page": 1, "limit": 10, "total": 1, "total_pages": 1, "has_next": false, "has_prev": false})
        );

        let (_, others) = send(&app, get("/", Some(OTHER_TOKEN))).await;
        assert_eq!(others["pagination"]["total"], 0);
    }

    #[tokio::test]
    async fn unknown_investigation_is_not_found() {
        let (app, _) = app(ScriptedReasoning::new()).await;
        let (status, body) = send(&app, get("/?investigation_id=INV-nonexistent", Some(TOKEN))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Investigation not found");
    }

    #[tokio::test]
    async fn inference_lookup_validates_id() {
        let (app, _) = app(ScriptedReasoning::new()).await;
        let (status, _) = send(&app, get("/?inference_id=not-a-uuid", Some(TOKEN))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(
            &app,
            get("/inference/0191c5a8-7d2e-7c31-9a55-3f1b2c4d5e6f", Some(TOKEN)),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn diagnostic_flow_over_http() {
        let (app, store) = app(
            ScriptedReasoning::new()
                .answer(r#"{"response_type":"diagnostic","commands":["df -h"]}"#, "ep-9")
                .answer("The /var partition is full.", "ep-9"),
        )
        .await;

        let agent_side = store.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                if let Some(pending) = agent_side.next_pending_for_agent("agent-1").await {
                    agent_side
                        .complete_pending(&pending.investigation_id, json!([{"exit_code": 0}]))
                        .await
                        .unwrap();
                    return;
                }
            }
        });

        let (status, created) =
            send(&app, post(json!({"agent_id": "agent-1", "issue": "disk full"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["status"], "completed_with_analysis");
        assert_eq!(created["continuation_analysis"], "The /var partition is full.");
        assert_eq!(created["agent_results"], json!([{"exit_code": 0}]));

        let investigation_id = created["investigation_id"].as_str().unwrap();
        let (status, pending) = send(
            &app,
            get(&format!("/pending/{}/wait", investigation_id), Some(TOKEN)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pending["status"], "completed");

        let (status, _) = send(&app, get("/pending/INV-nonexistent/wait", Some(TOKEN))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
