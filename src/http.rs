//! HTTP transport for the SomaAI backend.
//!
//! Axum router with the symptom-checker JSON endpoints under `/api`, guarded
//! by an origin check, CSRF tokens and per-client rate limits.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{ConnectInfo, DefaultBodyLimit, State, rejection::JsonRejection},
    http::{HeaderName, HeaderValue, Method, Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{
    cors::CorsLayer, set_header::SetResponseHeaderLayer, timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

use crate::clients::{CompletionClient, OpenRouterClient};
use crate::config::Config;
use crate::cosmic::add_cosmic_touch;
use crate::error::{Result, SomaError};
use crate::fallback::{
    fallback_questions, sample_analysis, sample_questions, soft_parse_analysis,
    unavailable_analysis,
};
use crate::limits::{CsrfTokens, RateLimiter, Sweep, spawn_sweeper};
use crate::normalize::StructuredAnalysis;
use crate::pipeline::{AnalysisPipeline, validate_symptom};
use crate::prompts::ConcernKind;
use crate::redact::{redact_body, redact_headers};

pub const CSRF_HEADER: &str = "x-csrf-token";

/// Shared state for HTTP server
#[derive(Clone)]
pub struct HttpState {
    pub config: Arc<Config>,
    pub pipeline: Arc<AnalysisPipeline>,
    pub api_limiter: Arc<RateLimiter>,
    pub ai_limiter: Arc<RateLimiter>,
    pub csrf: Arc<CsrfTokens>,
}

impl HttpState {
    pub fn new(config: Arc<Config>, client: Arc<dyn CompletionClient>) -> Self {
        let limits = &config.limits;
        Self {
            pipeline: Arc::new(AnalysisPipeline::new(client)),
            api_limiter: Arc::new(RateLimiter::new(
                Duration::from_secs(limits.api_window_sec),
                limits.api_max_requests,
            )),
            ai_limiter: Arc::new(RateLimiter::new(
                Duration::from_secs(limits.ai_window_sec),
                limits.ai_max_requests,
            )),
            csrf: Arc::new(CsrfTokens::new(Duration::from_secs(limits.csrf_ttl_sec))),
            config,
        }
    }

    fn log_body(&self, route: &str, body: &Value) {
        if self.config.runtime.dev_logging {
            debug!(route, body = %redact_body(body), "Request body");
        }
    }

    fn apply_cosmic(&self, analysis: &mut StructuredAnalysis) {
        if self.config.cosmic.enabled {
            add_cosmic_touch(
                analysis,
                self.config.cosmic.probability,
                &mut rand::thread_rng(),
            );
        }
    }
}

/// Rate-limit and CSRF identity of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

impl ClientKey {
    /// Peer address when known, else the first `X-Forwarded-For` hop.
    pub fn from_request(req: &Request<Body>) -> Self {
        if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
            return Self(addr.ip().to_string());
        }
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        Self(forwarded.unwrap_or("unknown").to_string())
    }
}

impl SomaError {
    fn status_code(&self) -> StatusCode {
        match self {
            SomaError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            SomaError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SomaError::UpstreamError { status, .. } => match *status {
                429 => StatusCode::TOO_MANY_REQUESTS,
                400..=499 => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            SomaError::AnalysisFailed { source, .. } => source.status_code(),
            SomaError::Forbidden { .. } => StatusCode::FORBIDDEN,
            SomaError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            SomaError::MissingCredential
            | SomaError::NoJsonFound
            | SomaError::MalformedJson { .. }
            | SomaError::Config { .. }
            | SomaError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show a browser. Upstream details stay in the logs.
    fn public_message(&self) -> String {
        match self.root_cause() {
            SomaError::InvalidInput { message } | SomaError::Forbidden { message } => {
                message.clone()
            }
            SomaError::RateLimited { .. } => "Too many requests".to_string(),
            SomaError::MissingCredential => "service unavailable".to_string(),
            SomaError::UpstreamUnavailable { .. } => {
                "AI service temporarily unavailable".to_string()
            }
            SomaError::UpstreamError { status: 429, .. } => {
                "Rate limit exceeded, please try again later".to_string()
            }
            SomaError::UpstreamError { status: 400..=499, .. } => {
                "Invalid request to AI service".to_string()
            }
            _ => "Analysis service temporarily unavailable".to_string(),
        }
    }
}

impl IntoResponse for SomaError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let mut response = (status, Json(json!({ "error": self.public_message() }))).into_response();
        if let SomaError::RateLimited { retry_after } = &self
            && let Ok(val) = HeaderValue::from_str(&retry_after.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, val);
        }
        response
    }
}

fn json_body(body: std::result::Result<Json<Value>, JsonRejection>) -> Result<Value> {
    body.map(|Json(v)| v)
        .map_err(|e| SomaError::invalid_input(format!("invalid JSON body: {}", e.body_text())))
}

/// Non-blank string field, or `InvalidInput` with `message`.
fn text_field<'a>(body: &'a Value, field: &str, message: &str) -> Result<&'a str> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| SomaError::invalid_input(message))
}

/// Optional `type` field. Absent, null, or blank means no kind; any other
/// value must name a known concern kind.
fn concern_kind_from(value: Option<&Value>) -> Result<Option<ConcernKind>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => ConcernKind::parse(s)
            .map(Some)
            .ok_or_else(|| SomaError::invalid_input(r#"type must be "physical" or "mental""#)),
        Some(_) => Err(SomaError::invalid_input(r#"type must be "physical" or "mental""#)),
    }
}

/// Answers arrive as `{question_id: choice}`; non-string values are
/// stringified and anything other than an object is ignored.
fn answers_from(value: Option<&Value>) -> BTreeMap<String, String> {
    let Some(obj) = value.and_then(Value::as_object) else {
        return BTreeMap::new();
    };
    obj.iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect()
}

/// Liveness banner
pub async fn root_handler() -> impl IntoResponse {
    "SomaAI backend is running"
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn csrf_token_handler(
    State(state): State<HttpState>,
    Extension(client): Extension<ClientKey>,
) -> impl IntoResponse {
    let token = state.csrf.issue(&client.0, Instant::now());
    Json(json!({ "csrf_token": token }))
}

pub async fn generate_mcqs_handler(
    State(state): State<HttpState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let body = json_body(body)?;
    state.log_body("generate-mcqs", &body);
    let symptom = text_field(&body, "symptom", "symptom required and must be a string")?;
    let symptom = validate_symptom(symptom)?;
    let kind = concern_kind_from(body.get("type"))?;

    if !state.pipeline.has_credential() {
        return Ok(Json(json!({ "questions": sample_questions(), "sample": true })));
    }

    match state.pipeline.generate_mcqs(symptom, kind).await {
        Ok(questions) => Ok(Json(json!({ "questions": questions }))),
        Err(e) if e.is_soft_upstream_failure() || e.is_parse_failure() => {
            warn!(error = %e, "Question generation degraded to fallback set");
            Ok(Json(json!({ "questions": fallback_questions(), "fallback": true })))
        }
        Err(e) => Err(e),
    }
}

pub async fn analyze_handler(
    State(state): State<HttpState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let body = json_body(body)?;
    state.log_body("analyze", &body);
    let symptom = text_field(&body, "symptom", "symptom required and must be a string")?;
    let symptom = validate_symptom(symptom)?;
    let answers = answers_from(body.get("answers"));

    if !state.pipeline.has_credential() {
        return Ok(Json(json!({ "result": sample_analysis(), "sample": true })));
    }

    match state.pipeline.analyze(symptom, &answers).await {
        Ok(mut analysis) => {
            state.apply_cosmic(&mut analysis);
            Ok(Json(json!({ "result": analysis })))
        }
        Err(e) if e.is_soft_upstream_failure() => {
            warn!(error = %e, "Upstream unavailable, serving fallback analysis");
            Ok(Json(json!({ "result": unavailable_analysis(symptom), "fallback": true })))
        }
        Err(SomaError::AnalysisFailed {
            source,
            raw: Some(raw),
        }) if source.is_parse_failure() => {
            warn!(error = %source, "Unparseable analysis output, serving soft parse");
            Ok(Json(json!({ "result": soft_parse_analysis(&raw), "fallback": true })))
        }
        Err(e) => Err(e),
    }
}

pub async fn quick_query_handler(
    State(state): State<HttpState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let body = json_body(body)?;
    state.log_body("quick-query", &body);
    let question = text_field(&body, "question", "Question is required.")?;
    let answer = state.pipeline.quick_query(question).await?;
    Ok(Json(json!({ "answer": answer })))
}

pub async fn cosmic_insight_handler(
    State(state): State<HttpState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let body = json_body(body)?;
    state.log_body("cosmic-insight", &body);
    let missing = "Context with symptom and summary is required.";
    let context = body
        .get("context")
        .ok_or_else(|| SomaError::invalid_input(missing))?;
    let symptom = text_field(context, "symptom", missing)?;
    let summary = text_field(context, "summary", missing)?;
    let insight = state.pipeline.cosmic_insight(symptom, summary).await?;
    Ok(Json(json!({ "insight": insight })))
}

async fn client_key_layer(mut req: Request<Body>, next: Next) -> Response {
    let key = ClientKey::from_request(&req);
    req.extensions_mut().insert(key);
    next.run(req).await
}

fn client_of(req: &Request<Body>) -> String {
    req.extensions()
        .get::<ClientKey>()
        .map(|k| k.0.clone())
        .unwrap_or_else(|| ClientKey::from_request(req).0)
}

async fn api_rate_limit(
    State(state): State<HttpState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let client = client_of(&req);
    if let Err(retry_after) = state.api_limiter.check(&client, Instant::now()) {
        return SomaError::RateLimited { retry_after }.into_response();
    }
    next.run(req).await
}

async fn ai_rate_limit(
    State(state): State<HttpState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let client = client_of(&req);
    if let Err(retry_after) = state.ai_limiter.check(&client, Instant::now()) {
        return SomaError::RateLimited { retry_after }.into_response();
    }
    next.run(req).await
}

/// `Origin` (or `Referer` when absent) must start with the allowed origin.
async fn origin_guard(
    State(state): State<HttpState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let headers = req.headers();
    let source = headers
        .get(header::ORIGIN)
        .or_else(|| headers.get(header::REFERER))
        .and_then(|v| v.to_str().ok());
    let rejection = match source {
        None => Some("Missing origin/referer header"),
        Some(src) if !src.starts_with(state.config.allowed_origin()) => {
            warn!(origin = src, "Rejected request from foreign origin");
            Some("Forbidden origin")
        }
        Some(_) => None,
    };
    if let Some(message) = rejection {
        return SomaError::Forbidden {
            message: message.to_string(),
        }
        .into_response();
    }
    next.run(req).await
}

async fn csrf_guard(
    State(state): State<HttpState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let client = client_of(&req);
    let token = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if token.is_empty() {
        return SomaError::Forbidden {
            message: "CSRF token required".to_string(),
        }
        .into_response();
    }
    if !state.csrf.validate(token, &client, Instant::now()) {
        return SomaError::Forbidden {
            message: "Invalid CSRF token".to_string(),
        }
        .into_response();
    }
    next.run(req).await
}

async fn log_request(req: Request<Body>, next: Next) -> Response {
    debug!(
        method = %req.method(),
        path = req.uri().path(),
        headers = %redact_headers(req.headers()),
        "Incoming request"
    );
    next.run(req).await
}

fn cors_layer(origin: &str) -> Result<CorsLayer> {
    let origin = HeaderValue::from_str(origin).map_err(|e| SomaError::Config {
        message: format!("allowed origin is not a valid header value: {e}"),
    })?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(CSRF_HEADER),
        ]))
}

/// Build the full application router.
pub fn build_router(state: HttpState) -> Result<Router> {
    let config = Arc::clone(&state.config);

    // route_layer: the last one added runs first
    let ai_routes = Router::new()
        .route("/generate-mcqs", post(generate_mcqs_handler))
        .route("/analyze", post(analyze_handler))
        .route("/quick-query", post(quick_query_handler))
        .route("/cosmic-insight", post(cosmic_insight_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), ai_rate_limit))
        .route_layer(middleware::from_fn_with_state(state.clone(), csrf_guard))
        .route_layer(middleware::from_fn_with_state(state.clone(), origin_guard));

    let api = Router::new()
        .route("/health", get(health_handler))
        .route("/csrf-token", get(csrf_token_handler))
        .merge(ai_routes)
        .layer(middleware::from_fn_with_state(state.clone(), api_rate_limit))
        .layer(middleware::from_fn(client_key_layer));

    let mut app = Router::new()
        .route("/", get(root_handler))
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(config.server.body_limit_bytes));

    if config.runtime.dev_logging {
        app = app.layer(middleware::from_fn(log_request));
    }

    // Two sequential upstream calls per analysis, plus slack.
    let request_timeout = Duration::from_millis(
        config
            .runtime
            .upstream_timeout_ms
            .saturating_mul(2)
            .saturating_add(5_000),
    );

    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(cors_layer(config.allowed_origin())?)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("cross-origin-resource-policy"),
            HeaderValue::from_static("same-origin"),
        ))
        .with_state(state);

    Ok(app)
}

/// Start the HTTP server
pub async fn start_http_server(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let client = OpenRouterClient::from_config(&config)?;
    let state = HttpState::new(Arc::clone(&config), Arc::new(client));

    let stores: Vec<Box<dyn Sweep>> = vec![
        Box::new(state.api_limiter.store()),
        Box::new(state.ai_limiter.store()),
        Box::new(state.csrf.store()),
    ];
    let sweeper = spawn_sweeper(
        Duration::from_secs(config.limits.sweep_interval_sec),
        stores,
    );

    let app = build_router(state)?;
    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind HTTP listener: {}", e))?;

    info!(
        bind = %config.server.bind,
        origin = config.allowed_origin(),
        "Starting SomaAI HTTP server"
    );

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;
    sweeper.abort();
    served.map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_statuses_map_to_http() {
        let cases = [(429, 429), (401, 400), (404, 400), (500, 500), (502, 500)];
        for (upstream, expected) in cases {
            let err = SomaError::UpstreamError {
                status: upstream,
                body: String::new(),
            };
            assert_eq!(err.status_code().as_u16(), expected, "upstream {upstream}");
        }
    }

    #[test]
    fn analysis_failed_uses_cause_status() {
        let err = SomaError::analysis_failed(
            SomaError::UpstreamError {
                status: 429,
                body: String::new(),
            },
            None,
        );
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            SomaError::analysis_failed(SomaError::NoJsonFound, Some("x".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let resp = SomaError::RateLimited { retry_after: 42 }.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn missing_credential_message_is_generic() {
        assert_eq!(
            SomaError::MissingCredential.public_message(),
            "service unavailable"
        );
        let upstream = SomaError::UpstreamError {
            status: 401,
            body: "sk-or-v1-leaked".into(),
        };
        assert!(!upstream.public_message().contains("sk-or"));
    }

    #[test]
    fn client_key_prefers_forwarded_header_without_peer() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(ClientKey::from_request(&req).0, "203.0.113.7");

        let bare = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(ClientKey::from_request(&bare).0, "unknown");
    }

    #[tokio::test]
    async fn oversized_upstream_timeout_still_builds_router() {
        let mut config = Config::default();
        config.runtime.upstream_timeout_ms = u64::MAX;
        let config = Arc::new(config);
        let client = OpenRouterClient::from_config(&config).unwrap();
        assert!(build_router(HttpState::new(config, Arc::new(client))).is_ok());
    }

    #[test]
    fn concern_kind_accepts_known_labels_or_nothing() {
        assert_eq!(concern_kind_from(None).unwrap(), None);
        assert_eq!(concern_kind_from(Some(&Value::Null)).unwrap(), None);
        assert_eq!(concern_kind_from(Some(&json!(" "))).unwrap(), None);
        assert_eq!(
            concern_kind_from(Some(&json!("Mental"))).unwrap(),
            Some(ConcernKind::Mental)
        );
        for bad in [json!("spiritual"), json!(3), json!(["physical"])] {
            assert!(matches!(
                concern_kind_from(Some(&bad)),
                Err(SomaError::InvalidInput { .. })
            ));
        }
    }

    #[test]
    fn answers_are_stringified() {
        let answers = answers_from(Some(&json!({"onset": "Today", "scale": 7})));
        assert_eq!(answers["onset"], "Today");
        assert_eq!(answers["scale"], "7");
        assert!(answers_from(Some(&json!(["x"]))).is_empty());
    }
}
