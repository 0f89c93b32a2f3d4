// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Web UI and JSON API for MathLens

use async_trait::async_trait;
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection},
        DefaultBodyLimit, FromRequest, FromRequestParts, Multipart, Path, Request, State,
    },
    http::{header, request::Parts, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::format::render_answer;
use crate::gemini::VisionModel;
use crate::imaging::{self, Rotation};
use crate::session::{CapturedImage, Session, SessionPhase, SessionStore, TurnRole};
use crate::tutor::Tutor;
use crate::MathLensError;

const INDEX_TEMPLATE: &str = include_str!("index.html");
const DOWNLOAD_NAME: &str = "captured_image.jpg";
/// Room for multipart boundaries and part headers on top of the file itself
const ENVELOPE_HEADROOM: usize = 64 * 1024;

/// Shared application state
pub struct AppState {
    pub config: AppConfig,
    pub store: SessionStore,
    pub tutor: Tutor,
    templates: Environment<'static>,
}

impl AppState {
    pub fn new(config: AppConfig, model: Arc<dyn VisionModel>) -> crate::Result<Self> {
        let mut templates = Environment::new();
        templates.add_template("index.html", INDEX_TEMPLATE)?;

        let tutor = Tutor::new(model, config.prompts.clone(), config.image.clone());
        Ok(Self {
            config,
            store: SessionStore::new(),
            tutor,
            templates,
        })
    }
}

/// Create the web application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.image.max_upload_bytes + ENVELOPE_HEADROOM;

    Router::new()
        // Pages
        .route("/", get(index_page))
        // API endpoints
        .route("/api/health", get(api_health))
        .route("/api/sessions", post(api_create_session))
        .route("/api/sessions/:id", get(api_get_session).delete(api_delete_session))
        .route("/api/sessions/:id/image", post(api_upload_image))
        .route("/api/sessions/:id/image.jpg", get(api_download_image))
        .route("/api/sessions/:id/rotate", post(api_rotate_image))
        .route("/api/sessions/:id/solve", post(api_solve))
        .route("/api/sessions/:id/doubts", post(api_ask_doubt))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Errors ===

fn status_for(err: &MathLensError) -> StatusCode {
    match err {
        MathLensError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        MathLensError::InvalidInput(_)
        | MathLensError::UnsupportedRotation(_)
        | MathLensError::Image(_) => StatusCode::BAD_REQUEST,
        MathLensError::NoImage
        | MathLensError::NoSolution
        | MathLensError::SessionChanged => StatusCode::CONFLICT,
        MathLensError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        MathLensError::Api { .. }
        | MathLensError::Http(_)
        | MathLensError::EmptyResponse => StatusCode::BAD_GATEWAY,
        MathLensError::Config(_)
        | MathLensError::FileSystem(_)
        | MathLensError::Json(_)
        | MathLensError::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for MathLensError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, MathLensError>;

impl From<PathRejection> for MathLensError {
    fn from(rejection: PathRejection) -> Self {
        MathLensError::InvalidInput(rejection.body_text())
    }
}

impl From<JsonRejection> for MathLensError {
    fn from(rejection: JsonRejection) -> Self {
        MathLensError::InvalidInput(rejection.body_text())
    }
}

impl From<MultipartRejection> for MathLensError {
    fn from(rejection: MultipartRejection) -> Self {
        MathLensError::InvalidInput(rejection.body_text())
    }
}

// === Extractors ===

/// Session id from the path; a malformed id is a JSON 400
struct SessionId(Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SessionId {
    type Rejection = MathLensError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> ApiResult<Self> {
        let Path(id) = Path::<Uuid>::from_request_parts(parts, state).await?;
        Ok(Self(id))
    }
}

/// `Json` whose rejections use the API error body
struct ApiJson<T>(T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = MathLensError;

    async fn from_request(req: Request, state: &S) -> ApiResult<Self> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

// === Views ===

#[derive(Serialize)]
struct TurnView {
    role: TurnRole,
    text: String,
    html: String,
    at: DateTime<Utc>,
}

#[derive(Serialize)]
struct SessionView {
    id: Uuid,
    phase: SessionPhase,
    created_at: DateTime<Utc>,
    image_mime: Option<String>,
    solution: Option<String>,
    solution_html: Option<String>,
    history: Vec<TurnView>,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            phase: session.phase(),
            created_at: session.created_at,
            image_mime: session.image().map(|i| i.mime_type.clone()),
            solution: session.solution().map(String::from),
            solution_html: session.solution().map(render_answer),
            history: session.history()
                .iter()
                .map(|t| TurnView {
                    role: t.role,
                    text: t.text.clone(),
                    html: render_answer(&t.text),
                    at: t.at,
                })
                .collect(),
        }
    }
}

// === Page Handlers ===

async fn index_page(State(state): State<Arc<AppState>>) -> ApiResult<Html<String>> {
    let page = state.templates.get_template("index.html")?.render(context! {
        model => state.tutor.model_name(),
        max_upload_mb => state.config.image.max_upload_bytes / (1024 * 1024),
        download_name => DOWNLOAD_NAME,
    })?;
    Ok(Html(page))
}

// === API Handlers ===

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model: String,
    sessions: usize,
}

async fn api_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model: state.tutor.model_name().to_string(),
        sessions: state.store.len(),
    })
}

#[derive(Serialize)]
struct CreatedResponse {
    id: Uuid,
}

async fn api_create_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let id = state.store.create();
    (StatusCode::CREATED, Json(CreatedResponse { id }))
}

async fn api_get_session(
    State(state): State<Arc<AppState>>,
    SessionId(id): SessionId,
) -> ApiResult<Json<SessionView>> {
    let session = state.store.get(&id)?;
    Ok(Json(SessionView::from(&session)))
}

async fn api_delete_session(
    State(state): State<Arc<AppState>>,
    SessionId(id): SessionId,
) -> ApiResult<StatusCode> {
    state.store.remove(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn api_upload_image(
    State(state): State<Arc<AppState>>,
    SessionId(id): SessionId,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<SessionView>> {
    let mut multipart = multipart?;
    let limit = state.config.image.max_upload_bytes;
    let multipart_error = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            MathLensError::PayloadTooLarge(limit)
        } else {
            MathLensError::InvalidInput(e.body_text())
        }
    };

    let mut bytes = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("image") {
            bytes = Some(field.bytes().await.map_err(multipart_error)?);
            break;
        }
    }
    let bytes = bytes
        .filter(|b| !b.is_empty())
        .ok_or_else(|| MathLensError::InvalidInput("Missing 'image' field".to_string()))?;
    if bytes.len() > limit {
        return Err(MathLensError::PayloadTooLarge(limit));
    }

    let mime_type = imaging::detect_mime(&bytes)?;
    imaging::decode(&bytes)?;

    let session = state.store.with_session(&id, |session| {
        session.capture(CapturedImage::new(bytes.to_vec(), mime_type));
        Ok(session.clone())
    })?;
    info!("Captured {} image ({} bytes) for session {}", mime_type, bytes.len(), id);

    Ok(Json(SessionView::from(&session)))
}

async fn api_download_image(
    State(state): State<Arc<AppState>>,
    SessionId(id): SessionId,
) -> ApiResult<Response> {
    let session = state.store.get(&id)?;
    let image = session.image().ok_or(MathLensError::NoImage)?;
    let jpeg = imaging::to_jpeg(&image.bytes, state.config.image.jpeg_quality)?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", DOWNLOAD_NAME)),
        ],
        jpeg,
    )
        .into_response())
}

#[derive(Deserialize)]
struct RotateRequest {
    degrees: i32,
}

async fn api_rotate_image(
    State(state): State<Arc<AppState>>,
    SessionId(id): SessionId,
    ApiJson(request): ApiJson<RotateRequest>,
) -> ApiResult<Json<SessionView>> {
    let rotation = Rotation::from_degrees(request.degrees)?;

    let snapshot = state.store.get(&id)?;
    let image = snapshot.image().ok_or(MathLensError::NoImage)?;
    let rotated = imaging::rotate_bytes(&image.bytes, rotation, state.config.image.jpeg_quality)?;

    let session = state.store.with_session(&id, |session| {
        if session.revision() != snapshot.revision() {
            return Err(MathLensError::SessionChanged);
        }
        session.replace_image_bytes(rotated, "image/jpeg")?;
        Ok(session.clone())
    })?;
    info!("Rotated image for session {} by {} degrees", id, rotation.degrees());

    Ok(Json(SessionView::from(&session)))
}

#[derive(Serialize)]
struct SolveResponse {
    solution: String,
    html: String,
}

async fn api_solve(
    State(state): State<Arc<AppState>>,
    SessionId(id): SessionId,
) -> ApiResult<Json<SolveResponse>> {
    let solution = state.tutor.solve(&state.store, &id).await?;
    let html = render_answer(&solution);
    Ok(Json(SolveResponse { solution, html }))
}

#[derive(Deserialize)]
struct DoubtRequest {
    doubt: String,
}

#[derive(Serialize)]
struct DoubtResponse {
    doubt: String,
    clarification: String,
    html: String,
}

async fn api_ask_doubt(
    State(state): State<Arc<AppState>>,
    SessionId(id): SessionId,
    ApiJson(request): ApiJson<DoubtRequest>,
) -> ApiResult<Json<DoubtResponse>> {
    let clarification = state.tutor.clarify(&state.store, &id, &request.doubt).await?;
    let html = render_answer(&clarification.answer);
    Ok(Json(DoubtResponse {
        doubt: clarification.doubt,
        clarification: clarification.answer,
        html,
    }))
}

/// Start the web server with config and a vision model
pub async fn start_server(config: AppConfig, model: Arc<dyn VisionModel>) -> crate::Result<()> {
    let addr = format!("{}:{}", config.web.host, config.web.port);
    let state = Arc::new(AppState::new(config, model)?);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Web UI available at http://{}", addr);

    let router = create_router(state);
    axum::serve(listener, router).await
        .map_err(|e| crate::MathLensError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::tests::sample_png;
    use crate::tutor::tests::ScriptedModel;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const BOUNDARY: &str = "mathlens-test-boundary";

    fn app(answers: Vec<crate::Result<String>>) -> (Router, Arc<AppState>) {
        app_with(AppConfig::default(), answers)
    }

    fn app_with(config: AppConfig, answers: Vec<crate::Result<String>>) -> (Router, Arc<AppState>) {
        let model = Arc::new(ScriptedModel::new(answers));
        let state = Arc::new(AppState::new(config, model).unwrap());
        (create_router(state.clone()), state)
    }

    fn multipart_body(field: &str, bytes: &[u8]) -> Body {
        let mut body = Vec::new();
        body.extend_from_slice(format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"photo.png\"\r\nContent-Type: image/png\r\n\r\n"
        ).as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        Body::from(body)
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let (status, bytes) = send(router, request).await;
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    async fn create_session(router: &Router) -> String {
        let (status, body) = send_json(router, "POST", "/api/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    async fn upload(router: &Router, id: &str, bytes: &[u8]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/sessions/{id}/image"))
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(multipart_body("image", bytes))
            .unwrap();
        let (status, bytes) = send(router, request).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_index_page_renders() {
        let (router, _) = app(vec![]);
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, body) = send(&router, request).await;

        assert_eq!(status, StatusCode::OK);
        let html = String::from_utf8(body).unwrap();
        assert!(html.contains("getUserMedia"));
        assert!(html.contains("scripted"));
    }

    #[tokio::test]
    async fn test_full_flow() {
        let (router, state) = app(vec![
            Ok("x^2 = 9 so x = 3".into()),
            Ok("Because 3^2 = 9".into()),
        ]);
        let id = create_session(&router).await;

        let (status, body) = upload(&router, &id, &sample_png(24, 16)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "captured");
        assert_eq!(body["image_mime"], "image/png");

        let (status, body) = send_json(&router, "POST", &format!("/api/sessions/{id}/solve"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["solution"], "x^2 = 9 so x = 3");
        assert!(body["html"].as_str().unwrap().contains("x<sup>2</sup>"));

        let (status, body) = send_json(
            &router,
            "POST",
            &format!("/api/sessions/{id}/doubts"),
            Some(json!({ "doubt": "why 3?" })),
        ).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["clarification"], "Because 3^2 = 9");

        let (status, body) = send_json(&router, "GET", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "clarifying");
        let history = body["history"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["role"], "doubt");
        assert_eq!(history[1]["role"], "clarification");

        let (status, _) = send_json(&router, "DELETE", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.store.is_empty());
    }

    #[tokio::test]
    async fn test_model_failure_is_an_error_not_a_solution() {
        let (router, _) = app(vec![Err(MathLensError::Api { status: 500, message: "boom".into() })]);
        let id = create_session(&router).await;
        upload(&router, &id, &sample_png(8, 8)).await;

        let (status, body) = send_json(&router, "POST", &format!("/api/sessions/{id}/solve"), None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("boom"));

        let (_, body) = send_json(&router, "GET", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(body["phase"], "captured");
        assert!(body["solution"].is_null());
    }

    #[tokio::test]
    async fn test_download_is_jpeg() {
        let (router, _) = app(vec![]);
        let id = create_session(&router).await;
        upload(&router, &id, &sample_png(10, 10)).await;

        let request = Request::builder()
            .uri(format!("/api/sessions/{id}/image.jpg"))
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"captured_image.jpg\""
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(imaging::detect_mime(&body).unwrap(), "image/jpeg");
    }

    #[tokio::test]
    async fn test_rotate() {
        let (router, state) = app(vec![]);
        let id = create_session(&router).await;
        upload(&router, &id, &sample_png(30, 20)).await;

        let uri = format!("/api/sessions/{id}/rotate");
        let (status, body) = send_json(&router, "POST", &uri, Some(json!({ "degrees": 90 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["image_mime"], "image/jpeg");

        let session = state.store.get(&Uuid::parse_str(&id).unwrap()).unwrap();
        let img = imaging::decode(&session.image().unwrap().bytes).unwrap();
        assert_eq!(image::GenericImageView::dimensions(&img), (20, 30));

        let (status, _) = send_json(&router, "POST", &uri, Some(json!({ "degrees": 45 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (router, _) = app(vec![]);
        let missing = Uuid::new_v4();

        let (status, _) = send_json(&router, "GET", &format!("/api/sessions/{missing}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let id = create_session(&router).await;
        let (status, _) = send_json(&router, "POST", &format!("/api/sessions/{id}/solve"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = upload(&router, &id, b"definitely not a picture").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        upload(&router, &id, &sample_png(8, 8)).await;
        let (status, _) = send_json(
            &router,
            "POST",
            &format!("/api/sessions/{id}/doubts"),
            Some(json!({ "doubt": "   " })),
        ).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_limit_applies_to_the_file() {
        let png = sample_png(8, 8);
        let mut config = AppConfig::default();
        config.image.max_upload_bytes = png.len();
        let (router, _) = app_with(config, vec![]);
        let id = create_session(&router).await;

        // Exactly at the limit: the multipart envelope does not count
        let (status, body) = upload(&router, &id, &png).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "captured");

        let mut over = png.clone();
        over.push(0);
        let (status, body) = upload(&router, &id, &over).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body["error"].as_str().unwrap().contains(&png.len().to_string()));

        // Far above it the body limit cuts the request off
        let huge = vec![0u8; png.len() + ENVELOPE_HEADROOM + 1];
        let (status, body) = upload(&router, &id, &huge).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_rejections_are_json_errors() {
        let (router, _) = app(vec![]);
        let id = create_session(&router).await;
        upload(&router, &id, &sample_png(8, 8)).await;

        let (status, body) = send_json(
            &router,
            "POST",
            &format!("/api/sessions/{id}/doubts"),
            Some(json!({ "nope": 1 })),
        ).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, body) = send_json(
            &router,
            "POST",
            &format!("/api/sessions/{id}/rotate"),
            Some(json!({ "degrees": "ninety" })),
        ).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, body) = send_json(&router, "GET", "/api/sessions/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/sessions/{id}/image"))
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("hello"))
            .unwrap();
        let (status, bytes) = send(&router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].is_string());
    }
}
