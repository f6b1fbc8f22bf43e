use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::{
    config::{AccessGate, AccessScreen},
    models::{BrandBrief, BriefUpdate, ImageData, ImageDataError, Stage},
    session::SessionError,
    studio::{Studio, StudioError},
};

#[derive(Clone)]
pub struct AppState {
    pub studio: Studio,
    pub access: AccessGate,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no API key configured")]
    Locked,
    #[error("invalid image: {0}")]
    Image(#[from] ImageDataError),
    #[error(transparent)]
    Studio(#[from] StudioError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Locked => StatusCode::FORBIDDEN,
            ApiError::Image(_) => StatusCode::BAD_REQUEST,
            ApiError::Studio(StudioError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::Studio(StudioError::Session(SessionError::Invalid { .. })) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Studio(StudioError::Session(_)) => StatusCode::CONFLICT,
            ApiError::Studio(StudioError::Snapshot(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::CONFLICT {
            tracing::warn!("⚠️ Rejected request: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Brief fields as sent by the client. The logo travels as base64 or a data URL;
/// an empty string removes it.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BriefRequest {
    pub description: Option<String>,
    pub url: Option<String>,
    pub logo: Option<String>,
    pub target_audience: Option<String>,
    pub tone: Option<String>,
    pub creative_direction: Option<String>,
    pub product_name: Option<String>,
}

impl BriefRequest {
    fn into_update(self) -> Result<BriefUpdate, ImageDataError> {
        let logo = match self.logo.as_deref().map(str::trim) {
            None => None,
            Some("") => Some(None),
            Some(encoded) => Some(Some(ImageData::from_base64(encoded)?)),
        };
        Ok(BriefUpdate {
            description: self.description,
            url: self.url,
            logo,
            target_audience: self.target_audience,
            tone: self.tone,
            creative_direction: self.creative_direction,
            product_name: self.product_name,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SourceImageRequest {
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectRequest {
    pub concept_id: String,
    pub cta: String,
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub instruction: String,
}

#[derive(Debug, Deserialize)]
pub struct DismissQuery {
    pub stage: Option<Stage>,
}

pub fn router(state: AppState) -> Router {
    let sessions = Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/brief", put(update_brief))
        .route("/api/sessions/:id/source-image", put(set_source_image))
        .route("/api/sessions/:id/autofill", post(auto_fill))
        .route("/api/sessions/:id/analyze", post(analyze))
        .route("/api/sessions/:id/select", post(select_concept))
        .route("/api/sessions/:id/edit", post(edit_image))
        .route("/api/sessions/:id/change-concept", post(change_concept))
        .route("/api/sessions/:id/reset", post(reset))
        .route("/api/sessions/:id/errors", delete(dismiss_errors))
        .route("/api/sessions/:id/prompt", get(prompt_summary))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_credential));

    Router::new()
        .route("/api/access", get(access))
        .merge(sessions)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn require_credential(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match state.access.screen() {
        AccessScreen::Studio => next.run(request).await,
        AccessScreen::SelectKey => ApiError::Locked.into_response(),
    }
}

pub async fn access(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "screen": state.access.screen() }))
}

pub async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<BriefRequest>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let update = body.map(|Json(b)| b).unwrap_or_default().into_update()?;
    let mut brief = BrandBrief::default();
    brief.apply(update);
    let id = state.studio.create_session(brief).id;
    Ok((StatusCode::CREATED, Json(state.studio.snapshot(id)?)))
}

pub async fn get_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    Ok(Json(state.studio.snapshot(id)?))
}

pub async fn delete_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.studio.delete_session(id)?;
    tracing::info!("🗑️ Deleted session {}", id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_brief(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<BriefRequest>,
) -> ApiResult<Json<Value>> {
    state.studio.update_brief(id, body.into_update()?)?;
    Ok(Json(state.studio.snapshot(id)?))
}

pub async fn set_source_image(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<SourceImageRequest>,
) -> ApiResult<Json<Value>> {
    let image = match body.image.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(encoded) => Some(ImageData::from_base64(encoded)?),
    };
    state.studio.set_source_image(id, image)?;
    Ok(Json(state.studio.snapshot(id)?))
}

pub async fn auto_fill(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.studio.auto_fill(id).await?;
    Ok(Json(state.studio.snapshot(id)?))
}

pub async fn analyze(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.studio.analyze(id).await?;
    Ok(Json(state.studio.snapshot(id)?))
}

// Generation keeps running after the response; clients poll the session.
pub async fn select_concept(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<SelectRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    state.studio.select_concept(id, &body.concept_id, &body.cta)?;
    Ok((StatusCode::ACCEPTED, Json(state.studio.snapshot(id)?)))
}

pub async fn edit_image(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<EditRequest>,
) -> ApiResult<Json<Value>> {
    state.studio.edit_image(id, &body.instruction).await?;
    Ok(Json(state.studio.snapshot(id)?))
}

pub async fn change_concept(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.studio.change_concept(id)?;
    Ok(Json(state.studio.snapshot(id)?))
}

pub async fn reset(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.studio.reset(id)?;
    Ok(Json(state.studio.snapshot(id)?))
}

pub async fn dismiss_errors(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Query(query): Query<DismissQuery>,
) -> ApiResult<Json<Value>> {
    state.studio.dismiss_errors(id, query.stage)?;
    Ok(Json(state.studio.snapshot(id)?))
}

pub async fn prompt_summary(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let prompt = state.studio.prompt_summary(id)?;
    Ok(Json(json!({ "prompt": prompt })))
}
