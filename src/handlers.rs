// HTTP surface: thin handlers over the service layer

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    AuthRequest, Campaign, CampaignUpdate, CampaignView, ContributeRequest,
    CreateCampaignRequest, LinkWalletRequest, PostUpdateRequest, SessionResponse,
    UpdateCampaignRequest, Wallet,
};
use crate::repository::Database;
use crate::{service, AppState};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/campaigns", get(list_campaigns).post(create_campaign))
        .route(
            "/api/campaigns/:slug",
            get(get_campaign).patch(edit_campaign).delete(delete_campaign),
        )
        .route("/api/campaigns/:slug/derive-address", post(derive_address))
        .route("/api/campaigns/:slug/publish", post(publish))
        .route("/api/campaigns/:slug/close-early", post(close_early))
        .route("/api/campaigns/:slug/finalize", post(finalize))
        .route("/api/campaigns/:slug/refund", post(claim_refund))
        .route("/api/campaigns/:slug/contribute", post(contribute))
        .route(
            "/api/campaigns/:slug/watch",
            post(watch_campaign).delete(unwatch_campaign),
        )
        .route("/api/campaigns/:slug/activity", get(campaign_activity))
        .route(
            "/api/campaigns/:slug/updates",
            get(list_updates).post(post_update),
        )
        .route("/api/wallets", get(list_wallets).post(link_wallet))
        .route("/api/wallets/:id/primary", post(set_primary_wallet))
        .with_state(state)
}

/// Resolve the bearer token to an authenticated identity. Mutating routes
/// fail with `Unauthenticated` when no session is presented.
async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<Uuid> {
    maybe_user(state, headers)
        .await?
        .ok_or(Error::Unauthenticated)
}

async fn maybe_user(state: &AppState, headers: &HeaderMap) -> Result<Option<Uuid>> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|t| t.parse::<Uuid>().ok())
        .ok_or(Error::Unauthenticated)?;
    let user = Database::session_user(&state.db, token)
        .await?
        .ok_or(Error::Unauthenticated)?;
    Ok(Some(user))
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_health = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();

    Json(json!({
        "status": if db_health { "healthy" } else { "unhealthy" },
        "database": if db_health { "up" } else { "down" },
        "chain": if state.simulator.is_some() { "mock" } else { "gateway" },
    }))
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AuthRequest>,
) -> Result<Json<SessionResponse>> {
    Ok(Json(service::register(&state, &req.username).await?))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AuthRequest>,
) -> Result<Json<SessionResponse>> {
    Ok(Json(service::login(&state, &req.username).await?))
}

async fn list_campaigns(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Campaign>>> {
    Ok(Json(service::list_campaigns(&state).await?))
}

async fn create_campaign(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<Json<Campaign>> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(service::create_campaign(&state, user, req).await?))
}

async fn get_campaign(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<CampaignView>> {
    let viewer = maybe_user(&state, &headers).await?;
    Ok(Json(service::campaign_view(&state, viewer, &slug).await?))
}

async fn edit_campaign(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(req): Json<UpdateCampaignRequest>,
) -> Result<Json<Campaign>> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(service::edit_campaign(&state, user, &slug, req).await?))
}

async fn delete_campaign(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let user = require_user(&state, &headers).await?;
    service::delete_campaign(&state, user, &slug).await?;
    Ok(Json(json!({ "deleted": true })))
}

async fn derive_address(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<Campaign>> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(service::retry_derivation(&state, user, &slug).await?))
}

async fn publish(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<Campaign>> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(service::publish(&state, user, &slug).await?))
}

async fn close_early(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<Campaign>> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(service::close_early(&state, user, &slug).await?))
}

async fn finalize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<crate::chain::TxReceipt>> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(service::finalize(&state, user, &slug).await?))
}

async fn claim_refund(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<crate::chain::TxReceipt>> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(service::claim_refund(&state, user, &slug).await?))
}

async fn contribute(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Json(req): Json<ContributeRequest>,
) -> Result<Json<serde_json::Value>> {
    let total = service::contribute(&state, &slug, req).await?;
    Ok(Json(json!({ "contributed_total": total })))
}

async fn watch_campaign(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let started = service::watch_campaign(&state, &slug).await?;
    Ok(Json(json!({ "watching": true, "started": started })))
}

async fn unwatch_campaign(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let stopped = service::unwatch_campaign(&state, &slug).await?;
    Ok(Json(json!({ "watching": false, "stopped": stopped })))
}

async fn campaign_activity(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<crate::reconciler::PledgeNotification>>> {
    Ok(Json(service::campaign_activity(&state, &slug).await?))
}

async fn list_updates(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<Vec<CampaignUpdate>>> {
    let viewer = maybe_user(&state, &headers).await?;
    Ok(Json(service::list_updates(&state, viewer, &slug).await?))
}

async fn post_update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(req): Json<PostUpdateRequest>,
) -> Result<Json<CampaignUpdate>> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(service::post_update(&state, user, &slug, req).await?))
}

async fn list_wallets(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Wallet>>> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(service::list_wallets(&state, user).await?))
}

async fn link_wallet(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<LinkWalletRequest>,
) -> Result<Json<Wallet>> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(service::link_wallet(&state, user, req).await?))
}

async fn set_primary_wallet(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let user = require_user(&state, &headers).await?;
    service::set_primary_wallet(&state, user, id).await?;
    Ok(Json(json!({ "primary": id })))
}
