use std::cmp::Ordering;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream};
use repowatch_core::{Entity, Lifecycle};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::{Config, ConfigError};
use crate::events::Event;
use crate::scheduler::{CloneError, Cycle, Poller};

#[derive(Clone)]
pub struct AppState {
    poller: Arc<Poller>,
    config_path: PathBuf,
    started: Instant,
}

impl AppState {
    pub fn new(poller: Arc<Poller>, config_path: PathBuf) -> Self {
        Self {
            poller,
            config_path,
            started: Instant::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/repos", get(list_repos))
        .route("/api/repos/{name}", get(get_repo))
        .route("/api/repos/{name}/clone", post(clone_repo))
        .route("/api/config", get(get_config).put(put_config))
        .route("/api/health", get(health))
        .route("/api/events", get(events))
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
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Query string of `GET /api/repos`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Comma separated lifecycle names.
    pub lifecycle: Option<String>,
    pub visibility: Option<String>,
    pub cloned: Option<String>,
    pub language: Option<String>,
    /// `name` (default), `lastUpdate` or `lifecycle`.
    pub sort: Option<String>,
    /// `asc` (default) or `desc`.
    pub order: Option<String>,
}

fn present(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

pub fn filter_and_sort(mut repos: Vec<Entity>, q: &ListQuery) -> Vec<Entity> {
    if let Some(raw) = present(&q.lifecycle) {
        let wanted: Vec<&str> = raw.split(',').map(str::trim).collect();
        repos.retain(|r| wanted.contains(&r.lifecycle.as_str()));
    }
    if let Some(vis) = present(&q.visibility) {
        repos.retain(|r| r.visibility.as_str().eq_ignore_ascii_case(vis));
    }
    if let Some(cloned) = present(&q.cloned) {
        let cloned = cloned == "true";
        repos.retain(|r| r.cloned == cloned);
    }
    if let Some(lang) = present(&q.language) {
        repos.retain(|r| r.language.as_deref().is_some_and(|l| l.eq_ignore_ascii_case(lang)));
    }

    let key: fn(&Entity, &Entity) -> Ordering = match present(&q.sort).unwrap_or("name") {
        "lastUpdate" => |a, b| a.pushed_at.cmp(&b.pushed_at),
        "lifecycle" => |a, b| a.lifecycle.cmp(&b.lifecycle),
        _ => |a, b| a.name.cmp(&b.name),
    };
    let desc = present(&q.order) == Some("desc");
    repos.sort_by(|a, b| if desc { key(b, a) } else { key(a, b) });
    repos
}

async fn list_repos(State(st): State<AppState>, Query(q): Query<ListQuery>) -> Json<Vec<Entity>> {
    Json(filter_and_sort(st.poller.snapshot(), &q))
}

async fn get_repo(State(st): State<AppState>, Path(name): Path<String>) -> Response {
    match st.poller.find(&name) {
        Some(repo) => Json(repo).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "repository not found"),
    }
}

async fn clone_repo(State(st): State<AppState>, Path(name): Path<String>) -> Response {
    match st.poller.start_clone(&name).await {
        Ok(dest) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "clone started", "path": dest })),
        )
            .into_response(),
        Err(e @ CloneError::AlreadyCloned(_)) => error_response(StatusCode::CONFLICT, &e.to_string()),
        Err(e @ CloneError::InvalidName(_)) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

async fn get_config(State(st): State<AppState>) -> Json<Config> {
    Json(st.poller.config())
}

async fn put_config(State(st): State<AppState>, Json(cfg): Json<Config>) -> Result<Response, AppError> {
    if let Err(e @ ConfigError::Invalid(_)) = cfg.validate() {
        return Ok(error_response(StatusCode::BAD_REQUEST, &e.to_string()));
    }
    cfg.save_to(&st.config_path)?;
    st.poller.set_config(cfg.clone());
    st.poller.hub().publish(Event::ConfigUpdated(cfg.clone()));
    info!(path = %st.config_path.display(), "config updated");
    Ok(Json(cfg).into_response())
}

#[derive(Debug, Serialize)]
struct Health {
    uptime_secs: u64,
    last_local_poll: Option<DateTime<Utc>>,
    last_remote_poll: Option<DateTime<Utc>>,
    total_repos: usize,
    subscribers: usize,
    gh_available: bool,
    gh_authenticated: bool,
}

async fn health(State(st): State<AppState>) -> Json<Health> {
    let gh = st.poller.remote().probe().await;
    Json(Health {
        uptime_secs: st.started.elapsed().as_secs(),
        last_local_poll: st.poller.last_poll(Cycle::Local),
        last_remote_poll: st.poller.last_poll(Cycle::Remote),
        total_repos: st.poller.snapshot().len(),
        subscribers: st.poller.hub().subscriber_count().await,
        gh_available: gh.available,
        gh_authenticated: gh.authenticated,
    })
}

async fn events(
    State(st): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>> + Send>, AppError> {
    let hub = st.poller.hub().clone();
    let sub = hub
        .register()
        .await
        .ok_or_else(|| anyhow!("event hub is not running"))?;
    let id = sub.id();
    info!(subscriber = %id, "event stream opened");

    hub.send_direct(id, Event::Connected { client_id: id }).await;
    let snapshot = st.poller.snapshot();
    if !snapshot.is_empty() {
        hub.send_direct(id, Event::SnapshotUpdated(snapshot)).await;
    }

    // Ends when the hub closes the queue; dropping `sub` unregisters it.
    let stream = stream::unfold(sub, |mut sub| async move {
        let event = sub.recv().await?;
        Some((Ok(to_sse(&event)), sub))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &Event) -> SseEvent {
    match event.data().and_then(|d| serde_json::to_string(&d)) {
        Ok(data) => SseEvent::default().event(event.name()).data(data),
        Err(e) => {
            warn!(event = event.name(), error = %e, "event payload not serializable");
            SseEvent::default()
                .event("error")
                .data(json!({ "kind": "encode-failed", "message": e.to_string() }).to_string())
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(value: E) -> Self {
        Self(value.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "request failed");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, &self.0.to_string())
    }
}
