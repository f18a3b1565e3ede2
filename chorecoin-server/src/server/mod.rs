mod acl;
pub mod auth;
mod config;

use std::collections::HashMap;
use std::sync::Arc;

use crate::chores::{self, ChoreError, TaskDraft};
use crate::server::auth::AuthCtx;
use crate::storage::Store;
use crate::storage::models::{HistoryRecord, Kid, Task};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::{Method, StatusCode, header},
    routing::{delete, get, post},
};
use bcrypt::verify;
use chorecoin_shared::api;
use chorecoin_shared::auth::Role;
pub use config::{AppConfig, ConfigError, KidConfig, ParentConfig, RewardConfig, UserConfig};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

type BalanceCacheMap = Arc<Mutex<HashMap<i32, Arc<Mutex<Option<i32>>>>>>;
type BalanceGuard<'a> = MutexGuard<'a, Option<i32>>;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    // Cached currency per kid. None => re-read from the store
    balances: BalanceCacheMap,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store) -> Self {
        Self {
            config,
            store,
            balances: Default::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    async fn kid_mutex(&self, kid_id: i32) -> Arc<Mutex<Option<i32>>> {
        let mut map = self.balances.lock().await;
        map.entry(kid_id).or_default().clone()
    }

    async fn currency(&self, kid_id: i32, guard: &mut BalanceGuard<'_>) -> Result<i32, AppError> {
        if let Some(v) = **guard {
            return Ok(v);
        }
        let v = chores::get_currency(&self.store, kid_id).await?;
        **guard = Some(v);
        Ok(v)
    }

    async fn invalidate_currency(&self, kid_id: i32) {
        let kid_mutex = self.kid_mutex(kid_id).await;
        kid_mutex.lock().await.take();
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route("/api/v1/auth/logout", post(api_auth_logout))
        .route("/api/v1/me", get(api_me))
        .route("/api/v1/kids", get(api_list_kids))
        .route("/api/v1/kids/{id}", get(api_get_kid))
        .route("/api/v1/kids/{id}/access", post(api_kid_access))
        .route("/api/v1/kids/{id}/tasks", get(api_list_kid_tasks))
        .route("/api/v1/tasks", get(api_list_tasks).post(api_create_task))
        .route("/api/v1/tasks/{id}", delete(api_delete_task))
        .route("/api/v1/tasks/{id}/complete", post(api_complete_task))
        .route("/api/v1/history", get(api_list_history))
        .route("/api/v1/rewards", get(api_list_rewards))
        .with_state(state.clone())
        // outermost first: bearer check, span fields, then ACL
        .layer(middleware::from_fn(acl::enforce_acl))
        .layer(middleware::from_fn(set_auth_span_fields))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            username = tracing::field::Empty,
            role = tracing::field::Empty,
            kid_id = tracing::field::Empty
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/v1/version", get(api_version))
        .route("/api/v1/auth/login", post(api_auth_login))
        .merge(private)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn api_version() -> Json<api::VersionDto> {
    Json(api::VersionDto {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let path = req.uri().path().to_string();
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    for (name, value) in [
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "DENY"),
        ("referrer-policy", "no-referrer"),
        ("cross-origin-opener-policy", "same-origin"),
        ("cross-origin-resource-policy", "same-origin"),
    ] {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }

    // Balances and task lists must never be served from a cache
    if path == "/healthz" || path.starts_with("/api/") {
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    }

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        let span = Span::current();
        span.record("username", tracing::field::display(&auth.claims.sub));
        span.record("role", tracing::field::debug(&auth.claims.role));
        if let Some(kid_id) = auth.claims.kid_id {
            span.record("kid_id", kid_id);
        }
    }
    Ok(next.run(req).await)
}

fn rfc3339(dt: chrono::NaiveDateTime) -> String {
    chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(dt, chrono::Utc).to_rfc3339()
}

fn task_dto(t: Task, assignee_name: String) -> api::TaskDto {
    let completing = t.is_completing();
    api::TaskDto {
        id: t.id,
        name: t.name,
        reward_value: t.reward_value,
        assigned_to: t.assigned_to,
        assignee_name,
        completing,
    }
}

fn history_dto(h: HistoryRecord, kid_name: String) -> api::HistoryItemDto {
    api::HistoryItemDto {
        id: h.id,
        task_id: h.task_id,
        name: h.name,
        completed_by: h.completed_by,
        kid_name,
        reward_value: h.reward_value,
        completed_at: rfc3339(h.completed_at),
    }
}

fn kid_dto(k: Kid, currency: i32) -> api::KidDto {
    api::KidDto {
        id: k.id,
        name: k.name,
        currency,
    }
}

async fn api_auth_login(
    State(state): State<AppState>,
    Json(body): Json<api::AuthReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let user = state
        .config
        .users
        .iter()
        .find(|u| u.username == body.username)
        .ok_or_else(|| {
            tracing::warn!(username=%body.username, "login: unknown username");
            AppError::unauthorized()
        })?;
    if !verify(&body.password, &user.password_hash).map_err(|e| {
        tracing::error!(username=%body.username, error=%e, "login: bcrypt verify failed");
        AppError::internal(e)
    })? {
        tracing::warn!(username=%body.username, "login: invalid password");
        return Err(AppError::unauthorized());
    }
    let token = auth::issue_jwt_for_user(&state, &user.username, Role::Parent, None).await?;
    Ok(Json(api::AuthResp { token }))
}

async fn api_auth_logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<StatusCode, AppError> {
    state
        .store
        .delete_session(&auth.claims.jti)
        .await
        .map_err(AppError::internal)?;
    tracing::info!(username = %auth.claims.sub, "logout: session revoked");
    Ok(StatusCode::NO_CONTENT)
}

async fn api_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::ParentDto>, AppError> {
    let parent = chores::resolve_parent(&state.store, Some(&auth.claims)).await?;
    Ok(Json(api::ParentDto {
        id: parent.id,
        name: parent.name,
        email: parent.email,
    }))
}

async fn api_list_kids(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::KidDto>>, AppError> {
    let parent = chores::resolve_parent(&state.store, Some(&auth.claims)).await?;
    let kids = chores::list_kids(&state.store, &parent).await?;
    let mut items = Vec::with_capacity(kids.len());
    for kid in kids {
        let kid_mutex = state.kid_mutex(kid.id).await;
        let mut guard = kid_mutex.lock().await;
        let currency = state.currency(kid.id, &mut guard).await?;
        items.push(kid_dto(kid, currency));
    }
    Ok(Json(items))
}

async fn api_get_kid(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<Json<api::KidDto>, AppError> {
    let kid = chores::resolve_kid(&state.store, Some(&auth.claims), id).await?;
    let kid_mutex = state.kid_mutex(kid.id).await;
    let mut guard = kid_mutex.lock().await;
    let currency = state.currency(kid.id, &mut guard).await?;
    Ok(Json(kid_dto(kid, currency)))
}

async fn api_kid_access(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<Json<api::KidAccessResp>, AppError> {
    let parent = chores::resolve_parent(&state.store, Some(&auth.claims)).await?;
    let kid = chores::kid_for_parent(&state.store, &parent, id).await?;
    let token = auth::issue_jwt_for_user(&state, &auth.claims.sub, Role::Kid, Some(kid.id)).await?;
    tracing::info!(parent_id = parent.id, kid_id = kid.id, "kid access granted");
    Ok(Json(api::KidAccessResp {
        token,
        kid_id: kid.id,
        profile_path: api::endpoints::kid("", kid.id),
    }))
}

async fn api_list_kid_tasks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<api::TaskDto>>, AppError> {
    let kid = chores::resolve_kid(&state.store, Some(&auth.claims), id).await?;
    let tasks = chores::list_kid_tasks(&state.store, kid.id).await?;
    Ok(Json(
        tasks
            .into_iter()
            .map(|t| task_dto(t, kid.name.clone()))
            .collect(),
    ))
}

async fn api_list_tasks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::TaskDto>>, AppError> {
    let parent = chores::resolve_parent(&state.store, Some(&auth.claims)).await?;
    let rows = chores::list_open_tasks(&state.store, &parent).await?;
    Ok(Json(
        rows.into_iter()
            .map(|(t, kid)| task_dto(t, kid.name))
            .collect(),
    ))
}

async fn api_create_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::CreateTaskReq>,
) -> Result<(StatusCode, Json<Vec<api::TaskDto>>), AppError> {
    let parent = chores::resolve_parent(&state.store, Some(&auth.claims)).await?;
    let draft = TaskDraft {
        name: body.name,
        reward_value: body.reward_value,
        assignee: body.assignee,
    };
    let created = chores::create_task(&state.store, &parent, &draft).await?;
    let names: HashMap<i32, String> = chores::list_kids(&state.store, &parent)
        .await?
        .into_iter()
        .map(|k| (k.id, k.name))
        .collect();
    let items = created
        .into_iter()
        .map(|t| {
            let name = names.get(&t.assigned_to).cloned().unwrap_or_default();
            task_dto(t, name)
        })
        .collect();
    Ok((StatusCode::CREATED, Json(items)))
}

async fn api_delete_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let parent = chores::resolve_parent(&state.store, Some(&auth.claims)).await?;
    chores::delete_task(&state.store, &parent, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn api_complete_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<Json<api::CompleteTaskResp>, AppError> {
    let parent = chores::resolve_parent(&state.store, Some(&auth.claims)).await?;
    // Settlement and cache invalidation outlive a dropped request
    let worker = state.clone();
    let owner = parent.clone();
    let done = tokio::spawn(async move {
        let done = chores::complete_task(&worker.store, &owner, id).await?;
        worker.invalidate_currency(done.kid_id).await;
        Ok::<_, ChoreError>(done)
    })
    .await
    .map_err(AppError::internal)??;

    let kid = chores::kid_for_parent(&state.store, &parent, done.kid_id).await?;
    Ok(Json(api::CompleteTaskResp {
        history: history_dto(done.history, kid.name),
        kid_id: done.kid_id,
        currency: done.currency,
    }))
}

async fn api_list_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::HistoryItemDto>>, AppError> {
    let parent = chores::resolve_parent(&state.store, Some(&auth.claims)).await?;
    let rows = chores::list_history(&state.store, &parent).await?;
    Ok(Json(
        rows.into_iter()
            .map(|(h, kid_name)| history_dto(h, kid_name))
            .collect(),
    ))
}

async fn api_list_rewards(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::RewardDto>>, AppError> {
    let rows = chores::list_rewards(&state.store).await?;
    Ok(Json(
        rows.into_iter()
            .map(|r| api::RewardDto {
                id: r.id,
                name: r.name,
                cost: r.cost,
            })
            .collect(),
    ))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn unauthorized() -> Self {
        Self::Unauthorized
    }
    fn forbidden() -> Self {
        Self::Forbidden
    }
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<ChoreError> for AppError {
    fn from(value: ChoreError) -> Self {
        match value {
            ChoreError::NotAuthenticated => AppError::unauthorized(),
            ChoreError::ParentNotFound(_) => AppError::forbidden(),
            ChoreError::NotFound(m) => AppError::not_found(m),
            ChoreError::Validation(m) => AppError::bad_request(m),
            e @ ChoreError::CompletionInProgress(_) => AppError::Conflict(e.to_string()),
            e => AppError::internal(e),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".into(),
                "unauthorized",
                None,
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".into(), "forbidden", None),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m, "conflict", None),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::warn!(status = %status, kind = kind, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn chore_errors_map_to_statuses() {
        let cases = [
            (ChoreError::NotAuthenticated, StatusCode::UNAUTHORIZED),
            (ChoreError::ParentNotFound("x".into()), StatusCode::FORBIDDEN),
            (ChoreError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ChoreError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (ChoreError::CompletionInProgress(1), StatusCode::CONFLICT),
            (
                ChoreError::CurrencyWriteFailed("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let resp = AppError::from(err).into_response();
            assert_eq!(resp.status(), status);
        }
    }

    use crate::storage::testing::{self, KID_ALICE, TestStore};
    use chorecoin_shared::jwt::JwtClaims;
    use std::time::Duration;

    fn test_state(ts: &TestStore) -> AppState {
        let config = AppConfig {
            jwt_secret: "test-secret".into(),
            users: vec![],
            parents: testing::parents(),
            kids: testing::kids(),
            rewards: testing::rewards(),
            dev_cors_origin: None,
            listen_port: None,
        };
        AppState::new(config, ts.store.clone())
    }

    fn parent_auth(login: &str) -> AuthCtx {
        AuthCtx {
            claims: JwtClaims {
                sub: login.into(),
                jti: Uuid::new_v4().to_string(),
                exp: i64::MAX,
                role: Role::Parent,
                kid_id: None,
            },
        }
    }

    async fn cached_currency(state: &AppState, kid_id: i32) -> i32 {
        api_get_kid(State(state.clone()), Extension(parent_auth("mum")), Path(kid_id))
            .await
            .unwrap()
            .0
            .currency
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_completion_request_still_refreshes_balance() {
        let ts = TestStore::new().await;
        let state = test_state(&ts);
        let task = ts.create_one(KID_ALICE, "Clean room", 5).await;
        assert_eq!(cached_currency(&state, KID_ALICE).await, 10);

        ts.store
            .execute_raw("CREATE TABLE ballast (x INTEGER NOT NULL)")
            .await
            .unwrap();
        ts.store
            .execute_raw(
                "INSERT INTO ballast WITH RECURSIVE c(x) AS \
                 (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 3000) SELECT x FROM c",
            )
            .await
            .unwrap();
        ts.store
            .execute_raw(
                "CREATE TRIGGER slow_history AFTER INSERT ON task_history \
                 BEGIN SELECT count(*) FROM ballast a, ballast b; END",
            )
            .await
            .unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            api_complete_task(State(state.clone()), Extension(parent_auth("mum")), Path(task.id)),
        )
        .await;
        assert!(abandoned.is_err(), "completion finished too early");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while cached_currency(&state, KID_ALICE).await != 15 {
            assert!(
                tokio::time::Instant::now() < deadline,
                "cached balance never picked up the credit"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(ts.store.get_currency(KID_ALICE).await.unwrap(), Some(15));
    }

    #[tokio::test]
    async fn kid_list_and_detail_agree_on_balance() {
        let ts = TestStore::new().await;
        let state = test_state(&ts);
        assert_eq!(cached_currency(&state, KID_ALICE).await, 10);
        let task = ts.create_one(KID_ALICE, "Clean room", 5).await;
        api_complete_task(State(state.clone()), Extension(parent_auth("mum")), Path(task.id))
            .await
            .unwrap();

        let listed = api_list_kids(State(state.clone()), Extension(parent_auth("mum")))
            .await
            .unwrap()
            .0;
        let alice = listed.iter().find(|k| k.id == KID_ALICE).unwrap();
        assert_eq!(alice.currency, 15);
        assert_eq!(alice.currency, cached_currency(&state, KID_ALICE).await);
    }

    #[test]
    fn settlement_failures_keep_detail_for_logs() {
        match AppError::from(ChoreError::TaskDeleteFailed("disk on fire".into())) {
            AppError::Internal(detail) => assert!(detail.contains("disk on fire")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
