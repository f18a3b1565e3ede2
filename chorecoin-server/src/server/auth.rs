use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use chorecoin_shared::auth::Role;
use chorecoin_shared::jwt::{self, JwtClaims};
use chrono::{Duration, Utc};
use tracing::{error, warn};

use super::{AppError, AppState};

/// How many days of inactivity before a parent session is considered expired.
const PARENT_SESSION_IDLE_DAYS: i64 = 14;
/// How many days before mandatory re-login for parents.
const PARENT_TOKEN_TTL_DAYS: i64 = 30;
/// How many days of inactivity before a kid access token is considered expired.
const KID_SESSION_IDLE_DAYS: i64 = 30;
/// How many days before a parent has to hand out a new kid access token.
const KID_TOKEN_TTL_DAYS: i64 = 2 * KID_SESSION_IDLE_DAYS;

#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub claims: JwtClaims,
}

pub async fn require_bearer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(AppError::unauthorized)?;

    let claims = jwt::decode_and_verify(token, state.config.jwt_secret.as_bytes()).map_err(|e| {
        warn!(error=%e, "auth: jwt decode failed");
        AppError::unauthorized()
    })?;

    validate_claims(&state, &claims).map_err(|e| {
        warn!(error=?e, username=%claims.sub, "auth: validate_claims failed");
        AppError::unauthorized()
    })?;

    let idle_days = match claims.role {
        Role::Parent => PARENT_SESSION_IDLE_DAYS,
        Role::Kid => KID_SESSION_IDLE_DAYS,
    };
    let cutoff = Utc::now() - Duration::days(idle_days);
    match state
        .store
        .touch_session_with_cutoff(&claims.jti, cutoff.naive_utc())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            warn!(
                jti = %claims.jti,
                username = %claims.sub,
                cutoff = %cutoff,
                idle_days,
                "auth: session missing or expired"
            );
            return Err(AppError::unauthorized());
        }
        Err(e) => {
            error!(jti = %claims.jti, error=%e, "auth: touch_session_with_cutoff failed");
            return Err(AppError::internal(e));
        }
    }
    req.extensions_mut().insert(AuthCtx { claims });
    Ok(next.run(req).await)
}

/// Records a session and returns the signed token. Kid tokens are issued
/// under the parent's login and bound to `kid_id`.
pub async fn issue_jwt_for_user(
    state: &AppState,
    username: &str,
    role: Role,
    kid_id: Option<i32>,
) -> Result<String, AppError> {
    let jti = uuid::Uuid::new_v4().to_string();
    let ttl_days = match role {
        Role::Parent => PARENT_TOKEN_TTL_DAYS,
        Role::Kid => KID_TOKEN_TTL_DAYS,
    };
    let claims = JwtClaims {
        sub: username.to_string(),
        jti: jti.clone(),
        exp: (Utc::now() + Duration::days(ttl_days)).timestamp(),
        role,
        kid_id,
    };

    validate_claims(state, &claims)?;

    state
        .store
        .create_session(&jti, username)
        .await
        .map_err(|e| {
            error!(username, error=%e, "issue_jwt: create_session failed");
            AppError::internal(e)
        })?;
    jwt::encode(&claims, state.config.jwt_secret.as_bytes()).map_err(|e| {
        error!(username, error=%e, "issue_jwt: jwt encode failed");
        AppError::internal(e)
    })
}

fn validate_claims(state: &AppState, claims: &JwtClaims) -> Result<(), AppError> {
    if !state.config.users.iter().any(|u| u.username == claims.sub) {
        warn!(username = %claims.sub, "validate_claims: unknown user");
        return Err(AppError::forbidden());
    }

    match (claims.role, claims.kid_id) {
        (Role::Parent, None) => Ok(()),
        (Role::Parent, Some(_)) => {
            warn!(username = %claims.sub, "validate_claims: parent token must not carry a kid");
            Err(AppError::forbidden())
        }
        (Role::Kid, None) => {
            warn!(username = %claims.sub, "validate_claims: kid token missing kid_id");
            Err(AppError::forbidden())
        }
        (Role::Kid, Some(kid_id)) => {
            let parent = state
                .config
                .parents
                .iter()
                .find(|p| p.auth_id == claims.sub)
                .ok_or_else(|| {
                    warn!(username = %claims.sub, "validate_claims: no parent for login");
                    AppError::forbidden()
                })?;
            if !state
                .config
                .kids
                .iter()
                .any(|k| k.id == kid_id && k.parent_id == parent.id)
            {
                warn!(username = %claims.sub, kid_id, "validate_claims: kid not owned by login");
                return Err(AppError::not_found(format!("kid not found: {kid_id}")));
            }
            Ok(())
        }
    }
}
