use super::{AppError, auth::AuthCtx};
use axum::response::Response;
use axum::{
    extract::OriginalUri,
    http::{Method, Request},
    middleware::Next,
};
use chorecoin_shared::api::API_V1_PREFIX;
use chorecoin_shared::auth::Role;
use chorecoin_shared::jwt::JwtClaims;

/// Coarse route-level access rules. Ownership of a kid by a parent is
/// checked against the store by the handlers.
pub async fn enforce_acl(req: Request<axum::body::Body>, next: Next) -> Result<Response, AppError> {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|orig| orig.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().clone();
    let Some(auth) = req.extensions().get::<AuthCtx>() else {
        return Err(AppError::unauthorized());
    };
    let claims = &auth.claims;

    let segs = segmented(&path);
    let prefix = segmented(API_V1_PREFIX);
    if !segs.starts_with(&prefix) {
        tracing::warn!(?segs, "ACL: path outside api scope");
        return Err(AppError::forbidden());
    }
    let rest = &segs[prefix.len()..];

    let decision = match claims.role {
        Role::Parent => allow_parent(&method, rest),
        Role::Kid => allow_kid(&method, rest, claims),
    };

    if let Err(err) = decision {
        tracing::warn!(
            method = %method,
            path = %path,
            username = %claims.sub,
            role = ?claims.role,
            token_kid = ?claims.kid_id,
            "ACL: no rule matched; denying"
        );
        return Err(err);
    }

    Ok(next.run(req).await)
}

fn allow_parent(method: &Method, rest: &[&str]) -> Result<(), AppError> {
    match rest {
        ["auth", "logout"] if *method == Method::POST => Ok(()),
        ["me"] if *method == Method::GET => Ok(()),
        ["kids"] if *method == Method::GET => Ok(()),
        ["kids", _] if *method == Method::GET => Ok(()),
        ["kids", _, "tasks"] if *method == Method::GET => Ok(()),
        ["kids", _, "access"] if *method == Method::POST => Ok(()),
        ["tasks"] if *method == Method::GET || *method == Method::POST => Ok(()),
        ["tasks", _] if *method == Method::DELETE => Ok(()),
        ["tasks", _, "complete"] if *method == Method::POST => Ok(()),
        ["history"] if *method == Method::GET => Ok(()),
        ["rewards"] if *method == Method::GET => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}

fn allow_kid(method: &Method, rest: &[&str], claims: &JwtClaims) -> Result<(), AppError> {
    match rest {
        ["auth", "logout"] if *method == Method::POST => Ok(()),
        ["kids", kid] if *method == Method::GET => ensure_kid(claims, kid),
        ["kids", kid, "tasks"] if *method == Method::GET => ensure_kid(claims, kid),
        ["rewards"] if *method == Method::GET => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}

fn segmented(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn ensure_kid(claims: &JwtClaims, seg: &str) -> Result<(), AppError> {
    let expected = claims.kid_id.ok_or_else(AppError::forbidden)?;
    match seg.parse::<i32>() {
        Ok(provided) if provided == expected => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}
