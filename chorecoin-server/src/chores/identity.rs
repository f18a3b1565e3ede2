use chorecoin_shared::auth::Role;
use chorecoin_shared::jwt::JwtClaims;
use tracing::warn;

use super::ChoreError;
use super::registry::kid_for_parent;
use crate::storage::Store;
use crate::storage::models::{Kid, Parent};

/// Maps an authenticated parent session to its parent row.
///
/// Kid access tokens never resolve to a parent.
pub async fn resolve_parent(
    store: &Store,
    session: Option<&JwtClaims>,
) -> Result<Parent, ChoreError> {
    let claims = session.ok_or(ChoreError::NotAuthenticated)?;
    if claims.role != Role::Parent {
        return Err(ChoreError::NotAuthenticated);
    }
    store
        .find_parent_by_auth_id(&claims.sub)
        .await?
        .ok_or_else(|| {
            warn!(username = %claims.sub, "resolve_parent: no parent row for login");
            ChoreError::ParentNotFound(claims.sub.clone())
        })
}

/// Resolves the kid a session may look at: any kid of a parent session,
/// or the single kid a kid access token is bound to.
pub async fn resolve_kid(
    store: &Store,
    session: Option<&JwtClaims>,
    kid_id: i32,
) -> Result<Kid, ChoreError> {
    let claims = session.ok_or(ChoreError::NotAuthenticated)?;
    let parent = match claims.role {
        Role::Parent => resolve_parent(store, Some(claims)).await?,
        Role::Kid => {
            if claims.kid_id != Some(kid_id) {
                return Err(ChoreError::NotFound(format!("kid not found: {kid_id}")));
            }
            // kid tokens carry the issuing parent's login as `sub`
            store
                .find_parent_by_auth_id(&claims.sub)
                .await?
                .ok_or_else(|| ChoreError::ParentNotFound(claims.sub.clone()))?
        }
    };
    kid_for_parent(store, &parent, kid_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{KID_ALICE, KID_BOB, KID_CAROL, PARENT_ZED, TestStore};

    fn session(sub: &str, role: Role, kid_id: Option<i32>) -> JwtClaims {
        JwtClaims {
            sub: sub.into(),
            jti: "j".into(),
            exp: 0,
            role,
            kid_id,
        }
    }

    #[tokio::test]
    async fn missing_session_is_not_authenticated() {
        let ts = TestStore::new().await;
        let err = resolve_parent(&ts.store, None).await.unwrap_err();
        assert!(matches!(err, ChoreError::NotAuthenticated));
    }

    #[tokio::test]
    async fn kid_session_is_not_a_parent() {
        let ts = TestStore::new().await;
        let claims = session("mum", Role::Kid, Some(KID_ALICE));
        let err = resolve_parent(&ts.store, Some(&claims)).await.unwrap_err();
        assert!(matches!(err, ChoreError::NotAuthenticated));
    }

    #[tokio::test]
    async fn unknown_login_is_parent_not_found() {
        let ts = TestStore::new().await;
        let claims = session("ghost", Role::Parent, None);
        let err = resolve_parent(&ts.store, Some(&claims)).await.unwrap_err();
        assert!(matches!(err, ChoreError::ParentNotFound(ref s) if s == "ghost"));
    }

    #[tokio::test]
    async fn resolves_by_auth_id() {
        let ts = TestStore::new().await;
        let claims = session("zed", Role::Parent, None);
        let parent = resolve_parent(&ts.store, Some(&claims)).await.unwrap();
        assert_eq!(parent.id, PARENT_ZED);
        assert_eq!(parent.email, "zed@example.com");
    }

    #[tokio::test]
    async fn parent_sees_only_own_kids() {
        let ts = TestStore::new().await;
        let mum = session("mum", Role::Parent, None);
        let kid = resolve_kid(&ts.store, Some(&mum), KID_BOB).await.unwrap();
        assert_eq!(kid.name, "Bob");
        let err = resolve_kid(&ts.store, Some(&mum), KID_CAROL)
            .await
            .unwrap_err();
        assert!(matches!(err, ChoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn kid_token_is_bound_to_one_kid() {
        let ts = TestStore::new().await;
        let alice = session("mum", Role::Kid, Some(KID_ALICE));
        let kid = resolve_kid(&ts.store, Some(&alice), KID_ALICE).await.unwrap();
        assert_eq!(kid.currency, 10);
        assert!(matches!(
            resolve_kid(&ts.store, Some(&alice), KID_BOB).await,
            Err(ChoreError::NotFound(_))
        ));

        // a token whose issuer does not own the kid resolves to nothing
        let forged = session("zed", Role::Kid, Some(KID_ALICE));
        assert!(matches!(
            resolve_kid(&ts.store, Some(&forged), KID_ALICE).await,
            Err(ChoreError::NotFound(_))
        ));
    }
}
