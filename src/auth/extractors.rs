use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};
use tracing::warn;
use uuid::Uuid;

use super::dto::{JwtKeys, TokenKind};

/// The authenticated user's id, taken from a bearer access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub Uuid);

/// Like [`AuthUser`] but anonymous requests pass through as `None`. A token
/// that is present but invalid is still rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaybeAuthUser(pub Option<Uuid>);

fn bearer(parts: &Parts) -> Option<Result<&str, (StatusCode, String)>> {
    let header = parts.headers.get(AUTHORIZATION)?;
    let token = header
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .ok_or((
            StatusCode::UNAUTHORIZED,
            "Invalid Authorization header".to_string(),
        ));
    Some(token)
}

fn access_claims(keys: &JwtKeys, token: &str) -> Result<Uuid, (StatusCode, String)> {
    let claims = keys.verify(token).map_err(|_| {
        warn!("invalid or expired token");
        (
            StatusCode::UNAUTHORIZED,
            "Invalid or expired token".to_string(),
        )
    })?;

    if claims.kind != TokenKind::Access {
        return Err((
            StatusCode::UNAUTHORIZED,
            "Access token required".to_string(),
        ));
    }
    Ok(claims.sub)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer(parts).ok_or((
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header".to_string(),
        ))??;
        let keys = JwtKeys::from_ref(state);
        access_claims(&keys, token).map(AuthUser)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match bearer(parts) {
            None => Ok(MaybeAuthUser(None)),
            Some(token) => {
                let keys = JwtKeys::from_ref(state);
                access_claims(&keys, token?).map(|id| MaybeAuthUser(Some(id)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;
    use crate::state::AppState;

    fn parts(auth: Option<String>) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/me");
        if let Some(value) = auth {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn accepts_access_tokens_only() {
        let state = AppState::fake();
        let keys = JwtKeys::from_ref(&state);
        let user_id = Uuid::new_v4();

        let access = keys.sign_access(user_id).unwrap();
        let mut p = parts(Some(format!("Bearer {access}")));
        let AuthUser(id) = AuthUser::from_request_parts(&mut p, &state).await.unwrap();
        assert_eq!(id, user_id);

        let refresh = keys.sign_refresh(user_id).unwrap();
        let mut p = parts(Some(format!("Bearer {refresh}")));
        let (status, _) = AuthUser::from_request_parts(&mut p, &state).await.unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let mut p = parts(None);
        assert!(AuthUser::from_request_parts(&mut p, &state).await.is_err());
    }

    #[tokio::test]
    async fn optional_auth_lets_anonymous_requests_through() {
        let state = AppState::fake();
        let mut p = parts(None);
        let MaybeAuthUser(id) = MaybeAuthUser::from_request_parts(&mut p, &state).await.unwrap();
        assert!(id.is_none());

        let mut p = parts(Some("Bearer garbage".into()));
        assert!(MaybeAuthUser::from_request_parts(&mut p, &state).await.is_err());
    }
}
