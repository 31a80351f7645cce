//! Authenticated identity. The upstream auth layer resolves the caller and
//! forwards their user id in a header; this crate only reads it.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use empre_core::ids::UserId;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The caller's user id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

impl AuthUser {
    pub fn from_parts(parts: &Parts) -> Result<Self, ApiError> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?;
        let raw = raw
            .to_str()
            .map_err(|_| ApiError::BadRequest(format!("{USER_ID_HEADER} is not valid text")))?;
        raw.parse()
            .map(AuthUser)
            .map_err(|_| ApiError::BadRequest(format!("{USER_ID_HEADER} is not a valid id")))
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_parts(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    fn parts(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(USER_ID_HEADER, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn reads_user_id() {
        let user = UserId::new();
        let auth = AuthUser::from_parts(&parts(Some(&user.to_string()))).unwrap();
        assert_eq!(auth.0, user);
    }

    #[test]
    fn missing_header_is_unauthorized() {
        let err = AuthUser::from_parts(&parts(None)).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn malformed_header_is_bad_request() {
        let err = AuthUser::from_parts(&parts(Some("user-42"))).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
