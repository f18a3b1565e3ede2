use jsonwebtoken::{self, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Login name; for parents this is the `auth_id` of the parent row.
    pub sub: String,
    pub jti: String,
    pub exp: i64,
    pub role: Role,
    /// Set only on kid access tokens.
    pub kid_id: Option<i32>,
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid token: {0}")]
    Decode(String),
    #[error("encoding failed: {0}")]
    Encode(String),
}

pub fn decode_and_verify(token: &str, secret: &[u8]) -> Result<JwtClaims, JwtError> {
    let key = DecodingKey::from_secret(secret);
    let validation = Validation::new(Algorithm::HS256);
    jsonwebtoken::decode::<JwtClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| JwtError::Decode(e.to_string()))
}

pub fn encode(token: &JwtClaims, secret: &[u8]) -> Result<String, JwtError> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        token,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| JwtError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: Role, kid_id: Option<i32>) -> JwtClaims {
        JwtClaims {
            sub: "mum".into(),
            jti: "jti-1".into(),
            exp: 4_102_444_800, // 2100-01-01
            role,
            kid_id,
        }
    }

    #[test]
    fn encoded_token_verifies_with_same_secret() {
        let token = encode(&claims(Role::Kid, Some(7)), b"s3cret").unwrap();
        let decoded = decode_and_verify(&token, b"s3cret").unwrap();
        assert_eq!(decoded.sub, "mum");
        assert_eq!(decoded.role, Role::Kid);
        assert_eq!(decoded.kid_id, Some(7));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = encode(&claims(Role::Parent, None), b"s3cret").unwrap();
        let err = decode_and_verify(&token, b"other").unwrap_err();
        assert!(matches!(err, JwtError::Decode(_)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut c = claims(Role::Parent, None);
        c.exp = 1_000;
        let token = encode(&c, b"s3cret").unwrap();
        assert!(decode_and_verify(&token, b"s3cret").is_err());
    }
}
