//! JWT issue/verify. Claims are the principal itself plus the standard
//! expiry field, so a decoded token is directly usable for
//! authorization without another lookup.

use crate::model::Principal;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const TOKEN_LIFETIME_HOURS: i64 = 8;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(flatten)]
    pub principal: Principal,
    pub exp: i64,
}

pub fn issue(principal: &Principal, secret: &str) -> Result<String, TokenError> {
    let claims = Claims {
        principal: principal.clone(),
        exp: (Utc::now() + Duration::hours(TOKEN_LIFETIME_HOURS)).timestamp(),
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn verify(token: &str, secret: &str) -> Result<Principal, TokenError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(data.claims.principal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    fn principal() -> Principal {
        Principal {
            id: 3,
            name: "ada".to_string(),
            group_owner: 2,
            groups: vec![5],
            roles: vec![Role {
                path: "/widget".to_string(),
                mask: 31,
            }],
        }
    }

    #[test]
    fn issued_tokens_verify_and_round_trip_the_principal() {
        let token = issue(&principal(), "secret").unwrap();
        let decoded = verify(&token, "secret").unwrap();
        assert_eq!(decoded, principal());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue(&principal(), "secret").unwrap();
        assert!(verify(&token, "other").is_err());
    }
}
