//!
//! Documentation of the auth module.
//! argon2id password hashes and HS256 bearer tokens carrying the user id.
//!

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use argon2::password_hash::SaltString;
use bson::oid::ObjectId;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use serde::{Serialize, Deserialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// No signing secret configured
    #[error("JWT secret is not configured")]
    MissingSecret,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("token subject is not a user id")]
    Subject,
}

/// Claims of every issued token
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn user(&self) -> Result<ObjectId, AuthError> {
        ObjectId::parse_str(&self.user_id).map_err(|_| AuthError::Subject)
    }
}

/// Hashes `password` with argon2id and a fresh salt, as a PHC string
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

/// False on a wrong password and on an unparseable stored hash
pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

fn secret_of(secret: Option<&str>) -> Result<&str, AuthError> {
    secret.filter(|s| !s.is_empty()).ok_or(AuthError::MissingSecret)
}

///
/// Mints a token for `user`, valid for `ttl_days`
///
/// # Output
///
/// * Err(MissingSecret) - no secret configured
/// * Ok(token) - compact JWT
///
pub fn mint_token(secret: Option<&str>, user: ObjectId, ttl_days: i64) -> Result<String, AuthError> {
    let secret = secret_of(secret)?;
    let issued = Utc::now();
    let claims = Claims {
        user_id: user.to_hex(),
        iat: issued.timestamp(),
        exp: (issued + Duration::days(ttl_days)).timestamp(),
    };
    Ok(encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))?)
}

/// Checks signature and expiry, returns the claims
pub fn verify_token(secret: Option<&str>, token: &str) -> Result<Claims, AuthError> {
    let secret = secret_of(secret)?;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: Option<&str> = Some("test-secret");

    #[test]
    fn password_hashes_verify_only_the_right_password() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not a phc string"));
    }

    #[test]
    fn salts_differ_between_hashes() {
        assert_ne!(hash_password("same").unwrap(), hash_password("same").unwrap());
    }

    #[test]
    fn tokens_carry_the_user_id() {
        let user = ObjectId::new();
        let token = mint_token(SECRET, user, 7).unwrap();
        let claims = verify_token(SECRET, &token).unwrap();
        assert_eq!(claims.user().unwrap(), user);
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 3600);
    }

    #[test]
    fn foreign_and_expired_tokens_are_rejected() {
        let user = ObjectId::new();
        let token = mint_token(Some("other-secret"), user, 7).unwrap();
        assert!(matches!(verify_token(SECRET, &token), Err(AuthError::Token(_))));

        let expired = mint_token(SECRET, user, -1).unwrap();
        assert!(matches!(verify_token(SECRET, &expired), Err(AuthError::Token(_))));

        assert!(verify_token(SECRET, "garbage").is_err());
    }

    #[test]
    fn no_secret_no_tokens() {
        assert!(matches!(mint_token(None, ObjectId::new(), 7), Err(AuthError::MissingSecret)));
        assert!(matches!(verify_token(Some(""), "x.y.z"), Err(AuthError::MissingSecret)));
    }
}
