use bcrypt::{hash, verify, DEFAULT_COST};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::models::AuthPayload;

pub fn hash_password(password: &str) -> Result<String> {
    Ok(hash(password, DEFAULT_COST)?)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    Ok(verify(password, hash)?)
}

/// Signs and validates HS256 session tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: Vec<u8>,
    ttl_secs: u64,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl_secs,
        }
    }

    pub fn create_jwt(&self, username: &str) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let claims = AuthPayload {
            sub: username.to_owned(),
            exp: (now + self.ttl_secs) as usize,
        };

        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )?)
    }

    pub fn validate_jwt(&self, token: &str) -> Result<AuthPayload> {
        let token_data = decode::<AuthPayload>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &Validation::new(Algorithm::HS256),
        )?;
        Ok(token_data.claims)
    }
}
