use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::config::AuthConfig;
use crate::infrastructure::read_model::AccountRecord;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Token-issuance collaborator consumed by the command handler.
#[cfg_attr(test, mockall::automock)]
pub trait TokenIssuer: Send + Sync {
    fn create_token(&self, account: &AccountRecord) -> Result<TokenInfo, TokenError>;
}

pub struct JwtTokenService {
    config: AuthConfig,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtTokenService {
    pub fn new(config: AuthConfig) -> Self {
        let encoding = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        Self {
            config,
            encoding,
            decoding,
        }
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))?;
        Ok(data.claims)
    }
}

impl TokenIssuer for JwtTokenService {
    fn create_token(&self, account: &AccountRecord) -> Result<TokenInfo, TokenError> {
        let now = Utc::now();
        let expires_at = now + ChronoDuration::seconds(self.config.access_token_expiry_secs);

        let claims = Claims {
            sub: account.id.to_string(),
            name: account.name.clone(),
            email: account.email.clone(),
            role: account.profile.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding)?;
        Ok(TokenInfo { token, expires_at })
    }
}
