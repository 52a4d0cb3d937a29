//! DTOs for interacting with OAuth2 token endpoints

use serde::{Deserialize, Deserializer};
use tollgate_clock::DurationMillis;

use super::ExchangeError;
use crate::{AccessToken, RefreshToken};

/// A token endpoint response
///
/// Every field is optional; a response without a usable `access_token` is
/// rejected by [`TokenResponse::into_issued()`].
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TokenResponse {
    /// The issued access token
    #[serde(default)]
    pub access_token: Option<AccessToken>,
    /// The issued refresh token
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    /// The access token's lifetime in seconds
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    /// Parses a response body
    pub fn from_slice(body: &[u8]) -> Result<Self, ExchangeError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Validates that the response carries an access token
    pub fn into_issued(self) -> Result<IssuedTokens, ExchangeError> {
        let access_token = self
            .access_token
            .filter(|t| !t.as_str().is_empty())
            .ok_or(ExchangeError::MissingAccessToken)?;

        Ok(IssuedTokens {
            access_token,
            refresh_token: self.refresh_token.filter(|t| !t.as_str().is_empty()),
            expires_in: self
                .expires_in
                .map(DurationMillis::from_secs)
                .unwrap_or_default(),
        })
    }
}

/// Tokens from a successful exchange
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedTokens {
    /// The new access token
    pub access_token: AccessToken,
    /// The new refresh token, if the authority sent one
    pub refresh_token: Option<RefreshToken>,
    /// The access token's lifetime, zero if the authority did not say
    pub expires_in: DurationMillis,
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;

    Ok(match value {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.trunc() as u64)),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
