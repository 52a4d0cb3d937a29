//! Token endpoint requests and the transport that executes them

use std::{error, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ClientConfig;
use crate::RefreshTokenRef;

pub mod dto;
#[cfg(feature = "oauth2")]
pub mod oauth2;

pub use dto::{IssuedTokens, TokenResponse};
#[cfg(feature = "oauth2")]
pub use oauth2::ReqwestTokenEndpoint;

/// Headers sent with every token endpoint request
pub const TOKEN_REQUEST_HEADERS: [(&str, &str); 2] = [
    ("Accept", "application/json"),
    ("Content-Type", "application/x-www-form-urlencoded"),
];

const REDACTED_FIELDS: [&str; 3] = ["client_secret", "password", "refresh_token"];

/// The OAuth2 grant a token request performs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrantType {
    /// The resource owner password credentials grant
    Password,
    /// The refresh token grant
    RefreshToken,
}

impl GrantType {
    /// The `grant_type` form value for this grant
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A form-encoded `POST` to the token endpoint
///
/// Requests are built here and executed by a [`TokenEndpoint`]. Every
/// request carries the [`TOKEN_REQUEST_HEADERS`].
#[derive(Clone)]
pub struct TokenRequest {
    url: String,
    grant_type: GrantType,
    form: Vec<(&'static str, String)>,
}

impl TokenRequest {
    /// Builds a refresh grant request
    pub fn refresh(config: &ClientConfig, refresh_token: &RefreshTokenRef) -> Self {
        Self {
            url: config.token_url(),
            grant_type: GrantType::RefreshToken,
            form: vec![
                ("refresh_token", refresh_token.as_str().to_owned()),
                ("client_id", config.client_id().as_str().to_owned()),
                ("client_secret", config.client_secret().as_str().to_owned()),
                ("grant_type", GrantType::RefreshToken.as_str().to_owned()),
            ],
        }
    }

    /// Builds a password grant request
    pub fn password(config: &ClientConfig) -> Self {
        Self {
            url: config.token_url(),
            grant_type: GrantType::Password,
            form: vec![
                ("grant_type", GrantType::Password.as_str().to_owned()),
                ("client_id", config.client_id().as_str().to_owned()),
                ("client_secret", config.client_secret().as_str().to_owned()),
                ("username", config.username().as_str().to_owned()),
                ("password", config.password().as_str().to_owned()),
                ("scope", config.scope().to_owned()),
            ],
        }
    }

    /// The token endpoint URL
    #[inline]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The grant performed by this request
    #[inline]
    pub fn grant_type(&self) -> GrantType {
        self.grant_type
    }

    /// The form fields, in the order they are sent
    #[inline]
    pub fn form(&self) -> &[(&'static str, String)] {
        &self.form
    }

    /// Looks up a single form field
    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        struct Form<'a>(&'a [(&'static str, String)]);

        impl fmt::Debug for Form<'_> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_map()
                    .entries(self.0.iter().map(|(k, v)| {
                        let v = if REDACTED_FIELDS.contains(k) { "***" } else { v.as_str() };
                        (k, v)
                    }))
                    .finish()
            }
        }

        f.debug_struct("TokenRequest")
            .field("url", &self.url)
            .field("grant_type", &self.grant_type)
            .field("form", &Form(&self.form))
            .finish()
    }
}

type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// An error while exchanging credentials at the token endpoint
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The authority responded with an error status
    #[error("token endpoint responded with status {status}: {body}")]
    ErrorWithBody {
        /// The HTTP status code
        status: u16,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBody(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyRead(#[source] BoxError),
    /// Unable to send a token request to the authority
    #[error("error sending request to authority")]
    RequestSend(#[source] BoxError),
    /// The authority did not respond in time
    #[error("token endpoint did not respond within {0:?}")]
    Timeout(Duration),
    /// The response did not carry a usable access token
    #[error("token response did not contain an access token")]
    MissingAccessToken,
}

/// A transport able to execute token requests
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Sends `request` to the token endpoint and parses the response
    async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse, ExchangeError>;
}

#[async_trait]
impl<E> TokenEndpoint for Arc<E>
where
    E: TokenEndpoint + ?Sized,
{
    async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse, ExchangeError> {
        (**self).exchange(request).await
    }
}
