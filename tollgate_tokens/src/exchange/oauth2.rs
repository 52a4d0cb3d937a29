//! A token endpoint transport backed by `reqwest`

use async_trait::async_trait;

use super::{ExchangeError, TokenEndpoint, TokenRequest, TokenResponse, TOKEN_REQUEST_HEADERS};

/// Executes token requests with a [`reqwest::Client`]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTokenEndpoint {
    client: reqwest::Client,
}

impl ReqwestTokenEndpoint {
    /// Constructs a new endpoint using `client`
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Prepares the HTTP request for a token request without sending it
    pub fn build_request(&self, request: &TokenRequest) -> reqwest::RequestBuilder {
        TOKEN_REQUEST_HEADERS
            .iter()
            .fold(self.client.post(request.url()), |req, (name, value)| {
                req.header(*name, *value)
            })
            .form(request.form())
    }
}

#[async_trait]
impl TokenEndpoint for ReqwestTokenEndpoint {
    #[tracing::instrument(
        err,
        skip(self, request),
        fields(
            token_url = %request.url(),
            grant_type = %request.grant_type(),
            client_id = request.form_value("client_id").unwrap_or_default(),
        ),
    )]
    async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse, ExchangeError> {
        tracing::trace!("requesting token from authority");

        let resp = self
            .build_request(request)
            .send()
            .await
            .map_err(|e| ExchangeError::RequestSend(e.into()))?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "received token response from issuing authority"
        );

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .map_err(|e| ExchangeError::BodyRead(e.into()))?;
            return Err(ExchangeError::ErrorWithBody {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| ExchangeError::BodyRead(e.into()))?;
        let response = TokenResponse::from_slice(&body)?;

        tracing::debug!(
            has_access_token = response.access_token.is_some(),
            has_refresh_token = response.refresh_token.is_some(),
            expires_in = response.expires_in,
            "parsed token response"
        );

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::{ClientId, ClientSecret, Password, RefreshToken, Username};

    fn config(base: &str) -> ClientConfig {
        ClientConfig::new(
            base,
            "/oauth/token",
            ClientId::from_static("app"),
            ClientSecret::from_static("s3cr3t"),
            Username::from_static("svc-user"),
            Password::from_static("p@ss word"),
        )
        .unwrap()
    }

    fn body_of(req: &reqwest::Request) -> String {
        let bytes = req.body().and_then(|b| b.as_bytes()).unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn password_grant_is_a_form_post_with_json_accept() {
        let endpoint = ReqwestTokenEndpoint::default();
        let request = TokenRequest::password(&config("https://auth.example.com"));

        let req = endpoint.build_request(&request).build().unwrap();

        assert_eq!(req.method(), reqwest::Method::POST);
        assert_eq!(req.url().as_str(), "https://auth.example.com/oauth/token");
        assert_eq!(req.headers()["accept"], "application/json");
        assert_eq!(
            req.headers()["content-type"],
            "application/x-www-form-urlencoded"
        );
        assert_eq!(
            body_of(&req),
            "grant_type=password&client_id=app&client_secret=s3cr3t&username=svc-user&password=p%40ss+word&scope=email"
        );
    }

    #[test]
    fn refresh_grant_is_a_form_post() {
        let endpoint = ReqwestTokenEndpoint::default();
        let request = TokenRequest::refresh(
            &config("https://auth.example.com"),
            &RefreshToken::from_static("r1"),
        );

        let req = endpoint.build_request(&request).build().unwrap();

        assert_eq!(req.method(), reqwest::Method::POST);
        assert_eq!(req.headers().get_all("content-type").iter().count(), 1);
        assert_eq!(
            body_of(&req),
            "refresh_token=r1&client_id=app&client_secret=s3cr3t&grant_type=refresh_token"
        );
    }

    #[tokio::test]
    async fn unreachable_authority_is_a_send_error() {
        let endpoint = ReqwestTokenEndpoint::default();
        let request = TokenRequest::password(&config("http://127.0.0.1:1"));

        let err = endpoint.exchange(&request).await.unwrap_err();

        assert!(matches!(err, ExchangeError::RequestSend(_)), "{err:?}");
    }
}
