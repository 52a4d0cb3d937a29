use std::{error, fmt, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tollgate_clock::{Clock, System};

use crate::config::{ClientConfig, ConfigError, ConfigKeys, LifecycleConfig};
use crate::exchange::{ExchangeError, IssuedTokens, TokenEndpoint, TokenRequest};
use crate::record::{CredentialRecord, TokenState};
use crate::store::{CredentialStore, StoreError};
use crate::{AccessToken, RefreshTokenRef};

/// An error keeping the access token valid
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The password grant failed, so no usable token could be obtained
    ///
    /// The stored record is left exactly as it was.
    #[error("unable to acquire a new access token with the password grant")]
    ReacquireExchangeFailed(#[source] ExchangeError),
    /// The credential store could not be read or written
    #[error("error accessing the credential store")]
    Store(#[from] StoreError),
}

/// A source of access tokens that are valid at the time they are returned
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// The error type returned in the event that no valid token can be provided
    type Error: error::Error + Send + Sync + 'static;

    /// Provides a currently valid access token
    async fn access_token(&self) -> Result<AccessToken, Self::Error>;
}

/// Keeps a single password grant credential valid across many requests
///
/// Before each use, [`ensure_valid_token()`][Self::ensure_valid_token()]
/// loads the credential record, returns the cached access token if it is
/// still fresh, and otherwise refreshes it or reacquires it with the password
/// grant. Calls on clones of the same manager are serialized, so at most one
/// exchange is in flight at a time and callers queued behind it reuse its
/// result.
pub struct TokenLifecycleManager<S, E, C = System> {
    inner: Arc<Inner<S, E, C>>,
}

struct Inner<S, E, C> {
    store: S,
    endpoint: E,
    client: ClientConfig,
    lifecycle: LifecycleConfig<C>,
    in_flight: Mutex<()>,
}

impl<S, E, C> Clone for TokenLifecycleManager<S, E, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, E, C> fmt::Debug for TokenLifecycleManager<S, E, C>
where
    S: fmt::Debug,
    E: fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenLifecycleManager")
            .field("store", &self.inner.store)
            .field("endpoint", &self.inner.endpoint)
            .field("client", &self.inner.client)
            .field("lifecycle", &self.inner.lifecycle)
            .finish()
    }
}

impl<S, E> TokenLifecycleManager<S, E, System> {
    /// Constructs a new manager with the default lifecycle configuration
    pub fn new(store: S, endpoint: E, client: ClientConfig) -> Self {
        Self::with_lifecycle_config(store, endpoint, client, LifecycleConfig::default())
    }
}

impl<S, E> TokenLifecycleManager<S, E, System>
where
    S: CredentialStore,
{
    /// Constructs a new manager whose client configuration is read from the
    /// same store as the credential record
    ///
    /// Fails before any token endpoint is contacted if a configuration value
    /// is missing.
    pub async fn from_store(store: S, endpoint: E, keys: &ConfigKeys) -> Result<Self, ConfigError> {
        let client = ClientConfig::from_store(&store, keys).await?;
        Ok(Self::new(store, endpoint, client))
    }
}

impl<S, E, C> TokenLifecycleManager<S, E, C> {
    /// Constructs a new manager with a custom lifecycle configuration
    pub fn with_lifecycle_config(
        store: S,
        endpoint: E,
        client: ClientConfig,
        lifecycle: LifecycleConfig<C>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                endpoint,
                client,
                lifecycle,
                in_flight: Mutex::new(()),
            }),
        }
    }

    /// The store holding the credential record
    #[inline]
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// The client configuration
    #[inline]
    pub fn client_config(&self) -> &ClientConfig {
        &self.inner.client
    }
}

impl<S, E, C> TokenLifecycleManager<S, E, C>
where
    S: CredentialStore,
    E: TokenEndpoint,
    C: Clock + Send + Sync,
{
    /// Returns an access token that is valid now, refreshing or reacquiring
    /// it first if needed
    ///
    /// A failed refresh falls back to the password grant. Only a failed
    /// password grant is reported, and in that case the stored record is not
    /// modified.
    pub async fn ensure_valid_token(&self) -> Result<AccessToken, LifecycleError> {
        let _in_flight = self.inner.in_flight.lock().await;

        let record = CredentialRecord::load(&self.inner.store).await?;
        let now = self.inner.lifecycle.clock().now();
        let safety_margin = self.inner.lifecycle.safety_margin();
        let state = record.state_at(now, safety_margin);

        tracing::debug!(
            ?state,
            token_age = record.token_age_at(now, safety_margin).0,
            expires_in = record.expires_in().0,
            refresh_time = record.refresh_time().0,
            "evaluated credential record"
        );

        match state {
            TokenState::Fresh => {
                if let Some(token) = record.access_token() {
                    tracing::trace!("using existing access token");
                    return Ok(token.to_owned());
                }
            }
            TokenState::ExpiredWithRefresh => {
                if let Some(refresh_token) = record.refresh_token() {
                    match self.refresh(refresh_token).await {
                        Ok(issued) => return self.store_refreshed(record, issued).await,
                        Err(error) => {
                            tracing::warn!(
                                error = (&error as &dyn error::Error),
                                "refresh exchange failed, falling back to password grant"
                            );
                        }
                    }
                }
            }
            TokenState::ExpiredNoRefresh => {}
        }

        self.reacquire().await
    }

    /// Loads the current credential record without contacting the token endpoint
    pub async fn current_record(&self) -> Result<CredentialRecord, LifecycleError> {
        let _in_flight = self.inner.in_flight.lock().await;
        Ok(CredentialRecord::load(&self.inner.store).await?)
    }

    /// Resets the stored credential record to the empty state
    ///
    /// The next call to [`ensure_valid_token()`][Self::ensure_valid_token()]
    /// performs a password grant.
    pub async fn reset(&self) -> Result<(), LifecycleError> {
        let _in_flight = self.inner.in_flight.lock().await;
        tracing::info!("clearing stored credential record");
        Ok(CredentialRecord::clear(&self.inner.store).await?)
    }

    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<IssuedTokens, ExchangeError> {
        tracing::debug!("access token expired, requesting refresh");
        let request = TokenRequest::refresh(&self.inner.client, refresh_token);
        self.exchange(&request).await
    }

    async fn store_refreshed(
        &self,
        record: CredentialRecord,
        issued: IssuedTokens,
    ) -> Result<AccessToken, LifecycleError> {
        if issued.refresh_token.is_some() {
            tracing::debug!("authority returned a refresh token with a refresh grant, keeping the existing one");
        }

        let now = self.inner.lifecycle.clock().now();
        let updated =
            record.with_refreshed_access(issued.access_token.clone(), issued.expires_in, now);
        updated.persist_access(&self.inner.store).await?;

        tracing::info!(
            expires_in = issued.expires_in.0,
            refresh_time = now.0,
            "refreshed access token"
        );

        Ok(issued.access_token)
    }

    async fn reacquire(&self) -> Result<AccessToken, LifecycleError> {
        tracing::debug!("requesting new token with password grant");
        let request = TokenRequest::password(&self.inner.client);
        let issued = self
            .exchange(&request)
            .await
            .map_err(LifecycleError::ReacquireExchangeFailed)?;

        let now = self.inner.lifecycle.clock().now();
        let has_refresh_token = issued.refresh_token.is_some();
        let record = CredentialRecord::issued(
            issued.access_token.clone(),
            issued.refresh_token,
            issued.expires_in,
            now,
        );
        record.persist(&self.inner.store).await?;

        tracing::info!(
            has_refresh_token,
            expires_in = issued.expires_in.0,
            refresh_time = now.0,
            "acquired new access token"
        );

        Ok(issued.access_token)
    }

    async fn exchange(&self, request: &TokenRequest) -> Result<IssuedTokens, ExchangeError> {
        let exchange = self.inner.endpoint.exchange(request);
        let response = match self.inner.lifecycle.exchange_timeout() {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| ExchangeError::Timeout(limit))??,
            None => exchange.await?,
        };
        response.into_issued()
    }
}

#[async_trait]
impl<S, E, C> AccessTokenProvider for TokenLifecycleManager<S, E, C>
where
    S: CredentialStore,
    E: TokenEndpoint,
    C: Clock + Send + Sync,
{
    type Error = LifecycleError;

    async fn access_token(&self) -> Result<AccessToken, Self::Error> {
        self.ensure_valid_token().await
    }
}
