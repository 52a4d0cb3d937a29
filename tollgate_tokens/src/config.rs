//! Client credentials and lifecycle tunables

use std::time::Duration;

use thiserror::Error;
use tollgate_clock::{DurationMillis, System};

use crate::store::{CredentialStore, StoreError};
use crate::{
    ClientId, ClientIdRef, ClientSecret, ClientSecretRef, Password, PasswordRef, Username,
    UsernameRef,
};

/// The scope requested by the password grant unless configured otherwise
pub const DEFAULT_SCOPE: &str = "email";

/// An error assembling the client configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required configuration value is absent or empty
    #[error("missing required configuration value `{key}`")]
    Missing {
        /// The key that was looked up
        key: String,
    },
    /// The store holding the configuration could not be read
    #[error("unable to read configuration from the credential store")]
    Store(#[from] StoreError),
}

/// Names of the keys holding each configuration value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigKeys {
    /// The scheme and host of the token endpoint, e.g. `https://auth.example.com`
    pub token_url_base: String,
    /// The path of the token endpoint, appended verbatim to the base
    pub token_url_path: String,
    /// The OAuth2 client ID
    pub client_id: String,
    /// The OAuth2 client secret
    pub client_secret: String,
    /// The resource owner's username
    pub username: String,
    /// The resource owner's password
    pub password: String,
}

impl Default for ConfigKeys {
    fn default() -> Self {
        Self {
            token_url_base: "token_url_base".into(),
            token_url_path: "token_url_path".into(),
            client_id: "client_id".into(),
            client_secret: "client_secret".into(),
            username: "username".into(),
            password: "password".into(),
        }
    }
}

/// The client and resource owner credentials used against the token endpoint
#[derive(Clone, Debug)]
pub struct ClientConfig {
    token_url_base: String,
    token_url_path: String,
    client_id: ClientId,
    client_secret: ClientSecret,
    username: Username,
    password: Password,
    scope: String,
}

impl ClientConfig {
    /// Constructs a configuration from its values
    ///
    /// Fails if any value is empty. The error names the default key for the
    /// empty value.
    pub fn new(
        token_url_base: impl Into<String>,
        token_url_path: impl Into<String>,
        client_id: ClientId,
        client_secret: ClientSecret,
        username: Username,
        password: Password,
    ) -> Result<Self, ConfigError> {
        let keys = ConfigKeys::default();
        let token_url_base = token_url_base.into();
        let token_url_path = token_url_path.into();

        for (key, value) in [
            (&keys.token_url_base, token_url_base.as_str()),
            (&keys.token_url_path, token_url_path.as_str()),
            (&keys.client_id, client_id.as_str()),
            (&keys.client_secret, client_secret.as_str()),
            (&keys.username, username.as_str()),
            (&keys.password, password.as_str()),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Missing { key: key.clone() });
            }
        }

        Ok(Self {
            token_url_base,
            token_url_path,
            client_id,
            client_secret,
            username,
            password,
            scope: DEFAULT_SCOPE.to_owned(),
        })
    }

    /// Assembles a configuration by looking up each key with `lookup`
    ///
    /// Suitable for reading process environment variables:
    ///
    /// ```
    /// use tollgate_tokens::config::{ClientConfig, ConfigKeys};
    ///
    /// let result = ClientConfig::from_lookup(&ConfigKeys::default(), |key| std::env::var(key).ok());
    /// # let _ = result;
    /// ```
    pub fn from_lookup<F>(keys: &ConfigKeys, mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut required = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ConfigError::Missing { key: key.to_owned() })
        };

        Ok(Self {
            token_url_base: required(&keys.token_url_base)?,
            token_url_path: required(&keys.token_url_path)?,
            client_id: ClientId::new(required(&keys.client_id)?),
            client_secret: ClientSecret::new(required(&keys.client_secret)?),
            username: Username::new(required(&keys.username)?),
            password: Password::new(required(&keys.password)?),
            scope: DEFAULT_SCOPE.to_owned(),
        })
    }

    /// Assembles a configuration from values held in a credential store
    pub async fn from_store<S>(store: &S, keys: &ConfigKeys) -> Result<Self, ConfigError>
    where
        S: CredentialStore + ?Sized,
    {
        let mut values = Vec::with_capacity(6);
        for key in [
            &keys.token_url_base,
            &keys.token_url_path,
            &keys.client_id,
            &keys.client_secret,
            &keys.username,
            &keys.password,
        ] {
            values.push((key.as_str(), store.get(key).await?));
        }

        Self::from_lookup(keys, |key| {
            values
                .iter()
                .find(|(k, _)| *k == key)
                .and_then(|(_, v)| v.clone())
        })
    }

    /// Overrides the scope requested by the password grant
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// The full token endpoint URL, the concatenation of base and path
    pub fn token_url(&self) -> String {
        let mut url = String::with_capacity(self.token_url_base.len() + self.token_url_path.len());
        url.push_str(&self.token_url_base);
        url.push_str(&self.token_url_path);
        url
    }

    /// The client ID
    #[inline]
    pub fn client_id(&self) -> &ClientIdRef {
        &self.client_id
    }

    /// The client secret
    #[inline]
    pub fn client_secret(&self) -> &ClientSecretRef {
        &self.client_secret
    }

    /// The resource owner's username
    #[inline]
    pub fn username(&self) -> &UsernameRef {
        &self.username
    }

    /// The resource owner's password
    #[inline]
    pub fn password(&self) -> &PasswordRef {
        &self.password
    }

    /// The scope requested by the password grant
    #[inline]
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

/// Tunables for the lifecycle manager
#[derive(Clone, Debug)]
pub struct LifecycleConfig<C = System> {
    safety_margin: DurationMillis,
    exchange_timeout: Option<Duration>,
    clock: C,
}

impl Default for LifecycleConfig {
    /// Default lifecycle configuration
    ///
    /// Tokens are used right up to their stated expiry, each token endpoint
    /// call is limited to 30 seconds, and the system clock is used.
    fn default() -> Self {
        Self {
            safety_margin: DurationMillis::ZERO,
            exchange_timeout: Some(Duration::from_secs(30)),
            clock: System,
        }
    }
}

impl<C> LifecycleConfig<C> {
    /// Sets how much earlier than its stated expiry a token is considered expired
    ///
    /// Defaults to zero. A margin of a minute or so keeps a token from expiring
    /// while a request carrying it is still in transit.
    pub fn with_safety_margin(mut self, safety_margin: DurationMillis) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    /// Sets the limit on each token endpoint call, or `None` to wait indefinitely
    pub fn with_exchange_timeout(mut self, exchange_timeout: Option<Duration>) -> Self {
        self.exchange_timeout = exchange_timeout;
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> LifecycleConfig<D> {
        LifecycleConfig {
            safety_margin: self.safety_margin,
            exchange_timeout: self.exchange_timeout,
            clock,
        }
    }

    /// The safety margin added to a token's age
    #[inline]
    pub fn safety_margin(&self) -> DurationMillis {
        self.safety_margin
    }

    /// The limit on each token endpoint call
    #[inline]
    pub fn exchange_timeout(&self) -> Option<Duration> {
        self.exchange_timeout
    }

    /// The clock used to evaluate token age
    #[inline]
    pub fn clock(&self) -> &C {
        &self.clock
    }
}
