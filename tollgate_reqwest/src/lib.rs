//! Middleware to automatically attach authorization to outgoing requests
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AccessTokenMiddleware`] in the middleware stack to attach
//! an access token kept valid by a [`TokenLifecycleManager`] to each outbound
//! request. The manager is consulted before every request, so an expired token
//! is refreshed or reacquired before the request is sent. If no valid token can
//! be obtained, the request fails without being sent.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place and no token is obtained, allowing overrides to be specified as
//! required.
//!
//! ```no_run
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//! use tollgate_reqwest::AccessTokenMiddleware;
//! use tollgate_tokens::{config::ClientConfig, TokenLifecycleManager};
//! # use tollgate_tokens::{exchange::TokenEndpoint, store::InMemoryStore};
//! #
//! # async fn run(endpoint: impl TokenEndpoint + 'static, config: ClientConfig) {
//! let manager = TokenLifecycleManager::new(InMemoryStore::new(), endpoint, config);
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AccessTokenMiddleware::new(manager))
//!     .build();
//!
//! client
//!     .get("https://example.com")
//!     .send()
//!     .await
//!     .unwrap();
//! # }
//! ```
//!
//! The middleware can also be configured to add an authorization token
//! only conditionally. This can be useful in the event that you want to
//! use a single common middleware stack with multiple potential backends
//! and want to ensure that specific tokens are used for specific backends.
//!
//! These predicates can be composed together to evaluate more complex
//! requirements prior to attaching a token to a request.
//!
//! ```no_run
//! use predicates::prelude::PredicateBooleanExt;
//! use tollgate_reqwest::{AccessTokenMiddleware, ExactHostMatch, HttpsOnly};
//! # use tollgate_tokens::AccessTokenProvider;
//! #
//! # fn run(manager: impl AccessTokenProvider) {
//!
//! AccessTokenMiddleware::new(manager)
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("api.example.com")));
//! # }
//! ```
//!
//! [`TokenLifecycleManager`]: tollgate_tokens::TokenLifecycleManager

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{error, fmt};

use bytes::{BufMut, BytesMut};
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response};
use reqwest_middleware::{Error, Middleware, Next, Result};
use tollgate_tokens::{AccessTokenProvider, AccessTokenRef};

/// A middleware that injects an access token into outgoing requests
#[derive(Clone, Debug)]
pub struct AccessTokenMiddleware<T, P = HttpsOnly> {
    provider: T,
    predicate: P,
}

impl<T> AccessTokenMiddleware<T, HttpsOnly> {
    /// Construct a new middleware from an access token provider
    ///
    /// By default, this middleware will only send its token if the request
    /// is being sent via HTTPS. To change this behavior, provide a
    /// custom predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(provider: T) -> Self {
        Self {
            provider,
            predicate: HttpsOnly,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AccessTokenMiddleware<T, P> {
        AccessTokenMiddleware {
            provider: self.provider,
            predicate,
        }
    }
}

fn bearer_header(
    token: &AccessTokenRef,
) -> std::result::Result<header::HeaderValue, header::InvalidHeaderValue> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value = header::HeaderValue::from_maybe_shared(header_value.freeze())?;
    value.set_sensitive(true);
    Ok(value)
}

#[async_trait::async_trait]
impl<T, P> Middleware for AccessTokenMiddleware<T, P>
where
    T: AccessTokenProvider + 'static,
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) {
            if let header::Entry::Vacant(entry) = req.headers_mut().entry(header::AUTHORIZATION) {
                let token = self.provider.access_token().await.map_err(|error| {
                    tracing::warn!(
                        error = (&error as &dyn error::Error),
                        "no valid access token available, request not sent"
                    );
                    Error::middleware(error)
                })?;

                tracing::trace!("attaching access token to request");
                entry.insert(bearer_header(&token).map_err(Error::middleware)?);
            }
        }

        next.run(req, extensions).await
    }
}

/// Only attach an access token if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "scheme",
                    req.url().scheme().to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only attach an access token if the request is being sent to the exact host specified
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Construct a new predicate from a host string
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().host_str() == Some(self.host.as_str())
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "host",
                    req.url().host_str().unwrap_or("<no host>").to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("host == ")?;
        f.write_str(&self.host)
    }
}
