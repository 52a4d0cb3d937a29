//! Refresh-or-reacquire lifecycle management for OAuth2 password grant credentials
//!
//! This library keeps a single access token, obtained with the _resource owner password
//! credentials_ grant, valid for as long as an application needs it. The current token state
//! is persisted in a [`CredentialStore`][store::CredentialStore] as four string fields, so the
//! same token can be reused across restarts or shared by several processes pointed at the same
//! store.
//!
//! Before each use, the [`TokenLifecycleManager`] evaluates the stored record:
//!
//! * A token that is still fresh, allowing for a safety margin, is returned as-is without
//!   contacting the authority.
//! * An expired token with a refresh token is renewed using the _refresh token_ grant.
//! * Otherwise, or if the refresh is rejected, a new token is obtained with the password grant.
//!
//! Only a failed password grant is reported to the caller, and the stored record is left
//! untouched when that happens.
//!
//! # Example
//!
//! ```no_run
//! use tollgate_tokens::{
//!     config::{ClientConfig, ConfigKeys},
//!     exchange::ReqwestTokenEndpoint,
//!     store::FileStore,
//!     TokenLifecycleManager,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClientConfig::from_lookup(&ConfigKeys::default(), |key| std::env::var(key).ok())?;
//!
//! let manager = TokenLifecycleManager::new(
//!     FileStore::new(".credentials.json"),
//!     ReqwestTokenEndpoint::default(),
//!     client,
//! );
//!
//! let token = manager.ensure_valid_token().await?;
//! tracing::info!(token = format_args!("{:#?}", token), "access token");
//! # Ok(())
//! # }
//! ```
//!
//! This crate includes an example of keeping a token valid with a file store in the
//! examples folder. Refer to that example for more details on usage.
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `oauth2`: Provides a [`TokenEndpoint`][exchange::TokenEndpoint] that executes token
//!   requests with [reqwest].
//! * `file`: Provides a credential store backed by a JSON file on the local filesystem.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod config;
pub mod exchange;
mod manager;
pub mod record;
pub mod store;

pub use braids::*;
pub use manager::{AccessTokenProvider, LifecycleError, TokenLifecycleManager};
pub use record::{CredentialRecord, TokenState};
