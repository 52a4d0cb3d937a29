use std::time::Duration;

use clap::Parser;
use tokio::time;
use tollgate_clock::{Clock, DurationMillis, System};
use tollgate_tokens::{
    config::{ClientConfig, LifecycleConfig},
    exchange::ReqwestTokenEndpoint,
    store::FileStore,
    ClientId, ClientSecret, Password, TokenLifecycleManager, TokenState, Username,
};

#[derive(Debug, Parser)]
struct Opts {
    /// The scheme and host of the issuing authority
    #[clap(long, env)]
    token_url_base: String,

    /// The path of the token endpoint on the issuing authority
    #[clap(long, env, default_value = "/oauth/token")]
    token_url_path: String,

    /// The client ID of the client
    #[clap(short, long, env)]
    client_id: ClientId,

    /// The client secret used to identify the client to the issuing authority
    #[clap(short = 's', long, env, hide_env_values = true)]
    client_secret: ClientSecret,

    /// The resource owner's username
    #[clap(short, long, env)]
    username: Username,

    /// The resource owner's password
    #[clap(short, long, env, hide_env_values = true)]
    password: Password,

    /// The scope to request with the password grant
    #[clap(long, env, default_value = tollgate_tokens::config::DEFAULT_SCOPE)]
    scope: String,

    /// Seconds before its stated expiry that a token is considered expired
    #[clap(long, env, default_value = "60")]
    safety_margin: u64,

    /// The local file used to store credentials
    #[clap(
        short = 'f',
        long,
        env,
        value_name = "FILE",
        default_value = ".credentials.json"
    )]
    credentials_file: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = ClientConfig::new(
        opts.token_url_base,
        opts.token_url_path,
        opts.client_id,
        opts.client_secret,
        opts.username,
        opts.password,
    )?
    .with_scope(opts.scope);

    let endpoint = ReqwestTokenEndpoint::new(reqwest::Client::builder().https_only(true).build()?);

    let safety_margin = DurationMillis::from_secs(opts.safety_margin);
    let manager = TokenLifecycleManager::with_lifecycle_config(
        FileStore::new(opts.credentials_file),
        endpoint,
        client,
        LifecycleConfig::default().with_safety_margin(safety_margin),
    );

    let token = manager.ensure_valid_token().await?;
    tracing::info!(
        token = format_args!("{:#?}", token),
        "first access token"
    );

    let mut interval = time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;

        match manager.ensure_valid_token().await {
            Ok(token) => {
                let record = manager.current_record().await?;
                let state = record.state_at(System.now(), safety_margin);
                match state {
                    TokenState::Fresh => tracing::debug!(
                        ?state,
                        token = format_args!("{:#?}", token),
                        expires_in = record.expires_in().0,
                        refresh_time = record.refresh_time().0,
                        "pulled token"
                    ),
                    _ => tracing::warn!(
                        ?state,
                        expires_in = record.expires_in().0,
                        refresh_time = record.refresh_time().0,
                        "pulled token that is already near expiry"
                    ),
                }
            }
            Err(error) => {
                tracing::error!(
                    error = (&error as &dyn std::error::Error),
                    "unable to obtain a valid access token"
                );
            }
        }
    }
}
