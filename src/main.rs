mod cache;
mod credentials;
mod dispatch;
mod pipeline;
#[cfg(feature = "serve")]
mod serve;
#[cfg(test)]
mod testing;
mod toggle;
mod twitter;

use crate::dispatch::parse_limit;
use crate::pipeline::DEFAULT_CONCURRENCY;
use clap::{ArgEnum, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use url::Url;

/// Show or hide retweets from everyone you follow on Twitter
#[derive(Parser, Debug)]
#[clap(version, about)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web app
    Serve(ServeArgs),
    /// Update every followed account once, using tokens from a file
    Toggle(ToggleArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Twitter app consumer key
    #[clap(long, env = "APP_KEY", hide_env_values = true)]
    app_key: String,
    /// Twitter app consumer secret
    #[clap(long, env = "APP_SECRET", hide_env_values = true)]
    app_secret: String,
    /// Address to listen on
    #[clap(long, env = "HOST", default_value = "127.0.0.1")]
    host: IpAddr,
    #[clap(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,
    /// Base URL the app is reached at, used for the OAuth callback
    #[clap(long, env = "BLINDFOLD_PUBLIC_URL")]
    public_url: Option<Url>,
    /// Number of friendship updates to have in flight at once
    #[clap(long, env = "BLINDFOLD_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY, parse(try_from_str = parse_limit))]
    concurrency: usize,
    /// External cache endpoint to POST `{"tag": "friends"}` to after an update
    #[clap(long, env = "BLINDFOLD_CACHE_PURGE_URL")]
    cache_purge_url: Option<Url>,
    /// Seconds a sign-in lasts
    #[clap(long, env = "BLINDFOLD_SESSION_MAX_AGE", default_value_t = 25_920)]
    session_max_age: u32,
    /// Seconds a friends list is served from cache before Twitter is asked again
    #[clap(long, env = "BLINDFOLD_CACHE_TTL", default_value_t = 3600)]
    cache_ttl: u32,
    /// Separately hosted front end allowed to make credentialed requests
    #[clap(long, env = "BLINDFOLD_CORS_ORIGIN")]
    cors_origin: Option<Url>,
    /// Directory holding the built front end
    #[clap(long, env = "BLINDFOLD_STATIC_DIR", default_value = "./dist")]
    static_dir: PathBuf,
    /// Open the app in a browser once the server is up
    #[clap(long)]
    launch: bool,
}

#[derive(ArgEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retweets {
    On,
    Off,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ToggleArgs {
    /// Path to the authentication details file
    #[clap(short, long, default_value = "./auth.json")]
    auth: PathBuf,
    /// Whether retweets should be shown
    #[clap(long, arg_enum)]
    retweets: Retweets,
    /// Number of friendship updates to have in flight at once
    #[clap(long, default_value_t = DEFAULT_CONCURRENCY, parse(try_from_str = parse_limit))]
    concurrency: usize,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = main2().await {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn main2() -> anyhow::Result<()> {
    let args: Args = Args::parse();
    match args.command {
        Command::Serve(args) => run_server(args).await,
        Command::Toggle(args) => toggle::toggle(args).await,
    }
}

#[cfg(feature = "serve")]
async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    serve::serve(args).await
}

#[cfg(not(feature = "serve"))]
async fn run_server(_: ServeArgs) -> anyhow::Result<()> {
    anyhow::bail!("This build does not include the web app, rebuild with `--features serve`")
}
