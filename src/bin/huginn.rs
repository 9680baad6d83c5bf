//! huginn: command-line client
//!
//! Runs a read through a configured engine and prints each response.
//! Handy for checking a config file, the retry policy, or polling against
//! a live API.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use huginn::{
    CacheEntry, EngineConfig, ExecuteOptions, Huginn, OperationOptions, Polling, RequestOptions,
    Route,
};
use serde_json::Value;
use tokio::sync::mpsc;

/// Huginn command-line client
#[derive(Parser)]
#[command(name = "huginn")]
#[command(version = huginn::PKG_VERSION)]
#[command(about = "Request orchestration client")]
struct Args {
    /// Config file (default: ~/.huginn/config.toml, then /etc/huginn/config.toml)
    #[arg(short, long, env = "HUGINN_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL, overriding the config file
    #[arg(short, long, env = "HUGINN_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// GET a path and print the response body
    Get {
        /// Path relative to the base URL (e.g. "users/42")
        path: String,
        /// Query parameter as key=value (repeatable)
        #[arg(short, long, value_parser = parse_pair)]
        query: Vec<(String, String)>,
        /// Poll every N milliseconds instead of exiting after one response
        #[arg(long)]
        poll: Option<u64>,
        /// Stop after this many responses when polling
        #[arg(long, default_value_t = 0)]
        count: usize,
    },
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let config = match (&args.base_url, &args.config) {
        (Some(url), None) => EngineConfig::new(url.clone()),
        (base_url, path) => {
            let mut config = EngineConfig::load(path.as_deref())?;
            if let Some(url) = base_url {
                config.base_url = url.clone();
            }
            config
        }
    };

    let client = Huginn::builder()
        .config(&config)
        .header("user-agent", huginn::version::user_agent())
        .build()?;

    match args.command {
        Command::Get {
            path,
            query,
            poll,
            count,
        } => {
            let mut request = RequestOptions::new();
            for (key, value) in query {
                request = request.query(key, value);
            }
            let mut options = OperationOptions::new().request(request);
            if let Some(ms) = poll {
                options = options.plugin(Polling::Every(Duration::from_millis(ms)));
            }

            let controller = client.query(Route::get(&path), options);
            let response = controller
                .execute(OperationOptions::default(), ExecuteOptions::default())
                .await?;
            print_response(response.status, response.data(), response.error());

            if poll.is_none() {
                return Ok(());
            }

            let (tx, mut rx) = mpsc::unbounded_channel::<CacheEntry>();
            let subscription = controller.subscribe(Arc::new(move |entry: &CacheEntry| {
                if !entry.state.fetching {
                    let _ = tx.send(entry.clone());
                }
            }))?;
            controller.mount()?;

            let mut seen = 1;
            while count == 0 || seen < count {
                tokio::select! {
                    entry = rx.recv() => match entry {
                        Some(entry) => {
                            let status = if entry.state.error.is_some() { 0 } else { 200 };
                            print_response(status, entry.state.data.as_ref(), entry.state.error.as_ref());
                            seen += 1;
                        }
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }

            subscription.unsubscribe();
            controller.unmount()?;
        }
    }

    Ok(())
}

fn print_response(status: u16, data: Option<&Value>, error: Option<&huginn::RequestError>) {
    if let Some(error) = error {
        eprintln!("error: {error}");
        if let huginn::RequestError::Http { body, .. } = error {
            if !body.is_null() {
                eprintln!("{body}");
            }
        }
        return;
    }
    if status != 0 {
        println!("status: {status}");
    }
    match data {
        Some(value) => match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{text}"),
            Err(_) => println!("{value}"),
        },
        None => println!("(no data)"),
    }
}
