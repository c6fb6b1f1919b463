//! tidewire: command-line client for a realtime server.
//!
//! `listen` joins a channel and prints everything it receives as JSON
//! lines; `send` pushes one broadcast and exits.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tidewire_common::TidewireError;
use tidewire_config::{LoggingConfig, TidewireConfig};

#[derive(Parser)]
#[command(name = "tidewire", about = "Realtime channel client")]
struct Args {
    /// Config file. Defaults to the platform config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `realtime.url`.
    #[arg(long)]
    url: Option<String>,

    /// Overrides `realtime.api_key`.
    #[arg(long, env = "TIDEWIRE_API_KEY")]
    api_key: Option<String>,

    /// Access token sent with joins.
    #[arg(long, env = "TIDEWIRE_ACCESS_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Join a channel and print incoming events until interrupted.
    Listen {
        channel: String,

        /// Watch row changes in this table.
        #[arg(long)]
        table: Option<String>,

        #[arg(long, default_value = "public")]
        schema: String,

        /// Only these change kinds (INSERT, UPDATE, DELETE). All when omitted.
        #[arg(long = "on")]
        kinds: Vec<String>,

        /// Server-side row predicate, e.g. `id=eq.7`.
        #[arg(long)]
        filter: Option<String>,

        /// Broadcast events to print. Repeatable.
        #[arg(long = "event")]
        events: Vec<String>,

        /// Also print presence diffs.
        #[arg(long)]
        presence: bool,

        /// Receive our own broadcasts.
        #[arg(long)]
        receive_own: bool,

        #[arg(long)]
        private: bool,
    },

    /// Broadcast one message to a channel.
    Send {
        channel: String,
        event: String,

        /// JSON object payload.
        #[arg(default_value = "{}")]
        payload: String,

        /// Join first and send over the socket instead of HTTP.
        #[arg(long)]
        join: bool,

        #[arg(long)]
        private: bool,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tidewire: {e}");
            std::process::exit(2);
        }
    };
    init_tracing(&config.logging);

    if let Err(e) = commands::run(config.realtime, args.command).await {
        tracing::error!(error = %e, "Command failed");
        std::process::exit(1);
    }
}

fn load(args: &Args) -> Result<TidewireConfig, TidewireError> {
    let mut config = match &args.config {
        Some(path) => tidewire_config::load_from_path(path)?,
        None => tidewire_config::load_default()?,
    };
    if let Some(url) = &args.url {
        config.realtime.url = url.clone();
    }
    if let Some(key) = &args.api_key {
        config.realtime.api_key = key.clone();
    }
    if args.token.is_some() {
        config.realtime.access_token = args.token.clone();
    }
    tidewire_config::validation::validate(&config)?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = logging.level.as_directive();
        let mut directive =
            format!("tidewire={level},tidewire_config={level},tidewire_realtime={level}");
        if logging.log_frames {
            directive.push_str(",tidewire_realtime::client=trace");
        }
        directive.into()
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
