use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use launch_client::Client;
use launch_client::ClientError;
use launch_client::ExecOptions;
use launch_client::IoStreams;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Server address, e.g. 127.0.0.1:2200.
    #[arg(long)]
    server: String,

    /// Location of the shared secret between server and client.
    #[arg(long)]
    key_path: Option<PathBuf>,

    /// Command to run remotely; defaults to a shell.
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

fn default_key_path() -> Option<PathBuf> {
    Some(dirs::home_dir()?.join(".launch").join("key"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let key_path = match cli.key_path {
        Some(path) => path,
        None => default_key_path().context("cannot determine home directory")?,
    };
    let key = launch_keys::load_or_generate(&key_path)?;

    let mut command = cli.command.into_iter();
    let program = command.next().unwrap_or_else(|| "/bin/bash".to_string());
    let args: Vec<String> = command.collect();

    let client = Client::new(key, CancellationToken::new());
    let result = client
        .exec(
            &cli.server,
            ExecOptions {
                command: program,
                args,
                env: Vec::new(),
                streams: IoStreams::inherited(),
            },
        )
        .await;

    match result {
        Ok(code) => std::process::exit(code as i32),
        Err(err @ ClientError::ConnectionLost) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}
