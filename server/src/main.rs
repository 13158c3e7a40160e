use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Address to listen on, e.g. 0.0.0.0:2200.
    #[arg(long)]
    bind: String,

    /// How long to wait for the client before giving up.
    #[arg(long, default_value_t = 60)]
    timeout_seconds: u64,

    /// Location of the shared secret between server and client.
    #[arg(long)]
    key_path: Option<PathBuf>,
}

fn default_key_path() -> Option<PathBuf> {
    Some(dirs::home_dir()?.join(".launch").join("key"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let key_path = match cli.key_path {
        Some(path) => path,
        None => default_key_path().context("cannot determine home directory")?,
    };
    let shutdown = launch_server::shutdown::install()?;
    launch_server::run(
        &cli.bind,
        Duration::from_secs(cli.timeout_seconds),
        &key_path,
        shutdown,
    )
    .await?;
    Ok(())
}
