//! Accept loop, such as it is: the server waits for a single client, serves
//! it, and exits. A deadline bounds the wait so an orphaned server does not
//! linger.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use launch_protocol::SERVER_ID;
use russh::SshId;
use russh::keys::PrivateKey;
use socket2::TcpKeepalive;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::error::ServerError;
use crate::handler::ConnectionHandler;

pub async fn run(
    bind_addr: &str,
    timeout: Duration,
    key_path: &Path,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let key = launch_keys::load_or_generate(key_path)?;
    let listener = bind(bind_addr).await?;
    serve(listener, timeout, key, shutdown).await
}

/// Split from [`serve`] so callers can bind port 0 and learn the local
/// address first.
pub async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    Ok(TcpListener::bind(addr).await?)
}

pub async fn serve(
    listener: TcpListener,
    timeout: Duration,
    key: PrivateKey,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let authorized = key.public_key().clone();
    let config = Arc::new(russh::server::Config {
        server_id: SshId::Standard(SERVER_ID.to_string()),
        keys: vec![key],
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::ZERO),
        ..Default::default()
    });

    info!("waiting for connection");
    let (stream, peer) = tokio::select! {
        accepted = listener.accept() => accepted?,
        _ = tokio::time::sleep(timeout) => {
            warn!("timed out waiting for a client, exiting");
            return Err(ServerError::AcceptTimeout(timeout));
        }
        _ = shutdown.cancelled() => return Ok(()),
    };
    // Single-client server; stop listening as soon as someone connects.
    drop(listener);

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(60));
    socket2::SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
    info!(%peer, "connection established");

    let handler = ConnectionHandler::new(authorized);
    let session = russh::server::run_stream(config, stream, handler).await?;
    tokio::select! {
        result = session => result?,
        _ = shutdown.cancelled() => info!("closing connection"),
    }
    Ok(())
}
