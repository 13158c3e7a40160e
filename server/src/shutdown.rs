//! Process-wide shutdown wiring. The first SIGINT or SIGTERM cancels the
//! returned token so in-flight work can wind down; a second one exits
//! immediately.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Installs the shutdown signal handler and returns the token it cancels.
///
/// Panics when called twice; there is exactly one shutdown context per
/// process.
pub fn install() -> std::io::Result<CancellationToken> {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        panic!("shutdown handler installed twice");
    }

    let token = CancellationToken::new();
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        info!("shutdown requested");
        cancel.cancel();
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        std::process::exit(1);
    });

    Ok(token)
}
