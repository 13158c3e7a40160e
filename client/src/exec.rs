//! Runs one remote command: dial, announce readiness, open a session channel,
//! optionally allocate a remote pty mirroring the local terminal, then pump
//! bytes and control requests until the remote side reports an exit.

use std::sync::Arc;
use std::time::Duration;

use launch_protocol::WindowTracker;
use launch_protocol::signals::sig_from_raw;
use russh::ChannelMsg;
use russh::Pty;
use russh::Sig;
use russh::keys::PrivateKey;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::dial;
use crate::error::ClientError;
use crate::identity;
use crate::or_cancel::OrCancelExt;
use crate::ready;
use crate::terminal;
use crate::terminal::RawModeGuard;

const WINDOW_POLL_PERIOD: Duration = Duration::from_secs(1);

/// Where the remote process's bytes go and come from. Injectable so callers
/// can capture output instead of inheriting the process's stdio.
pub struct IoStreams {
    pub stdin: Box<dyn AsyncRead + Send + Unpin>,
    pub stdout: Box<dyn AsyncWrite + Send + Unpin>,
    pub stderr: Box<dyn AsyncWrite + Send + Unpin>,
    /// Request a remote pty and mirror the local terminal onto it.
    pub interactive: bool,
}

impl IoStreams {
    pub fn inherited() -> Self {
        Self {
            stdin: Box::new(tokio::io::stdin()),
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
            interactive: terminal::stdin_is_tty(),
        }
    }
}

pub struct ExecOptions {
    pub command: String,
    pub args: Vec<String>,
    /// Extra `KEY=VALUE` entries appended to the captured environment.
    pub env: Vec<String>,
    pub streams: IoStreams,
}

pub struct Client {
    key: Arc<PrivateKey>,
    shutdown: CancellationToken,
}

impl Client {
    pub fn new(key: PrivateKey, shutdown: CancellationToken) -> Self {
        Self {
            key: Arc::new(key),
            shutdown,
        }
    }

    /// Executes the command on `server` and returns its exit status.
    pub async fn exec(&self, server: &str, options: ExecOptions) -> Result<u32, ClientError> {
        let mut handle = dial::dial(server, Arc::clone(&self.key))
            .or_cancel(&self.shutdown)
            .await??;
        ready::announce_ready(&mut handle)
            .or_cancel(&self.shutdown)
            .await??;
        let mut channel = handle.channel_open_session().await?;

        let ExecOptions {
            command,
            args,
            env,
            streams,
        } = options;
        let IoStreams {
            mut stdin,
            mut stdout,
            mut stderr,
            interactive,
        } = streams;

        let mut tracker = WindowTracker::new();
        let (signal_tx, mut signal_rx) = mpsc::channel::<Sig>(16);
        let mut raw_guard = None;
        let mut signal_forwarder = None;
        if interactive {
            raw_guard = Some(RawModeGuard::enable()?);
            let size = terminal::window_size()?;
            // The initial geometry rides the pty request; only later changes
            // become window-change requests.
            tracker.observe(size);
            let term = std::env::var("TERM").unwrap_or_default();
            let modes = [
                (Pty::ECHO, 0),
                (Pty::TTY_OP_ISPEED, 14400),
                (Pty::TTY_OP_OSPEED, 14400),
            ];
            channel
                .request_pty(false, &term, size.columns, size.rows, 0, 0, &modes)
                .await?;
            signal_forwarder = Some(SignalForwarder::spawn(signal_tx));
        } else {
            drop(signal_tx);
        }

        let descriptor = identity::local_descriptor(&command, &args, &env);
        channel.exec(false, descriptor.encode()?.into_bytes()).await?;

        let mut poll = tokio::time::interval(WINDOW_POLL_PERIOD);
        let mut stdin_buf = [0u8; 8192];
        let mut stdin_closed = false;
        let mut signals_open = interactive;
        let mut exit_code = None;

        loop {
            tokio::select! {
                read = stdin.read(&mut stdin_buf), if !stdin_closed => {
                    match read {
                        Ok(0) | Err(_) => {
                            stdin_closed = true;
                            channel.eof().await?;
                        }
                        Ok(n) => channel.data(&stdin_buf[..n]).await?,
                    }
                }
                msg = channel.wait() => {
                    let Some(msg) = msg else { break };
                    match msg {
                        ChannelMsg::Data { data } => {
                            stdout.write_all(&data).await?;
                            stdout.flush().await?;
                        }
                        ChannelMsg::ExtendedData { data, ext: 1 } => {
                            stderr.write_all(&data).await?;
                            stderr.flush().await?;
                        }
                        ChannelMsg::ExitStatus { exit_status } => {
                            debug!(exit_status, "remote command exited");
                            exit_code = Some(exit_status);
                        }
                        ChannelMsg::Close => break,
                        _ => {}
                    }
                }
                _ = poll.tick(), if interactive => {
                    match terminal::window_size() {
                        Ok(size) => {
                            if let Some(change) = tracker.observe(size) {
                                channel
                                    .window_change(
                                        change.columns,
                                        change.rows,
                                        change.width_pixels,
                                        change.height_pixels,
                                    )
                                    .await?;
                            }
                        }
                        Err(err) => warn!("get terminal size: {err}"),
                    }
                }
                sig = signal_rx.recv(), if signals_open => {
                    match sig {
                        Some(sig) => {
                            debug!(?sig, "forwarding signal");
                            channel.signal(sig).await?;
                        }
                        None => signals_open = false,
                    }
                }
                _ = self.shutdown.cancelled() => {
                    return Err(ClientError::Cancelled);
                }
            }
        }

        drop(signal_forwarder);
        drop(raw_guard);
        exit_code.ok_or(ClientError::ConnectionLost)
    }
}

/// Relays the fixed set of host signals into the session until dropped.
struct SignalForwarder {
    task: JoinHandle<()>,
}

impl SignalForwarder {
    fn spawn(tx: mpsc::Sender<Sig>) -> Self {
        let task = tokio::spawn(async move {
            if let Err(err) = forward_signals(tx).await {
                warn!("signal forwarding unavailable: {err}");
            }
        });
        Self { task }
    }
}

impl Drop for SignalForwarder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn forward_signals(tx: mpsc::Sender<Sig>) -> std::io::Result<()> {
    use tokio::signal::unix::SignalKind;
    use tokio::signal::unix::signal;

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    let mut tstp = signal(SignalKind::from_raw(libc::SIGTSTP))?;
    loop {
        let raw = tokio::select! {
            _ = hangup.recv() => libc::SIGHUP,
            _ = interrupt.recv() => libc::SIGINT,
            _ = quit.recv() => libc::SIGQUIT,
            _ = terminate.recv() => libc::SIGTERM,
            _ = usr1.recv() => libc::SIGUSR1,
            _ = usr2.recv() => libc::SIGUSR2,
            _ = tstp.recv() => libc::SIGTSTP,
        };
        let Some(sig) = sig_from_raw(raw) else { continue };
        if tx.send(sig).await.is_err() {
            return Ok(());
        }
    }
}
