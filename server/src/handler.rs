use std::collections::HashMap;

use launch_protocol::ExecDescriptor;
use launch_protocol::READY_REQUEST;
use launch_protocol::WindowChange;
use launch_protocol::signals::raw_from_sig;
use russh::Channel;
use russh::ChannelId;
use russh::Sig;
use russh::keys::PublicKey;
use russh::server::Auth;
use russh::server::Handler;
use russh::server::Msg;
use russh::server::Session;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::ServerError;
use crate::exec;
use crate::exec::RunningChild;
use crate::pty::Pty;

#[derive(Debug, Default)]
struct ChannelState {
    pty: Option<Pty>,
    child: Option<RunningChild>,
}

/// Per-connection protocol state. The connection serves exactly one client,
/// authenticated by the pinned shared key, and refuses session channels until
/// that client has announced readiness.
pub(crate) struct ConnectionHandler {
    authorized: PublicKey,
    ready: bool,
    channels: HashMap<ChannelId, ChannelState>,
}

impl ConnectionHandler {
    pub(crate) fn new(authorized: PublicKey) -> Self {
        Self {
            authorized,
            ready: false,
            channels: HashMap::new(),
        }
    }
}

impl Handler for ConnectionHandler {
    type Error = ServerError;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if public_key.key_data() == self.authorized.key_data() {
            info!(user, "client authenticated");
            return Ok(Auth::Accept);
        }
        warn!(user, "rejecting unknown public key");
        Ok(Auth::Reject {
            proceed_with_methods: None,
            partial_success: false,
        })
    }

    /// The readiness announcement rides a forwarding request with a
    /// well-known address and no actual listener behind it.
    async fn tcpip_forward(
        &mut self,
        address: &str,
        _port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if address == READY_REQUEST {
            debug!("client announced readiness");
            self.ready = true;
            return Ok(true);
        }
        warn!(address, "unsupported forwarding request");
        Ok(false)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if !self.ready {
            warn!("refusing session channel before readiness");
            return Ok(false);
        }
        debug!(channel = ?channel.id(), "session channel opened");
        self.channels.insert(channel.id(), ChannelState::default());
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        // Terminal modes are left to the client's raw-mode terminal.
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let handle = session.handle();
        let Some(state) = self.channels.get_mut(&channel) else {
            let _ = handle.channel_failure(channel).await;
            return Ok(());
        };
        if state.pty.is_some() || state.child.is_some() {
            warn!(?channel, "rejecting duplicate pty request");
            let _ = handle.channel_failure(channel).await;
            return Ok(());
        }
        let size = WindowChange {
            columns: col_width,
            rows: row_height,
            width_pixels: pix_width,
            height_pixels: pix_height,
        };
        match Pty::open(size) {
            Ok(pty) => {
                debug!(?channel, term, col_width, row_height, "allocated pty");
                state.pty = Some(pty);
            }
            Err(err) => {
                warn!(?channel, "failed to allocate pty: {err}");
                let _ = handle.channel_failure(channel).await;
            }
        }
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let handle = session.handle();
        let payload = String::from_utf8_lossy(data);
        let descriptor = match ExecDescriptor::decode(&payload) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(?channel, "malformed exec payload: {err}");
                let _ = handle.channel_failure(channel).await;
                let _ = handle.close(channel).await;
                return Ok(());
            }
        };

        let Some(state) = self.channels.get_mut(&channel) else {
            let _ = handle.channel_failure(channel).await;
            return Ok(());
        };
        if state.child.is_some() {
            warn!(?channel, "rejecting second exec on channel");
            let _ = handle.channel_failure(channel).await;
            return Ok(());
        }

        info!(
            argv = ?descriptor.argv,
            uid = descriptor.uid,
            gid = descriptor.gid,
            dir = %descriptor.dir,
            "executing command"
        );
        match exec::spawn_child(handle.clone(), channel, &descriptor, state.pty.as_mut()) {
            Ok(child) => {
                state.child = Some(child);
            }
            Err(err) => {
                warn!(?channel, "failed to start command: {err}");
                let _ = handle.channel_failure(channel).await;
                let _ = handle.close(channel).await;
            }
        }
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        warn!(?channel, "unsupported session request: shell");
        let _ = session.handle().channel_failure(channel).await;
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        warn!(?channel, name, "unsupported session request: subsystem");
        let _ = session.handle().channel_failure(channel).await;
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        // The environment arrives inside the exec payload instead.
        warn!(?channel, variable_name, "unsupported session request: env");
        let _ = session.handle().channel_failure(channel).await;
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(pty) = self.channels.get(&channel).and_then(|s| s.pty.as_ref()) {
            let size = WindowChange {
                columns: col_width,
                rows: row_height,
                width_pixels: pix_width,
                height_pixels: pix_height,
            };
            if let Err(err) = pty.resize(size) {
                warn!(?channel, "failed to resize pty: {err}");
            }
        }
        Ok(())
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        signal: Sig,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let Some(raw) = raw_from_sig(&signal) else {
            debug!(?channel, ?signal, "ignoring unsupported signal");
            return Ok(());
        };
        if let Some(child) = self.channels.get(&channel).and_then(|s| s.child.as_ref()) {
            debug!(?channel, ?signal, "forwarding signal to child");
            child.deliver_signal(raw);
        }
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(child) = self.channels.get(&channel).and_then(|s| s.child.as_ref()) {
            if let Some(stdin) = child.stdin() {
                let _ = stdin.send(data.to_vec()).await;
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(child) = self
            .channels
            .get_mut(&channel)
            .and_then(|s| s.child.as_mut())
        {
            child.close_stdin();
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Dropping the state kills any still-running child.
        debug!(?channel, "session channel closed");
        self.channels.remove(&channel);
        Ok(())
    }
}
