//! Child process lifecycle for a session channel: spawn with the requested
//! credentials, forward its output back over the channel, and report the exit
//! status once it is gone.

use std::io::ErrorKind;
use std::process::Stdio;

use launch_protocol::ExecDescriptor;
use russh::ChannelId;
use russh::CryptoVec;
use russh::server::Handle;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStderr;
use tokio::process::ChildStdout;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::privilege::HostCredentialOps;
use crate::privilege::TransitionPlan;
use crate::privilege::resolve_program;
use crate::pty::Pty;

/// A spawned child and the plumbing that connects it to its channel.
/// Dropping it kills the child and tears the plumbing down.
#[derive(Debug)]
pub(crate) struct RunningChild {
    stdin_tx: Option<mpsc::Sender<Vec<u8>>>,
    pid: Option<u32>,
    writer_task: Option<JoinHandle<()>>,
    wait_task: Option<JoinHandle<()>>,
}

impl RunningChild {
    pub(crate) fn stdin(&self) -> Option<mpsc::Sender<Vec<u8>>> {
        self.stdin_tx.clone()
    }

    /// Drops the stdin sender so the child sees EOF once buffered input
    /// drains.
    pub(crate) fn close_stdin(&mut self) {
        self.stdin_tx = None;
    }

    pub(crate) fn deliver_signal(&self, raw: libc::c_int) {
        if let Some(pid) = self.pid {
            let rc = unsafe { libc::kill(pid as libc::pid_t, raw) };
            if rc != 0 {
                warn!(pid, raw, "failed to deliver signal");
            }
        }
    }
}

impl Drop for RunningChild {
    fn drop(&mut self) {
        self.stdin_tx = None;
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
        // Aborting the wait task drops the child, which was spawned with
        // kill_on_drop.
        if let Some(task) = self.wait_task.take() {
            task.abort();
        }
    }
}

pub(crate) fn spawn_child(
    handle: Handle,
    channel: ChannelId,
    descriptor: &ExecDescriptor,
    pty: Option<&mut Pty>,
) -> std::io::Result<RunningChild> {
    let argv0 = descriptor
        .argv
        .first()
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "empty argv"))?;
    let plan = TransitionPlan::from_descriptor(descriptor)?;

    let mut command = Command::new(resolve_program(argv0, descriptor.path_entry()));
    command.args(&descriptor.argv[1..]);
    command.env_clear();
    for entry in &descriptor.env {
        if let Some((key, value)) = entry.split_once('=') {
            command.env(key, value);
        }
    }
    command.kill_on_drop(true);

    match pty {
        Some(pty) => spawn_on_pty(handle, channel, command, plan, pty),
        None => spawn_piped(handle, channel, command, plan),
    }
}

fn spawn_on_pty(
    handle: Handle,
    channel: ChannelId,
    mut command: Command,
    plan: TransitionPlan,
    pty: &mut Pty,
) -> std::io::Result<RunningChild> {
    let slave = pty
        .take_slave()
        .ok_or_else(|| std::io::Error::other("pty slave already consumed"))?;
    command.stdin(Stdio::from(slave.try_clone()?));
    command.stdout(Stdio::from(slave.try_clone()?));
    command.stderr(Stdio::from(slave));
    unsafe {
        command.pre_exec(move || {
            // One thread, post-fork. Become a session leader with the slave
            // (already dup'd onto fd 0) as controlling terminal, then drop
            // privileges.
            if libc::setsid() < 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::ioctl(0, libc::TIOCSCTTY, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            plan.apply(&HostCredentialOps)
        });
    }

    let mut child = command.spawn()?;
    let pid = child.id();

    // Blocking reader on a dup of the master. It unblocks with EIO when the
    // child exits and the last slave fd closes.
    let mut reader = pty.master_reader()?;
    let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(64);
    tokio::task::spawn_blocking(move || {
        use std::io::Read;
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if out_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
    let forward_task = tokio::spawn(forward_output(handle.clone(), channel, out_rx));

    let mut writer = pty.master_writer()?;
    let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(64);
    let writer_task = tokio::spawn(async move {
        use std::io::Write;
        while let Some(bytes) = stdin_rx.recv().await {
            if writer.write_all(&bytes).and_then(|()| writer.flush()).is_err() {
                break;
            }
        }
    });

    let wait_task = tokio::spawn(async move {
        let status = child.wait().await;
        // All output has been relayed once the forwarder drains.
        let _ = forward_task.await;
        report_exit(handle, channel, status).await;
    });

    Ok(RunningChild {
        stdin_tx: Some(stdin_tx),
        pid,
        writer_task: Some(writer_task),
        wait_task: Some(wait_task),
    })
}

fn spawn_piped(
    handle: Handle,
    channel: ChannelId,
    mut command: Command,
    plan: TransitionPlan,
) -> std::io::Result<RunningChild> {
    command.stdin(Stdio::piped());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    unsafe {
        command.pre_exec(move || plan.apply(&HostCredentialOps));
    }

    let mut child = command.spawn()?;
    let pid = child.id();
    let missing = || std::io::Error::other("child stdio not captured");
    let mut child_stdin = child.stdin.take().ok_or_else(missing)?;
    let stdout = child.stdout.take().ok_or_else(missing)?;
    let stderr = child.stderr.take().ok_or_else(missing)?;

    let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(64);
    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = stdin_rx.recv().await {
            if child_stdin.write_all(&bytes).await.is_err() {
                break;
            }
        }
        let _ = child_stdin.shutdown().await;
    });

    let stdout_task = tokio::spawn(pump_stdout(handle.clone(), channel, stdout));
    let stderr_task = tokio::spawn(pump_stderr(handle.clone(), channel, stderr));

    let wait_task = tokio::spawn(async move {
        let status = child.wait().await;
        let _ = stdout_task.await;
        let _ = stderr_task.await;
        report_exit(handle, channel, status).await;
    });

    Ok(RunningChild {
        stdin_tx: Some(stdin_tx),
        pid,
        writer_task: Some(writer_task),
        wait_task: Some(wait_task),
    })
}

async fn forward_output(handle: Handle, channel: ChannelId, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(chunk) = rx.recv().await {
        if handle
            .data(channel, CryptoVec::from_slice(&chunk))
            .await
            .is_err()
        {
            break;
        }
    }
}

async fn pump_stdout(handle: Handle, channel: ChannelId, mut stdout: ChildStdout) {
    let mut buf = [0u8; 8192];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if handle
                    .data(channel, CryptoVec::from_slice(&buf[..n]))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }
}

async fn pump_stderr(handle: Handle, channel: ChannelId, mut stderr: ChildStderr) {
    let mut buf = [0u8; 8192];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if handle
                    .extended_data(channel, 1, CryptoVec::from_slice(&buf[..n]))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }
}

async fn report_exit(
    handle: Handle,
    channel: ChannelId,
    status: std::io::Result<std::process::ExitStatus>,
) {
    let code = match status {
        Ok(status) => exit_code(status),
        Err(err) => {
            warn!("wait for child failed: {err}");
            1
        }
    };
    let _ = handle.exit_status_request(channel, code).await;
    let _ = handle.eof(channel).await;
    let _ = handle.close(channel).await;
}

fn exit_code(status: std::process::ExitStatus) -> u32 {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => code as u32,
        // Terminated by a signal; report it the way shells do.
        None => (128 + status.signal().unwrap_or(0)) as u32,
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn clean_exits_report_their_code() {
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
    }

    #[test]
    fn signal_deaths_report_128_plus_signal() {
        assert_eq!(exit_code(ExitStatus::from_raw(libc::SIGKILL)), 137);
        assert_eq!(exit_code(ExitStatus::from_raw(libc::SIGTERM)), 143);
    }
}
