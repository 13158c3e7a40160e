use std::time::Duration;

use launch_protocol::DescriptorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not reach {addr} within {budget:?}")]
    ConnectTimeout { addr: String, budget: Duration },

    #[error("server presented an unexpected host key")]
    HostKeyMismatch,

    #[error("server rejected our key")]
    AuthenticationFailed,

    #[error("readiness request not acknowledged after {attempts} attempts")]
    NotReady { attempts: u32 },

    #[error("connection lost")]
    ConnectionLost,

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Key(#[from] launch_keys::KeyError),

    #[error(transparent)]
    Ssh(#[from] russh::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
