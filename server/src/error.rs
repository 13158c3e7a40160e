use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no client connected within {0:?}")]
    AcceptTimeout(Duration),

    #[error(transparent)]
    Key(#[from] launch_keys::KeyError),

    #[error(transparent)]
    Ssh(#[from] russh::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
