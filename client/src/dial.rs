//! Connection establishment. The server usually comes up moments after the
//! client, so dialing retries on a short period until the budget runs out.
//! Host key verification is strict: the server must present the shared key.

use std::sync::Arc;
use std::time::Duration;

use russh::client;
use russh::client::AuthResult;
use russh::keys::PrivateKey;
use russh::keys::PrivateKeyWithHashAlg;
use russh::keys::PublicKey;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ClientError;

const DIAL_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);
const DIAL_RETRY_DELAY: Duration = Duration::from_millis(500);
const DIAL_BUDGET: Duration = Duration::from_secs(60);

pub(crate) struct PinnedHostKey {
    expected: PublicKey,
}

impl client::Handler for PinnedHostKey {
    type Error = ClientError;

    async fn check_server_key(&mut self, server_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(server_key.key_data() == self.expected.key_data())
    }
}

/// Dials and authenticates. Connection refusals and timeouts are retried
/// until the budget is spent; a host key mismatch or a rejected login is
/// fatal immediately.
pub(crate) async fn dial(
    addr: &str,
    key: Arc<PrivateKey>,
) -> Result<client::Handle<PinnedHostKey>, ClientError> {
    let config = Arc::new(client::Config::default());
    let deadline = Instant::now() + DIAL_BUDGET;
    loop {
        let handler = PinnedHostKey {
            expected: key.public_key().clone(),
        };
        let attempt = tokio::time::timeout(
            DIAL_ATTEMPT_TIMEOUT,
            client::connect(config.clone(), addr, handler),
        )
        .await;
        match attempt {
            Ok(Ok(mut handle)) => {
                let auth = handle
                    .authenticate_publickey(
                        "root",
                        PrivateKeyWithHashAlg::new(Arc::clone(&key), None),
                    )
                    .await?;
                return match auth {
                    AuthResult::Success => Ok(handle),
                    AuthResult::Failure { .. } => Err(ClientError::AuthenticationFailed),
                };
            }
            Ok(Err(ClientError::Ssh(russh::Error::UnknownKey))) => {
                return Err(ClientError::HostKeyMismatch);
            }
            Ok(Err(err)) => {
                debug!("waiting for server to start: {err}");
            }
            Err(_) => {
                debug!("waiting for server to start: attempt timed out");
            }
        }
        if Instant::now() + DIAL_RETRY_DELAY >= deadline {
            return Err(ClientError::ConnectTimeout {
                addr: addr.to_string(),
                budget: DIAL_BUDGET,
            });
        }
        tokio::time::sleep(DIAL_RETRY_DELAY).await;
    }
}
