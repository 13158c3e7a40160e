//! Readiness announcement. Before opening a session channel the client tells
//! the server it is fully set up, using a forwarding request with a
//! well-known address as the carrier. The server acknowledges and starts
//! accepting session channels.

use russh::client;
use tracing::warn;

use launch_protocol::READY_REQUEST;

use crate::dial::PinnedHostKey;
use crate::error::ClientError;

const RETRY_LIMIT: u32 = 3;

pub(crate) async fn announce_ready(
    handle: &mut client::Handle<PinnedHostKey>,
) -> Result<(), ClientError> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match handle.tcpip_forward(READY_REQUEST, 0).await.map(|_| ()) {
            Ok(()) => return Ok(()),
            Err(err) => {
                if attempts > RETRY_LIMIT {
                    return Err(ClientError::NotReady { attempts });
                }
                warn!("readiness request not acknowledged ({attempts}/{RETRY_LIMIT}): {err}");
            }
        }
    }
}
