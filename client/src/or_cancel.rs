use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

#[async_trait]
pub(crate) trait OrCancelExt: Sized {
    type Output;

    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, ClientError>;
}

#[async_trait]
impl<F> OrCancelExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, ClientError> {
        tokio::select! {
            _ = token.cancelled() => Err(ClientError::Cancelled),
            res = self => Ok(res),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_when_not_cancelled() {
        let token = CancellationToken::new();
        let res = async { 7 }.or_cancel(&token).await.unwrap();
        assert_eq!(res, 7);
    }

    #[tokio::test]
    async fn cancellation_wins_over_a_pending_future() {
        let token = CancellationToken::new();
        token.cancel();
        let res = std::future::pending::<()>().or_cancel(&token).await;
        assert!(matches!(res, Err(ClientError::Cancelled)));
    }
}
