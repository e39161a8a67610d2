//! Request correlation table.

use crate::error::ServiceError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use orca_protocol::Response;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Outstanding requests keyed by request id.
///
/// Every entry resolves at most once: [`PendingRequests::complete`] and
/// [`PendingRequests::remove`] both take the entry out of the map atomically.
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: DashMap<u64, oneshot::Sender<Response>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `request_id` and returns the future its response resolves.
    ///
    /// An id whose previous caller dropped its future is reusable; an id with
    /// a live waiter is rejected.
    pub fn register(&self, request_id: u64) -> Result<PendingResponse, ServiceError> {
        let (tx, rx) = oneshot::channel();
        match self.entries.entry(request_id) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_closed() {
                    return Err(ServiceError::DuplicateRequestId(request_id));
                }
                occupied.insert(tx);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(tx);
            }
        }
        Ok(PendingResponse { request_id, rx })
    }

    /// Resolves the entry matching `response`. Returns `false` when no live
    /// waiter exists for its request id.
    pub fn complete(&self, response: Response) -> bool {
        let request_id = response.request_id();
        match self.entries.remove(&request_id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Drops the entry for `request_id`, if any.
    pub fn remove(&self, request_id: u64) -> bool {
        self.entries.remove(&request_id).is_some()
    }

    pub fn contains(&self, request_id: u64) -> bool {
        self.entries.contains_key(&request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Future for the response to one request.
///
/// Fails with [`ServiceError::Cancelled`] if the entry is removed without a
/// response.
#[derive(Debug)]
pub struct PendingResponse {
    request_id: u64,
    rx: oneshot::Receiver<Response>,
}

impl PendingResponse {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }
}

impl Future for PendingResponse {
    type Output = Result<Response, ServiceError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| ServiceError::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orca_protocol::{EvaluationConfigResponse, Response};

    fn response(request_id: u64) -> Response {
        Response::EvaluationConfig(EvaluationConfigResponse {
            request_id,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_register_and_complete() {
        let pending = PendingRequests::new();
        let fut = pending.register(42).unwrap();
        assert_eq!(fut.request_id(), 42);
        assert_eq!(pending.len(), 1);

        assert!(pending.complete(response(42)));
        assert!(pending.is_empty());
        assert_eq!(fut.await.unwrap().request_id(), 42);
    }

    #[test]
    fn test_pending_until_completed() {
        let pending = PendingRequests::new();
        let mut fut = tokio_test::task::spawn(pending.register(3).unwrap());
        tokio_test::assert_pending!(fut.poll());

        assert!(pending.complete(response(3)));
        assert!(fut.is_woken());
        let result = tokio_test::assert_ready!(fut.poll());
        assert_eq!(result.unwrap().request_id(), 3);
    }

    #[tokio::test]
    async fn test_resolves_at_most_once() {
        let pending = PendingRequests::new();
        let _fut = pending.register(1).unwrap();
        assert!(pending.complete(response(1)));
        assert!(!pending.complete(response(1)));
    }

    #[test]
    fn test_unmatched_response() {
        let pending = PendingRequests::new();
        assert!(!pending.complete(response(5)));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let pending = PendingRequests::new();
        let _live = pending.register(7).unwrap();
        assert!(matches!(
            pending.register(7),
            Err(ServiceError::DuplicateRequestId(7))
        ));
    }

    #[test]
    fn test_abandoned_id_reusable() {
        let pending = PendingRequests::new();
        drop(pending.register(7).unwrap());
        assert!(pending.register(7).is_ok());
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_cancels_future() {
        let pending = PendingRequests::new();
        let fut = pending.register(9).unwrap();
        assert!(pending.remove(9));
        assert!(!pending.contains(9));
        assert!(matches!(fut.await, Err(ServiceError::Cancelled)));
    }
}
