//! Transport layer abstraction for reconciliation.

use crate::error::{SyncError, SyncResult};
use std::collections::VecDeque;
use vaultsync_protocol::{PullRequest, PushAck, PushRequest};

/// A transport carries exchange messages to and from one remote.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, mock for testing, etc.).
/// Implementations only move bytes; all reconciliation decisions stay in
/// the engine.
pub trait SyncTransport: Send + Sync {
    /// Pushes a batch of local change sets; returns the remote's durable
    /// acknowledgement.
    fn push(&self, request: &PushRequest) -> SyncResult<PushAck>;

    /// Pulls changes the remote holds past a cursor. The response is a
    /// push-shaped batch flowing inbound.
    fn pull(&self, request: &PullRequest) -> SyncResult<PushRequest>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}

/// A mock transport for testing.
///
/// Responses are scripted as queues; with no scripted response, `push`
/// acknowledges the whole batch and `pull` returns an empty batch, so
/// engine cycles terminate.
#[derive(Debug, Default)]
pub struct MockTransport {
    connected: std::sync::atomic::AtomicBool,
    push_acks: std::sync::Mutex<VecDeque<PushAck>>,
    pull_responses: std::sync::Mutex<VecDeque<PushRequest>>,
    next_push_error: std::sync::Mutex<Option<SyncError>>,
    next_pull_error: std::sync::Mutex<Option<SyncError>>,
    pushed: std::sync::Mutex<Vec<PushRequest>>,
    pulled: std::sync::Mutex<Vec<PullRequest>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: std::sync::atomic::AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Queues a push acknowledgement.
    pub fn queue_push_ack(&self, ack: PushAck) {
        self.push_acks.lock().unwrap().push_back(ack);
    }

    /// Queues a pull response batch.
    pub fn queue_pull_response(&self, response: PushRequest) {
        self.pull_responses.lock().unwrap().push_back(response);
    }

    /// Makes the next push fail with the given error.
    pub fn fail_next_push(&self, error: SyncError) {
        *self.next_push_error.lock().unwrap() = Some(error);
    }

    /// Makes the next pull fail with the given error.
    pub fn fail_next_pull(&self, error: SyncError) {
        *self.next_pull_error.lock().unwrap() = Some(error);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected
            .store(connected, std::sync::atomic::Ordering::SeqCst);
    }

    /// All push requests received so far.
    pub fn pushed_requests(&self) -> Vec<PushRequest> {
        self.pushed.lock().unwrap().clone()
    }

    /// All pull requests received so far.
    pub fn pulled_requests(&self) -> Vec<PullRequest> {
        self.pulled.lock().unwrap().clone()
    }
}

impl SyncTransport for MockTransport {
    fn push(&self, request: &PushRequest) -> SyncResult<PushAck> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        if let Some(error) = self.next_push_error.lock().unwrap().take() {
            return Err(error);
        }
        self.pushed.lock().unwrap().push(request.clone());
        match self.push_acks.lock().unwrap().pop_front() {
            Some(ack) => Ok(ack),
            None => Ok(PushAck::new(
                request.remote_id.clone(),
                request.since + request.changesets.len() as u64,
            )),
        }
    }

    fn pull(&self, request: &PullRequest) -> SyncResult<PushRequest> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        if let Some(error) = self.next_pull_error.lock().unwrap().take() {
            return Err(error);
        }
        self.pulled.lock().unwrap().push(request.clone());
        match self.pull_responses.lock().unwrap().pop_front() {
            Some(response) => Ok(response),
            None => Ok(PushRequest::new(
                request.remote_id.clone(),
                request.since,
                Vec::new(),
            )),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected
            .store(false, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_transport_connection() {
        let transport = MockTransport::new();
        assert!(transport.is_connected());

        transport.set_connected(false);
        assert!(!transport.is_connected());

        transport.set_connected(true);
        transport.close().unwrap();
        assert!(!transport.is_connected());
    }

    #[test]
    fn mock_transport_not_connected_error() {
        let transport = MockTransport::new();
        transport.set_connected(false);

        let result = transport.push(&PushRequest::new("origin", 0, Vec::new()));
        assert!(matches!(result, Err(SyncError::NotConnected)));
    }

    #[test]
    fn mock_transport_default_ack_covers_batch() {
        let transport = MockTransport::new();
        let ack = transport
            .push(&PushRequest::new("origin", 3, Vec::new()))
            .unwrap();
        assert_eq!(ack.applied_through, 3);
    }

    #[test]
    fn mock_transport_scripted_responses_drain_in_order() {
        let transport = MockTransport::new();
        transport.queue_push_ack(PushAck::new("origin", 7));
        transport.queue_push_ack(PushAck::new("origin", 9));

        let request = PushRequest::new("origin", 0, Vec::new());
        assert_eq!(transport.push(&request).unwrap().applied_through, 7);
        assert_eq!(transport.push(&request).unwrap().applied_through, 9);
        assert_eq!(transport.pushed_requests().len(), 2);
    }

    #[test]
    fn mock_transport_injected_failure_is_one_shot() {
        let transport = MockTransport::new();
        transport.fail_next_pull(SyncError::transport_retryable("flaky link"));

        let request = PullRequest::new("laptop", 0, 10);
        assert!(transport.pull(&request).is_err());
        assert!(transport.pull(&request).is_ok());
    }
}
