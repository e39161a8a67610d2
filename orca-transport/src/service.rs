//! UDP request/response service.
//!
//! One socket receives fragment datagrams on the listen address; a second,
//! ephemeral socket sends request fragments to the peer. The receive loop
//! copies every datagram out of its scratch buffer and hands it to a small
//! pool of workers through a bounded queue, so decoding never stalls intake.

use crate::config::UdpConfig;
use crate::error::ServiceError;
use crate::pending::{PendingRequests, PendingResponse};
use crate::reassembler::Reassembler;
use bytes::Bytes;
use orca_protocol::{FragmentHeader, FragmentSplitter, Request, Response, FRAGMENT_HEADER_SIZE};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Bytes of each datagram logged at trace level.
const TRACE_HEAD_LEN: usize = 16;

/// Service counters.
#[derive(Debug, Default)]
pub struct ServiceStats {
    pub datagrams_received: AtomicU64,
    pub datagrams_dropped: AtomicU64,
    pub messages_reassembled: AtomicU64,
    pub responses_dispatched: AtomicU64,
    pub responses_unmatched: AtomicU64,
}

impl ServiceStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            datagrams_dropped: self.datagrams_dropped.load(Ordering::Relaxed),
            messages_reassembled: self.messages_reassembled.load(Ordering::Relaxed),
            responses_dispatched: self.responses_dispatched.load(Ordering::Relaxed),
            responses_unmatched: self.responses_unmatched.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ServiceStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub datagrams_received: u64,
    pub datagrams_dropped: u64,
    pub messages_reassembled: u64,
    pub responses_dispatched: u64,
    pub responses_unmatched: u64,
}

/// Validates one received datagram and feeds its payload to `reassembler`.
///
/// Returns the complete message once the datagram finishes its session.
pub fn reassemble_datagram(
    reassembler: &Reassembler,
    datagram: &Bytes,
) -> Result<Option<Bytes>, ServiceError> {
    let (header, payload) = FragmentHeader::parse_datagram(datagram)?;
    let start = FRAGMENT_HEADER_SIZE;
    let payload = datagram.slice(start..start + payload.len());
    Ok(reassembler.add_fragment(&header, payload)?)
}

/// Sends each datagram to `target` in order.
pub async fn send_datagrams(
    socket: &UdpSocket,
    target: SocketAddr,
    datagrams: &[Bytes],
) -> std::io::Result<()> {
    for datagram in datagrams {
        socket.send_to(datagram, target).await?;
    }
    Ok(())
}

/// Resolves `host:port` to the first address returned.
pub async fn resolve(endpoint: &str) -> Result<SocketAddr, ServiceError> {
    tokio::net::lookup_host(endpoint)
        .await
        .map_err(|e| ServiceError::AddressResolution(format!("{}: {}", endpoint, e)))?
        .next()
        .ok_or_else(|| ServiceError::AddressResolution(endpoint.to_string()))
}

/// Returns an unspecified address of the same family as `peer`.
pub fn unspecified_for(peer: &SocketAddr) -> SocketAddr {
    if peer.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    }
}

/// Outcome of processing one inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Dropped,
    Incomplete,
    Resolved(u64),
    Unmatched(u64),
}

/// Shared state the workers need to turn datagrams into resolved requests.
struct Dispatcher {
    reassembler: Arc<Reassembler>,
    pending: Arc<PendingRequests>,
    stats: Arc<ServiceStats>,
}

impl Dispatcher {
    fn process_datagram(&self, datagram: Bytes) -> Dispatch {
        let message = match reassemble_datagram(&self.reassembler, &datagram) {
            Ok(Some(message)) => message,
            Ok(None) => return Dispatch::Incomplete,
            Err(e) => {
                tracing::warn!("Dropping datagram ({} bytes): {}", datagram.len(), e);
                self.stats.datagrams_dropped.fetch_add(1, Ordering::Relaxed);
                return Dispatch::Dropped;
            }
        };
        self.stats
            .messages_reassembled
            .fetch_add(1, Ordering::Relaxed);

        let response = match Response::decode(&message) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Dropping undecodable message ({} bytes): {}", message.len(), e);
                self.stats.datagrams_dropped.fetch_add(1, Ordering::Relaxed);
                return Dispatch::Dropped;
            }
        };

        let request_id = response.request_id();
        if self.pending.complete(response) {
            self.stats
                .responses_dispatched
                .fetch_add(1, Ordering::Relaxed);
            Dispatch::Resolved(request_id)
        } else {
            tracing::debug!("No pending request for id={}", request_id);
            self.stats
                .responses_unmatched
                .fetch_add(1, Ordering::Relaxed);
            Dispatch::Unmatched(request_id)
        }
    }
}

/// Fragmenting UDP client that correlates responses with requests.
pub struct UdpService {
    config: UdpConfig,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    send_socket: UdpSocket,
    splitter: FragmentSplitter,
    rng: parking_lot::Mutex<StdRng>,
    pending: Arc<PendingRequests>,
    reassembler: Arc<Reassembler>,
    stats: Arc<ServiceStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl UdpService {
    /// Binds both sockets and starts the receive loop, workers and sweeper.
    pub async fn start(config: UdpConfig) -> Result<Self, ServiceError> {
        config.validate()?;

        let listen_addr = resolve(&config.listen_endpoint()).await?;
        let peer_addr = resolve(&config.send_endpoint()).await?;

        let recv_socket = UdpSocket::bind(listen_addr).await?;
        let local_addr = recv_socket.local_addr()?;
        let send_socket = UdpSocket::bind(unspecified_for(&peer_addr)).await?;

        let splitter = FragmentSplitter::for_datagram_size(config.max_datagram_size)?;
        let rng = match config.session_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let pending = Arc::new(PendingRequests::new());
        let reassembler = Arc::new(Reassembler::new(config.reassembly_timeout()));
        let stats = Arc::new(ServiceStats::default());
        let (shutdown_tx, _) = broadcast::channel(1);

        let dispatcher = Arc::new(Dispatcher {
            reassembler: reassembler.clone(),
            pending: pending.clone(),
            stats: stats.clone(),
        });

        let (queue_tx, queue_rx) = mpsc::channel(config.worker_queue_capacity);
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));

        let mut tasks = Vec::with_capacity(config.workers + 2);
        {
            let reassembler = reassembler.clone();
            tasks.push(tokio::spawn(async move { reassembler.run().await }));
        }
        tasks.push(tokio::spawn(receive_loop(
            recv_socket,
            config.effective_recv_buffer_size(),
            queue_tx,
            stats.clone(),
            shutdown_tx.subscribe(),
        )));
        for worker in 0..config.workers {
            tasks.push(tokio::spawn(worker_loop(
                worker,
                queue_rx.clone(),
                dispatcher.clone(),
            )));
        }

        tracing::info!(
            "UDP service listening on {}, sending to {} (max_datagram_size={}, workers={})",
            local_addr,
            peer_addr,
            config.max_datagram_size,
            config.workers
        );

        Ok(Self {
            config,
            local_addr,
            peer_addr,
            send_socket,
            splitter,
            rng: parking_lot::Mutex::new(rng),
            pending,
            reassembler,
            stats,
            shutdown: shutdown_tx,
            running: AtomicBool::new(true),
            tasks: parking_lot::Mutex::new(tasks),
        })
    }

    /// Sends a request and returns the future of its response.
    ///
    /// The future has no deadline; use [`UdpService::request`] or
    /// [`UdpService::cancel`] to bound the wait.
    pub async fn send_request(
        &self,
        request: impl Into<Request>,
    ) -> Result<PendingResponse, ServiceError> {
        if !self.is_running() {
            return Err(ServiceError::NotRunning);
        }

        let request = request.into();
        let request_id = request.request_id();
        let encoded = request.encode();
        let datagrams = {
            let mut rng = self.rng.lock();
            self.splitter.split(&encoded, &mut *rng)?
        };

        let pending = self.pending.register(request_id)?;
        if let Err(e) = send_datagrams(&self.send_socket, self.peer_addr, &datagrams).await {
            self.pending.remove(request_id);
            tracing::warn!("Failed to send request {}: {}", request_id, e);
            return Err(e.into());
        }

        tracing::debug!(
            "Sent {:?} request {} ({} bytes, {} fragments) to {}",
            request.message_type(),
            request_id,
            encoded.len(),
            datagrams.len(),
            self.peer_addr
        );
        Ok(pending)
    }

    /// Sends a request and waits at most `timeout` for its response.
    pub async fn request(
        &self,
        request: impl Into<Request>,
        timeout: Duration,
    ) -> Result<Response, ServiceError> {
        let pending = self.send_request(request).await?;
        let request_id = pending.request_id();

        match tokio::time::timeout(timeout, pending).await {
            Ok(result) => result,
            Err(_) => {
                self.pending.remove(request_id);
                tracing::debug!("Request {} timed out after {:?}", request_id, timeout);
                Err(ServiceError::Timeout)
            }
        }
    }

    /// Abandons a pending request. Its future fails with
    /// [`ServiceError::Cancelled`] and a late response is discarded.
    pub fn cancel(&self, request_id: u64) -> bool {
        self.pending.remove(request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Address the receive socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn config(&self) -> &UdpConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops intake and background tasks.
    ///
    /// Pending requests are left as they are; their futures only complete if
    /// the caller cancels them.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown.send(());
        self.reassembler.shutdown();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        tracing::info!(
            "UDP service stopped ({} requests still pending)",
            self.pending.len()
        );
    }
}

impl Drop for UdpService {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        self.reassembler.shutdown();
    }
}

async fn receive_loop(
    socket: UdpSocket,
    buffer_size: usize,
    queue: mpsc::Sender<Bytes>,
    stats: Arc<ServiceStats>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; buffer_size];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, from)) => {
                        // The scratch buffer is reused by the next receive
                        let datagram = Bytes::copy_from_slice(&buf[..n]);
                        stats.datagrams_received.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(
                            "Datagram from {} ({} bytes): {}",
                            from,
                            n,
                            hex::encode(&datagram[..n.min(TRACE_HEAD_LEN)])
                        );

                        match queue.try_send(datagram) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                tracing::warn!("Worker queue full, dropping datagram from {}", from);
                                stats.datagrams_dropped.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(TrySendError::Closed(_)) => break,
                        }
                    }
                    Err(e) => {
                        tracing::error!("Receive error: {}", e);
                        break;
                    }
                }
            }
            _ = shutdown.recv() => {
                break;
            }
        }
    }

    tracing::debug!("Receive loop stopped");
}

async fn worker_loop(
    worker: usize,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Bytes>>>,
    dispatcher: Arc<Dispatcher>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        match next {
            Some(datagram) => {
                if let Dispatch::Resolved(request_id) = dispatcher.process_datagram(datagram) {
                    tracing::trace!("Worker {} resolved request {}", worker, request_id);
                }
            }
            None => break,
        }
    }

    tracing::debug!("Worker {} stopped", worker);
}

#[cfg(test)]
mod tests {
    use super::*;
    use orca_protocol::{
        EvaluationConfigRequest, EvaluationConfigResponse, TerrainItem, TerrainRequest,
        TerrainResponse,
    };

    fn dispatcher() -> Dispatcher {
        Dispatcher {
            reassembler: Arc::new(Reassembler::new(Duration::from_secs(3))),
            pending: Arc::new(PendingRequests::new()),
            stats: Arc::new(ServiceStats::default()),
        }
    }

    fn terrain_response(request_id: u64, items: usize) -> Response {
        Response::Terrain(TerrainResponse {
            request_id,
            items: (0..items)
                .map(|i| TerrainItem {
                    a_longitude: 116.0 + i as f64,
                    b_longitude: 116.5 + i as f64,
                    item_type: i as u32,
                    density: 0.5,
                    field6: 1,
                    terrain_data: vec![i as u8; 20 * i],
                })
                .collect(),
        })
    }

    fn datagrams_for(response: &Response, budget: usize, session: u32) -> Vec<Bytes> {
        FragmentSplitter::new(budget)
            .unwrap()
            .split_with_session(&response.encode().unwrap(), session)
            .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_resolves_pending() {
        let d = dispatcher();
        let fut = d.pending.register(77).unwrap();
        let response = terrain_response(77, 3);

        let datagrams = datagrams_for(&response, 100, 1);
        assert!(datagrams.len() > 1);
        let mut outcomes: Vec<Dispatch> = datagrams
            .into_iter()
            .rev()
            .map(|dg| d.process_datagram(dg))
            .collect();

        assert_eq!(outcomes.pop(), Some(Dispatch::Resolved(77)));
        assert!(outcomes.iter().all(|o| *o == Dispatch::Incomplete));
        assert_eq!(fut.await.unwrap(), response);

        let stats = d.stats.snapshot();
        assert_eq!(stats.messages_reassembled, 1);
        assert_eq!(stats.responses_dispatched, 1);
    }

    #[tokio::test]
    async fn test_dispatch_unmatched_is_not_error() {
        let d = dispatcher();
        let response = Response::EvaluationConfig(EvaluationConfigResponse {
            request_id: 5,
            ..Default::default()
        });
        for dg in datagrams_for(&response, 1385, 2) {
            assert_eq!(d.process_datagram(dg), Dispatch::Unmatched(5));
        }
        assert_eq!(d.stats.snapshot().responses_unmatched, 1);
    }

    #[tokio::test]
    async fn test_dispatch_drops_malformed() {
        let d = dispatcher();

        // Shorter than a header
        assert_eq!(
            d.process_datagram(Bytes::from_static(&[1, 2, 3])),
            Dispatch::Dropped
        );

        // Header declares 100 payload bytes, carries 50
        let mut bad = FragmentHeader::new(12345, 1, 0, 100).encode().to_vec();
        bad.extend(std::iter::repeat(0u8).take(50));
        assert_eq!(d.process_datagram(Bytes::from(bad)), Dispatch::Dropped);

        // Complete message with an unknown type tag
        let mut unknown = FragmentHeader::new(1, 1, 0, 12).encode().to_vec();
        unknown.extend([9, 0]);
        unknown.extend([0u8; 10]);
        assert_eq!(d.process_datagram(Bytes::from(unknown)), Dispatch::Dropped);

        // Index past the declared total
        let out_of_range = FragmentHeader::new(1, 2, 5, 0).encode();
        assert_eq!(d.process_datagram(out_of_range), Dispatch::Dropped);

        assert_eq!(d.stats.snapshot().datagrams_dropped, 4);
        assert_eq!(d.reassembler.session_count(), 0);
    }

    #[test]
    fn test_reassemble_datagram_slices_payload() {
        let reassembler = Reassembler::new(Duration::from_secs(3));
        let mut datagram = FragmentHeader::new(4, 1, 0, 3).encode().to_vec();
        datagram.extend([7, 8, 9, 0xFF]);
        let message = reassemble_datagram(&reassembler, &Bytes::from(datagram)).unwrap();
        assert_eq!(message.as_deref(), Some(&[7u8, 8, 9][..]));
    }

    /// Peer that answers every request with a fragmented response.
    async fn spawn_peer(socket: UdpSocket, reply_to: SocketAddr, budget: usize) -> JoinHandle<()> {
        tokio::spawn(async move {
            let reassembler = Reassembler::new(Duration::from_secs(3));
            let splitter = FragmentSplitter::new(budget).unwrap();
            let mut buf = vec![0u8; 65536];
            let mut session = 1000u32;
            loop {
                let Ok((n, _)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                let datagram = Bytes::copy_from_slice(&buf[..n]);
                let Ok(Some(message)) = reassemble_datagram(&reassembler, &datagram) else {
                    continue;
                };
                let response = match Request::decode(&message).unwrap() {
                    Request::Terrain(r) => terrain_response(r.request_id, 4),
                    Request::EvaluationConfig(r) => {
                        Response::EvaluationConfig(EvaluationConfigResponse {
                            request_id: r.request_id,
                            test_background: "harbour".to_string(),
                            test_platforms: vec![2, 3],
                            ..Default::default()
                        })
                    }
                };
                session += 1;
                let datagrams = splitter
                    .split_with_session(&response.encode().unwrap(), session)
                    .unwrap();
                send_datagrams(&socket, reply_to, &datagrams).await.unwrap();
            }
        })
    }

    async fn start_pair(max_datagram_size: usize) -> (UdpService, UdpSocket) {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_port = peer.local_addr().unwrap().port();
        let config = UdpConfig::default()
            .with_listen("127.0.0.1", 0)
            .with_send("127.0.0.1", peer_port)
            .with_max_datagram_size(max_datagram_size)
            .with_session_seed(7);
        let service = UdpService::start(config).await.unwrap();
        (service, peer)
    }

    fn terrain_request(request_id: u64) -> TerrainRequest {
        TerrainRequest {
            request_id,
            response_terminal: 0,
            a_longitude: 116.40,
            a_latitude: 39.90,
            b_longitude: 116.41,
            b_latitude: 39.91,
            data_source: 1,
        }
    }

    #[tokio::test]
    async fn test_request_roundtrip_over_loopback() {
        let (service, peer) = start_pair(40).await;
        let peer_task = spawn_peer(peer, service.local_addr(), 50).await;

        let response = service
            .request(terrain_request(1001), Duration::from_secs(5))
            .await
            .unwrap();
        match response {
            Response::Terrain(r) => {
                assert_eq!(r.request_id, 1001);
                assert_eq!(r.items.len(), 4);
                assert_eq!(r.items[3].terrain_data.len(), 60);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        let response = service
            .request(
                EvaluationConfigRequest {
                    request_id: 2002,
                    response_terminal: 1,
                },
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(response.request_id(), 2002);

        assert_eq!(service.pending_count(), 0);
        let stats = service.stats();
        assert_eq!(stats.responses_dispatched, 2);
        assert!(stats.datagrams_received > 2);

        service.shutdown().await;
        peer_task.abort();
    }

    #[tokio::test]
    async fn test_concurrent_requests_resolve_independently() {
        let (service, peer) = start_pair(1400).await;
        let peer_task = spawn_peer(peer, service.local_addr(), 64).await;

        let mut futures = Vec::new();
        for id in 0..8u64 {
            futures.push(service.send_request(terrain_request(id)).await.unwrap());
        }
        for (id, fut) in futures.into_iter().enumerate() {
            let response = tokio::time::timeout(Duration::from_secs(5), fut)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(response.request_id(), id as u64);
        }

        service.shutdown().await;
        peer_task.abort();
    }

    #[tokio::test]
    async fn test_request_timeout_clears_pending() {
        // Peer never answers
        let (service, _peer) = start_pair(1400).await;

        let err = service
            .request(terrain_request(5), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Timeout));
        assert!(err.is_retryable());
        assert_eq!(service.pending_count(), 0);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_and_cancel() {
        let (service, _peer) = start_pair(1400).await;

        let first = service.send_request(terrain_request(9)).await.unwrap();
        let err = service.send_request(terrain_request(9)).await.unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateRequestId(9)));

        assert!(service.cancel(9));
        assert!(!service.cancel(9));
        assert!(matches!(first.await, Err(ServiceError::Cancelled)));

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_after_shutdown() {
        let (service, _peer) = start_pair(1400).await;
        service.shutdown().await;
        assert!(!service.is_running());
        // Second shutdown is a no-op
        service.shutdown().await;

        let err = service.send_request(terrain_request(1)).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotRunning));
    }

    #[tokio::test]
    async fn test_send_failure_clears_pending() {
        // Broadcast target without SO_BROADCAST makes send_to fail
        let config = UdpConfig::default()
            .with_listen("127.0.0.1", 0)
            .with_send("255.255.255.255", 9);
        let service = UdpService::start(config).await.unwrap();

        let err = service
            .send_request(EvaluationConfigRequest {
                request_id: 4,
                response_terminal: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Io(_)));
        assert_eq!(service.pending_count(), 0);
        assert!(service.pending.register(4).is_ok());

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let config = UdpConfig::default()
            .with_listen("127.0.0.1", 0)
            .with_max_datagram_size(10);
        assert!(matches!(
            UdpService::start(config).await,
            Err(ServiceError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_fragments_respect_datagram_size() {
        let (service, peer) = start_pair(20).await;
        service.send_request(terrain_request(3)).await.unwrap();

        let mut buf = [0u8; 1500];
        let mut total = 0;
        for _ in 0..10 {
            let (n, _) = tokio::time::timeout(Duration::from_secs(5), peer.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n <= 20);
            let header = FragmentHeader::decode(&buf[..n]).unwrap();
            assert_eq!(header.total_packets, 10);
            total += header.current_size as usize;
        }
        assert_eq!(total, TerrainRequest::ENCODED_LEN);

        service.shutdown().await;
    }
}
