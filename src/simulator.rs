//! Simulated computation peer.
//!
//! Binds the service's send address, reassembles inbound requests and
//! answers each one with a fragmented response sent to the listen address.

use bytes::Bytes;
use orca_protocol::{
    EvaluationConfigRequest, EvaluationConfigResponse, FragmentSplitter, Request, Response,
    TerrainItem, TerrainRequest, TerrainResponse,
};
use orca_transport::service::{reassemble_datagram, resolve, send_datagrams};
use orca_transport::{Reassembler, ServiceError, UdpConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Default terrain block size per generated item.
pub const DEFAULT_BLOCK_BYTES: usize = 256;

/// Upper bound on generated terrain items.
pub const MAX_ITEMS: usize = 64;

/// Builds the terrain answer for `request`.
///
/// One item per 0.001 degrees between A and B (at least one, at most
/// [`MAX_ITEMS`]). The first item carries no terrain block; the others carry
/// `block_bytes` bytes each.
pub fn terrain_response(request: &TerrainRequest, block_bytes: usize) -> TerrainResponse {
    let d_lon = request.b_longitude - request.a_longitude;
    let d_lat = request.b_latitude - request.a_latitude;
    let distance = (d_lon * d_lon + d_lat * d_lat).sqrt();
    let count = ((distance * 1000.0).ceil() as usize).clamp(1, MAX_ITEMS);
    let block_bytes = block_bytes.min(u16::MAX as usize);

    let step = d_lon / count as f64;
    let items = (0..count)
        .map(|i| {
            let terrain_data = if i == 0 {
                Vec::new()
            } else {
                (0..block_bytes).map(|j| (i * 31 + j) as u8).collect()
            };
            TerrainItem {
                a_longitude: request.a_longitude + step * i as f64,
                b_longitude: request.a_longitude + step * (i + 1) as f64,
                item_type: (i % 3) as u32 + 1,
                density: 0.5 + (i % 5) as f32 * 0.1,
                field6: request.data_source,
                terrain_data,
            }
        })
        .collect();

    TerrainResponse {
        request_id: request.request_id,
        items,
    }
}

/// Builds the fixed evaluation configuration answer.
pub fn evaluation_response(request: &EvaluationConfigRequest) -> EvaluationConfigResponse {
    EvaluationConfigResponse {
        request_id: request.request_id,
        test_background: "Coastal sonar trial, sea state 3".to_string(),
        evaluation_purpose: "Detection range validation".to_string(),
        eval_task_id: 20250125,
        test_platforms: vec![1, 2, 5],
        test_location: vec![12],
        test_tasks: vec![3],
        test_method: 1,
    }
}

pub fn answer(request: &Request, block_bytes: usize) -> Response {
    match request {
        Request::Terrain(r) => terrain_response(r, block_bytes).into(),
        Request::EvaluationConfig(r) => evaluation_response(r).into(),
    }
}

/// UDP peer that answers requests.
pub struct Simulator {
    socket: UdpSocket,
    reply_to: SocketAddr,
    splitter: FragmentSplitter,
    rng: StdRng,
    reassembler: Reassembler,
    recv_buffer_size: usize,
    block_bytes: usize,
}

impl Simulator {
    /// Binds the send endpoint of `config` and replies to its listen endpoint.
    pub async fn bind(config: &UdpConfig, block_bytes: usize) -> Result<Self, ServiceError> {
        config.validate()?;
        let bind_addr = resolve(&config.send_endpoint()).await?;
        let reply_to = resolve(&config.listen_endpoint()).await?;
        let socket = UdpSocket::bind(bind_addr).await?;
        Self::new(socket, reply_to, config, block_bytes)
    }

    /// Wraps an already bound socket.
    pub fn new(
        socket: UdpSocket,
        reply_to: SocketAddr,
        config: &UdpConfig,
        block_bytes: usize,
    ) -> Result<Self, ServiceError> {
        let rng = match config.session_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            socket,
            reply_to,
            splitter: FragmentSplitter::for_datagram_size(config.max_datagram_size)?,
            rng,
            reassembler: Reassembler::new(config.reassembly_timeout()),
            recv_buffer_size: config.effective_recv_buffer_size(),
            block_bytes,
        })
    }

    /// Serves requests until the socket fails.
    pub async fn run(&mut self) -> Result<(), ServiceError> {
        tracing::info!(
            "Simulator listening on {}, replying to {}",
            self.socket.local_addr()?,
            self.reply_to
        );

        let mut buf = vec![0u8; self.recv_buffer_size];
        let mut sweep = tokio::time::interval(self.reassembler.timeout());

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    let (n, from) = result?;
                    let datagram = Bytes::copy_from_slice(&buf[..n]);
                    if let Err(e) = self.handle_datagram(datagram).await {
                        tracing::warn!("Failed to answer datagram from {}: {}", from, e);
                    }
                }
                _ = sweep.tick() => {
                    self.reassembler.sweep_expired();
                }
            }
        }
    }

    async fn handle_datagram(&mut self, datagram: Bytes) -> Result<(), ServiceError> {
        let message = match reassemble_datagram(&self.reassembler, &datagram)? {
            Some(message) => message,
            None => return Ok(()),
        };

        let request = Request::decode(&message)?;
        let response = answer(&request, self.block_bytes);
        let encoded = response.encode()?;
        let datagrams = self.splitter.split(&encoded, &mut self.rng)?;

        send_datagrams(&self.socket, self.reply_to, &datagrams).await?;
        tracing::debug!(
            "Answered {:?} request {} ({} bytes, {} fragments)",
            request.message_type(),
            request.request_id(),
            encoded.len(),
            datagrams.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orca_transport::UdpService;
    use std::time::Duration;

    fn request(b_longitude: f64, b_latitude: f64) -> TerrainRequest {
        TerrainRequest {
            request_id: 1001,
            response_terminal: 0,
            a_longitude: 116.40,
            a_latitude: 39.90,
            b_longitude,
            b_latitude,
            data_source: 2,
        }
    }

    #[test]
    fn test_terrain_item_count_follows_distance() {
        assert_eq!(terrain_response(&request(116.40, 39.90), 8).items.len(), 1);
        assert_eq!(terrain_response(&request(116.41, 39.91), 8).items.len(), 15);
        assert_eq!(
            terrain_response(&request(120.0, 40.0), 8).items.len(),
            MAX_ITEMS
        );
    }

    #[test]
    fn test_terrain_blocks() {
        let response = terrain_response(&request(116.41, 39.91), 100);
        assert_eq!(response.request_id, 1001);
        assert!(response.items[0].terrain_data.is_empty());
        assert!(response.items[1..]
            .iter()
            .all(|item| item.terrain_data.len() == 100 && item.field6 == 2));
        // Same input, same output
        assert_eq!(response, terrain_response(&request(116.41, 39.91), 100));
    }

    #[test]
    fn test_evaluation_answer_echoes_id() {
        let response = answer(
            &Request::EvaluationConfig(EvaluationConfigRequest {
                request_id: 55,
                response_terminal: 1,
            }),
            DEFAULT_BLOCK_BYTES,
        );
        assert_eq!(response.request_id(), 55);
        assert!(matches!(response, Response::EvaluationConfig(_)));
    }

    #[tokio::test]
    async fn test_service_against_simulator() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_port = peer.local_addr().unwrap().port();
        let config = UdpConfig::default()
            .with_listen("127.0.0.1", 0)
            .with_send("127.0.0.1", peer_port)
            .with_max_datagram_size(512)
            .with_session_seed(11);

        let service = UdpService::start(config.clone()).await.unwrap();
        let mut simulator =
            Simulator::new(peer, service.local_addr(), &config, DEFAULT_BLOCK_BYTES).unwrap();
        let sim_task = tokio::spawn(async move { simulator.run().await });

        let response = service
            .request(request(116.41, 39.91), Duration::from_secs(5))
            .await
            .unwrap();
        let Response::Terrain(terrain) = response else {
            panic!("expected terrain response");
        };
        assert_eq!(terrain.items.len(), 15);
        // 14 * 256 bytes of blocks cannot fit one 512-byte datagram
        assert!(service.stats().datagrams_received > 1);

        let response = service
            .request(
                EvaluationConfigRequest {
                    request_id: 2,
                    response_terminal: 0,
                },
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        let Response::EvaluationConfig(config) = response else {
            panic!("expected evaluation config response");
        };
        assert_eq!(config.test_platforms, vec![1, 2, 5]);
        assert_eq!(config.test_location, vec![12]);

        service.shutdown().await;
        sim_task.abort();
    }
}
