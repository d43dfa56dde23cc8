//! Echo probe client.
//!
//! Opens connections to a server and checks whether each one is actually
//! being served. A connection that was accepted by the OS but rejected by the
//! server fails the probe, as does one that does not answer in time.

use crate::protocols::echo::parser::{self, SENTINEL};
use rand::Rng;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::trace;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const PROBE_LEN: usize = 8;

/// A client connection that may or may not have been established.
#[derive(Debug)]
pub struct ProbeClient {
    stream: Option<TcpStream>,
}

impl ProbeClient {
    /// Connect to `addr`. Refusal, reset or timeout yields a dead client.
    pub async fn open(addr: SocketAddr) -> Self {
        let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Some(stream),
            Ok(Err(e)) => {
                trace!(error = %e, "Probe connect failed");
                None
            }
            Err(_) => {
                trace!("Probe connect timed out");
                None
            }
        };
        Self { stream }
    }

    /// Open `count` connections concurrently.
    pub async fn open_several(count: usize, addr: SocketAddr) -> Vec<Self> {
        let mut set = JoinSet::new();
        for _ in 0..count {
            set.spawn(Self::open(addr));
        }

        let mut clients = Vec::with_capacity(count);
        while let Some(res) = set.join_next().await {
            clients.push(res.unwrap_or(Self { stream: None }));
        }
        clients
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Send one probe and check that exactly its payload comes back in time.
    ///
    /// A failed probe leaves the client dead; the stream may be mid-frame.
    pub async fn is_alive(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };

        let payload = random_payload();
        let alive = match timeout(PROBE_TIMEOUT, round_trip(stream, &payload)).await {
            Ok(Ok(reply)) => reply == payload,
            Ok(Err(e)) => {
                trace!(error = %e, "Probe failed");
                false
            }
            Err(_) => {
                trace!("Probe timed out");
                false
            }
        };

        if !alive {
            self.stream = None;
        }
        alive
    }

    /// Close the write side and drop the connection.
    pub async fn close(mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}

async fn round_trip(stream: &mut TcpStream, payload: &[u8]) -> io::Result<Vec<u8>> {
    stream.write_all(&parser::request(payload)).await?;
    let mut reply = vec![0u8; payload.len()];
    stream.read_exact(&mut reply).await?;
    Ok(reply)
}

fn random_payload() -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..PROBE_LEN).map(|_| rng.gen_range(0..SENTINEL)).collect()
}

/// Probe every client concurrently. Output order is unspecified.
pub async fn probe_all(clients: Vec<ProbeClient>) -> Vec<(ProbeClient, bool)> {
    let mut set = JoinSet::new();
    for mut client in clients {
        set.spawn(async move {
            let alive = client.is_alive().await;
            (client, alive)
        });
    }

    let mut results = Vec::new();
    while let Some(res) = set.join_next().await {
        if let Ok(result) = res {
            results.push(result);
        }
    }
    results
}

pub async fn close_all(clients: impl IntoIterator<Item = ProbeClient>) {
    for client in clients {
        client.close().await;
    }
}
