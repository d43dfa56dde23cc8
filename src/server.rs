//! TCP server composition root.
//!
//! Binds the listener, wires the counter, gate and shutdown coordinator
//! together, and runs the accept loop on its own task.

use crate::config::Config;
use crate::runtime::{listener, AcceptGate, AcceptLoop, ConnectionCounter};
use crate::shutdown::{ServerState, ShutdownCoordinator, ShutdownHandle};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tracing::info;

/// A running server instance.
///
/// Every instance has its own counter and coordinator, so several servers can
/// run side by side in one process. Dropping a server without `stop` or
/// `wait` begins draining; the accept loop then finishes on its own task.
pub struct Server {
    local_addr: SocketAddr,
    counter: Arc<ConnectionCounter>,
    coordinator: Arc<ShutdownCoordinator>,
    task: JoinHandle<()>,
}

impl Server {
    /// Bind and start accepting.
    ///
    /// Returns once the socket is listening; connection attempts made after
    /// this returns are queued by the OS even before the accept loop runs.
    pub async fn start(config: &Config) -> Result<Self, ServerError> {
        let ip: IpAddr = config
            .host
            .parse()
            .map_err(|_| ServerError::InvalidAddress(config.host.clone()))?;
        let addr = SocketAddr::new(ip, config.port);

        let listener = listener::bind(addr, config.backlog)
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let counter = ConnectionCounter::new(config.connection_limit);
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let accept_loop = AcceptLoop::new(
            listener,
            AcceptGate::new(Arc::clone(&counter)),
            Arc::clone(&coordinator),
            config.max_probe_size,
            config.drain_timeout,
        );

        coordinator.mark_running();
        let task = tokio::spawn(accept_loop.run());

        info!(
            address = %local_addr,
            connection_limit = config.connection_limit.get(),
            "Server listening"
        );

        Ok(Server {
            local_addr,
            counter,
            coordinator,
            task,
        })
    }

    /// Resolved listening address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Resolved listening port (never 0 once started).
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Handle for triggering shutdown from another task or thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(Arc::clone(&self.coordinator))
    }

    pub fn state(&self) -> ServerState {
        self.coordinator.state()
    }

    /// Number of currently admitted connections.
    pub fn active_connections(&self) -> usize {
        self.counter.current()
    }

    pub fn connection_limit(&self) -> usize {
        self.counter.limit()
    }

    /// Begin draining and wait until the listener and every handler are gone.
    pub async fn stop(self) -> Result<(), ServerError> {
        self.coordinator.trigger();
        self.wait().await
    }

    /// Wait for the server to stop after shutdown is triggered elsewhere.
    pub async fn wait(mut self) -> Result<(), ServerError> {
        (&mut self.task).await.map_err(ServerError::Task)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        // no-op once draining has begun
        self.coordinator.trigger();
    }
}

/// Server errors
#[derive(Debug)]
pub enum ServerError {
    /// The configured host is not an IP address.
    InvalidAddress(String),
    /// Could not listen on the requested address.
    Bind { addr: SocketAddr, source: io::Error },
    /// The accept loop task panicked or was cancelled.
    Task(JoinError),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::InvalidAddress(host) => write!(f, "Invalid listen address '{host}'"),
            ServerError::Bind { addr, source } => write!(f, "Failed to bind {addr}: {source}"),
            ServerError::Task(e) => write!(f, "Accept loop failed: {e}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::InvalidAddress(_) => None,
            ServerError::Bind { source, .. } => Some(source),
            ServerError::Task(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{self, ProbeClient};
    use crate::test_support::{lines_from_shutdown, total_connection_counts, LogCapture};
    use std::num::NonZeroUsize;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio::time::sleep;

    fn test_config(limit: usize) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            connection_limit: NonZeroUsize::new(limit).unwrap(),
            drain_timeout: Duration::from_secs(5),
            ..Config::default()
        }
    }

    async fn run_burst(server: &Server, limit: usize, extra: usize) -> (usize, usize) {
        let addr = server.local_addr();
        let good = ProbeClient::open_several(limit, addr).await;
        sleep(Duration::from_millis(200)).await;
        let bad = ProbeClient::open_several(extra, addr).await;

        let good = probe::probe_all(good).await;
        let bad = probe::probe_all(bad).await;

        let good_alive = good.iter().filter(|(_, alive)| *alive).count();
        let bad_dead = bad.iter().filter(|(_, alive)| !*alive).count();

        probe::close_all(good.into_iter().chain(bad).map(|(c, _)| c)).await;
        (good_alive, bad_dead)
    }

    #[tokio::test]
    async fn test_start_resolves_ephemeral_port() {
        let server = Server::start(&test_config(4)).await.unwrap();
        assert_ne!(server.port(), 0);
        assert_eq!(server.state(), ServerState::Running);
        assert_eq!(server.connection_limit(), 4);
        assert_eq!(server.active_connections(), 0);

        let mut client = ProbeClient::open(server.local_addr()).await;
        assert!(client.is_alive().await);
        client.close().await;

        let addr = server.local_addr();
        let handle = server.shutdown_handle();
        server.stop().await.unwrap();
        assert_eq!(handle.state(), ServerState::Stopped);

        // post-drain refusal
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = Config {
            port: occupied.local_addr().unwrap().port(),
            ..test_config(1)
        };

        match Server::start(&config).await {
            Err(ServerError::Bind { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::AddrInUse)
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("bind should fail"),
        }
    }

    #[tokio::test]
    async fn test_invalid_host() {
        let config = Config {
            host: "not-an-ip".to_string(),
            ..test_config(1)
        };
        assert!(matches!(
            Server::start(&config).await,
            Err(ServerError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_limits_connections_single_cycle() {
        let server = Server::start(&test_config(10)).await.unwrap();

        let (good_alive, bad_dead) = run_burst(&server, 10, 10).await;
        assert_eq!((good_alive, bad_dead), (10, 10));

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_limits_connections_repeated_cycles() {
        let capture = LogCapture::default();
        let _guard = capture.install();

        let limit = 10;
        let server = Server::start(&test_config(limit)).await.unwrap();

        for cycle in 0..3 {
            if cycle > 0 {
                sleep(Duration::from_millis(500)).await;
            }
            let result = run_burst(&server, limit, 10).await;
            assert_eq!(result, (limit, 10), "cycle={cycle}");
        }

        sleep(Duration::from_millis(200)).await;
        assert_eq!(server.active_connections(), 0);
        server.stop().await.unwrap();

        let log = capture.contents();
        let counts = total_connection_counts(&log);
        assert!(!counts.is_empty());
        assert!(counts.iter().all(|&n| n <= limit), "{counts:?}");
        assert!(log.contains("paused accepting connections"));
        assert!(log.contains("resumed accepting connections"));
        assert!(!log.contains("panicked"));

        let shutdown_lines = lines_from_shutdown(&log);
        assert!(!shutdown_lines.is_empty(), "shutdown marker missing");
        assert!(shutdown_lines
            .iter()
            .all(|line| !line.to_lowercase().contains("new connection")));
    }

    #[tokio::test]
    async fn test_admitted_connections_survive_draining() {
        let server = Server::start(&test_config(2)).await.unwrap();
        let addr = server.local_addr();

        let mut client = ProbeClient::open(addr).await;
        assert!(client.is_alive().await);

        let handle = server.shutdown_handle();
        assert!(handle.shutdown());
        assert!(!handle.shutdown());
        sleep(Duration::from_millis(100)).await;

        assert_eq!(handle.state(), ServerState::Draining);
        assert!(client.is_alive().await);
        assert!(TcpStream::connect(addr).await.is_err());

        client.close().await;
        server.wait().await.unwrap();
        assert_eq!(handle.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_drain_timeout_closes_idle_connections() {
        let capture = LogCapture::default();
        let _guard = capture.install();

        let config = Config {
            drain_timeout: Duration::from_millis(100),
            ..test_config(2)
        };
        let server = Server::start(&config).await.unwrap();

        let mut client = ProbeClient::open(server.local_addr()).await;
        assert!(client.is_alive().await);

        let handle = server.shutdown_handle();
        server.stop().await.unwrap();
        assert_eq!(handle.state(), ServerState::Stopped);
        assert!(!client.is_alive().await);

        let log = capture.contents();
        assert!(log.contains("Drain timeout elapsed"));
        assert_eq!(total_connection_counts(&log).last(), Some(&0), "{log}");
    }

    #[tokio::test]
    async fn test_dropped_server_drains_and_stops() {
        let server = Server::start(&test_config(2)).await.unwrap();
        let addr = server.local_addr();
        let handle = server.shutdown_handle();

        let mut client = ProbeClient::open(addr).await;
        assert!(client.is_alive().await);

        drop(server);
        assert!(handle.is_shutting_down());
        assert!(client.is_alive().await);

        client.close().await;
        tokio::time::timeout(Duration::from_secs(5), handle.stopped())
            .await
            .expect("dropped server never stopped");
        assert_eq!(handle.state(), ServerState::Stopped);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_burst_admits_exactly_limit() {
        let limit = 10;
        let server = Server::start(&test_config(limit)).await.unwrap();
        let addr = server.local_addr();

        for burst in 0..3 {
            if burst > 0 {
                sleep(Duration::from_secs(1)).await;
            }
            let clients = ProbeClient::open_several(2 * limit, addr).await;
            let results = probe::probe_all(clients).await;

            let alive = results.iter().filter(|(_, alive)| *alive).count();
            let dead = results.len() - alive;
            probe::close_all(results.into_iter().map(|(c, _)| c)).await;

            assert_eq!((alive, dead), (limit, limit), "burst={burst}");
        }

        server.stop().await.unwrap();
    }

    #[test]
    fn test_no_admission_logged_after_shutdown_under_connect_race() {
        let capture = LogCapture::default();
        let _guard = capture.install();
        let rt = capture.runtime();

        for iteration in 0..20u64 {
            capture.take();

            rt.block_on(async {
                let config = Config {
                    drain_timeout: Duration::from_secs(3),
                    ..test_config(1000)
                };
                let server = Server::start(&config).await.unwrap();
                let addr = server.local_addr();

                let mut clients = tokio::task::JoinSet::new();
                for _ in 0..4 {
                    clients.spawn(async move {
                        for _ in 0..50 {
                            match TcpStream::connect(addr).await {
                                Ok(stream) => drop(stream),
                                Err(_) => break,
                            }
                        }
                    });
                }

                sleep(Duration::from_millis(1 + iteration % 8)).await;
                server.stop().await.unwrap();
                while let Some(res) = clients.join_next().await {
                    res.unwrap();
                }
            });

            let log = capture.take();
            assert!(!log.contains("panicked"), "iteration={iteration}\n{log}");

            let shutdown_lines = lines_from_shutdown(&log);
            assert!(!shutdown_lines.is_empty(), "iteration={iteration}: shutdown marker missing");
            assert!(
                shutdown_lines
                    .iter()
                    .all(|line| !line.to_lowercase().contains("new connection")),
                "iteration={iteration}\n{log}"
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_from_another_thread() {
        let server = Server::start(&test_config(1)).await.unwrap();
        let handle = server.shutdown_handle();

        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            handle.shutdown()
        });

        server.wait().await.unwrap();
        assert!(trigger.join().unwrap());
    }

    #[tokio::test]
    async fn test_independent_limits_per_server() {
        let small = Server::start(&test_config(1)).await.unwrap();
        let large = Server::start(&test_config(3)).await.unwrap();

        assert_eq!(run_burst(&small, 1, 2).await, (1, 2));
        assert_eq!(run_burst(&large, 3, 2).await, (3, 2));

        small.stop().await.unwrap();
        large.stop().await.unwrap();
    }
}
