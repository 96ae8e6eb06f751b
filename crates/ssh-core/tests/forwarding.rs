//! Integration tests for forward and reverse tunnels.
//!
//! The transport is mocked with in-memory duplex streams; the local side uses
//! real loopback sockets, so these tests need to bind ports.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use ssh_core::{
    MemoryNotifier,
    NoticeLevel,
    SshCoreError,
    SshResult,
    forwarding::{
        ForwardSession, ForwardStream, ForwardedConnection, RemoteForwardChannel, RemoteListener, RemoteRegistrar, TunnelManager
    },
};
use std::{
    future::Future,
    net::TcpListener,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tokio::{
    io::{self, AsyncReadExt, AsyncWriteExt},
    net::{TcpListener as TokioTcpListener, TcpStream},
    sync::mpsc,
    time::{Duration, sleep, timeout},
};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn forward_tunnel_relays_bytes_both_ways() -> Result<()> {
    let notifier = MemoryNotifier::new();
    let manager = TunnelManager::new(notifier.clone());
    let (session, mut rx) = MockForwardSession::new();
    let bound = manager.start_forward(session.clone(), 0, "localhost", 80).await?;
    assert_eq!(bound.ip().to_string(), "0.0.0.0");

    let mut local = TcpStream::connect(("127.0.0.1", bound.port())).await?;
    let mut remote = timeout(Duration::from_secs(2), rx.recv())
        .await?
        .ok_or_else(|| anyhow!("no channel opened"))?;
    local.write_all(b"GET /").await?;
    let mut buf = [0u8; 5];
    remote.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"GET /");
    remote.write_all(b"200 OK").await?;
    let mut buf = [0u8; 6];
    local.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"200 OK");

    let ops = session.ops();
    assert_eq!(ops.len(), 1);
    assert!(ops[0].starts_with("tcpip localhost:80 <- 127.0.0.1:"), "unexpected ops {ops:?}");
    let tunnel = &manager;
    wait_until(|| async move { tunnel.active_relays().await == 1 }).await?;
    assert!(notifier.messages(NoticeLevel::Error).is_empty());

    manager.shutdown(Some(session)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_channel_open_keeps_listener_running() -> Result<()> {
    let notifier = MemoryNotifier::new();
    let manager = TunnelManager::new(notifier.clone());
    let (session, mut rx) = MockForwardSession::failing_first(1);
    let bound = manager.start_forward(session.clone(), 0, "db.internal", 5432).await?;

    let mut rejected = TcpStream::connect(("127.0.0.1", bound.port())).await?;
    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(2), rejected.read(&mut buf)).await?;
    assert!(matches!(read, Ok(0) | Err(_)), "rejected connection should be closed");
    let errors = notifier.messages(NoticeLevel::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("db.internal:5432"), "{errors:?}");
    assert!(manager.is_running().await);

    let mut accepted = TcpStream::connect(("127.0.0.1", bound.port())).await?;
    let mut remote = timeout(Duration::from_secs(2), rx.recv())
        .await?
        .ok_or_else(|| anyhow!("no channel opened"))?;
    accepted.write_all(b"ok").await?;
    let mut buf = [0u8; 2];
    remote.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"ok");

    manager.shutdown(Some(session)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_closes_relays_and_listener() -> Result<()> {
    let manager = TunnelManager::new(MemoryNotifier::new());
    let (session, mut rx) = MockForwardSession::new();
    let bound = manager.start_forward(session.clone(), 0, "localhost", 80).await?;

    let mut local = TcpStream::connect(("127.0.0.1", bound.port())).await?;
    let mut remote = timeout(Duration::from_secs(2), rx.recv())
        .await?
        .ok_or_else(|| anyhow!("no channel opened"))?;
    let tunnel = &manager;
    wait_until(|| async move { tunnel.active_relays().await == 1 }).await?;

    manager.shutdown(Some(session)).await?;
    assert_eq!(manager.active_relays().await, 0);
    assert!(!manager.is_running().await);

    let mut buf = [0u8; 1];
    assert_eq!(timeout(Duration::from_secs(2), remote.read(&mut buf)).await??, 0);
    let read = timeout(Duration::from_secs(2), local.read(&mut buf)).await?;
    assert!(matches!(read, Ok(0) | Err(_)), "local endpoint should be closed");
    assert!(TcpStream::connect(("127.0.0.1", bound.port())).await.is_err(), "listener should be gone");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reverse_tunnel_relays_to_local_destination() -> Result<()> {
    let echo_port = spawn_echo_server().await?;
    let notifier = MemoryNotifier::new();
    let manager = TunnelManager::new(notifier.clone());
    let mut registrar = MockRegistrar::new(0);

    let port = manager.start_reverse(&mut registrar, echo_port, "127.0.0.1", 9000).await?;
    assert_eq!(port, 9000);
    assert_eq!(registrar.requests(), vec![(String::new(), 9000)]);
    let incoming = registrar.sender()?;

    let (mut client, server) = io::duplex(1024);
    let closed = Arc::new(AtomicBool::new(false));
    incoming
        .send(forwarded(MockRemoteChannel::new(server, closed.clone()), 9000))
        .map_err(|_| anyhow!("listener dropped"))?;
    client.write_all(b"hello").await?;
    let mut buf = [0u8; 5];
    timeout(Duration::from_secs(2), client.read_exact(&mut buf)).await??;
    assert_eq!(&buf, b"hello");
    assert!(!closed.load(Ordering::SeqCst));

    let cancels = CancelRecorder::new(false);
    manager.shutdown(Some(cancels.clone())).await?;
    assert_eq!(cancels.calls(), vec![(String::new(), 9000)]);
    assert_eq!(timeout(Duration::from_secs(2), client.read(&mut buf)).await??, 0);
    assert!(notifier.messages(NoticeLevel::Error).is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reverse_unreachable_destination_closes_only_that_channel() -> Result<()> {
    let dead_port = pick_free_port();
    let notifier = MemoryNotifier::new();
    let manager = TunnelManager::new(notifier.clone());
    let mut registrar = MockRegistrar::new(0);
    manager.start_reverse(&mut registrar, dead_port, "127.0.0.1", 9100).await?;
    let incoming = registrar.sender()?;

    let (_client, server) = io::duplex(64);
    let closed = Arc::new(AtomicBool::new(false));
    incoming
        .send(forwarded(MockRemoteChannel::new(server, closed.clone()), 9100))
        .map_err(|_| anyhow!("listener dropped"))?;
    let flag = &closed;
    wait_until(|| async move { flag.load(Ordering::SeqCst) }).await?;

    let errors = notifier.messages(NoticeLevel::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains(&format!("127.0.0.1:{dead_port}")), "{errors:?}");
    assert!(manager.is_running().await);

    manager.shutdown(Some(CancelRecorder::new(false))).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reverse_ignores_channels_for_other_ports() -> Result<()> {
    let manager = TunnelManager::new(MemoryNotifier::new());
    let mut registrar = MockRegistrar::new(0);
    manager.start_reverse(&mut registrar, 22, "127.0.0.1", 9200).await?;
    let incoming = registrar.sender()?;

    let (_client, server) = io::duplex(64);
    let closed = Arc::new(AtomicBool::new(false));
    incoming
        .send(forwarded(MockRemoteChannel::new(server, closed.clone()), 9999))
        .map_err(|_| anyhow!("listener dropped"))?;
    let flag = &closed;
    wait_until(|| async move { flag.load(Ordering::SeqCst) }).await?;
    assert_eq!(manager.active_relays().await, 0);

    manager.shutdown(Some(CancelRecorder::new(false))).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn losing_the_transport_reports_tunnel_failure() -> Result<()> {
    let manager = TunnelManager::new(MemoryNotifier::new());
    let mut registrar = MockRegistrar::new(0);
    manager.start_reverse(&mut registrar, 22, "127.0.0.1", 9300).await?;
    drop(registrar);

    let err = timeout(Duration::from_secs(2), manager.failure()).await?;
    assert!(matches!(err, SshCoreError::TunnelFailure(_)), "{err:?}");
    let tunnel = &manager;
    wait_until(|| async move { !tunnel.is_running().await }).await?;
    manager.shutdown(Some(CancelRecorder::new(false))).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_failure_does_not_fail_shutdown() -> Result<()> {
    let manager = TunnelManager::new(MemoryNotifier::new());
    let mut registrar = MockRegistrar::new(41000);
    let port = manager.start_reverse(&mut registrar, 22, "localhost", 0).await?;
    assert_eq!(port, 41000);

    let cancels = CancelRecorder::new(true);
    manager.shutdown(Some(cancels.clone())).await?;
    assert_eq!(cancels.calls(), vec![(String::new(), 41000)]);

    // a second shutdown has nothing left to cancel
    manager.shutdown(Some(cancels.clone())).await?;
    assert_eq!(cancels.calls().len(), 1);
    Ok(())
}

async fn wait_until<F, Fut>(mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return Ok(());
        }
        sleep(Duration::from_millis(10)).await;
    }
    Err(anyhow!("condition not reached in time"))
}

fn pick_free_port() -> u16 {
    TcpListener::bind(("127.0.0.1", 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .unwrap()
}

async fn spawn_echo_server() -> Result<u16> {
    let listener = TokioTcpListener::bind(("127.0.0.1", 0)).await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    Ok(port)
}

fn forwarded(channel: MockRemoteChannel, port: u32) -> ForwardedConnection<MockRemoteChannel> {
    ForwardedConnection {
        channel,
        connected_address: "0.0.0.0".into(),
        connected_port: port,
        originator_address: "203.0.113.7".into(),
        originator_port: 50000,
    }
}

#[derive(Clone)]
struct MockForwardSession {
    ops: Arc<Mutex<Vec<String>>>,
    failures_left: Arc<AtomicUsize>,
    streams: mpsc::UnboundedSender<io::DuplexStream>,
}

impl MockForwardSession {
    fn new() -> (Self, mpsc::UnboundedReceiver<io::DuplexStream>) {
        Self::failing_first(0)
    }

    fn failing_first(failures: usize) -> (Self, mpsc::UnboundedReceiver<io::DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            ops: Arc::new(Mutex::new(Vec::new())),
            failures_left: Arc::new(AtomicUsize::new(failures)),
            streams: tx,
        };
        (session, rx)
    }

    fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

#[async_trait]
impl ForwardSession for MockForwardSession {
    async fn open_direct_tcpip(
        &self,
        target_host: String,
        target_port: u16,
        origin_host: String,
        origin_port: u16,
    ) -> SshResult<ForwardStream> {
        self.ops
            .lock()
            .unwrap()
            .push(format!("tcpip {}:{} <- {}:{}", target_host, target_port, origin_host, origin_port));
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(SshCoreError::Other("channel refused".into()));
        }
        let (client, server) = io::duplex(1024);
        self.streams.send(server).unwrap();
        Ok(Box::new(client))
    }

    async fn cancel_tcpip_forwarding(&self, _bind_address: String, _port: u32) -> SshResult<()> {
        Ok(())
    }
}

struct MockRegistrar {
    assigned: u32,
    requests: Vec<(String, u16)>,
    sender: Option<mpsc::UnboundedSender<ForwardedConnection<MockRemoteChannel>>>,
}

impl MockRegistrar {
    fn new(assigned: u32) -> Self {
        Self {
            assigned,
            requests: Vec::new(),
            sender: None,
        }
    }

    fn requests(&self) -> Vec<(String, u16)> {
        self.requests.clone()
    }

    fn sender(&mut self) -> Result<mpsc::UnboundedSender<ForwardedConnection<MockRemoteChannel>>> {
        self.sender.take().ok_or_else(|| anyhow!("no listener requested"))
    }
}

#[async_trait]
impl RemoteRegistrar for MockRegistrar {
    type Channel = MockRemoteChannel;

    async fn request_tcpip_forward(
        &mut self,
        bind_address: String,
        bind_port: u16,
    ) -> SshResult<RemoteListener<MockRemoteChannel>> {
        self.requests.push((bind_address.clone(), bind_port));
        let (tx, incoming) = mpsc::unbounded_channel();
        self.sender = Some(tx);
        Ok(RemoteListener {
            bind_address,
            bound_port: self.assigned,
            incoming,
        })
    }
}

struct MockRemoteChannel {
    stream: Option<io::DuplexStream>,
    closed: Arc<AtomicBool>,
}

impl MockRemoteChannel {
    fn new(stream: io::DuplexStream, closed: Arc<AtomicBool>) -> Self {
        Self {
            stream: Some(stream),
            closed,
        }
    }
}

#[async_trait]
impl RemoteForwardChannel for MockRemoteChannel {
    type Stream = io::DuplexStream;

    fn into_stream(mut self) -> Self::Stream {
        self.stream.take().expect("stream available")
    }

    async fn close(self) -> SshResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
struct CancelRecorder {
    calls: Arc<Mutex<Vec<(String, u32)>>>,
    fail: bool,
}

impl CancelRecorder {
    fn new(fail: bool) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            fail,
        }
    }

    fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ForwardSession for CancelRecorder {
    async fn open_direct_tcpip(
        &self,
        _target_host: String,
        _target_port: u16,
        _origin_host: String,
        _origin_port: u16,
    ) -> SshResult<ForwardStream> {
        Err(SshCoreError::Other("not used".into()))
    }

    async fn cancel_tcpip_forwarding(&self, bind_address: String, port: u32) -> SshResult<()> {
        self.calls.lock().unwrap().push((bind_address, port));
        if self.fail {
            Err(SshCoreError::Other("tcp cancel failure".into()))
        } else {
            Ok(())
        }
    }
}
