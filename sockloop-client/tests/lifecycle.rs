//! Network thread lifecycle and connection state scenarios

mod common;

use common::{delegate, eventually, next, until_disconnected, Call, MockConnector, WAIT};
use sockloop_client::{
    Client, ClientConfig, ConnectionState, Notification, QueuedDispatcher,
    WebSocket, WebSocketDelegate,
};
use sockloop_core::{Error, ErrorCode, Opcode, WriteKind};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn test_hello_then_close_stops_thread() {
    let mock = MockConnector::new();
    let client = mock.client(ClientConfig::default());
    let (delegate, mut rx) = delegate();

    let socket = client.open("ws://localhost:9001/chat", delegate, &[], None).unwrap();
    assert!(client.is_running());
    assert_eq!(client.connection_count(), 1);

    assert!(matches!(next(&mut rx).await, Notification::Connected(_)));
    assert_eq!(socket.state(), ConnectionState::Open);
    assert!(socket.send_text("hello"));
    assert!(socket.close());

    let seen = until_disconnected(&mut rx).await;
    assert_eq!(seen.len(), 1);

    client.wait_idle(WAIT).unwrap();
    assert_eq!(socket.state(), ConnectionState::Closed);
    assert_eq!(client.connection_count(), 0);
    assert_eq!(client.stop_requests(), 1);
    assert!(!client.is_running());

    let writes = mock.writes(socket.id());
    assert_eq!(writes, vec![(5, WriteKind { opcode: Opcode::Text, fin: true })]);
}

#[tokio::test]
async fn test_thread_survives_until_last_connection() {
    let mock = MockConnector::new();
    let client = mock.client(ClientConfig::default());
    let (delegate_a, mut rx_a) = delegate();
    let (delegate_b, mut rx_b) = delegate();

    let a = client.open("ws://localhost:9001/a", delegate_a, &[], None).unwrap();
    let b = client.open("ws://localhost:9001/b", delegate_b, &[], None).unwrap();
    assert!(matches!(next(&mut rx_a).await, Notification::Connected(_)));
    assert!(matches!(next(&mut rx_b).await, Notification::Connected(_)));
    assert_eq!(client.threads_started(), 1);
    assert_eq!(mock.contexts(), 1);

    a.close();
    until_disconnected(&mut rx_a).await;
    eventually(|| client.connection_count() == 1).await;
    assert!(client.is_running());
    assert_eq!(client.stop_requests(), 0);

    b.close();
    until_disconnected(&mut rx_b).await;
    client.wait_idle(WAIT).unwrap();
    assert_eq!(client.connection_count(), 0);
    assert_eq!(client.stop_requests(), 1);
    assert!(!client.is_running());
}

#[tokio::test]
async fn test_open_after_stop_restarts_thread() {
    let mock = MockConnector::new();
    let client = mock.client(ClientConfig::default());

    let (first, mut rx) = delegate();
    let socket = client.open("ws://localhost:9001/", first, &[], None).unwrap();
    assert!(matches!(next(&mut rx).await, Notification::Connected(_)));
    socket.close_sync().unwrap();
    client.wait_idle(WAIT).unwrap();
    assert!(!client.is_running());

    let (second, mut rx) = delegate();
    let socket = client.open("ws://localhost:9001/", second, &[], None).unwrap();
    assert!(client.is_running());
    assert!(matches!(next(&mut rx).await, Notification::Connected(_)));
    assert_eq!(client.threads_started(), 2);
    assert_eq!(mock.contexts(), 2);

    socket.close_timeout(WAIT).unwrap();
    client.wait_idle(WAIT).unwrap();
    assert_eq!(client.stop_requests(), 2);
    assert_eq!(client.stats().total_connections, 2);
}

#[tokio::test]
async fn test_connected_fires_at_most_once() {
    let mock = MockConnector::new().configure(|script| script.protocol = Some("chat".into()));
    let client = mock.client(ClientConfig::default());
    let (delegate, mut rx) = delegate();

    let socket = client.open("ws://localhost:9001/", delegate, &["chat"], None).unwrap();
    assert!(matches!(next(&mut rx).await, Notification::Connected(_)));
    assert_eq!(socket.protocol().as_deref(), Some("chat"));

    mock.sink().established(socket.id(), None);
    socket.close();

    let seen = until_disconnected(&mut rx).await;
    assert!(seen.iter().all(|n| !matches!(n, Notification::Connected(_))));
    assert_eq!(socket.protocol().as_deref(), Some("chat"));
    client.wait_idle(WAIT).unwrap();
}

#[tokio::test]
async fn test_close_while_connecting() {
    let mock = MockConnector::new().configure(|script| script.establish = false);
    let client = mock.client(ClientConfig::default());
    let (delegate, mut rx) = delegate();

    let socket = client.open("ws://localhost:9001/", delegate, &[], None).unwrap();
    assert!(socket.send_text("queued while connecting"));
    socket.close();

    let seen = until_disconnected(&mut rx).await;
    assert_eq!(seen.len(), 1);
    assert!(mock.writes(socket.id()).is_empty());
    client.wait_idle(WAIT).unwrap();
}

#[tokio::test]
async fn test_handshake_failure_reports_error_then_disconnect() {
    let mock = MockConnector::new().configure(|script| script.establish = false);
    let client = mock.client(ClientConfig::default());
    let (delegate, mut rx) = delegate();

    let socket = client.open("ws://localhost:9001/", delegate, &[], None).unwrap();
    eventually(|| mock.calls().contains(&Call::Connect(socket.id()))).await;
    mock.sink().connection_error(socket.id(), "403 Forbidden");
    mock.sink().connection_error(socket.id(), "403 Forbidden");

    let seen = until_disconnected(&mut rx).await;
    assert_eq!(seen.len(), 2);
    assert!(matches!(seen[0], Notification::Error(_, ErrorCode::ConnectionFailure)));
    client.wait_idle(WAIT).unwrap();
}

#[tokio::test]
async fn test_refused_connect_reports_transport_error() {
    let mock = MockConnector::new().configure(|script| script.refuse_connect = true);
    let client = mock.client(ClientConfig::default());
    let (delegate, mut rx) = delegate();

    let socket = client.open("ws://localhost:9001/", delegate, &[], None).unwrap();
    let seen = until_disconnected(&mut rx).await;
    assert!(matches!(
        seen.as_slice(),
        [Notification::Error(_, ErrorCode::Transport), Notification::Disconnected(_)]
    ));
    client.wait_idle(WAIT).unwrap();
    assert_eq!(socket.state(), ConnectionState::Closed);
    assert!(!socket.send_text("too late"));
}

#[tokio::test]
async fn test_close_timeout_then_sync_close() {
    let mock = MockConnector::new().configure(|script| script.destroy_on_close = false);
    let client = mock.client(ClientConfig::default());
    let (delegate, mut rx) = delegate();

    let socket = client.open("ws://localhost:9001/", delegate, &[], None).unwrap();
    assert!(matches!(next(&mut rx).await, Notification::Connected(_)));

    let result = socket.close_timeout(Duration::from_millis(50));
    assert!(matches!(result, Err(Error::Timeout(_))));
    assert_eq!(socket.state(), ConnectionState::Closing);

    mock.sink().destroyed(socket.id());
    socket.close_sync().unwrap();
    until_disconnected(&mut rx).await;
    client.wait_idle(WAIT).unwrap();
}

#[tokio::test]
async fn test_queued_dispatcher_releases_on_drain() {
    let mock = MockConnector::new();
    let (dispatcher, mut queue) = QueuedDispatcher::new();
    let client = Client::with_dispatcher(
        ClientConfig::default(),
        Arc::new(mock.clone()),
        Arc::new(dispatcher),
    )
    .unwrap();
    let (delegate, mut rx) = delegate();

    let socket = client.open("ws://localhost:9001/", delegate, &[], None).unwrap();
    assert!(tokio::time::timeout(WAIT, queue.run_one_async()).await.unwrap());
    assert!(matches!(rx.try_recv(), Ok(Notification::Connected(_))));

    socket.close_sync().unwrap();
    assert_eq!(client.connection_count(), 1);
    assert!(client.is_running());

    assert!(tokio::time::timeout(WAIT, queue.run_one_async()).await.unwrap());
    assert!(matches!(rx.try_recv(), Ok(Notification::Disconnected(_))));
    assert_eq!(client.connection_count(), 0);
    assert_eq!(client.stop_requests(), 1);
}

struct BlockingCloser {
    results: Mutex<mpsc::Sender<bool>>,
}

impl WebSocketDelegate for BlockingCloser {
    fn on_connected(&self, socket: &WebSocket) {
        let refused = matches!(socket.close_sync(), Err(Error::OnNetworkThread));
        let _ = self.results.lock().unwrap().send(refused);
        socket.close();
    }
}

#[tokio::test]
async fn test_blocking_close_refused_on_network_thread() {
    let mock = MockConnector::new();
    let client = mock.client(ClientConfig::default());
    let (tx, rx) = mpsc::channel();
    let delegate = Arc::new(BlockingCloser {
        results: Mutex::new(tx),
    });

    client.open("ws://localhost:9001/", delegate, &[], None).unwrap();
    assert!(rx.recv_timeout(WAIT).unwrap());
    client.wait_idle(WAIT).unwrap();
}

/// Delegate that panics whenever the connection comes up or goes away
struct Faulty;

impl WebSocketDelegate for Faulty {
    fn on_connected(&self, _socket: &WebSocket) {
        panic!("on_connected failed");
    }

    fn on_disconnected(&self, _socket: &WebSocket) {
        panic!("on_disconnected failed");
    }
}

#[tokio::test]
async fn test_panicking_delegate_leaves_client_usable() {
    let mock = MockConnector::new();
    let client = mock.client(ClientConfig::default());

    let faulty = client.open("ws://localhost:9001/faulty", Arc::new(Faulty), &[], None).unwrap();
    eventually(|| faulty.state() == ConnectionState::Open).await;

    let (delegate, mut rx) = delegate();
    let healthy = client.open("ws://localhost:9001/healthy", delegate, &[], None).unwrap();
    assert!(matches!(next(&mut rx).await, Notification::Connected(_)));
    assert!(client.is_running());
    assert_eq!(client.threads_started(), 1);

    assert!(healthy.send_text("still served"));
    faulty.close_timeout(WAIT).unwrap();
    eventually(|| client.connection_count() == 1).await;

    healthy.close_timeout(WAIT).unwrap();
    until_disconnected(&mut rx).await;
    client.wait_idle(WAIT).unwrap();
    assert_eq!(client.connection_count(), 0);
    assert_eq!(client.stop_requests(), 1);
    assert!(!client.is_running());
    assert_eq!(mock.writes(healthy.id()).len(), 1);
}

#[tokio::test]
async fn test_dead_network_thread_is_replaced() {
    let mock = MockConnector::new().configure(|script| script.panic_on_connect = true);
    let client = mock.client(ClientConfig::default());

    let (first, mut rx_first) = delegate();
    let orphan = client.open("ws://localhost:9001/", first, &[], None).unwrap();
    eventually(|| !client.is_running()).await;
    assert_eq!(client.connection_count(), 1);

    mock.script().panic_on_connect = false;
    let (second, mut rx_second) = delegate();
    let socket = client.open("ws://localhost:9001/", second, &[], None).unwrap();

    assert!(matches!(
        next(&mut rx_first).await,
        Notification::Error(_, ErrorCode::Transport)
    ));
    assert!(matches!(next(&mut rx_first).await, Notification::Disconnected(_)));
    assert_eq!(orphan.state(), ConnectionState::Closed);
    assert!(orphan.close_sync().is_ok());

    assert!(matches!(next(&mut rx_second).await, Notification::Connected(_)));
    assert_eq!(client.threads_started(), 2);
    assert_eq!(client.connection_count(), 1);

    socket.close_timeout(WAIT).unwrap();
    client.wait_idle(WAIT).unwrap();
    assert_eq!(client.connection_count(), 0);
    assert_eq!(client.stop_requests(), 1);
}

#[tokio::test]
async fn test_wait_idle_fails_connections_of_dead_thread() {
    let mock = MockConnector::new().configure(|script| script.panic_on_connect = true);
    let client = mock.client(ClientConfig::default());
    let (delegate, mut rx) = delegate();

    let orphan = client.open("ws://localhost:9001/", delegate, &[], None).unwrap();
    eventually(|| !client.is_running()).await;

    client.wait_idle(WAIT).unwrap();
    assert_eq!(client.connection_count(), 0);
    assert_eq!(orphan.state(), ConnectionState::Closed);
    let seen = until_disconnected(&mut rx).await;
    assert!(matches!(seen[0], Notification::Error(_, ErrorCode::Transport)));
}

#[tokio::test]
async fn test_origin_and_ca_file_reach_transport() {
    let mock = MockConnector::new();
    let config = ClientConfig::default()
        .origin("https://app.example.com")
        .ca_file("/etc/ssl/cacert.pem");
    let client = mock.client(config);
    let (delegate, mut rx) = delegate();

    let socket = client
        .open("wss://example.com/feed", delegate, &["v1", "v2"], None)
        .unwrap();
    assert!(matches!(next(&mut rx).await, Notification::Connected(_)));
    socket.close_sync().unwrap();
    client.wait_idle(WAIT).unwrap();

    let script = mock.script();
    let request = &script.requests[0];
    assert_eq!(request.origin.as_deref(), Some("https://app.example.com"));
    assert_eq!(request.joined_protocols(), "v1,v2");
    assert_eq!(request.port, 443);
    assert!(request.ca_file.is_some());
}
