//! tokio-tungstenite transport
//!
//! Every connection runs as a task on the network thread's runtime. The
//! [`Transport`] methods only talk to those tasks through per-connection
//! channels, so none of them block the network loop. Tasks report back through
//! the context's [`EventSink`].
//!
//! A failed frame write is reported as a connection error before the socket is
//! destroyed. A failed read or a vanished peer only ends the connection.

use crate::tls;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use rustls::ClientConfig as TlsConfig;
use sockloop_core::{
    ConnectRequest, ConnectionId, Connector, ContextOptions, Error, EventSink, Fragment, Opcode,
    Result, Transport, WriteKind,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Creates [`TungsteniteTransport`] contexts
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self
    }
}

impl Connector for TungsteniteConnector {
    fn create_context(&self, options: &ContextOptions, events: EventSink) -> Result<Box<dyn Transport>> {
        let transport = TungsteniteTransport::new(options, events)?;
        Ok(Box::new(transport))
    }
}

enum Outbound {
    Frame(Frame),
    Writable,
    Close,
}

struct Settings {
    max_frame_size: usize,
    handshake_timeout: Duration,
    close_timeout: Duration,
    allow_insecure: bool,
}

/// Transport context backed by tokio-tungstenite.
///
/// Must be used from inside a tokio runtime; [`connect`](Transport::connect)
/// spawns the connection task onto the current one.
pub struct TungsteniteTransport {
    settings: Arc<Settings>,
    tls: Option<Arc<TlsConfig>>,
    events: EventSink,
    connections: HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>,
}

impl TungsteniteTransport {
    /// Create a context.
    ///
    /// With TLS enabled the default client configuration is built up front,
    /// so an unreadable CA file fails here.
    pub fn new(options: &ContextOptions, events: EventSink) -> Result<Self> {
        let tls = if options.tls {
            Some(tls::client_config(
                options.ca_file.as_deref(),
                options.allow_insecure,
            )?)
        } else {
            None
        };

        Ok(Self {
            settings: Arc::new(Settings {
                max_frame_size: options.max_frame_size,
                handshake_timeout: options.handshake_timeout,
                close_timeout: options.close_timeout,
                allow_insecure: options.allow_insecure,
            }),
            tls,
            events,
            connections: HashMap::new(),
        })
    }

    /// Number of connections with a live task
    pub fn active(&self) -> usize {
        self.connections.values().filter(|tx| !tx.is_closed()).count()
    }

    fn tls_for(&self, request: &ConnectRequest) -> Result<Option<Arc<TlsConfig>>> {
        if !request.secure {
            return Ok(None);
        }
        let Some(default) = &self.tls else {
            return Err(Error::Tls("TLS disabled for this context".to_string()));
        };
        match &request.ca_file {
            Some(path) => tls::client_config(Some(path), self.settings.allow_insecure).map(Some),
            None => Ok(Some(Arc::clone(default))),
        }
    }

    fn send(&self, id: ConnectionId, outbound: Outbound) -> Result<()> {
        let tx = self
            .connections
            .get(&id)
            .ok_or(Error::UnknownConnection(id))?;
        tx.send(outbound)
            .map_err(|_| Error::Transport(format!("connection {} task has finished", id)))
    }
}

impl Transport for TungsteniteTransport {
    fn connect(&mut self, id: ConnectionId, request: &ConnectRequest) -> Result<()> {
        let tls = self.tls_for(request)?;
        self.connections.retain(|_, tx| !tx.is_closed());

        let (tx, rx) = mpsc::unbounded_channel();
        let task = ConnectionTask {
            id,
            request: request.clone(),
            tls,
            settings: Arc::clone(&self.settings),
            events: self.events.clone(),
            outbound: rx,
        };
        tokio::spawn(task.run());
        self.connections.insert(id, tx);

        debug!(connection = %id, url = %request.url(), "connection task spawned");
        Ok(())
    }

    fn write(&mut self, id: ConnectionId, chunk: &[u8], kind: WriteKind) -> Result<usize> {
        if chunk.len() > self.settings.max_frame_size {
            return Err(Error::Transport(format!(
                "frame of {} bytes exceeds the {} byte limit",
                chunk.len(),
                self.settings.max_frame_size
            )));
        }
        let frame = Frame::message(chunk.to_vec(), data_opcode(kind.opcode)?, kind.fin);
        self.send(id, Outbound::Frame(frame))?;
        Ok(chunk.len())
    }

    fn request_writable(&mut self, id: ConnectionId) {
        if let Err(e) = self.send(id, Outbound::Writable) {
            debug!(connection = %id, error = %e, "writable request dropped");
        }
    }

    fn close(&mut self, id: ConnectionId) {
        if let Some(tx) = self.connections.remove(&id) {
            let _ = tx.send(Outbound::Close);
        }
    }
}

impl fmt::Debug for TungsteniteTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TungsteniteTransport")
            .field("tls", &self.tls.is_some())
            .field("connections", &self.connections.len())
            .finish()
    }
}

fn data_opcode(opcode: Opcode) -> Result<OpCode> {
    match opcode {
        Opcode::Text => Ok(OpCode::Data(Data::Text)),
        Opcode::Binary => Ok(OpCode::Data(Data::Binary)),
        Opcode::Continuation => Ok(OpCode::Data(Data::Continue)),
        other => Err(Error::Transport(format!(
            "{:?} frames are not written through the data path",
            other
        ))),
    }
}

struct ConnectionTask {
    id: ConnectionId,
    request: ConnectRequest,
    tls: Option<Arc<TlsConfig>>,
    settings: Arc<Settings>,
    events: EventSink,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl ConnectionTask {
    async fn run(mut self) {
        if let Some(stream) = self.establish().await {
            let (sink, incoming) = stream.split();
            self.serve(sink, incoming).await;
        }
        trace!(connection = %self.id, "connection task finished");
        self.events.destroyed(self.id);
    }

    /// Complete the handshake unless it fails, times out or is cancelled by a close
    async fn establish(&mut self) -> Option<WsStream> {
        let handshake = tokio::time::timeout(
            self.settings.handshake_timeout,
            handshake(&self.request, self.tls.clone()),
        );
        tokio::pin!(handshake);

        loop {
            tokio::select! {
                result = &mut handshake => {
                    return match result {
                        Ok(Ok((stream, protocol))) => {
                            info!(connection = %self.id, url = %self.request.url(), "handshake complete");
                            self.events.established(self.id, protocol);
                            Some(stream)
                        }
                        Ok(Err(e)) => {
                            warn!(connection = %self.id, error = %e, "handshake failed");
                            self.events.connection_error(self.id, e.to_string());
                            None
                        }
                        Err(_) => {
                            let reason = format!(
                                "handshake timed out after {:?}",
                                self.settings.handshake_timeout
                            );
                            warn!(connection = %self.id, %reason);
                            self.events.connection_error(self.id, reason);
                            None
                        }
                    };
                }
                command = self.outbound.recv() => match command {
                    Some(Outbound::Close) | None => {
                        debug!(connection = %self.id, "handshake cancelled");
                        return None;
                    }
                    Some(_) => trace!(connection = %self.id, "command before handshake ignored"),
                },
            }
        }
    }

    async fn serve<S, R>(&mut self, mut sink: S, mut incoming: R)
    where
        S: Sink<Message, Error = WsError> + Unpin,
        R: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    {
        loop {
            tokio::select! {
                command = self.outbound.recv() => match command {
                    Some(Outbound::Frame(frame)) => {
                        if let Err(e) = sink.send(Message::Frame(frame)).await {
                            warn!(connection = %self.id, error = %e, "frame write failed");
                            self.events.connection_error(self.id, format!("write failed: {}", e));
                            return;
                        }
                    }
                    Some(Outbound::Writable) => {
                        self.events.writable(self.id);
                    }
                    Some(Outbound::Close) | None => break,
                },
                message = incoming.next() => match message {
                    Some(Ok(message)) => {
                        if !self.receive(message) {
                            let _ = sink.close().await;
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(connection = %self.id, error = %e, "read failed");
                        return;
                    }
                    None => return,
                },
            }
        }

        debug!(connection = %self.id, "sending close frame");
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!(connection = %self.id, error = %e, "close frame not sent");
            return;
        }

        let drain = async {
            while let Some(Ok(message)) = incoming.next().await {
                if message.is_close() {
                    break;
                }
            }
        };
        if tokio::time::timeout(self.settings.close_timeout, drain).await.is_err() {
            debug!(connection = %self.id, "peer did not answer close in time");
        }
    }

    /// Report one received message; false once the peer has closed
    fn receive(&self, message: Message) -> bool {
        match message {
            Message::Text(text) => {
                self.events.fragment(self.id, Fragment::last(text.into_bytes(), false));
            }
            Message::Binary(data) => {
                self.events.fragment(self.id, Fragment::last(data, true));
            }
            Message::Ping(_) => {
                self.events.unhandled(self.id, "ping");
            }
            Message::Pong(_) => {
                self.events.unhandled(self.id, "pong");
            }
            Message::Frame(_) => {
                self.events.unhandled(self.id, "raw frame");
            }
            Message::Close(frame) => {
                let reason = match frame {
                    Some(frame) => format!("peer close {} {}", u16::from(frame.code), frame.reason),
                    None => "peer close".to_string(),
                };
                self.events.unhandled(self.id, reason);
                return false;
            }
        }
        true
    }
}

async fn handshake(
    request: &ConnectRequest,
    tls: Option<Arc<TlsConfig>>,
) -> Result<(WsStream, Option<String>)> {
    let mut upgrade = request
        .url()
        .into_client_request()
        .map_err(|e| Error::Connection(e.to_string()))?;

    let headers = upgrade.headers_mut();
    if !request.protocols.is_empty() {
        let value = HeaderValue::from_str(&request.joined_protocols())
            .map_err(|e| Error::Connection(format!("invalid sub-protocol header: {}", e)))?;
        headers.insert("Sec-WebSocket-Protocol", value);
    }
    if let Some(origin) = &request.origin {
        let value = HeaderValue::from_str(origin)
            .map_err(|e| Error::Connection(format!("invalid origin header: {}", e)))?;
        headers.insert("Origin", value);
    }

    let socket = TcpStream::connect(request.authority()).await?;
    socket.set_nodelay(true)?;

    let connector = tls.map(tokio_tungstenite::Connector::Rustls);
    let (stream, response) =
        tokio_tungstenite::client_async_tls_with_config(upgrade, socket, None, connector)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

    let protocol = response
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    Ok((stream, protocol))
}
