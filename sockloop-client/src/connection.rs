//! Connection state machine
//!
//! A [`Connection`] is created on the caller's thread but only ever changes
//! state on the network thread, driven by commands from the queue and events
//! from the transport. Callers may read its state and block until it is
//! closed; nothing else crosses threads.
//!
//! State transitions return [`Notice`]s instead of calling the delegate; the
//! event loop hands them to the dispatcher.

use crate::command::Command;
use crate::config::ClientConfig;
use crate::delegate::WebSocketDelegate;
use crate::looper::CommandSender;
use sockloop_core::{
    ConnectRequest, ConnectionId, Error, ErrorCode, Fragment, FrameBuffer, Message,
    MessageAssembler, Result, Transport,
};
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The handshake is in flight
    Connecting,
    /// The handshake completed; messages flow
    Open,
    /// No new writes are accepted; queued frames drain, then the socket closes
    Closing,
    /// The socket is gone
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Delegate notification produced by a state transition
#[derive(Debug)]
pub(crate) enum Notice {
    Connected,
    Message(Message),
    Error(ErrorCode),
    Disconnected,
}

/// One-shot guards for the notifications that may fire at most once
#[derive(Debug, Default)]
struct Latches {
    connected: AtomicBool,
    error: AtomicBool,
    closed: AtomicBool,
}

fn fire(latch: &AtomicBool) -> bool {
    !latch.swap(true, Ordering::AcqRel)
}

#[derive(Debug)]
struct Status {
    state: ConnectionState,
    protocol: Option<String>,
    close_requested: bool,
}

#[derive(Debug)]
struct Pipeline {
    queue: VecDeque<FrameBuffer>,
    assembler: MessageAssembler,
}

/// One logical WebSocket client connection
pub(crate) struct Connection {
    id: ConnectionId,
    request: ConnectRequest,
    delegate: Arc<dyn WebSocketDelegate>,
    commands: CommandSender<Command>,
    max_frame_size: usize,
    status: Mutex<Status>,
    closed: Condvar,
    pipeline: Mutex<Pipeline>,
    latches: Latches,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        request: ConnectRequest,
        delegate: Arc<dyn WebSocketDelegate>,
        commands: CommandSender<Command>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            id,
            request,
            delegate,
            commands,
            max_frame_size: config.max_frame_size,
            status: Mutex::new(Status {
                state: ConnectionState::Connecting,
                protocol: None,
                close_requested: false,
            }),
            closed: Condvar::new(),
            pipeline: Mutex::new(Pipeline {
                queue: VecDeque::new(),
                assembler: MessageAssembler::new(config.receive_reserve),
            }),
            latches: Latches::default(),
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn request(&self) -> &ConnectRequest {
        &self.request
    }

    pub(crate) fn delegate(&self) -> &dyn WebSocketDelegate {
        self.delegate.as_ref()
    }

    pub(crate) fn commands(&self) -> &CommandSender<Command> {
        &self.commands
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.status().state
    }

    pub(crate) fn protocol(&self) -> Option<String> {
        self.status().protocol.clone()
    }

    /// Frames waiting in the send queue
    pub(crate) fn queued(&self) -> usize {
        self.pipeline().queue.len()
    }

    /// Block until the connection is closed, or until `timeout` elapses
    pub(crate) fn wait_closed(&self, timeout: Option<Duration>) -> Result<()> {
        let status = self.status();
        let not_closed = |status: &mut Status| status.state != ConnectionState::Closed;

        match timeout {
            None => {
                let _status = self
                    .closed
                    .wait_while(status, not_closed)
                    .unwrap_or_else(PoisonError::into_inner);
                Ok(())
            }
            Some(timeout) => {
                let (_status, result) = self
                    .closed
                    .wait_timeout_while(status, timeout, not_closed)
                    .unwrap_or_else(PoisonError::into_inner);
                if result.timed_out() {
                    Err(Error::Timeout(timeout))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Handle the OPEN command
    pub(crate) fn start(&self, transport: &mut dyn Transport) -> Vec<Notice> {
        match self.state() {
            ConnectionState::Connecting => {}
            ConnectionState::Closing => {
                debug!(connection = %self.id, "closed before the transport saw it");
                return self.finish().into_iter().collect();
            }
            state => {
                debug!(connection = %self.id, %state, "open ignored");
                return Vec::new();
            }
        }

        match transport.connect(self.id, &self.request) {
            Ok(()) => {
                debug!(
                    connection = %self.id,
                    url = %self.request.url(),
                    protocols = %self.request.joined_protocols(),
                    "connecting"
                );
                Vec::new()
            }
            Err(e) => {
                warn!(connection = %self.id, error = %e, "transport refused connection");
                self.refuse()
            }
        }
    }

    /// Fail the connection without a transport, or after its network thread
    /// died: error, then closed
    pub(crate) fn refuse(&self) -> Vec<Notice> {
        let mut notices = Vec::with_capacity(2);
        if fire(&self.latches.error) {
            notices.push(Notice::Error(ErrorCode::Transport));
        }
        notices.extend(self.finish());
        notices
    }

    /// Handle a WRITE command
    pub(crate) fn push_write(&self, buffer: FrameBuffer, transport: &mut dyn Transport) {
        match self.state() {
            ConnectionState::Connecting => {
                self.pipeline().queue.push_back(buffer);
            }
            ConnectionState::Open => {
                self.pipeline().queue.push_back(buffer);
                transport.request_writable(self.id);
            }
            state => {
                debug!(connection = %self.id, %state, len = buffer.len(), "write dropped");
            }
        }
    }

    /// Handle the CLOSE command
    pub(crate) fn close(&self, transport: &mut dyn Transport) {
        let previous = {
            let mut status = self.status();
            let previous = status.state;
            if matches!(previous, ConnectionState::Connecting | ConnectionState::Open) {
                status.state = ConnectionState::Closing;
            }
            previous
        };

        match previous {
            ConnectionState::Connecting => {
                debug!(connection = %self.id, "close requested while connecting");
                self.shutdown(transport);
            }
            ConnectionState::Open => {
                debug!(connection = %self.id, queued = self.queued(), "closing, draining send queue");
                transport.request_writable(self.id);
            }
            state => {
                trace!(connection = %self.id, %state, "close ignored");
            }
        }
    }

    /// The transport completed the handshake
    pub(crate) fn on_established(
        &self,
        protocol: Option<String>,
        transport: &mut dyn Transport,
    ) -> Option<Notice> {
        {
            let mut status = self.status();
            if status.state != ConnectionState::Connecting {
                debug!(connection = %self.id, state = %status.state, "late handshake ignored");
                return None;
            }
            status.state = ConnectionState::Open;
            status.protocol = protocol.clone();
        }

        info!(
            connection = %self.id,
            protocol = protocol.as_deref().unwrap_or(""),
            "connected"
        );
        transport.request_writable(self.id);
        fire(&self.latches.connected).then_some(Notice::Connected)
    }

    /// The transport reported a handshake or connection failure
    pub(crate) fn on_connection_error(
        &self,
        reason: &str,
        transport: &mut dyn Transport,
    ) -> Option<Notice> {
        warn!(connection = %self.id, %reason, "connection error");
        self.pipeline().queue.clear();

        if self.state() != ConnectionState::Closed {
            self.shutdown(transport);
        }

        fire(&self.latches.error).then_some(Notice::Error(ErrorCode::ConnectionFailure))
    }

    /// Payload bytes arrived
    pub(crate) fn on_fragment(&self, fragment: Fragment) -> Option<Notice> {
        if self.state() == ConnectionState::Closed {
            trace!(connection = %self.id, "fragment after close ignored");
            return None;
        }

        let message = self.pipeline().assembler.feed(fragment)?;
        trace!(
            connection = %self.id,
            len = message.len(),
            binary = message.is_binary(),
            "message received"
        );

        #[cfg(feature = "metrics")]
        {
            metrics::counter!("sockloop_client_messages_received_total").increment(1);
            metrics::counter!("sockloop_client_bytes_received_total")
                .increment(message.len() as u64);
        }

        Some(Notice::Message(message))
    }

    /// The transport can take more data
    pub(crate) fn on_writable(&self, transport: &mut dyn Transport) {
        let state = self.state();
        if !matches!(state, ConnectionState::Open | ConnectionState::Closing) {
            trace!(connection = %self.id, %state, "writable ignored");
            return;
        }

        let mut pipeline = self.pipeline();
        if let Some(buffer) = pipeline.queue.front_mut() {
            let (chunk, kind) = buffer.next_chunk(self.max_frame_size);
            match transport.write(self.id, chunk, kind) {
                Ok(written) => {
                    buffer.consume(written);
                    trace!(
                        connection = %self.id,
                        written,
                        %kind,
                        remaining = buffer.remaining(),
                        "frame written"
                    );

                    #[cfg(feature = "metrics")]
                    {
                        metrics::counter!("sockloop_client_bytes_sent_total")
                            .increment(written as u64);
                    }

                    if buffer.is_drained() {
                        pipeline.queue.pop_front();

                        #[cfg(feature = "metrics")]
                        {
                            metrics::counter!("sockloop_client_messages_sent_total").increment(1);
                        }
                    }
                }
                Err(e) => {
                    let discarded = pipeline.queue.len();
                    pipeline.queue.clear();
                    drop(pipeline);
                    warn!(connection = %self.id, error = %e, discarded, "write failed, closing");

                    #[cfg(feature = "metrics")]
                    {
                        metrics::counter!("sockloop_client_write_failures_total").increment(1);
                    }

                    self.shutdown(transport);
                    return;
                }
            }
        }

        let pending = !pipeline.queue.is_empty();
        drop(pipeline);

        if pending {
            transport.request_writable(self.id);
        } else if state == ConnectionState::Closing {
            debug!(connection = %self.id, "send queue drained, closing socket");
            self.shutdown(transport);
        }
    }

    /// The socket resource is gone
    pub(crate) fn on_destroyed(&self) -> Option<Notice> {
        self.finish()
    }

    /// Move to CLOSING and ask the transport to close the socket, once
    fn shutdown(&self, transport: &mut dyn Transport) {
        let first = {
            let mut status = self.status();
            if matches!(status.state, ConnectionState::Connecting | ConnectionState::Open) {
                status.state = ConnectionState::Closing;
            }
            status.state != ConnectionState::Closed && !mem::replace(&mut status.close_requested, true)
        };

        if first {
            transport.close(self.id);
        }
    }

    fn finish(&self) -> Option<Notice> {
        let previous = mem::replace(&mut self.status().state, ConnectionState::Closed);
        self.closed.notify_all();

        {
            let mut pipeline = self.pipeline();
            pipeline.queue.clear();
            pipeline.assembler.clear();
        }

        if previous != ConnectionState::Closed {
            info!(connection = %self.id, "disconnected");

            #[cfg(feature = "metrics")]
            {
                metrics::counter!("sockloop_client_connections_closed_total").increment(1);
            }
        }

        fire(&self.latches.closed).then_some(Notice::Disconnected)
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pipeline(&self) -> MutexGuard<'_, Pipeline> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("url", &self.request.uri)
            .field("state", &self.state())
            .finish()
    }
}
