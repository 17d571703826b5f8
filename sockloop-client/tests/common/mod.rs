//! Scripted in-memory transport for driving the client without sockets.
//!
//! The transport answers synchronously through the event sink: connections
//! are established on connect, every writable request is granted, and close
//! destroys the socket. Each behavior can be switched off so tests can inject
//! the events themselves.

#![allow(dead_code)]

use sockloop_client::{ChannelDelegate, Client, ClientConfig, Notification};
use sockloop_core::{
    ConnectRequest, ConnectionId, Connector, ContextOptions, Error, EventSink, Result, Transport,
    WriteKind,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect(ConnectionId),
    Write(ConnectionId, usize, WriteKind),
    Writable(ConnectionId),
    Close(ConnectionId),
}

#[derive(Debug)]
pub struct Script {
    pub establish: bool,
    pub protocol: Option<String>,
    pub refuse_connect: bool,
    pub panic_on_connect: bool,
    pub fail_writes: bool,
    pub grant_writable: bool,
    pub destroy_on_close: bool,
    pub calls: Vec<Call>,
    pub requests: Vec<ConnectRequest>,
    pub contexts: usize,
    pub sink: Option<EventSink>,
    closed: HashSet<ConnectionId>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            establish: true,
            protocol: None,
            refuse_connect: false,
            panic_on_connect: false,
            fail_writes: false,
            grant_writable: true,
            destroy_on_close: true,
            calls: Vec::new(),
            requests: Vec::new(),
            contexts: 0,
            sink: None,
            closed: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    script: Arc<Mutex<Script>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn configure(self, f: impl FnOnce(&mut Script)) -> Self {
        f(&mut self.script());
        self
    }

    pub fn sink(&self) -> EventSink {
        self.script().sink.clone().expect("no transport context yet")
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script().calls.clone()
    }

    pub fn writes(&self, id: ConnectionId) -> Vec<(usize, WriteKind)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Write(target, len, kind) if target == id => Some((len, kind)),
                _ => None,
            })
            .collect()
    }

    pub fn contexts(&self) -> usize {
        self.script().contexts
    }

    pub fn client(&self, config: ClientConfig) -> Client {
        Client::new(config, Arc::new(self.clone())).unwrap()
    }
}

impl Connector for MockConnector {
    fn create_context(&self, _options: &ContextOptions, events: EventSink) -> Result<Box<dyn Transport>> {
        let mut script = self.script();
        script.contexts += 1;
        script.sink = Some(events.clone());
        Ok(Box::new(MockTransport {
            script: Arc::clone(&self.script),
            events,
        }))
    }
}

struct MockTransport {
    script: Arc<Mutex<Script>>,
    events: EventSink,
}

impl Transport for MockTransport {
    fn connect(&mut self, id: ConnectionId, request: &ConnectRequest) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Connect(id));
        script.requests.push(request.clone());
        if script.panic_on_connect {
            drop(script);
            panic!("transport crashed");
        }
        if script.refuse_connect {
            return Err(Error::Transport("connect refused".into()));
        }
        if script.establish {
            self.events.established(id, script.protocol.clone());
        }
        Ok(())
    }

    fn write(&mut self, id: ConnectionId, chunk: &[u8], kind: WriteKind) -> Result<usize> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Write(id, chunk.len(), kind));
        if script.fail_writes {
            return Err(Error::Transport("broken pipe".into()));
        }
        Ok(chunk.len())
    }

    fn request_writable(&mut self, id: ConnectionId) {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Writable(id));
        if script.grant_writable {
            self.events.writable(id);
        }
    }

    fn close(&mut self, id: ConnectionId) {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Close(id));
        if script.destroy_on_close && script.closed.insert(id) {
            self.events.destroyed(id);
        }
    }
}

pub fn delegate() -> (Arc<ChannelDelegate>, UnboundedReceiver<Notification>) {
    let (delegate, rx) = ChannelDelegate::new();
    (Arc::new(delegate), rx)
}

/// Next notification, failing the test after [`WAIT`]
pub async fn next(rx: &mut UnboundedReceiver<Notification>) -> Notification {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a notification")
        .expect("delegate channel closed")
}

/// Collect notifications up to and including the disconnect
pub async fn until_disconnected(rx: &mut UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut seen = Vec::new();
    loop {
        let notification = next(rx).await;
        let done = matches!(notification, Notification::Disconnected(_));
        seen.push(notification);
        if done {
            return seen;
        }
    }
}

/// Poll `condition` until it holds, failing the test after [`WAIT`]
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}
