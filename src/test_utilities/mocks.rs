use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::networking::message::Message;
use crate::networking::message_envelope::MessageEnvelope;
use crate::networking::transport::{
    ServiceContext, SessionId, TransportError, TransportEvent, TransportEventSink, TransportLayer,
};
use crate::node::{Node, NodeApi, NodeStrategy};
use crate::player::PlayerRole;

/// A session context that keeps every envelope sent through it.
#[derive(Clone)]
pub struct RecordingServiceContext {
    session: SessionId,
    sent: Arc<Mutex<Vec<MessageEnvelope>>>,
    stopped: Arc<AtomicBool>,
    refusing: Arc<AtomicBool>,
}

impl RecordingServiceContext {
    pub fn new() -> Self {
        RecordingServiceContext {
            session: SessionId::new(),
            sent: Arc::new(Mutex::new(vec![])),
            stopped: Arc::new(AtomicBool::new(false)),
            refusing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn sent_envelopes(&self) -> Vec<MessageEnvelope> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent_envelopes()
            .iter()
            .map(|envelope| envelope.decode_message().unwrap())
            .collect()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Fails every later send as if the connection had dropped.
    pub fn refuse_sends(&self) {
        self.refusing.store(true, Ordering::SeqCst);
    }
}

impl ServiceContext for RecordingServiceContext {
    fn send(&self, envelope: MessageEnvelope) -> std::result::Result<(), TransportError> {
        if self.is_stopped() || self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::SessionClosed(self.session));
        }
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeTransportState {
    fail: bool,
    open_count: usize,
    close_count: usize,
    sink: Option<TransportEventSink>,
}

/// A transport that never touches the network. Clones share their state, so a test
/// keeps one clone to inject events after handing the other to a node.
#[derive(Clone, Default)]
pub struct FakeTransportLayer {
    state: Arc<Mutex<FakeTransportState>>,
}

impl FakeTransportLayer {
    pub fn succeeding() -> Self {
        FakeTransportLayer::default()
    }

    pub fn failing() -> Self {
        let transport = FakeTransportLayer::default();
        transport.state.lock().unwrap().fail = true;
        transport
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().open_count
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().close_count
    }

    pub fn sink(&self) -> Option<TransportEventSink> {
        self.state.lock().unwrap().sink.clone()
    }

    /// Delivers `event` the way a real transport would, from outside the node layer.
    pub fn emit(&self, event: TransportEvent) {
        let sink = self.sink().expect("transport was never opened");
        sink(event);
    }
}

impl TransportLayer for FakeTransportLayer {
    fn open(
        &mut self,
        host_name: &str,
        port: u16,
        events: TransportEventSink,
    ) -> std::result::Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.open_count += 1;
        if state.fail {
            return Err(TransportError::Open {
                host: host_name.to_string(),
                port,
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
            });
        }
        state.sink = Some(events);
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().close_count += 1;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Hook {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Dispose,
    RemoteNodeStarted,
    RemoteNodeStopped(Option<String>),
}

/// Each entry is a hook and whether the local table proxy was bound when it ran.
pub type HookLog = Arc<Mutex<Vec<(Hook, bool)>>>;

/// A strategy that only records which hooks ran.
pub struct RecordingStrategy {
    log: HookLog,
}

impl RecordingStrategy {
    pub fn new(log: HookLog) -> Self {
        RecordingStrategy { log }
    }

    fn record(node: &Node<Self>, hook: Hook) {
        let local_proxy_bound = node.table_proxies().values().any(|proxy| proxy.is_local());
        node.strategy.log.lock().unwrap().push((hook, local_proxy_bound));
    }
}

impl NodeStrategy for RecordingStrategy {
    fn local_player_roles() -> Vec<PlayerRole> {
        vec![]
    }

    fn connecting(node: &mut Node<Self>) -> Result<()> {
        RecordingStrategy::record(node, Hook::Connecting);
        Ok(())
    }

    fn connected(node: &mut Node<Self>) {
        RecordingStrategy::record(node, Hook::Connected);
    }

    fn disconnecting(node: &mut Node<Self>) {
        RecordingStrategy::record(node, Hook::Disconnecting);
    }

    fn disconnected(node: &mut Node<Self>) {
        RecordingStrategy::record(node, Hook::Disconnected);
    }

    fn dispose(node: &mut Node<Self>) {
        RecordingStrategy::record(node, Hook::Dispose);
    }

    fn remote_node_started(node: &mut Node<Self>, _session: SessionId) {
        RecordingStrategy::record(node, Hook::RemoteNodeStarted);
    }

    fn remote_node_stopped(node: &mut Node<Self>, _session: SessionId, player_name: Option<String>) {
        RecordingStrategy::record(node, Hook::RemoteNodeStopped(player_name));
    }

    fn give_control(_node: &mut Node<Self>, _player_name: &str) -> Result<()> {
        Ok(())
    }

    fn request_control(_node: &mut Node<Self>) -> Result<()> {
        Ok(())
    }

    fn cancel_control_request(_node: &mut Node<Self>) -> Result<()> {
        Ok(())
    }

    fn accepts_table_increment_from(_node: &Node<Self>, _session: SessionId) -> bool {
        true
    }
}
