use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, event, info, warn, Level};

use crate::networking::message_envelope::{MessageEnvelope, MessageEnvelopeHeader, HEADER_SIZE};
use crate::networking::transport::{
    ServiceContext, SessionId, TransportError, TransportEvent, TransportEventSink, TransportLayer,
};
use crate::settings::NodeSettings;

/// The part of `NodeSettings` the TCP transports use.
#[derive(Clone, Debug, PartialEq)]
pub struct TcpTransportSettings {
    pub connect_timeout: Duration,
    pub close_linger: Duration,
    pub worker_threads: usize,
    pub maximum_body_length: u32,
    pub listen_host: String,
}

impl From<&NodeSettings> for TcpTransportSettings {
    fn from(settings: &NodeSettings) -> Self {
        TcpTransportSettings {
            connect_timeout: settings.connect_timeout,
            close_linger: settings.close_linger,
            worker_threads: settings.transport_worker_threads,
            maximum_body_length: settings.maximum_body_length,
            listen_host: settings.listen_host.clone(),
        }
    }
}

enum Outbound {
    Envelope(MessageEnvelope),
    Stop,
}

struct TcpServiceContext {
    session: SessionId,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl ServiceContext for TcpServiceContext {
    fn send(&self, envelope: MessageEnvelope) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Envelope(envelope))
            .map_err(|_| TransportError::SessionClosed(self.session))
    }

    fn stop(&self) {
        if self.outbound.send(Outbound::Stop).is_err() {
            debug!("session {} already stopped", self.session);
        }
    }
}

type WriterHandles = Arc<Mutex<Vec<JoinHandle<()>>>>;

fn lock_writers(writers: &WriterHandles) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
    writers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A tokio runtime owned by one open transport, plus the writer tasks to flush on close.
struct TransportRuntime {
    runtime: Runtime,
    writers: WriterHandles,
}

impl TransportRuntime {
    fn new(worker_threads: usize) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("tablenet-transport")
            .enable_all()
            .build()
            .map_err(TransportError::Runtime)?;
        Ok(TransportRuntime {
            runtime,
            writers: Arc::new(Mutex::new(vec![])),
        })
    }

    // give writers up to `linger` to flush, then drop every remaining task
    fn shutdown(self, linger: Duration) {
        let writers: Vec<JoinHandle<()>> = lock_writers(&self.writers).drain(..).collect();
        let flushed = self.runtime.block_on(async {
            tokio::time::timeout(linger, futures::future::join_all(writers)).await
        });
        if flushed.is_err() {
            debug!("transport writers still busy after {:?}", linger);
        }
        self.runtime.shutdown_background();
    }
}

// must be called inside the transport runtime
fn start_session(
    stream: TcpStream,
    events: &TransportEventSink,
    maximum_body_length: u32,
    writers: &WriterHandles,
) {
    let session = SessionId::new();
    if let Err(err) = stream.set_nodelay(true) {
        debug!("could not set TCP_NODELAY for {}: {}", session, err);
    }
    let (reader, writer) = stream.into_split();
    let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel();
    let stop = Arc::new(Notify::new());

    // reported before the reader starts, so it precedes every message of the session
    events(TransportEvent::SessionStarted {
        session,
        context: Box::new(TcpServiceContext {
            session,
            outbound: outbound_sender,
        }),
    });
    let writer_task = tokio::spawn(write_envelopes(
        session,
        writer,
        outbound_receiver,
        Arc::clone(&stop),
    ));
    {
        let mut writers = lock_writers(writers);
        writers.retain(|handle| !handle.is_finished());
        writers.push(writer_task);
    }
    tokio::spawn(read_envelopes(
        session,
        reader,
        Arc::clone(events),
        stop,
        maximum_body_length,
    ));
}

async fn write_envelopes(
    session: SessionId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    stop: Arc<Notify>,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Envelope(envelope) => {
                if let Err(err) = writer.write_all(&envelope.to_byte_array()).await {
                    warn!("failed to write to {}: {}", session, err);
                    break;
                }
            }
            Outbound::Stop => break,
        }
    }
    if let Err(err) = writer.shutdown().await {
        debug!("failed to shut down {}: {}", session, err);
    }
    stop.notify_one();
}

async fn read_envelopes(
    session: SessionId,
    mut reader: OwnedReadHalf,
    events: TransportEventSink,
    stop: Arc<Notify>,
    maximum_body_length: u32,
) {
    loop {
        let result = tokio::select! {
            _ = stop.notified() => break,
            result = read_envelope(&mut reader, maximum_body_length) => result,
        };
        match result {
            Ok(Some(envelope)) => events(TransportEvent::MessageReceived { session, envelope }),
            Ok(None) => {
                debug!("{} closed the connection", session);
                break;
            }
            Err(err) => {
                warn!("failed to read from {}: {}", session, err);
                break;
            }
        }
    }
    events(TransportEvent::SessionStopped { session });
}

fn invalid_data(err: impl ToString) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err.to_string())
}

/// Reads one envelope. `None` means the peer closed the connection between envelopes.
async fn read_envelope(
    reader: &mut OwnedReadHalf,
    maximum_body_length: u32,
) -> io::Result<Option<MessageEnvelope>> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header_bytes).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let header = MessageEnvelopeHeader::from_bytes(&header_bytes).map_err(invalid_data)?;
    if header.body_length() > maximum_body_length {
        return Err(invalid_data(format!(
            "body length {} exceeds {}",
            header.body_length(),
            maximum_body_length
        )));
    }
    let mut body = vec![0u8; header.body_length() as usize];
    reader.read_exact(&mut body).await?;
    MessageEnvelope::new(header, body)
        .map(Some)
        .map_err(invalid_data)
}

///
/// Listens on `listen_host:port` and starts a session for every accepted connection.
/// The host name handed to `open` names the server for clients and is not used here.
///
pub struct TcpServerTransportLayer {
    settings: TcpTransportSettings,
    runtime: Option<TransportRuntime>,
    local_addr: Option<SocketAddr>,
}

impl TcpServerTransportLayer {
    pub fn new(settings: TcpTransportSettings) -> Self {
        TcpServerTransportLayer {
            settings,
            runtime: None,
            local_addr: None,
        }
    }

    /// The bound address while open; useful when opened on port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl TransportLayer for TcpServerTransportLayer {
    fn open(
        &mut self,
        host_name: &str,
        port: u16,
        events: TransportEventSink,
    ) -> Result<(), TransportError> {
        if self.runtime.is_some() {
            return Err(TransportError::AlreadyOpen);
        }
        let runtime = TransportRuntime::new(self.settings.worker_threads)?;
        let listen_host = self.settings.listen_host.as_str();
        debug!("server for '{}' listening on {}", host_name, listen_host);
        let listener = match runtime
            .runtime
            .block_on(TcpListener::bind((listen_host, port)))
        {
            Ok(listener) => listener,
            Err(source) => {
                runtime.runtime.shutdown_background();
                return Err(TransportError::Open {
                    host: listen_host.to_string(),
                    port,
                    source,
                });
            }
        };
        self.local_addr = listener.local_addr().ok();
        info!("listening on {:?}", self.local_addr);

        let writers = Arc::clone(&runtime.writers);
        let maximum_body_length = self.settings.maximum_body_length;
        runtime.runtime.spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        event!(Level::INFO, "accepted connection from {}", peer);
                        start_session(stream, &events, maximum_body_length, &writers);
                    }
                    Err(err) => {
                        warn!("accept failed: {}", err);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        });
        self.runtime = Some(runtime);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown(self.settings.close_linger);
            self.local_addr = None;
            info!("server transport closed");
        }
    }
}

impl Drop for TcpServerTransportLayer {
    fn drop(&mut self) {
        self.close();
    }
}

///
/// Connects to `host_name:port` within the connect timeout and starts one session.
///
pub struct TcpClientTransportLayer {
    settings: TcpTransportSettings,
    runtime: Option<TransportRuntime>,
}

impl TcpClientTransportLayer {
    pub fn new(settings: TcpTransportSettings) -> Self {
        TcpClientTransportLayer {
            settings,
            runtime: None,
        }
    }
}

impl TransportLayer for TcpClientTransportLayer {
    fn open(
        &mut self,
        host_name: &str,
        port: u16,
        events: TransportEventSink,
    ) -> Result<(), TransportError> {
        if self.runtime.is_some() {
            return Err(TransportError::AlreadyOpen);
        }
        let runtime = TransportRuntime::new(self.settings.worker_threads)?;
        let connect_timeout = self.settings.connect_timeout;
        let maximum_body_length = self.settings.maximum_body_length;
        let writers = Arc::clone(&runtime.writers);
        let connected = runtime.runtime.block_on(async {
            let stream =
                match tokio::time::timeout(connect_timeout, TcpStream::connect((host_name, port)))
                    .await
                {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(source)) => {
                        return Err(TransportError::Open {
                            host: host_name.to_string(),
                            port,
                            source,
                        })
                    }
                    Err(_) => {
                        return Err(TransportError::Timeout {
                            host: host_name.to_string(),
                            port,
                        })
                    }
                };
            start_session(stream, &events, maximum_body_length, &writers);
            Ok(())
        });
        match connected {
            Ok(()) => {
                info!("connected to {}:{}", host_name, port);
                self.runtime = Some(runtime);
                Ok(())
            }
            Err(err) => {
                runtime.runtime.shutdown_background();
                Err(err)
            }
        }
    }

    fn close(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown(self.settings.close_linger);
            info!("client transport closed");
        }
    }
}

impl Drop for TcpClientTransportLayer {
    fn drop(&mut self) {
        self.close();
    }
}
