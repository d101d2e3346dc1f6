use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::connection::config::ConnectionConfig;
use crate::core::{Result, StoreError};

use super::frame::{encode_frame, read_frame};
use super::proto::{Envelope, Reply, Response};
use super::Transport;

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

type BoxedStream = Box<dyn AsyncStream>;
type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<Result<Response>>>>>;

/// Frames queued for the writer task.
const OUTGOING_QUEUE: usize = 64;

enum Outgoing {
    Frame {
        bytes: Vec<u8>,
        written: oneshot::Sender<Result<()>>,
    },
    Close(oneshot::Sender<()>),
}

/// Multiplexed transport over one TCP (optionally TLS) connection. A reader
/// task matches replies to in-flight requests by request id; a writer task
/// owns the write half so a frame is always written whole, even when the
/// caller stops waiting.
pub struct TcpTransport {
    peer: String,
    outgoing: mpsc::Sender<Outgoing>,
    pending: PendingMap,
    shutdown: CancellationToken,
    request_timeout: Option<Duration>,
}

impl TcpTransport {
    /// Dials the endpoint described by `config`.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let addr = config.address();
        let connect_timeout = config.effective_connect_timeout();
        debug!(%addr, ?connect_timeout, insecure = config.insecure, "dialing store");

        let tcp = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                StoreError::Transport(format!(
                    "Timed out connecting to {} after {:?}",
                    addr, connect_timeout
                ))
            })?
            .map_err(|e| StoreError::Transport(format!("Failed to connect to {}: {}", addr, e)))?;
        tcp.set_nodelay(true)?;

        let stream: BoxedStream = if config.insecure {
            Box::new(tcp)
        } else {
            wrap_tls(tcp, &config.host).await?
        };

        Ok(Self::from_stream(
            stream,
            addr,
            config.idle_timeout,
            config.request_timeout,
        ))
    }

    /// Runs the transport over an already established byte stream.
    pub fn from_stream<S>(
        stream: S,
        peer: impl Into<String>,
        idle_timeout: Option<Duration>,
        request_timeout: Option<Duration>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let boxed: BoxedStream = Box::new(stream);
        let (reader, writer) = tokio::io::split(boxed);
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();
        let peer = peer.into();
        let (outgoing, queue) = mpsc::channel(OUTGOING_QUEUE);

        tokio::spawn(read_loop(
            reader,
            pending.clone(),
            shutdown.clone(),
            idle_timeout,
            peer.clone(),
        ));
        tokio::spawn(write_loop(
            writer,
            queue,
            pending.clone(),
            shutdown.clone(),
            peer.clone(),
        ));

        Self {
            peer,
            outgoing,
            pending,
            shutdown,
            request_timeout,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn in_flight(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

/// Removes the pending slot when the caller stops waiting.
struct PendingGuard {
    pending: PendingMap,
    request_id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.request_id);
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn call(&self, envelope: Envelope) -> Result<Response> {
        if self.shutdown.is_cancelled() {
            return Err(StoreError::Transport("Transport is closed".into()));
        }

        let request_id = envelope.request_id;
        let bytes = encode_frame(&envelope)?;
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| StoreError::Transport("Pending request table poisoned".into()))?;
            if pending.insert(request_id, tx).is_some() {
                return Err(StoreError::Transport(format!(
                    "Request id {} is already in flight",
                    request_id
                )));
            }
        }
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            request_id,
        };

        let (written, write_done) = oneshot::channel();
        self.outgoing
            .send(Outgoing::Frame { bytes, written })
            .await
            .map_err(|_| StoreError::Transport("Transport is closed".into()))?;
        write_done
            .await
            .map_err(|_| StoreError::Transport("Connection closed before the request was sent".into()))??;

        let reply = match self.request_timeout {
            Some(limit) => timeout(limit, rx).await.map_err(|_| {
                StoreError::Transport(format!(
                    "Request {} ({}) timed out after {:?}",
                    request_id,
                    envelope.request.kind(),
                    limit
                ))
            })?,
            None => rx.await,
        };

        reply.map_err(|_| StoreError::Transport("Connection closed before reply".into()))?
    }

    async fn close(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        // Frames already queued are written before the socket shuts down.
        let (closed, close_done) = oneshot::channel();
        if self.outgoing.send(Outgoing::Close(closed)).await.is_ok() {
            let _ = close_done.await;
        }
        self.shutdown.cancel();
        fail_all(&self.pending, "Transport closed");
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn read_loop(
    mut reader: ReadHalf<BoxedStream>,
    pending: PendingMap,
    shutdown: CancellationToken,
    idle_timeout: Option<Duration>,
    peer: String,
) {
    let idle_period = idle_timeout.unwrap_or(Duration::from_secs(3600));

    loop {
        let read = read_frame::<_, Reply>(&mut reader);
        tokio::pin!(read);

        let next = loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                next = &mut read => break next,
                _ = tokio::time::sleep(idle_period), if idle_timeout.is_some() => {
                    let stalled = pending.lock().map(|p| p.len()).unwrap_or(0);
                    if stalled > 0 {
                        warn!(%peer, stalled, "no reply within idle timeout, failing in-flight requests");
                        fail_all(&pending, "Idle timeout waiting for server");
                    }
                }
            }
        };

        match next {
            Ok(Some(reply)) => dispatch(&pending, reply, &peer),
            Ok(None) => {
                debug!(%peer, "server closed the connection");
                shutdown.cancel();
                fail_all(&pending, "Connection closed by server");
                return;
            }
            Err(e) => {
                error!(%peer, "transport read failed: {}", e);
                shutdown.cancel();
                fail_all(&pending, &e.to_string());
                return;
            }
        }
    }
}

async fn write_loop(
    mut writer: WriteHalf<BoxedStream>,
    mut queue: mpsc::Receiver<Outgoing>,
    pending: PendingMap,
    shutdown: CancellationToken,
    peer: String,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = queue.recv() => next,
        };
        match next {
            Some(Outgoing::Frame { bytes, written }) => {
                let result = write_all(&mut writer, &bytes).await;
                if let Err(e) = &result {
                    error!(%peer, "transport write failed: {}", e);
                    shutdown.cancel();
                    fail_all(&pending, &format!("Write failed: {}", e));
                }
                let _ = written.send(result);
            }
            Some(Outgoing::Close(closed)) => {
                if let Err(e) = writer.shutdown().await {
                    debug!(%peer, "shutdown after close: {}", e);
                }
                let _ = closed.send(());
                return;
            }
            None => break,
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_all(writer: &mut WriteHalf<BoxedStream>, bytes: &[u8]) -> Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

fn dispatch(pending: &PendingMap, reply: Reply, peer: &str) {
    let sender = pending.lock().ok().and_then(|mut p| p.remove(&reply.request_id));
    match sender {
        Some(sender) => {
            let _ = sender.send(reply.outcome.map_err(StoreError::from));
        }
        None => warn!(%peer, request_id = reply.request_id, "reply for unknown request"),
    }
}

fn fail_all(pending: &PendingMap, reason: &str) {
    let drained: Vec<_> = match pending.lock() {
        Ok(mut p) => p.drain().collect(),
        Err(_) => return,
    };
    for (_, sender) in drained {
        let _ = sender.send(Err(StoreError::Transport(reason.to_string())));
    }
}

#[cfg(feature = "tls")]
async fn wrap_tls(tcp: TcpStream, host: &str) -> Result<BoxedStream> {
    use tokio_rustls::TlsConnector;
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(tokio_rustls::rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| StoreError::Transport(format!("TLS setup failed: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    let name = ServerName::try_from(host.to_string())
        .map_err(|e| StoreError::Transport(format!("Invalid TLS server name '{}': {}", host, e)))?;
    let stream = TlsConnector::from(Arc::new(config))
        .connect(name, tcp)
        .await
        .map_err(|e| StoreError::Transport(format!("TLS handshake with {} failed: {}", host, e)))?;
    Ok(Box::new(stream))
}

#[cfg(not(feature = "tls"))]
async fn wrap_tls(_tcp: TcpStream, host: &str) -> Result<BoxedStream> {
    Err(StoreError::Transport(format!(
        "Credentialed connection to {} requires the 'tls' feature",
        host
    )))
}
