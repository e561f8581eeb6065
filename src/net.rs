//! # Framed TCP Endpoints
//!
//! Transport plumbing shared by both brokers: a length-prefixed frame codec
//! over TCP, and [`Endpoint`] — a listening socket whose accepted
//! connections all feed one receive channel, with per-connection write
//! halves kept aside for replies.
//!
//! An endpoint tracks its live-connection count; session workers use it as
//! the liveness signal (a receive timeout with zero connections means the
//! peer is gone). [`Endpoint::bind_scan`] is the dynamic port allocator:
//! starting from a base port it walks upward until a bind sticks, so two
//! workers racing for the same port cost one failed bind and a retry.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::defaults;
use crate::proto::{Frame, FrameError, MAX_FRAME};

/// Identifies one accepted connection within an endpoint.
pub type ConnectionId = u64;

/// Read one `[u32 LE length][command][payload]` frame.
///
/// `Short` and `UnknownCommand` leave the stream aligned on the next frame
/// and are recoverable; `Oversized` and I/O errors are not (a corrupt length
/// prefix desynchronizes the stream, so the connection must be dropped).
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let frame_len = u32::from_le_bytes(len_bytes) as usize;

    if frame_len > MAX_FRAME {
        return Err(FrameError::Oversized(frame_len));
    }

    let mut frame_bytes = vec![0u8; frame_len];
    reader.read_exact(&mut frame_bytes).await?;

    Frame::from_bytes(&frame_bytes)
}

/// Write one frame with its length prefix.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame_bytes = frame.to_bytes();
    let mut wire = Vec::with_capacity(4 + frame_bytes.len());
    wire.extend_from_slice(&(frame_bytes.len() as u32).to_le_bytes());
    wire.extend_from_slice(&frame_bytes);

    writer.write_all(&wire).await?;
    writer.flush().await
}

/// Bind a TCP listener with `SO_REUSEADDR`, nonblocking, ready for tokio.
async fn bind_listener(host: &str, port: u16) -> io::Result<TcpListener> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;

    TcpListener::from_std(socket.into())
}

/// A listening endpoint multiplexing every accepted connection into one
/// receive channel.
pub struct Endpoint {
    port: u16,
    frames: mpsc::Receiver<(ConnectionId, Frame)>,
    connections: Arc<Mutex<HashMap<ConnectionId, OwnedWriteHalf>>>,
    live: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl Endpoint {
    /// Bind at exactly `host:port` (the control endpoint's well-known port).
    pub async fn bind(host: &str, port: u16) -> io::Result<Self> {
        let listener = bind_listener(host, port).await?;
        Ok(Self::start(listener, port))
    }

    /// Bind the first free port at or above `start_port`.
    ///
    /// Concurrent workers may race for the same port; the loser observes
    /// `EADDRINUSE` and advances. Exhausting the port space is an error.
    pub async fn bind_scan(host: &str, start_port: u16) -> io::Result<Self> {
        let mut port = start_port;
        loop {
            match bind_listener(host, port).await {
                Ok(listener) => return Ok(Self::start(listener, port)),
                Err(e)
                    if e.kind() == io::ErrorKind::AddrInUse
                        || e.kind() == io::ErrorKind::PermissionDenied =>
                {
                    port = port.checked_add(1).ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::AddrNotAvailable,
                            "no ports available above the session base port",
                        )
                    })?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn start(listener: TcpListener, port: u16) -> Self {
        let (frame_tx, frame_rx) = mpsc::channel(defaults::FRAME_CHANNEL_DEPTH);
        let connections: Arc<Mutex<HashMap<ConnectionId, OwnedWriteHalf>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let live = Arc::new(AtomicUsize::new(0));

        let accept_connections = connections.clone();
        let accept_live = live.clone();
        let accept_task = tokio::spawn(async move {
            let mut next_id: ConnectionId = 1;
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept failed on port {port}: {e}");
                        break;
                    }
                };

                let connection_id = next_id;
                next_id += 1;
                let _ = stream.set_nodelay(true);
                debug!("connection {connection_id} accepted from {peer} on port {port}");

                let (mut read_half, write_half) = stream.into_split();
                accept_connections
                    .lock()
                    .await
                    .insert(connection_id, write_half);
                accept_live.fetch_add(1, Ordering::SeqCst);

                let reader_tx = frame_tx.clone();
                let reader_connections = accept_connections.clone();
                let reader_live = accept_live.clone();
                tokio::spawn(async move {
                    loop {
                        match read_frame(&mut read_half).await {
                            Ok(frame) => {
                                if reader_tx.send((connection_id, frame)).await.is_err() {
                                    break;
                                }
                            }
                            Err(FrameError::Short) => {
                                warn!("short frame from connection {connection_id}, discarded");
                            }
                            Err(FrameError::UnknownCommand(byte)) => {
                                warn!(
                                    "unknown command byte {byte} from connection \
                                     {connection_id}, discarded"
                                );
                            }
                            Err(e) => {
                                debug!("connection {connection_id} closed: {e}");
                                break;
                            }
                        }
                    }

                    reader_connections.lock().await.remove(&connection_id);
                    reader_live.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            port,
            frames: frame_rx,
            connections,
            live,
            accept_task,
        }
    }

    /// The port this endpoint is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of currently accepted peer connections.
    pub fn current_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Wait for the next frame from any connection.
    pub async fn recv(&mut self) -> Option<(ConnectionId, Frame)> {
        self.frames.recv().await
    }

    /// Wait for the next frame, giving up after `wait`. `None` means the
    /// timeout elapsed with nothing received.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Option<(ConnectionId, Frame)> {
        tokio::time::timeout(wait, self.frames.recv())
            .await
            .ok()
            .flatten()
    }

    /// Send a frame back on a specific connection.
    pub async fn send_to(&self, connection_id: ConnectionId, frame: &Frame) -> io::Result<()> {
        let mut connections = self.connections.lock().await;
        let writer = connections.get_mut(&connection_id).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                format!("connection {connection_id} is gone"),
            )
        })?;
        write_frame(writer, frame).await
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Open a client connection to a peer endpoint.
pub async fn connect(host: &str, port: u16) -> io::Result<TcpStream> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
