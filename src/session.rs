//! # Session Lifecycle
//!
//! A session starts as a handshake on a broker's control endpoint and lives
//! on a dedicated data endpoint afterwards. The control loop spawns a worker
//! task, then waits — bounded by [`crate::defaults::HANDSHAKE_DEADLINE`] —
//! for the worker to bind its port and hand back the `{id, host}` response
//! over a one-shot channel. Each handshake owns its own reply slot, so a
//! slow worker can only ever stall its own reply: the control loop times
//! out, suppresses the reply, and the worker (if it ever comes up) idles
//! out through the zero-connections path on its own.
//!
//! The consumer (PULL) worker is identical in both brokers and lives here;
//! producer workers differ per broker and live with their broker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::net::Endpoint;
use crate::pool::QueuePool;
use crate::proto::{Command, Frame, SessionRequest, SessionResponse};

/// The worker-side half of one handshake.
pub struct Handshake {
    reply: oneshot::Sender<SessionResponse>,
}

impl Handshake {
    /// Report the bound session endpoint back to the control loop. Called
    /// exactly once, after the bind succeeded; dropping the handshake
    /// instead tells the control loop the worker failed to come up.
    pub fn complete(self, id: u32, host: String) {
        // The control loop may already have timed out and moved on.
        let _ = self.reply.send(SessionResponse { id, host });
    }
}

/// A fresh reply slot for one handshake.
pub fn handshake_pair() -> (Handshake, oneshot::Receiver<SessionResponse>) {
    let (reply, ready) = oneshot::channel();
    (Handshake { reply }, ready)
}

/// Control-loop side: wait for the worker's bind notification. `None` means
/// the deadline passed or the worker died; either way no reply is sent and
/// the control loop is free for the next request.
pub async fn await_session(
    ready: oneshot::Receiver<SessionResponse>,
    deadline: Duration,
) -> Option<SessionResponse> {
    match tokio::time::timeout(deadline, ready).await {
        Ok(Ok(response)) => Some(response),
        _ => None,
    }
}

/// The `tcp://ip:port` URL peers are told to connect to.
pub fn session_host(listen: &str, port: u16) -> String {
    format!("tcp://{listen}:{port}")
}

/// Everything a session worker needs to know about its broker's listener.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub listen: String,
    pub base_port: u16,
    pub timeout: Duration,
}

impl SessionParams {
    pub fn new(listen: &str, base_port: u16, timeout: Duration) -> Self {
        Self {
            listen: listen.to_string(),
            base_port,
            timeout,
        }
    }
}

/// Bind a session endpoint and complete the handshake, or report failure by
/// dropping it.
pub async fn open_endpoint(params: &SessionParams, handshake: Handshake, id: u32) -> Option<Endpoint> {
    match Endpoint::bind_scan(&params.listen, params.base_port).await {
        Ok(endpoint) => {
            handshake.complete(id, session_host(&params.listen, endpoint.port()));
            Some(endpoint)
        }
        Err(e) => {
            error!("no ports available for a session endpoint: {e}");
            None
        }
    }
}

/// Consumer (PULL) session worker, shared by both brokers.
///
/// Serves pop requests against the queue keyed by the peer's id, creating
/// the queue if this consumer is its first toucher. Exactly one reply goes
/// out per `REQ`: the queued item under its own tag, or `EMPTY`.
pub async fn consumer_session(
    params: SessionParams,
    pool: Arc<QueuePool>,
    client: SessionRequest,
    handshake: Handshake,
) {
    info!("new client from {} connected", client.addr);

    let queue = pool.find_or_create(client.id);

    let mut endpoint = match open_endpoint(&params, handshake, client.id).await {
        Some(endpoint) => endpoint,
        None => return,
    };

    loop {
        let (connection, frame) = match endpoint.recv_timeout(params.timeout).await {
            Some(received) => received,
            None => {
                // Quiet interval: the peer is gone once nothing is connected.
                if endpoint.current_connections() == 0 {
                    break;
                }
                continue;
            }
        };

        match frame.command {
            Command::Req => {
                let reply = match queue.pop() {
                    None => Frame::control(Command::Empty),
                    Some(item) => match item.into_frame() {
                        Ok(frame) => frame,
                        Err(e) => {
                            error!("can't serialize queued item: {e}");
                            continue;
                        }
                    },
                };
                if let Err(e) = endpoint.send_to(connection, &reply).await {
                    debug!("reply to connection {connection} failed: {e}");
                }
            }
            Command::Bye => break,
            other => debug!("invalid request data packet {other:?} from {}", client.addr),
        }
    }

    info!("connection closed from {}", client.addr);
}
