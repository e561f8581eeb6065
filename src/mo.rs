//! # MO Broker
//!
//! The inbound mirror of the scheduler: gateway workers push delivery
//! receipts and mobile-originated messages into per-client queues, and
//! customer clients pull the items addressed to them. Producer pushes are
//! unacknowledged — the gateway side has already committed the traffic and
//! retries nothing.
//!
//! The control loop accepts only PULL and PUSH handshakes; a TEST request
//! here is logged and dropped without a reply.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::signal;
use tracing::{debug, error, info, warn};

use crate::config::MoConfig;
use crate::defaults;
use crate::net::{ConnectionId, Endpoint};
use crate::pool::{QueueItem, QueuePool};
use crate::proto::{Command, Deliver, Frame, Report, SessionKind, SessionRequest};
use crate::session::{self, Handshake, SessionParams};
use crate::stats::{self, RedisStatSink, StatSink};

/// Shared state threaded from the control loop into every worker.
#[derive(Clone)]
pub struct MoContext {
    pub config: Arc<MoConfig>,
    pub pool: Arc<QueuePool>,
    pub stats: Arc<dyn StatSink>,
}

impl MoContext {
    fn session_params(&self) -> SessionParams {
        SessionParams::new(
            &self.config.listen,
            self.config.session_base_port(),
            self.config.receive_timeout(),
        )
    }
}

/// Production entry point: wire up the stats cache and serve.
pub async fn run(config: MoConfig) -> Result<()> {
    let stats = RedisStatSink::connect(&config)
        .await
        .with_context(|| format!("can't connect to redis database {}", config.redis_host))?;

    let context = MoContext {
        config: Arc::new(config),
        pool: Arc::new(QueuePool::new()),
        stats: Arc::new(stats),
    };

    serve(context).await
}

/// Bind the control endpoint and dispatch handshakes until shutdown.
pub async fn serve(context: MoContext) -> Result<()> {
    let mut control = Endpoint::bind(&context.config.listen, context.config.port)
        .await
        .context("mo broker initialization failed")?;
    info!(
        "mo broker listening on {}:{}",
        context.config.listen, context.config.port
    );

    let sampler = tokio::spawn(stats::sample_loop(
        context.pool.clone(),
        context.stats.clone(),
    ));

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            received = control.recv() => match received {
                Some((connection, frame)) => {
                    handle_request(&context, &control, connection, frame).await;
                }
                None => break Err(anyhow::anyhow!("control endpoint closed unexpectedly")),
            },
            _ = &mut shutdown => {
                info!("shutdown requested");
                break Ok(());
            }
        }
    };

    sampler.abort();
    outcome
}

async fn handle_request(
    context: &MoContext,
    control: &Endpoint,
    connection: ConnectionId,
    frame: Frame,
) {
    if frame.command != Command::Request {
        warn!("invalid command request from client ({:?})", frame.command);
        return;
    }

    let request: SessionRequest = match frame.decode() {
        Ok(request) => request,
        Err(e) => {
            error!("can't parse session request packet: {e}");
            return;
        }
    };

    if request.id < 1 {
        warn!("invalid client identity id number");
        return;
    }

    let client_id = request.id;
    let (handshake, ready) = session::handshake_pair();

    match request.kind {
        SessionKind::Push => {
            tokio::spawn(push_session(context.clone(), request, handshake));
        }
        SessionKind::Pull => {
            tokio::spawn(session::consumer_session(
                context.session_params(),
                context.pool.clone(),
                request,
                handshake,
            ));
        }
        SessionKind::Test => {
            warn!("test sessions are not served here (client {client_id})");
            return;
        }
    }

    match session::await_session(ready, defaults::HANDSHAKE_DEADLINE).await {
        Some(response) => match Frame::encode(Command::Response, &response) {
            Ok(reply) => {
                if let Err(e) = control.send_to(connection, &reply).await {
                    warn!("handshake reply to client {client_id} failed: {e}");
                }
            }
            Err(e) => error!("can't serialize session response: {e}"),
        },
        None => debug!("session worker for client {client_id} missed the handshake deadline"),
    }
}

/// Producer (PUSH) session: receive reports and delivers from a gateway
/// worker and append them to the session's client queue. No acks.
async fn push_session(context: MoContext, client: SessionRequest, handshake: Handshake) {
    info!("new client from {} connected", client.addr);

    let queue = context.pool.find_or_create(client.id);

    let params = context.session_params();
    let mut endpoint = match session::open_endpoint(&params, handshake, client.id).await {
        Some(endpoint) => endpoint,
        None => return,
    };

    loop {
        let (_, frame) = match endpoint.recv_timeout(params.timeout).await {
            Some(received) => received,
            None => {
                if endpoint.current_connections() == 0 {
                    break;
                }
                continue;
            }
        };

        match frame.command {
            Command::Report => match frame.decode::<Report>() {
                Ok(report) => queue.push(QueueItem::Report(report)),
                Err(e) => debug!("undecodable report from {}: {e}", client.addr),
            },
            Command::Deliver => match frame.decode::<Deliver>() {
                Ok(deliver) => queue.push(QueueItem::Deliver(deliver)),
                Err(e) => debug!("undecodable deliver from {}: {e}", client.addr),
            },
            Command::Bye => break,
            other => debug!("invalid request data packet {other:?} from {}", client.addr),
        }
    }

    info!("connection closed from {}", client.addr);
}
