//! # MT Scheduler Broker
//!
//! Accepts short-message submissions from customer clients, routes each one
//! to a carrier gateway queue according to the submitter's configured
//! channel set, and lets gateway workers pull queued submissions for
//! transmission.
//!
//! The control loop owns the well-known REQUEST/RESPONSE endpoint and
//! spawns one worker task per accepted session: PUSH producers (routed
//! submissions with per-submission acks), TEST producers (diagnostic
//! injection straight into a named gateway queue) and PULL consumers (the
//! shared worker in [`crate::session`]).

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::signal;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::db::{ChannelSource, PgChannelSource};
use crate::defaults;
use crate::net::{ConnectionId, Endpoint};
use crate::pool::{QueueItem, QueuePool};
use crate::proto::{Command, Frame, SessionKind, SessionRequest, Submit, TestSubmit};
use crate::routing::{select_route, RouteDecision};
use crate::session::{self, Handshake, SessionParams};
use crate::stats::{self, LogStatSink, StatSink};

/// Shared state threaded from the control loop into every worker.
#[derive(Clone)]
pub struct SchedulerContext {
    pub config: Arc<SchedulerConfig>,
    pub pool: Arc<QueuePool>,
    pub channels: Arc<dyn ChannelSource>,
    pub stats: Arc<dyn StatSink>,
}

impl SchedulerContext {
    fn session_params(&self) -> SessionParams {
        SessionParams::new(
            &self.config.listen,
            self.config.session_base_port(),
            self.config.receive_timeout(),
        )
    }
}

/// Production entry point: wire up the routing database and serve.
pub async fn run(config: SchedulerConfig) -> Result<()> {
    let channels = PgChannelSource::connect(&config)
        .await
        .with_context(|| format!("can't connect to database {}", config.db_host))?;

    let context = SchedulerContext {
        config: Arc::new(config),
        pool: Arc::new(QueuePool::new()),
        channels: Arc::new(channels),
        stats: Arc::new(LogStatSink),
    };

    serve(context).await
}

/// Bind the control endpoint and dispatch handshakes until shutdown.
pub async fn serve(context: SchedulerContext) -> Result<()> {
    let mut control = Endpoint::bind(&context.config.listen, context.config.port)
        .await
        .context("scheduler initialization failed")?;
    info!(
        "scheduler listening on {}:{}",
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

/// Validate one control frame and, for a well-formed handshake, spawn the
/// session worker and relay its response. Malformed requests are logged and
/// dropped without a reply; the peer's next request starts clean.
async fn handle_request(
    context: &SchedulerContext,
    control: &Endpoint,
    connection: ConnectionId,
    frame: Frame,
) {
    if frame.command != Command::Request {
        warn!("invalid request from client (command {:?})", frame.command);
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
        SessionKind::Test => {
            tokio::spawn(test_session(context.clone(), request, handshake));
        }
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

/// Producer (PUSH) session: route each submission through the peer's
/// channel list and ack it with `OK`/`NOROUTE`/`REJECT`/`BUSY`.
async fn push_session(context: SchedulerContext, client: SessionRequest, handshake: Handshake) {
    info!("new client from {} connected", client.addr);

    // The channel list is loaded once; sessions see routing changes on
    // their next handshake, not mid-stream.
    let channels = match context.channels.channels_for(client.id).await {
        Ok(channels) => channels,
        Err(e) => {
            error!("can't load routing channels for client {}: {e}", client.id);
            return;
        }
    };

    if channels.is_empty() {
        debug!("no routing channel is available for client {}", client.id);
    } else {
        debug!(
            "fetched {} routing channels for client {}",
            channels.len(),
            client.id
        );
    }

    let params = context.session_params();
    let mut endpoint = match session::open_endpoint(&params, handshake, client.id).await {
        Some(endpoint) => endpoint,
        None => return,
    };

    loop {
        let (connection, frame) = match endpoint.recv_timeout(params.timeout).await {
            Some(received) => received,
            None => {
                if endpoint.current_connections() == 0 {
                    break;
                }
                continue;
            }
        };

        match frame.command {
            Command::Submit => {
                let submit: Submit = match frame.decode() {
                    Ok(submit) => submit,
                    Err(e) => {
                        debug!("undecodable submit from {}: {e}", client.addr);
                        continue;
                    }
                };

                let status = match select_route(&channels, &submit.phone, &context.pool) {
                    RouteDecision::Accept(queue) => {
                        queue.push(QueueItem::Submit(submit));
                        Command::Ok
                    }
                    RouteDecision::NoRoute => Command::NoRoute,
                    RouteDecision::Reject => Command::Reject,
                    RouteDecision::Busy => Command::Busy,
                };

                // Acks are best effort; a lost ack is the peer's retry
                // problem, not a reason to tear down the session.
                if let Err(e) = endpoint.send_to(connection, &Frame::control(status)).await {
                    debug!("submission ack to {} failed: {e}", client.addr);
                }
            }
            Command::Bye => break,
            other => debug!("invalid request data packet {other:?} from {}", client.addr),
        }
    }

    info!("connection closed from {}", client.addr);
}

/// Diagnostic (TEST) session: inject messages straight into a named gateway
/// queue, bypassing routing and the backpressure threshold. The queue must
/// already exist — diagnostics never create queues.
async fn test_session(context: SchedulerContext, client: SessionRequest, handshake: Handshake) {
    info!("new test client from {} connected", client.addr);

    let params = context.session_params();
    let mut endpoint = match session::open_endpoint(&params, handshake, client.id).await {
        Some(endpoint) => endpoint,
        None => return,
    };

    loop {
        let (connection, frame) = match endpoint.recv_timeout(params.timeout).await {
            Some(received) => received,
            None => {
                if endpoint.current_connections() == 0 {
                    break;
                }
                continue;
            }
        };

        match frame.command {
            Command::Message => {
                let message: TestSubmit = match frame.decode() {
                    Ok(message) => message,
                    Err(e) => {
                        debug!("undecodable test message from {}: {e}", client.addr);
                        continue;
                    }
                };

                let status = match context.pool.find(message.channel) {
                    Some(queue) => {
                        queue.push(QueueItem::Submit(message.into_submit()));
                        Command::Ok
                    }
                    None => Command::NoRoute,
                };

                if let Err(e) = endpoint.send_to(connection, &Frame::control(status)).await {
                    debug!("test ack to {} failed: {e}", client.addr);
                }
            }
            Command::Bye => break,
            other => debug!("invalid request data packet {other:?} from {}", client.addr),
        }
    }

    info!("connection closed from {}", client.addr);
}
