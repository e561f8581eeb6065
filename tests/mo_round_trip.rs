//! End-to-end MO delivery: a gateway worker pushes receipts and MO messages
//! into the broker, a customer client pulls them back out, and idle sessions
//! tear themselves down.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use smsgate::config::MoConfig;
use smsgate::mo::{self, MoContext};
use smsgate::net::write_frame;
use smsgate::pool::QueuePool;
use smsgate::proto::{Command, Deliver, Frame, Report, SessionKind};
use smsgate::stats::LogStatSink;

fn test_config(port: u16) -> MoConfig {
    MoConfig {
        id: 2,
        debug: false,
        listen: "127.0.0.1".into(),
        port,
        timeout: 200,
        log_file: "/tmp/smsgate-mo-test.log".into(),
        ac: None,
        redis_host: "127.0.0.1".into(),
        redis_port: 6379,
        redis_password: String::new(),
        redis_db: 0,
    }
}

fn start_mo(port: u16) -> tokio::task::JoinHandle<anyhow::Result<()>> {
    let context = MoContext {
        config: Arc::new(test_config(port)),
        pool: Arc::new(QueuePool::new()),
        stats: Arc::new(LogStatSink),
    };
    tokio::spawn(mo::serve(context))
}

fn report() -> Report {
    Report {
        id: 42,
        account: 5,
        company: 3,
        spcode: "10086".into(),
        phone: "13900000000".into(),
        status: 0,
        submittime: "2508011200".into(),
        donetime: "2508011202".into(),
    }
}

fn deliver() -> Deliver {
    Deliver {
        id: 43,
        account: 5,
        company: 3,
        phone: "13900000000".into(),
        spcode: "10086".into(),
        serviceid: "sms".into(),
        msgfmt: 0,
        length: 2,
        content: b"ok".to_vec(),
    }
}

/// Pushes are unacknowledged, so the consumer polls until the item lands.
async fn pull_next(consumer: &mut tokio::net::TcpStream) -> Frame {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        write_frame(consumer, &Frame::control(Command::Req))
            .await
            .unwrap();
        let reply = common::recv_reply(consumer, Duration::from_secs(2))
            .await
            .expect("one reply per REQ");
        if reply.command != Command::Empty {
            return reply;
        }
        if Instant::now() >= deadline {
            panic!("queue stayed empty");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn reports_and_delivers_round_trip() {
    const PORT: u16 = 19180;

    let broker = start_mo(PORT);

    let mut gateway_control = common::connect_retry("127.0.0.1", PORT).await;
    let (mut gateway, _) =
        common::open_session(&mut gateway_control, 5, SessionKind::Push).await;

    let mut client_control = common::connect_retry("127.0.0.1", PORT).await;
    let (mut client, _) = common::open_session(&mut client_control, 5, SessionKind::Pull).await;

    // The receipt goes in unacknowledged and comes back out whole.
    let sent_report = report();
    write_frame(
        &mut gateway,
        &Frame::encode(Command::Report, &sent_report).unwrap(),
    )
    .await
    .unwrap();

    let pulled = pull_next(&mut client).await;
    assert_eq!(pulled.command, Command::Report);
    assert_eq!(pulled.decode::<Report>().unwrap(), sent_report);

    // Same path for an MO message; the tag tells the consumer which record
    // it is looking at.
    let sent_deliver = deliver();
    write_frame(
        &mut gateway,
        &Frame::encode(Command::Deliver, &sent_deliver).unwrap(),
    )
    .await
    .unwrap();

    let pulled = pull_next(&mut client).await;
    assert_eq!(pulled.command, Command::Deliver);
    assert_eq!(pulled.decode::<Deliver>().unwrap(), sent_deliver);

    // Drained again.
    write_frame(&mut client, &Frame::control(Command::Req))
        .await
        .unwrap();
    let reply = common::recv_reply(&mut client, Duration::from_secs(2))
        .await
        .expect("empty reply");
    assert_eq!(reply.command, Command::Empty);

    broker.abort();
}

#[tokio::test]
async fn idle_sessions_exit_and_release_their_ports() {
    const PORT: u16 = 19200;

    let broker = start_mo(PORT);

    let mut control = common::connect_retry("127.0.0.1", PORT).await;
    let (producer, producer_port) =
        common::open_session(&mut control, 11, SessionKind::Push).await;

    // Peer goes away without BYE: after a quiet timeout window with zero
    // connections the worker exits and its listener disappears. Give it two
    // full windows before probing, since every probe is itself a connection.
    drop(producer);
    tokio::time::sleep(Duration::from_millis(600)).await;
    common::wait_until_refused("127.0.0.1", producer_port, Duration::from_secs(3)).await;

    // A polite BYE tears the session down as well.
    let (mut consumer, consumer_port) =
        common::open_session(&mut control, 11, SessionKind::Pull).await;
    write_frame(&mut consumer, &Frame::control(Command::Bye))
        .await
        .unwrap();
    common::wait_until_refused("127.0.0.1", consumer_port, Duration::from_secs(3)).await;

    broker.abort();
}
