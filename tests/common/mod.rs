//! Client-side helpers shared by the end-to-end tests: connect with retry,
//! run a handshake against a broker control endpoint, and read replies with
//! a bound.
#![allow(dead_code)]

use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use smsgate::net::{read_frame, write_frame};
use smsgate::proto::{Command, Frame, SessionKind, SessionRequest, SessionResponse};

/// Connect to a freshly spawned listener, retrying until it is up.
pub async fn connect_retry(host: &str, port: u16) -> TcpStream {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        match TcpStream::connect((host, port)).await {
            Ok(stream) => return stream,
            Err(e) => {
                if Instant::now() >= deadline {
                    panic!("couldn't connect to {host}:{port}: {e}");
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
}

/// Read one frame, or `None` if nothing arrives within `wait`.
pub async fn recv_reply(stream: &mut TcpStream, wait: Duration) -> Option<Frame> {
    match tokio::time::timeout(wait, read_frame(stream)).await {
        Ok(Ok(frame)) => Some(frame),
        _ => None,
    }
}

/// Split a `tcp://host:port` session URL.
pub fn parse_session_url(url: &str) -> (String, u16) {
    let rest = url.strip_prefix("tcp://").expect("session host is a tcp url");
    let (host, port) = rest.rsplit_once(':').expect("session host carries a port");
    (host.to_string(), port.parse().expect("numeric port"))
}

/// Handshake on the control connection and dial the session endpoint the
/// broker came back with. Returns the session stream and its port.
pub async fn open_session(
    control: &mut TcpStream,
    id: u32,
    kind: SessionKind,
) -> (TcpStream, u16) {
    let request = SessionRequest {
        id,
        kind,
        addr: "127.0.0.1".into(),
    };
    write_frame(
        control,
        &Frame::encode(Command::Request, &request).unwrap(),
    )
    .await
    .unwrap();

    let reply = recv_reply(control, Duration::from_secs(4))
        .await
        .expect("handshake reply");
    assert_eq!(reply.command, Command::Response);

    let response: SessionResponse = reply.decode().unwrap();
    assert_eq!(response.id, id);

    let (host, port) = parse_session_url(&response.host);
    (connect_retry(&host, port).await, port)
}

/// Poll until connecting to `port` is refused, proving the listener is gone.
pub async fn wait_until_refused(host: &str, port: u16, wait: Duration) {
    let deadline = Instant::now() + wait;
    loop {
        match TcpStream::connect((host, port)).await {
            Err(_) => return,
            Ok(_) if Instant::now() >= deadline => {
                panic!("listener on {host}:{port} still accepting after {wait:?}");
            }
            Ok(_) => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
}
