//! Integration tests for TcpControl against a loopback mock robot.

use std::time::Duration;

use robot_control::codec::{decode_command, encode_event};
use robot_control::{Command, ControlAddress, ControlChannel, ControlError, Event, TcpControl};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn listen() -> (TcpListener, ControlAddress) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let port = listener.local_addr().unwrap().port();
    (listener, ControlAddress::new("127.0.0.1", port))
}

async fn read_command(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Command {
    loop {
        if let Some(command) = decode_command(buf).expect("robot got garbled command") {
            return command;
        }
        let n = stream.read_buf(buf).await.expect("robot read failed");
        assert!(n > 0, "client closed before sending a full command");
    }
}

/// Test: PREPARE goes out on the wire and PREPARED comes back
#[tokio::test]
async fn test_prepare_exchange_over_tcp() {
    let (listener, address) = listen().await;

    let robot = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let command = read_command(&mut stream, &mut buf).await;
        stream
            .write_all(&encode_event(&Event::Prepared { script: "A;B".into() }).unwrap())
            .await
            .unwrap();
        command
    });

    let mut control = TcpControl::new(address);
    control.connect().await.expect("connect failed");
    control
        .write_command(&Command::prepare(["root/a", "root/b"]))
        .await
        .expect("write failed");

    let event = control
        .read_event(Duration::from_secs(5))
        .await
        .expect("read failed");
    assert_eq!(event, Event::Prepared { script: "A;B".into() });

    let received = robot.await.unwrap();
    assert_eq!(received, Command::prepare(["root/a", "root/b"]));

    control.disconnect().await;
    assert!(!control.is_connected());
}

/// Test: an event split across a read timeout is not lost
#[tokio::test]
async fn test_partial_event_survives_timeout() {
    let (listener, address) = listen().await;
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let robot = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let frame = encode_event(&Event::Finished {
            script: "connect\nread \"ok\"\n".into(),
        })
        .unwrap();
        let (head, tail) = frame.split_at(frame.len() / 2);
        stream.write_all(head).await.unwrap();
        release_rx.await.unwrap();
        stream.write_all(tail).await.unwrap();
        // Keep the socket open until the client is done.
        let mut sink = Vec::new();
        let _ = stream.read_to_end(&mut sink).await;
    });

    let mut control = TcpControl::new(address);
    control.connect().await.unwrap();

    let err = control
        .read_event(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {err}");

    release_tx.send(()).unwrap();
    let event = control.read_event(Duration::from_secs(5)).await.unwrap();
    assert_eq!(
        event,
        Event::Finished {
            script: "connect\nread \"ok\"\n".into()
        }
    );

    control.disconnect().await;
    robot.await.unwrap();
}

/// Test: peer close surfaces as a retryable Closed error, not a timeout
#[tokio::test]
async fn test_peer_close_is_io_class_error() {
    let (listener, address) = listen().await;

    let robot = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let mut control = TcpControl::new(address);
    control.connect().await.unwrap();
    robot.await.unwrap();

    let err = control
        .read_event(Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(
        matches!(err, ControlError::Closed | ControlError::Io(_)),
        "unexpected error: {err}"
    );
    assert!(err.is_retryable());
    assert!(!err.is_timeout());
}

/// Test: garbled data is a protocol error
#[tokio::test]
async fn test_garbled_event_is_protocol_error() {
    let (listener, address) = listen().await;

    let robot = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(b"HELLO\n\n").await.unwrap();
        let mut sink = Vec::new();
        let _ = stream.read_to_end(&mut sink).await;
    });

    let mut control = TcpControl::new(address);
    control.connect().await.unwrap();
    let err = control
        .read_event(Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Protocol(_)));
    assert!(!err.is_retryable());

    control.disconnect().await;
    robot.await.unwrap();
}

/// Test: connecting to a port nobody listens on is a connect error
#[tokio::test]
async fn test_unreachable_robot_is_connect_error() {
    let (listener, address) = listen().await;
    drop(listener);

    let mut control = TcpControl::new(address.clone());
    let err = control.connect().await.unwrap_err();
    match err {
        ControlError::Connect { address: reported, .. } => {
            assert_eq!(reported, address.to_string())
        }
        other => panic!("expected connect error, got {other}"),
    }

    // Disconnect after a failed connect must not panic.
    control.disconnect().await;
}
