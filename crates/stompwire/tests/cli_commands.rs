#![cfg(feature = "cli")]

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use stompwire_frame::{Frame, FrameError, FrameKind, FrameReader};

const IO_TIMEOUT: Duration = Duration::from_secs(5);
const RUN_TIMEOUT: Duration = Duration::from_secs(15);

/// One scripted broker connection over a real socket.
struct BrokerConn {
    reader: FrameReader<TcpStream>,
    writer: TcpStream,
}

impl BrokerConn {
    fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().expect("client should connect");
        stream
            .set_read_timeout(Some(IO_TIMEOUT))
            .expect("read timeout should be settable");
        let writer = stream.try_clone().expect("stream should clone");
        Self {
            reader: FrameReader::new(stream),
            writer,
        }
    }

    fn expect(&mut self, kind: FrameKind) -> Frame {
        let frame = self.reader.read_frame().expect("frame from client");
        assert_eq!(frame.kind, kind, "unexpected frame {frame:?}");
        frame
    }

    fn send(&mut self, frame: &Frame) {
        self.writer
            .write_all(&frame.encode())
            .expect("write to client");
    }

    fn handshake(&mut self) -> Frame {
        let connect = self.expect(FrameKind::Connect);
        self.send(
            &Frame::new(FrameKind::Connected)
                .with_header("version", "1.2")
                .with_header("heart-beat", "0,0"),
        );
        connect
    }

    /// Wait for DISCONNECT or EOF.
    fn drain(&mut self) -> bool {
        loop {
            match self.reader.read_frame() {
                Ok(frame) if frame.kind == FrameKind::Disconnect => return true,
                Ok(_) => {}
                Err(FrameError::Incomplete) => return false,
                Err(err) => panic!("broker read failed: {err}"),
            }
        }
    }
}

fn spawn_broker<T, F>(script: F) -> (String, JoinHandle<T>)
where
    T: Send + 'static,
    F: FnOnce(BrokerConn) -> T + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
    let endpoint = format!(
        "tcp://{}",
        listener.local_addr().expect("listener should have an address")
    );
    let handle = thread::spawn(move || script(BrokerConn::accept(&listener)));
    (endpoint, handle)
}

fn stompwire() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_stompwire"));
    cmd.env_remove("STOMPWIRE_LOG_LEVEL")
        .arg("--log-level")
        .arg("error");
    cmd
}

fn finish(mut child: Child) -> Output {
    let deadline = Instant::now() + RUN_TIMEOUT;
    loop {
        if child.try_wait().expect("child status").is_some() {
            return child.wait_with_output().expect("child output");
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("stompwire did not exit within {RUN_TIMEOUT:?}");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn run(cmd: &mut Command) -> Output {
    let child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("stompwire should start");
    finish(child)
}

#[test]
fn publish_waits_for_receipt() {
    let (endpoint, broker) = spawn_broker(|mut conn| {
        let connect = conn.handshake();
        let send = conn.expect(FrameKind::Send);
        let receipt = send.header("receipt").expect("receipt header").to_string();
        conn.send(&Frame::new(FrameKind::Receipt).with_header("receipt-id", receipt));
        conn.drain();
        (connect, send)
    });

    let output = run(stompwire()
        .args(["--format", "json", "publish", &endpoint])
        .args(["--destination", "/app/chat"])
        .args(["--json", r#"{"user":"alice","message":"hi"}"#])
        .args(["--header", "priority=9", "--heartbeat", "0,0"]));

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let printed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("receipt output should be JSON");
    assert_eq!(printed["event"], "receipt");
    assert_eq!(printed["destination"], "/app/chat");

    let (connect, send) = broker.join().expect("broker thread");
    assert_eq!(connect.header("accept-version"), Some("1.2,1.1,1.0"));
    assert_eq!(connect.header("host"), Some("127.0.0.1"));
    assert_eq!(send.destination(), Some("/app/chat"));
    assert_eq!(send.header("content-type"), Some("application/json"));
    assert_eq!(send.header("priority"), Some("9"));
    assert_eq!(send.body.as_ref(), br#"{"user":"alice","message":"hi"}"#);
}

#[test]
fn subscribe_prints_messages_until_count() {
    let (endpoint, broker) = spawn_broker(|mut conn| {
        conn.handshake();
        let subscribe = conn.expect(FrameKind::Subscribe);
        let id = subscribe.header("id").expect("subscription id").to_string();
        for (n, body) in ["first", "second"].into_iter().enumerate() {
            conn.send(
                &Frame::new(FrameKind::Message)
                    .with_header("destination", "/topic/messages")
                    .with_header("subscription", id.clone())
                    .with_header("message-id", n.to_string())
                    .with_body(body),
            );
        }
        let disconnected = conn.drain();
        (subscribe, disconnected)
    });

    let output = run(stompwire()
        .args(["--format", "json", "subscribe", &endpoint])
        .args(["--destination", "/topic/messages", "--count", "2"])
        .args(["--heartbeat", "0,0"]));

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).expect("utf-8 output");
    let bodies: Vec<String> = stdout
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).expect("JSON line");
            assert_eq!(value["event"], "message");
            value["body"].as_str().unwrap_or_default().to_string()
        })
        .collect();
    assert_eq!(bodies, ["first", "second"]);

    let (subscribe, disconnected) = broker.join().expect("broker thread");
    assert_eq!(subscribe.destination(), Some("/topic/messages"));
    assert!(disconnected, "client should send DISCONNECT before exiting");
}

#[test]
fn chat_publishes_stdin_lines_as_json() {
    let (seen_tx, seen_rx) = mpsc::channel();
    let (endpoint, broker) = spawn_broker(move |mut conn| {
        conn.handshake();
        let subscribe = conn.expect(FrameKind::Subscribe);
        let send = conn.expect(FrameKind::Send);
        let _ = seen_tx.send(());
        conn.drain();
        (subscribe, send)
    });

    let mut child = stompwire()
        .args(["chat", &endpoint, "--user", "alice", "--heartbeat", "0,0"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("stompwire should start");
    {
        let stdin = child.stdin.as_mut().expect("piped stdin");
        stdin.write_all(b"hello there\n").expect("write stdin");
    }
    seen_rx
        .recv_timeout(IO_TIMEOUT)
        .expect("broker should receive the chat line");
    drop(child.stdin.take());
    let output = finish(child);
    assert!(output.status.success());

    let (subscribe, send) = broker.join().expect("broker thread");
    assert_eq!(subscribe.destination(), Some("/topic/messages"));
    assert_eq!(send.destination(), Some("/app/chat"));
    let body: serde_json::Value = serde_json::from_slice(&send.body).expect("JSON body");
    assert_eq!(body, serde_json::json!({"user": "alice", "message": "hello there"}));
}

#[test]
fn refused_connection_exits_with_transport_code() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        listener.local_addr().expect("address").port()
    };

    let output = run(stompwire()
        .args(["publish", &format!("tcp://127.0.0.1:{port}")])
        .args(["--destination", "/q", "--data", "x"]));

    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));
}

#[test]
fn invalid_json_payload_is_a_usage_error() {
    let output = run(stompwire()
        .args(["publish", "tcp://127.0.0.1:9"])
        .args(["--destination", "/q", "--json", "{nope"]));

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn unsupported_scheme_is_a_usage_error() {
    let output = run(stompwire()
        .args(["publish", "gopher://example.com"])
        .args(["--destination", "/q", "--data", "x"]));

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_reports_crate_version() {
    let output = run(stompwire().arg("version"));
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("stompwire {}", env!("CARGO_PKG_VERSION"))
    );
}
