//! In-process chat against a toy broker on the memory transport.
//!
//! The broker answers CONNECT, remembers SUBSCRIBE ids and relays every SEND
//! to `/app/chat` as a MESSAGE on `/topic/messages`.
//!
//! ```bash
//! cargo run -p stompwire --example memory-chat
//! ```

use std::time::Duration;

use stompwire::frame::{Frame, FrameBuffer, FrameKind};
use stompwire::session::{ReconnectPolicy, Session, SessionEvent};
use stompwire::transport::{MemoryConnection, MemoryTransport};

async fn run_broker(mut conn: MemoryConnection) {
    let mut frames = FrameBuffer::default();
    let mut topic_subscription: Option<String> = None;
    let mut next_message = 0u64;

    while let Some(chunk) = conn.recv().await {
        frames.feed(&chunk);
        loop {
            let frame = match frames.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    eprintln!("broker: bad frame: {err}");
                    return;
                }
            };
            match frame.kind {
                FrameKind::Connect => {
                    let connected = Frame::new(FrameKind::Connected)
                        .with_header("version", "1.2")
                        .with_header("server", "memory-broker/0.1");
                    conn.send(connected.encode());
                }
                FrameKind::Subscribe if frame.destination() == Some("/topic/messages") => {
                    topic_subscription = frame.header("id").map(str::to_string);
                }
                FrameKind::Send if frame.destination() == Some("/app/chat") => {
                    if let Some(id) = &topic_subscription {
                        next_message += 1;
                        let relayed = Frame::new(FrameKind::Message)
                            .with_header("destination", "/topic/messages")
                            .with_header("subscription", id.clone())
                            .with_header("message-id", next_message.to_string())
                            .with_body(frame.body.clone());
                        conn.send(relayed.encode());
                    }
                }
                FrameKind::Disconnect => return,
                _ => {}
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (transport, mut listener) = MemoryTransport::new();
    tokio::spawn(async move {
        while let Some(conn) = listener.accept().await {
            tokio::spawn(run_broker(conn));
        }
    });

    let (session, mut events) = Session::new(transport);
    session
        .subscribe("/topic/messages", |frame: &Frame| {
            println!("received: {}", frame.body_text().unwrap_or("<binary>"));
        })
        .await?;
    session
        .open("memory://chat", ReconnectPolicy::fixed(Duration::from_millis(200)))
        .await?;

    if let Some(SessionEvent::Connected { version, server, .. }) = events.recv().await {
        println!("connected: STOMP {version} ({})", server.unwrap_or_default());
    }

    for (user, text) in [("alice", "hi bob"), ("bob", "hey alice")] {
        session
            .publish_json("/app/chat", &serde_json::json!({ "user": user, "message": text }))
            .await?;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    session.close().await?;
    Ok(())
}
