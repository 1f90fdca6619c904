use serde::{Deserialize, Serialize};
use stompwire_frame::Frame;
use stompwire_session::{DisconnectReason, PublishBuffer, SessionEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cmd::{new_session, open_session, ChatArgs};
use crate::exit::{io_error, session_error, CliError, CliResult, SUCCESS, TRANSPORT_ERROR, USAGE};
use crate::output::{print_message, OutputFormat};

/// Payload exchanged on the chat destinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user: String,
    pub message: String,
}

pub async fn run(args: ChatArgs, format: OutputFormat) -> CliResult<i32> {
    if args.buffer == 0 {
        return Err(CliError::new(USAGE, "--buffer must be greater than zero"));
    }
    let (session, mut events) =
        new_session(&args.connect, Some(PublishBuffer::new(args.buffer)))?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    session
        .subscribe(args.topic.clone(), tx)
        .await
        .map_err(|err| session_error("subscribe failed", err))?;
    open_session(&session, &args.endpoint, &args.connect).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    let message = ChatMessage {
                        user: args.user.clone(),
                        message: text.to_string(),
                    };
                    if let Err(err) = session.publish_json(args.send_to.clone(), &message).await {
                        warn!(error = %err, "message not sent");
                    }
                }
                Ok(None) => break Ok(SUCCESS),
                Err(err) => break Err(io_error("failed to read stdin", err)),
            },
            frame = rx.recv() => match frame {
                Some(frame) => render(&frame, format),
                None => break Ok(SUCCESS),
            },
            event = events.recv() => match event {
                Some(SessionEvent::Reconnecting { attempt, reason, .. }) => {
                    warn!(attempt, %reason, "connection lost, reconnecting");
                }
                Some(SessionEvent::Connected { .. }) => info!("reconnected"),
                Some(SessionEvent::PublishDropped { destination }) => {
                    warn!(%destination, "buffer full, oldest message dropped");
                }
                Some(SessionEvent::Error(detail)) => warn!(%detail, "broker error"),
                Some(SessionEvent::Disconnected(DisconnectReason::ReconnectExhausted { attempts })) => {
                    break Err(CliError::new(
                        TRANSPORT_ERROR,
                        format!("connection lost: gave up after {attempts} reconnect attempts"),
                    ));
                }
                Some(_) => {}
                None => break Ok(SUCCESS),
            },
            _ = &mut ctrl_c => break Ok(SUCCESS),
        }
    };

    if let Err(err) = session.close().await {
        warn!(error = %err, "close failed");
    }
    outcome
}

fn render(frame: &Frame, format: OutputFormat) {
    match (format, parse_chat(frame)) {
        (OutputFormat::Pretty | OutputFormat::Table, Some(chat)) => {
            println!("{}: {}", chat.user, chat.message);
        }
        _ => print_message(frame, format),
    }
}

fn parse_chat(frame: &Frame) -> Option<ChatMessage> {
    serde_json::from_slice(&frame.body).ok()
}

#[cfg(test)]
mod tests {
    use stompwire_frame::{header, FrameKind};

    use super::*;

    #[test]
    fn chat_message_wire_shape() {
        let message = ChatMessage {
            user: "alice".to_string(),
            message: "hi".to_string(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json, serde_json::json!({"user": "alice", "message": "hi"}));
    }

    #[test]
    fn parses_chat_bodies_and_ignores_others() {
        let frame = Frame::new(FrameKind::Message)
            .with_header(header::DESTINATION, "/topic/messages")
            .with_header(header::SUBSCRIPTION, "sub-0")
            .with_body(r#"{"user":"bob","message":"yo"}"#);
        assert_eq!(
            parse_chat(&frame),
            Some(ChatMessage {
                user: "bob".to_string(),
                message: "yo".to_string()
            })
        );

        let plain = frame.clone().with_body("just text");
        assert_eq!(parse_chat(&plain), None);
    }
}
