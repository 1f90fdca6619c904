use std::time::Duration;

use bytes::Bytes;
use stompwire_frame::header;
use stompwire_session::{DisconnectReason, OutboundMessage, SessionEvent, SessionEvents};
use tracing::{debug, info, warn};

use crate::cmd::{new_session, open_session, parse_duration, parse_headers, PublishArgs};
use crate::exit::{
    io_error, session_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, TRANSPORT_ERROR, USAGE,
};
use crate::output::{print_receipt, OutputFormat};

const RECEIPT_ID: &str = "publish-1";

pub async fn run(args: PublishArgs, format: OutputFormat) -> CliResult<i32> {
    let receipt_timeout = parse_duration(&args.receipt_timeout)?;
    let headers = parse_headers(&args.header)?;
    let (body, content_type) = resolve_payload(&args)?;
    let body_size = body.len();

    let mut message = OutboundMessage::new(args.destination.clone(), body).with_headers(headers);
    if let Some(content_type) = content_type {
        message = message.with_header(header::CONTENT_TYPE, content_type);
    }
    message = message.with_header(header::RECEIPT, RECEIPT_ID);

    let (session, mut events) = new_session(&args.connect, None)?;
    open_session(&session, &args.endpoint, &args.connect).await?;

    let outcome = async {
        session
            .publish_message(message)
            .await
            .map_err(|err| session_error("publish failed", err))?;
        debug!(destination = %args.destination, body_size, "SEND written, awaiting receipt");
        wait_for_receipt(&mut events, receipt_timeout).await
    }
    .await;

    if let Err(err) = session.close().await {
        warn!(error = %err, "close failed");
    }

    outcome?;
    info!(destination = %args.destination, body_size, "published");
    print_receipt(&args.destination, RECEIPT_ID, body_size, format);
    Ok(SUCCESS)
}

async fn wait_for_receipt(events: &mut SessionEvents, timeout: Duration) -> CliResult<()> {
    let wait = async {
        loop {
            match events.recv().await {
                Some(SessionEvent::Receipt(id)) if id == RECEIPT_ID => return Ok(()),
                Some(SessionEvent::Error(detail)) => {
                    return Err(CliError::new(
                        FAILURE,
                        format!("broker rejected message: {detail}"),
                    ));
                }
                Some(SessionEvent::Reconnecting { reason, .. }) => {
                    return Err(CliError::new(
                        TRANSPORT_ERROR,
                        format!("connection lost before receipt: {reason}"),
                    ));
                }
                Some(SessionEvent::Disconnected(DisconnectReason::ReconnectExhausted {
                    attempts,
                })) => {
                    return Err(CliError::new(
                        TRANSPORT_ERROR,
                        format!("connection lost: gave up after {attempts} reconnect attempts"),
                    ));
                }
                Some(_) => {}
                None => {
                    return Err(CliError::new(
                        TRANSPORT_ERROR,
                        "session ended before receipt",
                    ));
                }
            }
        }
    };

    tokio::time::timeout(timeout, wait).await.map_err(|_| {
        CliError::new(
            TIMEOUT,
            format!("no receipt from broker within {}ms", timeout.as_millis()),
        )
    })?
}

fn resolve_payload(args: &PublishArgs) -> CliResult<(Bytes, Option<&'static str>)> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("invalid --json payload: {err}")))?;
        return Ok((Bytes::from(json.clone()), Some("application/json")));
    }

    if let Some(data) = &args.data {
        return Ok((Bytes::from(data.clone()), None));
    }

    if let Some(path) = &args.file {
        let data = std::fs::read(path)
            .map_err(|err| io_error(&format!("failed to read {}", path.display()), err))?;
        return Ok((Bytes::from(data), None));
    }

    Ok((Bytes::new(), None))
}
