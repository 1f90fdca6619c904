use stompwire_frame::Frame;
use stompwire_session::{DisconnectReason, SessionEvent};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cmd::{new_session, open_session, parse_headers, SubscribeArgs};
use crate::exit::{session_error, CliError, CliResult, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_message, OutputFormat};

pub async fn run(args: SubscribeArgs, format: OutputFormat) -> CliResult<i32> {
    let headers = parse_headers(&args.header)?;
    let (session, mut events) = new_session(&args.connect, None)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    let id = session
        .subscribe_with_headers(args.destination.clone(), headers, tx)
        .await
        .map_err(|err| session_error("subscribe failed", err))?;
    info!(destination = %args.destination, subscription = %id, "subscription registered");

    open_session(&session, &args.endpoint, &args.connect).await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut received = 0usize;
    let outcome = loop {
        if args.count.is_some_and(|count| received >= count) {
            break Ok(SUCCESS);
        }

        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    break Ok(SUCCESS);
                };
                print_message(&frame, format);
                received += 1;
            }
            event = events.recv() => match event {
                Some(SessionEvent::Disconnected(DisconnectReason::ReconnectExhausted { attempts })) => {
                    break Err(CliError::new(
                        TRANSPORT_ERROR,
                        format!("connection lost: gave up after {attempts} reconnect attempts"),
                    ));
                }
                Some(SessionEvent::Disconnected(reason)) => {
                    break Err(CliError::new(
                        TRANSPORT_ERROR,
                        format!("disconnected: {reason:?}"),
                    ));
                }
                Some(SessionEvent::Reconnecting { attempt, delay, reason }) => {
                    warn!(attempt, ?delay, %reason, "connection lost, reconnecting");
                }
                Some(SessionEvent::Error(detail)) => warn!(%detail, "broker error"),
                Some(SessionEvent::Unroutable { destination, .. }) => {
                    warn!(?destination, "discarded unroutable message");
                }
                Some(_) => {}
                None => break Ok(SUCCESS),
            },
            _ = &mut ctrl_c => {
                info!("interrupted");
                break Ok(SUCCESS);
            }
        }
    };

    if let Err(err) = session.close().await {
        warn!(error = %err, "close failed");
    }
    info!(received, "subscribe finished");
    outcome
}
