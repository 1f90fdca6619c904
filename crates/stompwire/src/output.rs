use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use stompwire_frame::{header, Frame};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    event: &'static str,
    destination: &'a str,
    subscription: &'a str,
    message_id: &'a str,
    content_type: Option<&'a str>,
    body_size: usize,
    body: String,
    timestamp: String,
}

#[derive(Serialize)]
struct ReceiptOutput<'a> {
    event: &'static str,
    destination: &'a str,
    receipt_id: &'a str,
    body_size: usize,
    timestamp: String,
}

pub fn print_message(frame: &Frame, format: OutputFormat) {
    let destination = frame.destination().unwrap_or_default();
    let subscription = frame.subscription().unwrap_or_default();
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                event: "message",
                destination,
                subscription,
                message_id: frame.header(header::MESSAGE_ID).unwrap_or_default(),
                content_type: frame.header(header::CONTENT_TYPE),
                body_size: frame.body.len(),
                body: body_preview(frame.body.as_ref()),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DESTINATION", "SUBSCRIPTION", "SIZE", "BODY"])
                .add_row(vec![
                    destination.to_string(),
                    subscription.to_string(),
                    frame.body.len().to_string(),
                    body_preview(frame.body.as_ref()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "destination={} subscription={} size={} body={}",
                destination,
                subscription,
                frame.body.len(),
                body_preview(frame.body.as_ref())
            );
        }
        OutputFormat::Raw => {
            print_raw(frame.body.as_ref());
        }
    }
}

pub fn print_receipt(destination: &str, receipt_id: &str, body_size: usize, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ReceiptOutput {
            event: "receipt",
            destination,
            receipt_id,
            body_size,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["DESTINATION", "RECEIPT", "SIZE"])
                .add_row(vec![
                    destination.to_string(),
                    receipt_id.to_string(),
                    body_size.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("published destination={destination} receipt={receipt_id} size={body_size}");
        }
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn body_preview(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", body.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
