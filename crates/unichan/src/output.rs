use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use unichan_transport::{CounterSnapshot, StatisticsSnapshot, TransportKind};

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
    channel: &'a str,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

/// Final statistics of one channel.
#[derive(Serialize)]
pub struct ChannelReport<'a> {
    pub channel: &'a str,
    pub kind: TransportKind,
    pub server_side: bool,
    pub stats: StatisticsSnapshot,
}

pub fn print_message(channel: &str, payload: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                event: "message",
                channel,
                payload_size: payload.len(),
                payload: payload_preview(payload),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    channel.to_string(),
                    payload.len().to_string(),
                    payload_preview(payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} size={} payload={}",
                channel,
                payload.len(),
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

pub fn print_report(report: &ChannelReport<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => {
            println!(
                "{}",
                serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "CHANNEL", "DIRECTION", "PACKETS", "BYTES", "FAILURES", "STREAK",
                ]);
            for (direction, counter) in directions(&report.stats) {
                table.add_row(vec![
                    report.channel.to_string(),
                    direction.to_string(),
                    counter.total_packets.to_string(),
                    counter.total_bytes.to_string(),
                    counter.total_failures.to_string(),
                    counter.consecutive_failures.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (direction, counter) in directions(&report.stats) {
                println!(
                    "channel={} kind={} {}: packets={} bytes={} failures={}",
                    report.channel,
                    report.kind,
                    direction,
                    counter.total_packets,
                    counter.total_bytes,
                    counter.total_failures
                );
            }
        }
    }
}

fn directions(stats: &StatisticsSnapshot) -> [(&'static str, &CounterSnapshot); 3] {
    [
        ("send", &stats.send),
        ("receive", &stats.receive),
        ("handle", &stats.handle),
    ]
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
