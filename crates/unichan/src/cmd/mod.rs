use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use unichan_channel::{Context, PoolConfig, DEFAULT_QUEUE_DEPTH};
use unichan_transport::config::{
    DEFAULT_CLOSE_AFTER_FAILURES, DEFAULT_READ_BUFFER_SIZE, DEFAULT_WRITE_BUFFER_SIZE,
};
use unichan_transport::{TransportConfig, TransportKind};

use crate::exit::{io_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an echo server on one transport.
    Serve(ServeArgs),
    /// Dial a server and send payloads.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => block_on(serve::run(args, format)),
        Command::Send(args) => block_on(send::run(args, format)),
        Command::Version(args) => version::run(args),
    }
}

fn block_on(fut: impl Future<Output = CliResult<i32>>) -> CliResult<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;
    runtime.block_on(fut)
}

#[derive(Args, Debug)]
pub struct TransportArgs {
    /// Read deadline per attempt (e.g. 20s, 500ms).
    #[arg(long, env = "UNICHAN_READ_TIMEOUT", default_value = "20s")]
    pub read_timeout: String,
    /// Write deadline per attempt (e.g. 15s, 500ms).
    #[arg(long, env = "UNICHAN_WRITE_TIMEOUT", default_value = "15s")]
    pub write_timeout: String,
    /// Maximum bytes returned by one read.
    #[arg(long, env = "UNICHAN_READ_BUFFER_SIZE", default_value_t = DEFAULT_READ_BUFFER_SIZE)]
    pub read_buffer_size: usize,
    /// Socket send buffer hint in bytes.
    #[arg(long, env = "UNICHAN_WRITE_BUFFER_SIZE", default_value_t = DEFAULT_WRITE_BUFFER_SIZE)]
    pub write_buffer_size: usize,
    /// Consecutive read failures tolerated before a channel is closed.
    #[arg(long, env = "UNICHAN_CLOSE_AFTER_FAILURES", default_value_t = DEFAULT_CLOSE_AFTER_FAILURES)]
    pub close_after_failures: u64,
}

impl TransportArgs {
    pub fn to_config(&self) -> CliResult<TransportConfig> {
        Ok(TransportConfig {
            read_timeout: parse_duration(&self.read_timeout)?,
            write_timeout: parse_duration(&self.write_timeout)?,
            read_buffer_size: self.read_buffer_size,
            write_buffer_size: self.write_buffer_size,
            close_after_failures: self.close_after_failures,
        })
    }
}

#[derive(Args, Debug)]
pub struct PoolArgs {
    /// Read-dispatch workers. Default: available CPU parallelism.
    #[arg(long, env = "UNICHAN_POOL_SIZE")]
    pub pool_size: Option<usize>,
    /// Packets queued per worker before reads wait.
    #[arg(long, env = "UNICHAN_QUEUE_DEPTH", default_value_t = DEFAULT_QUEUE_DEPTH)]
    pub queue_depth: usize,
    /// Handle packets inline in each read loop instead of a worker pool.
    #[arg(long, conflicts_with = "pool_size")]
    pub no_pool: bool,
}

impl PoolArgs {
    pub fn to_config(&self) -> Option<PoolConfig> {
        if self.no_pool {
            return None;
        }
        let defaults = PoolConfig::default();
        Some(PoolConfig {
            size: self.pool_size.unwrap_or(defaults.size),
            queue_depth: self.queue_depth,
        })
    }
}

/// Build the process-wide channel context from CLI flags.
pub fn build_context(transport: &TransportArgs, pool: Option<&PoolArgs>) -> CliResult<Context> {
    let ctx = Context::new(transport.to_config()?);
    Ok(match pool.and_then(PoolArgs::to_config) {
        Some(config) => ctx.with_pool_config(config),
        None => ctx,
    })
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind.
    #[arg(env = "UNICHAN_ADDR", default_value = "127.0.0.1:7700")]
    pub addr: SocketAddr,
    /// Transport: tcp, udp, ws or kcp.
    #[arg(long, short = 't', env = "UNICHAN_TRANSPORT", default_value = "tcp")]
    pub transport: TransportKind,
    /// Exit after N channels have been released.
    #[arg(long, value_name = "N")]
    pub exit_after: Option<usize>,
    #[command(flatten)]
    pub transport_opts: TransportArgs,
    #[command(flatten)]
    pub pool: PoolArgs,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Server address.
    pub addr: SocketAddr,
    /// Transport: tcp, udp, ws or kcp.
    #[arg(long, short = 't', env = "UNICHAN_TRANSPORT", default_value = "tcp")]
    pub transport: TransportKind,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Number of times to send the payload.
    #[arg(long, default_value_t = 1)]
    pub count: usize,
    /// Wait for the echoes and print them.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for echoes when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
    /// WebSocket upgrade path.
    #[arg(long, default_value = unichan_channel::DEFAULT_WS_PATH)]
    pub ws_path: String,
    /// Registration payload sent in the SESSION frame over kcp.
    #[arg(long, env = "UNICHAN_SESSION_TOKEN", default_value = "unichan")]
    pub session_token: String,
    #[command(flatten)]
    pub transport_opts: TransportArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
