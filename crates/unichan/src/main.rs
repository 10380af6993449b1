mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "unichan", version, about = "Channels over TCP, UDP, WebSocket and KCP")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use unichan_transport::TransportKind;

    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "unichan",
            "send",
            "127.0.0.1:7700",
            "--transport",
            "kcp",
            "--data",
            "hello",
            "--count",
            "3",
        ])
        .expect("send args should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.transport, TransportKind::Kcp);
        assert_eq!(args.count, 3);
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "unichan",
            "send",
            "127.0.0.1:7700",
            "--json",
            "{\"x\":1}",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn serve_defaults_match_transport_config() {
        let cli = Cli::try_parse_from(["unichan", "serve", "--transport", "ws"])
            .expect("serve args should parse");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let config = args
            .transport_opts
            .to_config()
            .expect("defaults should be valid");
        assert_eq!(args.transport, TransportKind::Ws);
        assert_eq!(
            config.read_timeout,
            unichan_transport::config::DEFAULT_READ_TIMEOUT
        );
        assert_eq!(config.close_after_failures, 3);
    }

    #[test]
    fn rejects_unknown_transport() {
        let err = Cli::try_parse_from(["unichan", "serve", "--transport", "sctp"])
            .expect_err("unknown transport should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
