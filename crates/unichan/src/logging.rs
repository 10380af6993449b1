use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Crates whose events follow `--log-level`. Everything else (socket and
/// protocol libraries) is capped at WARN.
const OWN_TARGETS: [&str; 4] = [
    "unichan",
    "unichan_channel",
    "unichan_transport",
    "unichan_frame",
];

fn targets(level: LogLevel) -> Targets {
    let own = level.as_filter();
    let others = own.min(LevelFilter::WARN);
    OWN_TARGETS
        .iter()
        .fold(Targets::new().with_default(others), |targets, name| {
            targets.with_target(*name, own)
        })
}

/// Install the stderr subscriber. Channel events carry `channel` and `kind`
/// fields, which the JSON format keeps as separate keys.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let filter = targets(level);
    let registry = tracing_subscriber::registry();

    // A second install (tests) is ignored.
    let _ = match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_target(true),
            )
            .with(filter)
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(false)
                    .flatten_event(true),
            )
            .with(filter)
            .try_init(),
    };
}
