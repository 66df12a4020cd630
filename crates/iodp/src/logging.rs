use clap::{Args, ValueEnum};
use tracing::level_filters::LevelFilter;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Logging flags shared by every subcommand. Logs always go to stderr so
/// stdout stays parseable.
#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Log output format.
    #[arg(
        long,
        value_name = "FORMAT",
        env = "IODP_LOG_FORMAT",
        default_value = "text",
        global = true
    )]
    pub log_format: LogFormat,

    /// Minimum log level. `debug` shows every routed frame, `trace` every
    /// link read.
    #[arg(
        long,
        value_name = "LEVEL",
        env = "IODP_LOG_LEVEL",
        default_value = "info",
        global = true
    )]
    pub log_level: LogLevel,
}

/// Install the stderr subscriber. Thread names are kept so lines from the
/// `iodp-push` and `iodp-process` ingress threads can be told apart.
pub fn init_logging(args: &LogArgs) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(LevelFilter::from(args.log_level))
        .with_ansi(false)
        .with_target(false)
        .with_thread_names(true);

    // A subscriber installed earlier (tests) wins.
    let _ = match args.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_map_to_filters() {
        assert_eq!(LevelFilter::from(LogLevel::Warn), LevelFilter::WARN);
        assert_eq!(LevelFilter::from(LogLevel::Trace), LevelFilter::TRACE);
    }

    #[test]
    fn init_twice_is_harmless() {
        let args = LogArgs {
            log_format: LogFormat::Json,
            log_level: LogLevel::Error,
        };
        init_logging(&args);
        init_logging(&args);
    }
}
