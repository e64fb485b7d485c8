use clap::ValueEnum;
use tracing::level_filters::LevelFilter;

/// Overrides `--log-level` when set to one of the level names.
pub const LOG_ENV: &str = "DMCLINK_LOG";

#[derive(Copy, Clone, Debug, ValueEnum)]
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

    fn from_env(value: &str) -> Option<Self> {
        LogLevel::from_str(value.trim(), true).ok()
    }

    /// Wire traffic is logged at debug; show which layer emitted it.
    fn shows_target(self) -> bool {
        matches!(self, LogLevel::Debug | LogLevel::Trace)
    }
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|value| LogLevel::from_env(&value))
        .unwrap_or(level);

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(level.shows_target());

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_level_is_case_insensitive() {
        assert_eq!(LogLevel::from_env(" DEBUG "), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_env("verbose"), None);
    }
}
