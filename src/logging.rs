//! Logging setup on top of tracing-subscriber

use crate::config::LoggingConfig;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// Log format type
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LogFormat {
    /// Plain text format (default)
    #[default]
    Text,
    /// JSON structured format
    Json,
}

impl LogFormat {
    /// Parse log format from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parse a level name, falling back to `info` with a warning on stderr
pub fn level_filter(level: &str) -> LevelFilter {
    level.to_lowercase().parse::<LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Warning: Invalid log level '{}', using 'info'", level);
        LevelFilter::INFO
    })
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_filter(&config.level).into())
        .from_env_lossy();

    let format = LogFormat::parse(&config.format).unwrap_or_else(|| {
        eprintln!(
            "Warning: Invalid log format '{}', using 'text'",
            config.format
        );
        LogFormat::Text
    });

    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter);

    // A subscriber may already be installed (e.g. by an embedding application)
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
