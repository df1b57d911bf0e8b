use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: String,
    pub enable_console: bool,
    pub enable_file: bool,
    pub default_directive: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            enable_console: true,
            enable_file: false,
            default_directive: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_dir: std::env::var("LOG_DIR").unwrap_or(defaults.log_dir),
            enable_console: std::env::var("LOG_CONSOLE")
                .map(|v| v != "false")
                .unwrap_or(defaults.enable_console),
            enable_file: std::env::var("LOG_FILE")
                .map(|v| v == "true")
                .unwrap_or(defaults.enable_file),
            default_directive: std::env::var("RUST_LOG").unwrap_or(defaults.default_directive),
        }
    }
}

/// Initializes tracing with console output and optional daily-rotated file
/// logs. The returned guard must stay alive for the process lifetime or
/// buffered file output is lost.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, std::io::Error> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_directive));

    let console_layer = config.enable_console.then(|| fmt::layer().with_target(true));

    let (file_layer, guard) = if config.enable_file {
        std::fs::create_dir_all(&config.log_dir)?;
        let appender =
            RollingFileAppender::new(Rotation::DAILY, &config.log_dir, "accounts-es.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
        )
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
