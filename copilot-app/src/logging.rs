use anyhow::Result;
use copilot_core::directory::Directory;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Keeps the file writer flushing until dropped
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `default_directive`. Records emitted
/// through the `log` crate (tungstenite, for one) are forwarded too.
pub fn init_logging(default_directive: &str, log_file: bool) -> Result<LoggingGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let (file_layer, guard) = match log_file.then(Directory::logs_directory).flatten() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "copilot-widget.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;

    Ok(LoggingGuard { _file: guard })
}
