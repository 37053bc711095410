use crate::domain::settings::{LogRotation, LogSettings};
use anyhow::Context;
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Flushes buffered file output when dropped; hold it for the whole run.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Minutely => Rotation::MINUTELY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}

fn env_filter(settings: &LogSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn format_layer<W>(settings: &LogSettings, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_file(settings.source_locations)
        .with_line_number(settings.source_locations)
        .with_thread_ids(settings.thread_ids)
        .with_target(settings.targets)
        .boxed()
}

/// Install the global subscriber.
///
/// Console output goes to stderr so stdout stays free for replay output.
pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    if settings.console {
        layers.push(format_layer(settings, std::io::stderr, settings.ansi));
    }

    let mut file_guard = None;
    if let Some(directory) = &settings.directory {
        fs::create_dir_all(directory)
            .with_context(|| format!("Failed to create log directory {}", directory.display()))?;
        let appender = RollingFileAppender::new(
            rotation(settings.rotation),
            directory,
            &settings.file_prefix,
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(format_layer(settings, writer, false));
        file_guard = Some(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter(settings))
        .try_init()?;

    tracing::info!(
        console = settings.console,
        directory = ?settings.directory,
        "Logging initialized"
    );
    Ok(LoggingGuard { _file: file_guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_names() {
        let parsed: LogRotation = serde_json::from_str(r#""hourly""#).unwrap();
        assert_eq!(rotation(parsed), Rotation::HOURLY);
        assert_eq!(rotation(LogRotation::default()), Rotation::DAILY);
        assert_eq!(rotation(LogRotation::Never), Rotation::NEVER);
    }

    #[test]
    fn test_file_logging_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LogSettings {
            console: false,
            directory: Some(dir.path().join("logs")),
            ..LogSettings::default()
        };

        let guard = init_logger(&settings).unwrap();
        tracing::info!("written to file");
        drop(guard);

        assert!(dir.path().join("logs").is_dir());
    }
}
