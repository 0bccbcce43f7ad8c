//! Log initialization from the `log:` config section
//!
//! Each configured output becomes one subscriber layer: console or file
//! writer, console or JSON formatter, with a per-output level filter.
//! File outputs rotate daily; size-based rotation settings are accepted
//! in the config but not applied.

use std::path::Path;

use color_eyre::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer, Registry};

use crate::config::LogOutput;

/// Install the global subscriber built from `outputs`.
///
/// With no outputs configured a console layer at `info` is installed.
/// The returned guards must be held for the life of the process so file
/// writers flush on shutdown.
///
/// # Errors
/// Returns an error if a global subscriber is already installed.
pub fn init(outputs: &[LogOutput]) -> Result<Vec<WorkerGuard>> {
    let mut guards = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if outputs.is_empty() {
        layers.push(fmt::layer().with_filter(LevelFilter::INFO).boxed());
    }

    for output in outputs {
        let filter = level_filter(&output.level);
        let json = output.formatter.eq_ignore_ascii_case("json");

        if output.writer.eq_ignore_ascii_case("file") {
            let path = Path::new(&output.write_config.log_path);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "obsync.log".to_string());
            let appender =
                tracing_appender::rolling::daily(dir.unwrap_or_else(|| Path::new(".")), file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);

            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            layers.push(if json {
                layer.json().with_filter(filter).boxed()
            } else {
                layer.with_filter(filter).boxed()
            });
        } else {
            let layer = fmt::layer();
            layers.push(if json {
                layer.json().with_filter(filter).boxed()
            } else {
                layer.with_filter(filter).boxed()
            });
        }
    }

    tracing_subscriber::registry().with(layers).try_init()?;
    Ok(guards)
}

fn level_filter(level: &str) -> LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "debug" => LevelFilter::DEBUG,
        "warn" => LevelFilter::WARN,
        "error" | "fatal" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteConfig;

    #[test]
    fn test_level_filter_mapping() {
        assert_eq!(level_filter("debug"), LevelFilter::DEBUG);
        assert_eq!(level_filter("INFO"), LevelFilter::INFO);
        assert_eq!(level_filter("warn"), LevelFilter::WARN);
        assert_eq!(level_filter("error"), LevelFilter::ERROR);
        assert_eq!(level_filter("fatal"), LevelFilter::ERROR);
        assert_eq!(level_filter("unknown"), LevelFilter::INFO);
    }

    #[test]
    fn test_init_console_and_file_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let outputs = vec![
            LogOutput {
                writer: "console".to_string(),
                formatter: "console".to_string(),
                level: "info".to_string(),
                ..Default::default()
            },
            LogOutput {
                writer: "file".to_string(),
                formatter: "json".to_string(),
                level: "debug".to_string(),
                write_config: WriteConfig {
                    log_path: dir
                        .path()
                        .join("obsync.log")
                        .to_string_lossy()
                        .into_owned(),
                    ..Default::default()
                },
                ..Default::default()
            },
        ];

        let guards = init(&outputs).unwrap();
        assert_eq!(guards.len(), 1);
    }
}
