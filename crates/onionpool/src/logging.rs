//! Logging setup: a `tracing-subscriber` registry with runtime-configurable
//! filtering and a line formatter producing
//! `YYYY-MM-DDTHH:MM:SSZ LEVEL component event key=value …`
//! on the console and, optionally, a log file.

mod fields;

use std::fmt;
use std::path::PathBuf;

use fs_mistrust::Mistrust;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use fields::ErrorsLastFieldFormatter;

use crate::error::Error;

/// Logging configuration, loaded as part of [`crate::cfg::PoolConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// An [`EnvFilter`] directive string, e.g. `"info"` or
    /// `"onionpool=debug,onionpool::pool=trace"`.
    pub filter: String,
    /// Optional path to a log file. The parent directory is checked against
    /// the same [`Mistrust`] policy as rendered configs; when absent, only
    /// console logging runs.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_owned(),
            file: None,
        }
    }
}

/// Guards that must stay alive for the process lifetime; dropping one
/// flushes its buffered writer.
pub struct LogGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Formats one event as a single line:
/// `TIMESTAMP LEVEL component message key=value …`.
///
/// `component` is the last `::`-separated segment of the event's target,
/// which for this crate is always the module that emitted it (`pool`,
/// `instance`, `coordinator`, …).
struct LineFormatter;

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let now = OffsetDateTime::now_utc();
        let meta = event.metadata();
        let component = meta.target().rsplit("::").next().unwrap_or(meta.target());

        write!(
            writer,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z {} {} ",
            now.year(),
            u8::from(now.month()),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            meta.level(),
            component,
        )?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Install the global `tracing` subscriber: a console layer and, when
/// `config.file` is set, an additional non-blocking file layer under a
/// [`Mistrust`]-checked directory.
///
/// Returns guards that the caller must hold for the process lifetime.
pub fn setup_logging(config: &LoggingConfig, mistrust: &Mistrust) -> Result<LogGuards, Error> {
    let filter = |directives: &str| {
        EnvFilter::try_new(directives)
            .map_err(|e| Error::InvalidConfig(format!("invalid log filter {directives:?}: {e}")))
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .event_format(LineFormatter)
        .fmt_fields(ErrorsLastFieldFormatter)
        .with_writer(std::io::stderr)
        .with_filter(filter(&config.filter)?);

    let registry = tracing_subscriber::registry().with(console_layer);

    let file_guard = match &config.file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let dir = dir.unwrap_or_else(|| std::path::Path::new("."));
            mistrust
                .verifier()
                .secure_dir(dir)
                .map_err(|e| Error::InvalidConfig(format!("log directory {}: {e}", dir.display())))?;
            let file_name = path
                .file_name()
                .ok_or_else(|| Error::InvalidConfig(format!("log path {path:?} has no file name")))?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let file_layer = tracing_subscriber::fmt::layer()
                .event_format(LineFormatter)
                .fmt_fields(ErrorsLastFieldFormatter)
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter(&config.filter)?);

            registry.with(file_layer).try_init().ok();
            Some(guard)
        }
        None => {
            registry.try_init().ok();
            None
        }
    };

    install_panic_handler();

    Ok(LogGuards {
        _file_guard: file_guard,
    })
}

/// Log panics through `tracing::error!` instead of letting them print
/// straight to stderr, so a panic during a supervised run still lands in
/// the configured log sink.
fn install_panic_handler() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(panic = %info, "panic");
        default_hook(info);
    }));
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_filter_is_info() {
        assert_eq!(LoggingConfig::default().filter, "info");
    }

    #[test]
    fn default_has_no_file() {
        assert!(LoggingConfig::default().file.is_none());
    }
}
