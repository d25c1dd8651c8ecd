use crate::config::LoggingConfig;
use std::fmt;
use std::fs;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt as tfmt, prelude::*, EnvFilter};

/// File line format consumed by the report scripts: `<timestamp> [<LEVEL>] <message>`
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
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
        let now = chrono::Local::now().to_rfc3339();
        write!(writer, "{} [{}] ", now, event.metadata().level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Initializes console output plus the append-only line log.
///
/// The returned guard must be held for the life of the process so buffered
/// lines are flushed on exit.
pub fn init_logging(cfg: &LoggingConfig) -> WorkerGuard {
    let _ = fs::create_dir_all(&cfg.dir);

    let file_appender = tracing_appender::rolling::never(&cfg.dir, &cfg.file);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tfmt::layer()
        .event_format(LineFormat)
        .with_ansi(false)
        .with_writer(non_blocking_writer);

    let console_layer = tfmt::layer().with_target(false).with_writer(std::io::stdout);

    // Respect RUST_LOG if set; otherwise info for everything
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hazard_ingest=info,info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    guard
}
