use colored::*;
use std::fmt;
use std::path::Path;
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::prelude::*;

/// A custom tracing event formatter for colorizing log output based on level.
///
/// Used for the operator-facing stdout layer: the whole line is colored by
/// severity, with no timestamps or level prefixes.
pub struct ColorizedFormatter;

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
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
        // Buffer the formatted fields to apply color to the entire line.
        let mut buffer = String::new();
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let colored_output = match *event.metadata().level() {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        writeln!(writer, "{}", colored_output)
    }
}

/// Initialize the broker's tracing subscriber.
///
/// The configured log file always receives a plain (ANSI-free) detailed
/// layer through a non-blocking appender; stdout additionally gets the
/// colorized layer unless `quiet` is set (daemons always run quiet).
/// `Debug = true` in the configuration lowers the level filter to DEBUG.
///
/// The returned guard must be kept alive for the life of the process or
/// file logging stops working.
pub fn init(log_file: &str, debug: bool, quiet: bool) -> anyhow::Result<WorkerGuard> {
    let level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let log_path = Path::new(log_file);
    let log_dir = match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let log_name = log_path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("smsgate.log"));

    let file_appender = tracing_appender::rolling::never(log_dir, log_name);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_writer)
        .with_ansi(false)
        .with_filter(level);

    let stdout_layer = if quiet {
        None
    } else {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(ColorizedFormatter)
                .with_filter(level),
        )
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(guard)
}
