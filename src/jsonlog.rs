//! Line-oriented JSON logging.
//!
//! Every record is a single JSON object terminated by `\n`. Records at
//! `ERROR` and above carry a captured stack trace. A [`JsonLogLayer`] bridges
//! `tracing` events into the same sink so handlers keep using `info!`/`error!`.

use std::{
    backtrace::Backtrace,
    collections::BTreeMap,
    fmt,
    io::{self, Write},
    str::FromStr,
    sync::Arc,
};

use parking_lot::Mutex;
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{
    field::{Field, Visit},
    span, Event, Subscriber,
};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info,
    Error,
    Fatal,
    Off,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
            Level::Off => "",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Level::Info),
            "error" => Ok(Level::Error),
            "fatal" => Ok(Level::Fatal),
            "off" => Ok(Level::Off),
            other => Err(format!("unknown log level {other:?}")),
        }
    }
}

pub type Properties = BTreeMap<String, String>;

#[derive(Serialize)]
struct Record<'a> {
    level: &'static str,
    time: String,
    message: &'a str,
    #[serde(skip_serializing_if = "no_properties")]
    properties: &'a Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<String>,
}

fn no_properties(properties: &&Properties) -> bool {
    properties.is_empty()
}

pub struct Logger {
    out: Mutex<Box<dyn Write + Send>>,
    min_level: Level,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("min_level", &self.min_level)
            .finish_non_exhaustive()
    }
}

impl Logger {
    pub fn new<W: Write + Send + 'static>(out: W, min_level: Level) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
            min_level,
        }
    }

    pub fn stdout(min_level: Level) -> Self {
        Self::new(io::stdout(), min_level)
    }

    pub fn print_info(&self, message: &str, properties: &Properties) {
        let _ = self.print(Level::Info, message, properties);
    }

    pub fn print_error(&self, err: &dyn fmt::Display, properties: &Properties) {
        let _ = self.print(Level::Error, &err.to_string(), properties);
    }

    /// Writes a `FATAL` record and terminates the process.
    pub fn print_fatal(&self, err: &dyn fmt::Display, properties: &Properties) -> ! {
        let _ = self.print(Level::Fatal, &err.to_string(), properties);
        std::process::exit(1)
    }

    /// Writes one record. Returns the number of bytes written, zero when the
    /// record falls below the minimum level.
    pub fn print(&self, level: Level, message: &str, properties: &Properties) -> io::Result<usize> {
        if level < self.min_level {
            return Ok(0);
        }

        let now = OffsetDateTime::now_utc();
        let now = now.replace_nanosecond(0).unwrap_or(now);
        let record = Record {
            level: level.as_str(),
            time: now.format(&Rfc3339).unwrap_or_default(),
            message,
            properties,
            trace: (level >= Level::Error).then(|| Backtrace::force_capture().to_string()),
        };

        let mut line = match serde_json::to_vec(&record) {
            Ok(line) => line,
            Err(e) => format!("{}: unable to marshal log message: {e}", Level::Error).into_bytes(),
        };
        line.push(b'\n');

        let mut out = self.out.lock();
        out.write_all(&line)?;
        out.flush()?;
        Ok(line.len())
    }
}

/// Raw bytes written through this adapter become a single `ERROR` record.
impl Write for &Logger {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let message = String::from_utf8_lossy(buf);
        self.print(Level::Error, message.trim_end(), &Properties::new())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.lock().flush()
    }
}

/// Forwards `tracing` events to a [`Logger`]. `WARN` and `INFO` map to `INFO`,
/// `ERROR` maps to `ERROR`, anything more verbose is dropped. Fields of the
/// enclosing spans are merged into the record's properties.
pub struct JsonLogLayer {
    logger: Arc<Logger>,
}

impl JsonLogLayer {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { logger }
    }
}

struct SpanFields(Properties);

#[derive(Default)]
struct FieldVisitor {
    message: String,
    properties: Properties,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_owned();
        } else {
            self.properties
                .insert(field.name().to_owned(), value.to_owned());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.properties
                .insert(field.name().to_owned(), format!("{value:?}"));
        }
    }
}

impl<S> Layer<S> for JsonLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanFields(visitor.properties));
        }
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut visitor = FieldVisitor::default();
        values.record(&mut visitor);
        let mut extensions = span.extensions_mut();
        if let Some(fields) = extensions.get_mut::<SpanFields>() {
            fields.0.extend(visitor.properties);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let level = match *event.metadata().level() {
            tracing::Level::ERROR => Level::Error,
            tracing::Level::WARN | tracing::Level::INFO => Level::Info,
            _ => return,
        };

        let mut visitor = FieldVisitor::default();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(fields) = span.extensions().get::<SpanFields>() {
                    visitor.properties.extend(fields.0.clone());
                }
            }
        }
        event.record(&mut visitor);

        let _ = self.logger.print(level, &visitor.message, &visitor.properties);
    }
}
