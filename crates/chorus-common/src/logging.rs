//! Tracing setup shared by every binary and test harness that embeds Chorus.

use std::io::Write;
use std::sync::LazyLock;

use regex::Regex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

use crate::{Error, Result};

/// Output shape of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(default_level: &str, format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(RedactingWriter::stderr())
        .with_target(true);

    let installed = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|e| Error::Config(format!("failed to install tracing subscriber: {e}")))
}

/// A writer that masks provider credentials before they reach the log sink.
pub struct RedactingWriter<W> {
    inner: W,
}

impl RedactingWriter<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self {
            inner: std::io::stderr(),
        }
    }
}

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let original = String::from_utf8_lossy(buf);
        self.inner.write_all(redact_secrets(&original).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> MakeWriter<'a> for RedactingWriter<std::io::Stderr> {
    type Writer = RedactingWriter<std::io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::stderr()
    }
}

static SECRET_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
          sk-ant-[A-Za-z0-9_\-]{10,}      # Anthropic keys
        | sk-[A-Za-z0-9_\-]{20,}          # OpenAI-style keys
        | AIza[0-9A-Za-z_\-]{30,}         # Google API keys
        | (?i:bearer)\s+[A-Za-z0-9._\-]{16,}
        ",
    )
    .expect("redaction regex should compile")
});

/// Replace known credential shapes with `[REDACTED]`.
pub fn redact_secrets(input: &str) -> String {
    SECRET_PATTERNS.replace_all(input, "[REDACTED]").into_owned()
}
