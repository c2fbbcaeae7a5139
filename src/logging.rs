use anyhow::{anyhow, Context, Result};
use std::fs::OpenOptions;
use std::io::{self, Write};

use crate::config::{LogDestination, LoggingSettings};

/// Install the global logger.
///
/// The configured level is the default; `RUST_LOG` still overrides it. With a file
/// destination every record goes to the file and to stderr.
pub fn init_logging(settings: &LoggingSettings) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(settings.level);
    builder.parse_env(env_logger::Env::default());
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {}",
            buf.timestamp_millis(),
            record.level(),
            record.args()
        )
    });

    if let LogDestination::File(path) = &settings.destination {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(Tee::new(file, io::stderr()))));
    } else {
        builder.target(env_logger::Target::Stderr);
    }

    builder
        .try_init()
        .map_err(|e| anyhow!("logger already initialised: {}", e))
}

/// Writer that duplicates everything into two sinks.
pub struct Tee<A, B> {
    primary: A,
    mirror: B,
}

impl<A: Write, B: Write> Tee<A, B> {
    pub fn new(primary: A, mirror: B) -> Self {
        Self { primary, mirror }
    }

    pub fn into_inner(self) -> (A, B) {
        (self.primary, self.mirror)
    }
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.primary.write_all(buf)?;
        // Losing the console copy must not lose the file copy.
        let _ = self.mirror.write_all(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.mirror.flush();
        self.primary.flush()
    }
}
