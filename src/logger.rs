//! The server's own logger: one owned component that formats records with
//! `env_logger` and writes them to stderr and to the rotating active file.
//!
//! Two kinds of records never reach the file. Watcher internals trace every
//! inotify event, and the file is what tail sessions watch, so they go to
//! stderr only. Rotation events from the writer are reported after the
//! record that caused them has been written and every lock released.

use crate::policy::RotationPolicy;
use crate::writer::{RotatingFile, RotationEvent};
use env_logger::{Env, Target};
use log::{Log, Metadata, Record};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// Targets of the filesystem watcher crates.
const WATCHER_TARGETS: [&str; 3] = ["notify", "inotify", "mio"];

/// Target rotation events are reported under.
const WRITER_TARGET: &str = "logtail::writer";

/// Verbosity accepted on the command line. Anything unrecognised is `info`.
pub fn level_filter(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    }
}

/// Cloneable [`io::Write`] handle onto the shared [`RotatingFile`].
///
/// This is what gets injected into anything that appends to the log.
#[derive(Debug, Clone)]
pub struct LogSink {
    file: Arc<Mutex<RotatingFile>>,
}

impl LogSink {
    pub fn new(file: RotatingFile) -> Self {
        LogSink {
            file: Arc::new(Mutex::new(file)),
        }
    }

    /// Lock the underlying file, e.g. to rotate it explicitly.
    pub fn lock(&self) -> io::Result<MutexGuard<'_, RotatingFile>> {
        self.file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))
    }

    /// Drain the writer's queued rotation events.
    pub fn take_events(&self) -> io::Result<Vec<RotationEvent>> {
        Ok(self.lock()?.take_events())
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        // One lock for the whole record so concurrent records never
        // interleave and rotation never splits one.
        self.lock()?.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

/// Copies every formatted record to stderr and the log file.
struct Tee {
    sink: LogSink,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_all(buf)?;
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        // stderr is best-effort; the file is the record of truth.
        let _ = io::stderr().write_all(buf);
        self.sink.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        self.sink.flush()
    }
}

/// Settings for [`ServerLogger::init`].
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub level: String,
    pub file: PathBuf,
    pub policy: RotationPolicy,
}

/// Owns the active log file for the lifetime of the process.
///
/// ```no_run
/// use logtail::{LoggerConfig, RotationPolicy, ServerLogger};
///
/// let logger = ServerLogger::init(&LoggerConfig {
///     level: "debug".into(),
///     file: "/var/log/controlserver.log".into(),
///     policy: RotationPolicy::default(),
/// })?;
/// log::info!("starting");
/// logger.shutdown()?;
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug)]
pub struct ServerLogger {
    sink: LogSink,
}

impl ServerLogger {
    /// Open the rotating file and install the global `log` backend.
    ///
    /// `RUST_LOG`, when set, takes precedence over `config.level`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or a global logger is already
    /// installed.
    pub fn init(config: &LoggerConfig) -> io::Result<Self> {
        let file = RotatingFile::open(&config.file, config.policy.clone())?;
        let sink = LogSink::new(file);

        let tee = Target::Pipe(Box::new(Tee { sink: sink.clone() }));
        let backend = ServerLog {
            file: builder(&config.level, tee).build(),
            console: builder(&config.level, Target::Stderr).build(),
            sink: sink.clone(),
        };
        let max_level = backend.file.filter();
        log::set_boxed_logger(Box::new(backend)).map_err(io::Error::other)?;
        log::set_max_level(max_level);

        Ok(ServerLogger { sink })
    }

    /// Handle for injecting into other writers.
    pub fn sink(&self) -> LogSink {
        self.sink.clone()
    }

    /// Path of the active log file.
    pub fn path(&self) -> io::Result<PathBuf> {
        Ok(self.sink.lock()?.path().to_path_buf())
    }

    /// Flush and close the active file.
    ///
    /// The global `log` backend stays installed; records logged afterwards
    /// reopen the file.
    pub fn shutdown(self) -> io::Result<()> {
        log::logger().flush();
        self.sink.lock()?.close()
    }
}

fn builder(level: &str, target: Target) -> env_logger::Builder {
    let env = Env::default().default_filter_or(level_filter(level));
    let mut builder = env_logger::Builder::from_env(env);
    builder.target(target).format(|buf, record| {
        writeln!(
            buf,
            "[{} {:<5} {}] {}",
            buf.timestamp(),
            record.level(),
            record.target(),
            record.args()
        )
    });
    builder
}

fn is_watcher_target(target: &str) -> bool {
    WATCHER_TARGETS.iter().any(|watcher| {
        target
            .strip_prefix(watcher)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}

/// Global `log` backend installed by [`ServerLogger::init`].
struct ServerLog {
    /// Writes to stderr and the active file.
    file: env_logger::Logger,
    /// Writes to stderr only.
    console: env_logger::Logger,
    sink: LogSink,
}

impl ServerLog {
    /// Report what the writer did while appending the last record.
    ///
    /// Reporting may rotate again; events queued by these records wait for
    /// the next record rather than being drained here.
    fn report_writer_events(&self) {
        let Ok(events) = self.sink.take_events() else {
            return;
        };
        for event in events {
            self.file.log(
                &Record::builder()
                    .args(format_args!("{event}"))
                    .level(event.level())
                    .target(WRITER_TARGET)
                    .module_path_static(Some(WRITER_TARGET))
                    .build(),
            );
        }
    }
}

impl Log for ServerLog {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.file.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if is_watcher_target(record.target()) {
            self.console.log(record);
            return;
        }
        self.file.log(record);
        self.report_writer_events();
    }

    fn flush(&self) {
        self.file.flush();
        self.console.flush();
    }
}
