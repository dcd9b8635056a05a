//! Logging setup — structured logs to a rotated file in the data directory.
//!
//! The REPL owns stdout, so nothing is logged to the terminal. `RUST_LOG`
//! overrides the default filter.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "toolmesh=info,warn";

/// Number of rotated log files kept next to the live one.
const KEEP_ROTATED: u32 = 3;

/// Return the platform-standard data directory for toolmesh.
///
/// Falls back to `~/.toolmesh/` when the platform has no data directory.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("toolmesh");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".toolmesh")
}

/// Install the global subscriber, writing to `<data_dir>/toolmesh.log`.
///
/// Existing logs are rotated first (`toolmesh.log` → `.1` → `.2` → `.3`).
/// Returns the path of the live log file.
pub fn init_tracing() -> io::Result<PathBuf> {
    init_tracing_in(&data_dir())
}

/// Same as [`init_tracing`], rooted at an explicit directory.
pub fn init_tracing_in(log_dir: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join("toolmesh.log");
    rotate_log_file(&log_path, KEEP_ROTATED);

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .map_err(|e| io::Error::other(format!("tracing already initialized: {e}")))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== toolmesh starting ==="
    );

    Ok(log_path)
}

/// Rotate `base` → `base.1` → … → `base.{keep}`; the oldest is deleted.
///
/// Gaps in the chain are skipped.
pub fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A file writer that flushes after every write, so each log line is on
/// disk even if the process is killed mid-session.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<Mutex<File>>,
}

impl FlushingWriter {
    fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| io::Error::other(format!("lock poisoned: {e}")))?;
        let n = io::Write::write(&mut *f, buf)?;
        io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| io::Error::other(format!("lock poisoned: {e}")))?;
        io::Write::flush(&mut *f)
    }
}

impl<'a> fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
