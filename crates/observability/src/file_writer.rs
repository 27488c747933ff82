//! The shared `counts.jsonl` log.
//!
//! `counts record`, `counts squash` and the long-running squash worker all
//! append to the same file, often at the same moment: a cron-driven squash
//! pass can overlap a bulk import. Every event is handed to the file as one
//! unbuffered append, so lines from different processes never splice into
//! each other and `tail -f` sees each event as soon as it is logged.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

/// `~/.ureport/logs/counts.jsonl`, or `./.ureport/...` without a home directory.
pub fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ureport")
        .join("logs")
        .join("counts.jsonl")
}

/// Append handle on the counts log, cloned into every tracing event.
#[derive(Clone)]
pub struct JsonlAppender {
    file: Arc<Mutex<File>>,
    path: Arc<PathBuf>,
}

impl JsonlAppender {
    /// Open `path` for appending, creating the log directory on first use.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: Arc::new(path.to_path_buf()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl io::Write for JsonlAppender {
    // The fmt layer renders an event into one buffer; it goes out in a
    // single O_APPEND write so threads and processes don't interleave.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.lock().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for JsonlAppender {
    type Writer = JsonlAppender;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
