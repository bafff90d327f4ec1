//! Append-only JSON-lines audit journal.
//!
//! `Journal::open` creates the file if missing and starts a writer thread. The
//! desk hands events over through a bounded queue, so a slow disk never blocks
//! order handling: when the queue is full the event is refused and counted.
//!
//! When the active file would grow past `max_bytes` it is renamed to `<path>.1`,
//! older rotations shift up by one, and at most `max_files` rotated files are
//! kept. `replay` reads the rotations oldest first, then the active file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread;
use std::time::Duration;

use desk_core::{AuditEvent, EventSink, SinkError};
use thiserror::Error;

use crate::config::{DeskConfig, JOURNAL_MAX_BYTES_DEFAULT, JOURNAL_MAX_FILES_DEFAULT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalConfig {
    pub max_bytes: u64,
    pub max_files: usize,
    pub queue_capacity: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            max_bytes: JOURNAL_MAX_BYTES_DEFAULT,
            max_files: JOURNAL_MAX_FILES_DEFAULT,
            queue_capacity: 1024,
        }
    }
}

impl JournalConfig {
    pub fn from_desk(config: &DeskConfig) -> Self {
        Self {
            max_bytes: config.journal_max_bytes,
            max_files: config.journal_max_files,
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal queue full")]
    QueueFull,
    #[error("journal writer unavailable: {0}")]
    WriterUnavailable(String),
    #[error("journal parse error in {file}:{line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },
    #[error("journal config error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

enum JournalWrite {
    Event(Box<AuditEvent>),
    Flush(mpsc::Sender<Result<(), JournalError>>),
    Shutdown,
}

pub struct Journal {
    path: PathBuf,
    config: JournalConfig,
    writer_tx: SyncSender<JournalWrite>,
    writer_handle: Option<thread::JoinHandle<()>>,
    queue_depth: Arc<AtomicUsize>,
    write_errors: Arc<AtomicU64>,
    rotations: Arc<AtomicU64>,
}

impl Journal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        Self::open_with_config(path, JournalConfig::default())
    }

    pub fn open_with_config(
        path: impl AsRef<Path>,
        config: JournalConfig,
    ) -> Result<Self, JournalError> {
        if config.queue_capacity == 0 {
            return Err(JournalError::Config("queue_capacity must be >= 1".to_string()));
        }
        if config.max_files == 0 {
            return Err(JournalError::Config("max_files must be >= 1".to_string()));
        }
        if config.max_bytes == 0 {
            return Err(JournalError::Config("max_bytes must be >= 1".to_string()));
        }

        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;

        let (tx, rx) = mpsc::sync_channel(config.queue_capacity);
        let queue_depth = Arc::new(AtomicUsize::new(0));
        let write_errors = Arc::new(AtomicU64::new(0));
        let rotations = Arc::new(AtomicU64::new(0));

        let writer = Writer {
            path: path.clone(),
            config,
            size: file.metadata()?.len(),
            file: Some(file),
            queue_depth: Arc::clone(&queue_depth),
            write_errors: Arc::clone(&write_errors),
            rotations: Arc::clone(&rotations),
        };
        let handle = thread::Builder::new()
            .name("desk-journal".to_string())
            .spawn(move || writer.run(rx))?;

        Ok(Self {
            path,
            config,
            writer_tx: tx,
            writer_handle: Some(handle),
            queue_depth,
            write_errors,
            rotations,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn write_errors_total(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    pub fn rotations_total(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    pub fn append(&self, event: &AuditEvent) -> Result<(), JournalError> {
        match self
            .writer_tx
            .try_send(JournalWrite::Event(Box::new(event.clone())))
        {
            Ok(()) => {
                self.queue_depth.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.write_errors.fetch_add(1, Ordering::Relaxed);
                Err(match err {
                    TrySendError::Full(_) => JournalError::QueueFull,
                    TrySendError::Disconnected(_) => {
                        JournalError::WriterUnavailable("writer channel closed".to_string())
                    }
                })
            }
        }
    }

    /// Waits until everything queued so far is written and synced.
    pub fn flush(&self) -> Result<(), JournalError> {
        let (tx, rx) = mpsc::channel();
        self.writer_tx
            .send(JournalWrite::Flush(tx))
            .map_err(|_| JournalError::WriterUnavailable("writer channel closed".to_string()))?;

        rx.recv_timeout(Duration::from_secs(5))
            .map_err(|_| JournalError::WriterUnavailable("flush timeout".to_string()))?
    }

    /// Existing journal files, oldest first; the active file is last.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = (1..=self.config.max_files)
            .rev()
            .map(|index| rotated_path(&self.path, index))
            .filter(|path| path.exists())
            .collect();
        if self.path.exists() {
            files.push(self.path.clone());
        }
        files
    }

    pub fn replay(&self) -> Result<Vec<AuditEvent>, JournalError> {
        let mut events = Vec::new();
        for path in self.files() {
            let reader = BufReader::new(File::open(&path)?);
            for (idx, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let event = serde_json::from_str::<AuditEvent>(&line).map_err(|err| {
                    JournalError::Parse {
                        file: path.display().to_string(),
                        line: idx + 1,
                        message: err.to_string(),
                    }
                })?;
                events.push(event);
            }
        }
        Ok(events)
    }
}

impl EventSink for Journal {
    fn record(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.append(event).map_err(|err| SinkError::new(err.to_string()))
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        let _ = self.writer_tx.send(JournalWrite::Shutdown);
        if let Some(handle) = self.writer_handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn rotated_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

struct Writer {
    path: PathBuf,
    config: JournalConfig,
    file: Option<File>,
    size: u64,
    queue_depth: Arc<AtomicUsize>,
    write_errors: Arc<AtomicU64>,
    rotations: Arc<AtomicU64>,
}

impl Writer {
    fn run(mut self, rx: Receiver<JournalWrite>) {
        loop {
            match rx.recv() {
                Ok(JournalWrite::Event(event)) => {
                    if let Err(err) = self.write(&event) {
                        self.write_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(target: "desk", seq = event.seq, error = %err, "journal write failed");
                    }
                    self.queue_depth.fetch_sub(1, Ordering::Relaxed);
                }
                Ok(JournalWrite::Flush(reply)) => {
                    let result = match self.file.as_ref() {
                        Some(file) => file.sync_data().map_err(JournalError::Io),
                        None => Err(JournalError::WriterUnavailable(
                            "journal file not open".to_string(),
                        )),
                    };
                    let _ = reply.send(result);
                }
                Ok(JournalWrite::Shutdown) | Err(_) => break,
            }
        }
    }

    fn write(&mut self, event: &AuditEvent) -> Result<(), JournalError> {
        let mut line = serde_json::to_string(event).map_err(|err| JournalError::Parse {
            file: self.path.display().to_string(),
            line: 0,
            message: err.to_string(),
        })?;
        line.push('\n');
        let len = line.len() as u64;

        if self.size > 0 && self.size + len > self.config.max_bytes {
            self.rotate()?;
        }
        if self.file.is_none() {
            let file = open_append(&self.path)?;
            self.size = file.metadata()?.len();
            self.file = Some(file);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(line.as_bytes())?;
            self.size += len;
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), JournalError> {
        if let Some(file) = self.file.take() {
            file.sync_data()?;
        }
        let oldest = rotated_path(&self.path, self.config.max_files);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..self.config.max_files).rev() {
            let from = rotated_path(&self.path, index);
            if from.exists() {
                fs::rename(&from, rotated_path(&self.path, index + 1))?;
            }
        }
        fs::rename(&self.path, rotated_path(&self.path, 1))?;
        self.size = 0;
        self.rotations.fetch_add(1, Ordering::Relaxed);
        tracing::info!(target: "desk", path = %self.path.display(), "journal rotated");
        Ok(())
    }
}
