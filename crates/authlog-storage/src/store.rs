//! Append-only, date-partitioned log files.
//!
//! Entries are written as one JSON object per line to
//! `<dir>/auth-YYYY-MM-DD.json`, where the date is the UTC day of the append.
//! Files are never rewritten; the newest line of a file is its last one.
//!
//! All appends through one [`LogStore`] are serialized by a mutex that also
//! caches the open handle for the current day, and each entry is written
//! with a single `write_all` on a file opened in append mode.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use authlog_core::LogEntry;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;

/// File name prefix of every partition.
pub const FILE_PREFIX: &str = "auth-";
/// File name suffix of every partition.
pub const FILE_SUFFIX: &str = ".json";

/// Handle to a directory of daily log files.
///
/// Cheap to clone; clones share the append lock.
#[derive(Clone)]
pub struct LogStore {
    inner: Arc<Inner>,
}

struct Inner {
    dir: PathBuf,
    writer: Mutex<Option<OpenPartition>>,
}

struct OpenPartition {
    date: NaiveDate,
    file: File,
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("dir", &self.inner.dir)
            .finish()
    }
}

impl LogStore {
    /// Creates a store over `dir`. Nothing is touched on disk until the
    /// first append.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                dir: dir.into(),
                writer: Mutex::new(None),
            }),
        }
    }

    /// The directory holding the partitions.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Path of the partition for a given UTC date.
    pub fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.inner.dir.join(partition_file_name(date))
    }

    /// Appends an entry to today's partition.
    ///
    /// Returns the path written to.
    pub fn append(&self, entry: &LogEntry) -> Result<PathBuf> {
        self.append_on(entry, Utc::now().date_naive())
    }

    /// Appends an entry to the partition of `date`.
    pub(crate) fn append_on(&self, entry: &LogEntry, date: NaiveDate) -> Result<PathBuf> {
        let mut line = entry.to_json_line()?;
        line.push('\n');

        let mut writer = self.inner.writer.lock();
        let path = self.partition_path(date);

        // A cached handle to a file that was deleted would write to an
        // unlinked inode, so reopen when the path is gone.
        if writer.as_ref().map(|p| p.date) != Some(date) || !path.exists() {
            fs::create_dir_all(&self.inner.dir)?;
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            debug!(path = %path.display(), "Opened log partition");
            *writer = Some(OpenPartition { date, file });
        }

        let result = match writer.as_mut() {
            Some(partition) => partition.file.write_all(line.as_bytes()),
            None => Err(io::Error::other("log partition not open")),
        };

        if let Err(e) = result {
            // Reopen on the next append in case the file was removed underneath us.
            *writer = None;
            return Err(e.into());
        }

        Ok(path)
    }

    /// Returns up to `limit` entries, newest first.
    ///
    /// Partitions are scanned newest date first and each file from its last
    /// line backwards, stopping as soon as `limit` entries are collected.
    /// Lines that fail to decode, including lines that are not valid UTF-8,
    /// are skipped one at a time. A missing directory yields an empty result.
    pub fn recent(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let mut entries = Vec::new();
        if limit == 0 {
            return Ok(entries);
        }

        for path in self.files()? {
            let content = match fs::read(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read log partition");
                    continue;
                }
            };

            let lines: Vec<&[u8]> = content.split(|&b| b == b'\n').collect();
            for (index, line) in lines.iter().enumerate().rev() {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }

                match serde_json::from_slice::<LogEntry>(line) {
                    Ok(entry) => {
                        entries.push(entry);
                        if entries.len() >= limit {
                            return Ok(entries);
                        }
                    }
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            line = index + 1,
                            error = %e,
                            "Failed to parse log entry"
                        );
                    }
                }
            }
        }

        Ok(entries)
    }

    /// Lists partition files, newest date first.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let read_dir = match fs::read_dir(&self.inner.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name();
            let name = name.to_string_lossy();
            if is_partition_name(&name) {
                files.push(dir_entry.path());
            }
        }

        // Dates sort lexicographically.
        files.sort();
        files.reverse();
        Ok(files)
    }

    /// The newest partition, if any exists.
    pub fn latest_file(&self) -> Result<Option<PathBuf>> {
        Ok(self.files()?.into_iter().next())
    }
}

/// `auth-2025-01-15.json`
pub fn partition_file_name(date: NaiveDate) -> String {
    format!("{}{}{}", FILE_PREFIX, date.format("%Y-%m-%d"), FILE_SUFFIX)
}

fn is_partition_name(name: &str) -> bool {
    name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX)
}
