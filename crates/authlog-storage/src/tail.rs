//! Incremental reading of the newest partition.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use authlog_core::LogEntry;
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::LogStore;

/// Follows the newest log partition, yielding entries as they are appended.
///
/// Moves on to a newer partition when one appears, after draining the
/// remainder of the previous one. A trailing line without its newline is
/// held back until it is complete.
#[derive(Debug)]
pub struct LogTail {
    store: LogStore,
    current: Option<PathBuf>,
    offset: u64,
    partial: Vec<u8>,
}

impl LogTail {
    /// Starts after everything already written to the newest partition.
    pub fn from_end(store: LogStore) -> Result<Self> {
        let current = store.latest_file()?;
        let offset = match &current {
            Some(path) => match std::fs::metadata(path) {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
                Err(e) => return Err(e.into()),
            },
            None => 0,
        };

        Ok(Self {
            store,
            current,
            offset,
            partial: Vec::new(),
        })
    }

    /// Starts at the beginning of the newest partition.
    pub fn from_start(store: LogStore) -> Self {
        Self {
            store,
            current: None,
            offset: 0,
            partial: Vec::new(),
        }
    }

    /// The partition currently followed.
    pub fn current_file(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    /// Returns entries appended since the last poll, oldest first.
    pub fn poll(&mut self) -> Result<Vec<LogEntry>> {
        let mut entries = Vec::new();

        if let Some(path) = self.current.clone() {
            self.read_new(&path, &mut entries)?;
        }

        let latest = self.store.latest_file()?;
        if latest.is_some() && latest != self.current {
            debug!(path = ?latest, "Following new log partition");
            self.current = latest;
            self.offset = 0;
            self.partial.clear();

            if let Some(path) = self.current.clone() {
                self.read_new(&path, &mut entries)?;
            }
        }

        Ok(entries)
    }

    fn read_new(&mut self, path: &Path, entries: &mut Vec<LogEntry>) -> Result<()> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        if len < self.offset {
            // Truncated or replaced: start over.
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let read = file.read_to_end(&mut self.partial)?;
        self.offset += read as u64;

        let Some(end) = self.partial.iter().rposition(|b| *b == b'\n') else {
            return Ok(());
        };
        let complete: Vec<u8> = self.partial.drain(..=end).collect();

        for line in String::from_utf8_lossy(&complete).lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to parse log entry"),
            }
        }

        Ok(())
    }
}
