use std::ffi::OsString;
use std::fmt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;

use super::Record;
use super::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Read,
    Write,
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreMode::Read => "reading",
            StoreMode::Write => "writing",
        })
    }
}

enum Slot {
    Reader(BufReader<File>),
    Writer(BufWriter<File>),
    Closed,
    Unavailable(String),
}

/// A fixed set of line-oriented record files `<base>0 .. <base>N-1`, all
/// opened in the same mode for the store's lifetime.
///
/// Every partition sits behind its own lock, so tasks sharing the store
/// through an `Arc` only serialise when they touch the same index.
pub struct PartitionedStore {
    base: PathBuf,
    mode: StoreMode,
    slots: Vec<Mutex<Slot>>,
}

/// Path of partition `index` of the store rooted at `base`.
pub fn partition_path(base: &Path, index: usize) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(index.to_string());
    PathBuf::from(name)
}

impl PartitionedStore {
    /// Opens all partitions. Write mode truncates existing files. A
    /// partition that cannot be opened is logged and every later operation
    /// on it fails with `StoreError::Unavailable`.
    pub async fn open(base: impl Into<PathBuf>, partitions: usize, mode: StoreMode) -> Self {
        let base = base.into();
        let mut slots = Vec::with_capacity(partitions);
        for index in 0..partitions {
            let path = partition_path(&base, index);
            let opened = match mode {
                StoreMode::Read => File::open(&path).await.map(|f| Slot::Reader(BufReader::new(f))),
                StoreMode::Write => OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)
                    .await
                    .map(|f| Slot::Writer(BufWriter::new(f))),
            };
            let slot = opened.unwrap_or_else(|err| {
                log::error!("cannot open {} for {}: {}", path.display(), mode, err);
                Slot::Unavailable(err.to_string())
            });
            slots.push(Mutex::new(slot));
        }
        log::debug!("opened {} partitions of {} for {}", partitions, base.display(), mode);
        PartitionedStore { base, mode, slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn path(&self, index: usize) -> PathBuf {
        partition_path(&self.base, index)
    }

    /// Fails with the first partition that could not be opened.
    pub async fn ensure_open(&self) -> Result<(), StoreError> {
        for index in 0..self.slots.len() {
            if let Slot::Unavailable(reason) = &*self.slots[index].lock().await {
                return Err(self.unavailable(index, reason));
            }
        }
        Ok(())
    }

    pub async fn write(&self, index: usize, record: &Record) -> Result<(), StoreError> {
        self.write_all(index, std::slice::from_ref(record)).await
    }

    /// Appends `records` to partition `index`. Nothing is written unless
    /// every record can be encoded.
    pub async fn write_all(&self, index: usize, records: &[Record]) -> Result<(), StoreError> {
        self.check(index, StoreMode::Write)?;
        for record in records {
            check_storable(record)?;
        }
        let mut slot = self.slots[index].lock().await;
        let writer = match &mut *slot {
            Slot::Writer(writer) => writer,
            Slot::Unavailable(reason) => return Err(self.unavailable(index, reason)),
            Slot::Closed => return Err(StoreError::Closed { index }),
            Slot::Reader(_) => return Err(StoreError::WrongMode { index, wanted: StoreMode::Write }),
        };
        let mut line = String::new();
        for record in records {
            line.clear();
            line.push_str(&record.key);
            line.push(' ');
            line.push_str(&record.value);
            line.push('\n');
            writer
                .write_all(line.as_bytes())
                .await
                .map_err(|source| StoreError::Io { index, source })?;
        }
        Ok(())
    }

    /// Reads the next record of partition `index`, `None` once the partition
    /// is exhausted or closed. A malformed line closes the partition.
    pub async fn read(&self, index: usize) -> Result<Option<Record>, StoreError> {
        self.check(index, StoreMode::Read)?;
        let mut slot = self.slots[index].lock().await;
        let reader = match &mut *slot {
            Slot::Reader(reader) => reader,
            Slot::Closed => return Ok(None),
            Slot::Unavailable(reason) => return Err(self.unavailable(index, reason)),
            Slot::Writer(_) => return Err(StoreError::WrongMode { index, wanted: StoreMode::Read }),
        };
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(|source| StoreError::Io { index, source })?;
        if n == 0 {
            return Ok(None);
        }
        match parse_line(&line) {
            Some(record) => Ok(Some(record)),
            None => {
                *slot = Slot::Closed;
                Err(StoreError::Malformed {
                    index,
                    line: line.trim_end_matches(['\r', '\n']).to_string(),
                })
            }
        }
    }

    /// Drains partition `index`. Later reads return `None`.
    pub async fn read_all(&self, index: usize) -> Result<Vec<Record>, StoreError> {
        let mut records = Vec::new();
        while let Some(record) = self.read(index).await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Releases partition `index` early, flushing it first in write mode.
    pub async fn close(&self, index: usize) -> Result<(), StoreError> {
        if index >= self.slots.len() {
            return Err(StoreError::OutOfRange { index, len: self.slots.len() });
        }
        let mut slot = self.slots[index].lock().await;
        match &mut *slot {
            Slot::Writer(writer) => {
                writer.flush().await.map_err(|source| StoreError::Io { index, source })?;
            }
            Slot::Unavailable(_) => return Ok(()),
            Slot::Reader(_) | Slot::Closed => {}
        }
        *slot = Slot::Closed;
        Ok(())
    }

    /// Drops everything written to partition `index` so far, buffered bytes
    /// included. The partition stays in the state it was in, only emptied.
    pub async fn discard(&self, index: usize) -> Result<(), StoreError> {
        self.check(index, StoreMode::Write)?;
        let io = |source: std::io::Error| StoreError::Io { index, source };
        let mut slot = self.slots[index].lock().await;
        match std::mem::replace(&mut *slot, Slot::Closed) {
            Slot::Writer(writer) => {
                let mut file = writer.into_inner();
                file.set_len(0).await.map_err(io)?;
                file.seek(SeekFrom::Start(0)).await.map_err(io)?;
                *slot = Slot::Writer(BufWriter::new(file));
            }
            Slot::Closed => {
                File::create(self.path(index)).await.map_err(io)?;
            }
            other => *slot = other,
        }
        log::debug!("discarded partition {} of {}", index, self.base.display());
        Ok(())
    }

    /// Flushes every writable partition. Consumers must not open the same
    /// files before this returns.
    pub async fn finish(&self) -> Result<(), StoreError> {
        for (index, slot) in self.slots.iter().enumerate() {
            if let Slot::Writer(writer) = &mut *slot.lock().await {
                writer.flush().await.map_err(|source| StoreError::Io { index, source })?;
            }
        }
        Ok(())
    }

    fn check(&self, index: usize, wanted: StoreMode) -> Result<(), StoreError> {
        if index >= self.slots.len() {
            return Err(StoreError::OutOfRange { index, len: self.slots.len() });
        }
        if self.mode != wanted {
            return Err(StoreError::WrongMode { index, wanted });
        }
        Ok(())
    }

    fn unavailable(&self, index: usize, reason: &str) -> StoreError {
        StoreError::Unavailable {
            index,
            path: self.path(index),
            reason: reason.to_string(),
        }
    }
}

fn check_storable(record: &Record) -> Result<(), StoreError> {
    let separator = |c: char| matches!(c, ' ' | '\r' | '\n');
    let reason = if record.key.contains(separator) {
        "key contains a space or line break"
    } else if record.value.contains(separator) {
        "value contains a space or line break"
    } else {
        return Ok(());
    };
    Err(StoreError::InvalidRecord { record: record.clone(), reason })
}

fn parse_line(line: &str) -> Option<Record> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);
    let (key, value) = line.split_once(' ')?;
    Some(Record::new(key, value))
}
