//! Append-only block log.
//!
//! Layout: a flat sequence of records, each `u32 LE length` followed by
//! that many bytes of encoded block. Every append is followed by
//! `sync_data`, so an acknowledged send survives a crash.
//!
//! A crash mid-append can leave a torn record at the tail. Opening the log
//! truncates it back to the last complete record; that record was never
//! acknowledged, so nothing accepted is lost. A failed append is cut back
//! the same way before the error is returned, so a retry starts from a
//! clean tail.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use memmap2::Mmap;
use tokio::io::AsyncWriteExt;

use super::{Sequencer, SequencerError};

const RECORD_PREFIX: usize = 4;

/// Parsed log file.
#[derive(Debug, Default)]
pub struct LogContents {
    /// Complete records, in append order.
    pub blocks: Vec<Bytes>,
    /// Byte length covered by complete records.
    pub valid_len: u64,
    /// Bytes past `valid_len` (a torn tail).
    pub torn_bytes: u64,
}

/// Read every complete record from a log file. A missing file reads as empty.
pub fn read_log(path: &Path) -> Result<LogContents, SequencerError> {
    let io_err = |source: io::Error| SequencerError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LogContents::default()),
        Err(e) => return Err(io_err(e)),
    };
    let len = file.metadata().map_err(io_err)?.len();
    if len == 0 {
        return Ok(LogContents::default());
    }

    // Safety: mapped read-only; the log is only ever appended by this
    // process, after this read has finished.
    let mmap = unsafe { Mmap::map(&file).map_err(io_err)? };

    let mut blocks = Vec::new();
    let mut offset = 0usize;
    while mmap.len() - offset >= RECORD_PREFIX {
        let mut prefix = [0u8; RECORD_PREFIX];
        prefix.copy_from_slice(&mmap[offset..offset + RECORD_PREFIX]);
        let record_len = u32::from_le_bytes(prefix) as usize;

        let start = offset + RECORD_PREFIX;
        if mmap.len() - start < record_len {
            break;
        }
        blocks.push(Bytes::copy_from_slice(&mmap[start..start + record_len]));
        offset = start + record_len;
    }

    Ok(LogContents {
        blocks,
        valid_len: offset as u64,
        torn_bytes: (mmap.len() - offset) as u64,
    })
}

/// Backend writing to an append-only log file.
pub struct FileSequencer {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    tip: Option<Bytes>,
    /// Length covered by acknowledged records. A failed append is cut
    /// back to this before the error is returned.
    committed_len: u64,
    /// Upcoming appends that write half a record and then fail.
    #[cfg(test)]
    torn_writes: u32,
}

impl FileSequencer {
    /// Open (or create) the log, repairing a torn tail.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SequencerError> {
        let path = path.into();
        let io_err = |source| SequencerError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let contents = read_log(&path)?;
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        if contents.torn_bytes > 0 {
            tracing::warn!(
                path = %path.display(),
                torn_bytes = contents.torn_bytes,
                "truncating torn record at end of block log"
            );
            file.set_len(contents.valid_len).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }

        tracing::debug!(
            path = %path.display(),
            blocks = contents.blocks.len(),
            "block log opened"
        );

        Ok(Self {
            tip: contents.blocks.last().cloned(),
            file: Some(tokio::fs::File::from_std(file)),
            committed_len: contents.valid_len,
            path,
            #[cfg(test)]
            torn_writes: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> SequencerError {
        SequencerError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Write one record and make it durable. `flush` surfaces errors from
    /// tokio's background write, which `sync_data` alone would not report.
    async fn append(&mut self, record: &[u8]) -> io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(io::Error::other("block log is closed"));
        };

        #[cfg(test)]
        if self.torn_writes > 0 {
            self.torn_writes -= 1;
            file.write_all(&record[..record.len() / 2]).await?;
            file.flush().await?;
            return Err(io::Error::other("injected torn write"));
        }

        file.write_all(record).await?;
        file.flush().await?;
        file.sync_data().await
    }

    /// Cut the log back to the last acknowledged record. If that fails the
    /// tail is unknown, so the log is closed and later sends are refused.
    async fn rollback(&mut self) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let len = self.committed_len;

        let truncated = async {
            file.set_len(len).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = truncated {
            tracing::error!(
                path = %self.path.display(),
                committed_len = len,
                error = %e,
                "failed to roll back block log; closing it"
            );
            self.file = None;
        }
    }
}

impl Sequencer for FileSequencer {
    async fn send(&mut self, block: Bytes) -> Result<(), SequencerError> {
        let record_len = u32::try_from(block.len()).map_err(|_| {
            SequencerError::Rejected(format!("block of {} bytes is too large", block.len()))
        })?;
        if self.file.is_none() {
            return Err(SequencerError::Closed);
        }

        let mut record = Vec::with_capacity(RECORD_PREFIX + block.len());
        record.extend_from_slice(&record_len.to_le_bytes());
        record.extend_from_slice(&block);

        if let Err(e) = self.append(&record).await {
            self.rollback().await;
            return Err(self.io_err(e));
        }

        self.committed_len += record.len() as u64;
        self.tip = Some(block);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SequencerError> {
        if let Some(mut file) = self.file.take() {
            let flushed = async {
                file.flush().await?;
                file.sync_all().await
            }
            .await;
            flushed.map_err(|e| self.io_err(e))?;
        }
        Ok(())
    }

    async fn tip(&mut self) -> Result<Option<Bytes>, SequencerError> {
        Ok(self.tip.clone())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
