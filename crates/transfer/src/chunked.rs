use std::path::{Path, PathBuf};

use streamfile_protocol::Chunk;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};

/// Number of chunks a file of `len` bytes is sliced into.
///
/// An empty file still produces one (empty) chunk.
pub fn chunk_count(len: u64, chunk_size: usize) -> u64 {
    if len == 0 {
        1
    } else {
        len.div_ceil(chunk_size.max(1) as u64)
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a file in fixed-size blocks and numbers them from 1.
///
/// The file length is sampled when the reader is opened; the block that
/// reaches that length is flagged last. An empty file yields exactly one
/// empty last chunk.
pub struct ChunkReader {
    file: tokio::fs::File,
    chunk_size: usize,
    file_size: u64,
    offset: u64,
    next_id: u64,
    done: bool,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`](crate::DEFAULT_CHUNK_SIZE) is used.
    pub async fn open(path: &Path, chunk_size: usize) -> std::io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let file_size = file.metadata().await?.len();
        let chunk_size = if chunk_size == 0 {
            crate::DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            chunk_size,
            file_size,
            offset: 0,
            next_id: 1,
            done: false,
        })
    }

    /// Reads the next chunk. Returns `None` once the last chunk was produced.
    pub async fn next_chunk(&mut self) -> std::io::Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }

        let remaining = self.file_size - self.offset;
        let read_size = remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; read_size];
        self.file.read_exact(&mut buf).await?;

        self.offset += read_size as u64;
        let is_last = self.offset >= self.file_size;
        self.done = is_last;

        let chunk = Chunk::new(self.next_id, buf, is_last);
        self.next_id += 1;
        Ok(Some(chunk))
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes read so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of chunks this reader produces in total.
    pub fn total_chunks(&self) -> u64 {
        chunk_count(self.file_size, self.chunk_size)
    }
}

// ---------------------------------------------------------------------------
// ChunkWriter
// ---------------------------------------------------------------------------

/// Errors raised while appending chunks.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk {id} arrived after the last chunk")]
    AfterLast { id: u64 },

    #[error("chunk {id} arrived after the destination was closed")]
    Closed { id: u64 },

    #[error("chunk out of sequence: expected id {expected}, got {got}")]
    OutOfSequence { expected: u64, got: u64 },

    #[error("chunk {id} is {len} bytes (max {max})")]
    TooLarge { id: u64, len: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Appends chunks to a destination file in arrival order.
///
/// Enforces the chunk sequence (ids 1, 2, 3, ... with no gaps) and closes
/// the destination as soon as the last-flagged chunk is written.
pub struct ChunkWriter {
    out: Option<BufWriter<tokio::fs::File>>,
    path: PathBuf,
    next_id: u64,
    max_chunk_size: usize,
    bytes_written: u64,
    complete: bool,
}

impl ChunkWriter {
    /// Creates (or truncates) `path` and prepares it for appending.
    pub async fn create(path: &Path, max_chunk_size: usize) -> std::io::Result<Self> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Self {
            out: Some(BufWriter::new(file)),
            path: path.to_path_buf(),
            next_id: 1,
            max_chunk_size,
            bytes_written: 0,
            complete: false,
        })
    }

    /// Writes a chunk. Returns `true` if it was the last one.
    pub async fn append(&mut self, chunk: &Chunk) -> Result<bool, ChunkError> {
        if self.complete {
            return Err(ChunkError::AfterLast { id: chunk.id });
        }
        if chunk.id != self.next_id {
            return Err(ChunkError::OutOfSequence {
                expected: self.next_id,
                got: chunk.id,
            });
        }
        if chunk.len() > self.max_chunk_size {
            return Err(ChunkError::TooLarge {
                id: chunk.id,
                len: chunk.len(),
                max: self.max_chunk_size,
            });
        }
        let Some(out) = self.out.as_mut() else {
            return Err(ChunkError::Closed { id: chunk.id });
        };

        out.write_all(&chunk.content).await?;
        self.bytes_written += chunk.len() as u64;
        self.next_id += 1;

        if chunk.is_last {
            self.close().await?;
            self.complete = true;
        }
        Ok(chunk.is_last)
    }

    /// Flushes and closes the destination. Safe to call more than once.
    pub async fn close(&mut self) -> std::io::Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush().await?;
            out.into_inner().sync_all().await?;
        }
        Ok(())
    }

    /// `true` once the last-flagged chunk has been written.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_open(&self) -> bool {
        self.out.is_some()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn chunks_written(&self) -> u64 {
        self.next_id - 1
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
