use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Byte-counting sink behind the gzip stream. Reset between batches rather
/// than reallocated, so a long-lived client reuses one buffer.
pub trait EncodedBuffer: Write + Send {
    /// Bytes written so far.
    fn size(&self) -> u64;

    /// Hands out the encoded bytes accumulated since the last reset.
    fn take(&mut self) -> io::Result<Vec<u8>>;

    /// Rewinds the buffer for the next batch.
    fn reset(&mut self) -> io::Result<()>;
}

/// Heap-backed buffer, the default.
#[derive(Debug, Default)]
pub struct MemBuffer {
    buf: Vec<u8>,
}

impl MemBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }
}

impl Write for MemBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl EncodedBuffer for MemBuffer {
    fn size(&self) -> u64 {
        self.buf.len() as u64
    }

    fn take(&mut self) -> io::Result<Vec<u8>> {
        Ok(std::mem::take(&mut self.buf))
    }

    fn reset(&mut self) -> io::Result<()> {
        self.buf.clear();
        Ok(())
    }
}

/// File-backed buffer for batch limits large enough that heap buffering is
/// wasteful. The file is overwritten in place between batches.
#[derive(Debug)]
pub struct FileBuffer {
    file: File,
    size: u64,
}

impl FileBuffer {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            file: File::create(path)?,
            size: 0,
        })
    }
}

impl Write for FileBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let written = self.file.write(data)?;
        self.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl EncodedBuffer for FileBuffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn take(&mut self) -> io::Result<Vec<u8>> {
        self.file.flush()?;
        self.file.seek(SeekFrom::Start(0))?;
        let mut out = Vec::with_capacity(self.size as usize);
        (&mut self.file).take(self.size).read_to_end(&mut out)?;
        Ok(out)
    }

    fn reset(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.size = 0;
        Ok(())
    }
}

/// Streams JSON values through gzip into an [`EncodedBuffer`], one value per
/// line, and reports when either the message count or the compressed byte
/// total crosses its threshold.
pub struct BufferedEncoder {
    gz: Option<GzEncoder<Box<dyn EncodedBuffer>>>,
    messages: usize,
    max_batch_size: usize,
    max_batch_bytes: u64,
}

impl BufferedEncoder {
    pub fn new(max_batch_size: usize, max_batch_bytes: u64, buf: Box<dyn EncodedBuffer>) -> Self {
        Self {
            gz: Some(GzEncoder::new(buf, Compression::default())),
            messages: 0,
            max_batch_size,
            max_batch_bytes,
        }
    }

    pub fn messages(&self) -> usize {
        self.messages
    }

    /// Appends one NDJSON line. Returns `true` when the batch should flush.
    ///
    /// The byte threshold is checked against what gzip has flushed to the
    /// buffer so far, so it trails the uncompressed input slightly.
    pub fn push<T: Serialize>(&mut self, value: &T) -> io::Result<bool> {
        let gz = self
            .gz
            .as_mut()
            .ok_or_else(|| io::Error::other("encoder is poisoned"))?;

        serde_json::to_writer(&mut *gz, value)?;
        gz.write_all(b"\n")?;
        self.messages += 1;

        Ok(self.messages >= self.max_batch_size || gz.get_ref().size() >= self.max_batch_bytes)
    }

    /// Closes the gzip stream, hands back the compressed payload, and rearms
    /// the encoder over the same (reset) buffer.
    pub fn take_payload(&mut self) -> io::Result<Vec<u8>> {
        let gz = self
            .gz
            .take()
            .ok_or_else(|| io::Error::other("encoder is poisoned"))?;

        let mut buf = gz.finish()?;
        let payload = buf.take()?;
        buf.reset()?;
        self.gz = Some(GzEncoder::new(buf, Compression::default()));
        self.messages = 0;
        Ok(payload)
    }
}
