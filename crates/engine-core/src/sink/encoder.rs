use csv::{QuoteStyle, Terminator, Writer, WriterBuilder};
use flate2::{Compression, write::GzEncoder};
use model::core::value::Value;
use std::{
    io::{self, Write},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// Compressed bytes waiting to be shipped. Shared between the gzip stream
/// that fills it and the encoder that drains it in parts.
#[derive(Clone, Default)]
struct PartBuffer(Arc<Mutex<Vec<u8>>>);

impl PartBuffer {
    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for PartBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Gzip stream under the CSV writer; counts the CSV bytes it is fed.
struct Compressor {
    gz: GzEncoder<PartBuffer>,
    raw_bytes: u64,
}

impl Write for Compressor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.gz.write(buf)?;
        self.raw_bytes += n as u64;
        Ok(n)
    }

    /// Only the CSV writer's own buffer is pushed down; the gzip stream is
    /// not sync-flushed, which would cost compression.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// What is left once the stream is closed.
#[derive(Debug)]
pub struct EncodedTail {
    /// Compressed bytes not yet taken, gzip trailer included.
    pub bytes: Vec<u8>,
    /// Uncompressed CSV size of the whole stream.
    pub raw_bytes: u64,
}

/// Streams rows as quote-minimal, CRLF-terminated CSV through gzip.
///
/// Compressed output accumulates in memory only until a full part is
/// available; [`take_part`](Self::take_part) hands it off.
pub struct CsvGzipEncoder {
    csv: Writer<Compressor>,
    out: PartBuffer,
    rows: u64,
}

impl CsvGzipEncoder {
    pub fn new(level: Compression) -> Self {
        let out = PartBuffer::default();
        let csv = WriterBuilder::new()
            .quote_style(QuoteStyle::Necessary)
            .terminator(Terminator::CRLF)
            .has_headers(false)
            .from_writer(Compressor {
                gz: GzEncoder::new(out.clone(), level),
                raw_bytes: 0,
            });
        Self { csv, out, rows: 0 }
    }

    pub fn write_header(&mut self, columns: &[String]) -> io::Result<()> {
        self.csv.write_record(columns)?;
        Ok(())
    }

    pub fn write_row(&mut self, row: &[Value]) -> io::Result<()> {
        self.csv.write_record(row.iter().map(Value::to_text))?;
        self.rows += 1;
        Ok(())
    }

    /// Compressed bytes produced so far and not yet taken.
    pub fn buffered(&self) -> usize {
        self.out.lock().len()
    }

    /// Removes exactly `part_size` compressed bytes once that many are
    /// buffered.
    pub fn take_part(&mut self, part_size: usize) -> Option<Vec<u8>> {
        let mut buf = self.out.lock();
        if part_size == 0 || buf.len() < part_size {
            return None;
        }
        let rest = buf.split_off(part_size);
        Some(std::mem::replace(&mut *buf, rest))
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flushes pending CSV and the gzip trailer, returning every byte not
    /// yet taken.
    pub fn finish(self) -> io::Result<EncodedTail> {
        let compressor = self.csv.into_inner().map_err(|err| err.into_error())?;
        let raw_bytes = compressor.raw_bytes;
        compressor.gz.finish()?;
        let bytes = std::mem::take(&mut *self.out.lock());
        Ok(EncodedTail { bytes, raw_bytes })
    }
}
