use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Record;

/// Encode one record as `[u32 len][bincode][u32 crc32]`.
fn encode_record(writer: &mut impl Write, record: &Record) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read `buf.len()` bytes. `Ok(false)` means the file ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// A length prefix beyond this is corruption, not a record.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Decode the next record and its frame size. `Ok(None)` marks the end of the
/// usable log: a clean EOF, a truncated tail, a CRC mismatch or an
/// undecodable payload.
fn decode_record(reader: &mut impl Read) -> io::Result<Option<(Record, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload)
        .ok()
        .map(|record| (record, 8 + len as u64)))
}

/// The open log file. Under test it can be told to tear a write halfway.
struct LogFile {
    file: File,
    #[cfg(test)]
    fail_writes_after: Option<usize>,
}

impl LogFile {
    fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            file: OpenOptions::new().create(true).append(true).open(path)?,
            #[cfg(test)]
            fail_writes_after: None,
        })
    }

    #[cfg(test)]
    fn injected_fault(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.fail_writes_after {
            Some(0) => {
                self.fail_writes_after = None;
                self.file.write_all(&buf[..buf.len() / 2])?;
                Err(io::Error::other("injected write failure"))
            }
            Some(n) => {
                self.fail_writes_after = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        #[cfg(test)]
        {
            self.injected_fault(buf)?;
        }
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Append-only write-ahead log backing the in-memory store.
///
/// Appends go in batches. A batch that fails anywhere is cut back off the
/// file, so the log only ever holds whole frames that were acknowledged. A
/// crash mid-append can still leave a partial trailing frame; replay cuts the
/// file back to the last intact frame before anything new is appended.
pub struct Wal {
    writer: BufWriter<LogFile>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(LogFile::open(path)?),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, record: &Record) -> io::Result<()> {
        self.append_batch(std::iter::once(record))
    }

    /// Write and fsync `records` as one unit. On error nothing of the batch
    /// stays in the file or in the buffer.
    pub fn append_batch<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a Record>,
    ) -> io::Result<()> {
        let committed_len = self.writer.get_ref().file.metadata()?.len();
        let committed_appends = self.appends_since_compact;

        let result = records
            .into_iter()
            .try_for_each(|record| self.append_buffered(record))
            .and_then(|()| self.flush_sync());
        if let Err(e) = result {
            if let Err(rollback) = self.rollback(committed_len, committed_appends) {
                tracing::error!(
                    path = %self.path.display(),
                    "WAL rollback after failed append also failed: {rollback}"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    fn append_buffered(&mut self, record: &Record) -> io::Result<()> {
        encode_record(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().file.sync_all()
    }

    /// Drop the buffered tail without writing it and truncate the file back
    /// to `len`.
    fn rollback(&mut self, len: u64, appends: u64) -> io::Result<()> {
        let fresh = BufWriter::new(LogFile::open(&self.path)?);
        // into_parts, not drop: dropping a BufWriter flushes its buffer.
        let (_torn, _unwritten) = std::mem::replace(&mut self.writer, fresh).into_parts();
        self.writer.get_ref().file.set_len(len)?;
        self.writer.get_ref().file.sync_all()?;
        self.appends_since_compact = appends;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn fail_write_after(&mut self, successful_writes: usize) {
        self.writer.get_mut().fail_writes_after = Some(successful_writes);
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Rewrite the log as exactly `records`: write a temp file, fsync, then
    /// rename it over the live log and reopen for appends.
    pub fn compact(&mut self, records: &[Record]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for record in records {
                encode_record(&mut tmp, record)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        self.writer.flush()?;
        fs::rename(&tmp_path, &self.path)?;
        self.writer = BufWriter::new(LogFile::open(&self.path)?);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Replay every intact record and drop whatever follows the last one.
    /// A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Record>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut valid_len = 0u64;
        while let Some((record, frame_len)) = decode_record(&mut reader)? {
            records.push(record);
            valid_len += frame_len;
        }
        if valid_len < file_len {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = file_len - valid_len,
                "truncating torn WAL tail"
            );
            OpenOptions::new().write(true).open(path)?.set_len(valid_len)?;
        }
        Ok(records)
    }
}
