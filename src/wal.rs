use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Change;

/// A length prefix above this is corruption, not a record. One event or
/// reservation encodes to a few kilobytes at most.
const MAX_RECORD_LEN: usize = 1 << 20;

/// Encode a single change to [len][bincode][crc32] format.
fn encode_change(writer: &mut impl Write, change: &Change) -> io::Result<()> {
    let payload =
        bincode::serialize(change).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only Write-Ahead Log of catalog and ledger changes.
///
/// Format per entry: `[u32: len][bincode: Change][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - Truncated last entry (crash) is safely discarded via length-prefix + CRC check.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, change: &Change) -> io::Result<()> {
        self.append_buffered(change)?;
        self.flush_sync()
    }

    /// Append to the BufWriter without flushing or syncing.
    /// Call `flush_sync()` after the batch to durably commit all buffered changes.
    pub fn append_buffered(&mut self, change: &Change) -> io::Result<()> {
        encode_change(&mut self.writer, change)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write compacted changes to a temp file and fsync.
    pub fn write_compact_file(path: &Path, changes: &[Change]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for change in changes {
            encode_change(&mut writer, change)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Atomic swap: rename temp file over the WAL and reopen.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, changes: &[Change]) -> io::Result<()> {
        Self::write_compact_file(&self.path, changes)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the WAL from disk, returning all valid changes.
    ///
    /// Reading stops at the first record that is cut short, fails its
    /// checksum or doesn't decode; everything before it is kept.
    pub fn replay(path: &Path) -> io::Result<Vec<Change>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut changes = Vec::new();
        let mut kinds: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut offset: u64 = 0;

        let stop = loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break None,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_RECORD_LEN {
                break Some("oversized");
            }

            let mut payload = vec![0u8; len];
            if !read_or_eof(&mut reader, &mut payload)? {
                break Some("truncated");
            }
            let mut crc_buf = [0u8; 4];
            if !read_or_eof(&mut reader, &mut crc_buf)? {
                break Some("truncated");
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break Some("checksum mismatch");
            }

            match bincode::deserialize::<Change>(&payload) {
                Ok(change) => {
                    *kinds.entry(change.kind()).or_default() += 1;
                    changes.push(change);
                }
                Err(_) => break Some("undecodable"),
            }
            offset += (len + 8) as u64;
        };

        if let Some(reason) = stop {
            tracing::warn!(
                "{}: discarding {reason} tail at byte {offset} after {} records",
                path.display(),
                changes.len()
            );
        }
        tracing::debug!("{}: replayed {kinds:?}", path.display());
        Ok(changes)
    }
}

/// `Ok(false)` when the file ends before `buf` is filled.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
