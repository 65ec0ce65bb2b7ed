use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Write one frame: `[u32 len][bincode payload][u32 crc32]`, little-endian.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` means the file ended first.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read the next intact frame payload, or `None` at a clean end, a truncated
/// tail or a checksum mismatch.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    if !read_or_eof(reader, &mut len_buf)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    if !read_or_eof(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_or_eof(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Append-only event log.
///
/// A crash mid-append leaves at most one torn frame at the tail, which the
/// length prefix and checksum let `replay` detect and drop. `open` cuts such
/// a tail off so later appends stay reachable.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// End of the last durable frame.
    committed_len: u64,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let (_, valid_len) = scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() > valid_len {
            tracing::warn!("wal: dropping torn tail after byte {valid_len}");
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            committed_len: valid_len,
            appends_since_compact: 0,
        })
    }

    /// Append and fsync a group of events as one unit. On error the log is cut
    /// back to where it was, so none of the group survives a replay.
    pub fn append_batch<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> io::Result<()> {
        let mut buf = Vec::new();
        let mut count = 0;
        for event in events {
            write_frame(&mut buf, event)?;
            count += 1;
        }
        if count == 0 {
            return Ok(());
        }

        let written = self
            .file
            .write_all(&buf)
            .and_then(|()| self.file.sync_all());
        if let Err(e) = written {
            if let Err(undo) = self.file.set_len(self.committed_len) {
                tracing::error!("wal: failed batch not rolled back: {undo}");
            }
            return Err(e);
        }
        self.committed_len += buf.len() as u64;
        self.appends_since_compact += count;
        Ok(())
    }

    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_batch([event])
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `events`: write and fsync a sibling temp file,
    /// then rename it over the log and reopen for appends.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let len = {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                write_frame(&mut tmp, event)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
            tmp.get_ref().metadata()?.len()
        };
        fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = len;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// All valid events in order. A missing file replays as empty; replay
    /// stops at the first torn or corrupt frame.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }
}

/// Intact events and the byte offset just past the last of them.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0u64;
    while let Some(payload) = read_frame(&mut reader)? {
        match bincode::deserialize::<Event>(&payload) {
            Ok(event) => events.push(event),
            Err(e) => {
                tracing::warn!("wal replay stopped at undecodable frame: {e}");
                break;
            }
        }
        valid_len += 8 + payload.len() as u64;
    }
    Ok((events, valid_len))
}
