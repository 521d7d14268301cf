use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::limits::MAX_WAL_RECORD_BYTES;
use crate::model::Event;

/// Frame a record as `[u32 len][bincode][u32 crc32]`, all little-endian.
/// Returns the number of bytes written.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_WAL_RECORD_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "record too large"));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(8 + payload.len() as u64)
}

/// Read exactly `buf.len()` bytes. `Ok(false)` on a clean or torn end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact record and its frame size, or `None` at end of log / first damaged frame.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_WAL_RECORD_BYTES {
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
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, 8 + len as u64)))
}

/// Intact records in append order, plus the byte length they cover.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0;
    while let Some((event, frame_len)) = read_frame(&mut reader)? {
        events.push(event);
        valid_len += frame_len;
    }
    Ok((events, valid_len))
}

/// Append-only write-ahead log of shift mutations.
///
/// A crash can leave a torn final frame; replay stops at the first frame whose
/// length, checksum, or payload does not check out, and opening the log cuts
/// the file back to that point so later appends stay reachable.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Bytes known to be synced and intact.
    durable_len: u64,
    /// Bytes and records buffered since the last successful sync.
    pending_len: u64,
    pending_records: u64,
    appends_since_compact: u64,
}

impl Wal {
    #[cfg(test)]
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::recover(path)?.0)
    }

    /// Replay the log, drop any damaged tail from the file, and open it for appends.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let file_len = file.metadata()?.len();
        if file_len > valid_len {
            tracing::warn!(
                "truncating {} damaged bytes at the end of {}",
                file_len - valid_len,
                path.display()
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            durable_len: valid_len,
            pending_len: 0,
            pending_records: 0,
            appends_since_compact: 0,
        };
        Ok((wal, events))
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer a record. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        let written = write_frame(&mut self.writer, event)?;
        self.pending_len += written;
        self.pending_records += 1;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len += self.pending_len;
        self.pending_len = 0;
        self.pending_records = 0;
        Ok(())
    }

    /// Throw away everything since the last successful sync, on disk and in the buffer.
    pub fn rollback(&mut self) -> io::Result<()> {
        self.appends_since_compact -= self.pending_records;
        self.pending_len = 0;
        self.pending_records = 0;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        // The old writer may flush leftover bytes as it drops; the truncate below removes them.
        self.writer = BufWriter::new(file);
        let file = self.writer.get_ref();
        file.set_len(self.durable_len)?;
        file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write a snapshot next to the log and fsync it. Slow; the live log is untouched.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path.with_extension("wal.tmp"))?);
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.durable_len = file.metadata()?.len();
        self.pending_len = 0;
        self.pending_records = 0;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// All intact records in append order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan(path)?.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Shift, ShiftType};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("shiftd_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn inserted(start: i64, end: i64) -> Event {
        Event::ShiftsInserted {
            shifts: vec![Shift {
                id: Ulid::new(),
                employee_id: "bob@x.com".into(),
                shift_type: ShiftType::Regular,
                start,
                end,
                notes: Some("front desk".into()),
                created_by: Some("System".into()),
            }],
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![
            inserted(1000, 2000),
            Event::ShiftDeleted {
                id: Ulid::new(),
                employee_id: "bob@x.com".into(),
            },
        ];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 2);
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = tmp_path("torn_tail.wal");
        let event = inserted(1000, 2000);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let good = inserted(1000, 2000);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&inserted(3000, 4000)).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good.clone()]);

        // Reopening cuts the damaged frame, so the next record is reachable.
        let later = inserted(5000, 6000);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&later).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good, later]);
    }

    #[test]
    fn recover_truncates_torn_tail() {
        let path = tmp_path("recover_torn.wal");
        let first = inserted(1000, 2000);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        let intact_len = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[40u8, 0, 0, 0, 1, 2, 3]).unwrap();
        }

        let (mut wal, events) = Wal::recover(&path).unwrap();
        assert_eq!(events, vec![first.clone()]);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);

        let second = inserted(3000, 4000);
        wal.append(&second).unwrap();
        drop(wal);
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn oversized_length_header_stops_replay() {
        let path = tmp_path("oversized_len.wal");
        let good = inserted(1000, 2000);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0u8; 16]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn rollback_discards_unsynced_records() {
        let path = tmp_path("rollback.wal");
        let kept = inserted(1000, 2000);
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();

        wal.append_buffered(&inserted(3000, 4000)).unwrap();
        wal.writer.flush().unwrap();
        wal.rollback().unwrap();
        assert_eq!(wal.appends_since_compact(), 1);
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept.clone()]);

        let next = inserted(5000, 6000);
        wal.append(&next).unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, next]);
    }

    #[test]
    fn missing_file_is_empty_log() {
        let path = tmp_path("never_written.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn compaction_replaces_history() {
        let path = tmp_path("compaction.wal");
        let snapshot = vec![inserted(1000, 2000)];
        let mut wal = Wal::open(&path).unwrap();
        for i in 0..5 {
            wal.append(&inserted(i * 10_000, i * 10_000 + 500)).unwrap();
        }
        wal.compact(&snapshot).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);

        let later = inserted(50_000, 60_000);
        wal.append(&later).unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![snapshot[0].clone(), later]);
        assert!(!path.with_extension("wal.tmp").exists());
    }
}
