//! # Write-Ahead Log (WAL)
//!
//! **Crash-Safe Commit Log for the Ledger**
//!
//! Nothing reaches the in-memory committed tables before it is on disk.
//! A transaction is appended as one contiguous write and fsynced before the
//! store publishes it, and every operation carries a *post-image* (the
//! absolute value of the row after the transaction), so replay is idempotent.
//!
//! ## Guarantees
//!
//! 1. **Durability**: Once `append_transaction()` returns, data is on disk
//! 2. **Atomicity**: Replay applies a transaction only if its COMMIT record is intact
//! 3. **Recovery**: A torn or corrupt tail is truncated at the last COMMIT
//!
//! ## Format
//!
//! ```text
//! [4 bytes: magic "TWAL"]
//! [4 bytes: version]
//! [8 bytes: base LSN (first LSN after the last checkpoint)]
//!
//! Entry format:
//! [8 bytes: LSN (Log Sequence Number)]
//! [1 byte: record type (BEGIN/OP/COMMIT)]
//! [4 bytes: payload length]
//! [N bytes: payload (serialized operation)]
//! [4 bytes: CRC32 of above]
//! ```
//!
//! Aborted transactions never reach the log, so there is no ROLLBACK record.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::DateTime;

use crate::error::{StoreError, StoreResult};
use crate::ledger::{EntityId, ItemKey, LogEntry};

/// Magic bytes identifying a WAL file.
const WAL_MAGIC: &[u8; 4] = b"TWAL";

/// Current WAL format version.
const WAL_VERSION: u32 = 1;

/// Size of the file header.
const HEADER_LEN: u64 = 16;

/// Bytes of framing around every payload (lsn + type + len + crc).
const RECORD_OVERHEAD: usize = 8 + 1 + 4 + 4;

/// WAL record types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Begin a transaction.
    Begin = 1,
    /// A post-image within a transaction.
    Operation = 2,
    /// Commit the transaction.
    Commit = 3,
}

impl RecordType {
    /// Converts from u8.
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Begin),
            2 => Some(Self::Operation),
            3 => Some(Self::Commit),
            _ => None,
        }
    }
}

/// Post-image operations that can be logged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalOp {
    /// The balance of an entity after the transaction.
    SetBalance {
        /// Entity ID.
        entity: EntityId,
        /// Absolute balance.
        balance: u64,
    },
    /// The quantity of an item stack after the transaction. Zero removes it.
    SetItem {
        /// Entity ID.
        entity: EntityId,
        /// Item key.
        item: ItemKey,
        /// Absolute quantity.
        quantity: u64,
    },
    /// An audit row.
    AppendLog(LogEntry),
}

impl WalOp {
    /// Serializes the operation to bytes.
    fn serialize(&self, buf: &mut Vec<u8>) {
        match self {
            Self::SetBalance { entity, balance } => {
                buf.push(1); // Type tag
                buf.extend_from_slice(&entity.0.to_le_bytes());
                buf.extend_from_slice(&balance.to_le_bytes());
            }
            Self::SetItem { entity, item, quantity } => {
                buf.push(2);
                buf.extend_from_slice(&entity.0.to_le_bytes());
                put_str(buf, item.as_str());
                buf.extend_from_slice(&quantity.to_le_bytes());
            }
            Self::AppendLog(entry) => {
                buf.push(3);
                buf.extend_from_slice(&entry.entity.0.to_le_bytes());
                buf.extend_from_slice(&entry.amount.to_le_bytes());
                buf.extend_from_slice(&entry.timestamp.timestamp_millis().to_le_bytes());
                put_str(buf, &entry.reason);
                put_str(buf, &entry.category);
            }
        }
    }

    /// Deserializes an operation from bytes.
    fn deserialize(data: &[u8]) -> Option<Self> {
        let mut cursor = Cursor { data, pos: 0 };
        let op = match cursor.u8()? {
            1 => Self::SetBalance {
                entity: EntityId(cursor.u64()?),
                balance: cursor.u64()?,
            },
            2 => Self::SetItem {
                entity: EntityId(cursor.u64()?),
                item: ItemKey::new(cursor.string()?),
                quantity: cursor.u64()?,
            },
            3 => {
                let entity = EntityId(cursor.u64()?);
                let amount = cursor.i64()?;
                let timestamp = DateTime::from_timestamp_millis(cursor.i64()?)?;
                let reason = cursor.string()?;
                let category = cursor.string()?;
                Self::AppendLog(LogEntry { entity, amount, reason, category, timestamp })
            }
            _ => return None,
        };
        // Trailing garbage means the payload is not what we wrote.
        (cursor.pos == data.len()).then_some(op)
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// Little-endian reader over a payload.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn i64(&mut self) -> Option<i64> {
        Some(i64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn string(&mut self) -> Option<String> {
        let len = self.u32()? as usize;
        String::from_utf8(self.take(len)?.to_vec()).ok()
    }
}

/// Appends one framed record to `buf`.
fn encode_record(buf: &mut Vec<u8>, lsn: u64, record_type: RecordType, payload: &[u8]) {
    let start = buf.len();
    buf.extend_from_slice(&lsn.to_le_bytes());
    buf.push(record_type as u8);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    let crc = crc32fast::hash(&buf[start..]);
    buf.extend_from_slice(&crc.to_le_bytes());
}

/// Encodes a whole transaction (BEGIN, one OP per post-image, COMMIT).
///
/// Returns the LSN of the COMMIT record.
fn encode_transaction(buf: &mut Vec<u8>, first_lsn: u64, ops: &[WalOp]) -> u64 {
    let mut lsn = first_lsn;
    encode_record(buf, lsn, RecordType::Begin, &[]);
    let mut payload = Vec::with_capacity(64);
    for op in ops {
        lsn += 1;
        payload.clear();
        op.serialize(&mut payload);
        encode_record(buf, lsn, RecordType::Operation, &payload);
    }
    lsn += 1;
    encode_record(buf, lsn, RecordType::Commit, &[]);
    lsn
}

fn encode_header(buf: &mut Vec<u8>, base_lsn: u64) {
    buf.extend_from_slice(WAL_MAGIC);
    buf.extend_from_slice(&WAL_VERSION.to_le_bytes());
    buf.extend_from_slice(&base_lsn.to_le_bytes());
}

/// A WAL record decoded from disk.
#[derive(Clone, Debug)]
struct WalRecord<'a> {
    lsn: u64,
    record_type: RecordType,
    payload: &'a [u8],
}

/// Decodes the record at the start of `data`, verifying its CRC.
///
/// Returns the record and the number of bytes it occupies.
fn decode_record(data: &[u8]) -> Option<(WalRecord<'_>, usize)> {
    let mut cursor = Cursor { data, pos: 0 };
    let lsn = cursor.u64()?;
    let record_type = RecordType::from_u8(cursor.u8()?)?;
    let len = cursor.u32()? as usize;
    let payload = cursor.take(len)?;
    let body_end = cursor.pos;
    let stored_crc = cursor.u32()?;
    if crc32fast::hash(&data[..body_end]) != stored_crc {
        return None;
    }
    Some((WalRecord { lsn, record_type, payload }, len + RECORD_OVERHEAD))
}

/// The committed content of a WAL file.
#[derive(Debug, Default)]
pub struct Recovered {
    /// Committed transactions in log order.
    pub transactions: Vec<Vec<WalOp>>,
    /// LSN the next record must use.
    pub next_lsn: u64,
    /// Offset just past the last intact COMMIT record.
    pub valid_len: u64,
    /// Bytes after `valid_len` that will be discarded.
    pub discarded_bytes: u64,
    /// Transactions whose COMMIT never made it to disk.
    pub incomplete: usize,
}

/// Reads the committed transactions of a WAL file without modifying it.
///
/// # Errors
///
/// Returns `StoreError::Io` if the file cannot be read and
/// `StoreError::Corrupt` if the header is not a WAL header.
pub fn recover(path: &Path) -> StoreResult<Recovered> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(StoreError::io("failed to read wal", &e)),
    };

    // A header shorter than 16 bytes is a crash during creation.
    if (bytes.len() as u64) < HEADER_LEN {
        return Ok(Recovered {
            discarded_bytes: bytes.len() as u64,
            ..Recovered::default()
        });
    }

    if &bytes[0..4] != WAL_MAGIC {
        return Err(StoreError::Corrupt("invalid wal magic".to_string()));
    }
    let mut header = Cursor { data: &bytes[4..16], pos: 0 };
    let version = header.u32().unwrap_or_default();
    if version != WAL_VERSION {
        return Err(StoreError::Corrupt(format!("unsupported wal version: {version}")));
    }
    let base_lsn = header.u64().unwrap_or_default();

    let mut recovered = Recovered {
        next_lsn: base_lsn,
        valid_len: HEADER_LEN,
        ..Recovered::default()
    };
    let mut open: Option<Vec<WalOp>> = None;
    let mut offset = HEADER_LEN as usize;

    while let Some((record, size)) = decode_record(&bytes[offset..]) {
        offset += size;
        match record.record_type {
            RecordType::Begin => {
                if open.replace(Vec::new()).is_some() {
                    recovered.incomplete += 1;
                }
            }
            RecordType::Operation => {
                let (Some(ops), Some(op)) = (open.as_mut(), WalOp::deserialize(record.payload)) else {
                    break;
                };
                ops.push(op);
            }
            RecordType::Commit => {
                let Some(ops) = open.take() else { break };
                recovered.transactions.push(ops);
                recovered.valid_len = offset as u64;
                recovered.next_lsn = record.lsn + 1;
            }
        }
    }
    if open.is_some() {
        recovered.incomplete += 1;
    }
    recovered.discarded_bytes = bytes.len() as u64 - recovered.valid_len;

    Ok(recovered)
}

/// Append handle on a WAL file.
#[derive(Debug)]
pub struct WalWriter {
    /// Path to the WAL file.
    path: PathBuf,
    /// File handle, positioned at `len`.
    file: File,
    /// LSN the next record will use.
    next_lsn: u64,
    /// Length of the intact prefix of the file.
    len: u64,
    /// Whether appends are fsynced.
    sync: bool,
}

impl WalWriter {
    /// Opens or creates a WAL file, truncating any torn tail.
    ///
    /// Returns the writer together with the committed transactions to replay.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` on I/O failure and `StoreError::Corrupt` if the
    /// file is not a WAL.
    pub fn open(path: impl AsRef<Path>, sync: bool) -> StoreResult<(Self, Recovered)> {
        let path = path.as_ref().to_path_buf();
        let recovered = recover(&path)?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::io("failed to open wal", &e))?;

        let len = if recovered.valid_len == 0 {
            // Fresh file (or torn header): write a header.
            let mut buf = Vec::with_capacity(HEADER_LEN as usize);
            encode_header(&mut buf, 0);
            file.set_len(0).map_err(|e| StoreError::io("failed to reset wal", &e))?;
            file.write_all(&buf).map_err(|e| StoreError::io("failed to write wal header", &e))?;
            file.sync_all().map_err(|e| StoreError::io("failed to sync wal", &e))?;
            HEADER_LEN
        } else {
            if recovered.discarded_bytes > 0 {
                file.set_len(recovered.valid_len)
                    .map_err(|e| StoreError::io("failed to truncate wal tail", &e))?;
                file.sync_all().map_err(|e| StoreError::io("failed to sync wal", &e))?;
            }
            recovered.valid_len
        };

        file.seek(SeekFrom::Start(len))
            .map_err(|e| StoreError::io("failed to seek wal", &e))?;

        let writer = Self {
            path,
            file,
            next_lsn: recovered.next_lsn,
            len,
            sync,
        };
        Ok((writer, recovered))
    }

    /// Appends a committed transaction and makes it durable.
    ///
    /// On failure the file is cut back to its previous length, so a failed
    /// append never leaves a partial record in front of later ones.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the write or the sync fails.
    pub fn append_transaction(&mut self, ops: &[WalOp]) -> StoreResult<u64> {
        let mut buf = Vec::with_capacity(ops.len() * 48 + 3 * RECORD_OVERHEAD);
        let commit_lsn = encode_transaction(&mut buf, self.next_lsn, ops);

        if let Err(err) = self.write_and_sync(&buf) {
            self.cut_back();
            return Err(err);
        }

        self.len += buf.len() as u64;
        self.next_lsn = commit_lsn + 1;
        Ok(commit_lsn)
    }

    fn write_and_sync(&mut self, buf: &[u8]) -> StoreResult<()> {
        self.file
            .write_all(buf)
            .map_err(|e| StoreError::io("wal write failed", &e))?;
        if self.sync {
            self.file
                .sync_data()
                .map_err(|e| StoreError::io("wal sync failed", &e))?;
        }
        Ok(())
    }

    fn cut_back(&mut self) {
        let restored = self
            .file
            .set_len(self.len)
            .and_then(|()| self.file.seek(SeekFrom::Start(self.len)).map(|_| ()));
        if let Err(e) = restored {
            tracing::error!(path = %self.path.display(), error = %e, "failed to cut back wal after failed append");
        }
    }

    /// Replaces the whole log with one transaction holding `ops`.
    ///
    /// The new log is written to a sibling file, fsynced, then renamed over
    /// the old one. A crash at any point leaves either the old or the new log.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if any step fails; the old log stays in place.
    pub fn rewrite(&mut self, ops: &[WalOp]) -> StoreResult<()> {
        let tmp_path = self.path.with_extension("wal.ckpt");

        let mut buf = Vec::with_capacity(HEADER_LEN as usize + ops.len() * 48);
        encode_header(&mut buf, self.next_lsn);
        let next_lsn = if ops.is_empty() {
            self.next_lsn
        } else {
            encode_transaction(&mut buf, self.next_lsn, ops) + 1
        };

        {
            let mut tmp = File::create(&tmp_path).map_err(|e| StoreError::io("failed to create checkpoint", &e))?;
            tmp.write_all(&buf).map_err(|e| StoreError::io("failed to write checkpoint", &e))?;
            tmp.sync_all().map_err(|e| StoreError::io("failed to sync checkpoint", &e))?;
        }
        fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::io("failed to install checkpoint", &e))?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| StoreError::io("failed to reopen wal", &e))?;
        file.seek(SeekFrom::End(0))
            .map_err(|e| StoreError::io("failed to seek wal", &e))?;

        self.file = file;
        self.len = buf.len() as u64;
        self.next_lsn = next_lsn;
        Ok(())
    }

    /// Returns the LSN the next record will use.
    #[inline]
    #[must_use]
    pub fn next_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// Returns the current size of the log in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the log holds no records.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == HEADER_LEN
    }

    /// Returns the path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
