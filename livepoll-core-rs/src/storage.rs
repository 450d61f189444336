//! File-backed poll repository.
//!
//! Implements:
//! - Write-ahead log (WAL) of poll mutations, one JSON object per line
//! - Crash recovery by replaying the WAL over the latest snapshot
//! - Snapshot + WAL truncation once enough entries accumulate
//!
//! Reads are served from an in-memory index. A mutation is appended to the
//! WAL first and only then applied to the index, so a failed append leaves
//! nothing visible. The WAL is cut back to its last committed length after a
//! failed append, so a rejected entry is never replayed.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::repository::{MemoryRepository, PollRepository};
use crate::types::{OptionId, Poll, PollId, PollOption};

const WAL_FILE: &str = "wal.log";
const SNAPSHOT_FILE: &str = "snapshot.json";
const SNAPSHOT_TMP_FILE: &str = "snapshot.json.tmp";

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Base directory for storage files
    pub dir: PathBuf,
    /// fsync the WAL after every write
    pub fsync_on_write: bool,
    /// WAL entries written before the state is snapshotted
    pub snapshot_threshold: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./livepoll-data"),
            fsync_on_write: true,
            snapshot_threshold: 1000,
        }
    }
}

impl StorageConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }
}

/// WAL entry for recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum WalEntry {
    /// Full poll record (create, edit, option add/remove)
    #[serde(rename = "POLL")]
    Poll { poll: Poll },

    /// Vote count of a single option
    #[serde(rename = "VOTES")]
    Votes {
        poll_id: PollId,
        option_id: OptionId,
        votes: u64,
    },

    /// Poll deletion
    #[serde(rename = "DELETE")]
    Delete { poll_id: PollId },
}

/// Snapshot file contents
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    polls: Vec<Poll>,
}

struct Wal {
    /// `None` after a rollback failed; writes are refused until a snapshot
    /// truncates the log or the repository is reopened
    writer: Option<BufWriter<File>>,
    /// Length of the log up to the last acknowledged entry
    committed_len: u64,
    entries_since_snapshot: usize,
}

/// Durable repository backed by a WAL and periodic snapshots
pub struct FileRepository {
    config: StorageConfig,
    index: MemoryRepository,
    wal: Mutex<Wal>,
}

impl FileRepository {
    /// Open storage in `config.dir`, recovering any existing state
    pub fn open(config: StorageConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.dir)?;

        let (polls, replayed) = Self::recover(&config)?;
        info!(
            "Storage: Recovered {} polls from {:?} ({} WAL entries)",
            polls.len(),
            config.dir,
            replayed
        );

        Self::terminate_torn_line(&config.dir.join(WAL_FILE))?;
        let writer = Self::open_wal(&config)?;
        let committed_len = writer.get_ref().metadata()?.len();

        Ok(Self {
            config,
            index: MemoryRepository::from_polls(polls),
            wal: Mutex::new(Wal {
                writer: Some(writer),
                committed_len,
                entries_since_snapshot: replayed,
            }),
        })
    }

    fn open_wal(config: &StorageConfig) -> io::Result<BufWriter<File>> {
        let wal_path = config.dir.join(WAL_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&wal_path)?;

        debug!("Storage: Opened WAL at {:?} (size={})", wal_path, file.metadata()?.len());
        Ok(BufWriter::new(file))
    }

    /// Make sure new entries never get glued onto a partial line left by a crash
    fn terminate_torn_line(path: &Path) -> io::Result<()> {
        if !path.exists() {
            return Ok(());
        }

        let mut file = OpenOptions::new().read(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(());
        }

        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            file.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Rebuild the poll index from the snapshot and WAL
    fn recover(config: &StorageConfig) -> Result<(HashMap<PollId, Poll>, usize), StorageError> {
        let mut polls = HashMap::new();

        let snapshot_path = config.dir.join(SNAPSHOT_FILE);
        if snapshot_path.exists() {
            let data = fs::read_to_string(&snapshot_path)?;
            let snapshot: Snapshot = serde_json::from_str(&data)?;
            info!("Storage: Loaded snapshot with {} polls", snapshot.polls.len());
            polls.extend(snapshot.polls.into_iter().map(|p| (p.id, p)));
        }

        let wal_path = config.dir.join(WAL_FILE);
        let mut replayed = 0;
        if wal_path.exists() {
            let reader = BufReader::new(File::open(&wal_path)?);

            for (line_num, line) in reader.lines().enumerate() {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        warn!("Storage: WAL read error at line {}: {}", line_num + 1, e);
                        break;
                    }
                };

                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<WalEntry>(&line) {
                    Ok(entry) => {
                        Self::apply(&mut polls, entry);
                        replayed += 1;
                    }
                    Err(e) => {
                        // A torn final line from a crash mid-append
                        warn!("Storage: WAL parse error at line {}: {}", line_num + 1, e);
                    }
                }
            }
        }

        Ok((polls, replayed))
    }

    fn apply(polls: &mut HashMap<PollId, Poll>, entry: WalEntry) {
        match entry {
            WalEntry::Poll { poll } => {
                polls.insert(poll.id, poll);
            }
            WalEntry::Votes {
                poll_id,
                option_id,
                votes,
            } => {
                if let Some(option) = polls
                    .get_mut(&poll_id)
                    .and_then(|p| p.options.iter_mut().find(|o| o.id == option_id))
                {
                    option.votes = votes;
                }
            }
            WalEntry::Delete { poll_id } => {
                polls.remove(&poll_id);
            }
        }
    }

    /// Append `entry` to the WAL, then run `apply` against the index while the
    /// WAL lock is still held so both stay in the same order
    fn write<T>(&self, entry: &WalEntry, apply: impl FnOnce(&MemoryRepository) -> T)
        -> Result<T, StorageError>
    {
        let mut wal = self.wal.lock();

        let data = serde_json::to_string(entry)?;
        let writer = wal.writer.as_mut().ok_or_else(|| {
            StorageError::Unavailable("write-ahead log needs recovery".into())
        })?;
        let appended = writeln!(writer, "{}", data)
            .and_then(|()| writer.flush())
            .and_then(|()| {
                if self.config.fsync_on_write {
                    writer.get_ref().sync_data()
                } else {
                    Ok(())
                }
            });
        if let Err(e) = appended {
            self.rollback_locked(&mut wal);
            return Err(e.into());
        }
        wal.committed_len += data.len() as u64 + 1;
        wal.entries_since_snapshot += 1;

        let result = apply(&self.index);

        if wal.entries_since_snapshot >= self.config.snapshot_threshold {
            // The mutation is already durable in the WAL; a failed snapshot is retried later
            if let Err(e) = self.snapshot_locked(&mut wal) {
                warn!("Storage: Snapshot failed: {}", e);
            }
        }

        Ok(result)
    }

    /// Cut the WAL back to the last committed entry after a failed append
    fn rollback_locked(&self, wal: &mut Wal) {
        // Bytes still buffered belong to the failed entry and must not be flushed
        if let Some(writer) = wal.writer.take() {
            let (_file, _unflushed) = writer.into_parts();
        }

        let reopened = Self::open_wal(&self.config).and_then(|writer| {
            writer.get_ref().set_len(wal.committed_len)?;
            writer.get_ref().sync_data()?;
            Ok(writer)
        });
        match reopened {
            Ok(writer) => {
                debug!("Storage: WAL rolled back to {} bytes", wal.committed_len);
                wal.writer = Some(writer);
            }
            Err(e) => warn!("Storage: WAL rollback failed, refusing writes: {}", e),
        }
    }

    /// Persist the full index and truncate the WAL
    fn snapshot_locked(&self, wal: &mut Wal) -> Result<(), StorageError> {
        if let Some(writer) = wal.writer.as_mut() {
            writer.flush()?;
        }

        let snapshot = Snapshot {
            polls: self.index.snapshot().into_values().collect(),
        };
        let snapshot_path = self.config.dir.join(SNAPSHOT_FILE);
        let temp_path = self.config.dir.join(SNAPSHOT_TMP_FILE);

        fs::write(&temp_path, serde_json::to_string(&snapshot)?)?;
        fs::rename(&temp_path, &snapshot_path)?;

        let wal_path = self.config.dir.join(WAL_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&wal_path)?;
        file.sync_all()?;
        // The append-mode writer follows the truncation; only a failed one is replaced
        if wal.writer.is_none() {
            wal.writer = Some(Self::open_wal(&self.config)?);
        }
        wal.committed_len = 0;
        wal.entries_since_snapshot = 0;

        info!("Storage: Snapshot written ({} polls), WAL truncated", snapshot.polls.len());
        Ok(())
    }

    /// Force a snapshot now
    pub fn compact(&self) -> Result<(), StorageError> {
        let mut wal = self.wal.lock();
        self.snapshot_locked(&mut wal)
    }

    /// WAL entries written since the last snapshot
    pub fn pending_entries(&self) -> usize {
        self.wal.lock().entries_since_snapshot
    }
}

impl PollRepository for FileRepository {
    fn load_poll(&self, id: PollId) -> Result<Option<Poll>, StorageError> {
        self.index.load_poll(id)
    }

    fn load_option(
        &self,
        poll_id: PollId,
        option_id: OptionId,
    ) -> Result<Option<PollOption>, StorageError> {
        self.index.load_option(poll_id, option_id)
    }

    fn save_poll(&self, poll: &Poll) -> Result<(), StorageError> {
        self.write(&WalEntry::Poll { poll: poll.clone() }, |index| {
            index.put(poll.clone())
        })
    }

    fn store_votes(
        &self,
        poll_id: PollId,
        option_id: OptionId,
        votes: u64,
    ) -> Result<bool, StorageError> {
        if self.index.load_option(poll_id, option_id)?.is_none() {
            return Ok(false);
        }
        self.write(
            &WalEntry::Votes {
                poll_id,
                option_id,
                votes,
            },
            |index| index.set_votes(poll_id, option_id, votes),
        )
    }

    fn delete_poll(&self, id: PollId) -> Result<bool, StorageError> {
        if self.index.load_poll(id)?.is_none() {
            return Ok(false);
        }
        self.write(&WalEntry::Delete { poll_id: id }, |index| index.remove(id))
    }

    fn list_polls(&self) -> Result<Vec<Poll>, StorageError> {
        self.index.list_polls()
    }
}
