//! Plain file-per-time-partition [`EventStore`] with no external dependencies.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use theia_model::{Event, EventParser, EventSerializer};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StoreError};
use crate::file_index::FileIndex;
use crate::flusher::PeriodicFlusher;
use crate::memory_file::MemoryFile;
use crate::store::{EventStore, SearchOrder, SearchRequest};

/// Partition width for newly created [`crate::file_index::DataFile`]s, per
/// §3 of the spec.
const PARTITION_WIDTH_SECS: i64 = 60;

struct Inner {
    index: FileIndex,
    open_files: HashMap<PathBuf, Arc<MemoryFile>>,
}

/// Time-partitioned store with no secondary index: `get`/`delete` are
/// unsupported (the naive store has no id lookup — see the relational
/// backend for that), and `search` walks only the on-disk partitions
/// overlapping the requested time range.
///
/// A single [`Mutex`] guards partition *selection* (index lookups, creating
/// new partitions, registering new [`MemoryFile`]s) — brief critical
/// sections only. Byte-level append/flush on an already-open partition goes
/// through that partition's own `MemoryFile`, which has its own lock, so
/// concurrent writers to different partitions don't contend with each
/// other (§5).
pub struct NaiveEventStore {
    root: PathBuf,
    inner: Mutex<Inner>,
    flush_interval: Duration,
    flusher: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl NaiveEventStore {
    /// Opens (or creates) `root` as a store directory and loads its existing
    /// [`FileIndex`]. `flush_interval` of [`Duration::ZERO`] makes every
    /// `save` flush synchronously; otherwise callers should spawn a
    /// background flusher with [`Self::spawn_flusher`].
    pub fn new(root: impl Into<PathBuf>, flush_interval: Duration) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let index = FileIndex::open(&root)?;
        Ok(Self {
            root,
            inner: Mutex::new(Inner {
                index,
                open_files: HashMap::new(),
            }),
            flush_interval,
            flusher: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Spawns the background [`PeriodicFlusher`] driving [`Self::flush_all`]
    /// on `flush_interval`. A no-op when `flush_interval` is zero (every
    /// `save` already flushes synchronously in that mode).
    pub fn spawn_flusher(self: &Arc<Self>) {
        if self.flush_interval.is_zero() {
            return;
        }
        let cancel = CancellationToken::new();
        let flusher = PeriodicFlusher::new(self.flush_interval, cancel.clone());
        let store = self.clone();
        let handle = tokio::spawn(flusher.run(move || {
            let store = store.clone();
            async move { store.flush_all().await }
        }));
        *self.flusher.lock().unwrap() = Some((cancel, handle));
    }

    /// Flushes every currently open partition buffer. Individual flush
    /// failures are logged (`StoreError::WriteFailure`) and swallowed — a
    /// failing partition keeps its buffer and is retried on the next tick,
    /// per §7.
    pub async fn flush_all(&self) -> Result<()> {
        let files: Vec<Arc<MemoryFile>> = self
            .inner
            .lock()
            .unwrap()
            .open_files
            .values()
            .cloned()
            .collect();
        for mf in files {
            if let Err(err) = mf.flush().await {
                tracing::warn!(path = %mf.path().display(), %err, "partition flush failed, buffer retained");
            }
        }
        Ok(())
    }

    /// Returns the open `MemoryFile` for `path`, opening (and, if the file
    /// already exists on disk from a prior process, seeding) one if needed.
    async fn memory_file_for(&self, path: PathBuf) -> Arc<MemoryFile> {
        if let Some(mf) = self.inner.lock().unwrap().open_files.get(&path) {
            return mf.clone();
        }
        let seed = tokio::fs::read(&path).await.unwrap_or_default();
        let mf = Arc::new(MemoryFile::with_bytes(path.clone(), seed));
        self.inner
            .lock()
            .unwrap()
            .open_files
            .entry(path)
            .or_insert(mf)
            .clone()
    }

    fn read_partition(path: &Path) -> Result<Vec<Event>> {
        let bytes = std::fs::read(path)?;
        let mut cursor = Cursor::new(bytes);
        let parser = EventParser::new();
        let mut events = Vec::new();
        while let Some(event) = parser.parse(&mut cursor)? {
            events.push(event);
        }
        Ok(events)
    }
}

#[async_trait]
impl EventStore for NaiveEventStore {
    async fn save(&self, event: Event) -> Result<()> {
        let bytes = EventSerializer::new().serialize(&event);

        let path = {
            let mut inner = self.inner.lock().unwrap();
            match inner.index.find_event_file(event.timestamp()) {
                Some(df) => df.path,
                None => {
                    let start = event.floor_timestamp();
                    let end = start + PARTITION_WIDTH_SECS;
                    let name = format!("{start}-{end}");
                    inner.index.add_file(&name);
                    self.root.join(&name)
                }
            }
        };

        let mf = self.memory_file_for(path).await;
        mf.append(&bytes);

        if self.flush_interval.is_zero() {
            mf.flush().await?;
        }
        Ok(())
    }

    async fn get(&self, _id: &str) -> Result<Option<Event>> {
        Err(StoreError::Unsupported("get"))
    }

    async fn delete(&self, _id: &str) -> Result<bool> {
        Err(StoreError::Unsupported("delete"))
    }

    fn search(&self, request: SearchRequest) -> BoxStream<'static, Result<Event>> {
        let from = request.criteria.start().unwrap_or(0.0);
        let to = request.criteria.end();
        // §4.5/§9: `Desc` reverses the matches *within* each partition but
        // still iterates partitions forward — this is the reference
        // implementation's consistent-but-not-globally-sorted semantics,
        // kept deliberately rather than "fixed" (see DESIGN.md).
        let files = self.inner.lock().unwrap().index.find(from, to);

        Box::pin(try_stream! {
            for file in &files {
                let mut events = NaiveEventStore::read_partition(&file.path)?;
                if request.order == SearchOrder::Desc {
                    events.reverse();
                }
                for event in events {
                    let ts = event.timestamp();
                    if ts < from {
                        continue;
                    }
                    if let Some(to) = to {
                        if ts > to {
                            continue;
                        }
                    }
                    if request.criteria.matches(&event) {
                        yield event;
                    }
                }
            }
        })
    }

    async fn close(&self) -> Result<()> {
        self.flush_all().await?;
        let flusher = self.flusher.lock().unwrap().take();
        if let Some((cancel, handle)) = flusher {
            cancel.cancel();
            let _ = handle.await;
        }
        Ok(())
    }
}
