//! Write-behind visitor store.
//!
//! Every visitor lives in one in-memory map. Mutations only bump a generation
//! counter; a background task wakes every `save_delay`, and when the
//! generation moved since its last export it rewrites the whole users file
//! through a [`SequentialFileWriter`]. With nothing to export the task parks
//! until the next mutation sends it a [`Signal::Resume`], so an idle store
//! costs no wakeups. Dropping the store without [`UserStore::close`] closes
//! the signal channel, which the task treats like a stop: it still writes
//! the final snapshot, as long as the runtime is alive.

use std::{
    collections::HashMap,
    panic,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use metrics::counter;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    infra::writer::{SequentialFileWriter, WriteMode},
    util::{Clock, SystemClock, lock::mutex_lock},
};

use super::{
    codec,
    error::UserStoreError,
    ids::{IdGenerator, RandomIdGenerator},
};

const SOURCE: &str = "evex::users";
pub(crate) const METRIC_SNAPSHOT: &str = "evex_user_store_snapshot_total";

pub const USERS_FILE: &str = "users.txt";
pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_millis(500);
pub const MIN_SAVE_DELAY: Duration = Duration::from_millis(30);

/// Construction parameters for [`UserStore::open`].
#[derive(Clone)]
pub struct StoreOptions {
    pub save_delay: Duration,
    pub ids: Arc<dyn IdGenerator>,
    pub clock: Arc<dyn Clock>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            save_delay: DEFAULT_SAVE_DELAY,
            ids: Arc::new(RandomIdGenerator),
            clock: Arc::new(SystemClock),
        }
    }
}

impl StoreOptions {
    pub fn with_save_delay(mut self, save_delay: Duration) -> Self {
        self.save_delay = save_delay;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }
}

/// Message from mutators (and `close`) to the persistence task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Resume,
    Stop,
}

#[derive(Debug, Default)]
struct Ledger {
    records: HashMap<String, bool>,
    generation: u64,
    exported_generation: u64,
    last_mutation_millis: i64,
    parked: bool,
    closed: bool,
}

impl Ledger {
    fn is_dirty(&self) -> bool {
        self.generation != self.exported_generation
    }
}

struct Shared {
    ledger: Mutex<Ledger>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    snapshots: AtomicU64,
}

impl Shared {
    fn ledger(&self, op: &'static str) -> std::sync::MutexGuard<'_, Ledger> {
        mutex_lock(&self.ledger, SOURCE, op)
    }

    /// Record a mutation and wake the task if it is parked. Caller holds the lock.
    fn mark_dirty(&self, ledger: &mut Ledger, signals: &mpsc::Sender<Signal>) {
        ledger.generation += 1;
        ledger.last_mutation_millis = self.clock.now_millis();
        if ledger.parked {
            ledger.parked = false;
            let _ = signals.try_send(Signal::Resume);
        }
    }

    /// Encode the map and mark it exported. Caller holds the lock.
    fn snapshot(&self, ledger: &mut Ledger) -> String {
        ledger.exported_generation = ledger.generation;
        ledger.parked = false;
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        counter!(METRIC_SNAPSHOT).increment(1);
        debug!(
            target = SOURCE,
            records = ledger.records.len(),
            generation = ledger.generation,
            pending_ms = self.clock.now_millis() - ledger.last_mutation_millis,
            "exporting users snapshot"
        );
        codec::encode(&ledger.records)
    }
}

pub struct UserStore {
    path: PathBuf,
    shared: Arc<Shared>,
    // Only the store holds the sender; dropping the store ends the task.
    signals: mpsc::Sender<Signal>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl UserStore {
    /// Load `<dir>/users.txt` (creating it if absent) and start persisting.
    pub async fn open(dir: impl AsRef<Path>, options: StoreOptions) -> Result<Self, UserStoreError> {
        if options.save_delay < MIN_SAVE_DELAY {
            return Err(UserStoreError::InvalidDelay {
                delay_ms: options.save_delay.as_millis(),
                min_ms: MIN_SAVE_DELAY.as_millis(),
            });
        }

        let path = dir.as_ref().join(USERS_FILE);
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(text) => codec::decode(&text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => return Err(UserStoreError::Io { path, source }),
        };
        let loaded = records.len();

        let writer = SequentialFileWriter::open(&path).await?;
        let (signals, inbox) = mpsc::channel(1);
        let shared = Arc::new(Shared {
            ledger: Mutex::new(Ledger {
                records,
                last_mutation_millis: options.clock.now_millis(),
                ..Ledger::default()
            }),
            ids: options.ids,
            clock: options.clock,
            snapshots: AtomicU64::new(0),
        });

        let task = tokio::spawn(persist(
            Arc::clone(&shared),
            writer,
            inbox,
            options.save_delay,
        ));

        info!(
            target = SOURCE,
            path = %path.display(),
            records = loaded,
            save_delay_ms = options.save_delay.as_millis() as u64,
            "user store opened"
        );

        Ok(Self {
            path,
            shared,
            signals,
            task: tokio::sync::Mutex::new(Some(task)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register a new visitor and return its id.
    pub fn add(&self, unlocked: bool) -> Result<String, UserStoreError> {
        let mut ledger = self.shared.ledger("add");
        if ledger.closed {
            return Err(UserStoreError::Closed);
        }

        let mut id = self.shared.ids.generate();
        while ledger.records.contains_key(&id) {
            id = self.shared.ids.generate();
        }
        ledger.records.insert(id.clone(), unlocked);
        self.shared.mark_dirty(&mut ledger, &self.signals);
        Ok(id)
    }

    /// Set the flag of an existing visitor. Unknown ids are ignored.
    pub fn update(&self, id: &str, unlocked: bool) -> Result<(), UserStoreError> {
        let mut ledger = self.shared.ledger("update");
        if ledger.closed {
            return Err(UserStoreError::Closed);
        }

        match ledger.records.get_mut(id) {
            Some(flag) => *flag = unlocked,
            None => return Ok(()),
        }
        self.shared.mark_dirty(&mut ledger, &self.signals);
        Ok(())
    }

    pub fn get_state(&self, id: &str) -> Result<bool, UserStoreError> {
        self.shared
            .ledger("get_state")
            .records
            .get(id)
            .copied()
            .ok_or_else(|| UserStoreError::UserNotFound { id: id.to_string() })
    }

    pub fn len(&self) -> usize {
        self.shared.ledger("len").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the persistence task is waiting for a mutation.
    pub fn is_parked(&self) -> bool {
        self.shared.ledger("is_parked").parked
    }

    /// Number of snapshots handed to the writer since opening.
    pub fn snapshot_count(&self) -> u64 {
        self.shared.snapshots.load(Ordering::SeqCst)
    }

    /// Flush pending mutations, stop the persistence task and close the file.
    ///
    /// Returns once everything is on disk. Further `add`/`update` calls fail
    /// with [`UserStoreError::Closed`].
    /// Concurrent callers all wait until the final snapshot is on disk.
    pub async fn close(&self) {
        let mut task = self.task.lock().await;
        let Some(handle) = task.take() else {
            return;
        };

        self.shared.ledger("close").closed = true;
        let _ = self.signals.send(Signal::Stop).await;

        if let Err(err) = handle.await {
            if err.is_panic() {
                panic::resume_unwind(err.into_panic());
            }
        }
        info!(target = SOURCE, path = %self.path.display(), "user store closed");
    }
}

impl Drop for UserStore {
    fn drop(&mut self) {
        if self.task.get_mut().is_none() {
            return;
        }
        let ledger = self.shared.ledger("drop");
        warn!(
            target = SOURCE,
            path = %self.path.display(),
            dirty = ledger.is_dirty(),
            "user store dropped without close; flushing in the background"
        );
    }
}

async fn persist(
    shared: Arc<Shared>,
    writer: SequentialFileWriter,
    mut inbox: mpsc::Receiver<Signal>,
    delay: Duration,
) {
    loop {
        if !pause(delay, &mut inbox).await {
            break;
        }

        let pending = {
            let mut ledger = shared.ledger("persist");
            if ledger.is_dirty() {
                Some(shared.snapshot(&mut ledger))
            } else {
                ledger.parked = true;
                None
            }
        };

        let payload = match pending {
            Some(payload) => payload,
            None => {
                debug!(target = SOURCE, "persistence parked");
                match inbox.recv().await {
                    Some(Signal::Resume) => {
                        let mut ledger = shared.ledger("resume");
                        shared.snapshot(&mut ledger)
                    }
                    Some(Signal::Stop) | None => break,
                }
            }
        };

        if let Err(err) = writer.submit(payload, WriteMode::Overwrite).await {
            error!(target = SOURCE, error = %err, "failed to queue users snapshot");
            break;
        }
    }

    let last = {
        let mut ledger = shared.ledger("final_flush");
        ledger.parked = false;
        ledger.is_dirty().then(|| shared.snapshot(&mut ledger))
    };
    if let Some(payload) = last {
        if let Err(err) = writer.submit(payload, WriteMode::Overwrite).await {
            error!(target = SOURCE, error = %err, "failed to queue final users snapshot");
        }
    }

    writer.close().await;
}

/// Sleep for `delay`. Returns `false` if a stop arrived first.
async fn pause(delay: Duration, inbox: &mut mpsc::Receiver<Signal>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            signal = inbox.recv() => match signal {
                Some(Signal::Resume) => continue,
                Some(Signal::Stop) | None => return false,
            },
        }
    }
}
