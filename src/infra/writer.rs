//! Ordered, single-owner asynchronous file sink.
//!
//! A [`SequentialFileWriter`] owns the only open handle to its target file.
//! Callers enqueue [`PersistenceJob`]s on a bounded queue and return as soon as
//! the job is queued; one background task applies the jobs in submission
//! order. Shutdown travels on its own channel so a closed queue always means
//! "writer gone", never "writer asked to stop".

use std::{
    io::SeekFrom,
    panic,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use thiserror::Error;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncSeekExt, AsyncWriteExt},
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error};

use crate::util::lock::mutex_lock;

const SOURCE: &str = "infra::writer";
const DEFAULT_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("writer for `{path}` is closed")]
    Closed { path: PathBuf },
    #[error("failed to open `{path}`: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How a job's payload lands in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Write after the current end of the file.
    Append,
    /// Truncate the file, then write from the start.
    Overwrite,
}

/// One queued write.
#[derive(Debug)]
pub struct PersistenceJob {
    payload: String,
    mode: WriteMode,
    ack: Option<oneshot::Sender<()>>,
}

impl PersistenceJob {
    pub fn new(payload: impl Into<String>, mode: WriteMode) -> Self {
        Self {
            payload: payload.into(),
            mode,
            ack: None,
        }
    }
}

/// Resolves once the associated job has been written and flushed.
#[derive(Debug)]
pub struct WriteAck {
    path: PathBuf,
    done: oneshot::Receiver<()>,
}

impl WriteAck {
    pub async fn wait(self) -> Result<(), WriterError> {
        self.done
            .await
            .map_err(|_| WriterError::Closed { path: self.path })
    }
}

pub struct SequentialFileWriter {
    path: PathBuf,
    jobs: mpsc::Sender<PersistenceJob>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SequentialFileWriter {
    /// Open (creating if needed, never truncating) `path` and start the drain task.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, WriterError> {
        Self::with_capacity(path, DEFAULT_QUEUE_CAPACITY).await
    }

    pub async fn with_capacity(
        path: impl AsRef<Path>,
        capacity: usize,
    ) -> Result<Self, WriterError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|source| WriterError::Open {
                path: path.clone(),
                source,
            })?;

        let (jobs, queue) = mpsc::channel(capacity.max(1));
        let (shutdown, shutdown_signal) = oneshot::channel();
        let task = tokio::spawn(drain_jobs(path.clone(), file, queue, shutdown_signal));

        debug!(target = SOURCE, path = %path.display(), capacity, "writer opened");

        Ok(Self {
            path,
            jobs,
            shutdown: Mutex::new(Some(shutdown)),
            task: tokio::sync::Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a write. Waits only while the queue is full.
    pub async fn submit(
        &self,
        payload: impl Into<String>,
        mode: WriteMode,
    ) -> Result<(), WriterError> {
        self.enqueue(PersistenceJob::new(payload, mode)).await
    }

    /// Queue a write and obtain a handle that resolves once it is on disk.
    pub async fn submit_acked(
        &self,
        payload: impl Into<String>,
        mode: WriteMode,
    ) -> Result<WriteAck, WriterError> {
        let (ack, done) = oneshot::channel();
        let mut job = PersistenceJob::new(payload, mode);
        job.ack = Some(ack);
        self.enqueue(job).await?;
        Ok(WriteAck {
            path: self.path.clone(),
            done,
        })
    }

    async fn enqueue(&self, job: PersistenceJob) -> Result<(), WriterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.closed_error());
        }
        self.jobs.send(job).await.map_err(|_| self.closed_error())
    }

    /// Stop accepting jobs, write everything already queued and release the file.
    ///
    /// Re-raises a panic from the drain task so a failed write is never silent.
    /// Concurrent callers all return only after the queue is drained.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(shutdown) = mutex_lock(&self.shutdown, SOURCE, "close").take() {
            let _ = shutdown.send(());
        }

        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    panic::resume_unwind(err.into_panic());
                }
            }
            debug!(target = SOURCE, path = %self.path.display(), "writer closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn closed_error(&self) -> WriterError {
        WriterError::Closed {
            path: self.path.clone(),
        }
    }
}

async fn drain_jobs(
    path: PathBuf,
    mut file: File,
    mut queue: mpsc::Receiver<PersistenceJob>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            job = queue.recv() => match job {
                Some(job) => apply(&path, &mut file, job).await,
                None => break,
            },
            _ = &mut shutdown => {
                queue.close();
                while let Some(job) = queue.recv().await {
                    apply(&path, &mut file, job).await;
                }
                break;
            }
        }
    }

    if let Err(err) = file.shutdown().await {
        fail(&path, "close", err);
    }
}

async fn apply(path: &Path, file: &mut File, job: PersistenceJob) {
    let PersistenceJob { payload, mode, ack } = job;
    if let Err(err) = write_payload(file, &payload, mode).await {
        fail(path, "write", err);
    }
    if let Some(ack) = ack {
        let _ = ack.send(());
    }
}

async fn write_payload(file: &mut File, payload: &str, mode: WriteMode) -> std::io::Result<()> {
    match mode {
        WriteMode::Overwrite => {
            file.set_len(0).await?;
            file.seek(SeekFrom::Start(0)).await?;
        }
        WriteMode::Append => {
            file.seek(SeekFrom::End(0)).await?;
        }
    }
    file.write_all(payload.as_bytes()).await?;
    file.flush().await
}

fn fail(path: &Path, op: &'static str, err: std::io::Error) -> ! {
    error!(
        target = SOURCE,
        path = %path.display(),
        op,
        error = %err,
        "sequential writer failed"
    );
    panic!("sequential writer for `{}` failed to {op}: {err}", path.display());
}
