//! The object-store sink: the same dispatcher discipline as the HTTP
//! client, but batches are gzip-compressed NDJSON objects written through a
//! caller-supplied store.

mod encoder;

pub use encoder::{BufferedEncoder, EncodedBuffer, FileBuffer, MemBuffer};

use crate::client::{Callback, ClientStats, StatsSnapshot};
use crate::config::{NowFn, RetryAfterFn, SaturationPolicy, UidFn};
use crate::error::{ConfigError, Error};
use crate::event::{Event, Timestamp};
use crate::sender::RetryPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Destination for finished batch objects. Implemented by callers over S3 or
/// any compatible store; multipart mechanics live behind this seam.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Builds the object key for a finished batch from the upload time and a
/// fresh unique id.
pub type KeyFn = Arc<dyn Fn(DateTime<Utc>, &str) -> String + Send + Sync>;

/// Configuration for [`ObjectStoreClient`].
#[derive(Clone)]
pub struct ObjectStoreConfig {
    /// Deployment stage folded into the default key layout and the
    /// per-message context. Defaults to `"prod"`.
    pub stage: String,

    /// Name of the stream the objects belong to. Required.
    pub stream: String,

    /// Maximum number of events per object.
    pub batch_size: usize,

    /// Maximum compressed size of an object in bytes.
    pub max_batch_bytes: u64,

    /// Periodic flush interval.
    pub interval: Duration,

    /// When set, encoded batches accumulate in this file instead of the
    /// heap. Useful when `max_batch_bytes` is tens of megabytes.
    pub buffer_file_path: Option<PathBuf>,

    /// Object key layout override. The default is
    /// `analytics/<stage>/bulk/<stream>/json/YYYY/MM/DD/HH/<unix>-<uid>.json.gz`.
    pub key_constructor: Option<KeyFn>,

    pub max_concurrent_requests: usize,

    /// Defaults to [`SaturationPolicy::FailBatch`]: this sink prefers
    /// freshness over durability.
    pub saturation: SaturationPolicy,

    pub retry_attempts: usize,
    pub retry_after: Option<RetryAfterFn>,
    pub callback: Option<Arc<dyn Callback>>,
    pub channel_capacity: usize,
    pub now: Option<NowFn>,
    pub uid: Option<UidFn>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            stage: "prod".to_owned(),
            stream: String::new(),
            batch_size: 250,
            max_batch_bytes: 20 * 1024 * 1024,
            interval: Duration::from_secs(5),
            buffer_file_path: None,
            key_constructor: None,
            max_concurrent_requests: 1,
            saturation: SaturationPolicy::FailBatch,
            retry_attempts: 10,
            retry_after: None,
            callback: None,
            channel_capacity: 4096,
            now: None,
            uid: None,
        }
    }
}

impl ObjectStoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.is_empty() {
            return Err(ConfigError::new("Stream", "", "must be provided"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::new(
                "BatchSize",
                self.batch_size.to_string(),
                "must be greater than zero",
            ));
        }
        if self.max_batch_bytes == 0 {
            return Err(ConfigError::new(
                "MaxBatchBytes",
                self.max_batch_bytes.to_string(),
                "must be greater than zero",
            ));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::new(
                "Interval",
                format!("{:?}", self.interval),
                "must be positive",
            ));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::new(
                "MaxConcurrentRequests",
                self.max_concurrent_requests.to_string(),
                "must be greater than zero",
            ));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::new(
                "RetryAttempts",
                self.retry_attempts.to_string(),
                "must be greater than zero",
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::new(
                "ChannelCapacity",
                self.channel_capacity.to_string(),
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    fn now_fn(&self) -> NowFn {
        self.now.clone().unwrap_or_else(|| Arc::new(Utc::now))
    }

    fn uid_fn(&self) -> UidFn {
        self.uid
            .clone()
            .unwrap_or_else(|| Arc::new(|| uuid::Uuid::new_v4().to_string()))
    }
}

impl fmt::Debug for ObjectStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreConfig")
            .field("stage", &self.stage)
            .field("stream", &self.stream)
            .field("batch_size", &self.batch_size)
            .field("max_batch_bytes", &self.max_batch_bytes)
            .field("interval", &self.interval)
            .field("buffer_file_path", &self.buffer_file_path)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("saturation", &self.saturation)
            .field("retry_attempts", &self.retry_attempts)
            .field("channel_capacity", &self.channel_capacity)
            .finish_non_exhaustive()
    }
}

/// Deployment metadata carried by every stored message.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiContext {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stage: String,
}

/// One NDJSON row: the event wrapped with its deployment context and the
/// times it passed through the pipeline.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredMessage<'a> {
    context: &'a ApiContext,
    event: &'a Event,
    sent_at: Timestamp,
    received_at: Timestamp,
}

/// Dispatcher variant that uploads gzip NDJSON objects instead of POSTing
/// JSON batches. Shares the event model, stamping and shutdown discipline
/// with [`crate::Client`].
pub struct ObjectStoreClient {
    tx: mpsc::Sender<Event>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    started: AtomicBool,
    worker: Mutex<WorkerSlot>,
    now: NowFn,
    uid: UidFn,
    stats: Arc<ClientStats>,
}

impl fmt::Debug for ObjectStoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreClient")
            .field("closed", &self.closed)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

struct WorkerSlot {
    pending: Option<StoreWorker>,
    handle: Option<JoinHandle<()>>,
}

impl ObjectStoreClient {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        config: ObjectStoreConfig,
    ) -> Result<Self, Error> {
        config.validate()?;

        let now = config.now_fn();
        let uid = config.uid_fn();
        let stats = Arc::new(ClientStats::default());
        let shutdown = CancellationToken::new();

        let buffer: Box<dyn EncodedBuffer> = match &config.buffer_file_path {
            Some(path) => Box::new(FileBuffer::create(path)?),
            None => Box::new(MemBuffer::new(
                usize::try_from(config.max_batch_bytes.min(1 << 20)).unwrap_or(1 << 20),
            )),
        };

        let key = config
            .key_constructor
            .clone()
            .unwrap_or_else(|| default_key_constructor(&config.stage, &config.stream));

        let retry_after = config
            .retry_after
            .clone()
            .unwrap_or_else(|| RetryPolicy::default().into_fn());

        let uploader = Arc::new(StoreUploader {
            store,
            attempts: config.retry_attempts,
            retry_after,
            callback: config.callback.clone(),
            stats: Arc::clone(&stats),
            shutdown: shutdown.clone(),
        });

        let (tx, rx) = mpsc::channel(config.channel_capacity);

        let worker = StoreWorker {
            rx,
            encoder: BufferedEncoder::new(config.batch_size, config.max_batch_bytes, buffer),
            pending: Vec::new(),
            api_context: ApiContext {
                api_id: (uid)(),
                stage: config.stage.clone(),
            },
            key,
            interval: config.interval,
            uploader,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            saturation: config.saturation,
            shutdown: shutdown.clone(),
            now: Arc::clone(&now),
            uid: Arc::clone(&uid),
        };

        Ok(Self {
            tx,
            shutdown,
            closed: AtomicBool::new(false),
            started: AtomicBool::new(false),
            worker: Mutex::new(WorkerSlot {
                pending: Some(worker),
                handle: None,
            }),
            now,
            uid,
            stats,
        })
    }

    /// Validates, stamps and queues an event for object upload.
    pub async fn enqueue(&self, message: impl Into<Event>) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let mut event = message.into();
        event.validate()?;
        event.stamp(&(self.uid)(), (self.now)());

        self.start_worker();
        self.stats.record_enqueued();
        self.tx.send(event).await.map_err(|_| Error::Closed)
    }

    /// Drains pending events into a final object and waits for every upload.
    /// Idempotent like [`crate::Client::close`].
    pub async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed);
        }

        self.shutdown.cancel();

        let handle = {
            let mut slot = self.worker_slot();
            slot.pending = None;
            slot.handle.take()
        };

        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "store dispatcher task failed");
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn start_worker(&self) {
        if self.started.load(Ordering::Acquire) {
            return;
        }
        let mut slot = self.worker_slot();
        if let Some(worker) = slot.pending.take() {
            slot.handle = Some(tokio::spawn(worker.run()));
        }
        self.started.store(true, Ordering::Release);
    }

    fn worker_slot(&self) -> MutexGuard<'_, WorkerSlot> {
        match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn default_key_constructor(stage: &str, stream: &str) -> KeyFn {
    let prefix = format!("analytics/{stage}/bulk/{stream}/json");
    Arc::new(move |now, uid| {
        format!(
            "{}/{}/{}-{}.json.gz",
            prefix,
            now.format("%Y/%m/%d/%H"),
            now.timestamp(),
            uid
        )
    })
}

struct StoreWorker {
    rx: mpsc::Receiver<Event>,
    encoder: BufferedEncoder,
    pending: Vec<Event>,
    api_context: ApiContext,
    key: KeyFn,
    interval: Duration,
    uploader: Arc<StoreUploader>,
    semaphore: Arc<Semaphore>,
    saturation: SaturationPolicy,
    shutdown: CancellationToken,
    now: NowFn,
    uid: UidFn,
}

impl StoreWorker {
    async fn run(mut self) {
        let mut uploads = JoinSet::new();
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);

        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(event) => self.push(event, &mut uploads).await,
                    None => break,
                },

                _ = ticker.tick() => {
                    if self.encoder.messages() > 0 {
                        debug!(events = self.encoder.messages(), "interval reached, flushing object");
                        self.dispatch(&mut uploads).await;
                    }
                }

                Some(finished) = uploads.join_next(), if !uploads.is_empty() => {
                    reap(finished);
                }

                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested, draining pending events");
                    self.rx.close();
                    while let Some(event) = self.rx.recv().await {
                        self.push(event, &mut uploads).await;
                    }
                    break;
                }
            }
        }

        if self.encoder.messages() > 0 {
            self.dispatch(&mut uploads).await;
        }
        while let Some(finished) = uploads.join_next().await {
            reap(finished);
        }
        debug!("store dispatcher stopped");
    }

    async fn push(&mut self, event: Event, uploads: &mut JoinSet<()>) {
        let now = (self.now)();
        let encoded = {
            let row = StoredMessage {
                context: &self.api_context,
                event: &event,
                sent_at: now.into(),
                received_at: now.into(),
            };
            self.encoder.push(&row)
        };

        match encoded {
            Ok(ready) => {
                self.pending.push(event);
                if ready {
                    debug!(
                        events = self.encoder.messages(),
                        "batch limit reached, flushing object"
                    );
                    self.dispatch(uploads).await;
                }
            }
            Err(err) => {
                error!(error = %err, "failed to encode event");
                self.uploader.reject(vec![event], &Error::Io(err));
            }
        }
    }

    async fn dispatch(&mut self, uploads: &mut JoinSet<()>) {
        let payload = match self.encoder.take_payload() {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "failed to finish encoded batch");
                let events = std::mem::take(&mut self.pending);
                self.uploader.reject(events, &Error::Io(err));
                return;
            }
        };
        let events = std::mem::take(&mut self.pending);
        let key = (self.key)((self.now)(), &(self.uid)());

        let permit = match self.saturation {
            SaturationPolicy::Block => match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            },
            SaturationPolicy::FailBatch => match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    error!(events = events.len(), "upload pool saturated, failing batch");
                    self.uploader.reject(events, &Error::TooManyRequests);
                    return;
                }
            },
        };

        let uploader = Arc::clone(&self.uploader);
        uploads.spawn(async move {
            let _permit = permit;
            uploader.upload(key, payload, events).await;
        });
    }
}

struct StoreUploader {
    store: Arc<dyn ObjectStore>,
    attempts: usize,
    retry_after: RetryAfterFn,
    callback: Option<Arc<dyn Callback>>,
    stats: Arc<ClientStats>,
    shutdown: CancellationToken,
}

impl StoreUploader {
    async fn upload(&self, key: String, payload: Vec<u8>, events: Vec<Event>) {
        let bytes = payload.len();
        let count = events.len();
        let mut last_error = Error::Closed;

        for attempt in 0..self.attempts {
            if attempt > 0 {
                let pause = (self.retry_after)(attempt - 1);
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = self.shutdown.cancelled() => {
                        warn!(key = %key, events = count, "client closed while waiting to retry, dropping object");
                        self.notify_failure(events, &last_error);
                        return;
                    }
                }
            }

            match self.store.put_object(&key, payload.clone()).await {
                Ok(()) => {
                    debug!(key = %key, events = count, bytes, "object uploaded");
                    self.stats.record_batch_sent(bytes as u64);
                    self.stats.record_events_delivered(count as u64);
                    if let Some(callback) = &self.callback {
                        for event in events {
                            callback.on_success(event);
                        }
                    }
                    return;
                }
                Err(err) => {
                    warn!(key = %key, attempt = attempt + 1, error = %err, "object upload failed");
                    last_error = Error::Store(err.to_string());
                }
            }
        }

        error!(key = %key, events = count, attempts = self.attempts, "dropping object, retries exhausted");
        self.notify_failure(events, &last_error);
    }

    fn reject(&self, events: Vec<Event>, error: &Error) {
        self.notify_failure(events, error);
    }

    fn notify_failure(&self, events: Vec<Event>, error: &Error) {
        self.stats.record_batch_failed(events.len() as u64);
        if let Some(callback) = &self.callback {
            for event in events {
                callback.on_failure(event, error);
            }
        }
    }
}

fn reap(finished: Result<(), tokio::task::JoinError>) {
    if let Err(err) = finished {
        if err.is_panic() {
            error!(error = %err, "object upload task panicked");
        }
    }
}
