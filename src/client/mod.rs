//! The public client: enqueue, close, configuration and the dispatcher that
//! ties the pipeline together.

mod callback;
mod stats;
mod worker;

pub use callback::Callback;
pub use stats::{ClientStats, StatsSnapshot};

use crate::buffer::{MessageQueue, QueuedEvent};
use crate::config::{Config, NowFn, UidFn};
use crate::error::Error;
use crate::event::{Context, Event, LibraryInfo};
use crate::sender::{HttpSender, RetryPolicy, Uploader};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;
use worker::Worker;

/// Buffers analytics events and forwards them to the ingestion endpoint in
/// batches, without ever blocking the producer on network I/O.
///
/// Cheap to share behind an `Arc`; `enqueue` takes `&self` and may be called
/// from any number of tasks. The dispatcher task is started lazily on the
/// first enqueue, and [`Client::close`] drains everything that was accepted
/// before returning.
pub struct Client {
    tx: mpsc::Sender<QueuedEvent>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    started: AtomicBool,
    worker: Mutex<WorkerSlot>,
    now: NowFn,
    uid: UidFn,
    max_message_bytes: usize,
    stats: Arc<ClientStats>,
}

struct WorkerSlot {
    pending: Option<Worker>,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("closed", &self.closed)
            .field("started", &self.started)
            .field("max_message_bytes", &self.max_message_bytes)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client with the default configuration.
    pub fn new(write_key: impl Into<String>) -> Result<Self, Error> {
        Self::with_config(write_key, Config::default())
    }

    /// Creates a client with the given configuration, validating it first.
    pub fn with_config(write_key: impl Into<String>, config: Config) -> Result<Self, Error> {
        config.validate()?;

        let write_key = write_key.into();
        let now = config.now_fn();
        let uid = config.uid_fn();
        let stats = Arc::new(ClientStats::default());
        let shutdown = CancellationToken::new();

        let sender = HttpSender::new(
            &config.endpoint,
            write_key,
            config.request_timeout,
            config.transport.clone(),
        )?;

        let retry_after = config
            .retry_after
            .clone()
            .unwrap_or_else(|| RetryPolicy::default().into_fn());

        let uploader = Arc::new(Uploader {
            sender,
            attempts: config.retry_attempts,
            retry_after,
            callback: config.callback.clone(),
            stats: Arc::clone(&stats),
            shutdown: shutdown.clone(),
        });

        let (tx, rx) = mpsc::channel(config.channel_capacity);

        let worker = Worker {
            rx,
            queue: MessageQueue::new(config.batch_size, config.max_batch_bytes),
            interval: config.interval,
            uploader,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            saturation: config.saturation,
            shutdown: shutdown.clone(),
            context: batch_context(config.default_context.clone()),
            now: Arc::clone(&now),
            uid: Arc::clone(&uid),
            stats: Arc::clone(&stats),
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
            max_message_bytes: config.max_message_bytes,
            stats,
        })
    }

    /// Validates, stamps and queues an event for delivery.
    ///
    /// Returns synchronously once the event is on the dispatcher's channel;
    /// suspends only while that channel is full. Delivery outcomes are
    /// reported through the configured [`Callback`].
    pub async fn enqueue(&self, message: impl Into<Event>) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let mut event = message.into();
        event.validate()?;
        event.stamp(&(self.uid)(), (self.now)());

        let payload = serde_json::to_value(&event)?;
        let size = serde_json::to_vec(&payload)?.len();
        if size > self.max_message_bytes {
            return Err(Error::MessageTooBig {
                size,
                limit: self.max_message_bytes,
            });
        }

        self.start_worker();
        self.stats.record_enqueued();

        // A racing close may have shut the channel after the flag check; the
        // failed send is the closed sentinel, never a lost event.
        self.tx
            .send(QueuedEvent {
                event,
                payload,
                size,
            })
            .await
            .map_err(|_| Error::Closed)
    }

    /// Shuts the client down and waits until every event accepted by
    /// [`Client::enqueue`] has been uploaded, failed over the callback, or
    /// abandoned because the transport kept failing.
    ///
    /// Idempotent: the first call drains and returns `Ok`, any later call
    /// returns [`Error::Closed`].
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
                error!(error = %err, "dispatcher task failed");
            }
        }
        Ok(())
    }

    /// Point-in-time delivery counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Spawns the dispatcher on first use so that constructing a client does
    /// not allocate runtime resources.
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

/// The envelope context: the configured baseline with the library descriptor
/// forced on top.
fn batch_context(default_context: Option<Context>) -> Context {
    let mut context = default_context.unwrap_or_default();
    context.library = LibraryInfo {
        name: crate::NAME.to_owned(),
        version: crate::VERSION.to_owned(),
    };
    context
}
