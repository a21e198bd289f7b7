//! Dispatcher - bounded-concurrency write loop
//!
//! Readings arrive on a bounded channel. Each reading gets its own write
//! task, but only after a semaphore permit is available, so at most
//! `max_in_flight` inserts run at once and a slow store pushes back on the
//! channel instead of growing an unbounded task list.

use std::sync::Arc;

use async_channel::Receiver;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use contracts::{
    BackoffConfig, BridgeConfig, ContractError, DeadLetter, DeadLetterConfig, DeadLetterKind,
    DeadLetterSink, DispatcherConfig, InsertOutcome, ReadingStore, SensorReading, StoreConfig,
    StoreKind,
};

use crate::error::DispatcherError;
use crate::handle::{DeadLetterHandle, DeadLetterSender};
use crate::metrics::{MetricsSnapshot, WriterMetrics};
use crate::retry::{persist_with_retry, WriteOutcome};
use crate::sinks::{FileDeadLetter, LogDeadLetter, LogStore, MySqlStore};

/// Writes readings to the primary store, routing failures to the dead
/// letter sink.
pub struct Dispatcher<S, D> {
    store: Arc<S>,
    dead_letter: D,
    max_in_flight: usize,
    queue_capacity: usize,
    retry: BackoffConfig,
    metrics: Arc<WriterMetrics>,
}

impl<S, D> Dispatcher<S, D>
where
    S: ReadingStore + Sync + 'static,
    D: DeadLetterSink + 'static,
{
    pub fn new(store: S, dead_letter: D, config: &DispatcherConfig, retry: BackoffConfig) -> Self {
        Self {
            store: Arc::new(store),
            dead_letter,
            max_in_flight: config.max_in_flight.max(1),
            queue_capacity: config.queue_capacity.max(1),
            retry,
            metrics: Arc::new(WriterMetrics::new()),
        }
    }

    /// Shared handle to the primary store
    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    pub fn metrics(&self) -> Arc<WriterMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run until `rx` is closed and drained.
    ///
    /// Every reading taken off the channel ends up either in the store or
    /// in the dead letter sink before this returns. The store is closed on
    /// the way out.
    #[instrument(
        name = "dispatcher_run",
        skip_all,
        fields(store = %self.store.name(), max_in_flight = self.max_in_flight)
    )]
    pub async fn run(self, rx: Receiver<SensorReading>) -> MetricsSnapshot {
        let Self {
            store,
            dead_letter,
            max_in_flight,
            queue_capacity,
            retry,
            metrics,
        } = self;

        let dead_letters = DeadLetterHandle::spawn(dead_letter, queue_capacity, Arc::clone(&metrics));
        let semaphore = Arc::new(Semaphore::new(max_in_flight));
        let mut writes = JoinSet::new();

        info!(dead_letter = dead_letters.name(), "Dispatcher started");

        while let Ok(reading) = rx.recv().await {
            metrics.inc_received();

            // Waiting here is the backpressure point: no permit, no recv.
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };

            let task = WriteTask {
                store: Arc::clone(&store),
                retry: retry.clone(),
                metrics: Arc::clone(&metrics),
                dead_letters: dead_letters.sender(),
            };
            writes.spawn(async move {
                task.write(reading).await;
                drop(permit);
            });

            while let Some(joined) = writes.try_join_next() {
                log_join_error(joined);
            }
        }

        debug!(pending = writes.len(), "Dispatcher input closed, draining writes");
        while let Some(joined) = writes.join_next().await {
            log_join_error(joined);
        }

        if let Err(e) = store.close().await {
            warn!(store = %store.name(), error = %e, "store close failed");
        }
        dead_letters.shutdown().await;

        let snapshot = metrics.snapshot();
        info!(
            received = snapshot.received,
            persisted = snapshot.persisted,
            duplicates = snapshot.duplicates,
            retries = snapshot.retries,
            dead_lettered = snapshot.dead_lettered,
            "Dispatcher shutdown complete"
        );
        snapshot
    }

    /// Spawn the dispatcher as a background task
    pub fn spawn(self, rx: Receiver<SensorReading>) -> JoinHandle<MetricsSnapshot> {
        tokio::spawn(self.run(rx))
    }
}

impl Dispatcher<StoreBackend, DeadLetterBackend> {
    /// Build store and dead letter sink from configuration.
    ///
    /// Does not touch the network; call `connect` on the store to probe it.
    #[instrument(name = "dispatcher_from_config", skip(config))]
    pub fn from_config(config: &BridgeConfig) -> Result<Self, DispatcherError> {
        let store = create_store(&config.store)?;
        let dead_letter = create_dead_letter(&config.dead_letter)?;
        Ok(Self::new(
            store,
            dead_letter,
            &config.dispatcher,
            config.store.retry.clone(),
        ))
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = ?e, "write task panicked");
    }
}

/// Everything one write needs, moved into its task
struct WriteTask<S> {
    store: Arc<S>,
    retry: BackoffConfig,
    metrics: Arc<WriterMetrics>,
    dead_letters: DeadLetterSender,
}

impl<S: ReadingStore + Sync> WriteTask<S> {
    async fn write(self, reading: SensorReading) {
        let in_flight = self.metrics.enter_write();
        observability::metrics::record_inflight_writes(in_flight);

        let outcome = persist_with_retry(&*self.store, &reading, &self.retry, &self.metrics).await;
        observability::metrics::record_write_attempts(outcome.attempts());

        match outcome {
            WriteOutcome::Persisted { duplicate, .. } => {
                self.metrics.inc_persisted();
                observability::metrics::record_reading_persisted(&reading.sensor_type);
                if duplicate {
                    self.metrics.inc_duplicates();
                    observability::metrics::record_reading_duplicate();
                }
            }
            WriteOutcome::Failed { attempts, error } => {
                warn!(
                    reading_id = %reading.reading_id,
                    sensor_type = %reading.sensor_type,
                    attempts,
                    kind = error.kind().as_str(),
                    error = %error,
                    "giving up on reading, dead-lettering"
                );
                let letter = DeadLetter::new(reading, error.to_string(), attempts);
                if let Err(letter) = self.dead_letters.send(letter).await {
                    self.metrics.inc_dead_letter_failures();
                    observability::metrics::record_dead_letter_failure();
                    error!(
                        reading_id = %letter.reading.reading_id,
                        sensor_type = %letter.reading.sensor_type,
                        value = letter.reading.value,
                        "dead letter worker gone, reading lost"
                    );
                }
            }
        }

        let in_flight = self.metrics.exit_write();
        observability::metrics::record_inflight_writes(in_flight);
    }
}

/// Primary store selected by `store.kind`
pub enum StoreBackend {
    Mysql(MySqlStore),
    Log(LogStore),
}

impl ReadingStore for StoreBackend {
    fn name(&self) -> &str {
        match self {
            Self::Mysql(store) => store.name(),
            Self::Log(store) => store.name(),
        }
    }

    async fn connect(&self) -> Result<(), ContractError> {
        match self {
            Self::Mysql(store) => store.connect().await,
            Self::Log(store) => store.connect().await,
        }
    }

    async fn insert(&self, reading: &SensorReading) -> Result<InsertOutcome, ContractError> {
        match self {
            Self::Mysql(store) => store.insert(reading).await,
            Self::Log(store) => store.insert(reading).await,
        }
    }

    async fn is_healthy(&self) -> bool {
        match self {
            Self::Mysql(store) => store.is_healthy().await,
            Self::Log(store) => store.is_healthy().await,
        }
    }

    async fn close(&self) -> Result<(), ContractError> {
        match self {
            Self::Mysql(store) => store.close().await,
            Self::Log(store) => store.close().await,
        }
    }
}

/// Dead letter sink selected by `dead_letter.kind`
pub enum DeadLetterBackend {
    File(FileDeadLetter),
    Log(LogDeadLetter),
}

impl DeadLetterSink for DeadLetterBackend {
    fn name(&self) -> &str {
        match self {
            Self::File(sink) => sink.name(),
            Self::Log(sink) => sink.name(),
        }
    }

    async fn write(&mut self, letter: &DeadLetter) -> Result<(), ContractError> {
        match self {
            Self::File(sink) => sink.write(letter).await,
            Self::Log(sink) => sink.write(letter).await,
        }
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        match self {
            Self::File(sink) => sink.flush().await,
            Self::Log(sink) => sink.flush().await,
        }
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        match self {
            Self::File(sink) => sink.close().await,
            Self::Log(sink) => sink.close().await,
        }
    }
}

/// Create the primary store from configuration
#[instrument(name = "dispatcher_create_store", skip(config), fields(kind = ?config.kind))]
pub fn create_store(config: &StoreConfig) -> Result<StoreBackend, DispatcherError> {
    match config.kind {
        StoreKind::Mysql => MySqlStore::from_config("mysql", config)
            .map(StoreBackend::Mysql)
            .map_err(|e| DispatcherError::store_creation("mysql", e.to_string())),
        StoreKind::Log => Ok(StoreBackend::Log(LogStore::new("log"))),
    }
}

/// Create the dead letter sink from configuration
#[instrument(name = "dispatcher_create_dead_letter", skip(config), fields(kind = ?config.kind))]
pub fn create_dead_letter(config: &DeadLetterConfig) -> Result<DeadLetterBackend, DispatcherError> {
    match config.kind {
        DeadLetterKind::File => FileDeadLetter::open("dead_letter_file", &config.path)
            .map(DeadLetterBackend::File)
            .map_err(|e| {
                DispatcherError::dead_letter_creation(
                    "dead_letter_file",
                    format!("{}: {e}", config.path.display()),
                )
            }),
        DeadLetterKind::Log => Ok(DeadLetterBackend::Log(LogDeadLetter::new("dead_letter_log"))),
    }
}
