use std::io;
use std::sync::mpsc::{self, TryRecvError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use catalog_events::{BrokerProducer, DomainEvent, RecordSource, RetryConsumer, RetryOutcome};

/// Handle to control and join a background worker.
///
/// Dropping the handle without calling [`shutdown`](Self::shutdown) also stops the
/// worker after its current poll, but does not wait for it.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A record already being retried is finished (and acknowledged) first, so this can
    /// block for up to one full backoff sequence.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                warn!(worker = %self.name, "retry worker panicked");
            }
        }
    }
}

/// Drives a [`RetryConsumer`] from a retry-topic [`RecordSource`].
///
/// - Polls one record at a time with a short timeout
/// - Hands each record and its acknowledgment to the consumer (which acks exactly once)
/// - Logs source errors and keeps polling
/// - Supports graceful shutdown
#[derive(Debug)]
pub struct RetryWorker;

impl RetryWorker {
    /// Spawn a named worker thread.
    ///
    /// `poll_timeout` bounds how long a shutdown request can go unnoticed while idle.
    pub fn spawn<S, T, P>(
        name: impl Into<String>,
        source: S,
        consumer: RetryConsumer<T, P>,
        poll_timeout: Duration,
    ) -> io::Result<WorkerHandle>
    where
        S: RecordSource + 'static,
        T: DomainEvent,
        P: BrokerProducer + 'static,
    {
        let name = name.into();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let worker_name = name.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&worker_name, source, consumer, shutdown_rx, poll_timeout))?;

        info!(worker = %name, "retry worker started");
        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<S, T, P>(
    name: &str,
    mut source: S,
    consumer: RetryConsumer<T, P>,
    shutdown_rx: mpsc::Receiver<()>,
    poll_timeout: Duration,
) where
    S: RecordSource,
    T: DomainEvent,
    P: BrokerProducer,
{
    let mut republished = 0u64;
    let mut recovered = 0u64;

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        match source.poll(poll_timeout) {
            Ok(Some((record, ack))) => match consumer.retry(&record, ack) {
                RetryOutcome::Republished { key, attempts } => {
                    republished += 1;
                    debug!(worker = name, key = %key, attempts, "retry record republished");
                }
                RetryOutcome::Recovered { key, attempts, reason } => {
                    recovered += 1;
                    debug!(worker = name, key = %key, attempts, reason = %reason, "retry record recovered");
                }
            },
            Ok(None) => continue,
            Err(err) => {
                warn!(worker = name, error = %err, "retry worker poll failed");
                // Back off so a broker outage does not turn into a hot loop.
                thread::sleep(poll_timeout);
            }
        }
    }

    info!(worker = name, republished, recovered, "retry worker stopped");
}
