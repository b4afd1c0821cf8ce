//! Redis Streams backend (durable, at-least-once delivery).
//!
//! - **Topics** map to stream keys; each record is one `XADD` entry with `key`,
//!   `payload` and one `h:<name>` field per header
//! - **Consumer groups** (`XREADGROUP`) track what the retry consumer has committed
//! - **Manual acknowledgment**: an entry stays pending until `XACK`; on restart the
//!   consumer first re-reads its own pending entries, then new ones
//!
//! Redis has no partitions; every record reports partition 0. Stream entry ids are
//! `<millis>-<seq>` strings, so the numeric offset exposed in receipts and inbound
//! records is the millisecond part (informational only; commits use the full id).

use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{Commands, ErrorKind, RedisError};
use tracing::{debug, error};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use catalog_events::{
    Acknowledgment, BrokerError, BrokerProducer, DeliveryCallback, DeliveryReceipt,
    InboundRecord, OutboundRecord, RecordSource,
};

const KEY_FIELD: &str = "key";
const PAYLOAD_FIELD: &str = "payload";
const HEADER_PREFIX: &str = "h:";

/// Start of a consumer's pending entries list.
const PENDING_CURSOR: &str = "0";
/// Entries never delivered to the group.
const NEW_CURSOR: &str = ">";

/// Map a Redis client error onto the backend-agnostic broker error kinds.
pub fn map_redis_error(err: &RedisError) -> BrokerError {
    let message = err.to_string();
    if err.is_timeout() {
        return BrokerError::Timeout(message);
    }
    if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
        return BrokerError::Connection(message);
    }
    match err.kind() {
        ErrorKind::BusyLoadingError
        | ErrorKind::TryAgain
        | ErrorKind::ClusterDown
        | ErrorKind::MasterDown => BrokerError::Retriable(message),
        ErrorKind::AuthenticationFailed => BrokerError::Authorization(message),
        _ => BrokerError::Rejected(message),
    }
}

fn entry_offset(id: &str) -> i64 {
    id.split('-')
        .next()
        .and_then(|millis| millis.parse().ok())
        .unwrap_or_default()
}

/// Records a producer may hold before `send` reports [`BrokerError::QueueFull`].
pub const DEFAULT_SEND_BUFFER: usize = 10_000;
/// Upper bound on connecting, writing and reading for the writer's connection.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

const WRITER_THREAD: &str = "redis-streams-writer";

struct PendingSend {
    record: OutboundRecord,
    on_delivery: DeliveryCallback,
}

/// Producer appending records to Redis streams.
///
/// `send` only enqueues into a bounded buffer; a dedicated writer thread owns the
/// connection, performs the `XADD`s in order and runs the delivery callbacks. The
/// writer stops once every handle to the producer is dropped and the buffer is empty.
#[derive(Clone)]
pub struct RedisStreamsProducer {
    queue: SyncSender<PendingSend>,
    in_flight: Arc<AtomicUsize>,
}

impl std::fmt::Debug for RedisStreamsProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsProducer")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl RedisStreamsProducer {
    pub fn open(redis_url: &str) -> Result<Self, BrokerError> {
        Self::with_buffer(redis_url, DEFAULT_SEND_BUFFER)
    }

    /// Open a producer whose buffer holds at most `capacity` records (minimum 1).
    pub fn with_buffer(redis_url: &str, capacity: usize) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url).map_err(|e| map_redis_error(&e))?;
        let (queue, pending) = mpsc::sync_channel(capacity.max(1));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let writer_in_flight = Arc::clone(&in_flight);
        thread::Builder::new()
            .name(WRITER_THREAD.to_string())
            .spawn(move || writer_loop(client, pending, writer_in_flight))
            .map_err(|e| BrokerError::Connection(format!("failed to start redis writer: {e}")))?;

        Ok(Self { queue, in_flight })
    }

    /// Records accepted by `send` whose delivery callback has not run yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait until every accepted record has been written (or failed).
    pub fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        let deadline = Instant::now() + timeout;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                return Err(BrokerError::Timeout(format!(
                    "{} redis record(s) still in flight",
                    self.in_flight()
                )));
            }
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

impl BrokerProducer for RedisStreamsProducer {
    fn send(&self, record: OutboundRecord, on_delivery: DeliveryCallback) -> Result<(), BrokerError> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        match self.queue.try_send(PendingSend { record, on_delivery }) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                Err(match err {
                    TrySendError::Full(_) => {
                        BrokerError::QueueFull("redis producer buffer is full".to_string())
                    }
                    TrySendError::Disconnected(_) => {
                        BrokerError::Connection("redis writer has stopped".to_string())
                    }
                })
            }
        }
    }
}

fn writer_loop(client: redis::Client, pending: Receiver<PendingSend>, in_flight: Arc<AtomicUsize>) {
    debug!("redis writer started");
    let mut conn: Option<redis::Connection> = None;

    for PendingSend { record, on_delivery } in pending {
        let delivery = append(&client, &mut conn, record);
        on_delivery(delivery);
        in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    debug!("redis writer stopped");
}

fn connect(client: &redis::Client) -> redis::RedisResult<redis::Connection> {
    let conn = client.get_connection_with_timeout(IO_TIMEOUT)?;
    conn.set_write_timeout(Some(IO_TIMEOUT))?;
    conn.set_read_timeout(Some(IO_TIMEOUT))?;
    Ok(conn)
}

fn append(
    client: &redis::Client,
    conn: &mut Option<redis::Connection>,
    record: OutboundRecord,
) -> Result<DeliveryReceipt, BrokerError> {
    let OutboundRecord {
        topic,
        key,
        payload,
        headers,
    } = record;

    let mut fields: Vec<(String, Vec<u8>)> = Vec::with_capacity(2 + headers.len());
    fields.push((KEY_FIELD.to_string(), key.into_bytes()));
    fields.push((PAYLOAD_FIELD.to_string(), payload));
    for (name, value) in headers {
        fields.push((format!("{HEADER_PREFIX}{name}"), value.into_bytes()));
    }

    if conn.is_none() {
        *conn = Some(connect(client).map_err(|e| map_redis_error(&e))?);
    }
    let Some(connection) = conn.as_mut() else {
        return Err(BrokerError::Connection("redis connection unavailable".to_string()));
    };

    let added: redis::RedisResult<String> = connection.xadd(&topic, "*", fields.as_slice());
    match added {
        Ok(id) => Ok(DeliveryReceipt {
            offset: entry_offset(&id),
            topic,
            partition: 0,
        }),
        Err(err) => {
            // Reconnect on the next record.
            *conn = None;
            Err(map_redis_error(&err))
        }
    }
}

/// Consumer-group reader over one stream.
pub struct RedisStreamsSource {
    client: redis::Client,
    conn: Option<redis::Connection>,
    stream: String,
    group: String,
    consumer: String,
    /// Set once this consumer's pending entries have all been re-read.
    pending_drained: bool,
}

impl std::fmt::Debug for RedisStreamsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsSource")
            .field("stream", &self.stream)
            .field("group", &self.group)
            .field("consumer", &self.consumer)
            .field("pending_drained", &self.pending_drained)
            .finish()
    }
}

impl RedisStreamsSource {
    /// Connect and make sure the consumer group exists (created at the stream start).
    pub fn open(
        redis_url: &str,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url).map_err(|e| map_redis_error(&e))?;
        let mut source = Self {
            client,
            conn: None,
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            pending_drained: false,
        };
        source.ensure_group()?;
        Ok(source)
    }

    fn ensure_group(&mut self) -> Result<(), BrokerError> {
        let stream = self.stream.clone();
        let group = self.group.clone();
        let conn = self.connection()?;

        let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(&stream, &group, "0");
        match created {
            Ok(()) => {
                debug!(stream = %stream, group = %group, "created consumer group");
                Ok(())
            }
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(err) => Err(map_redis_error(&err)),
        }
    }

    fn connection(&mut self) -> Result<&mut redis::Connection, BrokerError> {
        if self.conn.is_none() {
            let conn = self
                .client
                .get_connection()
                .map_err(|e| map_redis_error(&e))?;
            self.conn = Some(conn);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| BrokerError::Connection("redis connection unavailable".to_string()))
    }

    fn read_one(&mut self, timeout: Duration) -> Result<Option<StreamId>, BrokerError> {
        let mut options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1);
        let cursor = if self.pending_drained {
            // BLOCK 0 would wait forever.
            options = options.block(timeout.as_millis().max(1) as usize);
            NEW_CURSOR
        } else {
            PENDING_CURSOR
        };

        let stream = self.stream.clone();
        let reply: redis::RedisResult<Option<StreamReadReply>> = {
            let conn = self.connection()?;
            conn.xread_options(&[stream.as_str()], &[cursor], &options)
        };

        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                // Drop the connection; the next poll reconnects.
                self.conn = None;
                return Err(map_redis_error(&err));
            }
        };

        let entry = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next();

        if entry.is_none() && !self.pending_drained {
            debug!(stream = %self.stream, consumer = %self.consumer, "pending entries drained");
            self.pending_drained = true;
        }
        Ok(entry)
    }

    fn to_inbound(&self, entry: &StreamId) -> InboundRecord {
        InboundRecord {
            topic: self.stream.clone(),
            partition: 0,
            offset: entry_offset(&entry.id),
            key: entry.get::<String>(KEY_FIELD),
            payload: entry.get::<Vec<u8>>(PAYLOAD_FIELD),
        }
    }
}

impl RecordSource for RedisStreamsSource {
    type Ack = RedisStreamsAck;
    type Error = BrokerError;

    fn poll(&mut self, timeout: Duration) -> Result<Option<(InboundRecord, Self::Ack)>, Self::Error> {
        let Some(entry) = self.read_one(timeout)? else {
            return Ok(None);
        };

        let record = self.to_inbound(&entry);
        let ack = RedisStreamsAck {
            client: self.client.clone(),
            stream: self.stream.clone(),
            group: self.group.clone(),
            entry_id: entry.id,
        };
        Ok(Some((record, ack)))
    }
}

/// `XACK`s one stream entry for a consumer group.
#[derive(Debug)]
pub struct RedisStreamsAck {
    client: redis::Client,
    stream: String,
    group: String,
    entry_id: String,
}

impl Acknowledgment for RedisStreamsAck {
    fn acknowledge(&mut self) {
        let acked: redis::RedisResult<i64> = self
            .client
            .get_connection()
            .and_then(|mut conn| conn.xack(&self.stream, &self.group, &[self.entry_id.as_str()]));

        if let Err(err) = acked {
            // The entry stays pending and is re-read after a restart.
            error!(
                stream = %self.stream,
                group = %self.group,
                entry_id = %self.entry_id,
                error = %err,
                "failed to acknowledge stream entry"
            );
        }
    }
}
