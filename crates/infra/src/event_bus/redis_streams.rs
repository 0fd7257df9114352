//! Redis Streams-backed broker (durable, at-least-once delivery).
//!
//! - **Streams**: one Redis stream per broker stream name
//! - **Consumer groups**: `subscribe(group, streams)` joins `group` on every stream
//!   (created with `MKSTREAM` when missing)
//! - **Layout**: each entry carries `key` and `payload` fields plus one
//!   `header:<name>` field per header; the entry id supplies the timestamp
//!
//! The `redis` client used here is synchronous, so every call runs on a
//! blocking thread. Entries are acknowledged once handed to the subscriber.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use commander_events::{Broker, BrokerError, MessageStream, RawMessage};

pub const REDIS_URL_VAR: &str = "COMMANDER_REDIS_URL";
pub const REDIS_CONSUMER_VAR: &str = "COMMANDER_REDIS_CONSUMER";

const KEY_FIELD: &str = "key";
const PAYLOAD_FIELD: &str = "payload";
const HEADER_PREFIX: &str = "header:";

/// Back-off after a failed read before trying again.
const READ_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisStreamsConfig {
    pub url: String,
    /// Consumer name inside the group; unique per process.
    pub consumer_name: String,
    /// How long one `XREADGROUP` blocks; bounds how fast `close` is observed.
    pub block: Duration,
    pub batch_size: usize,
}

impl Default for RedisStreamsConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            consumer_name: format!("consumer-{}", uuid::Uuid::now_v7()),
            block: Duration::from_millis(100),
            batch_size: 10,
        }
    }
}

impl RedisStreamsConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(REDIS_URL_VAR) {
            config.url = url;
        }
        if let Ok(consumer) = std::env::var(REDIS_CONSUMER_VAR) {
            config.consumer_name = consumer;
        }
        config
    }
}

#[derive(Debug)]
pub struct RedisStreamsBroker {
    client: Arc<redis::Client>,
    config: RedisStreamsConfig,
    closing: CancellationToken,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

impl RedisStreamsBroker {
    pub fn new(config: RedisStreamsConfig) -> Result<Self, BrokerError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            config,
            closing: CancellationToken::new(),
            readers: Mutex::new(Vec::new()),
        })
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closing.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for RedisStreamsBroker {
    #[instrument(skip(self, message), fields(stream = %message.stream), err)]
    async fn publish(&self, message: RawMessage) -> Result<(), BrokerError> {
        self.ensure_open()?;

        let client = self.client.clone();
        tokio::task::spawn_blocking(move || publish_sync(&client, &message))
            .await
            .map_err(|e| BrokerError::Command(format!("publish task failed: {e}")))?
    }

    async fn subscribe(&self, group: &str, streams: &[String]) -> Result<MessageStream, BrokerError> {
        self.ensure_open()?;

        let client = self.client.clone();
        let group = group.to_string();
        let streams = streams.to_vec();

        let setup = {
            let client = client.clone();
            let group = group.clone();
            let streams = streams.clone();
            tokio::task::spawn_blocking(move || ensure_groups_sync(&client, &group, &streams))
        };
        setup
            .await
            .map_err(|e| BrokerError::Command(format!("consumer group setup failed: {e}")))??;

        let (sender, receiver) = mpsc::unbounded_channel();
        let reader = Reader {
            client,
            group,
            consumer: self.config.consumer_name.clone(),
            streams,
            block: self.config.block,
            batch_size: self.config.batch_size.max(1),
            closing: self.closing.clone(),
            sender,
        };

        info!(group = %reader.group, consumer = %reader.consumer, streams = ?reader.streams, "joined consumer group");
        let handle = tokio::task::spawn_blocking(move || reader.run());
        self.readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);

        Ok(receiver)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closing.cancel();

        let readers: Vec<_> = self
            .readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for reader in readers {
            if let Err(e) = reader.await {
                warn!(error = %e, "stream reader ended abnormally");
            }
        }

        debug!("redis streams broker closed");
        Ok(())
    }
}

fn connect(client: &redis::Client) -> Result<redis::Connection, BrokerError> {
    client
        .get_connection()
        .map_err(|e| BrokerError::Connection(e.to_string()))
}

fn publish_sync(client: &redis::Client, message: &RawMessage) -> Result<(), BrokerError> {
    let mut conn = connect(client)?;

    let mut cmd = redis::cmd("XADD");
    cmd.arg(&message.stream)
        .arg("*")
        .arg(KEY_FIELD)
        .arg(&message.key[..])
        .arg(PAYLOAD_FIELD)
        .arg(&message.payload[..]);
    for (name, value) in &message.headers {
        cmd.arg(format!("{HEADER_PREFIX}{name}")).arg(value);
    }

    let _: String = cmd
        .query(&mut conn)
        .map_err(|e| BrokerError::Command(format!("XADD failed: {e}")))?;

    Ok(())
}

fn ensure_groups_sync(client: &redis::Client, group: &str, streams: &[String]) -> Result<(), BrokerError> {
    let mut conn = connect(client)?;

    for stream in streams {
        // `$` only delivers entries added after the group was created.
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query(&mut conn);

        match created {
            Ok(_) => debug!(%stream, %group, "consumer group created"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(BrokerError::Command(format!("XGROUP CREATE failed: {e}"))),
        }
    }

    Ok(())
}

/// One entry read from a stream.
#[derive(Debug, Clone)]
struct StreamEntry {
    id: String,
    message: RawMessage,
}

/// Result of one `XREADGROUP`: entries to hand off, plus `(stream, id)` of
/// malformed entries that are acknowledged without delivery.
#[derive(Debug, Default)]
struct ReadBatch {
    entries: Vec<(String, StreamEntry)>,
    skipped: Vec<(String, String)>,
}

/// Blocking read loop of one consumer group membership.
struct Reader {
    client: Arc<redis::Client>,
    group: String,
    consumer: String,
    streams: Vec<String>,
    block: Duration,
    batch_size: usize,
    closing: CancellationToken,
    sender: mpsc::UnboundedSender<RawMessage>,
}

impl Reader {
    fn run(self) {
        let mut conn = None;

        while !self.closing.is_cancelled() {
            if conn.is_none() {
                match connect(&self.client) {
                    Ok(fresh) => conn = Some(fresh),
                    Err(e) => {
                        error!(error = %e, "stream reader cannot connect");
                        std::thread::sleep(READ_RETRY_DELAY);
                        continue;
                    }
                }
            }
            let Some(active) = conn.as_mut() else {
                continue;
            };

            let batch = match self.read(active) {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "reading streams failed");
                    conn = None;
                    std::thread::sleep(READ_RETRY_DELAY);
                    continue;
                }
            };

            for (stream, id) in &batch.skipped {
                if let Err(e) = self.acknowledge(active, stream, id) {
                    warn!(error = %e, %stream, %id, "acknowledging malformed entry failed");
                }
            }

            for (stream, entry) in batch.entries {
                if self.sender.send(entry.message).is_err() {
                    debug!("subscriber gone, stopping stream reader");
                    return;
                }
                if let Err(e) = self.acknowledge(active, &stream, &entry.id) {
                    warn!(error = %e, %stream, id = %entry.id, "acknowledging entry failed");
                }
            }
        }

        debug!(group = %self.group, "stream reader stopped");
    }

    fn read(&self, conn: &mut redis::Connection) -> Result<ReadBatch, BrokerError> {
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(self.batch_size)
            .arg("BLOCK")
            .arg(self.block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.streams[..])
            .arg(vec![">"; self.streams.len()])
            .query(conn)
            .map_err(|e| BrokerError::Command(format!("XREADGROUP failed: {e}")))?;

        parse_read_reply(reply)
    }

    fn acknowledge(&self, conn: &mut redis::Connection, stream: &str, id: &str) -> Result<(), BrokerError> {
        let _: u64 = redis::cmd("XACK")
            .arg(stream)
            .arg(&self.group)
            .arg(id)
            .query(conn)
            .map_err(|e| BrokerError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }
}

/// Parse an `XREADGROUP` reply: `[[stream, [[id, [field, value, ...]], ...]], ...]`.
///
/// Entries with an unexpected shape are skipped with a warning and reported in
/// `skipped` when their id is readable; a reply with an unexpected shape is an
/// error.
fn parse_read_reply(reply: Value) -> Result<ReadBatch, BrokerError> {
    let streams = match reply {
        Value::Nil => return Ok(ReadBatch::default()),
        Value::Bulk(streams) => streams,
        other => return Err(BrokerError::Protocol(format!("unexpected XREADGROUP reply: {other:?}"))),
    };

    let mut batch = ReadBatch::default();
    for stream in streams {
        let Value::Bulk(mut parts) = stream else {
            return Err(BrokerError::Protocol("stream reply is not an array".to_string()));
        };
        if parts.len() != 2 {
            return Err(BrokerError::Protocol(format!("stream reply has {} parts", parts.len())));
        }
        let entries = parts.pop();
        let name = parts.pop().and_then(into_text).ok_or_else(|| {
            BrokerError::Protocol("stream name is not a string".to_string())
        })?;
        let Some(Value::Bulk(entries)) = entries else {
            return Err(BrokerError::Protocol("stream entries are not an array".to_string()));
        };

        for entry in entries {
            let id = entry_id(&entry);
            match parse_entry(&name, entry) {
                Ok(entry) => batch.entries.push((name.clone(), entry)),
                Err(e) => {
                    warn!(stream = %name, id = ?id, error = %e, "skipping malformed stream entry");
                    if let Some(id) = id {
                        batch.skipped.push((name.clone(), id));
                    }
                }
            }
        }
    }

    Ok(batch)
}

fn entry_id(entry: &Value) -> Option<String> {
    match entry {
        Value::Bulk(parts) => parts.first().cloned().and_then(into_text),
        _ => None,
    }
}

fn parse_entry(stream: &str, entry: Value) -> Result<StreamEntry, BrokerError> {
    let Value::Bulk(mut parts) = entry else {
        return Err(BrokerError::Protocol("entry is not an array".to_string()));
    };
    if parts.len() != 2 {
        return Err(BrokerError::Protocol(format!("entry has {} parts", parts.len())));
    }
    let fields = parts.pop();
    let id = parts
        .pop()
        .and_then(into_text)
        .ok_or_else(|| BrokerError::Protocol("entry id is not a string".to_string()))?;
    let Some(Value::Bulk(fields)) = fields else {
        return Err(BrokerError::Protocol("entry fields are not an array".to_string()));
    };

    let mut key = Vec::new();
    let mut payload = Vec::new();
    let mut headers = HashMap::new();
    for pair in fields.chunks(2) {
        let [Value::Data(field), Value::Data(value)] = pair else {
            return Err(BrokerError::Protocol("entry field is not a string pair".to_string()));
        };
        let field = String::from_utf8_lossy(field);
        match &*field {
            KEY_FIELD => key = value.clone(),
            PAYLOAD_FIELD => payload = value.clone(),
            other => {
                if let Some(name) = other.strip_prefix(HEADER_PREFIX) {
                    headers.insert(name.to_string(), String::from_utf8_lossy(value).into_owned());
                }
            }
        }
    }

    let mut message = RawMessage::new(stream, key, payload).with_timestamp(entry_timestamp(&id));
    message.headers = headers;

    Ok(StreamEntry { id, message })
}

/// Entry ids are `<unix millis>-<sequence>`.
fn entry_timestamp(id: &str) -> DateTime<Utc> {
    id.split('-')
        .next()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

fn into_text(value: Value) -> Option<String> {
    match value {
        Value::Data(bytes) => String::from_utf8(bytes).ok(),
        Value::Status(text) => Some(text),
        _ => None,
    }
}
