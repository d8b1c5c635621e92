use crate::domain::{Message, PayloadKind, TelemetryError};
use crate::monitoring::Monitor;
use crate::sender::{ContentEncoding, FlushReason, PendingPayload, Transport};
use bytes::Bytes;
use flate2::{Compression, write::GzEncoder};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub batch_bytes_limit: usize,
    pub max_message_size: usize,
    pub compress: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            batch_bytes_limit: 16 * 1024,
            max_message_size: 256 * 1024,
            compress: false,
        }
    }
}

/// Accumulates serialized messages into newline-delimited batches.
///
/// Byte accounting is incremental: `bytes_count` always equals the length of
/// the body `flush` would produce (messages plus one `\n` between each).
pub struct BatchBuffer {
    kind: PayloadKind,
    config: BatchConfig,
    transport: Arc<dyn Transport>,
    monitor: Arc<dyn Monitor>,
    messages: Vec<String>,
    upserts: Vec<(String, String)>,
    upsert_index: HashMap<String, usize>,
    bytes_count: usize,
    flush_count: u64,
}

impl BatchBuffer {
    pub fn new(
        kind: PayloadKind,
        config: BatchConfig,
        transport: Arc<dyn Transport>,
        monitor: Arc<dyn Monitor>,
    ) -> Self {
        Self {
            kind,
            config,
            transport,
            monitor,
            messages: Vec::new(),
            upserts: Vec::new(),
            upsert_index: HashMap::new(),
            bytes_count: 0,
            flush_count: 0,
        }
    }

    /// Buffers a message, flushing first when it would not fit. Returns false
    /// when the message was dropped.
    pub fn add(&mut self, message: Message) -> bool {
        let Some(serialized) = self.serialize(&message) else {
            return false;
        };

        self.make_room(serialized.len());
        self.bytes_count = self.bytes_with(serialized.len());
        self.messages.push(serialized);
        self.flush_if_full();
        true
    }

    /// Buffers a keyed message, replacing a buffered message with the same key
    /// in place.
    pub fn upsert(&mut self, message: Message, key: impl Into<String>) -> bool {
        let Some(serialized) = self.serialize(&message) else {
            return false;
        };
        let key = key.into();

        if let Some(&index) = self.upsert_index.get(&key) {
            let replaced = self.bytes_count - self.upserts[index].1.len() + serialized.len();
            if replaced <= self.config.batch_bytes_limit {
                self.bytes_count = replaced;
                self.upserts[index].1 = serialized;
                return true;
            }
            self.flush(FlushReason::BytesLimit);
        }

        self.make_room(serialized.len());
        self.bytes_count = self.bytes_with(serialized.len());
        self.upsert_index.insert(key.clone(), self.upserts.len());
        self.upserts.push((key, serialized));
        self.flush_if_full();
        true
    }

    /// Hands the current batch to the transport and resets. No-op when empty.
    pub fn flush(&mut self, reason: FlushReason) -> bool {
        if self.is_empty() {
            return false;
        }

        let messages = self.len();
        let mut data = Vec::with_capacity(self.bytes_count);
        let entries = self
            .messages
            .drain(..)
            .chain(self.upserts.drain(..).map(|(_, message)| message));
        for (i, entry) in entries.enumerate() {
            if i > 0 {
                data.push(b'\n');
            }
            data.extend_from_slice(entry.as_bytes());
        }
        self.upsert_index.clear();
        debug_assert_eq!(data.len(), self.bytes_count);
        self.bytes_count = 0;
        self.flush_count += 1;

        let (body, encoding) = if self.config.compress {
            match gzip(&data) {
                Ok(compressed) => (compressed, Some(ContentEncoding::Gzip)),
                Err(e) => {
                    warn!("Failed to gzip {} batch, sending uncompressed: {}", self.kind, e);
                    (data, None)
                }
            }
        } else {
            (data, None)
        };

        debug!(
            "Flushing {} batch ({} messages, {} bytes, reason: {})",
            self.kind,
            messages,
            body.len(),
            reason
        );
        self.transport.send(PendingPayload::batch(
            self.kind,
            reason,
            Bytes::from(body),
            encoding,
            messages,
        ));
        true
    }

    pub fn len(&self) -> usize {
        self.messages.len() + self.upserts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes_count(&self) -> usize {
        self.bytes_count
    }

    /// Number of batches handed to the transport so far.
    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Largest message that can ever be buffered: beyond the batch limit a
    /// message could not fit even in an empty batch.
    pub fn message_limit(&self) -> usize {
        self.config.max_message_size.min(self.config.batch_bytes_limit)
    }

    fn serialize(&self, message: &Message) -> Option<String> {
        let serialized = match message.to_json() {
            Ok(serialized) => serialized,
            Err(source) => {
                self.monitor.report(&TelemetryError::Serialization {
                    kind: self.kind,
                    source,
                });
                return None;
            }
        };

        let limit = self.message_limit();
        if serialized.len() > limit {
            self.monitor.report(&TelemetryError::OversizedMessage {
                kind: self.kind,
                size: serialized.len(),
                limit,
            });
            return None;
        }
        Some(serialized)
    }

    fn bytes_with(&self, size: usize) -> usize {
        if self.is_empty() {
            size
        } else {
            self.bytes_count + 1 + size
        }
    }

    fn make_room(&mut self, size: usize) {
        if self.len() >= self.config.max_batch_size {
            self.flush(FlushReason::MessagesLimit);
        } else if self.bytes_with(size) > self.config.batch_bytes_limit {
            self.flush(FlushReason::BytesLimit);
        }
    }

    fn flush_if_full(&mut self) {
        if self.len() >= self.config.max_batch_size {
            self.flush(FlushReason::MessagesLimit);
        }
    }
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data)?;
    encoder.finish()
}
