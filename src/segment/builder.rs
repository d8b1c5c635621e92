use super::meta::{CreationReason, EntityRef, SegmentMeta};
use super::writer::{SegmentError, SegmentWriter};
use crate::domain::{Record, RecordType, SessionContext, TelemetryError};
use crate::monitoring::Monitor;
use crate::sender::{FlushReason, PendingPayload, Transport};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// Compressed bytes after which the segment is flushed.
    pub max_segment_size: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_segment_size: 6 * 1024 * 1024,
        }
    }
}

struct OpenSegment {
    context: SessionContext,
    creation_reason: CreationReason,
    writer: SegmentWriter,
    start: i64,
    end: i64,
    records_count: usize,
    has_full_snapshot: bool,
}

/// Assembles replay records into compressed segments.
///
/// A segment always belongs to exactly one session and one view. A full
/// snapshot group (Meta, Focus, FullSnapshot) always opens a segment, and is
/// never split by a flush unless the flush is forced by page teardown.
pub struct SegmentBuilder {
    config: SegmentConfig,
    transport: Arc<dyn Transport>,
    monitor: Arc<dyn Monitor>,
    current: Option<OpenSegment>,
    next_creation_reason: CreationReason,
    group_open: bool,
    deferred: Option<FlushReason>,
    awaiting_session: bool,
    session_seen: bool,
    full_snapshot_requested: bool,
    snapshot_reason: Option<FlushReason>,
    flush_count: u64,
}

impl SegmentBuilder {
    /// The builder starts out wanting a full snapshot: no segment can be
    /// interpreted without a baseline.
    pub fn new(config: SegmentConfig, transport: Arc<dyn Transport>, monitor: Arc<dyn Monitor>) -> Self {
        Self {
            config,
            transport,
            monitor,
            current: None,
            next_creation_reason: CreationReason::Init,
            group_open: false,
            deferred: None,
            awaiting_session: false,
            session_seen: false,
            full_snapshot_requested: true,
            snapshot_reason: None,
            flush_count: 0,
        }
    }

    /// Appends a record to the open segment. `context` is the session and
    /// view polled at this instant; `None` means the session is untracked.
    pub fn add_record(&mut self, record: Record, context: Option<&SessionContext>) {
        let Some(context) = context else {
            self.discard();
            return;
        };

        self.session_seen = true;
        if self.awaiting_session {
            self.awaiting_session = false;
            self.next_creation_reason = CreationReason::SessionRenewed;
            self.request_full_snapshot(FlushReason::SessionRenewed);
        }

        let rotation = self.current.as_ref().and_then(|open| {
            if open.context.session_id != context.session_id {
                Some(FlushReason::SessionRenewed)
            } else if open.context.view_id != context.view_id {
                Some(FlushReason::ViewChange)
            } else {
                None
            }
        });
        if let Some(reason) = rotation {
            if self.group_open {
                // The rest of the group still belongs to the segment it started in.
                debug!("Deferring {} segment rotation until the full snapshot is complete", reason);
                self.deferred.get_or_insert(reason);
            } else {
                self.flush_now(reason);
            }
            self.request_full_snapshot(reason);
        }

        let starts_group = match record.kind {
            RecordType::Meta => true,
            RecordType::FullSnapshot => !self.group_open,
            _ => false,
        };
        if starts_group && self.records_count() > 0 {
            let reason = self.snapshot_reason.take().unwrap_or(FlushReason::ViewChange);
            self.flush_now(reason);
        }

        if let Err(e) = self.append(record, context) {
            self.monitor.report(&TelemetryError::SegmentEncoding(e.to_string()));
            self.current = None;
            self.group_open = false;
            self.request_full_snapshot(FlushReason::SegmentSize);
            return;
        }

        if self.group_open {
            return;
        }
        if let Some(reason) = self.deferred.take() {
            self.flush_now(reason);
        } else if self.compressed_size() >= self.config.max_segment_size {
            self.flush_now(FlushReason::SegmentSize);
        }
    }

    /// Ends the open segment. Deferred while a full snapshot group is being
    /// written, unless the trigger is forced. Records are discarded instead
    /// when the session is untracked.
    pub fn flush(&mut self, reason: FlushReason, context: Option<&SessionContext>) -> bool {
        if context.is_none() {
            self.discard();
            return false;
        }
        if self.group_open && !reason.is_forced() {
            debug!("Deferring {} segment flush until the full snapshot is complete", reason);
            self.deferred = Some(reason);
            return false;
        }
        self.flush_now(reason)
    }

    /// A new view starts: the open segment belongs to the previous one, and
    /// the next segment needs its own baseline.
    pub fn on_view_created(&mut self, context: Option<&SessionContext>) -> bool {
        let flushed = self.flush(FlushReason::ViewChange, context);
        self.next_creation_reason = CreationReason::ViewChange;
        self.request_full_snapshot(FlushReason::ViewChange);
        flushed
    }

    /// The session was renewed: whatever is open belongs to the old one.
    pub fn on_session_renewed(&mut self, context: Option<&SessionContext>) -> bool {
        let flushed = self.flush(FlushReason::SessionRenewed, context);
        self.session_seen = true;
        self.awaiting_session = false;
        self.next_creation_reason = CreationReason::SessionRenewed;
        self.request_full_snapshot(FlushReason::SessionRenewed);
        flushed
    }

    /// Closes the current view with a `ViewEnd` record and flushes.
    pub fn on_view_ended(&mut self, timestamp: i64, context: Option<&SessionContext>) -> bool {
        if self.current.is_some() {
            self.add_record(Record::view_end(timestamp), context);
        }
        self.flush(FlushReason::ViewChange, context)
    }

    /// Returns true once per pending full snapshot request.
    pub fn take_full_snapshot_request(&mut self) -> bool {
        std::mem::take(&mut self.full_snapshot_requested)
    }

    pub fn is_empty(&self) -> bool {
        self.records_count() == 0
    }

    pub fn records_count(&self) -> usize {
        self.current.as_ref().map_or(0, |open| open.records_count)
    }

    pub fn compressed_size(&self) -> usize {
        self.current
            .as_ref()
            .map_or(0, |open| open.writer.compressed_size())
    }

    /// Number of segments handed to the transport so far.
    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }

    pub fn next_creation_reason(&self) -> CreationReason {
        self.current
            .as_ref()
            .map_or(self.next_creation_reason, |open| open.creation_reason)
    }

    fn append(&mut self, record: Record, context: &SessionContext) -> Result<(), SegmentError> {
        let mut open = match self.current.take() {
            Some(open) => open,
            None => OpenSegment {
                context: context.clone(),
                creation_reason: self.next_creation_reason,
                writer: SegmentWriter::new()?,
                start: record.timestamp,
                end: record.timestamp,
                records_count: 0,
                has_full_snapshot: false,
            },
        };

        open.writer.write(&record)?;
        open.records_count += 1;
        open.end = open.end.max(record.timestamp);
        open.has_full_snapshot |= record.is_full_snapshot();
        self.current = Some(open);

        match record.kind {
            RecordType::Meta => self.group_open = true,
            RecordType::Focus => {}
            _ => self.group_open = false,
        }
        Ok(())
    }

    fn flush_now(&mut self, reason: FlushReason) -> bool {
        self.next_creation_reason = CreationReason::from(reason);
        self.deferred = None;
        if self.group_open {
            info!("Flushing replay segment with an incomplete full snapshot ({})", reason);
            self.group_open = false;
            self.request_full_snapshot(reason);
        }

        let Some(open) = self.current.take() else {
            return false;
        };

        let meta = SegmentMeta {
            application: EntityRef {
                id: &open.context.application_id,
            },
            session: EntityRef {
                id: &open.context.session_id,
            },
            view: EntityRef {
                id: &open.context.view_id,
            },
            start: open.start,
            end: open.end,
            creation_reason: open.creation_reason,
            records_count: open.records_count,
            has_full_snapshot: open.has_full_snapshot,
        };
        let fields = vec![
            ("application.id", open.context.application_id.clone()),
            ("session.id", open.context.session_id.clone()),
            ("view.id", open.context.view_id.clone()),
            ("start", open.start.to_string()),
            ("end", open.end.to_string()),
            ("creation_reason", open.creation_reason.to_string()),
            ("records_count", open.records_count.to_string()),
            ("has_full_snapshot", open.has_full_snapshot.to_string()),
        ];
        let file_name = format!("{}-{}", open.context.session_id, open.start);

        let blob = match open.writer.finish(&meta) {
            Ok(blob) => blob,
            Err(e) => {
                self.monitor.report(&TelemetryError::SegmentEncoding(e.to_string()));
                return false;
            }
        };

        debug!(
            "Flushing replay segment ({} records, {} bytes, created: {}, reason: {})",
            meta.records_count,
            blob.len(),
            meta.creation_reason,
            reason
        );
        self.flush_count += 1;
        self.transport
            .send(PendingPayload::segment(reason, fields, Bytes::from(blob), file_name));
        true
    }

    fn discard(&mut self) {
        if let Some(open) = self.current.take() {
            debug!(
                "Discarding {} replay records: session is no longer tracked",
                open.records_count
            );
        }
        self.group_open = false;
        self.deferred = None;
        // A page that never had a session is starting, not renewing.
        self.awaiting_session = self.session_seen;
    }

    fn request_full_snapshot(&mut self, reason: FlushReason) {
        self.full_snapshot_requested = true;
        self.snapshot_reason = Some(reason);
    }
}
