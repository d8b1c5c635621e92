use crate::domain::PayloadKind;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Form part that carries the compressed segment.
pub const SEGMENT_PART_NAME: &str = "segment";

/// Upper bound on the framing around one form part: boundary line,
/// Content-Disposition header and trailing CRLF.
const MULTIPART_PART_FRAMING: usize = 128;
/// Filename attribute and Content-Type line of the segment part.
const MULTIPART_FILE_FRAMING: usize = 64;
/// Closing boundary line.
const MULTIPART_CLOSING: usize = 80;

/// Why a batch or segment was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    BytesLimit,
    MessagesLimit,
    Timeout,
    SegmentSize,
    ViewChange,
    SessionRenewed,
    VisibilityHidden,
    BeforeUnload,
}

impl FlushReason {
    /// Unload-class triggers: the process may not survive past them, so they
    /// are never deferred.
    pub fn is_forced(self) -> bool {
        matches!(self, FlushReason::VisibilityHidden | FlushReason::BeforeUnload)
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlushReason::BytesLimit => "bytes_limit",
            FlushReason::MessagesLimit => "messages_limit",
            FlushReason::Timeout => "timeout",
            FlushReason::SegmentSize => "segment_size",
            FlushReason::ViewChange => "view_change",
            FlushReason::SessionRenewed => "session_renewed",
            FlushReason::VisibilityHidden => "visibility_hidden",
            FlushReason::BeforeUnload => "before_unload",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Gzip,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PayloadBody {
    /// Newline-delimited JSON messages, possibly gzip-encoded.
    Batch {
        data: Bytes,
        encoding: Option<ContentEncoding>,
        messages: usize,
    },
    /// Zlib-compressed replay segment plus its discrete form fields.
    Segment {
        fields: Vec<(&'static str, String)>,
        segment: Bytes,
        file_name: String,
    },
}

/// A flushed batch or segment, owned by the transport for the duration of
/// the send. Cloning only bumps the `Bytes` refcount.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPayload {
    pub id: Uuid,
    pub kind: PayloadKind,
    pub reason: FlushReason,
    pub body: PayloadBody,
}

impl PendingPayload {
    pub fn batch(
        kind: PayloadKind,
        reason: FlushReason,
        data: Bytes,
        encoding: Option<ContentEncoding>,
        messages: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            reason,
            body: PayloadBody::Batch {
                data,
                encoding,
                messages,
            },
        }
    }

    pub fn segment(
        reason: FlushReason,
        fields: Vec<(&'static str, String)>,
        segment: Bytes,
        file_name: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: PayloadKind::Replay,
            reason,
            body: PayloadBody::Segment {
                fields,
                segment,
                file_name,
            },
        }
    }

    /// Bytes that go over the wire. Multipart framing is counted with an
    /// upper bound, so a segment never exceeds the beacon limit it was
    /// checked against.
    pub fn size(&self) -> usize {
        match &self.body {
            PayloadBody::Batch { data, .. } => data.len(),
            PayloadBody::Segment {
                fields,
                segment,
                file_name,
            } => {
                let fields_size = fields
                    .iter()
                    .map(|(name, value)| MULTIPART_PART_FRAMING + name.len() + value.len())
                    .sum::<usize>();
                let segment_size = MULTIPART_PART_FRAMING
                    + MULTIPART_FILE_FRAMING
                    + SEGMENT_PART_NAME.len()
                    + file_name.len()
                    + segment.len();
                fields_size + segment_size + MULTIPART_CLOSING
            }
        }
    }

    /// Looks up a discrete segment field by name.
    pub fn field(&self, name: &str) -> Option<&str> {
        match &self.body {
            PayloadBody::Segment { fields, .. } => fields
                .iter()
                .find(|(field, _)| *field == name)
                .map(|(_, value)| value.as_str()),
            PayloadBody::Batch { .. } => None,
        }
    }
}
