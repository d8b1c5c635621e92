use crate::domain::Record;
use crate::sender::FlushReason;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a segment was started: the trigger that ended its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationReason {
    Init,
    MaxSize,
    MaxDuration,
    ViewChange,
    SessionRenewed,
    BeforeUnload,
    VisibilityHidden,
}

impl CreationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CreationReason::Init => "init",
            CreationReason::MaxSize => "max_size",
            CreationReason::MaxDuration => "max_duration",
            CreationReason::ViewChange => "view_change",
            CreationReason::SessionRenewed => "session_renewed",
            CreationReason::BeforeUnload => "before_unload",
            CreationReason::VisibilityHidden => "visibility_hidden",
        }
    }
}

impl From<FlushReason> for CreationReason {
    fn from(reason: FlushReason) -> Self {
        match reason {
            FlushReason::BytesLimit | FlushReason::MessagesLimit | FlushReason::SegmentSize => {
                CreationReason::MaxSize
            }
            FlushReason::Timeout => CreationReason::MaxDuration,
            FlushReason::ViewChange => CreationReason::ViewChange,
            FlushReason::SessionRenewed => CreationReason::SessionRenewed,
            FlushReason::VisibilityHidden => CreationReason::VisibilityHidden,
            FlushReason::BeforeUnload => CreationReason::BeforeUnload,
        }
    }
}

impl fmt::Display for CreationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityId {
    pub id: String,
}

/// Trailing metadata of the compressed segment document. Written after the
/// records, once counts and the end timestamp are final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentMeta<'a> {
    pub application: EntityRef<'a>,
    pub session: EntityRef<'a>,
    pub view: EntityRef<'a>,
    pub start: i64,
    pub end: i64,
    pub creation_reason: CreationReason,
    pub records_count: usize,
    pub has_full_snapshot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntityRef<'a> {
    pub id: &'a str,
}

/// A decoded segment document, as the collector sees it after inflating.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Segment {
    pub records: Vec<Record>,
    pub application: EntityId,
    pub session: EntityId,
    pub view: EntityId,
    pub start: i64,
    pub end: i64,
    pub creation_reason: CreationReason,
    pub records_count: usize,
    pub has_full_snapshot: bool,
}
