pub mod builder;
pub mod meta;
pub mod writer;

pub use builder::{SegmentBuilder, SegmentConfig};
pub use meta::{CreationReason, Segment, SegmentMeta};
pub use writer::{SegmentError, SegmentWriter, decode_segment};
