use super::meta::{Segment, SegmentMeta};
use crate::domain::Record;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};
use thiserror::Error;

const DOCUMENT_HEAD: &[u8] = b"{\"records\":[";

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("IO error during compression: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Streams a segment document through a zlib encoder, one record at a time.
///
/// Every record is followed by a sync flush, so `compressed_size` is exactly
/// the number of compressed bytes emitted for everything written so far. The
/// finished blob is larger by the compressed metadata trailer plus the final
/// block and Adler-32 checksum (6 bytes); the trailer is bounded by the
/// metadata size, a few hundred bytes for realistic ids.
pub struct SegmentWriter {
    encoder: ZlibEncoder<Vec<u8>>,
    records: usize,
}

impl SegmentWriter {
    pub fn new() -> Result<Self, SegmentError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(DOCUMENT_HEAD)?;
        Ok(Self {
            encoder,
            records: 0,
        })
    }

    pub fn write(&mut self, record: &Record) -> Result<(), SegmentError> {
        if self.records > 0 {
            self.encoder.write_all(b",")?;
        }
        serde_json::to_writer(&mut self.encoder, record)?;
        self.encoder.flush()?;
        self.records += 1;
        Ok(())
    }

    pub fn compressed_size(&self) -> usize {
        self.encoder.get_ref().len()
    }

    pub fn records(&self) -> usize {
        self.records
    }

    /// Closes the records array, appends the metadata fields to the same
    /// object and finishes the zlib stream.
    pub fn finish(mut self, meta: &SegmentMeta<'_>) -> Result<Vec<u8>, SegmentError> {
        let meta = serde_json::to_vec(meta)?;
        self.encoder.write_all(b"],")?;
        // `meta` is a JSON object; its opening brace is already in the stream.
        self.encoder.write_all(&meta[1..])?;
        Ok(self.encoder.finish()?)
    }
}

/// Inflates and parses a finished segment blob.
pub fn decode_segment(blob: &[u8]) -> Result<Segment, SegmentError> {
    let mut json = Vec::new();
    ZlibDecoder::new(blob).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RecordType;
    use crate::segment::meta::{CreationReason, EntityRef};
    use serde_json::json;

    fn meta(records_count: usize) -> SegmentMeta<'static> {
        SegmentMeta {
            application: EntityRef { id: "app" },
            session: EntityRef { id: "session" },
            view: EntityRef { id: "view" },
            start: 10,
            end: 20,
            creation_reason: CreationReason::Init,
            records_count,
            has_full_snapshot: false,
        }
    }

    #[test]
    fn test_finished_document_decodes() {
        let mut writer = SegmentWriter::new().unwrap();
        writer
            .write(&Record::new(RecordType::IncrementalSnapshot, 10, json!({"source": 5})))
            .unwrap();
        writer.write(&Record::view_end(20)).unwrap();

        let segment = decode_segment(&writer.finish(&meta(2)).unwrap()).unwrap();
        assert_eq!(segment.records.len(), 2);
        assert_eq!(segment.records[1].kind, RecordType::ViewEnd);
        assert_eq!(segment.session.id, "session");
        assert_eq!(segment.records_count, 2);
        assert_eq!(segment.creation_reason, CreationReason::Init);
    }

    #[test]
    fn test_empty_document_decodes() {
        let writer = SegmentWriter::new().unwrap();
        let segment = decode_segment(&writer.finish(&meta(0)).unwrap()).unwrap();
        assert!(segment.records.is_empty());
    }

    #[test]
    fn test_compressed_size_tracks_emitted_bytes() {
        let mut writer = SegmentWriter::new().unwrap();
        let mut previous = writer.compressed_size();
        for i in 0..20 {
            writer
                .write(&Record::new(RecordType::IncrementalSnapshot, i, json!({"text": "x".repeat(100)})))
                .unwrap();
            assert!(writer.compressed_size() > previous);
            previous = writer.compressed_size();
        }

        let finished = writer.finish(&meta(20)).unwrap();
        assert!(finished.len() >= previous);
        assert!(finished.len() - previous < 512);
    }
}
