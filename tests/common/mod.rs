#![allow(dead_code)]

use parking_lot::Mutex;
use rask_telemetry_agent::app::CaptureControl;
use rask_telemetry_agent::domain::TelemetryError;
use rask_telemetry_agent::monitoring::Monitor;
use rask_telemetry_agent::segment::{Segment, decode_segment};
use rask_telemetry_agent::sender::{PayloadBody, PendingPayload, Transport};
use rask_telemetry_agent::{Record, RecordType};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Transport that keeps every payload it is handed.
#[derive(Default)]
pub struct CapturingTransport {
    sent: Mutex<Vec<PendingPayload>>,
}

impl CapturingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<PendingPayload> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn segments(&self) -> Vec<Segment> {
        self.sent().iter().map(segment_of).collect()
    }
}

impl Transport for CapturingTransport {
    fn send(&self, payload: PendingPayload) {
        self.sent.lock().push(payload);
    }
}

#[derive(Default)]
pub struct RecordingMonitor {
    reports: Mutex<Vec<String>>,
}

impl RecordingMonitor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reports(&self) -> Vec<String> {
        self.reports.lock().clone()
    }
}

impl Monitor for RecordingMonitor {
    fn report(&self, error: &TelemetryError) {
        self.reports.lock().push(error.to_string());
    }
}

#[derive(Default)]
pub struct CountingCapture {
    requests: AtomicUsize,
}

impl CountingCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl CaptureControl for CountingCapture {
    fn take_full_snapshot(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn segment_of(payload: &PendingPayload) -> Segment {
    match &payload.body {
        PayloadBody::Segment { segment, .. } => decode_segment(segment).unwrap(),
        PayloadBody::Batch { .. } => panic!("expected a replay segment"),
    }
}

pub fn batch_lines(payload: &PendingPayload) -> Vec<serde_json::Value> {
    match &payload.body {
        PayloadBody::Batch { data, .. } => std::str::from_utf8(data)
            .unwrap()
            .split('\n')
            .map(|line| serde_json::from_str(line).unwrap())
            .collect(),
        PayloadBody::Segment { .. } => panic!("expected a batch"),
    }
}

pub fn record(kind: RecordType, timestamp: i64) -> Record {
    Record::new(kind, timestamp, json!({}))
}

pub fn click(timestamp: i64) -> Record {
    Record::new(
        RecordType::IncrementalSnapshot,
        timestamp,
        json!({"source": 2, "type": 2, "id": 7}),
    )
}

pub fn kinds(segment: &Segment) -> Vec<RecordType> {
    segment.records.iter().map(|record| record.kind).collect()
}
