use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Replay record variants. Serialized as their numeric wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    DomContentLoaded = 0,
    Load = 1,
    FullSnapshot = 2,
    IncrementalSnapshot = 3,
    Meta = 4,
    Custom = 5,
    Focus = 6,
    ViewEnd = 7,
}

impl RecordType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => RecordType::DomContentLoaded,
            1 => RecordType::Load,
            2 => RecordType::FullSnapshot,
            3 => RecordType::IncrementalSnapshot,
            4 => RecordType::Meta,
            5 => RecordType::Custom,
            6 => RecordType::Focus,
            7 => RecordType::ViewEnd,
            _ => return None,
        })
    }
}

impl Serialize for RecordType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for RecordType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = u8::deserialize(deserializer)?;
        RecordType::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown record type {code}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub kind: RecordType,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Record {
    pub fn new(kind: RecordType, timestamp: i64, data: Value) -> Self {
        Self {
            kind,
            timestamp,
            data,
        }
    }

    pub fn view_end(timestamp: i64) -> Self {
        Self::new(RecordType::ViewEnd, timestamp, Value::Null)
    }

    pub fn is_full_snapshot(&self) -> bool {
        self.kind == RecordType::FullSnapshot
    }
}
