//! The envelope carried by every message on the bus.

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Map;

/// Message envelope. Every field is optional so that an empty document
/// decodes to `Metadata::default()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Offset from UTC in seconds, used to read naive timestamps in the payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map>,
}

impl Metadata {
    /// A fresh envelope with a new id around `payload`.
    pub fn new(payload: Map) -> Self {
        Self {
            id: Some(Uuid::new_v4()),
            payload: Some(payload),
            ..Default::default()
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_timezone(mut self, offset_secs: i32) -> Self {
        self.timezone = Some(offset_secs);
        self
    }

    /// The declared offset, or UTC when absent or out of range.
    pub fn offset(&self) -> FixedOffset {
        self.timezone
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_document_is_default() {
        let meta: Metadata = serde_json::from_value(json!({})).unwrap();
        assert_eq!(meta, Metadata::default());
    }

    #[test]
    fn absent_fields_are_not_serialized() {
        let json = serde_json::to_value(Metadata::default()).unwrap();
        assert_eq!(json, json!({}));
    }

    #[test]
    fn offset_falls_back_to_utc() {
        assert_eq!(Metadata::default().offset().local_minus_utc(), 0);
        assert_eq!(
            Metadata::default().with_timezone(3600).offset().local_minus_utc(),
            3600
        );
        // Out of range offsets are ignored.
        assert_eq!(
            Metadata::default().with_timezone(90_000).offset().local_minus_utc(),
            0
        );
    }
}
