//! Documents written to the store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A numeric (or structured) sample reported by the application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeterMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(
        rename = "operationID",
        alias = "operationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Raw request body, only kept in verbose mode
    #[serde(rename = "appendix", default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl MeterMessage {
    /// Set the timestamp to `now` unless the sender supplied a real one.
    /// Returns the effective timestamp.
    pub fn stamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.timestamp {
            Some(ts) if !is_zero_time(&ts) => ts,
            _ => {
                self.timestamp = Some(now);
                now
            }
        }
    }
}

/// A free-text log line
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Meter,
    Log,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Meter => "meter",
            DocumentKind::Log => "log",
        }
    }
}

/// Envelope persisted to the store: a common timestamp plus one payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter: Option<MeterMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LogMessage>,
}

impl Document {
    pub fn meter(timestamp: DateTime<Utc>, meter: MeterMessage) -> Self {
        Self {
            timestamp,
            meter: Some(meter),
            log: None,
        }
    }

    pub fn log(timestamp: DateTime<Utc>, log: LogMessage) -> Self {
        Self {
            timestamp,
            meter: None,
            log: Some(log),
        }
    }

    pub fn kind(&self) -> DocumentKind {
        if self.meter.is_some() {
            DocumentKind::Meter
        } else {
            DocumentKind::Log
        }
    }
}

/// `0001-01-01T00:00:00Z`, the zero value some clients send for "unset"
fn is_zero_time(ts: &DateTime<Utc>) -> bool {
    ts.timestamp() <= -62_135_596_800
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_decode_meter_message() {
        let meter: MeterMessage = serde_json::from_str(
            r#"{"timestamp":"2018-02-19T12:32:32Z","value":9231.123,"unit":"byte per second"}"#,
        )
        .unwrap();

        assert_eq!(meter.value, serde_json::json!(9231.123));
        assert_eq!(meter.unit.as_deref(), Some("byte per second"));
        assert_eq!(
            meter.timestamp,
            Some(Utc.with_ymd_and_hms(2018, 2, 19, 12, 32, 32).unwrap())
        );
    }

    #[test]
    fn test_decode_log_message() {
        let log: LogMessage =
            serde_json::from_str(r#"{"timestamp":"2018-02-19T12:32:32Z","value":"foobar"}"#)
                .unwrap();

        assert_eq!(log.value, "foobar");
        assert_eq!(
            log.timestamp,
            Some(Utc.with_ymd_and_hms(2018, 2, 19, 12, 32, 32).unwrap())
        );
    }

    #[test]
    fn test_stamp() {
        let now = Utc::now();

        let mut unset = MeterMessage::default();
        assert_eq!(unset.stamp(now), now);
        assert_eq!(unset.timestamp, Some(now));

        let mut zero: MeterMessage =
            serde_json::from_str(r#"{"timestamp":"0001-01-01T00:00:00Z","value":1}"#).unwrap();
        assert_eq!(zero.stamp(now), now);

        let given = Utc.with_ymd_and_hms(2018, 2, 19, 12, 32, 32).unwrap();
        let mut set = MeterMessage {
            timestamp: Some(given),
            ..Default::default()
        };
        assert_eq!(set.stamp(now), given);
    }

    #[test]
    fn test_envelope_shape() {
        let ts = Utc.with_ymd_and_hms(2018, 2, 19, 12, 32, 32).unwrap();
        let doc = Document::meter(
            ts,
            MeterMessage {
                operation_id: Some("op-1".to_string()),
                value: serde_json::json!(3),
                raw: Some("{}".to_string()),
                ..Default::default()
            },
        );

        assert_eq!(doc.kind(), DocumentKind::Meter);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["@timestamp"], "2018-02-19T12:32:32Z");
        assert_eq!(json["meter"]["operationID"], "op-1");
        assert_eq!(json["meter"]["appendix"], "{}");
        assert!(json.get("log").is_none());

        let doc = Document::log(ts, LogMessage { timestamp: None, value: "x".into() });
        assert_eq!(doc.kind(), DocumentKind::Log);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["log"]["value"], "x");
        assert!(json.get("meter").is_none());
    }
}
