//! Trace messages and the tracing context derived from their hex identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// A span event reported by the instrumented application.
///
/// The same shape is used for both "open" (`/trace`) and "close" (`/close`)
/// events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceMessage {
    #[serde(default)]
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_span_id: String,
    #[serde(default)]
    pub span_id: String,
    #[serde(default)]
    pub operation: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl TraceMessage {
    pub fn new(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent_span_id: impl Into<String>) -> Self {
        self.parent_span_id = parent_span_id.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Registry key: trace id and span id concatenated as sent
    pub fn span_key(&self) -> String {
        let mut key = String::with_capacity(self.trace_id.len() + self.span_id.len());
        key.push_str(&self.trace_id);
        key.push_str(&self.span_id);
        key
    }
}

/// 128-bit trace identifier. `high` is zero for 64-bit trace ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId {
    pub high: u64,
    pub low: u64,
}

impl TraceId {
    /// Parse up to 32 hex digits. Anything past the trailing 16 digits
    /// lands in `high`.
    pub fn from_hex(hex: &str) -> Result<Self, HexError> {
        if hex.len() > 32 {
            return Err(HexError::TooLong(hex.len()));
        }

        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HexError::InvalidDigit(hex.to_string()));
        }

        if hex.len() > 16 {
            let split = hex.len() - 16;
            let high = parse_hex_u64(&hex[..split])?;
            let low = parse_hex_u64(&hex[split..])?;
            return Ok(Self { high, low });
        }

        Ok(Self {
            high: 0,
            low: parse_hex_u64(hex)?,
        })
    }

    pub fn random() -> Self {
        Self {
            high: 0,
            low: random_id(),
        }
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.high == 0 {
            write!(f, "{:016x}", self.low)
        } else {
            write!(f, "{:016x}{:016x}", self.high, self.low)
        }
    }
}

/// Identifiers of a span continued from a remote caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracingContext {
    pub trace_id: TraceId,
    pub parent_span_id: Option<u64>,
    pub span_id: u64,
    pub sampled: bool,
}

impl TracingContext {
    /// Build a context from the hex identifiers of a trace message.
    ///
    /// Returns `None` when the span id or trace id cannot be parsed. An
    /// unparsable parent id is not an error: the span is treated as a root.
    pub fn build(trace: &TraceMessage) -> Option<Self> {
        let parent_span_id = parse_hex_u64(&trace.parent_span_id).ok();

        let span_id = match parse_hex_u64(&trace.span_id) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(span_id = %trace.span_id, "did not parse span id: {}", e);
                return None;
            }
        };

        let trace_id = match TraceId::from_hex(&trace.trace_id) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(trace_id = %trace.trace_id, "did not parse trace id: {}", e);
                return None;
            }
        };

        Some(Self {
            trace_id,
            parent_span_id,
            span_id,
            sampled: true,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    #[error("empty identifier")]
    Empty,

    #[error("identifier too long: {0} hex digits")]
    TooLong(usize),

    #[error("invalid hex digit in '{0}'")]
    InvalidDigit(String),
}

/// Strict base-16 parse: ASCII hex digits only, at most 16 of them.
pub fn parse_hex_u64(hex: &str) -> Result<u64, HexError> {
    if hex.is_empty() {
        return Err(HexError::Empty);
    }
    if hex.len() > 16 {
        return Err(HexError::TooLong(hex.len()));
    }
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(HexError::InvalidDigit(hex.to_string()));
    }
    u64::from_str_radix(hex, 16).map_err(|_| HexError::InvalidDigit(hex.to_string()))
}

/// Non-zero random 64-bit id
pub(crate) fn random_id() -> u64 {
    loop {
        let id: u64 = rand::random();
        if id != 0 {
            return id;
        }
    }
}
