use thiserror::Error;

/// Errors arising from bit packing and from decoding device payloads.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("bit layout is empty")]
    EmptyLayout,

    #[error("bit layout field {index} has width {width} (must be 1..=32)")]
    InvalidWidth { index: usize, width: u32 },

    #[error("bit layout spans {total} bits (maximum 64)")]
    LayoutTooWide { total: u32 },

    #[error("transmit layout carries {transmit} bits, encode layout needs {encode}")]
    LayoutMismatch { encode: u32, transmit: u32 },

    #[error("expected {expected} fields for this layout, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("field {index} value {value} does not fit in {width} bits")]
    FieldOverflow { index: usize, value: u64, width: u32 },

    #[error("stream length {len} is not a multiple of {per_segment}")]
    TruncatedUnits { len: usize, per_segment: usize },

    #[error("payload too short for {msg_type}: need {need} bytes, got {got}{}", format_raw_suffix(raw))]
    PayloadTooShort {
        msg_type: &'static str,
        need: usize,
        got: usize,
        /// Raw payload bytes for debug context.
        raw: Vec<u8>,
    },
}

impl WireError {
    /// Create a `PayloadTooShort` error carrying the offending payload.
    pub(crate) fn payload_too_short(msg_type: &'static str, need: usize, payload: &[u8]) -> Self {
        Self::PayloadTooShort { msg_type, need, got: payload.len(), raw: payload.to_vec() }
    }
}

/// Format raw bytes as a suffix like " | 01 00 01 ..." (empty if no bytes).
fn format_raw_suffix(raw: &[u8]) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let limit = 16;
    let hex: Vec<String> = raw.iter().take(limit).map(|b| format!("{b:02X}")).collect();
    let ellipsis = if raw.len() > limit { " ..." } else { "" };
    format!(" | {}{ellipsis}", hex.join(" "))
}

pub type Result<T> = std::result::Result<T, WireError>;
