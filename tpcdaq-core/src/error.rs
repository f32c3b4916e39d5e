//! Errors raised while decoding DAQ streams.

use thiserror::Error;

/// Errors that can occur while decoding an event.
///
/// Every variant except [`DecodeError::UnexpectedFlag`] and
/// [`DecodeError::InvalidTimestamp`] aborts the event being decoded. Those
/// two are only ever logged; they are listed here so callers that collect
/// diagnostics can name them.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream truncated at byte {offset}: needed {needed} more bytes")]
    TruncatedStream { offset: u64, needed: usize },

    #[error("Malformed event barrier: word {index} is {word:#06x}")]
    MalformedBarrier { index: usize, word: u16 },

    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Channel {channel} exceeds {limit} samples")]
    OverlongChannel { channel: u32, limit: usize },

    #[error("Channel {channel} has more than {limit} samples")]
    SampleCapExceeded { channel: u32, limit: usize },

    #[error("Unexpected flag {flag:#x} (data {data:#05x}) in word stream")]
    UnexpectedFlag { flag: u8, data: u16 },

    #[error("Event record exhausted after {consumed} bytes without end-of-event trailer")]
    MissingEventTrailer { consumed: usize },

    #[error("Event {run}.{event} has no valid DAQ clock")]
    InvalidTimestamp { run: i32, event: i32 },

    #[error("Record not expanded to {0:?} granularity")]
    NotExpanded(crate::record::Granularity),
}

pub type Result<T> = std::result::Result<T, DecodeError>;
