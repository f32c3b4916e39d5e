//! Lazily expanded UBDAQ event records.
//!
//! A record is read from the stream as one opaque byte span and decoded one
//! level at a time on demand:
//!
//! ```text
//! EventRecord  ── crates ──▶ CrateRecord ── cards ──▶ CardRecord ── channels ──▶ ChannelRecord
//! ```
//!
//! Every level owns a [`Payload`] that is either the raw bytes of its
//! children or the decoded children themselves. Expansion consumes the raw
//! bytes, so each level is decoded at most once and never goes back.

mod card;
mod channel;
mod crate_record;
mod event_record;

pub use card::{CardHeader, CardRecord, CARD_HEADER_BYTES};
pub use channel::ChannelRecord;
pub use crate_record::{CrateEventHeader, CrateHeader, CrateRecord, CRATE_HEADER_BYTES};
pub use event_record::{BeamDatum, BeamHeader, BeamRecord, EventRecord, GlobalHeader, GLOBAL_HEADER_BYTES};

use crate::config::DecoderConfig;
use crate::error::{DecodeError, Result};
use std::fmt::Debug;
use tracing::warn;

/// How far a record has been decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Granularity {
    Event,
    Crate,
    Card,
    Channel,
}

/// The contents of one record level.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<K, C> {
    /// Undecoded bytes of all children
    Collapsed(Vec<u8>),
    /// Decoded children in the order they appear in the buffer
    Expanded(Vec<(K, C)>),
}

impl<K, C> Payload<K, C> {
    #[inline]
    pub fn is_expanded(&self) -> bool {
        matches!(self, Self::Expanded(_))
    }

    /// Raw bytes, if not yet expanded.
    pub fn raw(&self) -> Option<&[u8]> {
        match self {
            Self::Collapsed(bytes) => Some(bytes),
            Self::Expanded(_) => None,
        }
    }

    /// Decoded children, if expanded.
    pub fn children(&self) -> Option<&[(K, C)]> {
        match self {
            Self::Collapsed(_) => None,
            Self::Expanded(children) => Some(children),
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut [(K, C)]> {
        match self {
            Self::Collapsed(_) => None,
            Self::Expanded(children) => Some(children),
        }
    }

    /// Decodes the raw bytes into children with `split` and drops the bytes.
    ///
    /// Returns `Ok(None)` if the payload was already expanded. On error the
    /// payload is left collapsed.
    pub(crate) fn materialize<T, F>(&mut self, split: F) -> Result<Option<T>>
    where
        F: FnOnce(&[u8]) -> Result<(Vec<(K, C)>, T)>,
    {
        let (children, extra) = match self {
            Self::Collapsed(bytes) => split(bytes)?,
            Self::Expanded(_) => return Ok(None),
        };
        *self = Self::Expanded(children);
        Ok(Some(extra))
    }
}

/// A record level that can be decoded to a finer granularity.
pub trait Expand {
    /// Current granularity.
    fn granularity(&self) -> Granularity;

    /// Decodes down to `to`, using the limits in `config`.
    ///
    /// Does nothing if the record is already at or below `to`. Expanding
    /// past the next level passes through every intermediate level. On
    /// error the granularity reports the levels that were completed.
    fn expand_with(&mut self, to: Granularity, config: &DecoderConfig) -> Result<()>;

    /// Decodes down to `to` with the default limits.
    fn expand(&mut self, to: Granularity) -> Result<()> {
        self.expand_with(to, &DecoderConfig::default())
    }
}

/// Expands every child to `to`.
pub(crate) fn expand_children<K, C: Expand>(
    payload: &mut Payload<K, C>,
    to: Granularity,
    config: &DecoderConfig,
) -> Result<()> {
    if let Some(children) = payload.children_mut() {
        for (_, child) in children.iter_mut() {
            child.expand_with(to, config)?;
        }
    }
    Ok(())
}

/// Appends a child unless its key is already present, in which case the
/// first occurrence wins.
pub(crate) fn insert_child<K: PartialEq + Debug, C>(children: &mut Vec<(K, C)>, key: K, child: C) {
    if children.iter().any(|(k, _)| *k == key) {
        warn!(?key, "duplicate key in record, keeping first occurrence");
        return;
    }
    children.push((key, child));
}

/// Converts running off the end of an already buffered span into a
/// structural error naming what was being read.
pub(crate) fn overrun(what: &str) -> impl Fn(DecodeError) -> DecodeError + '_ {
    move |err| match err {
        DecodeError::TruncatedStream { offset, needed } => DecodeError::MalformedHeader(format!(
            "{} overruns its buffer at byte {} ({} bytes missing)",
            what, offset, needed
        )),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granularity_order() {
        assert!(Granularity::Event < Granularity::Crate);
        assert!(Granularity::Crate < Granularity::Card);
        assert!(Granularity::Card < Granularity::Channel);
    }

    #[test]
    fn test_materialize_once() {
        let mut payload: Payload<u8, u8> = Payload::Collapsed(vec![1, 2, 3]);
        let extra = payload
            .materialize(|bytes| Ok((bytes.iter().map(|b| (*b, b * 10)).collect(), bytes.len())))
            .unwrap();
        assert_eq!(extra, Some(3));
        assert_eq!(payload.children().unwrap(), &[(1, 10), (2, 20), (3, 30)]);
        assert!(payload.raw().is_none());

        // A second expansion leaves the children alone
        let again = payload
            .materialize(|_| -> Result<(Vec<(u8, u8)>, ())> { panic!("re-split") })
            .unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn test_materialize_error_keeps_bytes() {
        let mut payload: Payload<u8, u8> = Payload::Collapsed(vec![1]);
        let result: Result<Option<()>> =
            payload.materialize(|_| Err(DecodeError::MalformedHeader("bad".into())));
        assert!(result.is_err());
        assert_eq!(payload.raw(), Some(&[1u8][..]));
    }

    #[test]
    fn test_insert_child_keeps_first() {
        let mut children = Vec::new();
        insert_child(&mut children, 1u16, "a");
        insert_child(&mut children, 2u16, "b");
        insert_child(&mut children, 1u16, "c");
        assert_eq!(children, vec![(1, "a"), (2, "b")]);
    }
}
