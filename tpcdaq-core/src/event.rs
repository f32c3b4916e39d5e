//! Decoded event model handed to downstream analysis.
//!
//! An [`Event`] carries its context plus a set of named digit containers
//! addressed by path (`digits/drift` for TPC wires, `digits/pmt` for the
//! photon detectors). Merged secondary events are kept as sub-events.

use crate::error::Result;
use crate::types::{ChannelDigit, EventContext, Timestamp};
use std::collections::{BTreeMap, VecDeque};

/// Container path for TPC drift wire digits.
pub const DRIFT_DIGITS: &str = "digits/drift";
/// Container path for photon detector digits.
pub const PMT_DIGITS: &str = "digits/pmt";

/// Marks which slice of a merged container came from one secondary event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceHeader {
    /// Name of the secondary source, e.g. `"pds"`
    pub source_tag: String,
    /// First digit index (inclusive)
    pub begin: usize,
    /// Last digit index (exclusive)
    pub end: usize,
    pub source_timestamp: Timestamp,
}

/// An ordered collection of channel digits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigitContainer {
    pub digits: Vec<ChannelDigit>,
    pub headers: Vec<ProvenanceHeader>,
    /// A transient container is available to the event loop but not
    /// meant to be persisted
    pub transient: bool,
}

impl DigitContainer {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.digits.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.digits.is_empty()
    }

    pub fn push(&mut self, digit: ChannelDigit) {
        self.digits.push(digit);
    }
}

/// One decoded event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    pub context: EventContext,
    containers: BTreeMap<String, DigitContainer>,
    /// Small integer data attached by the reader (e.g. `gpsTime`)
    pub integers: BTreeMap<String, Vec<i64>>,
    /// Secondary events merged into this one
    pub sub_events: Vec<Event>,
}

impl Event {
    pub fn new(context: EventContext) -> Self {
        Self {
            context,
            ..Self::default()
        }
    }

    /// Looks up a digit container by path.
    pub fn container(&self, path: &str) -> Option<&DigitContainer> {
        self.containers.get(path)
    }

    /// Mutable lookup of a digit container by path.
    pub fn container_mut(&mut self, path: &str) -> Option<&mut DigitContainer> {
        self.containers.get_mut(path)
    }

    /// Returns the container at `path`, creating an empty one if needed.
    pub fn container_or_insert(&mut self, path: &str) -> &mut DigitContainer {
        self.containers.entry(path.to_string()).or_default()
    }

    /// Iterates over all containers in path order.
    pub fn containers(&self) -> impl Iterator<Item = (&str, &DigitContainer)> {
        self.containers.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Total number of digits across all containers.
    pub fn digit_count(&self) -> usize {
        self.containers.values().map(DigitContainer::len).sum()
    }
}

/// A pull-based producer of decoded events.
pub trait EventSource {
    /// Decodes the next event, or returns `Ok(None)` at the end of the
    /// stream.
    fn next_event(&mut self) -> Result<Option<Event>>;

    /// Number of events produced so far.
    fn events_read(&self) -> usize;
}

impl<T: EventSource + ?Sized> EventSource for Box<T> {
    fn next_event(&mut self) -> Result<Option<Event>> {
        (**self).next_event()
    }

    fn events_read(&self) -> usize {
        (**self).events_read()
    }
}

/// An event source backed by a queue of already decoded events.
#[derive(Debug, Default)]
pub struct MemorySource {
    events: VecDeque<Event>,
    read: usize,
}

impl MemorySource {
    pub fn new<I: IntoIterator<Item = Event>>(events: I) -> Self {
        Self {
            events: events.into_iter().collect(),
            read: 0,
        }
    }
}

impl EventSource for MemorySource {
    fn next_event(&mut self) -> Result<Option<Event>> {
        let event = self.events.pop_front();
        if event.is_some() {
            self.read += 1;
        }
        Ok(event)
    }

    fn events_read(&self) -> usize {
        self.read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelId, ChannelSystem};

    #[test]
    fn test_container_paths() {
        let mut event = Event::new(EventContext::new(1, 2));
        assert!(event.container(DRIFT_DIGITS).is_none());

        let id = ChannelId::new(ChannelSystem::Tpc, 0, 1, 2);
        event
            .container_or_insert(DRIFT_DIGITS)
            .push(ChannelDigit::new(id, 0, vec![1, 2, 3]));
        event.container_or_insert(PMT_DIGITS);

        assert_eq!(event.container(DRIFT_DIGITS).unwrap().len(), 1);
        assert!(event.container(PMT_DIGITS).unwrap().is_empty());
        assert_eq!(event.digit_count(), 1);

        let paths: Vec<&str> = event.containers().map(|(p, _)| p).collect();
        assert_eq!(paths, vec![DRIFT_DIGITS, PMT_DIGITS]);
    }

    #[test]
    fn test_memory_source() {
        let mut source = MemorySource::new(vec![
            Event::new(EventContext::new(1, 1)),
            Event::new(EventContext::new(1, 2)),
        ]);
        assert_eq!(source.next_event().unwrap().unwrap().context.event, 1);
        assert_eq!(source.next_event().unwrap().unwrap().context.event, 2);
        assert!(source.next_event().unwrap().is_none());
        assert_eq!(source.events_read(), 2);
    }
}
