//! Core types shared by the decoders and the merge engine.
//!
//! This module defines the event context, channel identifiers and decoded
//! channel digits that every input format produces.

use std::fmt;

/// Clock value used by the DAQ to mark an unset timestamp field.
pub const INVALID_CLOCK: u32 = 0xFFFF_FFFF;

/// Default cap on samples per channel for the crate/card/channel format.
pub const CARD_SAMPLE_CAP: usize = 9596;

/// Default cap on samples per channel for the word-tagged format.
pub const NEVIS_SAMPLE_CAP: usize = 50_000;

/// Detector partition that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Partition {
    /// Not set by the input format.
    #[default]
    Unknown,
    /// The full size CAPTAIN detector.
    Captain,
    /// The miniCAPTAIN prototype.
    MiniCaptain,
}

/// A wall clock time stamp with nanosecond resolution.
///
/// A `Timestamp` only exists when both clock fields are valid; an unset
/// clock is represented by `Option<Timestamp>::None` rather than a zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Seconds since the unix epoch (UTC)
    pub seconds: u32,
    /// Nanoseconds within the second
    pub nanoseconds: u32,
}

impl Timestamp {
    /// Creates a time stamp from valid clock fields.
    #[inline]
    pub fn new(seconds: u32, nanoseconds: u32) -> Self {
        Self {
            seconds,
            nanoseconds,
        }
    }

    /// Builds a time stamp from raw DAQ clock fields.
    ///
    /// Returns `None` if either field carries the [`INVALID_CLOCK`] sentinel,
    /// so the two fields are always valid or invalid together.
    pub fn from_raw(seconds: u32, nanoseconds: u32) -> Option<Self> {
        if seconds == INVALID_CLOCK || nanoseconds == INVALID_CLOCK {
            None
        } else {
            Some(Self::new(seconds, nanoseconds))
        }
    }

    /// Total nanoseconds since the epoch.
    #[inline]
    pub fn nano_stamp(&self) -> i64 {
        i64::from(self.seconds) * 1_000_000_000 + i64::from(self.nanoseconds)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanoseconds)
    }
}

/// Identification and timing for one decoded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventContext {
    pub run: i32,
    pub subrun: i32,
    pub event: i32,
    /// `None` when the DAQ did not provide a usable clock
    pub timestamp: Option<Timestamp>,
    pub partition: Partition,
}

impl EventContext {
    /// Creates a context with only run and event numbers set.
    pub fn new(run: i32, event: i32) -> Self {
        Self {
            run,
            event,
            ..Self::default()
        }
    }

    /// Event time in nanoseconds, if the clock is valid.
    #[inline]
    pub fn nano_stamp(&self) -> Option<i64> {
        self.timestamp.map(|t| t.nano_stamp())
    }
}

impl fmt::Display for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.run, self.subrun, self.event)?;
        match self.timestamp {
            Some(t) => write!(f, " @ {}", t),
            None => write!(f, " @ <no time>"),
        }
    }
}

/// Electronics system a channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelSystem {
    /// TPC wire read out through the crate/card electronics
    Tpc,
    /// Photon detector digitizer channel
    Pds,
    /// Flat channel numbering with no electronics structure
    Mc,
}

impl ChannelSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tpc => "tpc",
            Self::Pds => "pds",
            Self::Mc => "mc",
        }
    }
}

/// A (crate, card, channel) address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId {
    pub system: ChannelSystem,
    pub crate_number: u32,
    /// Card module id (TPC) or digitizer index (PDS)
    pub card: u32,
    pub channel: u32,
}

impl ChannelId {
    #[inline]
    pub fn new(system: ChannelSystem, crate_number: u32, card: u32, channel: u32) -> Self {
        Self {
            system,
            crate_number,
            card,
            channel,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}-{}",
            self.system.as_str(),
            self.crate_number,
            self.card,
            self.channel
        )
    }
}

/// One channel's digitized waveform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDigit {
    pub id: ChannelId,
    /// Index of the first stored sample within the full readout window
    pub start_sample: usize,
    /// ADC samples in readout order
    pub samples: Vec<u16>,
}

impl ChannelDigit {
    /// Creates a new digit.
    pub fn new(id: ChannelId, start_sample: usize, samples: Vec<u16>) -> Self {
        Self {
            id,
            start_sample,
            samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_sentinel() {
        assert_eq!(Timestamp::from_raw(INVALID_CLOCK, 12), None);
        assert_eq!(Timestamp::from_raw(12, INVALID_CLOCK), None);
        assert_eq!(Timestamp::from_raw(12, 34), Some(Timestamp::new(12, 34)));
    }

    #[test]
    fn test_nano_stamp() {
        let t = Timestamp::new(2, 500);
        assert_eq!(t.nano_stamp(), 2_000_000_500);

        let mut context = EventContext::new(1, 2);
        assert_eq!(context.nano_stamp(), None);
        context.timestamp = Some(t);
        assert_eq!(context.nano_stamp(), Some(2_000_000_500));
    }

    #[test]
    fn test_channel_id_display() {
        let id = ChannelId::new(ChannelSystem::Tpc, 1, 7, 33);
        assert_eq!(id.to_string(), "tpc:1-7-33");
    }
}
