//! Time window merging of a primary (TPC) and a secondary (PDS) stream.
//!
//! Both streams must be ordered by time. For each primary event every
//! secondary event whose time falls strictly inside `(t - w, t + w)` around
//! `t = primary time + offset` is attached to it; secondary events at or
//! before the lower edge are dropped and the first one at or after the upper
//! edge is kept for the next primary event. Both streams are read once,
//! front to back.

use crate::error::Result;
use crate::event::{Event, EventSource, ProvenanceHeader, PMT_DIGITS};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Provenance tag for digits taken from the secondary stream.
pub const SECONDARY_TAG: &str = "pds";

const NS_PER_MS: i64 = 1_000_000;

/// Errors from parsing a merge window.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum WindowError {
    #[error("Invalid duration '{0}'")]
    InvalidDuration(String),

    #[error("Unknown time unit '{0}'")]
    UnknownUnit(String),

    #[error("Negative window half width {0} ns")]
    NegativeWidth(i64),

    #[error("Duration '{0}' out of range")]
    OutOfRange(String),
}

/// Parses a duration like `50ms`, `2.5us` or `1s` into nanoseconds. A
/// number without a unit is taken as nanoseconds.
pub fn parse_duration(text: &str) -> std::result::Result<i64, WindowError> {
    let text = text.trim();
    let split = text
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| WindowError::InvalidDuration(text.to_string()))?;
    let scale = match unit.trim() {
        "" | "ns" => 1.0,
        "us" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        other => return Err(WindowError::UnknownUnit(other.to_string())),
    };
    let ns = (value * scale).round();
    // i64::MAX as f64 rounds up to 2^63
    if !ns.is_finite() || ns >= i64::MAX as f64 || ns < i64::MIN as f64 {
        return Err(WindowError::OutOfRange(text.to_string()));
    }
    Ok(ns as i64)
}

/// The symmetric time window used to match secondary events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeWindow {
    pub half_width_ns: i64,
    /// Shift of the window center relative to the primary event time
    pub offset_ns: i64,
}

impl Default for MergeWindow {
    fn default() -> Self {
        Self {
            half_width_ns: 40 * NS_PER_MS,
            offset_ns: 0,
        }
    }
}

impl MergeWindow {
    pub fn new(half_width_ns: i64, offset_ns: i64) -> Self {
        Self {
            half_width_ns,
            offset_ns,
        }
    }

    /// Parses `window[,offset]`, e.g. `50ms,10ms`. An empty string gives
    /// the default window.
    pub fn parse(text: &str) -> std::result::Result<Self, WindowError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::default());
        }
        let (width, offset) = match text.split_once(',') {
            Some((width, offset)) => (width, offset.trim()),
            None => (text, ""),
        };
        let half_width_ns = parse_duration(width)?;
        if half_width_ns < 0 {
            return Err(WindowError::NegativeWidth(half_width_ns));
        }
        let offset_ns = if offset.is_empty() {
            0
        } else {
            parse_duration(offset)?
        };
        Ok(Self::new(half_width_ns, offset_ns))
    }
}

/// Where the merger is in producing the current event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    /// Ready to pull the next primary event
    AwaitPrimary,
    /// Holding a primary event, secondary not yet looked at
    HavePrimaryNoSecondary,
    /// Holding a primary event and a secondary candidate
    HaveBoth,
    /// The primary stream is exhausted
    Done,
}

/// Merges a secondary event stream into a primary one.
pub struct TimeWindowMerger<P, S> {
    primary: P,
    secondary: S,
    window: MergeWindow,
    state: MergeState,
    current: Option<Event>,
    pending: Option<Event>,
    secondary_exhausted: bool,
    events_read: usize,
}

impl<P: EventSource, S: EventSource> TimeWindowMerger<P, S> {
    pub fn new(primary: P, secondary: S, window: MergeWindow) -> Self {
        info!(
            half_width_ns = window.half_width_ns,
            offset_ns = window.offset_ns,
            "merge window"
        );
        Self {
            primary,
            secondary,
            window,
            state: MergeState::AwaitPrimary,
            current: None,
            pending: None,
            secondary_exhausted: false,
            events_read: 0,
        }
    }

    #[inline]
    pub fn window(&self) -> MergeWindow {
        self.window
    }

    #[inline]
    pub fn state(&self) -> MergeState {
        self.state
    }

    /// The secondary event held back for the next primary event.
    pub fn pending_secondary(&self) -> Option<&Event> {
        self.pending.as_ref()
    }

    /// Consumes the merger, returning both sources.
    pub fn into_inner(self) -> (P, S) {
        (self.primary, self.secondary)
    }

    fn advance_secondary(&mut self) -> Result<()> {
        self.pending = None;
        if self.secondary_exhausted {
            return Ok(());
        }
        match self.secondary.next_event()? {
            Some(event) => self.pending = Some(event),
            None => {
                debug!("secondary stream exhausted");
                self.secondary_exhausted = true;
            }
        }
        Ok(())
    }

    /// Attaches every in-window secondary event to `primary`.
    ///
    /// Window arithmetic is done in `i128` so that no combination of clock
    /// and window values can overflow.
    fn merge_into(&mut self, mut primary: Event) -> Result<Event> {
        let center = match primary.context.nano_stamp() {
            Some(t) => i128::from(t) + i128::from(self.window.offset_ns),
            None => {
                warn!(event = %primary.context, "primary event has no clock, not merged");
                return Ok(primary);
            }
        };
        let half = i128::from(self.window.half_width_ns);
        debug!(event = %primary.context, "merging");

        let mut matched = Vec::new();
        while let Some(secondary) = self.pending.take() {
            let diff = match secondary.context.nano_stamp() {
                Some(t) => i128::from(t) - center,
                None => {
                    warn!(event = %secondary.context, "secondary event has no clock, discarded");
                    self.advance_secondary()?;
                    continue;
                }
            };
            if diff >= half {
                self.pending = Some(secondary);
                break;
            }
            if diff > -half {
                debug!(event = %secondary.context, diff_ns = %diff, "secondary match");
                matched.push(secondary);
            } else {
                debug!(event = %secondary.context, diff_ns = %diff, "secondary discard");
            }
            self.advance_secondary()?;
        }

        attach(&mut primary, matched);
        Ok(primary)
    }
}

/// Moves the pmt digits of each sub-event into the primary's container and
/// keeps the emptied sub-events.
fn attach(primary: &mut Event, mut matched: Vec<Event>) {
    let combined = primary.container_or_insert(PMT_DIGITS);
    for sub in matched.iter_mut() {
        let timestamp = sub.context.timestamp;
        let digits = match sub.container_mut(PMT_DIGITS) {
            Some(container) if !container.is_empty() => std::mem::take(&mut container.digits),
            _ => continue,
        };
        let begin = combined.len();
        combined.digits.extend(digits);
        if let Some(ts) = timestamp.filter(|t| t.seconds > 0) {
            combined.headers.push(ProvenanceHeader {
                source_tag: SECONDARY_TAG.to_string(),
                begin,
                end: combined.len(),
                source_timestamp: ts,
            });
        }
    }
    primary.sub_events.extend(matched);
}

impl<P: EventSource, S: EventSource> EventSource for TimeWindowMerger<P, S> {
    fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            match self.state {
                MergeState::Done => return Ok(None),
                MergeState::AwaitPrimary => match self.primary.next_event()? {
                    Some(event) => {
                        self.current = Some(event);
                        self.state = MergeState::HavePrimaryNoSecondary;
                    }
                    None => {
                        info!(events = self.events_read, "primary stream exhausted, merge done");
                        self.state = MergeState::Done;
                    }
                },
                MergeState::HavePrimaryNoSecondary => {
                    if self.pending.is_none() {
                        self.advance_secondary()?;
                    }
                    if self.pending.is_some() {
                        self.state = MergeState::HaveBoth;
                    } else {
                        self.state = MergeState::AwaitPrimary;
                        if let Some(event) = self.current.take() {
                            self.events_read += 1;
                            return Ok(Some(event));
                        }
                    }
                }
                MergeState::HaveBoth => {
                    self.state = MergeState::AwaitPrimary;
                    if let Some(primary) = self.current.take() {
                        let event = self.merge_into(primary)?;
                        self.events_read += 1;
                        return Ok(Some(event));
                    }
                }
            }
        }
    }

    fn events_read(&self) -> usize {
        self.events_read
    }
}
