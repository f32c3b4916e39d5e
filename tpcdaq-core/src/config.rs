//! Decoder configuration.

use crate::types::{CARD_SAMPLE_CAP, NEVIS_SAMPLE_CAP};

/// Safety limits applied while decoding.
///
/// The caps bound memory use on corrupt or truncated input; they are not
/// physical limits of the electronics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Maximum samples in one word-tagged (Nevis) channel
    pub nevis_sample_cap: usize,
    /// Maximum samples in one crate/card/channel channel
    pub card_sample_cap: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            nevis_sample_cap: NEVIS_SAMPLE_CAP,
            card_sample_cap: CARD_SAMPLE_CAP,
        }
    }
}

/// Default number of events between persisted digit containers when the
/// transient option is given without a value.
pub const DEFAULT_TRANSIENT_EVERY: usize = 200;

/// Options for converting UBDAQ records into events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UbdaqOptions {
    /// First sample to keep; ignored unless `0 < first < samples`
    pub first_sample: Option<usize>,
    /// One past the last sample to keep; ignored unless it lies between
    /// the first sample and the channel length
    pub last_sample: Option<usize>,
    /// Keep the drift digits only on every n-th event, marking the rest
    /// transient
    pub transient_every: Option<usize>,
    pub config: DecoderConfig,
}

impl UbdaqOptions {
    /// Computes the `[begin, end)` sample range to keep for a channel of
    /// `n_samples` samples.
    pub fn sample_window(&self, n_samples: usize) -> (usize, usize) {
        let first = self.first_sample.unwrap_or(0);
        let begin = if first > 0 && first < n_samples { first } else { 0 };
        let end = match self.last_sample {
            Some(last) if last > first && last < n_samples => last,
            _ => n_samples,
        };
        (begin, end.max(begin))
    }

    /// Returns true if the drift digits of the `index`-th event (counting
    /// from zero) should be marked transient.
    pub fn is_transient(&self, index: usize) -> bool {
        match self.transient_every {
            Some(every) if every > 0 => index % every != 0,
            _ => false,
        }
    }
}
