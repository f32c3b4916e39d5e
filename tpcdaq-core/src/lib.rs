//! Decoders for CAPTAIN TPC and photon detector DAQ data.
//!
//! This crate turns raw acquisition streams into a uniform event model:
//!
//! - the word-tagged (Nevis) TPC stream, see [`nevis`]
//! - UBDAQ crate/card/channel records, decoded lazily one level at a time,
//!   see [`record`] and [`ubdaq`]
//! - photon detector table rows, see [`pds`]
//!
//! A [`merge::TimeWindowMerger`] folds the photon detector events into the
//! TPC events that fall within a time window of them.
//!
//! # Example
//!
//! ```no_run
//! use tpcdaq_core::{EventSource, UbdaqOptions, UbdaqReader};
//!
//! let mut reader = UbdaqReader::open("run_0042.ubdaq.gz", UbdaqOptions::default()).unwrap();
//! while let Some(event) = reader.next_event().unwrap() {
//!     println!("{}: {} digits", event.context, event.digit_count());
//! }
//! ```

pub mod clock;
pub mod config;
pub mod encode;
pub mod error;
pub mod event;
pub mod merge;
pub mod nevis;
pub mod output;
pub mod parser;
pub mod pds;
pub mod reader;
pub mod record;
pub mod registry;
pub mod skim;
pub mod types;
pub mod ubdaq;

// Re-export commonly used types
pub use config::{DecoderConfig, UbdaqOptions};
pub use error::DecodeError;
pub use event::{DigitContainer, Event, EventSource, MemorySource, ProvenanceHeader};
pub use merge::{MergeState, MergeWindow, TimeWindowMerger};
pub use nevis::{NevisDecoder, NevisReader};
pub use output::{OutputError, OutputFormat};
pub use pds::{MemoryTable, PdsReader, PdsRow, PdsTable};
pub use reader::{Compression, WordReader};
pub use record::{EventRecord, Expand, Granularity};
pub use registry::{InputRegistry, InputSpec, RegistryError};
pub use skim::SkimList;
pub use types::{ChannelDigit, ChannelId, ChannelSystem, EventContext, Partition, Timestamp};
pub use ubdaq::UbdaqReader;
