//! Named input formats.
//!
//! Inputs are selected at run time by a short spec such as `nevis`,
//! `ubdaq(2800,3800,temp=5)` or `merge(50ms,10ms)`: a format name and an
//! optional argument string in parentheses. The application builds an
//! [`InputRegistry`] holding the formats it supports and opens files
//! through it.

use crate::config::{DecoderConfig, UbdaqOptions, DEFAULT_TRANSIENT_EVERY};
use crate::error::DecodeError;
use crate::event::EventSource;
use crate::merge::{MergeWindow, TimeWindowMerger, WindowError};
use crate::nevis::NevisReader;
use crate::ubdaq::UbdaqReader;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Name of the secondary input opened by `merge`.
pub const PDS_INPUT: &str = "mPDS";

/// Errors from selecting or opening an input.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Unknown input format '{0}'")]
    UnknownInput(String),

    #[error("Malformed input spec '{0}'")]
    BadSpec(String),

    #[error("Bad argument for input '{input}': {reason}")]
    BadArgument { input: String, reason: String },

    #[error("Merge window: {0}")]
    Window(#[from] WindowError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// An opened input.
pub type BoxedSource = Box<dyn EventSource>;

/// Opens `file` given the parenthesized arguments, if any.
pub type BuildFn = dyn Fn(&InputRegistry, Option<&str>, &str) -> Result<BoxedSource>;

/// A parsed input spec: `name` or `name(args)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub name: String,
    pub args: Option<String>,
}

impl InputSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let bad = || RegistryError::BadSpec(spec.to_string());
        let (name, args) = match spec.find('(') {
            None => (spec, None),
            Some(open) => {
                let inner = spec[open + 1..].strip_suffix(')').ok_or_else(bad)?;
                if inner.contains(['(', ')']) {
                    return Err(bad());
                }
                (&spec[..open], Some(inner.trim().to_string()))
            }
        };
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(bad());
        }
        Ok(Self {
            name: name.to_string(),
            args,
        })
    }
}

impl fmt::Display for InputSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.args {
            Some(args) => write!(f, "{}({})", self.name, args),
            None => write!(f, "{}", self.name),
        }
    }
}

struct Entry {
    name: String,
    description: String,
    build: Box<BuildFn>,
}

/// A table of input formats by name.
#[derive(Default)]
pub struct InputRegistry {
    entries: Vec<Entry>,
    config: DecoderConfig,
}

impl InputRegistry {
    /// An empty registry.
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            entries: Vec::new(),
            config,
        }
    }

    /// A registry with the `nevis`, `ubdaq` and `merge` formats. The merge
    /// format also needs an `mPDS` input to be registered.
    pub fn with_defaults(config: DecoderConfig) -> Self {
        let mut registry = Self::new(config);
        registry.register("nevis", "Read a Nevis word-tagged TPC file", open_nevis);
        registry.register(
            "ubdaq",
            "Read a UBDAQ file [ubdaq(first,last,temp[=n])]",
            open_ubdaq,
        );
        registry.register(
            "merge",
            "Combine TPC and PDS files [merge(window[,offset])], file is 'tpc,pds'",
            open_merge,
        );
        registry
    }

    /// Adds a format, replacing any format of the same name.
    pub fn register<F>(&mut self, name: &str, description: &str, build: F) -> &mut Self
    where
        F: Fn(&InputRegistry, Option<&str>, &str) -> Result<BoxedSource> + 'static,
    {
        self.entries.retain(|e| e.name != name);
        self.entries.push(Entry {
            name: name.to_string(),
            description: description.to_string(),
            build: Box::new(build),
        });
        self
    }

    #[inline]
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Registered formats as (name, description), in registration order.
    pub fn formats(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.description.as_str()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Opens `file` with the format named by `spec`.
    pub fn open(&self, spec: &str, file: &str) -> Result<BoxedSource> {
        let spec = InputSpec::parse(spec)?;
        self.open_spec(&spec, file)
    }

    pub fn open_spec(&self, spec: &InputSpec, file: &str) -> Result<BoxedSource> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == spec.name)
            .ok_or_else(|| RegistryError::UnknownInput(spec.name.clone()))?;
        info!(input = %spec, file, "opening input");
        (entry.build)(self, spec.args.as_deref(), file)
    }
}

/// Parses the `ubdaq` arguments: up to two sample numbers (first, last)
/// and an optional `temp[=n]`.
pub fn ubdaq_options(args: Option<&str>, config: DecoderConfig) -> Result<UbdaqOptions> {
    let mut options = UbdaqOptions {
        config,
        ..UbdaqOptions::default()
    };
    let bad = |reason: String| RegistryError::BadArgument {
        input: "ubdaq".to_string(),
        reason,
    };

    let mut samples = Vec::new();
    for token in args.unwrap_or("").split(',').map(str::trim) {
        if token.is_empty() {
            continue;
        }
        if token == "temp" {
            options.transient_every = Some(DEFAULT_TRANSIENT_EVERY);
        } else if let Some(n) = token.strip_prefix("temp=") {
            let every = n
                .trim()
                .parse()
                .map_err(|_| bad(format!("invalid temp value '{}'", n)))?;
            options.transient_every = Some(every);
        } else {
            let sample: usize = token
                .parse()
                .map_err(|_| bad(format!("unexpected argument '{}'", token)))?;
            samples.push(sample);
        }
    }
    match samples[..] {
        [] => {}
        [first] => options.first_sample = Some(first),
        [first, last] => {
            options.first_sample = Some(first);
            options.last_sample = Some(last);
        }
        _ => return Err(bad(format!("expected at most two samples, got {}", samples.len()))),
    }
    Ok(options)
}

fn open_nevis(registry: &InputRegistry, args: Option<&str>, file: &str) -> Result<BoxedSource> {
    if matches!(args, Some(a) if !a.is_empty()) {
        return Err(RegistryError::BadArgument {
            input: "nevis".to_string(),
            reason: "takes no arguments".to_string(),
        });
    }
    Ok(Box::new(NevisReader::open(file, registry.config)?))
}

fn open_ubdaq(registry: &InputRegistry, args: Option<&str>, file: &str) -> Result<BoxedSource> {
    let options = ubdaq_options(args, registry.config)?;
    Ok(Box::new(UbdaqReader::open(Path::new(file), options)?))
}

fn open_merge(registry: &InputRegistry, args: Option<&str>, file: &str) -> Result<BoxedSource> {
    let window = MergeWindow::parse(args.unwrap_or(""))?;
    let (tpc, pds) = file.split_once(',').ok_or_else(|| RegistryError::BadArgument {
        input: "merge".to_string(),
        reason: format!("expected 'tpc_file,pds_file', got '{}'", file),
    })?;
    info!(tpc, pds, "opening merge inputs");
    let primary = registry.open("ubdaq", tpc.trim())?;
    let secondary = registry.open(PDS_INPUT, pds.trim())?;
    Ok(Box::new(TimeWindowMerger::new(primary, secondary, window)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, MemorySource};
    use crate::types::EventContext;

    #[test]
    fn test_parse_spec() {
        assert_eq!(
            InputSpec::parse("merge(50ms,10ms)").unwrap(),
            InputSpec {
                name: "merge".to_string(),
                args: Some("50ms,10ms".to_string()),
            }
        );
        assert_eq!(InputSpec::parse(" nevis ").unwrap().args, None);
        assert_eq!(InputSpec::parse("ubdaq()").unwrap().args, Some(String::new()));
        assert!(InputSpec::parse("merge(50ms").is_err());
        assert!(InputSpec::parse("(x)").is_err());
        assert!(InputSpec::parse("a((b))").is_err());
    }

    #[test]
    fn test_spec_display() {
        let spec = InputSpec::parse("ubdaq(temp)").unwrap();
        assert_eq!(spec.to_string(), "ubdaq(temp)");
    }

    #[test]
    fn test_ubdaq_options() {
        let config = DecoderConfig::default();
        let options = ubdaq_options(Some("2800,3800,temp=5"), config).unwrap();
        assert_eq!(options.first_sample, Some(2800));
        assert_eq!(options.last_sample, Some(3800));
        assert_eq!(options.transient_every, Some(5));

        let options = ubdaq_options(Some("temp"), config).unwrap();
        assert_eq!(options.first_sample, None);
        assert_eq!(options.transient_every, Some(DEFAULT_TRANSIENT_EVERY));

        assert_eq!(ubdaq_options(None, config).unwrap(), UbdaqOptions::default());
        assert!(ubdaq_options(Some("1,2,3"), config).is_err());
        assert!(ubdaq_options(Some("temp=x"), config).is_err());
        assert!(ubdaq_options(Some("fast"), config).is_err());
    }

    #[test]
    fn test_unknown_input() {
        let registry = InputRegistry::with_defaults(DecoderConfig::default());
        assert!(matches!(
            registry.open("root", "file.root"),
            Err(RegistryError::UnknownInput(name)) if name == "root"
        ));
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = InputRegistry::default();
        registry
            .register("mem", "first", |_, _, _| Ok(Box::new(MemorySource::default())))
            .register("mem", "second", |_, _, _| {
                Ok(Box::new(MemorySource::new(vec![Event::new(EventContext::new(1, 1))])))
            });
        let formats: Vec<_> = registry.formats().collect();
        assert_eq!(formats, vec![("mem", "second")]);

        let mut source = registry.open("mem", "").unwrap();
        assert!(source.next_event().unwrap().is_some());
    }

    #[test]
    fn test_merge_needs_two_files() {
        let registry = InputRegistry::with_defaults(DecoderConfig::default());
        assert!(matches!(
            registry.open("merge(50ms)", "only_one_file"),
            Err(RegistryError::BadArgument { .. })
        ));
        assert!(matches!(
            registry.open("merge(50 lightyears)", "a,b"),
            Err(RegistryError::Window(_))
        ));
    }
}
