//! Run/event selection lists.
//!
//! A skim file lists one `run event` pair per line. Blank lines and lines
//! starting with `#` are ignored.

use crate::types::EventContext;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors from reading a skim list.
#[derive(Error, Debug)]
pub enum SkimError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line}: expected 'run event', got '{text}'")]
    BadLine { line: usize, text: String },
}

/// A set of (run, event) pairs to keep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkimList {
    entries: BTreeSet<(i32, i32)>,
}

impl SkimList {
    pub fn new<I: IntoIterator<Item = (i32, i32)>>(entries: I) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Parses skim file contents.
    pub fn parse(text: &str) -> Result<Self, SkimError> {
        let mut entries = BTreeSet::new();
        for (index, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let bad = || SkimError::BadLine {
                line: index + 1,
                text: line.to_string(),
            };
            let mut fields = trimmed.split_whitespace();
            let run = fields.next().and_then(|f| f.parse().ok()).ok_or_else(bad)?;
            let event = fields.next().and_then(|f| f.parse().ok()).ok_or_else(bad)?;
            entries.insert((run, event));
        }
        debug!(entries = entries.len(), "parsed skim list");
        Ok(Self { entries })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SkimError> {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if the event is on the list.
    pub fn contains(&self, context: &EventContext) -> bool {
        self.entries.contains(&(context.run, context.event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skim_list() {
        let list = SkimList::parse("# run event\n12 4\n\n  12 7  \n13 1 extra\n").unwrap();
        assert_eq!(list.len(), 3);
        assert!(list.contains(&EventContext::new(12, 4)));
        assert!(list.contains(&EventContext::new(12, 7)));
        assert!(list.contains(&EventContext::new(13, 1)));
        assert!(!list.contains(&EventContext::new(4, 12)));
    }

    #[test]
    fn test_bad_line() {
        match SkimList::parse("1 2\n3\n") {
            Err(SkimError::BadLine { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected bad line, got {:?}", other),
        }
    }
}
