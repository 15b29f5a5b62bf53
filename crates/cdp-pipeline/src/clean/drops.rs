//! Record drop reasons and per-batch counters

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Why a single record was dropped
///
/// Carries field names only, never field values.
#[derive(Error, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DropReason {
    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("field '{field}' cannot be coerced from {observed}")]
    TypeMismatch { field: String, observed: String },

    #[error("lookup for '{0}' unresolved")]
    LookupUnresolved(String),

    #[error("all '{0}' fields empty")]
    AllEmpty(String),

    #[error("record is not an object")]
    MalformedRecord,
}

impl DropReason {
    pub fn type_mismatch(field: &str, observed: &str) -> Self {
        Self::TypeMismatch {
            field: field.to_string(),
            observed: observed.to_string(),
        }
    }

    /// Stable label for the reason, without its field name
    pub fn kind(&self) -> &'static str {
        match self {
            DropReason::MissingField(_) => "missing_field",
            DropReason::TypeMismatch { .. } => "type_mismatch",
            DropReason::LookupUnresolved(_) => "lookup_unresolved",
            DropReason::AllEmpty(_) => "all_empty",
            DropReason::MalformedRecord => "malformed_record",
        }
    }
}

/// Per-batch, per-reason drop counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropCounter {
    counts: BTreeMap<DropReason, usize>,
}

impl DropCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, reason: DropReason) {
        *self.counts.entry(reason).or_insert(0) += 1;
    }

    pub fn count(&self, reason: &DropReason) -> usize {
        self.counts.get(reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DropReason, usize)> {
        self.counts.iter().map(|(r, c)| (r, *c))
    }

    pub fn merge(&mut self, other: &DropCounter) {
        for (reason, count) in other.iter() {
            *self.counts.entry(reason.clone()).or_insert(0) += count;
        }
    }
}

impl fmt::Display for DropCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.counts.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for (reason, count) in &self.counts {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", reason, count)?;
            first = false;
        }
        Ok(())
    }
}
