//! Per-(year, kind) sequential document numbers.
//!
//! A [`SequenceCounter`] is one row per calendar year holding one integer per
//! [`DocumentKind`]. Stores increment it inside the same unit of work as the
//! document it numbers, so an aborted unit never consumes a number it could
//! collide on later.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tradebook_core::{DomainError, DomainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Invoice,
    Purchase,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Invoice => "invoice",
            DocumentKind::Purchase => "purchase",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "invoice" => Some(DocumentKind::Invoice),
            "purchase" => Some(DocumentKind::Purchase),
            _ => None,
        }
    }
}

/// Yearly counter row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceCounter {
    year: i32,
    counters: BTreeMap<DocumentKind, u64>,
}

impl SequenceCounter {
    /// The row created on first use of a year: every counter at zero.
    pub fn new(year: i32) -> Self {
        Self {
            year,
            counters: BTreeMap::new(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// Last number handed out for `kind` (0 if none yet).
    pub fn current(&self, kind: DocumentKind) -> u64 {
        self.counters.get(&kind).copied().unwrap_or(0)
    }

    /// Advance the counter for `kind` and return the new value.
    pub fn increment(&mut self, kind: DocumentKind) -> u64 {
        let value = self.counters.entry(kind).or_insert(0);
        *value += 1;
        *value
    }

    /// Set a counter from persisted state.
    pub fn with_value(mut self, kind: DocumentKind, value: u64) -> Self {
        self.counters.insert(kind, value);
        self
    }
}

/// Display prefixes per document kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingScheme {
    invoice_prefix: String,
    purchase_prefix: String,
}

impl NumberingScheme {
    /// Prefixes must be non-empty and distinct from each other.
    pub fn new(
        invoice_prefix: impl Into<String>,
        purchase_prefix: impl Into<String>,
    ) -> DomainResult<Self> {
        let invoice_prefix = invoice_prefix.into().trim().to_string();
        let purchase_prefix = purchase_prefix.into().trim().to_string();

        if invoice_prefix.is_empty() || purchase_prefix.is_empty() {
            return Err(DomainError::validation("document prefixes cannot be empty"));
        }
        if invoice_prefix == purchase_prefix {
            return Err(DomainError::validation(format!(
                "invoice and purchase prefixes must differ (both are {invoice_prefix})"
            )));
        }

        Ok(Self {
            invoice_prefix,
            purchase_prefix,
        })
    }

    pub fn prefix(&self, kind: DocumentKind) -> &str {
        match kind {
            DocumentKind::Invoice => &self.invoice_prefix,
            DocumentKind::Purchase => &self.purchase_prefix,
        }
    }

    pub fn number(&self, kind: DocumentKind, year: i32, sequence: u64) -> DocumentNumber {
        DocumentNumber {
            kind,
            year,
            sequence,
            display: format!("{}-{}/{}", self.prefix(kind), year, sequence),
        }
    }
}

impl Default for NumberingScheme {
    fn default() -> Self {
        Self {
            invoice_prefix: "INV".to_string(),
            purchase_prefix: "PUR".to_string(),
        }
    }
}

/// An allocated number: unique per `(kind, year, sequence)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentNumber {
    pub kind: DocumentKind,
    pub year: i32,
    pub sequence: u64,
    /// `"{PREFIX}-{year}/{sequence}"`.
    pub display: String,
}

impl core::fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.display)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_independent_per_kind() {
        let mut row = SequenceCounter::new(2025);
        let scheme = NumberingScheme::default();

        let a = scheme.number(DocumentKind::Invoice, 2025, row.increment(DocumentKind::Invoice));
        let p = scheme.number(DocumentKind::Purchase, 2025, row.increment(DocumentKind::Purchase));
        let b = scheme.number(DocumentKind::Invoice, 2025, row.increment(DocumentKind::Invoice));

        assert_eq!(a.display, "INV-2025/1");
        assert_eq!(b.display, "INV-2025/2");
        assert_eq!(p.display, "PUR-2025/1");
        assert_eq!(row.current(DocumentKind::Invoice), 2);
        assert_eq!(row.current(DocumentKind::Purchase), 1);
    }

    #[test]
    fn restored_counter_continues_from_stored_value() {
        let mut row = SequenceCounter::new(2024).with_value(DocumentKind::Purchase, 41);
        assert_eq!(row.increment(DocumentKind::Purchase), 42);
        assert_eq!(row.current(DocumentKind::Invoice), 0);
    }

    #[test]
    fn prefixes_must_be_distinct_and_non_empty() {
        assert!(NumberingScheme::new("INV", "INV").is_err());
        assert!(NumberingScheme::new(" ", "PUR").is_err());
        let scheme = NumberingScheme::new("S", "P").unwrap();
        assert_eq!(scheme.number(DocumentKind::Purchase, 2026, 7).to_string(), "P-2026/7");
    }
}
