//! Documents module: invoices, purchases, and the pure computations behind posting them.
//!
//! - [`calculator`]: line-item discount/tax/rounding.
//! - [`numbering`]: per-(year, kind) sequence counters and display numbers.
//! - [`document`]: the committed document record and its outbound view.
//! - [`events`]: post-commit posting events.

pub mod calculator;
pub mod document;
pub mod events;
pub mod numbering;

pub use calculator::{Computation, DocumentTotals, LineItem, LineItemCalculator, PricedLine};
pub use document::{
    BankAccountId, Document, DocumentFlags, DocumentHeader, DocumentId, DocumentView, SignatureId,
    validate_initial_payment,
};
pub use events::{PostingEvent, StockMovement, StockMovementKind};
pub use numbering::{DocumentKind, DocumentNumber, NumberingScheme, SequenceCounter};
