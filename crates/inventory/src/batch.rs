use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tradebook_core::{AggregateId, typed_id};
use tradebook_products::ProductId;

typed_id!(
    /// Batch identifier.
    BatchId
);

/// A quantity of one product received by one purchase, at one unit cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub product_id: ProductId,
    /// Purchase document that received this batch.
    pub source_document_id: AggregateId,
    pub unit_cost: Decimal,
    /// Never negative.
    pub current_quantity: Decimal,
    pub sale_unit_price: Option<Decimal>,
    pub is_deleted: bool,
    pub received_at: DateTime<Utc>,
}

impl Batch {
    /// Deleted or exhausted batches are skipped by deductions.
    pub fn is_eligible(&self) -> bool {
        !self.is_deleted && self.current_quantity > Decimal::ZERO
    }
}

/// Quantity taken from one batch by a deduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConsumption {
    pub batch_id: BatchId,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

impl BatchConsumption {
    /// `quantity × unit_cost`; `None` on overflow.
    pub fn cost(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.unit_cost)
    }
}
